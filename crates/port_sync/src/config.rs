use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_PART_SIZE: u64 = 5 * 1024 * 1024;

/// The four upload endpoints, configured once per client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadEndpoints {
    /// Issues a presigned form for single-part uploads.
    pub presign_url: String,
    pub multipart_begin_url: String,
    pub multipart_complete_url: String,
    pub multipart_abort_url: String,
}

impl UploadEndpoints {
    pub fn under(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            presign_url: format!("{base}/media/presign"),
            multipart_begin_url: format!("{base}/media/multipart/begin"),
            multipart_complete_url: format!("{base}/media/multipart/complete"),
            multipart_abort_url: format!("{base}/media/multipart/abort"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    pub queue_url: String,
    pub upload: UploadEndpoints,
    /// Bytes per multipart chunk; files no larger than this go single-shot.
    pub part_size: u64,
    pub max_part_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Parts of one session in flight at once.
    pub max_concurrent_parts: usize,
    pub request_timeout_secs: u64,
    /// Tokens older than this are treated as missing.  `None` = no expiry.
    pub token_validity_secs: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }
}

impl SyncConfig {
    /// Default settings with every endpoint under `base`.
    pub fn with_base_url(base: &str) -> Self {
        let trimmed = base.trim_end_matches('/');
        Self {
            queue_url: format!("{trimmed}/messages/queue"),
            upload: UploadEndpoints::under(trimmed),
            part_size: DEFAULT_PART_SIZE,
            max_part_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 8000,
            max_concurrent_parts: 4,
            request_timeout_secs: 30,
            token_validity_secs: None,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, SyncError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| SyncError::Config(format!("parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Build from `PORT_*` environment variables.  `PORT_API_BASE_URL` sets
    /// every endpoint; the rest override single fields.
    pub fn from_env() -> Result<Self, SyncError> {
        let base = std::env::var("PORT_API_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let mut config = Self::with_base_url(&base);

        if let Ok(url) = std::env::var("PORT_QUEUE_URL") {
            config.queue_url = url;
        }
        if let Some(v) = env_number("PORT_PART_SIZE")? {
            config.part_size = v;
        }
        if let Some(v) = env_number("PORT_MAX_PART_ATTEMPTS")? {
            config.max_part_attempts = u32::try_from(v)
                .map_err(|_| SyncError::Config("PORT_MAX_PART_ATTEMPTS out of range".into()))?;
        }
        if let Some(v) = env_number("PORT_MAX_CONCURRENT_PARTS")? {
            config.max_concurrent_parts = usize::try_from(v)
                .map_err(|_| SyncError::Config("PORT_MAX_CONCURRENT_PARTS out of range".into()))?;
        }
        if let Some(v) = env_number("PORT_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout_secs = v;
        }
        if let Some(v) = env_number("PORT_TOKEN_VALIDITY_SECS")? {
            config.token_validity_secs = Some(v);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.part_size == 0 {
            return Err(SyncError::Config("partSize must be positive".into()));
        }
        if self.max_part_attempts == 0 {
            return Err(SyncError::Config("maxPartAttempts must be at least 1".into()));
        }
        if self.max_concurrent_parts == 0 {
            return Err(SyncError::Config("maxConcurrentParts must be at least 1".into()));
        }
        let urls = [
            ("queueUrl", &self.queue_url),
            ("presignUrl", &self.upload.presign_url),
            ("multipartBeginUrl", &self.upload.multipart_begin_url),
            ("multipartCompleteUrl", &self.upload.multipart_complete_url),
            ("multipartAbortUrl", &self.upload.multipart_abort_url),
        ];
        for (name, url) in urls {
            if url.trim().is_empty() {
                return Err(SyncError::Config(format!("{name} is empty")));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn token_validity(&self) -> Option<Duration> {
        self.token_validity_secs.map(Duration::from_secs)
    }

    /// Delay before retry number `attempt` (1-based): doubles from the
    /// initial backoff, capped at the maximum.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

fn env_number(name: &str) -> Result<Option<u64>, SyncError> {
    match std::env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| SyncError::Config(format!("{name}: {e}"))),
        Err(_) => Ok(None),
    }
}
