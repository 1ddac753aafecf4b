use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use port_trigger::{TriggerBus, TriggerEvent};
use port_vault::SecureVault;
use reqwest::header::AUTHORIZATION;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::envelope::{decode_queue_body, MessageEnvelope};
use crate::error::{NetworkError, SyncError};
use crate::upload::{UploadSession, Uploader};

const USER_AGENT: &str = concat!("port-sync/", env!("CARGO_PKG_VERSION"));

/// Entry point for everything that talks to the server.  Cheap to clone.
#[derive(Clone)]
pub struct SyncClient {
    http: reqwest::Client,
    config: Arc<SyncConfig>,
    vault: SecureVault,
    triggers: TriggerBus,
    uploader: Uploader,
}

impl SyncClient {
    pub fn new(config: SyncConfig, vault: SecureVault, triggers: TriggerBus) -> Result<Self, SyncError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout())
            .build()?;
        let config = Arc::new(config);
        let uploader = Uploader::new(http.clone(), config.clone());
        Ok(Self {
            http,
            config,
            vault,
            triggers,
            uploader,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }

    /// Token for outbound requests.  Absent and expired tokens are both
    /// `MissingToken`.
    fn auth_token(&self) -> Result<String, SyncError> {
        let stored = self.vault.load_token()?.ok_or(SyncError::MissingToken)?;
        if let Some(validity) = self.config.token_validity() {
            if !stored.is_fresh(validity) {
                debug!("stored auth token expired");
                return Err(SyncError::MissingToken);
            }
        }
        Ok(stored.token)
    }

    /// Fetch the pending message queue.
    pub async fn get_messages(&self) -> Result<Vec<MessageEnvelope>, SyncError> {
        let token = self.auth_token()?;
        let res = self
            .http
            .get(&self.config.queue_url)
            .header(AUTHORIZATION, token)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(NetworkError::Status {
                endpoint: "message queue",
                status: res.status(),
            }
            .into());
        }
        let body = res.bytes().await?;
        let messages = decode_queue_body(&body)?;

        info!(count = messages.len(), "fetched message queue");
        if !messages.is_empty() {
            self.triggers.publish(TriggerEvent::NewMessage);
        }
        Ok(messages)
    }

    // ── Uploads ──────────────────────────────────────────────────────────────

    pub async fn begin_upload(&self, total_parts: u32) -> Result<UploadSession, SyncError> {
        let token = self.auth_token()?;
        self.uploader.begin(&token, total_parts).await
    }

    pub async fn upload_part(&self, session: &UploadSession, part: u32, chunk: Bytes) -> Result<(), SyncError> {
        let token = self.auth_token()?;
        self.uploader.upload_part(&token, session, part, chunk).await
    }

    /// Returns the media id.
    pub async fn complete_upload(&self, session: &UploadSession) -> Result<String, SyncError> {
        let token = self.auth_token()?;
        self.uploader.complete(&token, session).await
    }

    /// The session is `Aborted` locally before anything else can fail,
    /// including a missing token for the server call.
    pub async fn abort_upload(&self, session: &UploadSession) -> Result<(), SyncError> {
        session.mark_aborted()?;
        let token = self.auth_token()?;
        self.uploader.send_abort(&token, session).await
    }

    /// Upload a whole file and return its media id.
    pub async fn upload_file(&self, path: &Path) -> Result<String, SyncError> {
        let token = self.auth_token()?;
        self.uploader.upload_file(&token, path).await
    }

    /// Abort the running upload of `path`.  `false` when none is running.
    pub async fn cancel_upload(&self, path: &Path) -> Result<bool, SyncError> {
        let Some(session) = self.uploader.active_session(path) else {
            return Ok(false);
        };
        self.abort_upload(&session).await?;
        Ok(true)
    }
}
