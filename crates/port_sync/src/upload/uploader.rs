use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, ETAG};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tokio::io::AsyncReadExt;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::error::{NetworkError, SyncError, UploadError};
use crate::upload::session::UploadSession;
use crate::upload::wire::{
    AbortRequest, BeginRequest, BeginResponse, CompleteRequest, PresignResponse,
};

/// Drives upload sessions against the configured endpoints.  Cheap to clone.
#[derive(Clone)]
pub struct Uploader {
    http: Client,
    config: Arc<SyncConfig>,
    active: Arc<Mutex<HashMap<PathBuf, UploadSession>>>,
}

/// Transfer mode picked for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPlan {
    SingleShot,
    Multipart { parts: u32 },
}

impl Uploader {
    pub fn new(http: Client, config: Arc<SyncConfig>) -> Self {
        Self {
            http,
            config,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Single-shot when the file fits one part, multipart otherwise.
    pub fn plan(&self, size: u64) -> Result<UploadPlan, UploadError> {
        if size == 0 {
            return Err(UploadError::EmptySource);
        }
        let parts = size.div_ceil(self.config.part_size);
        if parts == 1 {
            return Ok(UploadPlan::SingleShot);
        }
        let parts = u32::try_from(parts).map_err(|_| {
            UploadError::Source(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "file needs more parts than a session can hold",
            ))
        })?;
        Ok(UploadPlan::Multipart { parts })
    }

    // ── Session protocol ────────────────────────────────────────────────────

    /// Open a session with `total_parts` presigned part slots.
    pub async fn begin(&self, token: &str, total_parts: u32) -> Result<UploadSession, SyncError> {
        if total_parts == 0 {
            return Err(UploadError::EmptySource.into());
        }
        let res = self
            .http
            .post(&self.config.upload.multipart_begin_url)
            .header(AUTHORIZATION, token)
            .json(&BeginRequest { parts: total_parts })
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(NetworkError::Status {
                endpoint: "multipart begin",
                status: res.status(),
            }
            .into());
        }
        let body: BeginResponse = res
            .json()
            .await
            .map_err(|e| NetworkError::Decode(format!("multipart begin: {e}")))?;

        let got = body.urls.len() as u32;
        let session = UploadSession::new(body.media_id, body.upload_id, body.urls);
        if got != total_parts {
            // The server holds a session we cannot drive; release it.
            if let Err(e) = self.abort(token, &session).await {
                warn!(session_id = session.id(), error = %e, "releasing mismatched session failed");
            }
            return Err(UploadError::PartCountMismatch {
                expected: total_parts,
                got,
            }
            .into());
        }

        info!(
            session_id = session.id(),
            media_id = session.media_id(),
            parts = total_parts,
            "upload session started"
        );
        Ok(session)
    }

    /// Upload one part, retrying with backoff.  When every attempt fails the
    /// whole session is aborted and `PartFailed` is returned.  A part that
    /// finishes after the session was aborted is discarded.
    pub async fn upload_part(
        &self,
        token: &str,
        session: &UploadSession,
        part: u32,
        chunk: Bytes,
    ) -> Result<(), SyncError> {
        let url = session.part_url(part)?.to_string();
        session.ensure_open("upload part")?;

        let max_attempts = self.config.max_part_attempts;
        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            if session.is_aborted() {
                return Err(cancelled(session));
            }

            let outcome = tokio::select! {
                res = self.put_part(&url, chunk.clone()) => res,
                _ = session.aborted() => return Err(cancelled(session)),
            };

            match outcome {
                Ok(etag) => {
                    session.record_part(part, etag)?;
                    debug!(session_id = session.id(), part, attempt, "part uploaded");
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        let delay = self.config.backoff(attempt);
                        warn!(
                            session_id = session.id(),
                            part,
                            attempt,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %e,
                            "part upload failed, retrying"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = session.aborted() => return Err(cancelled(session)),
                        }
                    }
                }
            }
        }

        error!(
            session_id = session.id(),
            part,
            attempts = max_attempts,
            "part failed on every attempt, aborting session"
        );
        match self.abort(token, session).await {
            // Already terminal: someone else aborted first.
            Ok(()) | Err(SyncError::Upload(UploadError::InvalidTransition { .. })) => {}
            Err(e) => {
                warn!(session_id = session.id(), part, error = %e, "abort after part failure did not reach server");
            }
        }
        Err(UploadError::PartFailed {
            part,
            attempts: max_attempts,
            last_error,
        }
        .into())
    }

    /// Finish the session.  Returns the media id.
    pub async fn complete(&self, token: &str, session: &UploadSession) -> Result<String, SyncError> {
        let parts = session.completion_parts()?;
        let res = self
            .http
            .post(&self.config.upload.multipart_complete_url)
            .header(AUTHORIZATION, token)
            .json(&CompleteRequest {
                upload_id: session.id(),
                media_id: session.media_id(),
                parts,
            })
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(NetworkError::Status {
                endpoint: "multipart complete",
                status: res.status(),
            }
            .into());
        }
        session.mark_completed()?;
        info!(session_id = session.id(), media_id = session.media_id(), "upload completed");
        Ok(session.media_id().to_string())
    }

    /// Abort the session and release its server resources.  The session is
    /// `Aborted` locally even when the server call fails.
    pub async fn abort(&self, token: &str, session: &UploadSession) -> Result<(), SyncError> {
        session.mark_aborted()?;
        self.send_abort(token, session).await
    }

    /// Release the server side of a session already marked `Aborted`.
    pub(crate) async fn send_abort(&self, token: &str, session: &UploadSession) -> Result<(), SyncError> {
        let result = self
            .http
            .post(&self.config.upload.multipart_abort_url)
            .header(AUTHORIZATION, token)
            .json(&AbortRequest {
                media_id: session.media_id(),
                upload_id: session.id(),
            })
            .send()
            .await;

        let reason = match result {
            Ok(res) if res.status().is_success() => {
                info!(session_id = session.id(), "upload session aborted");
                return Ok(());
            }
            Ok(res) => format!("status {}", res.status()),
            Err(e) => e.to_string(),
        };
        error!(session_id = session.id(), reason = %reason, "abort request failed");
        Err(UploadError::SessionAbortFailed {
            session_id: session.id().to_string(),
            reason,
        }
        .into())
    }

    /// Session currently uploading `path`.
    pub fn active_session(&self, path: &Path) -> Option<UploadSession> {
        self.active.lock().get(path).cloned()
    }

    // ── Whole-file upload ───────────────────────────────────────────────────

    /// Upload the file at `path` and return its media id.
    pub async fn upload_file(&self, token: &str, path: &Path) -> Result<String, SyncError> {
        let size = tokio::fs::metadata(path)
            .await
            .map_err(UploadError::Source)?
            .len();

        match self.plan(size)? {
            UploadPlan::SingleShot => self.upload_single_shot(token, path).await,
            UploadPlan::Multipart { parts } => {
                let session = self.begin(token, parts).await?;
                let _active = ActiveUpload::register(self, token, path, &session);
                self.drive(token, &session, path).await
            }
        }
    }

    async fn drive(&self, token: &str, session: &UploadSession, path: &Path) -> Result<String, SyncError> {
        match self.send_all_parts(token, session, path).await {
            Ok(()) => self.complete(token, session).await,
            Err(e) => {
                if !session.state().is_terminal() {
                    if let Err(abort_err) = self.abort(token, session).await {
                        warn!(session_id = session.id(), error = %abort_err, "abort after failure did not reach server");
                    }
                }
                Err(e)
            }
        }
    }

    /// Read parts in order and keep up to `max_concurrent_parts` in flight.
    async fn send_all_parts(&self, token: &str, session: &UploadSession, path: &Path) -> Result<(), SyncError> {
        let mut file = tokio::fs::File::open(path).await.map_err(UploadError::Source)?;
        let mut in_flight: JoinSet<Result<(), SyncError>> = JoinSet::new();
        let part_size = self.config.part_size;
        let limit = self.config.max_concurrent_parts;

        for part in 1..=session.total_parts() {
            if session.is_aborted() {
                while !in_flight.is_empty() {
                    join_one(&mut in_flight, session).await?;
                }
                return Err(cancelled(session));
            }
            while in_flight.len() >= limit {
                join_one(&mut in_flight, session).await?;
            }

            let mut chunk = Vec::with_capacity(part_size as usize);
            (&mut file)
                .take(part_size)
                .read_to_end(&mut chunk)
                .await
                .map_err(UploadError::Source)?;
            if chunk.is_empty() {
                in_flight.abort_all();
                return Err(UploadError::Source(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "file shrank during upload",
                ))
                .into());
            }

            let uploader = self.clone();
            let session = session.clone();
            let token = token.to_string();
            let chunk = Bytes::from(chunk);
            in_flight.spawn(async move { uploader.upload_part(&token, &session, part, chunk).await });
        }

        while !in_flight.is_empty() {
            join_one(&mut in_flight, session).await?;
        }
        Ok(())
    }

    // ── Transport ───────────────────────────────────────────────────────────

    /// PUT one chunk to its presigned URL; the ETag header is the receipt.
    async fn put_part(&self, url: &str, chunk: Bytes) -> Result<String, NetworkError> {
        let res = self
            .http
            .put(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(chunk)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(NetworkError::Status {
                endpoint: "part upload",
                status: res.status(),
            });
        }
        let etag = res
            .headers()
            .get(ETAG)
            .ok_or_else(|| NetworkError::Decode("part upload returned no ETag".into()))?
            .to_str()
            .map_err(|e| NetworkError::Decode(format!("part ETag: {e}")))?;
        Ok(etag.to_string())
    }

    async fn upload_single_shot(&self, token: &str, path: &Path) -> Result<String, SyncError> {
        let data = tokio::fs::read(path).await.map_err(UploadError::Source)?;
        if data.is_empty() {
            return Err(UploadError::EmptySource.into());
        }

        let res = self
            .http
            .post(&self.config.upload.presign_url)
            .header(AUTHORIZATION, token)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(NetworkError::Status {
                endpoint: "presign",
                status: res.status(),
            }
            .into());
        }
        let presigned: PresignResponse = res
            .json()
            .await
            .map_err(|e| NetworkError::Decode(format!("presign: {e}")))?;
        let target = presigned.body.url;
        let media_id = presigned.body.media_id;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let mut form = Form::new();
        for (key, value) in target.fields {
            form = form.text(key, value);
        }
        // The file part must come last.
        let file_part = Part::bytes(data)
            .file_name(file_name)
            .mime_str("application/octet-stream")?;
        form = form.part("file", file_part);

        let res = self.http.post(&target.url).multipart(form).send().await?;
        if !res.status().is_success() {
            return Err(NetworkError::Status {
                endpoint: "presigned upload",
                status: res.status(),
            }
            .into());
        }
        info!(media_id = %media_id, "single-shot upload completed");
        Ok(media_id)
    }
}

/// Entry in the active-upload map for the lifetime of one `upload_file`
/// call.  Dropping it before the session is terminal (the caller gave up on
/// the future) aborts the session and releases it on the server.
struct ActiveUpload {
    uploader: Uploader,
    token: String,
    path: PathBuf,
    session: UploadSession,
}

impl ActiveUpload {
    fn register(uploader: &Uploader, token: &str, path: &Path, session: &UploadSession) -> Self {
        uploader
            .active
            .lock()
            .insert(path.to_path_buf(), session.clone());
        Self {
            uploader: uploader.clone(),
            token: token.to_string(),
            path: path.to_path_buf(),
            session: session.clone(),
        }
    }
}

impl Drop for ActiveUpload {
    fn drop(&mut self) {
        {
            let mut active = self.uploader.active.lock();
            if active
                .get(&self.path)
                .is_some_and(|s| s.id() == self.session.id())
            {
                active.remove(&self.path);
            }
        }

        if self.session.mark_aborted().is_err() {
            return;
        }
        warn!(session_id = self.session.id(), "upload dropped before finishing, aborting session");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let uploader = self.uploader.clone();
                let token = std::mem::take(&mut self.token);
                let session = self.session.clone();
                handle.spawn(async move {
                    // Failures are already logged by send_abort.
                    let _ = uploader.send_abort(&token, &session).await;
                });
            }
            Err(_) => {
                error!(session_id = self.session.id(), "no runtime left to release dropped upload session");
            }
        }
    }
}

fn cancelled(session: &UploadSession) -> SyncError {
    UploadError::Cancelled {
        session_id: session.id().to_string(),
    }
    .into()
}

/// Wait for one part task.  On failure the remaining tasks are stopped.
/// A cancelled part usually means another part aborted the session, so the
/// rest are drained to surface that root cause instead.
async fn join_one(
    in_flight: &mut JoinSet<Result<(), SyncError>>,
    session: &UploadSession,
) -> Result<(), SyncError> {
    let Some(joined) = in_flight.join_next().await else {
        return Ok(());
    };
    match flatten_join(joined, session) {
        Ok(()) => Ok(()),
        Err(e) if is_cancelled(&e) => {
            while let Some(joined) = in_flight.join_next().await {
                if let Err(other) = flatten_join(joined, session) {
                    if !is_cancelled(&other) {
                        return Err(other);
                    }
                }
            }
            Err(cancelled(session))
        }
        Err(e) => {
            in_flight.abort_all();
            Err(e)
        }
    }
}

fn flatten_join(
    joined: Result<Result<(), SyncError>, tokio::task::JoinError>,
    session: &UploadSession,
) -> Result<(), SyncError> {
    match joined {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => std::panic::resume_unwind(join_err.into_panic()),
        Err(_) => Err(cancelled(session)),
    }
}

/// A part task that lost a race with an abort reports either `Cancelled` or
/// the `InvalidTransition` of touching a session that just went terminal.
fn is_cancelled(e: &SyncError) -> bool {
    matches!(
        e,
        SyncError::Upload(UploadError::Cancelled { .. } | UploadError::InvalidTransition { .. })
    )
}
