//! Upload session state machine.
//!
//! ```text
//! (begin) --> Initiated --part acked--> Uploading --all acked--> ReadyToComplete
//! ReadyToComplete --complete--> Completed
//! Initiated | Uploading | ReadyToComplete --abort--> Aborted
//! ```
//! `Completed` and `Aborted` are terminal.  A session never moves backwards.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use crate::error::UploadError;
use crate::upload::wire::CompletedPart;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UploadState {
    Initiated,
    Uploading,
    ReadyToComplete,
    Completed,
    Aborted,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadState::Initiated => "initiated",
            UploadState::Uploading => "uploading",
            UploadState::ReadyToComplete => "ready to complete",
            UploadState::Completed => "completed",
            UploadState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Completed | UploadState::Aborted)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Progress {
    state: UploadState,
    /// Part number -> ETag.
    acked: BTreeMap<u32, String>,
}

struct Identity {
    media_id: String,
    upload_id: String,
    part_urls: Vec<String>,
}

/// One multipart upload.  Clones share state, so a clone handed to a part
/// task sees an abort issued through any other clone.
#[derive(Clone)]
pub struct UploadSession {
    identity: Arc<Identity>,
    progress: Arc<Mutex<Progress>>,
    abort_signal: Arc<watch::Sender<bool>>,
}

impl fmt::Debug for UploadSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let progress = self.progress.lock();
        f.debug_struct("UploadSession")
            .field("session_id", &self.identity.upload_id)
            .field("media_id", &self.identity.media_id)
            .field("total_parts", &self.identity.part_urls.len())
            .field("acked", &progress.acked.len())
            .field("state", &progress.state)
            .finish()
    }
}

impl UploadSession {
    /// A freshly begun session.  Part `n` uploads to `part_urls[n - 1]`.
    pub fn new(media_id: String, upload_id: String, part_urls: Vec<String>) -> Self {
        Self {
            identity: Arc::new(Identity {
                media_id,
                upload_id,
                part_urls,
            }),
            progress: Arc::new(Mutex::new(Progress {
                state: UploadState::Initiated,
                acked: BTreeMap::new(),
            })),
            abort_signal: Arc::new(watch::Sender::new(false)),
        }
    }

    /// Server-side upload id.
    pub fn id(&self) -> &str {
        &self.identity.upload_id
    }

    pub fn media_id(&self) -> &str {
        &self.identity.media_id
    }

    pub fn total_parts(&self) -> u32 {
        self.identity.part_urls.len() as u32
    }

    pub fn state(&self) -> UploadState {
        self.progress.lock().state
    }

    pub fn part_url(&self, part: u32) -> Result<&str, UploadError> {
        let total = self.total_parts();
        if part == 0 || part > total {
            return Err(UploadError::UnknownPart { part, total });
        }
        Ok(&self.identity.part_urls[(part - 1) as usize])
    }

    /// Acknowledged part numbers, ascending.
    pub fn uploaded_parts(&self) -> Vec<u32> {
        self.progress.lock().acked.keys().copied().collect()
    }

    pub fn missing_parts(&self) -> Vec<u32> {
        let progress = self.progress.lock();
        (1..=self.total_parts())
            .filter(|p| !progress.acked.contains_key(p))
            .collect()
    }

    pub fn is_aborted(&self) -> bool {
        *self.abort_signal.borrow()
    }

    /// Resolves once the session has been aborted.
    pub async fn aborted(&self) {
        let mut rx = self.abort_signal.subscribe();
        let _ = rx.wait_for(|aborted| *aborted).await;
    }

    fn invalid(&self, state: UploadState, action: &'static str) -> UploadError {
        UploadError::InvalidTransition {
            session_id: self.identity.upload_id.clone(),
            state: state.as_str(),
            action,
        }
    }

    /// Fails if the session can no longer take parts.
    pub fn ensure_open(&self, action: &'static str) -> Result<(), UploadError> {
        let state = self.state();
        if state.is_terminal() {
            return Err(self.invalid(state, action));
        }
        Ok(())
    }

    /// Record the server's acknowledgement of `part`.  Re-acknowledging a
    /// part replaces its ETag.
    pub fn record_part(&self, part: u32, etag: String) -> Result<UploadState, UploadError> {
        self.part_url(part)?;
        let total = self.total_parts() as usize;
        let mut progress = self.progress.lock();
        if progress.state.is_terminal() {
            return Err(self.invalid(progress.state, "record part"));
        }
        progress.acked.insert(part, etag);
        progress.state = if progress.acked.len() == total {
            UploadState::ReadyToComplete
        } else {
            UploadState::Uploading
        };
        Ok(progress.state)
    }

    /// Parts list for the complete request.  Fails with `IncompleteParts`
    /// and leaves the state alone until every part is acknowledged.
    pub fn completion_parts(&self) -> Result<Vec<CompletedPart>, UploadError> {
        let progress = self.progress.lock();
        match progress.state {
            UploadState::ReadyToComplete => Ok(progress
                .acked
                .iter()
                .map(|(part, etag)| CompletedPart {
                    part_number: *part,
                    etag: etag.clone(),
                })
                .collect()),
            UploadState::Initiated | UploadState::Uploading => {
                let missing = (1..=self.total_parts())
                    .filter(|p| !progress.acked.contains_key(p))
                    .collect();
                Err(UploadError::IncompleteParts { missing })
            }
            state @ (UploadState::Completed | UploadState::Aborted) => {
                Err(self.invalid(state, "complete"))
            }
        }
    }

    pub fn mark_completed(&self) -> Result<(), UploadError> {
        let mut progress = self.progress.lock();
        if progress.state != UploadState::ReadyToComplete {
            return Err(self.invalid(progress.state, "complete"));
        }
        progress.state = UploadState::Completed;
        Ok(())
    }

    /// Move to `Aborted` and wake every part task waiting on this session.
    pub fn mark_aborted(&self) -> Result<(), UploadError> {
        {
            let mut progress = self.progress.lock();
            if progress.state.is_terminal() {
                return Err(self.invalid(progress.state, "abort"));
            }
            progress.state = UploadState::Aborted;
        }
        self.abort_signal.send_replace(true);
        Ok(())
    }
}
