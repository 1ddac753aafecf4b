use thiserror::Error;

/// Transport or protocol failure talking to the server.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{endpoint} request failed with status {status}")]
    Status {
        endpoint: &'static str,
        status: reqwest::StatusCode,
    },

    /// Successful response that carries no `data` field.
    #[error("Response carried no data")]
    NoResponseData,

    #[error("Malformed response: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Part {part} failed after {attempts} attempts: {last_error}")]
    PartFailed {
        part: u32,
        attempts: u32,
        last_error: String,
    },

    #[error("Cannot complete upload, parts not yet acknowledged: {missing:?}")]
    IncompleteParts { missing: Vec<u32> },

    #[error("Aborting upload session {session_id} failed: {reason}")]
    SessionAbortFailed { session_id: String, reason: String },

    #[error("Upload session {session_id} is {state}; cannot {action}")]
    InvalidTransition {
        session_id: String,
        state: &'static str,
        action: &'static str,
    },

    #[error("Part {part} is outside 1..={total}")]
    UnknownPart { part: u32, total: u32 },

    #[error("Server issued {got} part URLs, expected {expected}")]
    PartCountMismatch { expected: u32, got: u32 },

    #[error("Reading upload source failed: {0}")]
    Source(#[from] std::io::Error),

    #[error("Upload source is empty")]
    EmptySource,

    #[error("Upload session {session_id} was cancelled")]
    Cancelled { session_id: String },
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("Vault error: {0}")]
    Storage(#[from] port_vault::StorageError),

    /// No usable auth token in the vault (absent or expired).
    #[error("No valid auth token; sign in again")]
    MissingToken,

    #[error("Invalid sync configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Network(NetworkError::Transport(e))
    }
}
