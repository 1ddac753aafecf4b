//! port_sync: server synchronisation for Port
//!
//! [`SyncClient`] reads the auth token from the vault, fetches the pending
//! message queue and drives media uploads.  A non-empty queue fetch
//! publishes [`port_trigger::TriggerEvent::NewMessage`].
//!
//! Uploads that fit one part use a presigned form POST; larger files go
//! through a multipart session (see [`upload::session`]).

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod upload;

pub use client::SyncClient;
pub use config::{SyncConfig, UploadEndpoints};
pub use envelope::MessageEnvelope;
pub use error::{NetworkError, SyncError, UploadError};
pub use upload::{UploadPlan, UploadSession, UploadState, Uploader};
