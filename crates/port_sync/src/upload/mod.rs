//! Large-media upload: session state machine, wire types and the driver.

pub mod session;
pub mod uploader;
pub mod wire;

pub use session::{UploadSession, UploadState};
pub use uploader::{UploadPlan, Uploader};
