//! port_vault: Encrypted on-device secret storage for Port
//!
//! # Storage model
//! Secrets are plain `key -> string` pairs.  They never touch the relational
//! store and are never written to logs; only key names are traced.
//!
//! Backends implement [`SecureStorage`] (`set_item` / `get_item` / `clear`):
//! - [`EncryptedFileStorage`] seals the whole map with XChaCha20-Poly1305 and
//!   replaces the file atomically on every write.
//! - [`MemoryStorage`] keeps the map in process memory (tests, ephemeral use).
//!
//! The file key comes from a raw 32-byte key, a password (Argon2id), or a
//! master key held in the OS keyring (see [`keyring`]).

pub mod crypto;
pub mod error;
pub mod file;
pub mod keyring;
pub mod storage;
pub mod vault;

pub use error::StorageError;
pub use file::EncryptedFileStorage;
pub use storage::{MemoryStorage, SecureStorage};
pub use vault::{SecureVault, StoredToken, AUTH_TOKEN_KEY};
