use thiserror::Error;

/// Failure of the secure backing store.  Never retried inside the vault.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Vault file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Vault file is corrupted: {0}")]
    Corrupted(String),

    #[error("Vault encryption failed")]
    Encrypt,

    #[error("Vault decryption failed (wrong key or tampered file)")]
    Decrypt,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("OS keyring error: {0}")]
    Keyring(String),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}
