use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StorageError;
use crate::storage::{MemoryStorage, SecureStorage};

/// Vault key holding the session token used for outbound requests.
pub const AUTH_TOKEN_KEY: &str = "auth.token";

/// Handle to the secure vault.  Cheap to clone; every clone talks to the same
/// backing store.
#[derive(Clone)]
pub struct SecureVault {
    storage: Arc<dyn SecureStorage>,
}

impl SecureVault {
    pub fn new(storage: impl SecureStorage + 'static) -> Self {
        Self {
            storage: Arc::new(storage),
        }
    }

    pub fn from_arc(storage: Arc<dyn SecureStorage>) -> Self {
        Self { storage }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::new())
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.storage.set_item(key, value)?;
        debug!(key, "vault set");
        Ok(())
    }

    /// Read `key`.  Cleared keys and keys that were never set both read as
    /// `None`.
    pub fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.storage.get_item(key)
    }

    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.storage.remove_item(key)?;
        debug!(key, "vault remove");
        Ok(())
    }

    /// Remove every key in one step.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.storage.clear()?;
        debug!("vault cleared");
        Ok(())
    }

    // ── Auth token ──────────────────────────────────────────────────────────

    /// Save `token` stamped with the current time.
    pub fn save_token(&self, token: &str) -> Result<(), StorageError> {
        let stored = StoredToken {
            token: token.to_string(),
            saved_at: Some(Utc::now()),
        };
        let json = serde_json::to_string(&stored)?;
        self.set(AUTH_TOKEN_KEY, &json)
    }

    /// Load the auth token.  A value that is not a stamped token document is
    /// returned as-is with no save time.
    pub fn load_token(&self) -> Result<Option<StoredToken>, StorageError> {
        let Some(raw) = self.get(AUTH_TOKEN_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str::<StoredToken>(&raw) {
            Ok(stored) => Ok(Some(stored)),
            Err(_) => Ok(Some(StoredToken {
                token: raw,
                saved_at: None,
            })),
        }
    }

    pub fn clear_token(&self) -> Result<(), StorageError> {
        self.remove(AUTH_TOKEN_KEY)
    }
}

/// Auth token as kept in the vault.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredToken {
    pub token: String,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

impl StoredToken {
    /// Whether the token is younger than `max_age`.  Unstamped tokens never
    /// expire.
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        let Some(saved_at) = self.saved_at else {
            return true;
        };
        chrono::Duration::from_std(max_age)
            .map(|max_age| Utc::now() - saved_at <= max_age)
            .unwrap_or(true)
    }
}

impl fmt::Debug for StoredToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredToken")
            .field("token", &"<redacted>")
            .field("saved_at", &self.saved_at)
            .finish()
    }
}
