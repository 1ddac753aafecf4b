//! The native secure-storage surface and an in-memory implementation.

use std::collections::HashMap;

use parking_lot::RwLock;
use zeroize::Zeroizing;

use crate::error::StorageError;

/// Backing store behind [`crate::SecureVault`].
///
/// Implementations serialise their own calls; every method is safe to call
/// from several threads at once.  A write either lands completely or not at
/// all.
pub trait SecureStorage: Send + Sync {
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    /// Remove every key in one step.
    fn clear(&self) -> Result<(), StorageError>;
}

/// Process-local storage.  Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, Zeroizing<String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl SecureStorage for MemoryStorage {
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items
            .write()
            .insert(key.to_string(), Zeroizing::new(value.to_string()));
        Ok(())
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.read().get(key).map(|v| v.as_str().to_string()))
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items.write().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.items.write().clear();
        Ok(())
    }
}
