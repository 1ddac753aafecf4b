//! Master key held in the OS keyring (Keychain / Credential Manager /
//! Secret Service).  The vault file key never leaves this module in encoded
//! form except on its way into the keyring.

use base64::{engine::general_purpose, Engine as _};
use keyring::Entry;
use tracing::info;
use zeroize::Zeroizing;

use crate::crypto::{generate_key, KEY_LEN};
use crate::error::StorageError;

pub const DEFAULT_SERVICE: &str = "PortVault";
pub const DEFAULT_ACCOUNT: &str = "master_key";

fn entry(service: &str, account: &str) -> Result<Entry, StorageError> {
    Entry::new(service, account).map_err(|e| StorageError::Keyring(format!("keyring init: {e}")))
}

/// Load the master key, generating and storing a fresh one the first time.
pub fn load_or_create_master_key(
    service: &str,
    account: &str,
) -> Result<Zeroizing<[u8; KEY_LEN]>, StorageError> {
    let entry = entry(service, account)?;
    match entry.get_password() {
        Ok(encoded) => decode_key(&Zeroizing::new(encoded)),
        Err(keyring::Error::NoEntry) => {
            let key = generate_key();
            let encoded = Zeroizing::new(general_purpose::STANDARD.encode(&key[..]));
            entry
                .set_password(&encoded)
                .map_err(|e| StorageError::Keyring(format!("store master key: {e}")))?;
            info!(service, account, "generated new vault master key");
            Ok(key)
        }
        Err(e) => Err(StorageError::Keyring(format!("load master key: {e}"))),
    }
}

/// Forget the master key.  Any vault file sealed with it becomes unreadable.
pub fn delete_master_key(service: &str, account: &str) -> Result<(), StorageError> {
    match entry(service, account)?.delete_password() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(StorageError::Keyring(format!("delete master key: {e}"))),
    }
}

fn decode_key(encoded: &str) -> Result<Zeroizing<[u8; KEY_LEN]>, StorageError> {
    let decoded = Zeroizing::new(
        general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| StorageError::Keyring(format!("decode master key: {e}")))?,
    );
    if decoded.len() != KEY_LEN {
        return Err(StorageError::Keyring(format!(
            "master key has {} bytes, expected {KEY_LEN}",
            decoded.len()
        )));
    }
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&decoded);
    Ok(key)
}
