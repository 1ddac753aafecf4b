//! Encrypted single-file vault backend.
//!
//! File layout:
//!   [ header (64 bytes) | XChaCha20-Poly1305 ciphertext of the JSON map ]
//!
//! Header: magic (8) | format version u32 LE | key source u32 LE |
//! salt (16) | nonce (24) | reserved (8).  The whole header is bound to the
//! ciphertext as associated data.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::debug;
use zeroize::Zeroizing;

use crate::crypto::{self, KEY_LEN, NONCE_LEN, SALT_LEN};
use crate::error::StorageError;
use crate::storage::SecureStorage;

pub const VAULT_MAGIC: &[u8; 8] = b"PORTVLT\0";
pub const VAULT_FORMAT_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeySource {
    Raw = 0,
    Password = 1,
}

#[derive(Debug, Clone)]
struct VaultHeader {
    key_source: KeySource,
    salt: [u8; SALT_LEN],
    nonce: [u8; NONCE_LEN],
}

impl VaultHeader {
    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..8].copy_from_slice(VAULT_MAGIC);
        buf[8..12].copy_from_slice(&VAULT_FORMAT_VERSION.to_le_bytes());
        buf[12..16].copy_from_slice(&(self.key_source as u32).to_le_bytes());
        buf[16..32].copy_from_slice(&self.salt);
        buf[32..56].copy_from_slice(&self.nonce);
        // remaining bytes stay zero
        buf
    }

    fn from_bytes(buf: &[u8]) -> Result<Self, StorageError> {
        if buf.len() != HEADER_SIZE {
            return Err(StorageError::Corrupted("invalid header size".into()));
        }
        if &buf[..8] != VAULT_MAGIC {
            return Err(StorageError::Corrupted("invalid magic".into()));
        }
        let version = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if version != VAULT_FORMAT_VERSION {
            return Err(StorageError::Corrupted(format!(
                "unsupported vault format version {version}"
            )));
        }
        let key_source = match u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]) {
            0 => KeySource::Raw,
            1 => KeySource::Password,
            other => {
                return Err(StorageError::Corrupted(format!("unknown key source {other}")))
            }
        };
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&buf[16..32]);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&buf[32..56]);
        Ok(Self { key_source, salt, nonce })
    }
}

type Items = BTreeMap<String, Zeroizing<String>>;

/// Vault backend that keeps every secret in one encrypted file.
///
/// The decrypted map lives in memory behind a mutex; each write re-seals the
/// full map under a fresh nonce into a temp file and renames it over the
/// old one, so a crash leaves either the old or the new file on disk.
pub struct EncryptedFileStorage {
    path: PathBuf,
    key: Zeroizing<[u8; KEY_LEN]>,
    key_source: KeySource,
    salt: [u8; SALT_LEN],
    items: Mutex<Items>,
}

impl EncryptedFileStorage {
    /// Open (or create) a vault file sealed with a raw 32-byte key.
    pub fn open(path: impl AsRef<Path>, key: Zeroizing<[u8; KEY_LEN]>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Self::create(path, key, KeySource::Raw, [0u8; SALT_LEN]);
        }
        let (header, sealed) = read_file(&path)?;
        if header.key_source != KeySource::Raw {
            return Err(StorageError::Corrupted(
                "vault is password-protected; open it with a password".into(),
            ));
        }
        let items = unseal(&key, &header, &sealed)?;
        Ok(Self {
            path,
            key,
            key_source: KeySource::Raw,
            salt: header.salt,
            items: Mutex::new(items),
        })
    }

    /// Open (or create) a vault file whose key is derived from `password`.
    pub fn open_with_password(path: impl AsRef<Path>, password: &str) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            let salt = crypto::generate_salt();
            let key = crypto::derive_key(password, &salt)?;
            return Self::create(path, key, KeySource::Password, salt);
        }
        let (header, sealed) = read_file(&path)?;
        if header.key_source != KeySource::Password {
            return Err(StorageError::Corrupted(
                "vault is sealed with a raw key, not a password".into(),
            ));
        }
        let key = crypto::derive_key(password, &header.salt)?;
        let items = unseal(&key, &header, &sealed)?;
        Ok(Self {
            path,
            key,
            key_source: KeySource::Password,
            salt: header.salt,
            items: Mutex::new(items),
        })
    }

    /// Open (or create) a vault file sealed with the master key stored in the
    /// OS keyring under `service` / `account`.
    pub fn open_with_keyring(
        path: impl AsRef<Path>,
        service: &str,
        account: &str,
    ) -> Result<Self, StorageError> {
        let key = crate::keyring::load_or_create_master_key(service, account)?;
        Self::open(path, key)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn create(
        path: PathBuf,
        key: Zeroizing<[u8; KEY_LEN]>,
        key_source: KeySource,
        salt: [u8; SALT_LEN],
    ) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let storage = Self {
            path,
            key,
            key_source,
            salt,
            items: Mutex::new(Items::new()),
        };
        storage.persist(&Items::new())?;
        debug!(path = %storage.path.display(), "created vault file");
        Ok(storage)
    }

    fn persist(&self, items: &Items) -> Result<(), StorageError> {
        let header = VaultHeader {
            key_source: self.key_source,
            salt: self.salt,
            // Fresh nonce for every save
            nonce: crypto::generate_nonce(),
        };
        let header_bytes = header.to_bytes();

        let view: BTreeMap<&str, &str> = items
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let plaintext = Zeroizing::new(serde_json::to_vec(&view)?);
        let ciphertext = crypto::seal(&self.key, &header.nonce, &plaintext, &header_bytes)?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&header_bytes)?;
        tmp.write_all(&ciphertext)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }

    /// Apply `change` to a copy of the map, persist it, then publish it.
    /// A failed write leaves the in-memory map untouched.
    fn write_with(&self, change: impl FnOnce(&mut Items)) -> Result<(), StorageError> {
        let mut guard = self.items.lock();
        let mut next = guard.clone();
        change(&mut next);
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }
}

impl SecureStorage for EncryptedFileStorage {
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.write_with(|items| {
            items.insert(key.to_string(), Zeroizing::new(value.to_string()));
        })
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.lock().get(key).map(|v| v.as_str().to_string()))
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        if !self.items.lock().contains_key(key) {
            return Ok(());
        }
        self.write_with(|items| {
            items.remove(key);
        })
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.write_with(|items| items.clear())
    }
}

fn read_file(path: &Path) -> Result<(VaultHeader, Vec<u8>), StorageError> {
    let mut data = fs::read(path)?;
    if data.len() < HEADER_SIZE {
        return Err(StorageError::Corrupted("file shorter than header".into()));
    }
    let sealed = data.split_off(HEADER_SIZE);
    let header = VaultHeader::from_bytes(&data)?;
    Ok((header, sealed))
}

fn unseal(key: &[u8; KEY_LEN], header: &VaultHeader, sealed: &[u8]) -> Result<Items, StorageError> {
    let plaintext = crypto::open(key, &header.nonce, sealed, &header.to_bytes())?;
    let map: BTreeMap<String, String> = serde_json::from_slice(&plaintext)
        .map_err(|e| StorageError::Corrupted(format!("parse vault: {e}")))?;
    Ok(map
        .into_iter()
        .map(|(k, v)| (k, Zeroizing::new(v)))
        .collect())
}
