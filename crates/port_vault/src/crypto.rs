//! Key derivation and sealing for the vault file.
//!
//! Uses XChaCha20-Poly1305 (24-byte random nonce, 16-byte tag) and Argon2id
//! for password-derived keys.  Both come from audited RustCrypto crates.

use argon2::{Argon2, Params};
use chacha20poly1305::aead::{Aead, KeyInit, OsRng, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::StorageError;

pub const KDF_TIME_COST: u32 = 3;
pub const KDF_MEMORY_COST: u32 = 65536; // 64MB
pub const KDF_PARALLELISM: u32 = 4;
pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
pub const SALT_LEN: usize = 16;

pub fn derive_key(password: &str, salt: &[u8; SALT_LEN]) -> Result<Zeroizing<[u8; KEY_LEN]>, StorageError> {
    let params = Params::new(KDF_MEMORY_COST, KDF_TIME_COST, KDF_PARALLELISM, Some(KEY_LEN))
        .map_err(|e| StorageError::KeyDerivation(format!("argon2 params: {e}")))?;
    let argon = Argon2::from(params);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(|e| StorageError::KeyDerivation(format!("argon2 derive: {e}")))?;
    Ok(key)
}

/// Seal `plaintext`; `aad` is authenticated but not encrypted.
pub fn seal(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, StorageError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| StorageError::Encrypt)?;
    cipher
        .encrypt(XNonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| StorageError::Encrypt)
}

pub fn open(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, StorageError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| StorageError::Decrypt)?;
    cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map(Zeroizing::new)
        .map_err(|_| StorageError::Decrypt)
}

pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

pub fn generate_key() -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(&mut key[..]);
    key
}
