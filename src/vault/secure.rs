//! Secure Storage: password-derived key wrapping and encrypted entries.
//!
//! The vault key is derived from the user's password with Argon2id and
//! a persisted installation salt. Entries are encrypted one by one
//! with AES-256-GCM (random 96-bit nonce prepended to the ciphertext)
//! and written through the store's atomic batch write, so a multi-entry
//! persist is all-or-nothing from the caller's perspective.
//!
//! Argon2id parameters balance security and unlock latency:
//! - Memory: 64 MB (strong resistance to GPU attacks)
//! - Time: 3 iterations
//! - Parallelism: 4 lanes

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::{VaultError, VaultResult};
use crate::storage::{keys, KeyValueStore};

const ARGON2_MEMORY_COST: u32 = 65536; // 64 MB in KiB
const ARGON2_TIME_COST: u32 = 3;
const ARGON2_PARALLELISM: u32 = 4;
const ARGON2_OUTPUT_LEN: usize = 32; // 256-bit key for AES-256

/// Nonce size for AES-GCM (96 bits = 12 bytes)
const NONCE_SIZE: usize = 12;

/// Installation salt size (128 bits)
pub const SALT_SIZE: usize = 16;

/// Size of the random verification blob stored at `vault.check`.
pub const CHECK_SIZE: usize = 32;

/// A 256-bit vault key with automatic zeroization on drop.
///
/// Exists only in memory of an unlocked session; locking drops every
/// copy and the derive step is the only way to get it back.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey {
    key: [u8; ARGON2_OUTPUT_LEN],
}

impl VaultKey {
    pub fn from_bytes(key: [u8; ARGON2_OUTPUT_LEN]) -> Self {
        Self { key }
    }

    pub fn as_bytes(&self) -> &[u8; ARGON2_OUTPUT_LEN] {
        &self.key
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never log the actual key material
        f.debug_struct("VaultKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Derive the vault key from a password and the installation salt.
///
/// Deterministic: the same password and salt always yield the same
/// key. A wrong password yields a key that fails AEAD authentication
/// on the check entry, which is the only password verification there is.
pub fn derive_key(password: &str, salt: &[u8; SALT_SIZE]) -> VaultResult<VaultKey> {
    let params = Params::new(
        ARGON2_MEMORY_COST,
        ARGON2_TIME_COST,
        ARGON2_PARALLELISM,
        Some(ARGON2_OUTPUT_LEN),
    )
    .map_err(|e| VaultError::KeyDerivation(format!("invalid Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key_bytes = [0u8; ARGON2_OUTPUT_LEN];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key_bytes)
        .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;

    let key = VaultKey::from_bytes(key_bytes);
    key_bytes.zeroize();
    Ok(key)
}

/// Load the persisted installation salt, creating one on first use.
pub async fn get_or_create_salt(store: &dyn KeyValueStore) -> VaultResult<[u8; SALT_SIZE]> {
    if let Some(bytes) = store.get(keys::VAULT_SALT).await? {
        let salt: [u8; SALT_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::InvalidKeyMaterial("bad salt length".into()))?;
        return Ok(salt);
    }

    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    store.set(keys::VAULT_SALT, salt.to_vec()).await?;
    debug!("generated new installation salt");
    Ok(salt)
}

/// Generate a fresh salt, replacing any existing one. Used when the
/// vault is wiped or the password changes.
pub async fn rotate_salt(store: &dyn KeyValueStore) -> VaultResult<[u8; SALT_SIZE]> {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    store.set(keys::VAULT_SALT, salt.to_vec()).await?;
    Ok(salt)
}

/// Encrypt a single value. Format: `[12-byte nonce][ciphertext+tag]`.
pub fn encrypt_value(key: &VaultKey, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::Encryption(format!("invalid key: {e}")))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| VaultError::Encryption(e.to_string()))?;

    let mut output = nonce_bytes.to_vec();
    output.extend(ciphertext);
    Ok(output)
}

/// Decrypt a single value produced by [`encrypt_value`].
pub fn decrypt_value(key: &VaultKey, data: &[u8]) -> VaultResult<Vec<u8>> {
    if data.len() < NONCE_SIZE {
        return Err(VaultError::DecryptionFailed);
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::Encryption(format!("invalid key: {e}")))?;

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    // Authentication failure = wrong key or corrupted entry.
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| VaultError::DecryptionFailed)
}

/// Encrypt a batch of entries and persist them atomically.
pub async fn encrypt_and_save_many(
    store: &dyn KeyValueStore,
    entries: Vec<(String, Vec<u8>)>,
    key: &VaultKey,
) -> VaultResult<()> {
    // Encrypt everything up front; nothing is written if any entry fails.
    let mut batch = Vec::with_capacity(entries.len());
    for (entry_key, plaintext) in entries {
        let ciphertext = encrypt_value(key, &plaintext)?;
        batch.push((entry_key, ciphertext));
    }

    debug!("persisting {} encrypted entries", batch.len());
    store.set_many(batch).await?;
    Ok(())
}

/// Fetch one entry and decrypt it.
///
/// Fails with [`VaultError::NotFound`] when the entry is absent and
/// [`VaultError::DecryptionFailed`] when the key does not match.
pub async fn fetch_and_decrypt(
    store: &dyn KeyValueStore,
    entry_key: &str,
    key: &VaultKey,
) -> VaultResult<Vec<u8>> {
    let data = store
        .get(entry_key)
        .await?
        .ok_or_else(|| VaultError::NotFound(entry_key.to_string()))?;
    decrypt_value(key, &data)
}

/// Tombstone a batch of entries.
pub async fn remove_many(store: &dyn KeyValueStore, entry_keys: &[String]) -> VaultResult<()> {
    store.remove_many(entry_keys).await?;
    Ok(())
}

/// Build the plaintext for a fresh verification blob:
/// `blob || SHA-256(blob)`, so validation checks both AEAD
/// authentication and blob integrity.
pub fn check_entry_plaintext() -> Vec<u8> {
    let mut check = [0u8; CHECK_SIZE];
    OsRng.fill_bytes(&mut check);

    let mut plaintext = check.to_vec();
    plaintext.extend_from_slice(&Sha256::digest(check));
    plaintext
}

/// Write a fresh random verification blob under `vault.check`.
pub async fn write_check_entry(store: &dyn KeyValueStore, key: &VaultKey) -> VaultResult<()> {
    let ciphertext = encrypt_value(key, &check_entry_plaintext())?;
    store.set(keys::VAULT_CHECK, ciphertext).await?;
    Ok(())
}

/// Validate a derived key against the check entry.
///
/// Any failure to fetch or authenticate maps to `InvalidPassword`; a
/// caller can not distinguish "wrong password" from "corrupt entry",
/// which is intentional. The digest compare is constant-time.
pub async fn validate_key(store: &dyn KeyValueStore, key: &VaultKey) -> VaultResult<()> {
    let plaintext = match fetch_and_decrypt(store, keys::VAULT_CHECK, key).await {
        Ok(p) => p,
        Err(_) => return Err(VaultError::InvalidPassword),
    };
    if plaintext.len() != CHECK_SIZE + 32 {
        return Err(VaultError::InvalidPassword);
    }

    let (blob, digest) = plaintext.split_at(CHECK_SIZE);
    let expected = Sha256::digest(blob);
    if expected.as_slice().ct_eq(digest).into() {
        Ok(())
    } else {
        Err(VaultError::InvalidPassword)
    }
}
