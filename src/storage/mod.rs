//! Host key/value storage abstraction.
//!
//! The vault and the dApp session registry never touch the host
//! environment directly. Everything goes through [`KeyValueStore`],
//! so the whole core is unit-testable against [`MemoryStore`] and a
//! real deployment can plug in whatever the host offers. [`FileStore`]
//! is the reference file-backed implementation.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Well-known entry keys. Encrypted entries live under the `vault.`
/// prefix; everything else is plaintext by design.
pub mod keys {
    /// Plaintext 16-byte KDF salt.
    pub const VAULT_SALT: &str = "vault.salt";
    /// Encrypted random verification blob; decrypting it proves the
    /// password-derived key is right.
    pub const VAULT_CHECK: &str = "vault.check";
    /// Encrypted account list.
    pub const VAULT_ACCOUNTS: &str = "vault.accounts";
    /// Encrypted wallet settings.
    pub const VAULT_SETTINGS: &str = "vault.settings";
    /// Plaintext origin -> permission grant map.
    pub const DAPP_SESSIONS: &str = "dapp.sessions";
    /// Plaintext custom-network cache for pre-unlock code paths.
    pub const CUSTOM_NETWORKS_SNAPSHOT: &str = "custom_networks_snapshot";
    /// Plaintext node-selection policy cache for pre-unlock code paths.
    pub const NODE_POLICY_SNAPSHOT: &str = "relay_policy_snapshot";

    /// Prefix shared by every encrypted vault entry. Wiping the vault
    /// removes exactly this namespace.
    pub const VAULT_PREFIX: &str = "vault.";

    /// Encrypted per-account signing secret (mnemonic or raw seed).
    pub fn account_signing_secret(account_id: &str) -> String {
        format!("vault.accprivkey.{account_id}")
    }

    /// Encrypted per-account agreement (ECDH) secret.
    pub fn account_agreement_secret(account_id: &str) -> String {
        format!("vault.accprivp2pkey.{account_id}")
    }

    /// Encrypted per-account public key entry.
    pub fn account_public_key(account_id: &str) -> String {
        format!("vault.accpubkey.{account_id}")
    }
}

/// Errors from the storage layer itself (not from decryption).
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Other(String),
}

impl From<StorageError> for crate::error::WalletError {
    fn from(err: StorageError) -> Self {
        // Host storage details never cross the boundary.
        tracing::warn!("storage failure: {err}");
        crate::error::WalletError::generic()
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Abstract key/value store over the host environment.
///
/// Values are opaque byte blobs; whether they are ciphertext or
/// plaintext JSON is the caller's business. `set_many` must be
/// all-or-nothing: either every entry of the batch lands or none does.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()>;

    /// Atomic batch write.
    async fn set_many(&self, entries: Vec<(String, Vec<u8>)>) -> StorageResult<()>;

    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// Atomic batch removal. Absent keys are not an error.
    async fn remove_many(&self, keys: &[String]) -> StorageResult<()>;

    /// All currently present keys.
    async fn keys(&self) -> StorageResult<Vec<String>>;

    async fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key).await?.is_some())
    }
}
