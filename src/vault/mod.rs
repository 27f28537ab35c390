//! Encrypted key custody.
//!
//! This module owns everything that may ever touch secret material:
//! - `secure`: password-derived key wrapping and the encrypted
//!   key/value entries (Argon2id + AES-256-GCM)
//! - `keys`: mnemonic handling, signing/agreement key derivation,
//!   signatures and ECDH message encryption
//! - `account`: the non-secret account records
//! - `manager`: the [`Vault`] handle for account lifecycle, signing and
//!   settings persistence, available only while a session is unlocked
//!
//! Secrets are never written to storage unencrypted and never leave
//! the vault boundary except as signatures or ciphertext.

pub mod account;
pub mod error;
pub mod keys;
pub mod manager;
pub mod secure;

pub use account::{Account, AccountKind};
pub use error::{VaultError, VaultResult};
pub use manager::{TransactionKeys, Vault};
pub use secure::VaultKey;
