//! Vault-internal error types and the boundary normalization policy.
//!
//! Inside the vault, errors are granular so tests and callers within
//! the crate can branch on them. At the vault boundary they convert to
//! [`WalletError`]: recognized domain errors keep their specific
//! user-facing message, everything else collapses to the generic
//! public error so cryptographic internals never leak.

use thiserror::Error;

use crate::error::WalletError;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum VaultError {
    /// The password-derived key failed to decrypt the check entry.
    #[error("Invalid password")]
    InvalidPassword,

    /// A requested entry is not present in storage.
    #[error("Entry not found: {0}")]
    NotFound(String),

    /// AEAD authentication failed: wrong key or corrupted ciphertext.
    #[error("Decryption failed")]
    DecryptionFailed,

    /// An account with the same public key is already registered.
    #[error("Account already exists")]
    AccountAlreadyExists,

    /// No account with the given public key.
    #[error("Account not found")]
    AccountNotFound,

    /// Another account already carries this name.
    #[error("Name already used")]
    NameAlreadyUsed,

    /// Refusing to remove the only remaining account.
    #[error("Cannot remove the last account")]
    LastAccount,

    /// Refusing to remove the wallet's root account.
    #[error("Cannot remove the root account")]
    ProtectedAccount,

    /// The account holds no signing secret (watch-only).
    #[error("Account is watch-only")]
    WatchOnly,

    /// Malformed mnemonic, key or public-key bytes.
    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Argon2 failure.
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// AEAD encryption failure.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// A freshly generated signature did not verify against the
    /// account's public key.
    #[error("Signature self-verification failed")]
    SignatureInvalid,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type VaultResult<T> = std::result::Result<T, VaultError>;

impl From<VaultError> for WalletError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::InvalidPassword => WalletError::InvalidPassword,

            // Recognized domain errors pass through with their message.
            VaultError::AccountAlreadyExists
            | VaultError::AccountNotFound
            | VaultError::NameAlreadyUsed => WalletError::Public(err.to_string()),

            VaultError::LastAccount | VaultError::ProtectedAccount => {
                WalletError::Public("Failed to remove account".into())
            }

            // Everything else is an internal failure; hide the details.
            other => {
                tracing::warn!("vault failure normalized to public error: {other}");
                WalletError::generic()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_keep_message() {
        let err: WalletError = VaultError::AccountAlreadyExists.into();
        assert_eq!(err.to_string(), "Account already exists");

        let err: WalletError = VaultError::NameAlreadyUsed.into();
        assert_eq!(err.to_string(), "Name already used");
    }

    #[test]
    fn test_removal_guards_share_generic_removal_message() {
        for err in [VaultError::LastAccount, VaultError::ProtectedAccount] {
            let public: WalletError = err.into();
            assert_eq!(public.to_string(), "Failed to remove account");
        }
    }

    #[test]
    fn test_internals_collapse_to_generic() {
        let err: WalletError = VaultError::DecryptionFailed.into();
        assert_eq!(err.to_string(), "Something went wrong");

        let err: WalletError = VaultError::SignatureInvalid.into();
        assert_eq!(err.to_string(), "Something went wrong");
    }

    #[test]
    fn test_invalid_password_maps_to_taxonomy_variant() {
        let err: WalletError = VaultError::InvalidPassword.into();
        assert!(matches!(err, WalletError::InvalidPassword));
    }
}
