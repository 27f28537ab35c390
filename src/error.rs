use thiserror::Error;

/// User-facing error taxonomy for the wallet core.
///
/// Everything that crosses the UI or dApp boundary is one of these
/// variants. Vault internals (crypto, storage, serialization) are
/// normalized into [`WalletError::Public`] before they get here; see
/// `vault::error` for the mapping.
#[derive(Error, Debug)]
pub enum WalletError {
    /// Password failed verification. The message is intentionally
    /// generic and never reveals why the check entry did not decrypt.
    #[error("Invalid password")]
    InvalidPassword,

    /// Generic user-safe error. Default wrapper for unexpected vault
    /// failures; recognized domain errors keep their specific message.
    #[error("{0}")]
    Public(String),

    /// An operation that requires an unlocked vault was called while
    /// the session is Idle or Locked. Indicates a caller bug if it
    /// ever surfaces in a normal UI flow.
    #[error("Wallet is not ready")]
    NotReady,

    /// An operation that requires an existing wallet was called before
    /// any wallet was created.
    #[error("Wallet is not initialized")]
    NotInitialized,

    /// The user declined a confirmation, or it expired. A sentinel,
    /// not a fault: callers must swallow it rather than display it.
    #[error("Declined")]
    Declined,

    /// The requesting origin has no granted dApp session.
    #[error("Permission not granted for this origin")]
    NotGranted,

    /// The requested network is unknown or has no enabled hosts.
    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    /// A request from an external caller carried malformed parameters.
    #[error("Invalid params: {0}")]
    InvalidParams(String),
}

impl WalletError {
    /// The catch-all public message used when an unexpected internal
    /// failure must not leak details across the boundary.
    pub fn generic() -> Self {
        WalletError::Public("Something went wrong".into())
    }

    /// True for the decline/expiry sentinel that callers suppress.
    pub fn is_declined(&self) -> bool {
        matches!(self, WalletError::Declined)
    }
}

impl serde::Serialize for WalletError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WalletError>;
