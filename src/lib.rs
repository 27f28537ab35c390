//! Security-critical core of a browser wallet.
//!
//! All key material lives in an encrypted vault: secrets are wrapped
//! with a password-derived AES-256-GCM key (Argon2id KDF) and only ever
//! decrypted transiently, inside the operation that needs them. On top
//! of the vault sit:
//!
//! - a session state machine gating every sensitive operation,
//! - a per-origin dApp permission registry,
//! - an asynchronous confirmation broker that puts a user decision in
//!   front of every signature, grant and encrypted message,
//! - a typed dispatcher hosts feed deserialized requests into.
//!
//! The crate is host-agnostic: storage, the confirmation surface and
//! transaction broadcasting are traits the embedding application
//! implements.

pub mod confirm;
pub mod dapp;
pub mod dispatcher;
pub mod error;
pub mod session;
pub mod settings;
pub mod storage;
pub mod vault;

pub use confirm::{ConfirmationBroker, ConfirmationSurface, WalletEvent};
pub use dapp::{DappSession, DappSessionRegistry};
pub use dispatcher::{Dispatcher, Request, Response, TransactionBroadcaster};
pub use error::{Result, WalletError};
pub use session::{SessionManager, SessionStatus};
pub use settings::{SettingsPatch, WalletSettings};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use vault::{Account, AccountKind, Vault};
