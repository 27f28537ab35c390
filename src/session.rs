//! Wallet session lifecycle.
//!
//! A single [`SessionManager`] owns the runtime state of the wallet:
//! whether a vault exists, whether it is currently unlocked, and the
//! in-memory copies of the account list and settings while it is. All
//! sensitive operations go through [`SessionManager::vault`], which
//! refuses to hand out the vault unless the session is `Ready`.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::info;

use crate::confirm::WalletEvent;
use crate::error::{Result, WalletError};
use crate::settings::WalletSettings;
use crate::storage::KeyValueStore;
use crate::vault::{Account, Vault};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No vault has been created yet.
    Idle,
    /// A vault exists but no valid password has been provided.
    Locked,
    /// The vault is open; signing and decryption are available.
    Ready,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Locked => write!(f, "locked"),
            SessionStatus::Ready => write!(f, "ready"),
        }
    }
}

/// Everything that must be wiped on lock lives here, so a lock can
/// replace the whole struct instead of clearing fields one by one.
struct SessionState {
    status: SessionStatus,
    vault: Option<Vault>,
    accounts: Vec<Account>,
    settings: Option<WalletSettings>,
}

impl SessionState {
    fn empty(status: SessionStatus) -> Self {
        Self {
            status,
            vault: None,
            accounts: Vec::new(),
            settings: None,
        }
    }
}

pub struct SessionManager {
    store: Arc<dyn KeyValueStore>,
    state: RwLock<SessionState>,
    events: broadcast::Sender<WalletEvent>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn KeyValueStore>, events: broadcast::Sender<WalletEvent>) -> Self {
        Self {
            store,
            state: RwLock::new(SessionState::empty(SessionStatus::Idle)),
            events,
        }
    }

    /// Probe storage and settle on the startup status: `Locked` when a
    /// vault exists, `Idle` otherwise.
    pub async fn init(&self) -> Result<SessionStatus> {
        let status = if Vault::is_exist(self.store.as_ref()).await? {
            SessionStatus::Locked
        } else {
            SessionStatus::Idle
        };

        let mut state = self.state.write().await;
        *state = SessionState::empty(status);
        info!(%status, "session initialized");
        Ok(status)
    }

    pub async fn status(&self) -> SessionStatus {
        self.state.read().await.status
    }

    /// Create a brand-new vault, replacing any existing one, and leave
    /// the session `Ready`. Returns the accounts and the recovery
    /// phrase of the root account.
    pub async fn register_new_wallet(
        &self,
        password: &str,
        mnemonic: Option<&str>,
    ) -> Result<(Vec<Account>, String)> {
        let (vault, phrase) =
            Vault::register_new_wallet(self.store.clone(), password, mnemonic).await?;
        let accounts = vault.accounts().await?;
        let settings = vault.settings().await?;

        {
            let mut state = self.state.write().await;
            *state = SessionState {
                status: SessionStatus::Ready,
                vault: Some(vault),
                accounts: accounts.clone(),
                settings: Some(settings),
            };
        }

        info!("wallet registered");
        let _ = self.events.send(WalletEvent::StateChanged);
        Ok((accounts, phrase))
    }

    /// Open the vault with the given password. On failure the session
    /// state is left untouched.
    pub async fn unlock(&self, password: &str) -> Result<Vec<Account>> {
        self.require_initialized().await?;

        let vault = Vault::setup(self.store.clone(), password).await?;
        let accounts = vault.accounts().await?;
        let settings = vault.settings().await?;

        {
            let mut state = self.state.write().await;
            *state = SessionState {
                status: SessionStatus::Ready,
                vault: Some(vault),
                accounts: accounts.clone(),
                settings: Some(settings),
            };
        }

        info!("vault unlocked");
        let _ = self.events.send(WalletEvent::StateChanged);
        Ok(accounts)
    }

    /// Drop the vault key and all decrypted material. Replaces the
    /// entire state so nothing can survive a lock by accident.
    pub async fn lock(&self) -> Result<()> {
        self.require_initialized().await?;

        {
            let mut state = self.state.write().await;
            *state = SessionState::empty(SessionStatus::Locked);
        }

        info!("vault locked");
        let _ = self.events.send(WalletEvent::StateChanged);
        Ok(())
    }

    /// Handle to the open vault. Cheap to clone; fails with `NotReady`
    /// while the session is idle or locked.
    pub async fn vault(&self) -> Result<Vault> {
        let state = self.state.read().await;
        state.vault.clone().ok_or(WalletError::NotReady)
    }

    /// Cached account list of the open session.
    pub async fn accounts(&self) -> Result<Vec<Account>> {
        let state = self.state.read().await;
        if state.status != SessionStatus::Ready {
            return Err(WalletError::NotReady);
        }
        Ok(state.accounts.clone())
    }

    /// Cached settings of the open session.
    pub async fn settings(&self) -> Result<WalletSettings> {
        let state = self.state.read().await;
        match (&state.status, &state.settings) {
            (SessionStatus::Ready, Some(settings)) => Ok(settings.clone()),
            _ => Err(WalletError::NotReady),
        }
    }

    /// Re-read accounts and settings from the vault after a mutation.
    pub async fn refresh(&self) -> Result<()> {
        let vault = self.vault().await?;
        let accounts = vault.accounts().await?;
        let settings = vault.settings().await?;

        let mut state = self.state.write().await;
        if state.status == SessionStatus::Ready {
            state.accounts = accounts;
            state.settings = Some(settings);
        }
        Ok(())
    }

    /// Replace the vault handle after a key rotation.
    pub async fn replace_vault(&self, vault: Vault) {
        let mut state = self.state.write().await;
        if state.status == SessionStatus::Ready {
            state.vault = Some(vault);
        }
    }

    /// Fails with `NotInitialized` while no vault exists at all.
    pub async fn require_initialized(&self) -> Result<()> {
        if self.state.read().await.status == SessionStatus::Idle {
            return Err(WalletError::NotInitialized);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;

    const PASSWORD: &str = "Sw0rdfish!";

    fn manager() -> SessionManager {
        let (events, _rx) = broadcast::channel(16);
        SessionManager::new(Arc::new(MemoryStore::new()), events)
    }

    #[tokio::test]
    async fn test_init_without_vault_is_idle() {
        let manager = manager();
        assert_eq!(manager.init().await.unwrap(), SessionStatus::Idle);

        // Nothing works before registration.
        assert!(matches!(
            manager.unlock(PASSWORD).await.unwrap_err(),
            WalletError::NotInitialized
        ));
        assert!(matches!(
            manager.lock().await.unwrap_err(),
            WalletError::NotInitialized
        ));
        assert!(matches!(
            manager.vault().await.unwrap_err(),
            WalletError::NotReady
        ));
    }

    #[tokio::test]
    async fn test_register_leaves_session_ready() {
        let manager = manager();
        manager.init().await.unwrap();

        let (accounts, phrase) = manager.register_new_wallet(PASSWORD, None).await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].name, "Account 1");
        assert_eq!(phrase.split_whitespace().count(), 24);

        assert_eq!(manager.status().await, SessionStatus::Ready);
        assert!(manager.vault().await.is_ok());
        assert!(manager.settings().await.is_ok());
    }

    #[tokio::test]
    async fn test_unlock_wrong_password_keeps_state() {
        let manager = manager();
        manager.init().await.unwrap();
        manager.register_new_wallet(PASSWORD, None).await.unwrap();
        manager.lock().await.unwrap();

        let err = manager.unlock("wrong").await.unwrap_err();
        assert!(matches!(err, WalletError::InvalidPassword));
        assert_eq!(manager.status().await, SessionStatus::Locked);

        let accounts = manager.unlock(PASSWORD).await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(manager.status().await, SessionStatus::Ready);
    }

    #[tokio::test]
    async fn test_lock_wipes_everything() {
        let manager = manager();
        manager.init().await.unwrap();
        manager.register_new_wallet(PASSWORD, None).await.unwrap();

        manager.lock().await.unwrap();

        assert_eq!(manager.status().await, SessionStatus::Locked);
        assert!(matches!(
            manager.vault().await.unwrap_err(),
            WalletError::NotReady
        ));
        assert!(matches!(
            manager.accounts().await.unwrap_err(),
            WalletError::NotReady
        ));
        assert!(matches!(
            manager.settings().await.unwrap_err(),
            WalletError::NotReady
        ));

        let state = manager.state.read().await;
        assert!(state.accounts.is_empty());
        assert!(state.vault.is_none());
        assert!(state.settings.is_none());
    }

    #[tokio::test]
    async fn test_init_with_existing_vault_is_locked() {
        let (events, _rx) = broadcast::channel(16);
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());

        let first = SessionManager::new(store.clone(), events.clone());
        first.init().await.unwrap();
        first.register_new_wallet(PASSWORD, None).await.unwrap();

        // A fresh manager over the same storage sees the vault.
        let second = SessionManager::new(store, events);
        assert_eq!(second.init().await.unwrap(), SessionStatus::Locked);
    }

    #[tokio::test]
    async fn test_state_changes_are_broadcast() {
        let (events, mut rx) = broadcast::channel(16);
        let manager = SessionManager::new(Arc::new(MemoryStore::new()), events);
        manager.init().await.unwrap();

        manager.register_new_wallet(PASSWORD, None).await.unwrap();
        manager.lock().await.unwrap();
        manager.unlock(PASSWORD).await.unwrap();

        let mut changes = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, WalletEvent::StateChanged) {
                changes += 1;
            }
        }
        assert_eq!(changes, 3);
    }

    #[tokio::test]
    async fn test_refresh_picks_up_vault_mutations() {
        let manager = manager();
        manager.init().await.unwrap();
        manager.register_new_wallet(PASSWORD, None).await.unwrap();

        let vault = manager.vault().await.unwrap();
        vault.create_account(None).await.unwrap();

        assert_eq!(manager.accounts().await.unwrap().len(), 1);
        manager.refresh().await.unwrap();
        assert_eq!(manager.accounts().await.unwrap().len(), 2);
    }
}
