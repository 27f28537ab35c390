//! Non-secret account records.
//!
//! The account list is stored encrypted at `vault.accounts` but the
//! records themselves carry only public material: the vault never puts
//! a secret in an [`Account`].

use serde::{Deserialize, Serialize};

use super::error::{VaultError, VaultResult};

/// How the account entered the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    /// Created inside this wallet from a fresh mnemonic.
    Generated,
    /// Imported from an existing mnemonic or private key.
    Imported,
    /// Public key only; cannot sign or decrypt.
    WatchOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub kind: AccountKind,
    pub name: String,
    /// Hex-encoded Ed25519 public key.
    pub public_key: String,
    /// Derived deterministically from the public key.
    pub account_id: String,
    pub activated: bool,
    /// The wallet's first account; protected from removal.
    pub root: bool,
    /// Hex-encoded X25519 agreement public key, absent for watch-only
    /// accounts.
    pub agreement_public_key: Option<String>,
}

impl Account {
    pub fn is_watch_only(&self) -> bool {
        self.kind == AccountKind::WatchOnly
    }
}

/// Next free default name: "Account 1", "Account 2", ...
pub fn next_default_name(accounts: &[Account]) -> String {
    let mut n = accounts.len() + 1;
    loop {
        let candidate = format!("Account {n}");
        if !accounts.iter().any(|a| a.name == candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Reject a name already carried by a different account.
pub fn assert_name_free(accounts: &[Account], name: &str) -> VaultResult<()> {
    if accounts.iter().any(|a| a.name == name) {
        return Err(VaultError::NameAlreadyUsed);
    }
    Ok(())
}

/// Reject a public key already registered.
pub fn assert_not_registered(accounts: &[Account], public_key: &str) -> VaultResult<()> {
    if accounts.iter().any(|a| a.public_key == public_key) {
        return Err(VaultError::AccountAlreadyExists);
    }
    Ok(())
}

pub fn find_by_public_key<'a>(
    accounts: &'a [Account],
    public_key: &str,
) -> VaultResult<&'a Account> {
    accounts
        .iter()
        .find(|a| a.public_key == public_key)
        .ok_or(VaultError::AccountNotFound)
}
