//! The [`Vault`]: account lifecycle, signing, message encryption and
//! settings persistence over the encrypted store.
//!
//! A `Vault` is a handle bound to the password-derived key. It exists
//! only while a session is unlocked; locking drops it and with it the
//! key. All methods read secret material fresh from storage, use it,
//! and let it go out of scope; nothing secret is cached on the handle.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::account::{
    assert_name_free, assert_not_registered, find_by_public_key, next_default_name, Account,
    AccountKind,
};
use super::error::{VaultError, VaultResult};
use super::keys::{self, AccountKeys};
use super::secure::{self, VaultKey};
use crate::settings::{SettingsPatch, WalletSettings};
use crate::storage::{keys as entry_keys, KeyValueStore};

/// Secret stored per account under `vault.accprivkey.<id>`.
///
/// Mnemonic-backed accounts keep the phrase (enables export); raw
/// private-key imports keep the 32-byte signing seed.
#[derive(Serialize, Deserialize)]
enum SecretEntry {
    Mnemonic(String),
    Seed(String),
}

/// Signing material handed to the confirmation path for transaction
/// building. The inner `SigningKey` zeroizes on drop.
pub struct TransactionKeys {
    pub signing: ed25519_dalek::SigningKey,
    /// Hex-encoded public key matching the signing key.
    pub public_key: String,
}

#[derive(Clone)]
pub struct Vault {
    store: Arc<dyn KeyValueStore>,
    key: VaultKey,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").finish_non_exhaustive()
    }
}

impl Vault {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// True iff a verification entry is present, i.e. a wallet was
    /// ever registered on this store.
    pub async fn is_exist(store: &dyn KeyValueStore) -> VaultResult<bool> {
        Ok(store.contains(entry_keys::VAULT_CHECK).await?)
    }

    /// Bind a handle by validating the password against the check
    /// entry. The only failure a caller can see is `InvalidPassword`.
    pub async fn setup(store: Arc<dyn KeyValueStore>, password: &str) -> VaultResult<Vault> {
        let salt = secure::get_or_create_salt(store.as_ref()).await?;
        let key = secure::derive_key(password, &salt)?;
        secure::validate_key(store.as_ref(), &key).await?;

        debug!("vault handle bound");
        Ok(Vault { store, key })
    }

    /// Create a brand new wallet, wiping any prior vault namespace.
    ///
    /// Persists the verification entry, the first account's secrets
    /// and the account list as one batch. Returns the handle and the
    /// (possibly generated) mnemonic so the UI can run its backup flow.
    pub async fn register_new_wallet(
        store: Arc<dyn KeyValueStore>,
        password: &str,
        mnemonic: Option<&str>,
    ) -> VaultResult<(Vault, String)> {
        // Validate the supplied mnemonic and derive its keys before
        // touching storage: a malformed phrase must leave an existing
        // wallet intact, not wipe it and then fail.
        let phrase = match mnemonic {
            Some(phrase) => {
                keys::parse_mnemonic(phrase)?;
                phrase.to_string()
            }
            None => keys::generate_mnemonic()?,
        };
        let account_keys = keys::derive_account_keys(&phrase)?;

        wipe_vault_namespace(store.as_ref()).await?;

        let salt = secure::rotate_salt(store.as_ref()).await?;
        let key = secure::derive_key(password, &salt)?;
        let account = build_account(
            AccountKind::Generated,
            "Account 1".to_string(),
            &account_keys,
            true,
        );

        let mut batch = vec![
            (
                entry_keys::VAULT_CHECK.to_string(),
                secure::check_entry_plaintext(),
            ),
            (
                entry_keys::VAULT_ACCOUNTS.to_string(),
                serde_json::to_vec(&vec![account.clone()])?,
            ),
        ];
        batch.extend(secret_entries(
            &account,
            &account_keys,
            SecretEntry::Mnemonic(phrase.clone()),
        )?);

        secure::encrypt_and_save_many(store.as_ref(), batch, &key).await?;

        info!(account_id = %account.account_id, "registered new wallet");
        Ok((Vault { store, key }, phrase))
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// The decrypted account list.
    pub async fn accounts(&self) -> VaultResult<Vec<Account>> {
        match secure::fetch_and_decrypt(self.store.as_ref(), entry_keys::VAULT_ACCOUNTS, &self.key)
            .await
        {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(VaultError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Create a new account from a fresh internal mnemonic.
    pub async fn create_account(&self, name: Option<String>) -> VaultResult<(Account, String)> {
        let phrase = keys::generate_mnemonic()?;
        let account = self
            .add_account(
                AccountKind::Generated,
                &phrase,
                name,
                SecretEntry::Mnemonic(phrase.clone()),
            )
            .await?;
        Ok((account, phrase))
    }

    /// Import an account from an existing mnemonic phrase.
    pub async fn import_mnemonic_account(
        &self,
        phrase: &str,
        name: Option<String>,
    ) -> VaultResult<Account> {
        keys::parse_mnemonic(phrase)?;
        self.add_account(
            AccountKind::Imported,
            phrase,
            name,
            SecretEntry::Mnemonic(phrase.to_string()),
        )
        .await
    }

    /// Import an account from a raw hex-encoded 32-byte signing seed.
    pub async fn import_from_private_key(
        &self,
        seed_hex: &str,
        name: Option<String>,
    ) -> VaultResult<Account> {
        let seed_bytes = keys::parse_key_bytes(seed_hex)?;
        let account_keys = keys::keys_from_signing_seed(&seed_bytes);

        let mut accounts = self.accounts().await?;
        let account = self
            .register_derived(
                &mut accounts,
                AccountKind::Imported,
                name,
                &account_keys,
                Some(SecretEntry::Seed(seed_hex.to_string())),
            )
            .await?;
        Ok(account)
    }

    /// Import a watch-only account. Stores the public key entry only;
    /// the account can never sign or decrypt.
    pub async fn import_watch_only_account(
        &self,
        public_key_hex: &str,
        name: Option<String>,
    ) -> VaultResult<Account> {
        let public_key = keys::parse_public_key(public_key_hex)?;

        let mut accounts = self.accounts().await?;
        assert_not_registered(&accounts, public_key_hex)?;

        let name = match name {
            Some(name) => {
                assert_name_free(&accounts, &name)?;
                name
            }
            None => next_default_name(&accounts),
        };

        let account = Account {
            kind: AccountKind::WatchOnly,
            name,
            public_key: public_key_hex.to_string(),
            account_id: keys::account_id_from_public_key(&public_key),
            activated: true,
            root: false,
            agreement_public_key: None,
        };
        accounts.push(account.clone());

        let batch = vec![
            (
                entry_keys::VAULT_ACCOUNTS.to_string(),
                serde_json::to_vec(&accounts)?,
            ),
            (
                entry_keys::account_public_key(&account.account_id),
                account.public_key.clone().into_bytes(),
            ),
        ];
        secure::encrypt_and_save_many(self.store.as_ref(), batch, &self.key).await?;

        info!(account_id = %account.account_id, "imported watch-only account");
        Ok(account)
    }

    /// Remove an account after re-validating the password.
    ///
    /// Refuses for the last remaining account and for the root account.
    pub async fn remove_account(&self, public_key: &str, password: &str) -> VaultResult<()> {
        self.validate_password(password).await?;

        let mut accounts = self.accounts().await?;
        let account = find_by_public_key(&accounts, public_key)?.clone();

        if accounts.len() <= 1 {
            return Err(VaultError::LastAccount);
        }
        if account.root {
            return Err(VaultError::ProtectedAccount);
        }

        accounts.retain(|a| a.public_key != public_key);
        secure::encrypt_and_save_many(
            self.store.as_ref(),
            vec![(
                entry_keys::VAULT_ACCOUNTS.to_string(),
                serde_json::to_vec(&accounts)?,
            )],
            &self.key,
        )
        .await?;

        // Tombstone the secrets after the list no longer references them.
        secure::remove_many(
            self.store.as_ref(),
            &[
                entry_keys::account_signing_secret(&account.account_id),
                entry_keys::account_agreement_secret(&account.account_id),
                entry_keys::account_public_key(&account.account_id),
            ],
        )
        .await?;

        info!(account_id = %account.account_id, "removed account");
        Ok(())
    }

    /// Rename an account, enforcing name uniqueness.
    pub async fn edit_account_name(&self, public_key: &str, name: &str) -> VaultResult<Account> {
        let mut accounts = self.accounts().await?;

        if accounts
            .iter()
            .any(|a| a.name == name && a.public_key != public_key)
        {
            return Err(VaultError::NameAlreadyUsed);
        }

        let mut updated = None;
        for account in accounts.iter_mut() {
            if account.public_key == public_key {
                account.name = name.to_string();
                updated = Some(account.clone());
            }
        }
        let updated = updated.ok_or(VaultError::AccountNotFound)?;
        self.save_accounts(&accounts).await?;

        Ok(updated)
    }

    /// Flip an account's activation flag.
    pub async fn set_account_activated(
        &self,
        public_key: &str,
        activated: bool,
    ) -> VaultResult<Account> {
        let mut accounts = self.accounts().await?;

        let mut updated = None;
        for account in accounts.iter_mut() {
            if account.public_key == public_key {
                account.activated = activated;
                updated = Some(account.clone());
            }
        }
        let updated = updated.ok_or(VaultError::AccountNotFound)?;
        self.save_accounts(&accounts).await?;

        Ok(updated)
    }

    // =========================================================================
    // Signing and message encryption
    // =========================================================================

    /// Sign `unsigned` with the account's signing key.
    ///
    /// The fresh signature is re-verified against the account's stored
    /// public key before it is returned; a mismatch (corrupted or
    /// swapped key material) fails the call instead of handing out an
    /// unverifiable signature. Returns `unsigned || signature`.
    pub async fn sign(&self, account_public_key: &str, unsigned: &[u8]) -> VaultResult<Vec<u8>> {
        let accounts = self.accounts().await?;
        let account = find_by_public_key(&accounts, account_public_key)?;
        let account_keys = self.account_keys(account).await?;

        let signature = keys::sign(&account_keys.signing, unsigned);

        let stored_public_key = keys::parse_public_key(&account.public_key)?;
        keys::verify(&stored_public_key, unsigned, &signature)?;

        let mut signed = unsigned.to_vec();
        signed.extend_from_slice(&signature);
        Ok(signed)
    }

    /// Signing material for the confirmation path to build and later
    /// sign a transaction.
    pub async fn get_transaction_keys(
        &self,
        account_public_key: &str,
    ) -> VaultResult<TransactionKeys> {
        let accounts = self.accounts().await?;
        let account = find_by_public_key(&accounts, account_public_key)?;
        let account_keys = self.account_keys(account).await?;

        Ok(TransactionKeys {
            signing: account_keys.signing,
            public_key: account.public_key.clone(),
        })
    }

    /// Encrypt a message from this account to a peer agreement key.
    pub async fn encrypt_message(
        &self,
        account_public_key: &str,
        their_agreement_key_hex: &str,
        plaintext: &[u8],
    ) -> VaultResult<Vec<u8>> {
        let their_key = keys::parse_public_key(their_agreement_key_hex)?;
        let accounts = self.accounts().await?;
        let account = find_by_public_key(&accounts, account_public_key)?;
        let account_keys = self.account_keys(account).await?;

        keys::encrypt_message(&account_keys.agreement, &their_key, plaintext)
    }

    /// Decrypt a message sent to this account by a peer.
    pub async fn decrypt_message(
        &self,
        account_public_key: &str,
        their_agreement_key_hex: &str,
        data: &[u8],
    ) -> VaultResult<Vec<u8>> {
        let their_key = keys::parse_public_key(their_agreement_key_hex)?;
        let accounts = self.accounts().await?;
        let account = find_by_public_key(&accounts, account_public_key)?;
        let account_keys = self.account_keys(account).await?;

        keys::decrypt_message(&account_keys.agreement, &their_key, data)
    }

    /// Return the account's mnemonic after re-validating the password.
    pub async fn export_mnemonic(&self, public_key: &str, password: &str) -> VaultResult<String> {
        self.validate_password(password).await?;

        let accounts = self.accounts().await?;
        let account = find_by_public_key(&accounts, public_key)?;
        if account.is_watch_only() {
            return Err(VaultError::WatchOnly);
        }

        match self.secret_entry(&account.account_id).await? {
            SecretEntry::Mnemonic(phrase) => Ok(phrase),
            SecretEntry::Seed(_) => Err(VaultError::InvalidKeyMaterial(
                "account has no mnemonic".into(),
            )),
        }
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// The decrypted settings, defaults when none were saved yet.
    pub async fn settings(&self) -> VaultResult<WalletSettings> {
        match secure::fetch_and_decrypt(self.store.as_ref(), entry_keys::VAULT_SETTINGS, &self.key)
            .await
        {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(VaultError::NotFound(_)) => Ok(WalletSettings::default()),
            Err(e) => Err(e),
        }
    }

    /// Merge a patch over the current settings, persist, and return
    /// the merged result for plaintext snapshotting by non-vault code.
    pub async fn update_settings(&self, patch: SettingsPatch) -> VaultResult<WalletSettings> {
        let merged = self.settings().await?.merged(patch);
        secure::encrypt_and_save_many(
            self.store.as_ref(),
            vec![(
                entry_keys::VAULT_SETTINGS.to_string(),
                serde_json::to_vec(&merged)?,
            )],
            &self.key,
        )
        .await?;
        Ok(merged)
    }

    // =========================================================================
    // Password change
    // =========================================================================

    /// Re-encrypt every vault entry under a key derived from the new
    /// password (fresh salt). Returns the rebound handle; the old one
    /// and all its clones are stale afterwards.
    pub async fn change_password(&self, old: &str, new: &str) -> VaultResult<Vault> {
        self.validate_password(old).await?;

        // Decrypt every encrypted entry with the current key first, so
        // a failure leaves the vault untouched.
        let mut plaintexts = Vec::new();
        for key in self.store.keys().await? {
            if key.starts_with(entry_keys::VAULT_PREFIX) && key != entry_keys::VAULT_SALT {
                let value =
                    secure::fetch_and_decrypt(self.store.as_ref(), &key, &self.key).await?;
                plaintexts.push((key, value));
            }
        }

        let mut salt = [0u8; secure::SALT_SIZE];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut salt);
        let new_key = secure::derive_key(new, &salt)?;

        let mut batch = vec![(entry_keys::VAULT_SALT.to_string(), salt.to_vec())];
        for (key, value) in plaintexts {
            batch.push((key, secure::encrypt_value(&new_key, &value)?));
        }
        self.store.set_many(batch).await?;

        info!("vault password changed");
        Ok(Vault {
            store: Arc::clone(&self.store),
            key: new_key,
        })
    }

    // =========================================================================
    // Internal
    // =========================================================================

    /// Re-derive a key from the given password and check it against
    /// the verification entry.
    async fn validate_password(&self, password: &str) -> VaultResult<()> {
        let salt = secure::get_or_create_salt(self.store.as_ref()).await?;
        let key = secure::derive_key(password, &salt)?;
        secure::validate_key(self.store.as_ref(), &key).await
    }

    async fn save_accounts(&self, accounts: &[Account]) -> VaultResult<()> {
        secure::encrypt_and_save_many(
            self.store.as_ref(),
            vec![(
                entry_keys::VAULT_ACCOUNTS.to_string(),
                serde_json::to_vec(accounts)?,
            )],
            &self.key,
        )
        .await
    }

    async fn add_account(
        &self,
        kind: AccountKind,
        phrase: &str,
        name: Option<String>,
        secret: SecretEntry,
    ) -> VaultResult<Account> {
        let account_keys = keys::derive_account_keys(phrase)?;
        let mut accounts = self.accounts().await?;
        self.register_derived(&mut accounts, kind, name, &account_keys, Some(secret))
            .await
    }

    async fn register_derived(
        &self,
        accounts: &mut Vec<Account>,
        kind: AccountKind,
        name: Option<String>,
        account_keys: &AccountKeys,
        secret: Option<SecretEntry>,
    ) -> VaultResult<Account> {
        let public_key_hex = hex::encode(account_keys.public_key());
        assert_not_registered(accounts, &public_key_hex)?;

        let name = match name {
            Some(name) => {
                assert_name_free(accounts, &name)?;
                name
            }
            None => next_default_name(accounts),
        };

        let account = build_account(kind, name, account_keys, false);
        accounts.push(account.clone());

        let mut batch = vec![(
            entry_keys::VAULT_ACCOUNTS.to_string(),
            serde_json::to_vec(&accounts)?,
        )];
        if let Some(secret) = secret {
            batch.extend(secret_entries(&account, account_keys, secret)?);
        }
        secure::encrypt_and_save_many(self.store.as_ref(), batch, &self.key).await?;

        info!(account_id = %account.account_id, kind = ?account.kind, "added account");
        Ok(account)
    }

    async fn secret_entry(&self, account_id: &str) -> VaultResult<SecretEntry> {
        let bytes = secure::fetch_and_decrypt(
            self.store.as_ref(),
            &entry_keys::account_signing_secret(account_id),
            &self.key,
        )
        .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Load and re-derive an account's key material.
    async fn account_keys(&self, account: &Account) -> VaultResult<AccountKeys> {
        if account.is_watch_only() {
            return Err(VaultError::WatchOnly);
        }

        match self.secret_entry(&account.account_id).await? {
            SecretEntry::Mnemonic(phrase) => keys::derive_account_keys(&phrase),
            SecretEntry::Seed(seed_hex) => {
                let seed = keys::parse_key_bytes(&seed_hex)?;
                Ok(keys::keys_from_signing_seed(&seed))
            }
        }
    }
}

fn build_account(
    kind: AccountKind,
    name: String,
    account_keys: &AccountKeys,
    root: bool,
) -> Account {
    let public_key = account_keys.public_key();
    Account {
        kind,
        name,
        public_key: hex::encode(public_key),
        account_id: keys::account_id_from_public_key(&public_key),
        activated: true,
        root,
        agreement_public_key: Some(hex::encode(account_keys.agreement_public_key())),
    }
}

/// The plaintext batch entries for one account's secrets.
fn secret_entries(
    account: &Account,
    account_keys: &AccountKeys,
    secret: SecretEntry,
) -> VaultResult<Vec<(String, Vec<u8>)>> {
    Ok(vec![
        (
            entry_keys::account_signing_secret(&account.account_id),
            serde_json::to_vec(&secret)?,
        ),
        (
            entry_keys::account_agreement_secret(&account.account_id),
            account_keys.agreement.to_bytes().to_vec(),
        ),
        (
            entry_keys::account_public_key(&account.account_id),
            account.public_key.clone().into_bytes(),
        ),
    ])
}

/// Remove every entry under the vault prefix, salt included.
async fn wipe_vault_namespace(store: &dyn KeyValueStore) -> VaultResult<()> {
    let stale: Vec<String> = store
        .keys()
        .await?
        .into_iter()
        .filter(|k| k.starts_with(entry_keys::VAULT_PREFIX))
        .collect();
    if !stale.is_empty() {
        debug!("wiping {} stale vault entries", stale.len());
        store.remove_many(&stale).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    const PASSWORD: &str = "Sw0rdfish!";

    async fn fresh_vault() -> (Arc<MemoryStore>, Vault, String) {
        let store = Arc::new(MemoryStore::new());
        let (vault, phrase) =
            Vault::register_new_wallet(store.clone() as Arc<dyn KeyValueStore>, PASSWORD, None)
                .await
                .unwrap();
        (store, vault, phrase)
    }

    #[tokio::test]
    async fn test_register_then_setup_with_same_password() {
        let (store, _, _) = fresh_vault().await;

        assert!(Vault::is_exist(store.as_ref()).await.unwrap());
        let vault = Vault::setup(store.clone() as Arc<dyn KeyValueStore>, PASSWORD)
            .await
            .unwrap();
        assert_eq!(vault.accounts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_setup_with_wrong_password_fails() {
        let (store, _, _) = fresh_vault().await;
        let err = Vault::setup(store as Arc<dyn KeyValueStore>, "wrong-password")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidPassword));
    }

    #[tokio::test]
    async fn test_first_account_is_root_named_account_1() {
        let (_, vault, _) = fresh_vault().await;
        let accounts = vault.accounts().await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].name, "Account 1");
        assert!(accounts[0].root);
        assert!(accounts[0].activated);
    }

    #[tokio::test]
    async fn test_register_wipes_previous_wallet() {
        let (store, vault, _) = fresh_vault().await;
        vault.create_account(None).await.unwrap();

        let (vault2, _) = Vault::register_new_wallet(
            store.clone() as Arc<dyn KeyValueStore>,
            "NewPassword1",
            None,
        )
        .await
        .unwrap();

        assert_eq!(vault2.accounts().await.unwrap().len(), 1);
        // Old password no longer opens the vault.
        let err = Vault::setup(store as Arc<dyn KeyValueStore>, PASSWORD)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidPassword));
    }

    #[tokio::test]
    async fn test_failed_registration_keeps_existing_wallet() {
        let (store, _, _) = fresh_vault().await;

        // A typo'd mnemonic must fail before anything is wiped.
        let err = Vault::register_new_wallet(
            store.clone() as Arc<dyn KeyValueStore>,
            "NewPassword1",
            Some("not a real phrase at all"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, VaultError::InvalidKeyMaterial(_)));

        // The previous wallet is intact and still opens.
        assert!(Vault::is_exist(store.as_ref()).await.unwrap());
        let vault = Vault::setup(store as Arc<dyn KeyValueStore>, PASSWORD)
            .await
            .unwrap();
        assert_eq!(vault.accounts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_import_second_mnemonic_named_account_2() {
        let (_, vault, _) = fresh_vault().await;

        let phrase = keys::generate_mnemonic().unwrap();
        let account = vault.import_mnemonic_account(&phrase, None).await.unwrap();

        assert_eq!(account.name, "Account 2");
        assert_eq!(vault.accounts().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_import_rejected() {
        let (_, vault, phrase) = fresh_vault().await;
        let err = vault.import_mnemonic_account(&phrase, None).await.unwrap_err();
        assert!(matches!(err, VaultError::AccountAlreadyExists));
    }

    #[tokio::test]
    async fn test_remove_last_account_rejected() {
        let (_, vault, _) = fresh_vault().await;
        let accounts = vault.accounts().await.unwrap();

        let err = vault
            .remove_account(&accounts[0].public_key, PASSWORD)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::LastAccount));
    }

    #[tokio::test]
    async fn test_remove_root_account_rejected() {
        let (_, vault, _) = fresh_vault().await;
        let (second, _) = vault.create_account(None).await.unwrap();
        let root_pk = vault.accounts().await.unwrap()[0].public_key.clone();

        let err = vault.remove_account(&root_pk, PASSWORD).await.unwrap_err();
        assert!(matches!(err, VaultError::ProtectedAccount));

        // Non-root removal with the right password works.
        vault.remove_account(&second.public_key, PASSWORD).await.unwrap();
        assert_eq!(vault.accounts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_account_revalidates_password() {
        let (_, vault, _) = fresh_vault().await;
        let (second, _) = vault.create_account(None).await.unwrap();

        let err = vault
            .remove_account(&second.public_key, "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidPassword));
    }

    #[tokio::test]
    async fn test_removed_account_secrets_are_tombstoned() {
        let (store, vault, _) = fresh_vault().await;
        let (second, _) = vault.create_account(None).await.unwrap();
        let secret_key = entry_keys::account_signing_secret(&second.account_id);
        assert!(store.contains(&secret_key).await.unwrap());

        vault.remove_account(&second.public_key, PASSWORD).await.unwrap();
        assert!(!store.contains(&secret_key).await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_enforces_uniqueness() {
        let (_, vault, _) = fresh_vault().await;
        let (second, _) = vault.create_account(None).await.unwrap();

        let err = vault
            .edit_account_name(&second.public_key, "Account 1")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NameAlreadyUsed));

        let renamed = vault
            .edit_account_name(&second.public_key, "Savings")
            .await
            .unwrap();
        assert_eq!(renamed.name, "Savings");
    }

    #[tokio::test]
    async fn test_sign_self_verifies() {
        let (_, vault, _) = fresh_vault().await;
        let account = vault.accounts().await.unwrap().remove(0);

        let signed = vault.sign(&account.public_key, b"unsigned tx").await.unwrap();
        assert_eq!(signed.len(), b"unsigned tx".len() + keys::SIGNATURE_LEN);

        let pk = keys::parse_public_key(&account.public_key).unwrap();
        let sig: [u8; keys::SIGNATURE_LEN] =
            signed[b"unsigned tx".len()..].try_into().unwrap();
        keys::verify(&pk, b"unsigned tx", &sig).unwrap();
    }

    #[tokio::test]
    async fn test_sign_fails_on_corrupted_key_material() {
        let (store, vault, _) = fresh_vault().await;
        let account = vault.accounts().await.unwrap().remove(0);

        // Swap the stored secret for one derived from a different
        // mnemonic: the signature will not verify against the
        // account's public key.
        let other = keys::generate_mnemonic().unwrap();
        secure::encrypt_and_save_many(
            store.as_ref(),
            vec![(
                entry_keys::account_signing_secret(&account.account_id),
                serde_json::to_vec(&SecretEntry::Mnemonic(other)).unwrap(),
            )],
            &{
                let salt = secure::get_or_create_salt(store.as_ref()).await.unwrap();
                secure::derive_key(PASSWORD, &salt).unwrap()
            },
        )
        .await
        .unwrap();

        let err = vault.sign(&account.public_key, b"tx").await.unwrap_err();
        assert!(matches!(err, VaultError::SignatureInvalid));
    }

    #[tokio::test]
    async fn test_transaction_keys_match_account() {
        let (_, vault, _) = fresh_vault().await;
        let account = vault.accounts().await.unwrap().remove(0);

        let tx_keys = vault
            .get_transaction_keys(&account.public_key)
            .await
            .unwrap();
        assert_eq!(tx_keys.public_key, account.public_key);
        assert_eq!(
            hex::encode(tx_keys.signing.verifying_key().to_bytes()),
            account.public_key
        );
    }

    #[tokio::test]
    async fn test_watch_only_cannot_sign() {
        let (_, vault, _) = fresh_vault().await;
        let pk_hex = hex::encode([9u8; 32]);
        let watch = vault.import_watch_only_account(&pk_hex, None).await.unwrap();

        let err = vault.sign(&watch.public_key, b"tx").await.unwrap_err();
        assert!(matches!(err, VaultError::WatchOnly));
    }

    #[tokio::test]
    async fn test_export_mnemonic_roundtrip() {
        let (_, vault, phrase) = fresh_vault().await;
        let account = vault.accounts().await.unwrap().remove(0);

        let exported = vault
            .export_mnemonic(&account.public_key, PASSWORD)
            .await
            .unwrap();
        assert_eq!(exported, phrase);

        let err = vault
            .export_mnemonic(&account.public_key, "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidPassword));
    }

    #[tokio::test]
    async fn test_export_mnemonic_rejected_for_watch_only() {
        let (_, vault, _) = fresh_vault().await;
        let pk_hex = hex::encode([7u8; 32]);
        let watch = vault.import_watch_only_account(&pk_hex, None).await.unwrap();

        let err = vault
            .export_mnemonic(&watch.public_key, PASSWORD)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::WatchOnly));
    }

    #[tokio::test]
    async fn test_message_encrypt_decrypt_between_accounts() {
        let (_, vault, _) = fresh_vault().await;
        let sender = vault.accounts().await.unwrap().remove(0);
        let (recipient, _) = vault.create_account(None).await.unwrap();

        let ciphertext = vault
            .encrypt_message(
                &sender.public_key,
                recipient.agreement_public_key.as_ref().unwrap(),
                b"ping",
            )
            .await
            .unwrap();

        let plaintext = vault
            .decrypt_message(
                &recipient.public_key,
                sender.agreement_public_key.as_ref().unwrap(),
                &ciphertext,
            )
            .await
            .unwrap();
        assert_eq!(plaintext, b"ping");
    }

    #[tokio::test]
    async fn test_update_settings_merges_and_persists() {
        let (store, vault, _) = fresh_vault().await;

        let merged = vault
            .update_settings(SettingsPatch {
                node_policy: Some(crate::settings::NodePolicy {
                    preferred_network: crate::settings::TESTNET.into(),
                    preferred_host: None,
                    auto_select: true,
                }),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(merged.node_policy.preferred_network, "testnet");

        // Survives a fresh handle.
        let vault2 = Vault::setup(store as Arc<dyn KeyValueStore>, PASSWORD)
            .await
            .unwrap();
        assert_eq!(
            vault2.settings().await.unwrap().node_policy.preferred_network,
            "testnet"
        );
    }

    #[tokio::test]
    async fn test_change_password_reencrypts_everything() {
        let (store, vault, phrase) = fresh_vault().await;
        let vault = vault.change_password(PASSWORD, "NewPassword1").await.unwrap();

        // Old password is dead, new one opens the vault.
        assert!(matches!(
            Vault::setup(store.clone() as Arc<dyn KeyValueStore>, PASSWORD)
                .await
                .unwrap_err(),
            VaultError::InvalidPassword
        ));
        let reopened = Vault::setup(store as Arc<dyn KeyValueStore>, "NewPassword1")
            .await
            .unwrap();

        // Account secrets still decrypt under the new key.
        let account = reopened.accounts().await.unwrap().remove(0);
        let exported = reopened
            .export_mnemonic(&account.public_key, "NewPassword1")
            .await
            .unwrap();
        assert_eq!(exported, phrase);

        // The rebound handle works too.
        vault.sign(&account.public_key, b"tx").await.unwrap();
    }
}
