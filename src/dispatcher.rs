//! Typed action dispatcher.
//!
//! The single entry point hosts call with deserialized UI / dApp
//! requests. Every sensitive action funnels through here so the
//! session guards, permission checks and confirmation prompts cannot
//! be bypassed by calling a lower layer directly.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::confirm::{
    ConfirmationBroker, ConfirmationPayload, ConfirmationSurface, SurfaceMessage, WalletEvent,
    PERMISSION_TIMEOUT, SIGN_TIMEOUT,
};
use crate::dapp::{DappSession, DappSessionRegistry};
use crate::error::{Result, WalletError};
use crate::session::{SessionManager, SessionStatus};
use crate::settings::{SettingsPatch, WalletSettings};
use crate::storage::KeyValueStore;
use crate::vault::account::find_by_public_key;
use crate::vault::Account;

/// Everything a caller can ask the wallet to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    GetStatus,
    InitWallet {
        password: String,
        mnemonic: Option<String>,
    },
    Unlock {
        password: String,
    },
    Lock,
    ChangePassword {
        old_password: String,
        new_password: String,
    },
    CreateAccount {
        name: Option<String>,
    },
    ImportMnemonicAccount {
        mnemonic: String,
        name: Option<String>,
    },
    ImportPrivateKeyAccount {
        private_key: String,
        name: Option<String>,
    },
    ImportWatchOnlyAccount {
        public_key: String,
        name: Option<String>,
    },
    RemoveAccount {
        public_key: String,
        password: String,
    },
    RenameAccount {
        public_key: String,
        name: String,
    },
    SetAccountActivated {
        public_key: String,
        activated: bool,
    },
    ExportMnemonic {
        public_key: String,
        password: String,
    },
    GetSettings,
    UpdateSettings {
        patch: SettingsPatch,
    },
    RequestPermission {
        origin: String,
        app_name: String,
        app_icon_url: Option<String>,
        network: String,
        public_key: String,
    },
    RevokePermission {
        origin: String,
    },
    ListPermissions,
    SignTransaction {
        origin: String,
        /// Hex-encoded unsigned transaction bytes.
        unsigned: String,
    },
    SignEvent {
        origin: String,
        event: serde_json::Value,
    },
    EncryptMessage {
        origin: String,
        recipient_agreement_key: String,
        /// Hex-encoded plaintext.
        plaintext: String,
    },
    DecryptMessage {
        origin: String,
        sender_agreement_key: String,
        /// Hex-encoded ciphertext.
        data: String,
    },
    DeliverSurfaceMessage {
        channel: String,
        message: SurfaceMessage,
    },
    SurfaceChannelClosed {
        channel: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Status {
        status: SessionStatus,
    },
    Registered {
        accounts: Vec<Account>,
        mnemonic: String,
    },
    Unlocked {
        accounts: Vec<Account>,
    },
    Ack,
    Account {
        account: Account,
    },
    AccountWithMnemonic {
        account: Account,
        mnemonic: String,
    },
    Mnemonic {
        mnemonic: String,
    },
    Settings {
        settings: WalletSettings,
    },
    Permission {
        session: DappSession,
    },
    Permissions {
        sessions: Vec<DappSession>,
    },
    Signed {
        transaction_id: u64,
        full_hash: String,
        signed: String,
    },
    Signature {
        signature: String,
    },
    Encrypted {
        data: String,
    },
    Decrypted {
        plaintext: String,
    },
    SurfacePayload {
        payload: Option<ConfirmationPayload>,
    },
}

/// Host hook that pushes a signed transaction to the network.
#[async_trait]
pub trait TransactionBroadcaster: Send + Sync {
    async fn broadcast(&self, network: &str, signed: &[u8]) -> Result<()>;
}

pub struct Dispatcher {
    session: Arc<SessionManager>,
    registry: Arc<DappSessionRegistry>,
    broker: Arc<ConfirmationBroker>,
    broadcaster: Arc<dyn TransactionBroadcaster>,
    // Serializes unlock attempts so the KDF never runs concurrently.
    unlock_gate: Mutex<()>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        surface: Arc<dyn ConfirmationSurface>,
        broadcaster: Arc<dyn TransactionBroadcaster>,
        events: broadcast::Sender<WalletEvent>,
    ) -> Self {
        Self {
            session: Arc::new(SessionManager::new(store.clone(), events.clone())),
            registry: Arc::new(DappSessionRegistry::new(store)),
            broker: Arc::new(ConfirmationBroker::new(surface, events)),
            broadcaster,
            unlock_gate: Mutex::new(()),
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn registry(&self) -> &DappSessionRegistry {
        &self.registry
    }

    pub async fn init(&self) -> Result<SessionStatus> {
        self.session.init().await
    }

    pub async fn dispatch(&self, request: Request) -> Result<Response> {
        match request {
            Request::GetStatus => Ok(Response::Status {
                status: self.session.status().await,
            }),
            Request::InitWallet { password, mnemonic } => {
                let _gate = self.unlock_gate.lock().await;
                let (accounts, phrase) = self
                    .session
                    .register_new_wallet(&password, mnemonic.as_deref())
                    .await?;
                // A fresh vault invalidates every previous grant.
                self.registry.clear().await?;
                self.registry
                    .write_snapshots(&self.session.settings().await?)
                    .await?;
                Ok(Response::Registered {
                    accounts,
                    mnemonic: phrase,
                })
            }
            Request::Unlock { password } => {
                let _gate = self.unlock_gate.lock().await;
                let accounts = self.session.unlock(&password).await?;
                Ok(Response::Unlocked { accounts })
            }
            Request::Lock => {
                self.session.lock().await?;
                Ok(Response::Ack)
            }
            Request::ChangePassword {
                old_password,
                new_password,
            } => {
                let _gate = self.unlock_gate.lock().await;
                let vault = self.session.vault().await?;
                let rotated = vault.change_password(&old_password, &new_password).await?;
                self.session.replace_vault(rotated).await;
                Ok(Response::Ack)
            }
            Request::CreateAccount { name } => {
                let vault = self.session.vault().await?;
                let (account, mnemonic) = vault.create_account(name).await?;
                self.session.refresh().await?;
                Ok(Response::AccountWithMnemonic { account, mnemonic })
            }
            Request::ImportMnemonicAccount { mnemonic, name } => {
                let vault = self.session.vault().await?;
                let account = vault.import_mnemonic_account(&mnemonic, name).await?;
                self.session.refresh().await?;
                Ok(Response::Account { account })
            }
            Request::ImportPrivateKeyAccount { private_key, name } => {
                let vault = self.session.vault().await?;
                let account = vault.import_from_private_key(&private_key, name).await?;
                self.session.refresh().await?;
                Ok(Response::Account { account })
            }
            Request::ImportWatchOnlyAccount { public_key, name } => {
                let vault = self.session.vault().await?;
                let account = vault.import_watch_only_account(&public_key, name).await?;
                self.session.refresh().await?;
                Ok(Response::Account { account })
            }
            Request::RemoveAccount {
                public_key,
                password,
            } => {
                let vault = self.session.vault().await?;
                let accounts = self.session.accounts().await?;
                let account_id = find_by_public_key(&accounts, &public_key)?.account_id.clone();

                vault.remove_account(&public_key, &password).await?;
                self.registry.revoke_account(&account_id).await?;
                self.session.refresh().await?;
                Ok(Response::Ack)
            }
            Request::RenameAccount { public_key, name } => {
                let vault = self.session.vault().await?;
                let account = vault.edit_account_name(&public_key, &name).await?;
                self.session.refresh().await?;
                Ok(Response::Account { account })
            }
            Request::SetAccountActivated {
                public_key,
                activated,
            } => {
                let vault = self.session.vault().await?;
                let account = vault.set_account_activated(&public_key, activated).await?;
                self.session.refresh().await?;
                Ok(Response::Account { account })
            }
            Request::ExportMnemonic {
                public_key,
                password,
            } => {
                let vault = self.session.vault().await?;
                let mnemonic = vault.export_mnemonic(&public_key, &password).await?;
                Ok(Response::Mnemonic { mnemonic })
            }
            Request::GetSettings => Ok(Response::Settings {
                settings: self.session.settings().await?,
            }),
            Request::UpdateSettings { patch } => {
                let vault = self.session.vault().await?;
                let settings = vault.update_settings(patch).await?;
                self.registry.write_snapshots(&settings).await?;
                self.session.refresh().await?;
                Ok(Response::Settings { settings })
            }
            Request::RequestPermission {
                origin,
                app_name,
                app_icon_url,
                network,
                public_key,
            } => {
                self.request_permission(origin, app_name, app_icon_url, network, public_key)
                    .await
            }
            Request::RevokePermission { origin } => {
                self.registry.remove(&origin).await?;
                Ok(Response::Ack)
            }
            Request::ListPermissions => Ok(Response::Permissions {
                sessions: self.registry.get_all().await?,
            }),
            Request::SignTransaction { origin, unsigned } => {
                self.sign_transaction(origin, unsigned).await
            }
            Request::SignEvent { origin, event } => self.sign_event(origin, event).await,
            Request::EncryptMessage {
                origin,
                recipient_agreement_key,
                plaintext,
            } => {
                self.encrypt_message(origin, recipient_agreement_key, plaintext)
                    .await
            }
            Request::DecryptMessage {
                origin,
                sender_agreement_key,
                data,
            } => {
                let grant = self.require_grant(&origin).await?;
                let vault = self.session.vault().await?;
                let data = decode_hex(&data, "data")?;
                let plaintext = vault
                    .decrypt_message(&grant.public_key, &sender_agreement_key, &data)
                    .await?;
                Ok(Response::Decrypted {
                    plaintext: hex::encode(plaintext),
                })
            }
            Request::DeliverSurfaceMessage { channel, message } => {
                let payload = self.broker.deliver(&channel, message).await;
                Ok(Response::SurfacePayload { payload })
            }
            Request::SurfaceChannelClosed { channel } => {
                self.broker.channel_closed(&channel).await;
                Ok(Response::Ack)
            }
        }
    }

    /// Grant flow. An existing grant matching origin, app, network and
    /// account is reused silently; anything else (including the same
    /// origin asking for a different account) goes back to the user.
    async fn request_permission(
        &self,
        origin: String,
        app_name: String,
        app_icon_url: Option<String>,
        network: String,
        public_key: String,
    ) -> Result<Response> {
        let accounts = self.session.accounts().await?;
        let account = find_by_public_key(&accounts, &public_key)?;
        if account.is_watch_only() {
            return Err(WalletError::InvalidParams(
                "watch-only accounts cannot be granted to dApps".into(),
            ));
        }

        // Unknown or hidden network fails before the user is bothered.
        self.registry.resolve_network_hosts(&network).await?;

        if let Some(existing) = self.registry.get(&origin).await? {
            if existing.network == network
                && existing.app_name == app_name
                && existing.public_key == public_key
            {
                debug!(%origin, "reusing existing grant");
                return Ok(Response::Permission { session: existing });
            }
        }

        let id = Uuid::new_v4().to_string();
        self.broker
            .request_confirm(
                &id,
                ConfirmationPayload::Connect {
                    origin: origin.clone(),
                    app_name: app_name.clone(),
                    network: network.clone(),
                },
                PERMISSION_TIMEOUT,
            )
            .await?;

        let session = DappSession {
            origin,
            network,
            app_name,
            app_icon_url,
            account_id: account.account_id.clone(),
            public_key,
            granted_at: Utc::now(),
        };
        self.registry.set(session.clone()).await?;
        Ok(Response::Permission { session })
    }

    async fn sign_transaction(&self, origin: String, unsigned: String) -> Result<Response> {
        let grant = self.require_grant(&origin).await?;
        let vault = self.session.vault().await?;
        let unsigned = decode_hex(&unsigned, "unsigned")?;

        // Best-effort preview; opaque payloads still get confirmed,
        // just without a decoded view.
        let preview: Option<serde_json::Value> = serde_json::from_slice(&unsigned).ok();

        let id = Uuid::new_v4().to_string();
        let decision = self
            .broker
            .request_confirm(
                &id,
                ConfirmationPayload::Sign {
                    origin: origin.clone(),
                    account_public_key: grant.public_key.clone(),
                    unsigned: hex::encode(&unsigned),
                    preview: preview.clone(),
                },
                SIGN_TIMEOUT,
            )
            .await?;

        // The user may adjust fee and deadline from the surface; the
        // overrides only apply to payloads we could decode.
        let unsigned = match preview {
            Some(serde_json::Value::Object(mut object))
                if decision.fee_planck.is_some() || decision.deadline_minutes.is_some() =>
            {
                if let Some(fee) = decision.fee_planck {
                    object.insert("feePlanck".into(), serde_json::Value::from(fee.to_string()));
                }
                if let Some(deadline) = decision.deadline_minutes {
                    object.insert("deadline".into(), serde_json::Value::from(deadline));
                }
                serde_json::to_vec(&serde_json::Value::Object(object))
                    .map_err(|e| WalletError::InvalidParams(format!("payload: {e}")))?
            }
            _ => unsigned,
        };

        let signed = vault.sign(&grant.public_key, &unsigned).await?;
        self.broadcaster.broadcast(&grant.network, &signed).await?;

        let digest = Sha256::digest(&signed);
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&digest[..8]);
        let transaction_id = u64::from_le_bytes(id_bytes);

        info!(%origin, transaction_id, "transaction signed and broadcast");
        Ok(Response::Signed {
            transaction_id,
            full_hash: hex::encode(digest),
            signed: hex::encode(signed),
        })
    }

    async fn sign_event(&self, origin: String, event: serde_json::Value) -> Result<Response> {
        let grant = self.require_grant(&origin).await?;
        let vault = self.session.vault().await?;

        let id = Uuid::new_v4().to_string();
        self.broker
            .request_confirm(
                &id,
                ConfirmationPayload::SignEvent {
                    origin: origin.clone(),
                    account_public_key: grant.public_key.clone(),
                    event: event.clone(),
                },
                SIGN_TIMEOUT,
            )
            .await?;

        let message =
            serde_json::to_vec(&event).map_err(|e| WalletError::InvalidParams(format!("event: {e}")))?;
        let signed = vault.sign(&grant.public_key, &message).await?;
        // The signature is the trailing 64 bytes of the signed blob.
        let signature = signed[signed.len() - 64..].to_vec();

        Ok(Response::Signature {
            signature: hex::encode(signature),
        })
    }

    async fn encrypt_message(
        &self,
        origin: String,
        recipient_agreement_key: String,
        plaintext: String,
    ) -> Result<Response> {
        let grant = self.require_grant(&origin).await?;
        let vault = self.session.vault().await?;
        let plaintext = decode_hex(&plaintext, "plaintext")?;

        let id = Uuid::new_v4().to_string();
        self.broker
            .request_confirm(
                &id,
                ConfirmationPayload::SendEncryptedMessage {
                    origin: origin.clone(),
                    account_public_key: grant.public_key.clone(),
                    recipient_agreement_key: recipient_agreement_key.clone(),
                },
                SIGN_TIMEOUT,
            )
            .await?;

        let data = vault
            .encrypt_message(&grant.public_key, &recipient_agreement_key, &plaintext)
            .await?;
        Ok(Response::Encrypted {
            data: hex::encode(data),
        })
    }

    /// A dApp operation without a grant fails with `NotGranted`, never
    /// with a prompt.
    async fn require_grant(&self, origin: &str) -> Result<DappSession> {
        self.session.vault().await?;
        self.registry
            .get(origin)
            .await?
            .ok_or(WalletError::NotGranted)
    }
}

fn decode_hex(value: &str, field: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|e| WalletError::InvalidParams(format!("{field}: {e}")))
}
