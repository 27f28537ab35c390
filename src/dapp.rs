//! dApp permission registry and network host resolution.
//!
//! A permission grant ties an origin to exactly one account on one
//! network. Grants are stored plaintext (they contain only public
//! material) so they can be listed and revoked without unlocking the
//! vault. The registry also maintains plaintext snapshots of the
//! custom-network list and node policy, which network resolution reads
//! so it works on pre-unlock code paths too.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, WalletError};
use crate::settings::{default_networks, NetworkDefinition, NetworkHost, NodePolicy, WalletSettings};
use crate::storage::{keys as entry_keys, KeyValueStore, StorageError};

/// One granted permission: this origin may use this account on this
/// network without asking again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DappSession {
    pub origin: String,
    pub network: String,
    pub app_name: String,
    pub app_icon_url: Option<String>,
    pub account_id: String,
    /// Hex-encoded signing public key of the granted account.
    pub public_key: String,
    pub granted_at: DateTime<Utc>,
}

pub struct DappSessionRegistry {
    store: Arc<dyn KeyValueStore>,
}

impl DappSessionRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    async fn load(&self) -> Result<HashMap<String, DappSession>> {
        match self.store.get(entry_keys::DAPP_SESSIONS).await? {
            Some(raw) => {
                serde_json::from_slice(&raw).map_err(|e| StorageError::from(e).into())
            }
            None => Ok(HashMap::new()),
        }
    }

    async fn save(&self, sessions: &HashMap<String, DappSession>) -> Result<()> {
        let raw = serde_json::to_vec(sessions).map_err(StorageError::from)?;
        self.store.set(entry_keys::DAPP_SESSIONS, raw).await?;
        Ok(())
    }

    pub async fn get(&self, origin: &str) -> Result<Option<DappSession>> {
        Ok(self.load().await?.remove(origin))
    }

    pub async fn set(&self, session: DappSession) -> Result<()> {
        let mut sessions = self.load().await?;
        info!(origin = %session.origin, network = %session.network, "permission granted");
        sessions.insert(session.origin.clone(), session);
        self.save(&sessions).await
    }

    pub async fn remove(&self, origin: &str) -> Result<()> {
        let mut sessions = self.load().await?;
        if sessions.remove(origin).is_some() {
            info!(%origin, "permission revoked");
            self.save(&sessions).await?;
        }
        Ok(())
    }

    pub async fn get_all(&self) -> Result<Vec<DappSession>> {
        let mut sessions: Vec<DappSession> = self.load().await?.into_values().collect();
        sessions.sort_by(|a, b| a.origin.cmp(&b.origin));
        Ok(sessions)
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.remove(entry_keys::DAPP_SESSIONS).await?;
        Ok(())
    }

    /// Drop every grant tied to a removed account.
    pub async fn revoke_account(&self, account_id: &str) -> Result<()> {
        let mut sessions = self.load().await?;
        let before = sessions.len();
        sessions.retain(|_, s| s.account_id != account_id);
        if sessions.len() != before {
            debug!(%account_id, revoked = before - sessions.len(), "account grants revoked");
            self.save(&sessions).await?;
        }
        Ok(())
    }

    /// Persist the plaintext snapshots network resolution reads.
    pub async fn write_snapshots(&self, settings: &WalletSettings) -> Result<()> {
        let networks =
            serde_json::to_vec(&settings.custom_networks).map_err(StorageError::from)?;
        let policy =
            serde_json::to_vec(&settings.node_policy).map_err(StorageError::from)?;
        self.store
            .set_many(vec![
                (entry_keys::CUSTOM_NETWORKS_SNAPSHOT.to_string(), networks),
                (entry_keys::NODE_POLICY_SNAPSHOT.to_string(), policy),
            ])
            .await?;
        Ok(())
    }

    async fn custom_networks(&self) -> Result<Vec<NetworkDefinition>> {
        match self.store.get(entry_keys::CUSTOM_NETWORKS_SNAPSHOT).await? {
            Some(raw) => {
                serde_json::from_slice(&raw).map_err(|e| StorageError::from(e).into())
            }
            None => Ok(Vec::new()),
        }
    }

    async fn node_policy(&self) -> Result<NodePolicy> {
        match self.store.get(entry_keys::NODE_POLICY_SNAPSHOT).await? {
            Some(raw) => {
                serde_json::from_slice(&raw).map_err(|e| StorageError::from(e).into())
            }
            None => Ok(NodePolicy::default()),
        }
    }

    /// All enabled hosts of a visible network, custom networks first so
    /// a custom definition can shadow a built-in name.
    pub async fn resolve_network_hosts(&self, network: &str) -> Result<Vec<NetworkHost>> {
        let custom = self.custom_networks().await?;
        let definition = custom
            .into_iter()
            .chain(default_networks())
            .find(|n| n.name == network && n.visible)
            .ok_or_else(|| WalletError::InvalidNetwork(network.to_string()))?;

        let hosts: Vec<NetworkHost> = definition.hosts.into_iter().filter(|h| h.enabled).collect();
        if hosts.is_empty() {
            return Err(WalletError::InvalidNetwork(network.to_string()));
        }
        Ok(hosts)
    }

    /// The single host the node policy currently points at.
    pub async fn resolve_current_network_host(&self) -> Result<NetworkHost> {
        let policy = self.node_policy().await?;
        let hosts = self.resolve_network_hosts(&policy.preferred_network).await?;

        if let Some(url) = &policy.preferred_host {
            if let Some(host) = hosts.iter().find(|h| &h.url == url) {
                return Ok(host.clone());
            }
            if !policy.auto_select {
                return Err(WalletError::InvalidNetwork(policy.preferred_network));
            }
        }

        hosts
            .into_iter()
            .next()
            .ok_or_else(|| WalletError::InvalidNetwork(policy.preferred_network))
    }
}
