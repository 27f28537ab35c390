//! Wallet settings: custom networks, node-selection policy, contacts.
//!
//! Settings are persisted encrypted at `vault.settings` and merged with
//! defaults on read, so adding a field never breaks an existing vault.
//! Updates go through [`SettingsPatch`] so a caller can change one
//! section without clobbering the others.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One reachable node of a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkHost {
    pub name: String,
    pub url: String,
    /// Disabled hosts are kept in the list but never resolved.
    pub enabled: bool,
}

/// A named network with its candidate hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDefinition {
    pub name: String,
    pub hosts: Vec<NetworkHost>,
    /// Hidden networks are excluded from resolution entirely.
    pub visible: bool,
}

/// How the current network host is chosen for code paths that run
/// before (or without) an unlocked vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePolicy {
    /// Network to resolve when a request does not name one.
    pub preferred_network: String,
    /// Pinned host URL; `None` means "first enabled host wins".
    pub preferred_host: Option<String>,
    /// When true the first enabled host is used even if a pinned host
    /// is configured but unavailable in the list.
    pub auto_select: bool,
}

impl Default for NodePolicy {
    fn default() -> Self {
        Self {
            preferred_network: MAINNET.to_string(),
            preferred_host: None,
            auto_select: true,
        }
    }
}

/// Address-book entry. Non-secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub account_id: String,
    pub created_at: DateTime<Utc>,
}

pub const MAINNET: &str = "mainnet";
pub const TESTNET: &str = "testnet";

/// Built-in networks available even with empty settings.
pub fn default_networks() -> Vec<NetworkDefinition> {
    vec![
        NetworkDefinition {
            name: MAINNET.to_string(),
            hosts: vec![
                NetworkHost {
                    name: "main-1".into(),
                    url: "https://node-1.example.network".into(),
                    enabled: true,
                },
                NetworkHost {
                    name: "main-2".into(),
                    url: "https://node-2.example.network".into(),
                    enabled: true,
                },
            ],
            visible: true,
        },
        NetworkDefinition {
            name: TESTNET.to_string(),
            hosts: vec![NetworkHost {
                name: "test-1".into(),
                url: "https://testnet.example.network".into(),
                enabled: true,
            }],
            visible: true,
        },
    ]
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletSettings {
    #[serde(default)]
    pub custom_networks: Vec<NetworkDefinition>,

    #[serde(default)]
    pub node_policy: NodePolicy,

    #[serde(default)]
    pub contacts: Vec<Contact>,
}

/// Partial settings update; `None` fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(default)]
    pub custom_networks: Option<Vec<NetworkDefinition>>,

    #[serde(default)]
    pub node_policy: Option<NodePolicy>,

    #[serde(default)]
    pub contacts: Option<Vec<Contact>>,
}

impl WalletSettings {
    /// Apply a patch, returning the merged result.
    pub fn merged(mut self, patch: SettingsPatch) -> Self {
        if let Some(networks) = patch.custom_networks {
            self.custom_networks = networks;
        }
        if let Some(policy) = patch.node_policy {
            self.node_policy = policy;
        }
        if let Some(contacts) = patch.contacts {
            self.contacts = contacts;
        }
        self
    }
}
