//! Confirmation protocol / request broker.
//!
//! Bridges a user-in-the-loop decision between the action dispatcher
//! and an isolated confirmation surface. Each pending request is keyed
//! by a correlation id and owns:
//!
//! - the payload the surface will display,
//! - the channel that first fetched the payload (bound exactly once;
//!   every other channel is inert for that id afterwards),
//! - a oneshot decision slot,
//! - a timeout tied 1:1 to the request's lifetime,
//! - an idempotent `closed` flag guarding every teardown path.
//!
//! Decline, timeout and surface-disconnect all resolve the caller with
//! the [`WalletError::Declined`] sentinel; expiry additionally emits a
//! `ConfirmationExpired` notification exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::{Result, WalletError};

/// Timeout for signing-style confirmations.
pub const SIGN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Timeout for permission-grant confirmations. Longer: the user may be
/// reading what the dApp asks for.
pub const PERMISSION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Unsolicited notifications delivered to any connected UI.
#[derive(Debug, Clone, Serialize)]
pub enum WalletEvent {
    /// The session status changed (registered, unlocked, locked).
    StateChanged,
    /// A sensitive action awaits a user decision.
    ConfirmationRequested {
        id: String,
        payload: ConfirmationPayload,
    },
    /// A pending confirmation timed out unanswered.
    ConfirmationExpired { id: String },
}

/// What the surface is asked to confirm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConfirmationPayload {
    Connect {
        origin: String,
        app_name: String,
        network: String,
    },
    Sign {
        origin: String,
        account_public_key: String,
        /// Hex-encoded unsigned bytes.
        unsigned: String,
        /// Best-effort decoded preview; `None` when decoding failed.
        preview: Option<serde_json::Value>,
    },
    SendEncryptedMessage {
        origin: String,
        account_public_key: String,
        recipient_agreement_key: String,
    },
    SignEvent {
        origin: String,
        account_public_key: String,
        event: serde_json::Value,
    },
}

/// The only things a confirmation surface can send back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SurfaceMessage {
    /// Ask for the payload of a pending confirmation. The first
    /// channel to fetch becomes the request's owner.
    FetchPayload { id: String },
    /// The user's decision, accepted from the bound channel only.
    Decision {
        id: String,
        confirmed: bool,
        fee_planck: Option<u64>,
        deadline_minutes: Option<u32>,
    },
}

/// A resolved confirmation.
#[derive(Debug, Clone)]
pub struct Decision {
    pub confirmed: bool,
    pub fee_planck: Option<u64>,
    pub deadline_minutes: Option<u32>,
}

/// Host hook that shows and tears down the confirmation surface.
#[async_trait]
pub trait ConfirmationSurface: Send + Sync {
    /// Open (or focus) the surface for the given correlation id.
    async fn open(&self, id: &str) -> Result<()>;
    /// Tear the surface down. Must tolerate already-gone surfaces.
    async fn close(&self, id: &str);
}

struct Pending {
    payload: ConfirmationPayload,
    bound_channel: Option<String>,
    closed: bool,
    decision_tx: Option<oneshot::Sender<Decision>>,
}

pub struct ConfirmationBroker {
    surface: Arc<dyn ConfirmationSurface>,
    pending: Mutex<HashMap<String, Pending>>,
    events: broadcast::Sender<WalletEvent>,
}

impl ConfirmationBroker {
    pub fn new(
        surface: Arc<dyn ConfirmationSurface>,
        events: broadcast::Sender<WalletEvent>,
    ) -> Self {
        Self {
            surface,
            pending: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Subscribe to wallet notifications (confirmation requests,
    /// expiries, state changes).
    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }

    /// Run one confirmation to completion.
    ///
    /// Resolves with the decision when the user confirms; rejects with
    /// [`WalletError::Declined`] on decline, surface disconnect, or
    /// timeout. Teardown runs exactly once no matter which trigger
    /// fires first.
    pub async fn request_confirm(
        &self,
        id: &str,
        payload: ConfirmationPayload,
        timeout: Duration,
    ) -> Result<Decision> {
        self.surface.open(id).await?;

        let (decision_tx, decision_rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(
                id.to_string(),
                Pending {
                    payload: payload.clone(),
                    bound_channel: None,
                    closed: false,
                    decision_tx: Some(decision_tx),
                },
            );
        }

        let _ = self.events.send(WalletEvent::ConfirmationRequested {
            id: id.to_string(),
            payload,
        });
        debug!(%id, "confirmation pending");

        match tokio::time::timeout(timeout, decision_rx).await {
            Ok(Ok(decision)) => {
                self.close(id).await;
                if decision.confirmed {
                    Ok(decision)
                } else {
                    debug!(%id, "confirmation declined");
                    Err(WalletError::Declined)
                }
            }
            // Sender dropped: the request was torn down underneath us
            // (surface disconnect). Same outcome as a decline.
            Ok(Err(_)) => {
                self.close(id).await;
                Err(WalletError::Declined)
            }
            Err(_elapsed) => {
                // Emit the expiry notification only if this timeout
                // actually performed the teardown.
                if self.close(id).await {
                    warn!(%id, "confirmation expired");
                    let _ = self
                        .events
                        .send(WalletEvent::ConfirmationExpired { id: id.to_string() });
                }
                Err(WalletError::Declined)
            }
        }
    }

    /// Route one inbound surface message.
    ///
    /// Returns the payload for a successful `FetchPayload`, `None`
    /// otherwise. Messages for unknown ids, or from channels other
    /// than the bound one, are inert.
    pub async fn deliver(
        &self,
        channel: &str,
        message: SurfaceMessage,
    ) -> Option<ConfirmationPayload> {
        let mut pending = self.pending.lock().await;
        match message {
            SurfaceMessage::FetchPayload { id } => {
                let entry = pending.get_mut(&id)?;
                match &entry.bound_channel {
                    None => {
                        entry.bound_channel = Some(channel.to_string());
                        debug!(%id, %channel, "confirmation channel bound");
                        Some(entry.payload.clone())
                    }
                    Some(owner) if owner == channel => Some(entry.payload.clone()),
                    Some(_) => None,
                }
            }
            SurfaceMessage::Decision {
                id,
                confirmed,
                fee_planck,
                deadline_minutes,
            } => {
                let Some(entry) = pending.get_mut(&id) else {
                    return None;
                };
                if entry.bound_channel.as_deref() != Some(channel) {
                    debug!(%id, %channel, "decision from unbound channel ignored");
                    return None;
                }
                if let Some(tx) = entry.decision_tx.take() {
                    let _ = tx.send(Decision {
                        confirmed,
                        fee_planck,
                        deadline_minutes,
                    });
                }
                None
            }
        }
    }

    /// A surface channel disconnected before deciding. Every pending
    /// request bound to it resolves as declined.
    pub async fn channel_closed(&self, channel: &str) {
        let mut pending = self.pending.lock().await;
        for (id, entry) in pending.iter_mut() {
            if entry.bound_channel.as_deref() == Some(channel) {
                if let Some(tx) = entry.decision_tx.take() {
                    debug!(%id, %channel, "surface disconnected, treating as decline");
                    let _ = tx.send(Decision {
                        confirmed: false,
                        fee_planck: None,
                        deadline_minutes: None,
                    });
                }
            }
        }
    }

    /// Idempotent teardown: cancels the pending entry and closes the
    /// surface exactly once. Returns whether this call did the work.
    async fn close(&self, id: &str) -> bool {
        let removed = {
            let mut pending = self.pending.lock().await;
            match pending.get_mut(id) {
                Some(entry) if !entry.closed => {
                    entry.closed = true;
                    pending.remove(id);
                    true
                }
                _ => false,
            }
        };
        if removed {
            self.surface.close(id).await;
        }
        removed
    }

    /// Number of currently pending confirmations.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}
