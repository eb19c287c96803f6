//! MessageStore: ordered history for the active conversation.
//!
//! The sequence is append-only: history load replaces it, `send`
//! appends the server-confirmed record, and `apply_incoming` (the only
//! realtime mutation path) appends filtered channel deliveries. State
//! lives in a watch channel so the UI observes every change; all
//! mutations go through `send_modify`, which makes each one atomic.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::api::MessageApi;
use crate::error::{ApiError, SendError};
use crate::model::{Message, SendPayload, UserId, UserProfile};

/// Observable store state. Cloned out to readers wholesale.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub active_peer: Option<UserId>,
    pub messages: Vec<Message>,
    pub partners: Vec<UserProfile>,
    pub loading_messages: bool,
    pub loading_partners: bool,
    pub sending: bool,
    /// Message-area error (history load or send failure). Cleared on
    /// conversation switch.
    pub error: Option<String>,
}

pub struct MessageStore {
    api: Arc<dyn MessageApi>,
    state: watch::Sender<StoreSnapshot>,
}

impl MessageStore {
    pub fn new(api: Arc<dyn MessageApi>) -> Self {
        let (state, _) = watch::channel(StoreSnapshot::default());
        Self { api, state }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<StoreSnapshot> {
        self.state.subscribe()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.borrow().messages.clone()
    }

    pub fn active_peer(&self) -> Option<UserId> {
        self.state.borrow().active_peer.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    /// Select `peer` (or none), discarding the previous conversation's
    /// in-memory sequence and any pending error. Server history is
    /// untouched.
    pub fn reset(&self, peer: Option<UserId>) {
        self.state.send_modify(|s| {
            s.active_peer = peer;
            s.messages.clear();
            s.error = None;
            s.loading_messages = false;
        });
    }

    /// Fetch the full ordered history for `peer_id` and replace the
    /// sequence. A response that arrives after the active conversation
    /// has moved on is discarded, not applied.
    pub async fn load_history(&self, peer_id: &str) -> Result<(), ApiError> {
        self.state.send_modify(|s| {
            s.loading_messages = true;
            s.error = None;
        });

        match self.api.list_messages(peer_id).await {
            Ok(messages) => {
                self.state.send_modify(|s| {
                    if s.active_peer.as_deref() != Some(peer_id) {
                        debug!(peer = %peer_id, "discarding stale history response");
                        return;
                    }
                    s.loading_messages = false;
                    s.messages = messages;
                });
                Ok(())
            }
            Err(e) => {
                let text = e.to_string();
                warn!(peer = %peer_id, error = %text, "history load failed");
                self.state.send_modify(|s| {
                    if s.active_peer.as_deref() != Some(peer_id) {
                        return;
                    }
                    s.loading_messages = false;
                    // Never retain rows from a different conversation
                    s.messages.clear();
                    s.error = Some(text);
                });
                Err(e)
            }
        }
    }

    /// Fetch the conversation-partner roster.
    pub async fn load_partners(&self) -> Result<(), ApiError> {
        self.state.send_modify(|s| s.loading_partners = true);
        let result = self.api.list_partners().await;
        match result {
            Ok(partners) => {
                self.state.send_modify(|s| {
                    s.loading_partners = false;
                    s.partners = partners;
                });
                Ok(())
            }
            Err(e) => {
                // Roster failures are not message-area errors; the
                // previous roster stays usable.
                warn!(error = %e, "partner roster load failed");
                self.state.send_modify(|s| s.loading_partners = false);
                Err(e)
            }
        }
    }

    /// Send `payload` to the active conversation's peer.
    ///
    /// Preconditions (no active conversation, empty payload) are
    /// rejected synchronously before any network call and are not
    /// recorded as sticky state. While a send is in flight a second
    /// call is rejected with [`SendError::InFlight`] — never queued —
    /// so the store's own appends stay in order.
    pub async fn send(&self, payload: SendPayload) -> Result<Message, SendError> {
        let Some(peer_id) = self.active_peer() else {
            return Err(SendError::NoActiveConversation);
        };
        if payload.is_empty() {
            return Err(SendError::EmptyPayload);
        }
        if !self.try_claim_send() {
            return Err(SendError::InFlight);
        }

        match self.api.send_message(&peer_id, &payload).await {
            Ok(message) => {
                let confirmed = message.clone();
                self.state.send_modify(|s| {
                    s.sending = false;
                    // The conversation may have switched mid-flight; a
                    // confirmation for a stale peer is dropped.
                    if s.active_peer.as_deref() == Some(peer_id.as_str()) {
                        s.messages.push(message);
                    }
                });
                Ok(confirmed)
            }
            Err(e) => {
                let text = e.to_string();
                warn!(peer = %peer_id, error = %text, "send failed");
                self.state.send_modify(|s| {
                    s.sending = false;
                    s.error = Some(text.clone());
                });
                Err(SendError::Api(text))
            }
        }
    }

    /// Append a realtime delivery. This is the only mutation path used
    /// by the conversation subscription. A message whose id is already
    /// present (reconnect replay) is dropped.
    pub fn apply_incoming(&self, message: Message) {
        self.state.send_modify(|s| {
            if s.messages.iter().any(|m| m.id == message.id) {
                debug!(id = %message.id, "dropping duplicate delivery");
                return;
            }
            s.messages.push(message);
        });
    }

    /// Reset everything, roster included. Used on logout.
    pub fn clear_all(&self) {
        self.state.send_replace(StoreSnapshot::default());
    }

    /// Claim the single send slot. `send_modify` runs the closure under
    /// the watch lock, so check-and-set is atomic.
    fn try_claim_send(&self) -> bool {
        let mut claimed = false;
        self.state.send_modify(|s| {
            if !s.sending {
                s.sending = true;
                s.error = None;
                claimed = true;
            }
        });
        claimed
    }
}
