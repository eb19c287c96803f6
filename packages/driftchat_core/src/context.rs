//! ChatContext: the composition root an application holds for one
//! authenticated session.
//!
//! Wires the REST client, connection manager, presence tracker,
//! message store, and conversation subscription together, and owns
//! the ordering rules between them (presence attaches before the
//! channel connects; logout tears everything down in order).

use std::sync::Arc;

use tracing::info;

use crate::api::{MessageApi, RestClient};
use crate::channel::{
    ChannelTransport, ChannelState, ConnectionHealth, ConnectionManager, WsTransport,
};
use crate::config::ClientConfig;
use crate::error::{ChatError, SendError};
use crate::model::{Message, SendPayload, Session, UserId};
use crate::presence::PresenceTracker;
use crate::store::{MessageStore, StoreSnapshot};
use crate::subscription::ConversationSubscription;

pub struct ChatContext {
    session: Session,
    connection: Arc<ConnectionManager>,
    presence: Arc<PresenceTracker>,
    store: Arc<MessageStore>,
    subscription: ConversationSubscription,
}

impl ChatContext {
    /// Build the production wiring: reqwest REST client plus WebSocket
    /// transport, both from `config`.
    pub fn new(session: Session, config: &ClientConfig) -> Result<Self, ChatError> {
        let api: Arc<dyn MessageApi> = Arc::new(RestClient::new(&config.api)?);
        let transport: Arc<dyn ChannelTransport> =
            Arc::new(WsTransport::new(config.socket.clone()));
        Ok(Self::with_parts(session, api, transport))
    }

    /// Assemble from explicit collaborators. This is the seam tests and
    /// embedders use to substitute fakes.
    pub fn with_parts(
        session: Session,
        api: Arc<dyn MessageApi>,
        transport: Arc<dyn ChannelTransport>,
    ) -> Self {
        let connection = Arc::new(ConnectionManager::new(transport));
        let presence = Arc::new(PresenceTracker::new(api.clone()));
        let store = Arc::new(MessageStore::new(api));
        let subscription = ConversationSubscription::new(connection.clone(), store.clone());
        Self {
            session,
            connection,
            presence,
            store,
            subscription,
        }
    }

    /// Bring the realtime channel up for this session.
    ///
    /// The presence tracker attaches before the connect so that even a
    /// synthesized connect-error event reaches its fallback path.
    pub async fn connect(&self) {
        info!(user = %self.session.user_id(), "connecting chat session");
        self.presence.attach(self.connection.subscribe()).await;
        self.connection.connect(&self.session).await;
    }

    /// Drop the realtime channel but keep the session and store.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
        self.presence.clear();
    }

    /// Full logout teardown: subscription, channel, presence, store.
    pub async fn shutdown(&self) {
        info!(user = %self.session.user_id(), "shutting down chat session");
        self.subscription.teardown().await;
        self.connection.disconnect().await;
        self.presence.detach().await;
        self.presence.clear();
        self.store.clear_all();
    }

    /// Switch the active conversation (or select none), reloading
    /// history and rescoping the message listener.
    pub async fn select_conversation(&self, peer_id: Option<UserId>) {
        self.subscription.set_active_conversation(peer_id).await;
    }

    /// Re-bind the message listener after the channel reconnects. The
    /// subscription does not do this on its own.
    pub async fn resubscribe(&self) {
        self.subscription.resubscribe().await;
    }

    pub async fn send(&self, payload: SendPayload) -> Result<Message, SendError> {
        self.store.send(payload).await
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn subscription(&self) -> &ConversationSubscription {
        &self.subscription
    }

    pub fn state(&self) -> ChannelState {
        self.connection.state()
    }

    pub fn health(&self) -> ConnectionHealth {
        self.connection.health()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.store.snapshot()
    }

    /// Online users other than the local session's own id.
    pub fn online_count(&self) -> usize {
        self.presence.online_count(self.session.user_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelEvent;
    use crate::model::UserProfile;
    use crate::test_support::{MockApi, MockTransport};
    use std::time::Duration;

    fn session(id: &str) -> Session {
        Session::new(UserProfile {
            id: id.to_string(),
            full_name: "Test User".to_string(),
            email: None,
            profile_pic: None,
        })
    }

    #[tokio::test]
    async fn connect_attaches_presence_before_the_channel_opens() {
        // A failing transport synthesizes a connect error; the tracker
        // must already be listening to run its fallback.
        let api = MockApi::new("me");
        api.set_online_users(vec!["A".to_string()]);
        let context = ChatContext::with_parts(session("me"), api.clone(), MockTransport::failing());

        context.connect().await;

        let mut presence = context.presence().watch();
        tokio::time::timeout(Duration::from_secs(1), presence.wait_for(|s| s.contains("A")))
            .await
            .expect("fallback fetch never landed")
            .unwrap();
        assert_eq!(context.state(), ChannelState::Failed);
        assert_eq!(context.online_count(), 1);
    }

    #[tokio::test]
    async fn shutdown_clears_every_collaborator() {
        let api = MockApi::new("me");
        let transport = MockTransport::new();
        let context = ChatContext::with_parts(session("me"), api, transport.clone());

        context.connect().await;
        transport.emit(ChannelEvent::Connected).await;
        let mut health = context.connection().watch_health();
        tokio::time::timeout(Duration::from_secs(1), health.wait_for(|h| h.connected))
            .await
            .unwrap()
            .unwrap();

        context.select_conversation(Some("p1".to_string())).await;
        transport
            .emit(ChannelEvent::PresenceSnapshot(vec!["p1".to_string()]))
            .await;
        let mut presence = context.presence().watch();
        tokio::time::timeout(Duration::from_secs(1), presence.wait_for(|s| !s.is_empty()))
            .await
            .unwrap()
            .unwrap();

        context.shutdown().await;
        assert_eq!(context.state(), ChannelState::Disconnected);
        assert!(context.presence().snapshot().is_empty());
        let snapshot = context.snapshot();
        assert!(snapshot.active_peer.is_none());
        assert!(snapshot.messages.is_empty());
        assert_eq!(context.subscription().bound_peer().await, None);
    }

    #[tokio::test]
    async fn disconnect_keeps_store_but_clears_presence() {
        let api = MockApi::new("me");
        let transport = MockTransport::new();
        let context = ChatContext::with_parts(session("me"), api, transport.clone());

        context.connect().await;
        transport.emit(ChannelEvent::Connected).await;
        let mut health = context.connection().watch_health();
        tokio::time::timeout(Duration::from_secs(1), health.wait_for(|h| h.connected))
            .await
            .unwrap()
            .unwrap();
        context.select_conversation(Some("p1".to_string())).await;

        context.disconnect().await;
        assert_eq!(context.state(), ChannelState::Disconnected);
        assert!(context.presence().snapshot().is_empty());
        // The selected conversation survives a plain disconnect
        assert_eq!(context.store().active_peer().as_deref(), Some("p1"));
    }
}
