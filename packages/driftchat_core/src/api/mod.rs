//! REST collaborator seam.
//!
//! The core never talks HTTP directly; everything goes through
//! [`MessageApi`] so tests can substitute a programmed fake. The
//! production implementation is [`rest::RestClient`].

pub mod rest;

use futures::future::BoxFuture;

use crate::error::ApiError;
use crate::model::{Message, SendPayload, UserId, UserProfile};

pub use rest::RestClient;

/// The non-realtime message API consumed by the stores.
pub trait MessageApi: Send + Sync {
    /// Conversation partners for the roster.
    fn list_partners(&self) -> BoxFuture<'_, Result<Vec<UserProfile>, ApiError>>;

    /// Full ordered message history with one peer.
    fn list_messages<'a>(
        &'a self,
        peer_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Message>, ApiError>>;

    /// Post a message to a peer. The server assigns the id and
    /// timestamp of the confirmed record.
    fn send_message<'a>(
        &'a self,
        peer_id: &'a str,
        payload: &'a SendPayload,
    ) -> BoxFuture<'a, Result<Message, ApiError>>;

    /// Presence fallback: the currently-online user ids, fetched over
    /// REST when the realtime channel is unavailable.
    fn list_online_users(&self) -> BoxFuture<'_, Result<Vec<UserId>, ApiError>>;
}
