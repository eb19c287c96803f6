//! Realtime channel: typed events, lifecycle states, and the transport
//! seam.
//!
//! A [`ChannelTransport`] owns the wire (connect handshakes, its own
//! bounded retry budget) and reports everything that happens as
//! [`ChannelEvent`]s on a single stream. The [`ConnectionManager`]
//! folds those events into observable state and fans them out to the
//! presence tracker and the conversation subscription.

pub mod manager;
pub mod ws;

use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::model::{Message, UserId};

pub use manager::{ConnectionHealth, ConnectionManager};
pub use ws::WsTransport;

/// Lifecycle state of the realtime channel.
///
/// `Failed` is terminal until an explicit `connect` call is made again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Why the transport observed a disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server closed the connection on purpose. The transport does
    /// not retry this on its own; the manager must explicitly
    /// re-request a connection.
    ServerClosed,
    /// The link dropped for any other reason; the transport's bounded
    /// retry policy takes over.
    TransportLost(String),
}

impl DisconnectReason {
    pub fn is_server_initiated(&self) -> bool {
        matches!(self, Self::ServerClosed)
    }
}

/// Everything a live channel can report.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Transport-level connect acknowledgement.
    Connected,
    Disconnected(DisconnectReason),
    /// A connection attempt failed outright (including transport
    /// construction failures, which the manager synthesizes).
    ConnectError(String),
    /// A retry succeeded after `attempt` tries.
    Reconnected { attempt: u32 },
    ReconnectError(String),
    /// The retry budget is exhausted; the channel is done until the
    /// next explicit connect.
    ReconnectFailed,
    /// Authoritative full replacement of the online set, never a delta.
    PresenceSnapshot(Vec<UserId>),
    /// An inbound chat message. The channel may broadcast globally;
    /// conversation scoping happens client-side in the subscription.
    Message(Message),
}

/// Commands from the connection manager to the transport driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketControl {
    /// Re-request a connection after a server-initiated closure.
    Reconnect,
    /// Close the socket and stop the driver.
    Close,
}

/// A live socket: the single event stream plus its control handle.
pub struct ChannelSocket {
    pub events: mpsc::Receiver<ChannelEvent>,
    pub control: mpsc::Sender<SocketControl>,
}

/// Seam between the connection manager and the realtime backend.
///
/// `open` must not block on the network: it validates inputs, starts
/// the driver, and returns immediately. Connection progress (including
/// the initial handshake outcome) arrives as events on the socket.
pub trait ChannelTransport: Send + Sync {
    fn open(&self, session_id: &str) -> Result<ChannelSocket, TransportError>;
}
