//! ConnectionManager: lifecycle of the one realtime channel per
//! session.
//!
//! At most one live channel exists at a time. `connect` tears down any
//! prior channel completely (pump stopped, socket closed) before a new
//! one is created, so two channels can never deliver simultaneously.
//! Failures never escape as errors: they fold into the observable
//! health `(is_connected, last_error)` and channel state.

use std::sync::Arc;

use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelEvent, ChannelState, ChannelTransport, SocketControl};
use crate::model::Session;

/// Human-readable error tiers recorded in `last_error`.
const CONNECT_FAILED: &str = "Failed to connect to chat server";
const INIT_FAILED: &str = "Failed to initialize chat connection";
const RECONNECT_FAILED: &str = "Failed to reconnect to chat server";
const RECONNECT_GAVE_UP: &str = "Unable to reconnect to chat server";

/// Connection health observed by the UI and the presence tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionHealth {
    pub connected: bool,
    pub last_error: Option<String>,
}

impl ConnectionHealth {
    fn up() -> Self {
        Self {
            connected: true,
            last_error: None,
        }
    }

    fn down(error: &str) -> Self {
        Self {
            connected: false,
            last_error: Some(error.to_string()),
        }
    }
}

/// The currently live channel, if any.
struct LiveChannel {
    cancel: CancellationToken,
    control: mpsc::Sender<SocketControl>,
    pump: JoinHandle<()>,
}

/// Observable state shared with the event pump task.
struct Shared {
    state_tx: watch::Sender<ChannelState>,
    health_tx: watch::Sender<ConnectionHealth>,
    event_tx: broadcast::Sender<ChannelEvent>,
}

pub struct ConnectionManager {
    transport: Arc<dyn ChannelTransport>,
    live: Mutex<Option<LiveChannel>>,
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn ChannelTransport>) -> Self {
        let (state_tx, _) = watch::channel(ChannelState::Disconnected);
        let (health_tx, _) = watch::channel(ConnectionHealth::default());
        let (event_tx, _) = broadcast::channel(256);
        Self {
            transport,
            live: Mutex::new(None),
            shared: Arc::new(Shared {
                state_tx,
                health_tx,
                event_tx,
            }),
        }
    }

    /// Open the channel for `session`, tearing down any prior channel
    /// first. Never returns an error: a transport that cannot be
    /// constructed leaves the channel in `Failed` with a recorded
    /// `last_error`, and downstream observers (presence fallback) are
    /// notified through a synthesized `ConnectError` event.
    pub async fn connect(&self, session: &Session) {
        let mut live = self.live.lock().await;
        Self::teardown(&mut live).await;

        self.shared.state_tx.send_replace(ChannelState::Connecting);
        self.shared
            .health_tx
            .send_replace(ConnectionHealth::default());
        info!(user = %session.user_id(), "opening realtime channel");

        let socket = match self.transport.open(session.user_id()) {
            Ok(socket) => socket,
            Err(e) => {
                warn!(error = %e, "could not construct realtime transport");
                self.shared.state_tx.send_replace(ChannelState::Failed);
                self.shared
                    .health_tx
                    .send_replace(ConnectionHealth::down(INIT_FAILED));
                let _ = self
                    .shared
                    .event_tx
                    .send(ChannelEvent::ConnectError(e.to_string()));
                return;
            }
        };

        let cancel = CancellationToken::new();
        let pump = tokio::spawn(pump_events(
            self.shared.clone(),
            socket.events,
            socket.control.clone(),
            cancel.clone(),
        ));
        *live = Some(LiveChannel {
            cancel,
            control: socket.control,
            pump,
        });
    }

    /// Close the channel: pump stopped, socket closed, state reset to
    /// `Disconnected` with no recorded error.
    pub async fn disconnect(&self) {
        let mut live = self.live.lock().await;
        Self::teardown(&mut live).await;
        self.shared
            .state_tx
            .send_replace(ChannelState::Disconnected);
        self.shared
            .health_tx
            .send_replace(ConnectionHealth::default());
        info!("realtime channel disconnected");
    }

    /// Stop the pump and release the socket. Waiting for the pump to
    /// finish guarantees the old channel's listeners are fully detached
    /// before a replacement can exist.
    async fn teardown(live: &mut Option<LiveChannel>) {
        if let Some(channel) = live.take() {
            channel.cancel.cancel();
            let _ = channel.control.try_send(SocketControl::Close);
            let _ = channel.pump.await;
            debug!("previous channel torn down");
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.shared.state_tx.borrow()
    }

    pub fn health(&self) -> ConnectionHealth {
        self.shared.health_tx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.health().connected
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state_tx.subscribe()
    }

    pub fn watch_health(&self) -> watch::Receiver<ConnectionHealth> {
        self.shared.health_tx.subscribe()
    }

    /// Subscribe to the channel event fan-out (presence tracker,
    /// conversation subscription).
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.shared.event_tx.subscribe()
    }
}

/// Fold transport events into observable state and re-broadcast them.
async fn pump_events(
    shared: Arc<Shared>,
    mut events: mpsc::Receiver<ChannelEvent>,
    control: mpsc::Sender<SocketControl>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                apply(&shared, &control, event).await;
            }
        }
    }
}

async fn apply(shared: &Shared, control: &mpsc::Sender<SocketControl>, event: ChannelEvent) {
    match &event {
        ChannelEvent::Connected => {
            info!("channel connected");
            shared.state_tx.send_replace(ChannelState::Connected);
            shared.health_tx.send_replace(ConnectionHealth::up());
        }
        ChannelEvent::Disconnected(reason) => {
            shared.health_tx.send_modify(|h| h.connected = false);
            if reason.is_server_initiated() {
                // The server hung up on purpose; the transport will not
                // retry this on its own, so ask it to.
                info!("server closed the channel, requesting reconnect");
                shared.state_tx.send_replace(ChannelState::Reconnecting);
                let _ = control.send(SocketControl::Reconnect).await;
            } else {
                debug!(?reason, "channel dropped, transport retry policy takes over");
            }
        }
        ChannelEvent::ConnectError(err) => {
            warn!(error = %err, "channel connect error");
            shared
                .health_tx
                .send_replace(ConnectionHealth::down(CONNECT_FAILED));
        }
        ChannelEvent::Reconnected { attempt } => {
            // Reconnection success resets any recorded error.
            info!(attempt, "channel reconnected");
            shared.state_tx.send_replace(ChannelState::Connected);
            shared.health_tx.send_replace(ConnectionHealth::up());
        }
        ChannelEvent::ReconnectError(err) => {
            warn!(error = %err, "reconnect attempt failed");
            shared.state_tx.send_replace(ChannelState::Reconnecting);
            shared
                .health_tx
                .send_replace(ConnectionHealth::down(RECONNECT_FAILED));
        }
        ChannelEvent::ReconnectFailed => {
            error!("channel retry budget exhausted");
            shared.state_tx.send_replace(ChannelState::Failed);
            shared
                .health_tx
                .send_replace(ConnectionHealth::down(RECONNECT_GAVE_UP));
        }
        ChannelEvent::PresenceSnapshot(_) | ChannelEvent::Message(_) => {}
    }

    // Fan out to the presence tracker and the conversation
    // subscription. A send error just means nobody is listening yet.
    let _ = shared.event_tx.send(event);
}
