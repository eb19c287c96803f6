//! Production channel transport over a WebSocket.
//!
//! The session identifies itself with a `userId` query parameter at
//! connect time. Server frames are JSON text tagged by `type`:
//!
//! ```text
//!   {"type":"online_users","userIds":["u1","u2"]}
//!   {"type":"new_message","message":{...}}
//! ```
//!
//! The driver owns the bounded retry budget: after a non-server-
//! initiated drop it redials on its own with capped exponential
//! backoff, reporting each outcome as an event. A server-initiated
//! close is different — the driver parks and waits for the manager to
//! explicitly request a reconnect.

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::channel::{
    ChannelEvent, ChannelSocket, ChannelTransport, DisconnectReason, SocketControl,
};
use crate::config::{RetryPolicy, SocketConfig};
use crate::error::TransportError;
use crate::model::{Message, UserId};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Frames the backend pushes over the channel.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    OnlineUsers { user_ids: Vec<UserId> },
    NewMessage { message: Message },
}

pub struct WsTransport {
    config: SocketConfig,
}

impl WsTransport {
    pub fn new(config: SocketConfig) -> Self {
        Self { config }
    }
}

impl ChannelTransport for WsTransport {
    fn open(&self, session_id: &str) -> Result<ChannelSocket, TransportError> {
        let url = format!("{}?userId={}", self.config.url, session_id);
        // Validate up front; this is the only construction failure.
        url.as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        let (event_tx, events) = mpsc::channel(64);
        let (control_tx, control_rx) = mpsc::channel(8);
        tokio::spawn(drive(url, self.config.retry(), event_tx, control_rx));
        Ok(ChannelSocket {
            events,
            control: control_tx,
        })
    }
}

/// Outcome of pumping a live connection.
enum PumpOutcome {
    /// Manager asked us to stop.
    Close,
    Dropped(DisconnectReason),
}

async fn drive(
    url: String,
    retry: RetryPolicy,
    events: mpsc::Sender<ChannelEvent>,
    mut control: mpsc::Receiver<SocketControl>,
) {
    debug!(%url, "socket driver starting");

    let mut stream = match dial(&url, &retry).await {
        Ok(stream) => {
            if events.send(ChannelEvent::Connected).await.is_err() {
                return;
            }
            stream
        }
        Err(error) => {
            if events.send(ChannelEvent::ConnectError(error)).await.is_err() {
                return;
            }
            match retry_loop(&url, &retry, &events, &mut control).await {
                Some(stream) => stream,
                None => return,
            }
        }
    };

    loop {
        let reason = match pump(&mut stream, &events, &mut control).await {
            PumpOutcome::Close => {
                let _ = stream.close(None).await;
                debug!("socket driver closed by manager");
                return;
            }
            PumpOutcome::Dropped(reason) => reason,
        };

        let server_initiated = reason.is_server_initiated();
        if events
            .send(ChannelEvent::Disconnected(reason))
            .await
            .is_err()
        {
            return;
        }

        if server_initiated {
            // Park until the manager explicitly re-requests connection.
            loop {
                match control.recv().await {
                    Some(SocketControl::Reconnect) => break,
                    Some(SocketControl::Close) | None => return,
                }
            }
        }

        match retry_loop(&url, &retry, &events, &mut control).await {
            Some(new_stream) => stream = new_stream,
            None => return,
        }
    }
}

/// Redial with capped exponential backoff until the budget runs out.
/// Returns the fresh stream, or `None` when closed or out of attempts.
async fn retry_loop(
    url: &str,
    retry: &RetryPolicy,
    events: &mpsc::Sender<ChannelEvent>,
    control: &mut mpsc::Receiver<SocketControl>,
) -> Option<WsStream> {
    for attempt in 1..=retry.max_attempts {
        let delay = retry.delay_for(attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            cmd = control.recv() => match cmd {
                // An explicit reconnect request skips the rest of the wait
                Some(SocketControl::Reconnect) => {}
                Some(SocketControl::Close) | None => return None,
            }
        }

        match dial(url, retry).await {
            Ok(stream) => {
                info!(attempt, "socket reconnected");
                if events
                    .send(ChannelEvent::Reconnected { attempt })
                    .await
                    .is_err()
                {
                    return None;
                }
                return Some(stream);
            }
            Err(error) => {
                warn!(attempt, %error, "reconnect attempt failed");
                if events
                    .send(ChannelEvent::ReconnectError(error))
                    .await
                    .is_err()
                {
                    return None;
                }
            }
        }
    }

    let _ = events.send(ChannelEvent::ReconnectFailed).await;
    None
}

async fn dial(url: &str, retry: &RetryPolicy) -> Result<WsStream, String> {
    match tokio::time::timeout(retry.connect_timeout, connect_async(url)).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("connect timed out".to_string()),
    }
}

/// Read frames until the link drops or the manager closes us.
async fn pump(
    stream: &mut WsStream,
    events: &mpsc::Sender<ChannelEvent>,
    control: &mut mpsc::Receiver<SocketControl>,
) -> PumpOutcome {
    loop {
        tokio::select! {
            cmd = control.recv() => match cmd {
                Some(SocketControl::Close) | None => return PumpOutcome::Close,
                // Already connected; nothing to re-request
                Some(SocketControl::Reconnect) => {}
            },
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    match serde_json::from_str::<ServerFrame>(text.as_str()) {
                        Ok(ServerFrame::OnlineUsers { user_ids }) => {
                            if events
                                .send(ChannelEvent::PresenceSnapshot(user_ids))
                                .await
                                .is_err()
                            {
                                return PumpOutcome::Close;
                            }
                        }
                        Ok(ServerFrame::NewMessage { message }) => {
                            if events.send(ChannelEvent::Message(message)).await.is_err() {
                                return PumpOutcome::Close;
                            }
                        }
                        Err(e) => debug!(error = %e, "ignoring unrecognized frame"),
                    }
                }
                // tungstenite answers pings internally
                Some(Ok(WsMessage::Close(_))) => {
                    return PumpOutcome::Dropped(DisconnectReason::ServerClosed);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return PumpOutcome::Dropped(DisconnectReason::TransportLost(e.to_string()));
                }
                None => {
                    return PumpOutcome::Dropped(DisconnectReason::TransportLost(
                        "stream ended".to_string(),
                    ));
                }
            },
        }
    }
}
