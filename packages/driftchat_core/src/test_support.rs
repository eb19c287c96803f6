//! Programmable fakes for exercising the core without a backend.
//!
//! [`MockTransport`] stands in for the WebSocket driver: tests push
//! [`ChannelEvent`]s by hand and inspect the control commands the
//! manager issues. [`MockApi`] is a scriptable [`MessageApi`] with
//! per-endpoint failure switches and gates that hold a request open so
//! in-flight races can be arranged deterministically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use reqwest::StatusCode;
use tokio::sync::{Semaphore, mpsc, watch};

use crate::api::MessageApi;
use crate::channel::{ChannelEvent, ChannelSocket, ChannelTransport, SocketControl};
use crate::error::{ApiError, TransportError};
use crate::model::{Message, SendPayload, UserId, UserProfile};

// -- transport --

/// A transport whose "wire" is the test itself.
pub struct MockTransport {
    fail: bool,
    opens: AtomicU32,
    event_tx: Mutex<Option<mpsc::Sender<ChannelEvent>>>,
    control_rx: Mutex<Option<mpsc::Receiver<SocketControl>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            opens: AtomicU32::new(0),
            event_tx: Mutex::new(None),
            control_rx: Mutex::new(None),
        })
    }

    /// A transport whose `open` always fails.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            opens: AtomicU32::new(0),
            event_tx: Mutex::new(None),
            control_rx: Mutex::new(None),
        })
    }

    /// How many times `open` has been called.
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Push an event onto the most recently opened socket.
    pub async fn emit(&self, event: ChannelEvent) {
        let tx = self
            .event_tx
            .lock()
            .unwrap()
            .clone()
            .expect("no socket has been opened");
        tx.send(event).await.expect("event receiver dropped");
    }

    /// Take the control receiver of the most recently opened socket.
    pub fn take_control(&self) -> mpsc::Receiver<SocketControl> {
        self.control_rx
            .lock()
            .unwrap()
            .take()
            .expect("control receiver already taken or never opened")
    }
}

impl ChannelTransport for MockTransport {
    fn open(&self, _session_id: &str) -> Result<ChannelSocket, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(TransportError::InvalidUrl(
                "mock transport configured to fail".to_string(),
            ));
        }
        let (event_tx, events) = mpsc::channel(64);
        let (control_tx, control_rx) = mpsc::channel(8);
        *self.event_tx.lock().unwrap() = Some(event_tx);
        *self.control_rx.lock().unwrap() = Some(control_rx);
        Ok(ChannelSocket {
            events,
            control: control_tx,
        })
    }
}

// -- api --

/// Holds one endpoint's requests open until released, and reports when
/// a request has reached the gate.
struct Gate {
    held: AtomicBool,
    permits: Arc<Semaphore>,
    started: watch::Sender<u32>,
}

impl Gate {
    fn new() -> Self {
        let (started, _) = watch::channel(0);
        Self {
            held: AtomicBool::new(false),
            permits: Arc::new(Semaphore::new(0)),
            started,
        }
    }

    fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.permits.add_permits(64);
    }

    async fn wait_started(&self) {
        let mut rx = self.started.subscribe();
        rx.wait_for(|n| *n > 0)
            .await
            .expect("gate watch closed");
    }

    /// Called from inside the request: mark it started, then block if
    /// the gate is held.
    async fn pass(&self) {
        self.started.send_modify(|n| *n += 1);
        if self.held.load(Ordering::SeqCst) {
            let permits = self.permits.clone();
            permits
                .acquire()
                .await
                .expect("gate semaphore closed")
                .forget();
        }
    }
}

/// Scriptable in-memory [`MessageApi`].
pub struct MockApi {
    self_id: String,
    partners: Mutex<Vec<UserProfile>>,
    histories: Mutex<HashMap<String, Vec<Message>>>,
    history_error: Mutex<Option<String>>,
    history_gate: Gate,
    send_error: Mutex<Option<String>>,
    send_gate: Gate,
    send_calls: AtomicU32,
    online: Mutex<Vec<UserId>>,
    online_fail: AtomicBool,
    online_calls: AtomicU32,
}

impl MockApi {
    pub fn new(self_id: &str) -> Arc<Self> {
        Arc::new(Self {
            self_id: self_id.to_string(),
            partners: Mutex::new(Vec::new()),
            histories: Mutex::new(HashMap::new()),
            history_error: Mutex::new(None),
            history_gate: Gate::new(),
            send_error: Mutex::new(None),
            send_gate: Gate::new(),
            send_calls: AtomicU32::new(0),
            online: Mutex::new(Vec::new()),
            online_fail: AtomicBool::new(false),
            online_calls: AtomicU32::new(0),
        })
    }

    pub fn set_partners(&self, partners: Vec<UserProfile>) {
        *self.partners.lock().unwrap() = partners;
    }

    pub fn set_history(&self, peer_id: &str, messages: Vec<Message>) {
        self.histories
            .lock()
            .unwrap()
            .insert(peer_id.to_string(), messages);
    }

    pub fn fail_history(&self, message: &str) {
        *self.history_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn hold_history(&self) {
        self.history_gate.hold();
    }

    pub async fn wait_history_started(&self) {
        self.history_gate.wait_started().await;
    }

    pub fn release_history(&self) {
        self.history_gate.release();
    }

    pub fn fail_sends(&self, message: &str) {
        *self.send_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn hold_sends(&self) {
        self.send_gate.hold();
    }

    pub async fn wait_send_started(&self) {
        self.send_gate.wait_started().await;
    }

    pub fn release_sends(&self) {
        self.send_gate.release();
    }

    pub fn send_calls(&self) -> u32 {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn set_online_users(&self, users: Vec<UserId>) {
        *self.online.lock().unwrap() = users;
    }

    pub fn fail_online_users(&self) {
        self.online_fail.store(true, Ordering::SeqCst);
    }

    pub fn online_calls(&self) -> u32 {
        self.online_calls.load(Ordering::SeqCst)
    }

    fn server_error(message: &str) -> ApiError {
        ApiError::Server {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.to_string(),
        }
    }
}

impl MessageApi for MockApi {
    fn list_partners(&self) -> BoxFuture<'_, Result<Vec<UserProfile>, ApiError>> {
        Box::pin(async move { Ok(self.partners.lock().unwrap().clone()) })
    }

    fn list_messages<'a>(
        &'a self,
        peer_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Message>, ApiError>> {
        Box::pin(async move {
            self.history_gate.pass().await;
            if let Some(message) = self.history_error.lock().unwrap().clone() {
                return Err(Self::server_error(&message));
            }
            Ok(self
                .histories
                .lock()
                .unwrap()
                .get(peer_id)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn send_message<'a>(
        &'a self,
        peer_id: &'a str,
        payload: &'a SendPayload,
    ) -> BoxFuture<'a, Result<Message, ApiError>> {
        Box::pin(async move {
            let seq = self.send_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.send_gate.pass().await;
            if let Some(message) = self.send_error.lock().unwrap().clone() {
                return Err(Self::server_error(&message));
            }
            Ok(Message {
                id: format!("s{seq}"),
                sender_id: self.self_id.clone(),
                receiver_id: peer_id.to_string(),
                text: payload.text.clone(),
                image: payload.image.clone(),
                created_at: chrono::Utc::now(),
            })
        })
    }

    fn list_online_users(&self) -> BoxFuture<'_, Result<Vec<UserId>, ApiError>> {
        Box::pin(async move {
            self.online_calls.fetch_add(1, Ordering::SeqCst);
            if self.online_fail.load(Ordering::SeqCst) {
                return Err(Self::server_error("Failed to fetch online users"));
            }
            Ok(self.online.lock().unwrap().clone())
        })
    }
}
