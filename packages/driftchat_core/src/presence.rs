//! PresenceTracker: who is reachable in real time.
//!
//! Snapshots from the channel replace the set wholesale; there is no
//! merging or diffing. When the channel reports a connect error the
//! tracker falls back to the REST online-users endpoint, and on
//! fallback failure it clears the set rather than showing stale
//! "online" badges.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::MessageApi;
use crate::channel::ChannelEvent;
use crate::model::UserId;

/// The tracker's listener on the channel event fan-out.
struct AttachedTask {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct PresenceTracker {
    api: Arc<dyn MessageApi>,
    set_tx: watch::Sender<HashSet<UserId>>,
    attached: Mutex<Option<AttachedTask>>,
}

impl PresenceTracker {
    pub fn new(api: Arc<dyn MessageApi>) -> Self {
        let (set_tx, _) = watch::channel(HashSet::new());
        Self {
            api,
            set_tx,
            attached: Mutex::new(None),
        }
    }

    /// Start consuming channel events. Replaces any previous listener,
    /// so repeated connects never double-apply snapshots.
    pub async fn attach(&self, mut events: broadcast::Receiver<ChannelEvent>) {
        let mut attached = self.attached.lock().await;
        Self::stop(&mut attached).await;

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let api = self.api.clone();
        let set_tx = self.set_tx.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(ChannelEvent::PresenceSnapshot(ids)) => {
                            debug!(count = ids.len(), "presence snapshot");
                            set_tx.send_replace(ids.into_iter().collect());
                        }
                        Ok(ChannelEvent::ConnectError(_)) => {
                            fallback_fetch(api.as_ref(), &set_tx).await;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // Snapshots are total, so a lag only delays the
                            // next authoritative replacement.
                            warn!(skipped, "presence event stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
        *attached = Some(AttachedTask { cancel, task });
    }

    /// Stop consuming channel events. Idempotent.
    pub async fn detach(&self) {
        let mut attached = self.attached.lock().await;
        Self::stop(&mut attached).await;
    }

    async fn stop(attached: &mut Option<AttachedTask>) {
        if let Some(prev) = attached.take() {
            prev.cancel.cancel();
            let _ = prev.task.await;
        }
    }

    pub fn is_online(&self, peer_id: &str) -> bool {
        self.set_tx.borrow().contains(peer_id)
    }

    /// Number of online users, not counting the local session.
    pub fn online_count(&self, excluding_self: &str) -> usize {
        let set = self.set_tx.borrow();
        set.iter().filter(|id| id.as_str() != excluding_self).count()
    }

    pub fn snapshot(&self) -> HashSet<UserId> {
        self.set_tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<HashSet<UserId>> {
        self.set_tx.subscribe()
    }

    /// Empty the set. Called by the owning context when the channel is
    /// torn down; the tracker is the only component that mutates the
    /// presence set.
    pub fn clear(&self) {
        self.set_tx.send_replace(HashSet::new());
    }
}

/// Best-effort REST substitute for realtime presence. A failed fetch
/// clears the set; presence is never left stale.
async fn fallback_fetch(api: &dyn MessageApi, set_tx: &watch::Sender<HashSet<UserId>>) {
    match api.list_online_users().await {
        Ok(ids) => {
            debug!(count = ids.len(), "presence fallback fetch succeeded");
            set_tx.send_replace(ids.into_iter().collect());
        }
        Err(e) => {
            warn!(error = %e, "presence fallback fetch failed, clearing set");
            set_tx.send_replace(HashSet::new());
        }
    }
}
