//! Cross-tab session synchronization.
//!
//! Each tab owns a [`SyncService`] endpoint attached to a shared [`SyncChannel`].
//! Local mutations are broadcast as [`SyncMessage`]s; incoming messages are
//! reconciled against local state with two guards, applied in order:
//!
//! 1. a per-session timestamp guard drops messages older than the newest one
//!    already processed for that session, and
//! 2. status-priority reconciliation (see
//!    [`PaymentStatus::priority`](crate::session::PaymentStatus::priority)) rejects
//!    any status that does not outrank the local one.
//!
//! Remote updates are never re-broadcast, so two tabs can echo freely without
//! feedback loops. `close()` is deliberately narrow: it stops the endpoint and
//! nothing else, so teardown paths that go through it cannot recurse.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::session::SessionPatch;
use crate::session::manager::{ManagerInner, SessionManager};
use crate::timestamp::UnixMillis;
use crate::types::SessionId;

const CHANNEL_CAPACITY: usize = 256;

/// Discriminator of a [`SyncMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncMessageKind {
    SessionUpdate,
    SessionCleanup,
}

/// One broadcast message. `data` is present for SESSION_UPDATE and absent for
/// SESSION_CLEANUP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    #[serde(rename = "type")]
    pub kind: SyncMessageKind,
    pub session_id: SessionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<SessionPatch>,
    pub timestamp: UnixMillis,
    /// Endpoint identity used to drop self-delivered messages. Local bookkeeping,
    /// not part of the wire shape.
    #[serde(skip)]
    pub(crate) origin: u64,
}

/// The shared broadcast medium. Clone one channel into every manager that should
/// see the same traffic; managers on different channels are fully isolated.
#[derive(Clone)]
pub struct SyncChannel {
    sender: broadcast::Sender<SyncMessage>,
}

impl Default for SyncChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncChannel {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        SyncChannel { sender }
    }

    pub(crate) fn send(&self, message: SyncMessage) {
        // A send with no live receivers is not an error worth surfacing.
        let _ = self.sender.send(message);
    }

    fn subscribe(&self) -> broadcast::Receiver<SyncMessage> {
        self.sender.subscribe()
    }
}

/// One tab's endpoint on a [`SyncChannel`]: publishes local mutations and feeds
/// remote ones back into the owning manager.
pub struct SyncService {
    channel: SyncChannel,
    origin: u64,
    closed: AtomicBool,
    task: Mutex<Option<AbortHandle>>,
}

impl SyncService {
    pub(crate) fn new(channel: &SyncChannel) -> Self {
        SyncService {
            channel: channel.clone(),
            origin: rand::random(),
            closed: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Spawns the receive loop. The loop holds only a weak reference to the manager
    /// and exits as soon as the manager is dropped.
    pub(crate) fn attach(&self, manager: Weak<ManagerInner>) {
        let mut receiver = self.channel.subscribe();
        let origin = self.origin;
        let handle = tokio::spawn(async move {
            let mut last_seen: HashMap<SessionId, UnixMillis> = HashMap::new();
            loop {
                let message = match receiver.recv().await {
                    Ok(message) => message,
                    // Skipped messages are tolerable: later traffic for the same
                    // session reconciles by priority.
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Sync receiver lagged, messages dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if message.origin == origin {
                    continue;
                }
                if let Some(seen) = last_seen.get(&message.session_id) {
                    if message.timestamp < *seen {
                        trace!(session_id = %message.session_id, "Dropping stale sync message");
                        continue;
                    }
                }
                last_seen.insert(message.session_id.clone(), message.timestamp);

                let Some(inner) = manager.upgrade() else {
                    break;
                };
                let manager = SessionManager::from_inner(inner);
                match message.kind {
                    SyncMessageKind::SessionUpdate => {
                        if let Some(patch) = message.data {
                            manager.apply_remote_update(
                                &message.session_id,
                                patch,
                                message.timestamp,
                            );
                        }
                    }
                    SyncMessageKind::SessionCleanup => {
                        if manager.apply_remote_cleanup(&message.session_id) {
                            last_seen.remove(&message.session_id);
                        }
                    }
                }
            }
        });
        if let Ok(mut slot) = self.task.lock() {
            if let Some(previous) = slot.replace(handle.abort_handle()) {
                previous.abort();
            }
        }
    }

    pub(crate) fn publish_update(&self, session_id: &SessionId, patch: SessionPatch) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.channel.send(SyncMessage {
            kind: SyncMessageKind::SessionUpdate,
            session_id: session_id.clone(),
            data: Some(patch),
            timestamp: UnixMillis::now(),
            origin: self.origin,
        });
    }

    pub(crate) fn publish_cleanup(&self, session_id: &SessionId) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.channel.send(SyncMessage {
            kind: SyncMessageKind::SessionCleanup,
            session_id: session_id.clone(),
            data: None,
            timestamp: UnixMillis::now(),
            origin: self.origin,
        });
    }

    /// Stops publishing and receiving. Does nothing else: no store access, no
    /// callbacks, no broadcast, so any teardown sequence may call it at any point.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut slot) = self.task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        self.close();
    }
}
