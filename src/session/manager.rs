//! Session manager: the public API over the session store.
//!
//! One manager per tab. It owns the [`SessionStore`], the per-session timeout
//! timers, and the tab's [`SyncService`](crate::sync::SyncService) endpoint, and it
//! is the only component that mutates session records. Chain adapters call back
//! into [`SessionManager::update_session_status`]; they never touch the store.

use serde::Deserialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::store::SessionStore;
use super::{
    NewSession, PaymentSession, PaymentStatus, RETRY_LIMIT, RETRY_LIMIT_EXCEEDED, SessionPatch,
    TIMEOUT_EXCEEDED, TIMEOUT_MS,
};
use crate::error::PaymentError;
use crate::monitor::PaymentMonitor;
use crate::sync::{SyncChannel, SyncService};
use crate::timestamp::UnixMillis;
use crate::types::{SessionId, TransactionHash};
use crate::validation;

/// Tunables for the session lifecycle.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SessionConfig {
    /// PENDING-phase timeout in milliseconds.
    #[serde(default = "session_defaults::timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum payment retries per session.
    #[serde(default = "session_defaults::retry_limit")]
    pub retry_limit: u32,
}

mod session_defaults {
    pub fn timeout_ms() -> u64 {
        super::TIMEOUT_MS
    }
    pub fn retry_limit() -> u32 {
        super::RETRY_LIMIT
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: TIMEOUT_MS,
            retry_limit: RETRY_LIMIT,
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

pub(crate) struct ManagerInner {
    pub(crate) store: SessionStore,
    pub(crate) sync: SyncService,
    monitor: Option<Arc<PaymentMonitor>>,
    config: SessionConfig,
}

/// Cheaply cloneable handle to one tab's session state.
///
/// Explicitly constructed and injected; several managers may share one
/// [`SyncChannel`], which is how multi-tab behavior is exercised in tests.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(config: SessionConfig, channel: &SyncChannel) -> Self {
        Self::with_monitor(config, channel, None)
    }

    pub fn with_monitor(
        config: SessionConfig,
        channel: &SyncChannel,
        monitor: Option<Arc<PaymentMonitor>>,
    ) -> Self {
        let inner = Arc::new(ManagerInner {
            store: SessionStore::new(),
            sync: SyncService::new(channel),
            monitor,
            config,
        });
        // The receive loop holds a Weak reference: the sync service must never keep
        // a dropped manager alive, and close() must not call back into the manager.
        inner.sync.attach(Arc::downgrade(&inner));
        SessionManager { inner }
    }

    pub(crate) fn from_inner(inner: Arc<ManagerInner>) -> Self {
        SessionManager { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ManagerInner> {
        Arc::downgrade(&self.inner)
    }

    /// Creates a PENDING session, arms its timeout timer, and broadcasts the creation.
    pub fn create_session(&self, new_session: NewSession) -> Result<PaymentSession, PaymentError> {
        validation::validate_amount(new_session.amount)?;
        validation::validate_token_ref(&new_session.token.address, new_session.token.network)?;

        let now = UnixMillis::now();
        let session = PaymentSession {
            id: SessionId::random(),
            user_id: new_session.user_id,
            network: new_session.token.network,
            token: new_session.token,
            amount: new_session.amount,
            service_type: new_session.service_type,
            status: PaymentStatus::Pending,
            tx_hash: None,
            error: None,
            created_at: now,
            updated_at: now,
            expires_at: now + self.inner.config.timeout_ms,
            retry_count: 0,
        };
        self.inner.store.insert(session.clone());
        self.arm_timer(&session.id);
        self.inner
            .sync
            .publish_update(&session.id, SessionPatch::from(&session));
        if let Some(monitor) = &self.inner.monitor {
            monitor.record_created(&session);
        }
        info!(
            session_id = %session.id,
            network = %session.network,
            amount = %session.amount,
            service_type = %session.service_type,
            "Created payment session"
        );
        Ok(session)
    }

    pub fn get_session(&self, id: &SessionId) -> Option<PaymentSession> {
        self.inner.store.get(id)
    }

    pub fn get_sessions(&self) -> Vec<PaymentSession> {
        self.inner.store.snapshot()
    }

    /// Moves a session to `status`, stamping `updated_at` and recording the
    /// transaction hash or error when given. Any non-PENDING status cancels the
    /// timeout timer in the same atomic step. Broadcasts the update.
    pub fn update_session_status(
        &self,
        id: &SessionId,
        status: PaymentStatus,
        tx_hash: Option<TransactionHash>,
        error: Option<String>,
    ) -> Result<PaymentSession, PaymentError> {
        let now = UnixMillis::now();
        let updated = self
            .inner
            .store
            .with_session_mut(id, |session, timer| {
                session.status = status;
                if tx_hash.is_some() {
                    session.tx_hash = tx_hash.clone();
                }
                match (&error, status) {
                    (Some(_), _) => session.error = error.clone(),
                    // A confirmation supersedes any stale failure text.
                    (None, PaymentStatus::Confirmed) => session.error = None,
                    (None, _) => {}
                }
                session.updated_at = session.updated_at.max(now);
                if status != PaymentStatus::Pending {
                    if let Some(handle) = timer.take() {
                        handle.abort();
                    }
                }
                session.clone()
            })
            .ok_or_else(|| PaymentError::session_not_found(id))?;

        debug!(session_id = %id, status = ?status, "Session status updated");
        self.inner
            .sync
            .publish_update(id, SessionPatch::from(&updated));
        self.notify_monitor(&updated);
        Ok(updated)
    }

    /// Applies a partial update without forcing a status transition. Used for
    /// provisional data such as the transaction hash recorded at submission time.
    pub fn update_session(
        &self,
        id: &SessionId,
        patch: SessionPatch,
    ) -> Result<PaymentSession, PaymentError> {
        let now = UnixMillis::now();
        let updated = self
            .inner
            .store
            .with_session_mut(id, |session, timer| {
                if let Some(status) = patch.status {
                    session.status = status;
                    if status != PaymentStatus::Pending {
                        if let Some(handle) = timer.take() {
                            handle.abort();
                        }
                    }
                }
                if patch.tx_hash.is_some() {
                    session.tx_hash = patch.tx_hash.clone();
                }
                if patch.error.is_some() {
                    session.error = patch.error.clone();
                }
                session.updated_at = session.updated_at.max(now);
                session.clone()
            })
            .ok_or_else(|| PaymentError::session_not_found(id))?;

        self.inner
            .sync
            .publish_update(id, SessionPatch::from(&updated));
        Ok(updated)
    }

    /// Restarts the payment flow for a session.
    ///
    /// Returns `true` and resets the session to PENDING (fresh deadline, fresh
    /// timer, error cleared) while under the retry limit. At the limit the session
    /// is forced to FAILED and `false` is returned.
    pub fn retry_payment(&self, id: &SessionId) -> Result<bool, PaymentError> {
        let now = UnixMillis::now();
        let retry_limit = self.inner.config.retry_limit;
        let timeout_ms = self.inner.config.timeout_ms;
        let (retried, updated) = self
            .inner
            .store
            .with_session_mut(id, |session, timer| {
                if let Some(handle) = timer.take() {
                    handle.abort();
                }
                if session.retry_count >= retry_limit {
                    session.status = PaymentStatus::Failed;
                    session.error = Some(RETRY_LIMIT_EXCEEDED.to_string());
                    session.updated_at = session.updated_at.max(now);
                    (false, session.clone())
                } else {
                    session.retry_count += 1;
                    session.status = PaymentStatus::Pending;
                    session.error = None;
                    session.expires_at = now + timeout_ms;
                    session.updated_at = session.updated_at.max(now);
                    (true, session.clone())
                }
            })
            .ok_or_else(|| PaymentError::session_not_found(id))?;

        if retried {
            self.arm_timer(id);
            info!(
                session_id = %id,
                retry_count = updated.retry_count,
                "Retrying payment session"
            );
        } else {
            warn!(session_id = %id, "Retry limit exceeded, session failed");
        }
        self.inner
            .sync
            .publish_update(id, SessionPatch::from(&updated));
        self.notify_monitor(&updated);
        Ok(retried)
    }

    /// Removes a session (cancelling its timer) and broadcasts the cleanup.
    pub fn cleanup_session(&self, id: &SessionId) {
        if self.inner.store.remove(id).is_some() {
            self.inner.sync.publish_cleanup(id);
            debug!(session_id = %id, "Session cleaned up");
        }
    }

    /// Removes sessions whose deadline has passed and that are no longer live.
    pub fn cleanup_expired(&self) {
        let now = UnixMillis::now();
        for session in self.inner.store.snapshot() {
            let resolved = session.status.is_terminal() || session.status == PaymentStatus::Timeout;
            if resolved && session.is_expired(now) {
                self.cleanup_session(&session.id);
            }
        }
    }

    /// Tears everything down: all timers cancelled, store emptied, and the sync
    /// endpoint closed through its narrow `close()` so no callback can re-enter
    /// this cleanup.
    pub fn cleanup(&self) {
        self.inner.store.clear();
        self.inner.sync.close();
    }

    /// Re-broadcasts every local PENDING session. Called when a backgrounded tab
    /// becomes visible again. Sessions that already progressed are not
    /// re-announced: a tab that timed out locally while backgrounded must not
    /// push that outcome into peers still processing the payment.
    pub fn handle_visibility_change(&self) {
        for session in self.inner.store.snapshot() {
            if session.status != PaymentStatus::Pending {
                continue;
            }
            self.inner
                .sync
                .publish_update(&session.id, SessionPatch::from(&session));
        }
    }

    /// Installs a session without arming a timer or broadcasting, to set up
    /// multi-tab scenarios.
    #[cfg(test)]
    pub(crate) fn adopt_session(&self, session: PaymentSession) {
        self.inner.store.insert(session);
    }

    /// Applies an incoming SESSION_UPDATE from another tab.
    ///
    /// The patch status is adopted only when it outranks the local status; sessions
    /// unknown to this tab are ignored. Never re-broadcast, to avoid echo storms.
    pub(crate) fn apply_remote_update(
        &self,
        id: &SessionId,
        patch: SessionPatch,
        message_timestamp: UnixMillis,
    ) {
        let applied = self
            .inner
            .store
            .with_session_mut(id, |session, timer| {
                let Some(status) = patch.status else {
                    return None;
                };
                if status.priority() <= session.status.priority() {
                    return None;
                }
                session.status = status;
                if patch.tx_hash.is_some() {
                    session.tx_hash = patch.tx_hash.clone();
                }
                if patch.error.is_some() {
                    session.error = patch.error.clone();
                }
                session.updated_at = session.updated_at.max(message_timestamp);
                if status != PaymentStatus::Pending {
                    if let Some(handle) = timer.take() {
                        handle.abort();
                    }
                }
                Some(session.clone())
            })
            .flatten();

        if let Some(session) = applied {
            debug!(session_id = %id, status = ?session.status, "Adopted remote session update");
            self.notify_monitor(&session);
        }
    }

    /// Applies an incoming SESSION_CLEANUP from another tab. The session is removed
    /// only if it is actually expired, so a late cleanup message cannot delete a
    /// session that was concurrently retried (a retry refreshes `expires_at`).
    /// Returns whether the session was removed.
    pub(crate) fn apply_remote_cleanup(&self, id: &SessionId) -> bool {
        let now = UnixMillis::now();
        match self.inner.store.get(id) {
            Some(session) if session.is_expired(now) => {
                self.inner.store.remove(id);
                debug!(session_id = %id, "Adopted remote session cleanup");
                true
            }
            _ => false,
        }
    }

    /// Arms the timeout timer for a session, replacing any prior timer.
    fn arm_timer(&self, id: &SessionId) {
        let weak = self.downgrade();
        let session_id = id.clone();
        let timeout = self.inner.config.timeout();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                SessionManager::from_inner(inner).fire_timeout(&session_id);
            }
        });
        self.inner.store.set_timer(id, handle.abort_handle());
    }

    /// Timer callback. The status check and the transition happen under the entry
    /// lock, so a concurrent `update_session_status` cannot race this into firing
    /// TIMEOUT against an already-resolved session.
    fn fire_timeout(&self, id: &SessionId) {
        let now = UnixMillis::now();
        let timed_out = self
            .inner
            .store
            .with_session_mut(id, |session, timer| {
                // The firing task's own handle; nothing left to cancel.
                timer.take();
                if session.status != PaymentStatus::Pending {
                    return None;
                }
                session.status = PaymentStatus::Timeout;
                session.error = Some(TIMEOUT_EXCEEDED.to_string());
                session.updated_at = session.updated_at.max(now);
                Some(session.clone())
            })
            .flatten();

        if let Some(session) = timed_out {
            warn!(session_id = %id, "Payment session timed out");
            self.inner
                .sync
                .publish_update(id, SessionPatch::from(&session));
            self.notify_monitor(&session);
        }
    }

    fn notify_monitor(&self, session: &PaymentSession) {
        if let Some(monitor) = &self.inner.monitor {
            monitor.observe_transition(session);
        }
    }
}
