//! In-memory session store with per-session timeout timers.
//!
//! The store is the single source of truth within one tab. Each entry pairs the
//! session record with the abort handle of its timeout timer task, so that the
//! status check and the timer bookkeeping happen under one entry lock: a delayed
//! timer can never fire a spurious TIMEOUT against a session that has already
//! moved on, and arming a new timer always cancels the previous one.

use dashmap::DashMap;
use tokio::task::AbortHandle;

use super::PaymentSession;
use crate::types::SessionId;

struct SessionEntry {
    session: PaymentSession,
    timer: Option<AbortHandle>,
}

/// Map of session id to session record plus its timer handle.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<SessionId, SessionEntry>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: PaymentSession) {
        let id = session.id.clone();
        let entry = SessionEntry {
            session,
            timer: None,
        };
        if let Some(previous) = self.sessions.insert(id, entry) {
            if let Some(timer) = previous.timer {
                timer.abort();
            }
        }
    }

    pub fn get(&self, id: &SessionId) -> Option<PaymentSession> {
        self.sessions.get(id).map(|entry| entry.session.clone())
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of all sessions. Clones; safe to iterate without holding locks.
    pub fn snapshot(&self) -> Vec<PaymentSession> {
        self.sessions
            .iter()
            .map(|entry| entry.session.clone())
            .collect()
    }

    /// Runs `f` with mutable access to the session and its timer slot, atomically
    /// with respect to all other store operations on the same id. The closure must
    /// not call back into the store.
    pub fn with_session_mut<R>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&mut PaymentSession, &mut Option<AbortHandle>) -> R,
    ) -> Option<R> {
        let mut entry = self.sessions.get_mut(id)?;
        let entry = entry.value_mut();
        Some(f(&mut entry.session, &mut entry.timer))
    }

    /// Installs the timer handle for a session, aborting any prior timer.
    /// Exactly one timer per session at any time.
    pub fn set_timer(&self, id: &SessionId, handle: AbortHandle) {
        match self.sessions.get_mut(id) {
            Some(mut entry) => {
                if let Some(previous) = entry.value_mut().timer.replace(handle) {
                    previous.abort();
                }
            }
            // Session vanished between arming and installation; stop the orphan timer.
            None => handle.abort(),
        }
    }

    /// Removes a session, aborting its timer if one is armed.
    pub fn remove(&self, id: &SessionId) -> Option<PaymentSession> {
        let (_, entry) = self.sessions.remove(id)?;
        if let Some(timer) = entry.timer {
            timer.abort();
        }
        Some(entry.session)
    }

    /// Removes everything, aborting all timers.
    pub fn clear(&self) {
        self.sessions.retain(|_, entry| {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
            false
        });
    }
}
