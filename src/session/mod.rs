//! Payment session aggregate and lifecycle management.
//!
//! A [`PaymentSession`] is one attempt to pay for one service using one
//! network/token/amount combination. Sessions are volatile and tab-scoped: they live
//! in an in-memory [`store::SessionStore`] and are never persisted. The
//! [`manager::SessionManager`] is the only mutator and enforces the state machine:
//!
//! ```text
//! PENDING --(submission starts)--> PROCESSING
//! PENDING --(no progress within the timeout)--> TIMEOUT
//! PROCESSING --(on-chain confirmation observed)--> CONFIRMED
//! PROCESSING --(submission/confirmation error)--> FAILED
//! TIMEOUT --(retry, below limit)--> PENDING
//! TIMEOUT --(retry, at limit)--> FAILED
//! ```
//!
//! CONFIRMED, FAILED, and EXPIRED are terminal.

pub mod manager;
pub mod store;

pub use manager::{SessionConfig, SessionManager};
pub use store::SessionStore;

use serde::{Deserialize, Serialize};

use crate::network::Network;
use crate::timestamp::UnixMillis;
use crate::types::{PaymentToken, SessionId, TokenAmount, TransactionHash};

/// How long a session may sit in PENDING before timing out.
///
/// Deliberately short: this window covers only the "submission acknowledged" phase,
/// not full on-chain confirmation latency.
pub const TIMEOUT_MS: u64 = 10_000;

/// Maximum number of payment retries per session.
pub const RETRY_LIMIT: u32 = 3;

pub(crate) const TIMEOUT_EXCEEDED: &str = "Payment timeout exceeded";
pub(crate) const RETRY_LIMIT_EXCEEDED: &str = "Retry limit exceeded";

/// Lifecycle status of a payment session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Confirmed,
    Failed,
    Expired,
    Timeout,
}

impl PaymentStatus {
    /// Priority used by cross-tab reconciliation: an incoming status is applied only
    /// if it outranks the local one, so a stale PENDING broadcast can never clobber
    /// an observed terminal result.
    pub fn priority(&self) -> u8 {
        match self {
            PaymentStatus::Pending => 0,
            PaymentStatus::Processing => 1,
            PaymentStatus::Confirmed
            | PaymentStatus::Failed
            | PaymentStatus::Expired
            | PaymentStatus::Timeout => 2,
        }
    }

    /// Terminal statuses admit no further transitions. TIMEOUT is not terminal:
    /// an explicit retry may resurrect it to PENDING.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Confirmed | PaymentStatus::Failed | PaymentStatus::Expired
        )
    }
}

/// The central aggregate: one payment attempt and its bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
    pub id: SessionId,
    /// Opaque caller identity. Not authenticated by this subsystem.
    pub user_id: String,
    pub network: Network,
    pub token: PaymentToken,
    pub amount: TokenAmount,
    /// Opaque tag describing what is being purchased.
    pub service_type: String,
    pub status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TransactionHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: UnixMillis,
    pub updated_at: UnixMillis,
    pub expires_at: UnixMillis,
    pub retry_count: u32,
}

impl PaymentSession {
    pub fn is_expired(&self, now: UnixMillis) -> bool {
        self.expires_at < now
    }
}

/// Partial session update, as carried by SESSION_UPDATE sync messages and applied
/// by [`manager::SessionManager::update_session`]. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PaymentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TransactionHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&PaymentSession> for SessionPatch {
    fn from(session: &PaymentSession) -> Self {
        SessionPatch {
            status: Some(session.status),
            tx_hash: session.tx_hash.clone(),
            error: session.error.clone(),
        }
    }
}

impl SessionPatch {
    pub fn status(status: PaymentStatus) -> Self {
        SessionPatch {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn tx_hash(tx_hash: TransactionHash) -> Self {
        SessionPatch {
            tx_hash: Some(tx_hash),
            ..Default::default()
        }
    }
}

/// Value used by `create_session`; bundles the caller-supplied parts of a session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: String,
    pub amount: TokenAmount,
    pub token: PaymentToken,
    pub service_type: String,
}
