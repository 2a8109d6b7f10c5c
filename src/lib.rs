//! Payment session orchestration for multi-chain crypto payments.
//!
//! This crate coordinates the lifecycle of a payment from "user clicked pay" to an
//! observed on-chain confirmation, across EVM chains (Ethereum, BNB Smart Chain,
//! Polygon) and Solana.
//!
//! # Overview
//!
//! A payment is modeled as a [`session::PaymentSession`]: one attempt to pay for
//! one service with one token on one network. Sessions move through a small state
//! machine (PENDING, PROCESSING, CONFIRMED, FAILED, EXPIRED, TIMEOUT) enforced by
//! the [`session::SessionManager`], with a hard PENDING-phase timeout and a bounded
//! retry counter. Submission acceptance never equals success: only an observed
//! chain event or commitment moves a session to CONFIRMED.
//!
//! Multiple frontend tabs each run their own manager; managers sharing a
//! [`sync::SyncChannel`] broadcast session updates to each other and reconcile by
//! message timestamp and status priority, so a terminal result observed in one tab
//! wins everywhere.
//!
//! # Modules
//!
//! - [`session`] — The session aggregate, its state machine, store, and manager.
//! - [`sync`] — Cross-tab broadcast of session updates and the reconciliation rules.
//! - [`adapter`] — The uniform [`adapter::ChainAdapter`] contract and its EVM and
//!   Solana implementations.
//! - [`network`] — Network definitions, per-network constants, and known tokens.
//! - [`retry`] — Exponential-backoff retry for transient RPC failures.
//! - [`monitor`] — Passive payment health aggregation.
//! - [`validation`] — Pure input validation helpers.
//! - [`config`] — Explicit dependency-injected configuration.
//! - [`error`] — The [`error::PaymentError`] taxonomy driving retry decisions.
//! - [`types`] — Shared value objects: ids, addresses, amounts, hashes.
//! - [`timestamp`] — Millisecond Unix timestamps for lifecycle bookkeeping.

pub mod adapter;
pub mod config;
pub mod error;
pub mod monitor;
pub mod network;
pub mod retry;
pub mod session;
pub mod sync;
pub mod telemetry;
pub mod timestamp;
pub mod types;
pub mod validation;

pub use adapter::{ChainAdapter, PaymentOptions};
pub use error::{PaymentError, PaymentErrorKind};
pub use network::{Network, NetworkFamily, supported_tokens};
pub use session::{
    NewSession, PaymentSession, PaymentStatus, SessionConfig, SessionManager, SessionPatch,
};
pub use sync::SyncChannel;
pub use types::{PaymentToken, SessionId, TokenAmount, TokenRef, TransactionHash};
