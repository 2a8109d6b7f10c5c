//! Chain adapters: the uniform payment contract over heterogeneous chains.
//!
//! Every chain an orchestrator can settle on is driven through [`ChainAdapter`],
//! regardless of how different the underlying stacks are. The contract has three
//! load-bearing guarantees:
//!
//! - `is_token_supported` never fails. Any probe error means "not supported".
//! - `pay_with_token` marks the session FAILED (with the error message stored on
//!   the record) before returning the error, so callers and other tabs see the
//!   failure even if the returned error is dropped.
//! - Submission acceptance is not confirmation. A successful submission moves the
//!   session to PROCESSING with a provisional transaction hash; only an observed
//!   on-chain event or finalized commitment moves it to CONFIRMED.
//!
//! Adapters are parameterized over a narrow gateway trait at the RPC boundary
//! ([`evm::EvmGateway`], [`solana::SolanaGateway`]) so the orchestration logic is
//! testable without a node.

pub mod evm;
pub mod solana;

pub use evm::{AlloyGateway, EvmPaymentAdapter};
pub use solana::{SolanaPaymentAdapter, SolanaRpcGateway};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PaymentError;
use crate::network::Network;
use crate::types::{SessionId, TokenAmount, TokenRef, TransactionHash};

/// Caller-supplied overrides for a single payment submission. All fields default
/// to "let the node decide". Fee overrides only apply on the EVM path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaymentOptions {
    pub gas_limit: Option<u64>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub nonce: Option<u64>,
}

/// A gateway `PaymentReceived` observation, already decoded into domain types.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentReceivedEvent {
    /// Address of the account that paid, chain-native string form.
    pub payer: String,
    pub token: TokenRef,
    pub amount: TokenAmount,
    pub service_type: String,
    pub session_id: SessionId,
    pub tx_hash: TransactionHash,
}

/// Uniform payment surface over one network.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn network(&self) -> Network;

    /// Whether the gateway accepts this token. Infallible: probe failures of any
    /// kind, including transport errors, report `false`.
    async fn is_token_supported(&self, token: &TokenRef) -> bool;

    /// Submits the payment for an existing session.
    ///
    /// On acceptance the session moves to PROCESSING and the provisional
    /// transaction hash is recorded; the returned hash is the same provisional
    /// one. On any failure the session is marked FAILED first, then the error is
    /// returned.
    async fn pay_with_token(
        &self,
        session_id: &SessionId,
        options: &PaymentOptions,
    ) -> Result<TransactionHash, PaymentError>;
}
