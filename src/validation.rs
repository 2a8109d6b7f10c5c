//! Pure validation helpers.
//!
//! Everything here is synchronous and side-effect free: amount bounds, address and
//! token well-formedness, and fee-override sanity. Adapters run these before any
//! network call so that malformed input never reaches an RPC endpoint.

use crate::error::PaymentError;
use crate::network::{Network, NetworkFamily, supported_tokens};
use crate::types::{PaymentToken, TokenAmount, TokenRef};

/// Upper bound for caller-supplied gas limits. Anything above this is a typo, not a
/// payment: a simple transfer plus gateway bookkeeping fits in a small fraction of it.
const MAX_GAS_LIMIT: u64 = 10_000_000;

pub fn validate_amount(amount: TokenAmount) -> Result<(), PaymentError> {
    if amount.is_zero() {
        return Err(PaymentError::Validation(
            "Payment amount must be greater than 0".into(),
        ));
    }
    Ok(())
}

/// Checks that a string is a well-formed 0x-prefixed 20-byte hex address.
pub fn is_valid_evm_address(address: &str) -> bool {
    let Some(stripped) = address.strip_prefix("0x") else {
        return false;
    };
    stripped.len() == 40 && stripped.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Checks that a string is a well-formed base58-encoded 32-byte Solana address.
pub fn is_valid_solana_address(address: &str) -> bool {
    match bs58::decode(address).into_vec() {
        Ok(bytes) => bytes.len() == 32,
        Err(_) => false,
    }
}

/// Checks that a token reference is structurally usable on the given network:
/// ERC-20 addresses belong to EVM networks, SPL mints to Solana. Native is fine
/// everywhere.
pub fn validate_token_ref(token: &TokenRef, network: Network) -> Result<(), PaymentError> {
    match (token, network.family()) {
        (TokenRef::Native, _) => Ok(()),
        (TokenRef::Erc20(_), NetworkFamily::Evm) => Ok(()),
        (TokenRef::Spl(_), NetworkFamily::Solana) => Ok(()),
        (token, _) => Err(PaymentError::Validation(format!(
            "Token {token} is not valid on {network}"
        ))),
    }
}

/// Checks that a [`PaymentToken`] is coherent and known on its network.
pub fn validate_token(token: &PaymentToken) -> Result<(), PaymentError> {
    validate_token_ref(&token.address, token.network)?;
    let known = supported_tokens(token.network)
        .iter()
        .any(|candidate| candidate == token);
    if !known {
        return Err(PaymentError::Validation(format!(
            "Token {} ({}) is not supported on {}",
            token.symbol, token.address, token.network
        )));
    }
    Ok(())
}

/// Sanity-checks caller-supplied gas overrides on the EVM path.
pub fn validate_gas_limit(gas_limit: Option<u64>) -> Result<(), PaymentError> {
    match gas_limit {
        Some(0) => Err(PaymentError::Validation("Gas limit must not be 0".into())),
        Some(limit) if limit > MAX_GAS_LIMIT => Err(PaymentError::Validation(format!(
            "Gas limit {limit} exceeds the maximum of {MAX_GAS_LIMIT}"
        ))),
        _ => Ok(()),
    }
}
