//! Value objects shared across the payment orchestration core.
//!
//! The central aggregate ([`crate::session::PaymentSession`]) is composed from the
//! types here: opaque session identifiers, chain-flavored addresses, token references,
//! and exact token amounts. Amounts are `U256` throughout so that 18-decimal
//! fixed-point values are represented without loss.

use alloy_primitives::U256;
use rand::{Rng, rng};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use solana_pubkey::Pubkey;
use std::fmt;
use std::fmt::{Debug, Display};
use std::str::FromStr;

use crate::network::Network;

/// Opaque unique identifier of a payment session.
///
/// Generated once at session creation and never reused. The identifier also travels
/// on-chain as the correlation key of the gateway contract's `PaymentReceived` event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh random identifier.
    pub fn random() -> Self {
        let bytes: [u8; 16] = rng().random();
        SessionId(format!("ps-{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        SessionId(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        SessionId(value)
    }
}

/// An EVM address, wrapper around [`alloy_primitives::Address`].
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct EvmAddress(pub alloy_primitives::Address);

impl Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to decode EVM address")]
pub struct EvmAddressDecodingError;

impl FromStr for EvmAddress {
    type Err = EvmAddressDecodingError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address =
            alloy_primitives::Address::from_str(s).map_err(|_| EvmAddressDecodingError)?;
        Ok(Self(address))
    }
}

impl From<alloy_primitives::Address> for EvmAddress {
    fn from(address: alloy_primitives::Address) -> Self {
        EvmAddress(address)
    }
}

impl From<EvmAddress> for alloy_primitives::Address {
    fn from(address: EvmAddress) -> Self {
        address.0
    }
}

/// A Solana account address, wrapper around [`solana_pubkey::Pubkey`].
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
pub struct SolanaAddress(pub Pubkey);

impl Display for SolanaAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to decode Solana address")]
pub struct SolanaAddressDecodingError;

impl FromStr for SolanaAddress {
    type Err = SolanaAddressDecodingError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pubkey = Pubkey::from_str(s).map_err(|_| SolanaAddressDecodingError)?;
        Ok(Self(pubkey))
    }
}

impl From<Pubkey> for SolanaAddress {
    fn from(pubkey: Pubkey) -> Self {
        SolanaAddress(pubkey)
    }
}

impl Serialize for SolanaAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for SolanaAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Chain-flavored reference to the asset a session pays with.
///
/// EVM tokens are ERC-20 contract addresses, Solana tokens are SPL mints, and the
/// native currency of a chain (ETH, BNB, POL, SOL) has no on-chain asset address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "address", rename_all = "lowercase")]
pub enum TokenRef {
    /// The network's native currency.
    Native,
    /// An ERC-20/BEP-20 contract address.
    Erc20(EvmAddress),
    /// An SPL token mint.
    Spl(SolanaAddress),
}

impl TokenRef {
    pub fn is_native(&self) -> bool {
        matches!(self, TokenRef::Native)
    }
}

impl Display for TokenRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenRef::Native => write!(f, "native"),
            TokenRef::Erc20(address) => write!(f, "{address}"),
            TokenRef::Spl(mint) => write!(f, "{mint}"),
        }
    }
}

/// A token accepted for payment on a particular network.
///
/// Immutable value object. Two tokens are equal iff their address and network match;
/// symbol and decimals are descriptive metadata.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct PaymentToken {
    pub address: TokenRef,
    pub network: Network,
    pub symbol: String,
    pub decimals: u8,
}

impl PartialEq for PaymentToken {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.network == other.network
    }
}

/// An exact token amount in the token's smallest unit.
///
/// Backed by `U256`: a 1-token payment of an 18-decimal token is `10^18` and is
/// carried without rounding. Serialized as a decimal string to survive JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount(pub U256);

impl TokenAmount {
    pub const ZERO: TokenAmount = TokenAmount(U256::ZERO);

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Narrows to `u64` for chains whose amounts are 64-bit (Solana lamports and
    /// SPL base units). Fails for amounts beyond `u64::MAX`.
    pub fn try_as_u64(&self) -> Option<u64> {
        u64::try_from(self.0).ok()
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        TokenAmount(U256::from(value))
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        TokenAmount(value)
    }
}

impl FromStr for TokenAmount {
    type Err = alloy_primitives::ruint::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        U256::from_str_radix(s, 10).map(TokenAmount)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An on-chain transaction identifier: a 0x-prefixed hash on EVM chains, a base58
/// signature on Solana. Opaque to the session core; suitable for building a
/// block-explorer link once a session is CONFIRMED.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHash(String);

impl TransactionHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TransactionHash {
    fn from(value: &str) -> Self {
        TransactionHash(value.to_string())
    }
}

impl From<String> for TransactionHash {
    fn from(value: String) -> Self {
        TransactionHash(value)
    }
}

impl From<alloy_primitives::B256> for TransactionHash {
    fn from(hash: alloy_primitives::B256) -> Self {
        TransactionHash(format!("{hash}"))
    }
}

impl From<solana_signature::Signature> for TransactionHash {
    fn from(signature: solana_signature::Signature) -> Self {
        TransactionHash(signature.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::random();
        let b = SessionId::random();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("ps-"));
    }

    #[test]
    fn test_token_equality_ignores_metadata() {
        let address = TokenRef::Erc20(
            "0x1234567890123456789012345678901234567890"
                .parse()
                .unwrap(),
        );
        let a = PaymentToken {
            address,
            network: Network::Ethereum,
            symbol: "USDT".into(),
            decimals: 18,
        };
        let b = PaymentToken {
            symbol: "TETHER".into(),
            decimals: 6,
            ..a.clone()
        };
        assert_eq!(a, b);

        let c = PaymentToken {
            network: Network::Polygon,
            ..a.clone()
        };
        assert_ne!(a, c);
    }

    #[test]
    fn test_token_amount_18_decimals_exact() {
        let one_token: TokenAmount = "1000000000000000000".parse().unwrap();
        assert_eq!(one_token.0, U256::from(10).pow(U256::from(18)));
        let json = serde_json::to_string(&one_token).unwrap();
        assert_eq!(json, "\"1000000000000000000\"");
    }

    #[test]
    fn test_token_amount_u64_narrowing() {
        assert_eq!(TokenAmount::from(42u64).try_as_u64(), Some(42));
        let big: TokenAmount = "340282366920938463463374607431768211456".parse().unwrap();
        assert_eq!(big.try_as_u64(), None);
    }
}
