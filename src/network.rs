//! Network definitions and known token deployments.
//!
//! This module defines the four chain families payments can run on, their
//! family-level grouping (EVM vs Solana), and per-network constants the EVM
//! adapter is parameterized with: chain id, confirmation depth, and fee model.
//! It also provides the statically known payment tokens per network.

use alloy_primitives::address;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use solana_pubkey::pubkey;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::types::{PaymentToken, TokenRef};

/// Networks a payment session can settle on.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    /// Ethereum mainnet (chain ID 1).
    #[serde(rename = "ethereum")]
    Ethereum,
    /// BNB Smart Chain mainnet (chain ID 56).
    #[serde(rename = "binance-smart-chain")]
    BinanceSmartChain,
    /// Polygon mainnet (chain ID 137).
    #[serde(rename = "polygon")]
    Polygon,
    /// Solana mainnet.
    #[serde(rename = "solana")]
    Solana,
}

/// Structural family of a network. EVM chains share one adapter implementation;
/// Solana is its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkFamily {
    Evm,
    Solana,
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Ethereum => write!(f, "ethereum"),
            Network::BinanceSmartChain => write!(f, "binance-smart-chain"),
            Network::Polygon => write!(f, "polygon"),
            Network::Solana => write!(f, "solana"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown network: {0}")]
pub struct UnknownNetworkError(String);

impl FromStr for Network {
    type Err = UnknownNetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ethereum" => Ok(Network::Ethereum),
            "binance-smart-chain" => Ok(Network::BinanceSmartChain),
            "polygon" => Ok(Network::Polygon),
            "solana" => Ok(Network::Solana),
            other => Err(UnknownNetworkError(other.to_string())),
        }
    }
}

impl From<Network> for NetworkFamily {
    fn from(network: Network) -> Self {
        match network {
            Network::Ethereum | Network::BinanceSmartChain | Network::Polygon => {
                NetworkFamily::Evm
            }
            Network::Solana => NetworkFamily::Solana,
        }
    }
}

impl Network {
    /// Return all known [`Network`] variants.
    pub fn variants() -> &'static [Network] {
        &[
            Network::Ethereum,
            Network::BinanceSmartChain,
            Network::Polygon,
            Network::Solana,
        ]
    }

    pub fn family(&self) -> NetworkFamily {
        (*self).into()
    }

    /// EIP-155 chain id for EVM networks; `None` for Solana.
    pub fn chain_id(&self) -> Option<u64> {
        match self {
            Network::Ethereum => Some(1),
            Network::BinanceSmartChain => Some(56),
            Network::Polygon => Some(137),
            Network::Solana => None,
        }
    }

    /// Blocks required atop a transaction's block before it is treated as final.
    ///
    /// Ethereum settles at 1; BSC and Polygon see short reorgs often enough that
    /// their payment services wait deeper. Meaningless for Solana, which confirms
    /// by commitment level instead.
    pub fn confirmation_depth(&self) -> u64 {
        match self {
            Network::Ethereum => 1,
            Network::BinanceSmartChain => 3,
            Network::Polygon => 5,
            Network::Solana => 1,
        }
    }

    /// Whether the network supports EIP-1559 fee pricing.
    pub fn eip1559(&self) -> bool {
        match self {
            Network::Ethereum => true,
            Network::BinanceSmartChain => false,
            Network::Polygon => true,
            Network::Solana => false,
        }
    }

    pub fn native_symbol(&self) -> &'static str {
        match self {
            Network::Ethereum => "ETH",
            Network::BinanceSmartChain => "BNB",
            Network::Polygon => "POL",
            Network::Solana => "SOL",
        }
    }

    pub fn native_decimals(&self) -> u8 {
        match self {
            Network::Ethereum | Network::BinanceSmartChain | Network::Polygon => 18,
            Network::Solana => 9,
        }
    }

    /// The network's native currency as a [`PaymentToken`].
    pub fn native_token(&self) -> PaymentToken {
        PaymentToken {
            address: TokenRef::Native,
            network: *self,
            symbol: self.native_symbol().to_string(),
            decimals: self.native_decimals(),
        }
    }
}

static ETHEREUM_TOKENS: Lazy<Vec<PaymentToken>> = Lazy::new(|| {
    vec![
        Network::Ethereum.native_token(),
        PaymentToken {
            address: TokenRef::Erc20(address!("0xdAC17F958D2ee523a2206206994597C13D831ec7").into()),
            network: Network::Ethereum,
            symbol: "USDT".into(),
            decimals: 6,
        },
        PaymentToken {
            address: TokenRef::Erc20(address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48").into()),
            network: Network::Ethereum,
            symbol: "USDC".into(),
            decimals: 6,
        },
    ]
});

static BSC_TOKENS: Lazy<Vec<PaymentToken>> = Lazy::new(|| {
    vec![
        Network::BinanceSmartChain.native_token(),
        PaymentToken {
            address: TokenRef::Erc20(address!("0x55d398326f99059fF775485246999027B3197955").into()),
            network: Network::BinanceSmartChain,
            symbol: "USDT".into(),
            decimals: 18,
        },
    ]
});

static POLYGON_TOKENS: Lazy<Vec<PaymentToken>> = Lazy::new(|| {
    vec![
        Network::Polygon.native_token(),
        PaymentToken {
            address: TokenRef::Erc20(address!("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359").into()),
            network: Network::Polygon,
            symbol: "USDC".into(),
            decimals: 6,
        },
    ]
});

static SOLANA_TOKENS: Lazy<Vec<PaymentToken>> = Lazy::new(|| {
    vec![
        Network::Solana.native_token(),
        PaymentToken {
            address: TokenRef::Spl(pubkey!("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v").into()),
            network: Network::Solana,
            symbol: "USDC".into(),
            decimals: 6,
        },
    ]
});

/// Statically known payment tokens for a network (native currency first).
pub fn supported_tokens(network: Network) -> &'static [PaymentToken] {
    match network {
        Network::Ethereum => &ETHEREUM_TOKENS,
        Network::BinanceSmartChain => &BSC_TOKENS,
        Network::Polygon => &POLYGON_TOKENS,
        Network::Solana => &SOLANA_TOKENS,
    }
}
