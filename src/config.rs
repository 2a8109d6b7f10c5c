//! Configuration for payment orchestration.
//!
//! Everything is explicit dependency injection: a [`ChainpayConfig`] is built from
//! a JSON file or from environment variables and handed to the constructors that
//! need it. Nothing in the crate reads configuration behind the caller's back.
//!
//! Environment fallbacks follow a per-network naming scheme, e.g. `RPC_URL_ETHEREUM`
//! and `PAYMENT_GATEWAY_BINANCE_SMART_CHAIN`, with one `EVM_PRIVATE_KEY` shared by
//! the EVM networks and `SOLANA_PRIVATE_KEY`/`SOLANA_RECEIVER` for Solana.

use serde::Deserialize;
use solana_commitment_config::CommitmentConfig;
use std::collections::HashMap;
use std::path::Path;
use url::Url;

use crate::adapter::{AlloyGateway, SolanaRpcGateway};
use crate::error::PaymentError;
use crate::monitor::MonitorThresholds;
use crate::network::{Network, NetworkFamily};
use crate::retry::RetryPolicy;
use crate::session::SessionConfig;
use crate::types::{EvmAddress, SolanaAddress};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid {field} for {network}: {message}")]
    Invalid {
        network: Network,
        field: &'static str,
        message: String,
    },
}

/// Connection settings for one EVM network's payment gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmGatewayConfig {
    pub rpc_url: Url,
    pub gateway_address: EvmAddress,
    pub private_key: String,
}

impl EvmGatewayConfig {
    pub fn connect(&self) -> Result<AlloyGateway, PaymentError> {
        AlloyGateway::connect(&self.rpc_url, self.gateway_address, &self.private_key)
    }
}

/// Connection settings for Solana payments.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolanaGatewayConfig {
    pub rpc_url: Url,
    pub receiver: SolanaAddress,
    pub private_key: String,
    #[serde(default = "config_defaults::commitment")]
    pub commitment: String,
}

impl SolanaGatewayConfig {
    /// Commitment level payments are considered final at. Unknown names fall back
    /// to `finalized`, the strictest level.
    pub fn commitment(&self) -> CommitmentConfig {
        match self.commitment.as_str() {
            "processed" => CommitmentConfig::processed(),
            "confirmed" => CommitmentConfig::confirmed(),
            _ => CommitmentConfig::finalized(),
        }
    }

    pub fn connect(&self) -> Result<SolanaRpcGateway, PaymentError> {
        SolanaRpcGateway::connect(
            &self.rpc_url,
            self.receiver,
            &self.private_key,
            self.commitment(),
        )
    }
}

mod config_defaults {
    pub fn commitment() -> String {
        "finalized".to_string()
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainpayConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub monitor: MonitorThresholds,
    /// EVM gateways keyed by network name (`ethereum`, `binance-smart-chain`,
    /// `polygon`). Networks without an entry are unavailable.
    #[serde(default)]
    pub evm: HashMap<Network, EvmGatewayConfig>,
    #[serde(default)]
    pub solana: Option<SolanaGatewayConfig>,
}

impl ChainpayConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Builds a config from environment variables. Networks whose variables are
    /// absent are simply left unconfigured; malformed values are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut evm = HashMap::new();
        let evm_key = std::env::var("EVM_PRIVATE_KEY").ok();
        for network in Network::variants() {
            if network.family() != NetworkFamily::Evm {
                continue;
            }
            let suffix = env_suffix(*network);
            let Ok(rpc_url) = std::env::var(format!("RPC_URL_{suffix}")) else {
                continue;
            };
            let Ok(gateway) = std::env::var(format!("PAYMENT_GATEWAY_{suffix}")) else {
                continue;
            };
            let Some(private_key) = evm_key.clone() else {
                continue;
            };
            evm.insert(
                *network,
                EvmGatewayConfig {
                    rpc_url: rpc_url.parse().map_err(|e| invalid(*network, "rpc_url", e))?,
                    gateway_address: gateway
                        .parse()
                        .map_err(|e| invalid(*network, "gateway_address", e))?,
                    private_key,
                },
            );
        }

        let solana = match (
            std::env::var("RPC_URL_SOLANA"),
            std::env::var("SOLANA_RECEIVER"),
            std::env::var("SOLANA_PRIVATE_KEY"),
        ) {
            (Ok(rpc_url), Ok(receiver), Ok(private_key)) => Some(SolanaGatewayConfig {
                rpc_url: rpc_url
                    .parse()
                    .map_err(|e| invalid(Network::Solana, "rpc_url", e))?,
                receiver: receiver
                    .parse()
                    .map_err(|e| invalid(Network::Solana, "receiver", e))?,
                private_key,
                commitment: std::env::var("SOLANA_COMMITMENT")
                    .unwrap_or_else(|_| config_defaults::commitment()),
            }),
            _ => None,
        };

        Ok(ChainpayConfig {
            session: SessionConfig::default(),
            retry: RetryPolicy::default(),
            monitor: MonitorThresholds::default(),
            evm,
            solana,
        })
    }
}

fn env_suffix(network: Network) -> String {
    network.to_string().replace('-', "_").to_uppercase()
}

fn invalid(
    network: Network,
    field: &'static str,
    error: impl std::fmt::Display,
) -> ConfigError {
    ConfigError::Invalid {
        network,
        field,
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_json_config() {
        let json = r#"{
            "session": { "timeout_ms": 5000, "retry_limit": 2 },
            "retry": { "max_attempts": 5 },
            "evm": {
                "ethereum": {
                    "rpcUrl": "https://eth.example.com",
                    "gatewayAddress": "0xdAC17F958D2ee523a2206206994597C13D831ec7",
                    "privateKey": "0x01"
                }
            },
            "solana": {
                "rpcUrl": "https://sol.example.com",
                "receiver": "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
                "privateKey": "base58key",
                "commitment": "confirmed"
            }
        }"#;
        let config: ChainpayConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.session.timeout_ms, 5_000);
        assert_eq!(config.session.retry_limit, 2);
        assert_eq!(config.retry.max_attempts, 5);
        // Unspecified retry fields keep their defaults.
        assert_eq!(config.retry.initial_delay_ms, 1_000);
        assert!(config.evm.contains_key(&Network::Ethereum));
        assert!(!config.evm.contains_key(&Network::Polygon));
        let solana = config.solana.unwrap();
        assert_eq!(solana.commitment(), CommitmentConfig::confirmed());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: ChainpayConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.session.timeout_ms, 10_000);
        assert_eq!(config.session.retry_limit, 3);
        assert!(config.evm.is_empty());
        assert!(config.solana.is_none());
    }

    #[test]
    fn test_unknown_commitment_falls_back_to_finalized() {
        let config = SolanaGatewayConfig {
            rpc_url: "https://sol.example.com".parse().unwrap(),
            receiver: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"
                .parse()
                .unwrap(),
            private_key: "key".into(),
            commitment: "whatever".into(),
        };
        assert_eq!(config.commitment(), CommitmentConfig::finalized());
    }

    #[test]
    fn test_env_suffixes() {
        assert_eq!(env_suffix(Network::Ethereum), "ETHEREUM");
        assert_eq!(env_suffix(Network::BinanceSmartChain), "BINANCE_SMART_CHAIN");
        assert_eq!(env_suffix(Network::Polygon), "POLYGON");
    }
}
