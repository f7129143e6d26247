use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Configuration loading error: {0}")]
    ConfigLoad(#[from] ConfigError),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, ConfigurationError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// General system settings
    pub system: SystemSettings,

    /// Durable ledger table
    pub ledger: LedgerConfig,

    /// Ethereum balance sources
    pub ethereum: EthereumConfig,

    /// Solana balance sources
    pub solana: SolanaConfig,

    /// Price oracle endpoints
    pub pricing: PricingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSettings {
    /// Raise the default log filter to debug (RUST_LOG still overrides)
    pub debug_mode: bool,

    /// Concurrent adapter requests per reconciliation pass (clamped to 16)
    pub fetch_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Path of the CSV wallet table
    pub csv_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EthereumConfig {
    /// JSON-RPC endpoint, provider key included
    pub rpc_url: String,

    /// Etherscan account API base URL
    pub etherscan_api_base_url: String,

    /// Etherscan API key; when empty, reconciliation falls back to
    /// per-address JSON-RPC fetches instead of the batched endpoint
    pub etherscan_api_key: String,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,

    /// ERC-20 contracts always quoted as worthless (spam/dust)
    // serde(default): the `config` crate's serializer drops empty arrays from
    // the defaults source, so this field can be absent even after merging
    #[serde(default)]
    pub ignored_contracts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolanaConfig {
    /// JSON-RPC endpoint
    pub rpc_url: String,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,

    /// SPL mints always quoted as worthless (spam/dust)
    // serde(default): see ignored_contracts above
    #[serde(default)]
    pub ignored_mints: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// CryptoCompare base URL (native coin to USD)
    pub cryptocompare_base_url: String,

    /// DexScreener base URL (token to native coin)
    pub dexscreener_base_url: String,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            system: SystemSettings {
                debug_mode: false,
                fetch_concurrency: 8,
            },
            ledger: LedgerConfig {
                csv_path: "addies.csv".to_string(),
            },
            ethereum: EthereumConfig {
                rpc_url: "https://eth-mainnet.g.alchemy.com/v2/demo".to_string(),
                etherscan_api_base_url: "https://api.etherscan.io/api".to_string(),
                etherscan_api_key: "".to_string(), // Must be set in config file or env
                request_timeout_seconds: 30,
                ignored_contracts: Vec::new(),
            },
            solana: SolanaConfig {
                rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
                request_timeout_seconds: 30,
                ignored_mints: Vec::new(),
            },
            pricing: PricingConfig {
                cryptocompare_base_url: "https://min-api.cryptocompare.com".to_string(),
                dexscreener_base_url: "https://api.dexscreener.com".to_string(),
                request_timeout_seconds: 30,
            },
        }
    }
}

impl SystemConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config_builder = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&SystemConfig::default())?);

        if config_path.as_ref().exists() {
            info!(
                "Loading configuration from: {}",
                config_path.as_ref().display()
            );
            config_builder = config_builder.add_source(File::from(config_path.as_ref()));
        } else {
            debug!("Config file not found, using defaults and environment variables");
        }

        config_builder = config_builder.add_source(
            Environment::with_prefix("PORTFOLIO")
                .try_parsing(true)
                .separator("__")
                .list_separator(","),
        );

        let config: SystemConfig = config_builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.system.fetch_concurrency == 0 {
            return Err(ConfigurationError::InvalidValue(
                "fetch_concurrency must be greater than 0".to_string(),
            ));
        }
        if self.ledger.csv_path.trim().is_empty() {
            return Err(ConfigurationError::InvalidValue(
                "ledger csv_path cannot be empty".to_string(),
            ));
        }
        for (name, timeout) in [
            ("ethereum", self.ethereum.request_timeout_seconds),
            ("solana", self.solana.request_timeout_seconds),
            ("pricing", self.pricing.request_timeout_seconds),
        ] {
            if timeout == 0 {
                return Err(ConfigurationError::InvalidValue(format!(
                    "{} request timeout must be greater than 0",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = SystemConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ledger.csv_path, "addies.csv");
        assert_eq!(config.system.fetch_concurrency, 8);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = SystemConfig::default();
        config.system.fetch_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = SystemConfig::load_from_path("does-not-exist.toml").unwrap();
        assert_eq!(
            config.pricing.cryptocompare_base_url,
            "https://min-api.cryptocompare.com"
        );
    }
}
