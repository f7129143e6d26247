use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use portfolio_core::{ChainClassifier, ChainTag};

use crate::Result;

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub blockchain_info_base_url: String,
    pub etherscan_api_base_url: String,
    pub etherscan_api_key: String,
    pub solana_rpc_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            blockchain_info_base_url: "https://blockchain.info".to_string(),
            etherscan_api_base_url: "https://api.etherscan.io/api".to_string(),
            etherscan_api_key: "".to_string(),
            solana_rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            request_timeout_seconds: 10,
        }
    }
}

/// Best-effort chain detection: probe each chain's public endpoint in a
/// fixed order and take the first that answers. A 200 only means the
/// endpoint accepted the query, so the result is a hint, not a verdict.
pub struct ChainProbe {
    config: ProbeConfig,
    http_client: Client,
}

impl ChainProbe {
    pub fn new(config: ProbeConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    async fn probe_bitcoin(&self, address: &str) -> bool {
        let url = format!("{}/rawaddr/{}", self.config.blockchain_info_base_url, address);
        matches!(self.http_client.get(&url).send().await, Ok(r) if r.status().is_success())
    }

    async fn probe_ethereum(&self, address: &str) -> bool {
        let params = [
            ("module", "account"),
            ("action", "balance"),
            ("address", address),
            ("tag", "latest"),
            ("apikey", self.config.etherscan_api_key.as_str()),
        ];
        let request = self
            .http_client
            .get(&self.config.etherscan_api_base_url)
            .query(&params);
        matches!(request.send().await, Ok(r) if r.status().is_success())
    }

    async fn probe_solana(&self, address: &str) -> bool {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getBalance",
            "params": [address],
        });
        let sent = self
            .http_client
            .post(&self.config.solana_rpc_url)
            .json(&payload)
            .send()
            .await;
        match sent {
            Ok(response) if response.status().is_success() => {
                // An RPC-level error (e.g. invalid pubkey) means "not this
                // chain" even though HTTP succeeded.
                match response.json::<serde_json::Value>().await {
                    Ok(body) => body.get("error").is_none(),
                    Err(_) => false,
                }
            }
            _ => false,
        }
    }
}

#[async_trait]
impl ChainClassifier for ChainProbe {
    async fn classify(&self, address: &str) -> Option<ChainTag> {
        for chain in [ChainTag::Bitcoin, ChainTag::Ethereum, ChainTag::Solana] {
            let hit = match chain {
                ChainTag::Bitcoin => self.probe_bitcoin(address).await,
                ChainTag::Ethereum => self.probe_ethereum(address).await,
                ChainTag::Solana => self.probe_solana(address).await,
                ChainTag::Unknown => false,
            };
            if hit {
                info!("Probe classified {} as {}", address, chain);
                return Some(chain);
            }
            debug!("Probe for {} on {} came up empty", address, chain);
        }
        None
    }
}
