use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use portfolio_core::{NativeBalanceSource, SourceResult};

use crate::{ChainClientError, Result};

#[derive(Debug, Clone)]
pub struct EtherscanConfig {
    pub api_base_url: String,
    pub api_key: String,
    /// Request timeout in seconds
    pub request_timeout_seconds: u64,
}

impl Default for EtherscanConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.etherscan.io/api".to_string(),
            api_key: "".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

/// Etherscan account API envelope. `result` stays untyped because the API
/// reuses the field for row arrays, single values, and error text.
#[derive(Debug, Deserialize)]
struct EtherscanEnvelope {
    status: String,
    message: String,
    result: Value,
}

#[derive(Debug, Deserialize)]
struct MultiBalanceRow {
    account: String,
    balance: String,
}

/// Etherscan-backed native balance source. The one backend here that can
/// resolve a whole chain's worth of addresses in a single round trip.
#[derive(Clone)]
pub struct EtherscanClient {
    config: EtherscanConfig,
    http_client: Client,
}

impl EtherscanClient {
    pub fn new(config: EtherscanConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    async fn account_call(&self, action: &str, address_param: &str) -> Result<Value> {
        let params = [
            ("module", "account"),
            ("action", action),
            ("address", address_param),
            ("tag", "latest"),
            ("apikey", self.config.api_key.as_str()),
        ];
        debug!("Etherscan {} for {} address(es)", action, address_param.split(',').count());

        let envelope = self
            .http_client
            .get(&self.config.api_base_url)
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .json::<EtherscanEnvelope>()
            .await?;

        if envelope.status != "1" {
            return Err(ChainClientError::Rpc(format!(
                "etherscan {}: {}",
                envelope.message, envelope.result
            )));
        }
        Ok(envelope.result)
    }
}

fn parse_multi_result(result: Value) -> Result<HashMap<String, u128>> {
    let rows: Vec<MultiBalanceRow> = serde_json::from_value(result)?;
    let mut balances = HashMap::with_capacity(rows.len());
    for row in rows {
        // One undecodable row degrades that one address, never the batch.
        match row.balance.parse::<u128>() {
            Ok(balance) => {
                balances.insert(row.account, balance);
            }
            Err(e) => warn!(
                "Skipping balance for {}: bad value '{}': {}",
                row.account, row.balance, e
            ),
        }
    }
    Ok(balances)
}

#[async_trait]
impl NativeBalanceSource for EtherscanClient {
    fn supports_batch(&self) -> bool {
        true
    }

    async fn fetch_balance(&self, address: &str) -> SourceResult<u128> {
        let result = self.account_call("balance", address).await?;
        let raw = result
            .as_str()
            .ok_or_else(|| ChainClientError::InvalidResponse("balance is not a string".into()))?;
        raw.parse::<u128>().map_err(|e| {
            ChainClientError::InvalidResponse(format!("bad balance '{}': {}", raw, e)).into()
        })
    }

    async fn fetch_balances(&self, addresses: &[String]) -> SourceResult<HashMap<String, u128>> {
        let joined = addresses.join(",");
        let result = self.account_call("balancemulti", &joined).await?;
        Ok(parse_multi_result(result)?)
    }
}
