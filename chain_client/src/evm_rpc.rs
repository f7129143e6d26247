use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use portfolio_core::{NativeBalanceSource, SourceResult, TokenBalanceSource, TokenHolding};

use crate::{parse_hex_quantity, ChainClientError, Result};

#[derive(Debug, Clone)]
pub struct EvmRpcConfig {
    /// Full provider endpoint, key included (e.g. an Alchemy v2 URL).
    pub rpc_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for EvmRpcConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://eth-mainnet.g.alchemy.com/v2/demo".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct TokenBalancesResult {
    #[serde(rename = "tokenBalances")]
    token_balances: Vec<TokenBalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct TokenBalanceEntry {
    #[serde(rename = "contractAddress")]
    contract_address: String,
    #[serde(rename = "tokenBalance")]
    token_balance: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenMetadataResult {
    decimals: Option<u32>,
    symbol: Option<String>,
}

/// JSON-RPC native balance source plus ERC-20 enumeration for one EVM
/// provider. One round trip per address; the Etherscan client covers the
/// batched path.
#[derive(Clone)]
pub struct EvmRpcClient {
    config: EvmRpcConfig,
    http_client: Client,
    request_id: Arc<AtomicU64>,
}

impl EvmRpcClient {
    pub fn new(config: EvmRpcConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        Ok(Self {
            config,
            http_client,
            request_id: Arc::new(AtomicU64::new(1)),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": self.request_id.fetch_add(1, Ordering::SeqCst),
            "method": method,
            "params": params,
        });
        debug!("EVM RPC {}", method);

        let response = self
            .http_client
            .post(&self.config.rpc_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json::<RpcResponse<T>>()
            .await?;

        if let Some(error) = response.error {
            return Err(ChainClientError::Rpc(format!(
                "{} failed ({}): {}",
                method, error.code, error.message
            )));
        }
        response
            .result
            .ok_or_else(|| ChainClientError::InvalidResponse(format!("{}: empty result", method)))
    }

    async fn token_decimals(&self, contract: &str) -> Result<Option<u32>> {
        let metadata: TokenMetadataResult = self
            .call("alchemy_getTokenMetadata", json!([contract]))
            .await?;
        if metadata.decimals.is_none() {
            debug!(
                "No decimals in metadata for {} ({})",
                contract,
                metadata.symbol.as_deref().unwrap_or("unknown symbol")
            );
        }
        Ok(metadata.decimals)
    }
}

#[async_trait]
impl NativeBalanceSource for EvmRpcClient {
    async fn fetch_balance(&self, address: &str) -> SourceResult<u128> {
        let raw: String = self
            .call("eth_getBalance", json!([address, "latest"]))
            .await?;
        Ok(parse_hex_quantity(&raw)?)
    }

    async fn fetch_balances(&self, addresses: &[String]) -> SourceResult<HashMap<String, u128>> {
        // No batch endpoint on plain JSON-RPC; the engine uses the
        // per-address path since supports_batch is false.
        let mut balances = HashMap::with_capacity(addresses.len());
        for address in addresses {
            balances.insert(address.clone(), self.fetch_balance(address).await?);
        }
        Ok(balances)
    }
}

#[async_trait]
impl TokenBalanceSource for EvmRpcClient {
    async fn fetch_token_holdings(&self, address: &str) -> SourceResult<Vec<TokenHolding>> {
        let result: TokenBalancesResult = self
            .call("alchemy_getTokenBalances", json!([address, "erc20"]))
            .await?;

        let mut holdings = Vec::new();
        for entry in result.token_balances {
            let raw_hex = match entry.token_balance {
                Some(hex) => hex,
                None => continue,
            };
            let raw_amount = match parse_hex_quantity(&raw_hex) {
                Ok(amount) => amount,
                Err(e) => {
                    warn!("Skipping token {} for {}: {}", entry.contract_address, address, e);
                    continue;
                }
            };
            if raw_amount == 0 {
                continue;
            }
            let decimals = match self.token_decimals(&entry.contract_address).await {
                Ok(Some(decimals)) => decimals,
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        "Skipping token {} for {}: metadata fetch failed: {}",
                        entry.contract_address, address, e
                    );
                    continue;
                }
            };
            holdings.push(TokenHolding {
                contract: entry.contract_address,
                raw_amount,
                decimals,
            });
        }
        Ok(holdings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_envelope_decodes() {
        let response: RpcResponse<String> = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32005, "message": "rate limited"}
        }))
        .unwrap();
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().code, -32005);
    }

    #[test]
    fn token_balances_payload_decodes() {
        let result: TokenBalancesResult = serde_json::from_value(json!({
            "address": "0xA1",
            "tokenBalances": [
                {"contractAddress": "0xdead", "tokenBalance": "0xde0b6b3a7640000"},
                {"contractAddress": "0xbeef", "tokenBalance": null}
            ]
        }))
        .unwrap();
        assert_eq!(result.token_balances.len(), 2);
        assert_eq!(
            parse_hex_quantity(result.token_balances[0].token_balance.as_ref().unwrap()).unwrap(),
            1_000_000_000_000_000_000
        );
        assert!(result.token_balances[1].token_balance.is_none());
    }
}
