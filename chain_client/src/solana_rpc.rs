use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use portfolio_core::{NativeBalanceSource, SourceResult, TokenBalanceSource, TokenHolding};

use crate::{ChainClientError, Result};

/// SPL token program; owner filter for getTokenAccountsByOwner.
const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

#[derive(Debug, Clone)]
pub struct SolanaRpcConfig {
    pub rpc_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for SolanaRpcConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
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

/// Solana wraps results in a context envelope; only `value` matters here.
#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct TokenAccount {
    account: AccountEnvelope,
}

#[derive(Debug, Deserialize)]
struct AccountEnvelope {
    data: ParsedData,
}

#[derive(Debug, Deserialize)]
struct ParsedData {
    parsed: ParsedAccount,
}

#[derive(Debug, Deserialize)]
struct ParsedAccount {
    info: TokenAccountInfo,
}

#[derive(Debug, Deserialize)]
struct TokenAccountInfo {
    mint: String,
    #[serde(rename = "tokenAmount")]
    token_amount: TokenAmount,
}

#[derive(Debug, Deserialize)]
struct TokenAmount {
    amount: String,
    decimals: u32,
}

#[derive(Clone)]
pub struct SolanaRpcClient {
    config: SolanaRpcConfig,
    http_client: Client,
}

impl SolanaRpcClient {
    pub fn new(config: SolanaRpcConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        debug!("Solana RPC {}", method);

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
}

fn holdings_from_accounts(address: &str, accounts: Vec<TokenAccount>) -> Vec<TokenHolding> {
    let mut holdings = Vec::new();
    for account in accounts {
        let info = account.account.data.parsed.info;
        let raw_amount = match info.token_amount.amount.parse::<u128>() {
            Ok(amount) => amount,
            Err(e) => {
                warn!("Skipping mint {} for {}: bad amount: {}", info.mint, address, e);
                continue;
            }
        };
        if raw_amount == 0 {
            continue;
        }
        holdings.push(TokenHolding {
            contract: info.mint,
            raw_amount,
            decimals: info.token_amount.decimals,
        });
    }
    holdings
}

#[async_trait]
impl NativeBalanceSource for SolanaRpcClient {
    async fn fetch_balance(&self, address: &str) -> SourceResult<u128> {
        let result: WithContext<u64> = self.call("getBalance", json!([address])).await?;
        Ok(u128::from(result.value))
    }

    async fn fetch_balances(&self, addresses: &[String]) -> SourceResult<HashMap<String, u128>> {
        let mut balances = HashMap::with_capacity(addresses.len());
        for address in addresses {
            balances.insert(address.clone(), self.fetch_balance(address).await?);
        }
        Ok(balances)
    }
}

#[async_trait]
impl TokenBalanceSource for SolanaRpcClient {
    async fn fetch_token_holdings(&self, address: &str) -> SourceResult<Vec<TokenHolding>> {
        let result: WithContext<Vec<TokenAccount>> = self
            .call(
                "getTokenAccountsByOwner",
                json!([
                    address,
                    {"programId": TOKEN_PROGRAM_ID},
                    {"encoding": "jsonParsed"}
                ]),
            )
            .await?;
        Ok(holdings_from_accounts(address, result.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsed_token_accounts_decode_and_filter_zero() {
        let value: WithContext<Vec<TokenAccount>> = serde_json::from_value(json!({
            "context": {"slot": 3215},
            "value": [
                {"account": {"data": {"parsed": {"info": {
                    "mint": "mae8vJGf8Wju8Ron1oDTQVaTGGBpcpWDwoRQJALMMf2",
                    "tokenAmount": {"amount": "50510989591", "decimals": 6, "uiAmount": 50510.989591}
                }}}}},
                {"account": {"data": {"parsed": {"info": {
                    "mint": "So11111111111111111111111111111111111111112",
                    "tokenAmount": {"amount": "0", "decimals": 9, "uiAmount": 0.0}
                }}}}}
            ]
        }))
        .unwrap();

        let holdings = holdings_from_accounts("owner", value.value);
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].raw_amount, 50_510_989_591);
        assert_eq!(holdings[0].decimals, 6);
    }

    #[test]
    fn balance_envelope_decodes() {
        let value: WithContext<u64> = serde_json::from_value(json!({
            "context": {"slot": 1},
            "value": 2000000000u64
        }))
        .unwrap();
        assert_eq!(value.value, 2_000_000_000);
    }
}
