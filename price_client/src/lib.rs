//! Spot price adapters: CryptoCompare for native→USD, DexScreener for
//! token→native, combined into a per-chain oracle.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use portfolio_core::{PriceOracle, SourceError, SourceResult};

#[derive(Error, Debug)]
pub enum PriceClientError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid price data: {0}")]
    InvalidPriceData(String),
    #[error("No price data found")]
    NoPriceData,
}

pub type Result<T> = std::result::Result<T, PriceClientError>;

impl From<PriceClientError> for SourceError {
    fn from(err: PriceClientError) -> Self {
        match err {
            PriceClientError::Http(e) => SourceError::Unavailable(e.to_string()),
            PriceClientError::NoPriceData => SourceError::Unavailable("no price data".to_string()),
            PriceClientError::Json(e) => SourceError::Decode(e.to_string()),
            PriceClientError::InvalidPriceData(message) => SourceError::Decode(message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CryptoCompareConfig {
    pub api_base_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for CryptoCompareConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://min-api.cryptocompare.com".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

/// CryptoCompare spot quotes, one symbol against USD.
#[derive(Clone)]
pub struct CryptoCompareClient {
    config: CryptoCompareConfig,
    http_client: Client,
}

impl CryptoCompareClient {
    pub fn new(config: CryptoCompareConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    /// Current USD price of one unit of `symbol` (e.g. "ETH").
    pub async fn spot_usd(&self, symbol: &str) -> Result<Decimal> {
        let url = format!("{}/data/price", self.config.api_base_url);
        let quotes = self
            .http_client
            .get(&url)
            .query(&[("fsym", symbol), ("tsyms", "USD")])
            .send()
            .await?
            .error_for_status()?
            .json::<HashMap<String, Decimal>>()
            .await?;

        let price = quotes.get("USD").copied().ok_or(PriceClientError::NoPriceData)?;
        debug!("CryptoCompare: 1 {} = {} USD", symbol, price);
        Ok(price)
    }
}

#[derive(Debug, Clone)]
pub struct DexScreenerConfig {
    pub api_base_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for DexScreenerConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.dexscreener.com".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DexScreenerTokenResponse {
    pairs: Option<Vec<DexScreenerPair>>,
}

#[derive(Debug, Deserialize)]
struct DexScreenerPair {
    #[serde(rename = "baseToken")]
    base_token: DexScreenerBaseToken,
    #[serde(rename = "priceNative")]
    price_native: Option<String>,
    liquidity: Option<DexScreenerLiquidity>,
}

#[derive(Debug, Deserialize)]
struct DexScreenerBaseToken {
    address: String,
}

#[derive(Debug, Deserialize)]
struct DexScreenerLiquidity {
    usd: Option<f64>,
}

/// DexScreener pair lookups; quotes a token in the chain's native coin.
#[derive(Clone)]
pub struct DexScreenerClient {
    config: DexScreenerConfig,
    http_client: Client,
}

impl DexScreenerClient {
    pub fn new(config: DexScreenerConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    /// Price of one token unit in native-coin terms, taken from the
    /// deepest pair where the token is the base.
    pub async fn price_in_native(&self, contract: &str) -> Result<Decimal> {
        let url = format!("{}/latest/dex/tokens/{}", self.config.api_base_url, contract);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<DexScreenerTokenResponse>()
            .await?;

        let pairs = response.pairs.unwrap_or_default();
        best_native_price(&pairs, contract).ok_or(PriceClientError::NoPriceData)
    }
}

fn best_native_price(pairs: &[DexScreenerPair], contract: &str) -> Option<Decimal> {
    pairs
        .iter()
        .filter(|pair| pair.base_token.address.eq_ignore_ascii_case(contract))
        .max_by(|a, b| {
            let liquidity = |p: &DexScreenerPair| {
                p.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0)
            };
            liquidity(a).total_cmp(&liquidity(b))
        })
        .and_then(|pair| pair.price_native.as_deref())
        .and_then(|raw| Decimal::from_str(raw).ok())
}

/// Per-chain price oracle: CryptoCompare for the native→USD pivot,
/// DexScreener for token→native, with a static ignore-list of contracts
/// quoted as worthless so dust and spam tokens cannot inflate totals.
pub struct MarketOracle {
    native_symbol: String,
    cryptocompare: CryptoCompareClient,
    dexscreener: DexScreenerClient,
    ignored_contracts: HashSet<String>,
}

impl MarketOracle {
    pub fn new(
        native_symbol: impl Into<String>,
        cryptocompare: CryptoCompareClient,
        dexscreener: DexScreenerClient,
        ignored_contracts: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            native_symbol: native_symbol.into(),
            cryptocompare,
            dexscreener,
            ignored_contracts: ignored_contracts
                .into_iter()
                .map(|c| c.to_lowercase())
                .collect(),
        }
    }
}

#[async_trait]
impl PriceOracle for MarketOracle {
    async fn native_to_usd(&self) -> SourceResult<Decimal> {
        Ok(self.cryptocompare.spot_usd(&self.native_symbol).await?)
    }

    async fn token_to_native(&self, contract: &str) -> SourceResult<Decimal> {
        if self.ignored_contracts.contains(&contract.to_lowercase()) {
            debug!("Contract {} is ignore-listed, quoting 0", contract);
            return Ok(Decimal::ZERO);
        }
        Ok(self.dexscreener.price_in_native(contract).await?)
    }
}
