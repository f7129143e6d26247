use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::error::SourceResult;
use crate::types::{ChainTag, TokenHolding};

/// Native-coin balance capability for one chain.
///
/// Backends that can resolve many addresses in one round trip advertise it
/// through `supports_batch`; the reconciler then issues a single batched
/// call instead of one call per address.
#[async_trait]
pub trait NativeBalanceSource: Send + Sync {
    fn supports_batch(&self) -> bool {
        false
    }

    /// Balance of one address in the chain's smallest unit.
    async fn fetch_balance(&self, address: &str) -> SourceResult<u128>;

    /// Balances for many addresses in one round trip. Only called when
    /// `supports_batch` returns true.
    async fn fetch_balances(&self, addresses: &[String]) -> SourceResult<HashMap<String, u128>>;
}

/// Token holding enumeration for one chain. Implementations drop entries
/// whose on-chain amount decodes to zero before returning.
#[async_trait]
pub trait TokenBalanceSource: Send + Sync {
    async fn fetch_token_holdings(&self, address: &str) -> SourceResult<Vec<TokenHolding>>;
}

/// Spot pricing capability for one chain.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Current price of one native coin in USD.
    async fn native_to_usd(&self) -> SourceResult<Decimal>;

    /// Price of one token unit in native-coin terms. Ignore-listed
    /// contracts quote zero rather than erroring.
    async fn token_to_native(&self, contract: &str) -> SourceResult<Decimal>;
}

/// Best-effort chain detection for unclassified addresses.
///
/// A successful probe only proves the endpoint accepted the query, not that
/// the address is valid on that chain. Never authoritative.
#[async_trait]
pub trait ChainClassifier: Send + Sync {
    async fn classify(&self, address: &str) -> Option<ChainTag>;
}
