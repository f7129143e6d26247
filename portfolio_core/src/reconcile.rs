use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ledger::{ColumnUpdate, Ledger};
use crate::traits::{NativeBalanceSource, PriceOracle, TokenBalanceSource};
use crate::types::{raw_to_coin, ChainTag};

const MAX_CONCURRENCY: usize = 16;

/// The adapter set wired up for one chain. Any capability may be absent;
/// the reconciler skips the corresponding pass.
#[derive(Clone)]
pub struct ChainSources {
    pub chain: ChainTag,
    pub native: Option<Arc<dyn NativeBalanceSource>>,
    pub tokens: Option<Arc<dyn TokenBalanceSource>>,
    pub oracle: Option<Arc<dyn PriceOracle>>,
}

impl ChainSources {
    pub fn new(chain: ChainTag) -> Self {
        Self {
            chain,
            native: None,
            tokens: None,
            oracle: None,
        }
    }

    pub fn with_native(mut self, source: Arc<dyn NativeBalanceSource>) -> Self {
        self.native = Some(source);
        self
    }

    pub fn with_tokens(mut self, source: Arc<dyn TokenBalanceSource>) -> Self {
        self.tokens = Some(source);
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn PriceOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }
}

/// Outcome of one reconciliation pass for one chain.
#[derive(Debug, Clone)]
pub struct PassSummary {
    pub chain: ChainTag,
    pub started_at: DateTime<Utc>,
    pub wallets_selected: usize,
    pub native_updated: usize,
    pub tokens_updated: usize,
    pub failed_fetches: usize,
    /// False when no USD quote could be obtained; USD columns were left
    /// unchanged for the whole pass.
    pub usd_priced: bool,
}

impl PassSummary {
    fn new(chain: ChainTag, wallets_selected: usize) -> Self {
        Self {
            chain,
            started_at: Utc::now(),
            wallets_selected,
            native_updated: 0,
            tokens_updated: 0,
            failed_fetches: 0,
            usd_priced: false,
        }
    }
}

/// Orchestrates one fetch → map → merge → derive cycle per chain.
///
/// All adapter results are fully collected before any merge, so the ledger
/// only ever sees single-owner mutation. Passes for different chains only
/// touch wallets of their own chain and therefore commute.
pub struct Reconciler {
    concurrency: usize,
}

impl Reconciler {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.clamp(1, MAX_CONCURRENCY),
        }
    }

    pub async fn reconcile_chain(
        &self,
        ledger: &mut Ledger,
        sources: &ChainSources,
    ) -> PassSummary {
        let chain = sources.chain;
        let addresses = ledger.addresses_on(chain);
        let mut summary = PassSummary::new(chain, addresses.len());

        if addresses.is_empty() {
            debug!("No wallets tracked on {}, nothing to reconcile", chain);
            return summary;
        }
        info!(
            "Reconciling {} wallet(s) on {} (concurrency {})",
            addresses.len(),
            chain,
            self.concurrency
        );

        // One quote per pass, shared by every dependent multiplication.
        // A missing quote degrades only the USD columns.
        let usd_rate = match &sources.oracle {
            Some(oracle) => match oracle.native_to_usd().await {
                Ok(rate) => Some(rate),
                Err(e) => {
                    warn!("No {} USD quote this pass, USD columns unchanged: {}", chain, e);
                    None
                }
            },
            None => None,
        };
        summary.usd_priced = usd_rate.is_some();

        if let Some(native) = &sources.native {
            self.native_pass(ledger, chain, native, &addresses, usd_rate, &mut summary)
                .await;
        } else {
            warn!("No native balance source configured for {}", chain);
        }

        match (&sources.tokens, &sources.oracle) {
            (Some(tokens), Some(oracle)) => {
                self.token_pass(ledger, tokens, oracle, &addresses, usd_rate, &mut summary)
                    .await;
            }
            (Some(_), None) => {
                warn!("Token source for {} has no oracle to price against, skipping", chain)
            }
            _ => debug!("No token balance source configured for {}", chain),
        }

        ledger.derive_totals();
        info!(
            "Pass for {} done: {}/{} native, {} token, {} failure(s), usd_priced={}",
            chain,
            summary.native_updated,
            summary.wallets_selected,
            summary.tokens_updated,
            summary.failed_fetches,
            summary.usd_priced
        );
        summary
    }

    async fn native_pass(
        &self,
        ledger: &mut Ledger,
        chain: ChainTag,
        native: &Arc<dyn NativeBalanceSource>,
        addresses: &[String],
        usd_rate: Option<Decimal>,
        summary: &mut PassSummary,
    ) {
        let fetched: HashMap<String, u128> = if native.supports_batch() {
            match native.fetch_balances(addresses).await {
                Ok(map) => {
                    // A batch response may silently omit addresses; those
                    // wallets were not updated and count as failures.
                    let missing = addresses.iter().filter(|a| !map.contains_key(*a)).count();
                    if missing > 0 {
                        warn!(
                            "Batch response for {} left out {} address(es)",
                            chain, missing
                        );
                        summary.failed_fetches += missing;
                    }
                    map
                }
                Err(e) => {
                    warn!("Batch balance fetch for {} failed: {}", chain, e);
                    summary.failed_fetches += addresses.len();
                    return;
                }
            }
        } else {
            let results = stream::iter(addresses.iter().cloned())
                .map(|address| {
                    let source = Arc::clone(native);
                    async move {
                        let balance = source.fetch_balance(&address).await;
                        (address, balance)
                    }
                })
                .buffer_unordered(self.concurrency)
                .collect::<Vec<_>>()
                .await;

            let mut map = HashMap::new();
            for (address, result) in results {
                match result {
                    Ok(balance) => {
                        map.insert(address, balance);
                    }
                    Err(e) => {
                        warn!("Native balance fetch for {} failed: {}", address, e);
                        summary.failed_fetches += 1;
                    }
                }
            }
            map
        };

        let decimals = chain.native_decimals();
        let mut raw = HashMap::new();
        let mut coin = HashMap::new();
        for (address, balance) in fetched {
            match raw_to_coin(balance, decimals) {
                Ok(value) => {
                    raw.insert(address.clone(), balance);
                    coin.insert(address, value);
                }
                Err(e) => {
                    warn!("Discarding balance for {}: {}", address, e);
                    summary.failed_fetches += 1;
                }
            }
        }
        if coin.is_empty() {
            return;
        }

        summary.native_updated = coin.len();
        let usd = usd_rate.map(|rate| {
            coin.iter()
                .map(|(address, value)| (address.clone(), value * rate))
                .collect::<HashMap<_, _>>()
        });

        ledger.merge_column(ColumnUpdate::NativeRaw(raw));
        ledger.merge_column(ColumnUpdate::NativeCoin(coin));
        if let Some(rows) = usd {
            ledger.merge_column(ColumnUpdate::NativeUsd(rows));
        }
    }

    async fn token_pass(
        &self,
        ledger: &mut Ledger,
        tokens: &Arc<dyn TokenBalanceSource>,
        oracle: &Arc<dyn PriceOracle>,
        addresses: &[String],
        usd_rate: Option<Decimal>,
        summary: &mut PassSummary,
    ) {
        let results = stream::iter(addresses.iter().cloned())
            .map(|address| {
                let tokens = Arc::clone(tokens);
                let oracle = Arc::clone(oracle);
                async move {
                    let value = value_holdings(&*tokens, &*oracle, &address).await;
                    (address, value)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut coin = HashMap::new();
        for (address, result) in results {
            match result {
                // A wallet whose priced token value sums to exactly zero is
                // left out of the merge map: its prior token columns stay
                // whatever they were. Zero never stomps old data.
                Ok(value) if value.is_zero() => {
                    debug!("No priced token value for {}, leaving token columns alone", address)
                }
                Ok(value) => {
                    coin.insert(address, value);
                }
                Err(e) => {
                    warn!("Token enumeration for {} failed: {}", address, e);
                    summary.failed_fetches += 1;
                }
            }
        }
        if coin.is_empty() {
            return;
        }

        summary.tokens_updated = coin.len();
        let usd = usd_rate.map(|rate| {
            coin.iter()
                .map(|(address, value)| (address.clone(), value * rate))
                .collect::<HashMap<_, _>>()
        });

        ledger.merge_column(ColumnUpdate::TokenCoin(coin));
        if let Some(rows) = usd {
            ledger.merge_column(ColumnUpdate::TokenUsd(rows));
        }
    }
}

/// Aggregate value of one address's token holdings in native-coin terms.
/// A failed quote or undecodable amount degrades that one token to no
/// contribution; only a failed enumeration fails the whole address.
async fn value_holdings(
    tokens: &dyn TokenBalanceSource,
    oracle: &dyn PriceOracle,
    address: &str,
) -> crate::error::SourceResult<Decimal> {
    let holdings = tokens.fetch_token_holdings(address).await?;
    let mut sum = Decimal::ZERO;
    for holding in holdings {
        if holding.raw_amount == 0 {
            // Adapters filter these; tolerate one slipping through.
            continue;
        }
        let rate = match oracle.token_to_native(&holding.contract).await {
            Ok(rate) => rate,
            Err(e) => {
                warn!("No quote for token {} held by {}: {}", holding.contract, address, e);
                continue;
            }
        };
        if rate.is_zero() {
            continue;
        }
        let amount = match raw_to_coin(holding.raw_amount, holding.decimals) {
            Ok(amount) => amount,
            Err(e) => {
                warn!("Discarding holding {} of {}: {}", holding.contract, address, e);
                continue;
            }
        };
        sum += amount * rate;
    }
    Ok(sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SourceError, SourceResult};
    use crate::types::TokenHolding;
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct MockNative {
        balances: HashMap<String, u128>,
        batch: bool,
        failing: HashSet<String>,
    }

    impl MockNative {
        fn new(balances: &[(&str, u128)], batch: bool) -> Self {
            Self {
                balances: balances
                    .iter()
                    .map(|(a, b)| (a.to_string(), *b))
                    .collect(),
                batch,
                failing: HashSet::new(),
            }
        }

        fn failing_for(mut self, address: &str) -> Self {
            self.failing.insert(address.to_string());
            self
        }
    }

    #[async_trait]
    impl NativeBalanceSource for MockNative {
        fn supports_batch(&self) -> bool {
            self.batch
        }

        async fn fetch_balance(&self, address: &str) -> SourceResult<u128> {
            if self.failing.contains(address) {
                return Err(SourceError::Unavailable("rate limited".to_string()));
            }
            self.balances
                .get(address)
                .copied()
                .ok_or_else(|| SourceError::Unavailable("unknown address".to_string()))
        }

        async fn fetch_balances(
            &self,
            addresses: &[String],
        ) -> SourceResult<HashMap<String, u128>> {
            Ok(addresses
                .iter()
                .filter_map(|a| self.balances.get(a).map(|b| (a.clone(), *b)))
                .collect())
        }
    }

    struct MockTokens {
        holdings: HashMap<String, Vec<TokenHolding>>,
    }

    #[async_trait]
    impl TokenBalanceSource for MockTokens {
        async fn fetch_token_holdings(&self, address: &str) -> SourceResult<Vec<TokenHolding>> {
            Ok(self.holdings.get(address).cloned().unwrap_or_default())
        }
    }

    struct MockOracle {
        usd: Option<Decimal>,
        token_rates: HashMap<String, Decimal>,
    }

    #[async_trait]
    impl PriceOracle for MockOracle {
        async fn native_to_usd(&self) -> SourceResult<Decimal> {
            self.usd
                .ok_or_else(|| SourceError::Unavailable("oracle down".to_string()))
        }

        async fn token_to_native(&self, contract: &str) -> SourceResult<Decimal> {
            Ok(self
                .token_rates
                .get(contract)
                .copied()
                .unwrap_or(Decimal::ZERO))
        }
    }

    fn eth_ledger(addresses: &[&str]) -> Ledger {
        let mut ledger = Ledger::new();
        for (i, address) in addresses.iter().enumerate() {
            ledger
                .add_wallet(address, ChainTag::Ethereum, &i.to_string(), "", "")
                .unwrap();
        }
        ledger
    }

    #[tokio::test]
    async fn batch_fetch_converts_and_prices_balances() {
        let mut ledger = eth_ledger(&["0xA1"]);
        let sources = ChainSources::new(ChainTag::Ethereum)
            .with_native(Arc::new(MockNative::new(
                &[("0xA1", 2_500_000_000_000_000_000)],
                true,
            )))
            .with_oracle(Arc::new(MockOracle {
                usd: Some(Decimal::from(3000)),
                token_rates: HashMap::new(),
            }));

        let summary = Reconciler::new(8).reconcile_chain(&mut ledger, &sources).await;

        let record = ledger.get("0xA1").unwrap();
        assert_eq!(record.native_balance_raw, 2_500_000_000_000_000_000);
        assert_eq!(record.native_balance_coin, Decimal::new(25, 1));
        assert_eq!(record.native_balance_usd, Decimal::from(7500));
        assert_eq!(record.total_usd, Decimal::from(7500));
        assert!(summary.usd_priced);
        assert_eq!(summary.native_updated, 1);
    }

    #[tokio::test]
    async fn partial_failure_updates_only_successful_subset() {
        let mut ledger = eth_ledger(&["0xA1", "0xB2", "0xC3"]);
        ledger.merge_column(ColumnUpdate::NativeCoin(HashMap::from([(
            "0xB2".to_string(),
            Decimal::from(7),
        )])));

        let native = MockNative::new(
            &[
                ("0xA1", 1_000_000_000_000_000_000),
                ("0xC3", 3_000_000_000_000_000_000),
            ],
            false,
        )
        .failing_for("0xB2");
        let sources = ChainSources::new(ChainTag::Ethereum)
            .with_native(Arc::new(native))
            .with_oracle(Arc::new(MockOracle {
                usd: Some(Decimal::from(2000)),
                token_rates: HashMap::new(),
            }));

        let summary = Reconciler::new(4).reconcile_chain(&mut ledger, &sources).await;

        assert_eq!(summary.failed_fetches, 1);
        assert_eq!(summary.native_updated, 2);
        assert_eq!(ledger.get("0xA1").unwrap().native_balance_coin, Decimal::ONE);
        assert_eq!(ledger.get("0xC3").unwrap().native_balance_coin, Decimal::from(3));
        // The failed wallet keeps its previous value.
        assert_eq!(ledger.get("0xB2").unwrap().native_balance_coin, Decimal::from(7));
    }

    #[tokio::test]
    async fn batch_response_omitting_an_address_counts_as_failure() {
        let mut ledger = eth_ledger(&["0xA1", "0xB2"]);
        ledger.merge_column(ColumnUpdate::NativeCoin(HashMap::from([(
            "0xB2".to_string(),
            Decimal::from(7),
        )])));

        // The batch mock only answers for addresses it knows, so 0xB2
        // drops out of the response without an error.
        let sources = ChainSources::new(ChainTag::Ethereum)
            .with_native(Arc::new(MockNative::new(
                &[("0xA1", 1_000_000_000_000_000_000)],
                true,
            )))
            .with_oracle(Arc::new(MockOracle {
                usd: Some(Decimal::from(2000)),
                token_rates: HashMap::new(),
            }));

        let summary = Reconciler::new(8).reconcile_chain(&mut ledger, &sources).await;

        assert_eq!(summary.failed_fetches, 1);
        assert_eq!(summary.native_updated, 1);
        assert_eq!(ledger.get("0xA1").unwrap().native_balance_coin, Decimal::ONE);
        assert_eq!(ledger.get("0xB2").unwrap().native_balance_coin, Decimal::from(7));
    }

    #[tokio::test]
    async fn missing_usd_quote_leaves_usd_columns_unchanged() {
        let mut ledger = eth_ledger(&["0xA1"]);
        ledger.merge_column(ColumnUpdate::NativeUsd(HashMap::from([(
            "0xA1".to_string(),
            Decimal::from(123),
        )])));

        let sources = ChainSources::new(ChainTag::Ethereum)
            .with_native(Arc::new(MockNative::new(
                &[("0xA1", 1_000_000_000_000_000_000)],
                true,
            )))
            .with_oracle(Arc::new(MockOracle {
                usd: None,
                token_rates: HashMap::new(),
            }));

        let summary = Reconciler::new(8).reconcile_chain(&mut ledger, &sources).await;

        let record = ledger.get("0xA1").unwrap();
        assert!(!summary.usd_priced);
        // Coin column still updated, USD untouched.
        assert_eq!(record.native_balance_coin, Decimal::ONE);
        assert_eq!(record.native_balance_usd, Decimal::from(123));
    }

    #[tokio::test]
    async fn ignore_listed_token_contributes_zero_not_error() {
        let mut ledger = eth_ledger(&["0xA1"]);
        let holdings = HashMap::from([(
            "0xA1".to_string(),
            vec![
                TokenHolding {
                    contract: "0xgood".to_string(),
                    raw_amount: 100_000_000_000_000_000, // 0.1 with 18 decimals at rate 1
                    decimals: 18,
                },
                TokenHolding {
                    contract: "0xspam".to_string(),
                    raw_amount: 1_000_000,
                    decimals: 6,
                },
            ],
        )]);
        let sources = ChainSources::new(ChainTag::Ethereum)
            .with_tokens(Arc::new(MockTokens { holdings }))
            .with_oracle(Arc::new(MockOracle {
                usd: Some(Decimal::from(3000)),
                // 0xspam has no rate entry and quotes zero, like an
                // ignore-listed contract.
                token_rates: HashMap::from([("0xgood".to_string(), Decimal::ONE)]),
            }));

        let summary = Reconciler::new(8).reconcile_chain(&mut ledger, &sources).await;

        let record = ledger.get("0xA1").unwrap();
        assert_eq!(record.token_balance_coin, Decimal::new(1, 1));
        assert_eq!(record.token_balance_usd, Decimal::from(300));
        assert_eq!(summary.tokens_updated, 1);
        assert_eq!(summary.failed_fetches, 0);
    }

    #[tokio::test]
    async fn zero_sum_token_pass_does_not_stomp_prior_columns() {
        let mut ledger = eth_ledger(&["0xA1"]);
        ledger.merge_column(ColumnUpdate::TokenCoin(HashMap::from([(
            "0xA1".to_string(),
            Decimal::new(4, 1),
        )])));

        let sources = ChainSources::new(ChainTag::Ethereum)
            .with_tokens(Arc::new(MockTokens {
                holdings: HashMap::new(),
            }))
            .with_oracle(Arc::new(MockOracle {
                usd: Some(Decimal::from(3000)),
                token_rates: HashMap::new(),
            }));

        let summary = Reconciler::new(8).reconcile_chain(&mut ledger, &sources).await;

        assert_eq!(summary.tokens_updated, 0);
        assert_eq!(
            ledger.get("0xA1").unwrap().token_balance_coin,
            Decimal::new(4, 1)
        );
    }

    #[tokio::test]
    async fn native_pass_never_touches_token_columns() {
        let mut ledger = eth_ledger(&["0xA1"]);
        ledger.merge_column(ColumnUpdate::TokenCoin(HashMap::from([(
            "0xA1".to_string(),
            Decimal::from(9),
        )])));

        let sources = ChainSources::new(ChainTag::Ethereum)
            .with_native(Arc::new(MockNative::new(&[("0xA1", 5)], true)))
            .with_oracle(Arc::new(MockOracle {
                usd: Some(Decimal::ONE),
                token_rates: HashMap::new(),
            }));
        Reconciler::new(8).reconcile_chain(&mut ledger, &sources).await;

        assert_eq!(ledger.get("0xA1").unwrap().token_balance_coin, Decimal::from(9));
    }

    #[tokio::test]
    async fn pass_only_selects_wallets_of_its_chain() {
        let mut ledger = eth_ledger(&["0xA1"]);
        ledger
            .add_wallet("So1", ChainTag::Solana, "9", "", "")
            .unwrap();

        let sources = ChainSources::new(ChainTag::Solana)
            .with_native(Arc::new(MockNative::new(&[("So1", 2_000_000_000)], false)))
            .with_oracle(Arc::new(MockOracle {
                usd: Some(Decimal::from(150)),
                token_rates: HashMap::new(),
            }));
        let summary = Reconciler::new(8).reconcile_chain(&mut ledger, &sources).await;

        assert_eq!(summary.wallets_selected, 1);
        assert_eq!(ledger.get("So1").unwrap().native_balance_coin, Decimal::TWO);
        assert_eq!(ledger.get("0xA1").unwrap().native_balance_raw, 0);
    }
}
