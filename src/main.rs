use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use chain_client::etherscan::{EtherscanClient, EtherscanConfig};
use chain_client::evm_rpc::{EvmRpcClient, EvmRpcConfig};
use chain_client::probe::{ChainProbe, ProbeConfig};
use chain_client::solana_rpc::{SolanaRpcClient, SolanaRpcConfig};
use config_manager::SystemConfig;
use ledger_store::LedgerStore;
use portfolio_core::{ChainClassifier, ChainSources, ChainTag, Reconciler, WalletStatus};
use price_client::{
    CryptoCompareClient, CryptoCompareConfig, DexScreenerClient, DexScreenerConfig, MarketOracle,
};

#[derive(Parser)]
#[command(name = "portfolio_tracker", about = "Track wallet balances across chains")]
struct Cli {
    /// Configuration file (defaults to config.toml next to the binary)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track a new wallet address
    Add {
        address: String,
        /// Chain the address lives on; probed later if omitted
        #[arg(long)]
        chain: Option<ChainTag>,
        #[arg(long, default_value = "")]
        id: String,
        #[arg(long, default_value = "")]
        nickname: String,
        #[arg(long, default_value = "")]
        generation: String,
    },
    /// Stop tracking a wallet, by address or nickname
    Remove { identifier: String },
    /// Show tracked wallets and aggregate value
    List {
        /// Include inactive wallets
        #[arg(long)]
        all: bool,
    },
    /// Mark a wallet ACTIVE or INACTIVE
    SetStatus {
        address: String,
        status: WalletStatus,
    },
    /// Probe public endpoints to guess an address's chain
    Classify { address: String },
    /// Fetch balances and prices, merge them, and save the ledger
    Reconcile {
        /// Only this chain; all supported chains when omitted
        #[arg(long)]
        chain: Option<ChainTag>,
    },
}

/// Default tracing filter when RUST_LOG is unset. `system.debug_mode`
/// bumps it to debug.
fn default_log_filter(debug_mode: bool) -> &'static str {
    if debug_mode {
        "debug"
    } else {
        "info"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SystemConfig::load_from_path(path)?,
        None => SystemConfig::load()?,
    };

    // RUST_LOG always wins over the configured default.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_log_filter(config.system.debug_mode).into()),
        )
        .init();

    let mut store = LedgerStore::load(&config.ledger.csv_path)
        .with_context(|| format!("loading ledger from {}", config.ledger.csv_path))?;

    match cli.command {
        Commands::Add {
            address,
            chain,
            id,
            nickname,
            generation,
        } => {
            let chain = chain.unwrap_or(ChainTag::Unknown);
            match store.add_wallet(&address, chain, &id, &nickname, &generation) {
                Ok(()) => println!("Tracking {} on {}", address, chain),
                Err(ledger_store::AddError::Ledger(e)) => println!("{}", e),
                Err(ledger_store::AddError::Storage(e)) => {
                    bail!("wallet added in memory but not persisted: {}", e)
                }
            }
        }
        Commands::Remove { identifier } => {
            // Fall back to nickname lookup when no address matches.
            let address = match store.ledger().get(&identifier) {
                Some(record) => record.address.clone(),
                None => match store.ledger().find_by_nickname(&identifier) {
                    Some(record) => record.address.clone(),
                    None => {
                        println!("No tracked wallet matches '{}'", identifier);
                        return Ok(());
                    }
                },
            };
            let removed = store.remove_wallet(&address)?;
            store.save().context("persisting ledger after removal")?;
            println!("Removed {} ({})", removed.address, removed.nickname);
        }
        Commands::List { all } => {
            print_wallets(&store, all);
        }
        Commands::SetStatus { address, status } => {
            store.ledger_mut().set_status(&address, status)?;
            store.save().context("persisting ledger after status change")?;
            println!("{} is now {}", address, status);
        }
        Commands::Classify { address } => {
            let probe = ChainProbe::new(ProbeConfig {
                etherscan_api_base_url: config.ethereum.etherscan_api_base_url.clone(),
                etherscan_api_key: config.ethereum.etherscan_api_key.clone(),
                solana_rpc_url: config.solana.rpc_url.clone(),
                ..ProbeConfig::default()
            })?;
            match probe.classify(&address).await {
                Some(chain) => {
                    println!("{} looks like a {} address (best effort)", address, chain);
                    if store.ledger().get(&address).is_some() {
                        store.ledger_mut().set_chain(&address, chain)?;
                        store.save().context("persisting classification")?;
                    }
                }
                None => println!("No chain claimed {}", address),
            }
        }
        Commands::Reconcile { chain } => {
            let chains: Vec<ChainTag> = match chain {
                Some(chain) => vec![chain],
                None => ChainTag::reconcilable().to_vec(),
            };
            let reconciler = Reconciler::new(config.system.fetch_concurrency);
            for chain in chains {
                let sources = build_sources(&config, chain)?;
                let summary = reconciler
                    .reconcile_chain(store.ledger_mut(), &sources)
                    .await;
                info!(
                    "{}: {} wallet(s), {} native updated, {} token updated, {} failed",
                    summary.chain,
                    summary.wallets_selected,
                    summary.native_updated,
                    summary.tokens_updated,
                    summary.failed_fetches
                );
            }
            // A failed save is a data-loss risk and must reach the operator.
            store.save().context("persisting reconciled ledger")?;
            print_wallets(&store, false);
        }
    }

    Ok(())
}

/// Wire up the adapter set for one chain from configuration. Capabilities
/// that cannot be built (no endpoint, no key) are simply left out; the
/// reconciler skips the corresponding pass.
fn build_sources(config: &SystemConfig, chain: ChainTag) -> Result<ChainSources> {
    let mut sources = ChainSources::new(chain);
    match chain {
        ChainTag::Ethereum => {
            let rpc = EvmRpcClient::new(EvmRpcConfig {
                rpc_url: config.ethereum.rpc_url.clone(),
                request_timeout_seconds: config.ethereum.request_timeout_seconds,
            })?;
            if config.ethereum.etherscan_api_key.is_empty() {
                // No key for the batched endpoint; fall back to one RPC
                // round trip per address.
                sources = sources.with_native(Arc::new(rpc.clone()));
            } else {
                sources = sources.with_native(Arc::new(EtherscanClient::new(EtherscanConfig {
                    api_base_url: config.ethereum.etherscan_api_base_url.clone(),
                    api_key: config.ethereum.etherscan_api_key.clone(),
                    request_timeout_seconds: config.ethereum.request_timeout_seconds,
                })?));
            }
            sources = sources.with_tokens(Arc::new(rpc)).with_oracle(Arc::new(
                build_oracle(config, "ETH", config.ethereum.ignored_contracts.clone())?,
            ));
        }
        ChainTag::Solana => {
            let rpc = SolanaRpcClient::new(SolanaRpcConfig {
                rpc_url: config.solana.rpc_url.clone(),
                request_timeout_seconds: config.solana.request_timeout_seconds,
            })?;
            sources = sources
                .with_native(Arc::new(rpc.clone()))
                .with_tokens(Arc::new(rpc))
                .with_oracle(Arc::new(build_oracle(
                    config,
                    "SOL",
                    config.solana.ignored_mints.clone(),
                )?));
        }
        ChainTag::Bitcoin | ChainTag::Unknown => {
            warn!("No balance sources wired for {}", chain);
        }
    }
    Ok(sources)
}

fn build_oracle(
    config: &SystemConfig,
    symbol: &str,
    ignored: Vec<String>,
) -> Result<MarketOracle> {
    Ok(MarketOracle::new(
        symbol,
        CryptoCompareClient::new(CryptoCompareConfig {
            api_base_url: config.pricing.cryptocompare_base_url.clone(),
            request_timeout_seconds: config.pricing.request_timeout_seconds,
        })?,
        DexScreenerClient::new(DexScreenerConfig {
            api_base_url: config.pricing.dexscreener_base_url.clone(),
            request_timeout_seconds: config.pricing.request_timeout_seconds,
        })?,
        ignored,
    ))
}

/// Table view of the ledger. Raw smallest-unit balances and the generation
/// column stay out of the listing; inactive wallets are hidden unless
/// asked for and never count toward the displayed totals.
fn print_wallets(store: &LedgerStore, include_inactive: bool) {
    let records: Vec<_> = store
        .ledger()
        .records()
        .iter()
        .filter(|r| include_inactive || r.is_active())
        .collect();
    if records.is_empty() {
        println!("No wallets to show.");
        return;
    }

    println!(
        "{:<44} {:<9} {:<6} {:<16} {:<8} {:>14} {:>14} {:>14}",
        "address", "chain", "id", "nickname", "status", "native", "tokens", "total USD"
    );
    let mut total_usd = Decimal::ZERO;
    for record in &records {
        println!(
            "{:<44} {:<9} {:<6} {:<16} {:<8} {:>14} {:>14} {:>14}",
            record.address,
            record.chain,
            record.id,
            record.nickname,
            record.status,
            record.native_balance_coin.round_dp(6),
            record.token_balance_coin.round_dp(6),
            record.total_usd.round_dp(2),
        );
        if record.is_active() {
            total_usd += record.total_usd;
        }
    }
    println!("Active portfolio value: {} USD", total_usd.round_dp(2));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_mode_selects_debug_filter() {
        assert_eq!(default_log_filter(true), "debug");
        assert_eq!(default_log_filter(false), "info");
    }
}
