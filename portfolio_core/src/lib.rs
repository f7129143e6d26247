pub mod error;
pub mod ledger;
pub mod reconcile;
pub mod traits;
pub mod types;

pub use error::{LedgerError, SourceError, SourceResult};
pub use ledger::{ColumnUpdate, Ledger};
pub use reconcile::{ChainSources, PassSummary, Reconciler};
pub use traits::{ChainClassifier, NativeBalanceSource, PriceOracle, TokenBalanceSource};
pub use types::{raw_to_coin, ChainTag, TokenHolding, WalletRecord, WalletStatus};
