use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

use crate::error::LedgerError;
use crate::types::{ChainTag, WalletRecord, WalletStatus};

/// Column-wise balance update produced by one reconciliation pass.
///
/// Each variant names exactly one column, so a merge can never touch a
/// column owned by another source: native passes build the `Native*`
/// variants, token passes the `Token*` variants, and the derived columns
/// have no variant at all.
#[derive(Debug, Clone)]
pub enum ColumnUpdate {
    NativeRaw(HashMap<String, u128>),
    NativeCoin(HashMap<String, Decimal>),
    NativeUsd(HashMap<String, Decimal>),
    TokenCoin(HashMap<String, Decimal>),
    TokenUsd(HashMap<String, Decimal>),
}

impl ColumnUpdate {
    fn column_name(&self) -> &'static str {
        match self {
            ColumnUpdate::NativeRaw(_) => "native_balance_raw",
            ColumnUpdate::NativeCoin(_) => "native_balance_coin",
            ColumnUpdate::NativeUsd(_) => "native_balance_usd",
            ColumnUpdate::TokenCoin(_) => "token_balance_coin",
            ColumnUpdate::TokenUsd(_) => "token_balance_usd",
        }
    }

    fn len(&self) -> usize {
        match self {
            ColumnUpdate::NativeRaw(rows) => rows.len(),
            ColumnUpdate::NativeCoin(rows)
            | ColumnUpdate::NativeUsd(rows)
            | ColumnUpdate::TokenCoin(rows)
            | ColumnUpdate::TokenUsd(rows) => rows.len(),
        }
    }
}

/// Ordered table of tracked wallets, keyed by address. The single
/// in-memory source of truth between load and save; all mutation funnels
/// through the methods below.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    records: Vec<WalletRecord>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<WalletRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[WalletRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, address: &str) -> Option<&WalletRecord> {
        self.records.iter().find(|r| r.address == address)
    }

    fn get_mut(&mut self, address: &str) -> Option<&mut WalletRecord> {
        self.records.iter_mut().find(|r| r.address == address)
    }

    /// Addresses of all wallets on the given chain, in table order.
    pub fn addresses_on(&self, chain: ChainTag) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.chain == chain)
            .map(|r| r.address.clone())
            .collect()
    }

    /// Append a new wallet with zeroed balances and ACTIVE status.
    /// A duplicate address is a conflict and leaves the table unchanged.
    pub fn add_wallet(
        &mut self,
        address: &str,
        chain: ChainTag,
        id: &str,
        nickname: &str,
        generation: &str,
    ) -> Result<(), LedgerError> {
        if self.get(address).is_some() {
            return Err(LedgerError::Conflict(address.to_string()));
        }
        self.records
            .push(WalletRecord::new(address, chain, id, nickname, generation));
        debug!("Added wallet {} on {}", address, chain);
        Ok(())
    }

    pub fn remove_wallet(&mut self, address: &str) -> Result<WalletRecord, LedgerError> {
        let position = self
            .records
            .iter()
            .position(|r| r.address == address)
            .ok_or_else(|| LedgerError::NotFound(address.to_string()))?;
        Ok(self.records.remove(position))
    }

    /// Trimmed, case-insensitive nickname lookup. Deliberately laxer than
    /// the raw address key so operators can refer to wallets by label.
    pub fn find_by_nickname(&self, nickname: &str) -> Option<&WalletRecord> {
        let wanted = nickname.trim();
        self.records
            .iter()
            .find(|r| r.nickname.trim().eq_ignore_ascii_case(wanted))
    }

    pub fn set_status(&mut self, address: &str, status: WalletStatus) -> Result<(), LedgerError> {
        let record = self
            .get_mut(address)
            .ok_or_else(|| LedgerError::NotFound(address.to_string()))?;
        record.status = status;
        Ok(())
    }

    /// Classification write-back for a probed address.
    pub fn set_chain(&mut self, address: &str, chain: ChainTag) -> Result<(), LedgerError> {
        let record = self
            .get_mut(address)
            .ok_or_else(|| LedgerError::NotFound(address.to_string()))?;
        record.chain = chain;
        Ok(())
    }

    /// Set one column for every address present in the update, leaving all
    /// other addresses and all other columns untouched. Addresses with no
    /// matching record are dropped silently; source data may reference
    /// wallets no longer tracked.
    pub fn merge_column(&mut self, update: ColumnUpdate) {
        let incoming = update.len();
        let mut matched = 0usize;
        for record in &mut self.records {
            match &update {
                ColumnUpdate::NativeRaw(rows) => {
                    if let Some(value) = rows.get(&record.address) {
                        record.native_balance_raw = *value;
                        matched += 1;
                    }
                }
                ColumnUpdate::NativeCoin(rows) => {
                    if let Some(value) = rows.get(&record.address) {
                        record.native_balance_coin = *value;
                        matched += 1;
                    }
                }
                ColumnUpdate::NativeUsd(rows) => {
                    if let Some(value) = rows.get(&record.address) {
                        record.native_balance_usd = *value;
                        matched += 1;
                    }
                }
                ColumnUpdate::TokenCoin(rows) => {
                    if let Some(value) = rows.get(&record.address) {
                        record.token_balance_coin = *value;
                        matched += 1;
                    }
                }
                ColumnUpdate::TokenUsd(rows) => {
                    if let Some(value) = rows.get(&record.address) {
                        record.token_balance_usd = *value;
                        matched += 1;
                    }
                }
            }
        }
        debug!(
            "Merged {} of {} rows into {}",
            matched,
            incoming,
            update.column_name()
        );
    }

    /// Recompute the derived columns from the per-source columns. Pure and
    /// idempotent: running it twice without new data is a fixed point.
    pub fn derive_totals(&mut self) {
        for record in &mut self.records {
            record.total_coin = record.native_balance_coin + record.token_balance_coin;
            record.total_usd = record.native_balance_usd + record.token_balance_usd;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Ledger {
        let mut ledger = Ledger::new();
        ledger
            .add_wallet("0xA1", ChainTag::Ethereum, "1", "hot wallet", "gen1")
            .unwrap();
        ledger
            .add_wallet("0xB2", ChainTag::Ethereum, "2", "cold", "gen1")
            .unwrap();
        ledger
            .add_wallet("So1", ChainTag::Solana, "3", "degen", "gen2")
            .unwrap();
        ledger
    }

    #[test]
    fn duplicate_add_is_conflict_and_leaves_table_unchanged() {
        let mut ledger = seeded();
        let before = ledger.records().to_vec();

        let result = ledger.add_wallet("0xA1", ChainTag::Ethereum, "9", "dupe", "gen9");
        assert_eq!(result, Err(LedgerError::Conflict("0xA1".to_string())));
        assert_eq!(ledger.records(), before.as_slice());
    }

    #[test]
    fn remove_unknown_is_not_found() {
        let mut ledger = seeded();
        assert_eq!(
            ledger.remove_wallet("0xFF").unwrap_err(),
            LedgerError::NotFound("0xFF".to_string())
        );
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn nickname_lookup_is_trimmed_and_case_insensitive() {
        let ledger = seeded();
        let record = ledger.find_by_nickname("  HOT WALLET ").unwrap();
        assert_eq!(record.address, "0xA1");
        assert!(ledger.find_by_nickname("nobody").is_none());
    }

    #[test]
    fn merge_only_touches_named_column_and_matched_addresses() {
        let mut ledger = seeded();
        ledger.merge_column(ColumnUpdate::TokenCoin(HashMap::from([(
            "0xA1".to_string(),
            Decimal::new(5, 1),
        )])));

        let rows = HashMap::from([
            ("0xA1".to_string(), Decimal::from(2)),
            ("0xGONE".to_string(), Decimal::from(99)),
        ]);
        ledger.merge_column(ColumnUpdate::NativeCoin(rows));

        let a1 = ledger.get("0xA1").unwrap();
        assert_eq!(a1.native_balance_coin, Decimal::from(2));
        // Token column owned by the token source is untouched by a native merge.
        assert_eq!(a1.token_balance_coin, Decimal::new(5, 1));
        // Untracked address dropped silently, other records untouched.
        assert_eq!(ledger.get("0xB2").unwrap().native_balance_coin, Decimal::ZERO);
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn token_merge_without_address_preserves_prior_value() {
        let mut ledger = seeded();
        ledger.merge_column(ColumnUpdate::TokenCoin(HashMap::from([(
            "0xA1".to_string(),
            Decimal::ONE,
        )])));

        // A later pass that found nothing for 0xA1 simply omits it.
        ledger.merge_column(ColumnUpdate::TokenCoin(HashMap::from([(
            "0xB2".to_string(),
            Decimal::TWO,
        )])));

        assert_eq!(ledger.get("0xA1").unwrap().token_balance_coin, Decimal::ONE);
        assert_eq!(ledger.get("0xB2").unwrap().token_balance_coin, Decimal::TWO);
    }

    #[test]
    fn derive_totals_is_idempotent() {
        let mut ledger = seeded();
        ledger.merge_column(ColumnUpdate::NativeCoin(HashMap::from([(
            "0xA1".to_string(),
            Decimal::new(25, 1),
        )])));
        ledger.merge_column(ColumnUpdate::TokenUsd(HashMap::from([(
            "0xA1".to_string(),
            Decimal::from(100),
        )])));

        ledger.derive_totals();
        let first = ledger.records().to_vec();
        ledger.derive_totals();
        assert_eq!(ledger.records(), first.as_slice());

        let a1 = ledger.get("0xA1").unwrap();
        assert_eq!(a1.total_coin, Decimal::new(25, 1));
        assert_eq!(a1.total_usd, Decimal::from(100));
    }

    #[test]
    fn status_changes_keep_record_in_table() {
        let mut ledger = seeded();
        ledger.set_status("0xB2", WalletStatus::Inactive).unwrap();
        assert!(!ledger.get("0xB2").unwrap().is_active());
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn addresses_on_filters_by_chain() {
        let ledger = seeded();
        assert_eq!(ledger.addresses_on(ChainTag::Ethereum), vec!["0xA1", "0xB2"]);
        assert_eq!(ledger.addresses_on(ChainTag::Bitcoin), Vec::<String>::new());
    }
}
