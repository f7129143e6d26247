use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SourceError;

/// Supported blockchain networks. `Unknown` is a valid resting state for
/// addresses the classifier has not (or could not) place yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainTag {
    Bitcoin,
    Ethereum,
    Solana,
    Unknown,
}

impl ChainTag {
    /// Fixed decimal exponent of the chain's smallest on-chain unit.
    /// This is a per-chain constant, never derived from payload data.
    pub fn native_decimals(&self) -> u32 {
        match self {
            ChainTag::Bitcoin => 8,
            ChainTag::Ethereum => 18,
            ChainTag::Solana => 9,
            ChainTag::Unknown => 0,
        }
    }

    pub fn native_symbol(&self) -> &'static str {
        match self {
            ChainTag::Bitcoin => "BTC",
            ChainTag::Ethereum => "ETH",
            ChainTag::Solana => "SOL",
            ChainTag::Unknown => "?",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainTag::Bitcoin => "bitcoin",
            ChainTag::Ethereum => "ethereum",
            ChainTag::Solana => "solana",
            ChainTag::Unknown => "unknown",
        }
    }

    /// Chains the reconciler can be pointed at (everything except Unknown).
    pub fn reconcilable() -> &'static [ChainTag] {
        &[ChainTag::Bitcoin, ChainTag::Ethereum, ChainTag::Solana]
    }
}

impl fmt::Display for ChainTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainTag {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "bitcoin" | "btc" => Ok(ChainTag::Bitcoin),
            "ethereum" | "eth" => Ok(ChainTag::Ethereum),
            "solana" | "sol" => Ok(ChainTag::Solana),
            "unknown" | "" => Ok(ChainTag::Unknown),
            other => Err(format!("unsupported chain: '{}'", other)),
        }
    }
}

/// Tracking status of a wallet. Inactive wallets stay in storage and keep
/// reconciling, but are excluded from display aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletStatus {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "INACTIVE")]
    Inactive,
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletStatus::Active => f.write_str("ACTIVE"),
            WalletStatus::Inactive => f.write_str("INACTIVE"),
        }
    }
}

impl FromStr for WalletStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_uppercase().as_str() {
            "ACTIVE" => Ok(WalletStatus::Active),
            "INACTIVE" => Ok(WalletStatus::Inactive),
            other => Err(format!("unsupported status: '{}'", other)),
        }
    }
}

/// One tracked address. Field order is the canonical column order of the
/// durable table; collaborators parse it positionally, so do not reorder.
///
/// Every balance column is always present and zero-defaulted: "never
/// fetched" and "fetched as zero" are represented identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletRecord {
    /// Natural key, unique across the ledger.
    pub address: String,

    /// Chain this address lives on.
    pub chain: ChainTag,

    /// Free-form operator metadata, opaque to the engine.
    pub id: String,
    pub nickname: String,
    pub generation: String,

    pub status: WalletStatus,

    /// Native-coin balance in the chain's smallest unit. Owned by native
    /// balance passes only.
    pub native_balance_raw: u128,
    pub native_balance_coin: Decimal,
    pub native_balance_usd: Decimal,

    /// Aggregate value of all non-dust token holdings, in native-coin
    /// terms. Owned by token passes only.
    pub token_balance_coin: Decimal,
    pub token_balance_usd: Decimal,

    /// Derived columns, written exclusively by total derivation.
    pub total_coin: Decimal,
    pub total_usd: Decimal,
}

impl WalletRecord {
    pub fn new(
        address: impl Into<String>,
        chain: ChainTag,
        id: impl Into<String>,
        nickname: impl Into<String>,
        generation: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            chain,
            id: id.into(),
            nickname: nickname.into(),
            generation: generation.into(),
            status: WalletStatus::Active,
            native_balance_raw: 0,
            native_balance_coin: Decimal::ZERO,
            native_balance_usd: Decimal::ZERO,
            token_balance_coin: Decimal::ZERO,
            token_balance_usd: Decimal::ZERO,
            total_coin: Decimal::ZERO,
            total_usd: Decimal::ZERO,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == WalletStatus::Active
    }
}

/// One non-native token position as reported by a token balance source.
/// Adapters filter zero-amount entries before these reach the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHolding {
    /// Token contract (mint) address.
    pub contract: String,
    /// Balance in the token's smallest unit.
    pub raw_amount: u128,
    /// The token's own decimal exponent.
    pub decimals: u32,
}

/// Convert a smallest-unit integer balance to coin units using a fixed
/// decimal exponent. A balance too large for decimal arithmetic is a
/// per-item decode failure, not a panic.
pub fn raw_to_coin(raw: u128, decimals: u32) -> Result<Decimal, SourceError> {
    if decimals > 28 {
        return Err(SourceError::Decode(format!(
            "decimal exponent {} exceeds supported precision",
            decimals
        )));
    }
    let mantissa = i128::try_from(raw)
        .map_err(|_| SourceError::Decode(format!("raw balance {} out of range", raw)))?;
    Decimal::try_from_i128_with_scale(mantissa, decimals)
        .map(|d| d.normalize())
        .map_err(|e| SourceError::Decode(format!("raw balance {} not representable: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_to_coin_applies_chain_exponent() {
        let coin = raw_to_coin(2_500_000_000_000_000_000, 18).unwrap();
        assert_eq!(coin, Decimal::new(25, 1));
    }

    #[test]
    fn raw_to_coin_rejects_absurd_exponent() {
        assert!(raw_to_coin(1, 40).is_err());
    }

    #[test]
    fn chain_aliases_parse() {
        assert_eq!("ETH".parse::<ChainTag>().unwrap(), ChainTag::Ethereum);
        assert_eq!(" sol ".parse::<ChainTag>().unwrap(), ChainTag::Solana);
        assert!("dogecoin".parse::<ChainTag>().is_err());
    }

    #[test]
    fn new_record_starts_zeroed_and_active() {
        let record = WalletRecord::new("0xA1", ChainTag::Ethereum, "1", "main", "gen1");
        assert!(record.is_active());
        assert_eq!(record.native_balance_raw, 0);
        assert_eq!(record.total_usd, Decimal::ZERO);
    }
}
