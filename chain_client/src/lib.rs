//! HTTP adapters for the per-chain balance capabilities.

pub mod etherscan;
pub mod evm_rpc;
pub mod probe;
pub mod solana_rpc;

use portfolio_core::SourceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainClientError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, ChainClientError>;

impl From<ChainClientError> for SourceError {
    fn from(err: ChainClientError) -> Self {
        match err {
            ChainClientError::Http(e) => SourceError::Unavailable(e.to_string()),
            ChainClientError::Rpc(message) => SourceError::Unavailable(message),
            ChainClientError::Json(e) => SourceError::Decode(e.to_string()),
            ChainClientError::InvalidResponse(message) => SourceError::Decode(message),
        }
    }
}

/// Parse a 0x-prefixed hex quantity as returned by EVM JSON-RPC.
pub(crate) fn parse_hex_quantity(raw: &str) -> Result<u128> {
    let digits = raw.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| ChainClientError::InvalidResponse(format!("bad hex quantity '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_quantities_decode() {
        assert_eq!(parse_hex_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_hex_quantity("0x").unwrap(), 0);
        assert_eq!(
            parse_hex_quantity("0x22b1c8c1227a0000").unwrap(),
            2_500_000_000_000_000_000
        );
        assert!(parse_hex_quantity("0xzz").is_err());
    }
}
