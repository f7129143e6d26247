use thiserror::Error;

/// Expected outcomes of ledger mutations. Callers branch on these rather
/// than treating them as failures.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum LedgerError {
    #[error("wallet {0} is already tracked")]
    Conflict(String),
    #[error("no tracked wallet matches {0}")]
    NotFound(String),
}

/// Failures of a single adapter call. Both variants degrade exactly one
/// item (one address, one token) to "no update this pass".
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("malformed source payload: {0}")]
    Decode(String),
}

pub type SourceResult<T> = std::result::Result<T, SourceError>;
