//! Durable CSV table backing the in-memory ledger.

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use portfolio_core::{ChainTag, Ledger, LedgerError, WalletRecord};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("ledger file unreadable: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed ledger row: {0}")]
    Malformed(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Owns the ledger file path and the loaded table. All durable reads and
/// writes go through here; callers decide when to save, except for
/// `add_wallet`, which persists immediately so a manual entry survives a
/// later crash.
#[derive(Debug)]
pub struct LedgerStore {
    path: PathBuf,
    ledger: Ledger,
}

impl LedgerStore {
    /// Read the durable table. An absent file is not an error: it yields
    /// an empty ledger and the canonical schema is created on first save.
    /// Malformed data is. Any other open failure surfaces as an I/O error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("Ledger file {} not found, starting empty", path.display());
                return Ok(Self {
                    path,
                    ledger: Ledger::new(),
                });
            }
            Err(e) => return Err(StorageError::Io(e)),
        };
        let mut reader = csv::Reader::from_reader(file);

        let mut records = Vec::new();
        for row in reader.deserialize::<WalletRecord>() {
            records.push(row?);
        }
        debug!("Loaded {} wallet(s) from {}", records.len(), path.display());
        Ok(Self {
            path,
            ledger: Ledger::from_records(records),
        })
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    /// Rewrite the whole table in canonical column order. Idempotent;
    /// repeated saves during a multi-step reconciliation are wasteful but
    /// harmless.
    pub fn save(&self) -> Result<()> {
        let mut writer = csv::Writer::from_path(&self.path)?;
        for record in self.ledger.records() {
            writer.serialize(record)?;
        }
        writer.flush()?;
        debug!(
            "Saved {} wallet(s) to {}",
            self.ledger.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Append a wallet and persist immediately. A duplicate address is
    /// reported as a conflict without touching the file.
    pub fn add_wallet(
        &mut self,
        address: &str,
        chain: ChainTag,
        id: &str,
        nickname: &str,
        generation: &str,
    ) -> std::result::Result<(), AddError> {
        self.ledger
            .add_wallet(address, chain, id, nickname, generation)?;
        if let Err(e) = self.save() {
            // The in-memory add stands; the operator is told the disk copy
            // is behind.
            warn!("Wallet {} added but not persisted: {}", address, e);
            return Err(AddError::Storage(e));
        }
        Ok(())
    }

    pub fn remove_wallet(&mut self, address: &str) -> std::result::Result<WalletRecord, LedgerError> {
        self.ledger.remove_wallet(address)
    }
}

/// Failure modes of the add-and-persist operation.
#[derive(Error, Debug)]
pub enum AddError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
