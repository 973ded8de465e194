//! Error types for ledger operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Derivation error: {0}")]
    Derivation(String),

    #[error("Duplicate key: address {address} already exists for wallet {wallet_id}")]
    DuplicateKey { wallet_id: i64, address: String },

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Argument count mismatch for {contract}: expected {expected}, got {got}")]
    ArgumentCount {
        contract: String,
        expected: usize,
        got: usize,
    },

    #[error("Function '{function}' not found in contract {contract}")]
    FunctionNotFound { contract: String, function: String },

    #[error("Insufficient funds: need {needed} sats, have {available} sats")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("Fee of {fee} sats exceeds cap of {cap} sats")]
    FeeExceeded { fee: u64, cap: u64 },

    #[error("Persistence error: {0}")]
    Persistence(#[from] StorageError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Wallet already exists: {0}")]
    WalletExists(String),

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Contract not found: {0}")]
    ContractNotFound(String),

    #[error("No key or contract owns address {0}")]
    UnknownOwner(String),

    #[error("Transaction error: {0}")]
    Transaction(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt snapshot {path}: {reason}")]
    CorruptSnapshot { path: String, reason: String },

    #[error("Invalid column {column}: {reason}")]
    InvalidColumn { column: String, reason: String },
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::Persistence(StorageError::Sqlite(e))
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Persistence(StorageError::Json(e))
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(e: reqwest::Error) -> Self {
        LedgerError::Network(e.to_string())
    }
}

impl LedgerError {
    /// Whether re-invoking the failed operation may succeed.
    ///
    /// Domain validation failures never do; store and network failures might.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Network(_) | LedgerError::Persistence(_))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LedgerError::Network("timeout".into()).is_retryable());
        assert!(LedgerError::from(rusqlite::Error::InvalidQuery).is_retryable());
        assert!(!LedgerError::FeeExceeded { fee: 2000, cap: 1000 }.is_retryable());
        assert!(!LedgerError::InsufficientFunds {
            needed: 10,
            available: 5
        }
        .is_retryable());
    }

    #[test]
    fn test_display_messages() {
        let err = LedgerError::ArgumentCount {
            contract: "P2PKH".into(),
            expected: 1,
            got: 2,
        };
        assert_eq!(
            err.to_string(),
            "Argument count mismatch for P2PKH: expected 1, got 2"
        );
    }
}
