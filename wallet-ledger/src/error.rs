//! Error types for the ledger

use crate::types::TransactionStatus;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Non-positive or malformed amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Missing wallet (or missing primary wallet for a party)
    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    /// Debit would take available balance below zero
    #[error("Insufficient funds in wallet {wallet_id}: requested {requested}, available {available}")]
    InsufficientFunds {
        /// Debited wallet
        wallet_id: Uuid,
        /// Debit amount
        requested: Decimal,
        /// Available balance at the time of the attempt
        available: Decimal,
    },

    /// Transaction is not in a status that allows the operation
    #[error("Invalid state: transaction {transaction_id} is {status}")]
    InvalidState {
        /// Transaction
        transaction_id: Uuid,
        /// Current status
        status: TransactionStatus,
    },

    /// Transaction not found
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// Security alert not found
    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    /// Request is structurally invalid (missing party, wrong wallet owner)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Risk screen refused the transfer
    #[error("Transfer refused by risk screen: score {score} ({reasons})")]
    RiskRejected {
        /// Risk score
        score: u32,
        /// Fired heuristics, joined
        reasons: String,
    },

    /// Caller deadline passed before commit
    #[error("Deadline exceeded before commit: {0}")]
    DeadlineExceeded(String),

    /// Storage error (RocksDB, risk history, closed writer mailbox)
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure taxonomy reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller error, amount rejected
    InvalidAmount,
    /// Caller/state error, a party has no usable wallet
    WalletNotFound,
    /// Caller error, transfer must not proceed
    InsufficientFunds,
    /// Programmer or replay error
    InvalidState,
    /// Unknown record
    NotFound,
    /// Malformed request or refused by policy
    Rejected,
    /// Transient persistence failure; retry is possible
    StoreUnavailable,
    /// Local misconfiguration
    Internal,
}

impl Error {
    /// Taxonomy kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidAmount(_) => ErrorKind::InvalidAmount,
            Error::WalletNotFound(_) => ErrorKind::WalletNotFound,
            Error::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Error::InvalidState { .. } => ErrorKind::InvalidState,
            Error::TransactionNotFound(_) | Error::AlertNotFound(_) => ErrorKind::NotFound,
            Error::InvalidRequest(_) | Error::RiskRejected { .. } => ErrorKind::Rejected,
            Error::DeadlineExceeded(_) | Error::StoreUnavailable(_) | Error::Io(_) => {
                ErrorKind::StoreUnavailable
            }
            Error::Serialization(_) | Error::Config(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may retry the same request
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::StoreUnavailable
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}

impl From<risk_engine::Error> for Error {
    fn from(err: risk_engine::Error) -> Self {
        match err {
            risk_engine::Error::InvalidConfig(msg) => Error::Config(msg),
            risk_engine::Error::AlertNotFound(msg) => Error::AlertNotFound(msg),
            risk_engine::Error::InvalidTransition(msg) | risk_engine::Error::Scoring(msg) => {
                Error::InvalidRequest(msg)
            }
            other => Error::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<Error> for risk_engine::Error {
    fn from(err: Error) -> Self {
        risk_engine::Error::HistoryUnavailable(err.to_string())
    }
}
