//! Wallet Ledger Core
//!
//! Multi-currency wallet ledger with fee-bearing transfers and pre-creation
//! risk screening.
//!
//! # Architecture
//!
//! - **Single Writer**: One actor owns every balance change, so concurrent debits never overdraw
//! - **Atomic Commits**: Wallets, transaction record and indices land in one RocksDB batch
//! - **Risk Screening**: Sends and withdrawals are scored before a pending record exists
//! - **Collaborators**: Audit and notification are traits, failures never roll back a commit
//!
//! # Invariants
//!
//! - Money conservation: for a completed send, Σ(debits) == Σ(credits) + fee
//! - `0 <= available_balance <= balance` for every wallet
//! - `net_amount == amount - fee` for every transaction
//! - Terminal statuses never change, except `completed -> refunded`

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod reference;
pub mod fees;
pub mod storage;
pub mod cache;
pub mod wallet;
pub mod ledger;
pub mod events;
pub mod error;
pub mod actor;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, ErrorKind, Result};
pub use types::{
    BalanceSummary, Currency, Direction, NewTransaction, Party, Posting, Transaction,
    TransactionKind, TransactionQuery, TransactionStatus, TransactionType, TransferReceipt,
    TransferRequest, TransferRisk, UserId, Wallet,
};
pub use reference::ReferenceId;
pub use fees::{FeePolicy, FeeSplit};
pub use storage::Storage;
pub use wallet::WalletStore;
pub use ledger::{Ledger, LedgerBuilder};
pub use events::{
    AuditRecord, AuditSink, EventType, InMemoryAuditSink, InMemoryNotifier, LedgerEvent,
    NoopNotifier, Notifier, SignedNotification, TracingAuditSink, WebhookSigner,
};
pub use config::{Config, RiskFailurePolicy};
