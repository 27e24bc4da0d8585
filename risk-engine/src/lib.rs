//! Risk Engine for the wallet ledger
//!
//! Scores transfers against the sender's trailing history, screens logins,
//! and records security alerts for the reviewer workflow.
//!
//! The engine never touches wallet balances: it reads transaction history
//! through [`TransactionHistory`] and writes only [`SecurityAlert`] records.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod types;
pub mod history;
pub mod alerts;
pub mod scoring;
pub mod login;

pub use error::{Error, Result};
pub use types::*;
pub use history::{LoginAttempt, LoginHistory, TransactionHistory};
pub use alerts::{AlertFilter, AlertStore, InMemoryAlertStore};
pub use scoring::{HistoryFacts, ScoringConfig, TransferScorer};
pub use login::{LoginConfig, LoginLog, LoginMonitor, LoginVerdict};
