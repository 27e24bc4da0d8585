//! Read-only views of past activity the heuristics evaluate against

use crate::{Result, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Sender-side transaction history
///
/// Implemented by the ledger's storage. Every call is a store access and may
/// suspend; failures surface as [`crate::Error::HistoryUnavailable`].
#[async_trait]
pub trait TransactionHistory: Send + Sync {
    /// Amounts of the sender's most recent completed transactions, newest first
    async fn recent_completed_amounts(&self, sender: &UserId, limit: usize) -> Result<Vec<Decimal>>;

    /// Number of transactions (any status) the sender created since `since`
    async fn count_sent_since(&self, sender: &UserId, since: DateTime<Utc>) -> Result<usize>;

    /// Whether the sender has a completed transaction to this receiver
    async fn has_completed_transfer_to(&self, sender: &UserId, receiver: &UserId) -> Result<bool>;
}

/// One login attempt as seen by the auth collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginAttempt {
    /// User attempting to log in
    pub user_id: UserId,
    /// Address of the attempt
    pub ip_address: String,
    /// Client user agent
    pub user_agent: String,
    /// Whether credentials were accepted
    pub succeeded: bool,
    /// Attempt timestamp
    pub at: DateTime<Utc>,
}

/// Login history consulted by the login monitor
#[async_trait]
pub trait LoginHistory: Send + Sync {
    /// Failed attempts for the user since `since`
    async fn failed_attempts_since(&self, user: &UserId, since: DateTime<Utc>) -> Result<usize>;

    /// The user's most recent successful logins, newest first
    async fn recent_successful_logins(&self, user: &UserId, limit: usize) -> Result<Vec<LoginAttempt>>;
}
