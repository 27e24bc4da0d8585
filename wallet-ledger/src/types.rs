//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money)
//! - Per-variant required parties (a `send` always has both wallets)

use crate::reference::ReferenceId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub use risk_engine::{TransferRisk, UserId};

/// Free-form transaction metadata
pub type Metadata = BTreeMap<String, String>;

/// ISO 4217 currency code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Currency {
    /// US Dollar
    USD,
    /// Euro
    EUR,
    /// British Pound
    GBP,
    /// UAE Dirham
    AED,
    /// Indian Rupee
    INR,
}

impl Currency {
    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::AED => "AED",
            Currency::INR => "INR",
        }
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::USD
    }
}

impl FromStr for Currency {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            "GBP" => Ok(Currency::GBP),
            "AED" => Ok(Currency::AED),
            "INR" => Ok(Currency::INR),
            other => Err(crate::Error::InvalidRequest(format!("unsupported currency {}", other))),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Wallet balance record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallet ID
    pub id: Uuid,
    /// Owning user
    pub user_id: UserId,
    /// Currency of every balance field
    pub currency: Currency,
    /// Ledger total
    pub balance: Decimal,
    /// Spendable now
    pub available_balance: Decimal,
    /// Reserved or in flight
    pub pending_balance: Decimal,
    /// Default wallet for the user in this currency
    pub is_primary: bool,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

/// Balance mutation direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Increase balance and available balance
    Credit,
    /// Decrease balance and available balance
    Debit,
}

/// Single balance mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    /// Target wallet
    pub wallet_id: Uuid,
    /// Positive amount
    pub amount: Decimal,
    /// Credit or debit
    pub direction: Direction,
}

impl Posting {
    /// Credit posting
    pub fn credit(wallet_id: Uuid, amount: Decimal) -> Self {
        Self { wallet_id, amount, direction: Direction::Credit }
    }

    /// Debit posting
    pub fn debit(wallet_id: Uuid, amount: Decimal) -> Self {
        Self { wallet_id, amount, direction: Direction::Debit }
    }
}

/// Transaction type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    /// User-to-user transfer, fee charged
    Send,
    /// Record of an incoming transfer
    Receive,
    /// External funds in
    Deposit,
    /// Funds out
    Withdrawal,
    /// Compensating transaction for a completed send
    Refund,
}

impl TransactionType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Send => "send",
            TransactionType::Receive => "receive",
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Refund => "refund",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum TransactionStatus {
    /// Created, not yet processed (only non-terminal status)
    Pending = 1,
    /// Balance effects applied
    Completed = 2,
    /// Processing failed, no balance effect retained
    Failed = 3,
    /// Withdrawn before processing
    Cancelled = 4,
    /// Compensated by a refund transaction
    Refunded = 5,
}

impl TransactionStatus {
    /// Check if status is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Allowed transitions: `pending -> {completed, failed, cancelled}` and
    /// `completed -> refunded`
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (
                TransactionStatus::Pending,
                TransactionStatus::Completed | TransactionStatus::Failed | TransactionStatus::Cancelled
            ) | (TransactionStatus::Completed, TransactionStatus::Refunded)
        )
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user together with the wallet resolved for them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    /// User
    pub user_id: UserId,
    /// Resolved wallet
    pub wallet_id: Uuid,
}

/// Transaction variant with the parties it requires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Debit sender by amount, credit receiver by net amount
    Send {
        /// Paying party
        sender: Party,
        /// Paid party
        receiver: Party,
    },
    /// Record-only
    Receive {
        /// Originating party, if known
        sender: Option<Party>,
        /// Receiving party
        receiver: Party,
    },
    /// Credit receiver by net amount
    Deposit {
        /// Credited party
        receiver: Party,
    },
    /// Debit sender by amount
    Withdrawal {
        /// Debited party
        sender: Party,
    },
    /// Compensation for a completed send
    Refund {
        /// Refunded send, when created through the refund operation
        original_transaction_id: Option<Uuid>,
        /// Party returning the funds
        sender: Option<Party>,
        /// Party receiving the funds back
        receiver: Party,
    },
}

impl TransactionKind {
    /// Type tag
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            TransactionKind::Send { .. } => TransactionType::Send,
            TransactionKind::Receive { .. } => TransactionType::Receive,
            TransactionKind::Deposit { .. } => TransactionType::Deposit,
            TransactionKind::Withdrawal { .. } => TransactionType::Withdrawal,
            TransactionKind::Refund { .. } => TransactionType::Refund,
        }
    }

    /// Sending party
    pub fn sender(&self) -> Option<&Party> {
        match self {
            TransactionKind::Send { sender, .. } | TransactionKind::Withdrawal { sender } => {
                Some(sender)
            }
            TransactionKind::Receive { sender, .. } | TransactionKind::Refund { sender, .. } => {
                sender.as_ref()
            }
            TransactionKind::Deposit { .. } => None,
        }
    }

    /// Receiving party
    pub fn receiver(&self) -> Option<&Party> {
        match self {
            TransactionKind::Send { receiver, .. }
            | TransactionKind::Receive { receiver, .. }
            | TransactionKind::Deposit { receiver }
            | TransactionKind::Refund { receiver, .. } => Some(receiver),
            TransactionKind::Withdrawal { .. } => None,
        }
    }
}

/// Ledger transaction record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Internal identity (UUIDv7 for time-ordering)
    pub id: Uuid,
    /// Externally visible, immutable reference
    pub reference_id: ReferenceId,
    /// Variant and parties
    pub kind: TransactionKind,
    /// Gross amount, pre-fee
    pub amount: Decimal,
    /// Currency
    pub currency: Currency,
    /// Fee retained by the ledger
    pub fee: Decimal,
    /// `amount - fee`
    pub net_amount: Decimal,
    /// Current status
    pub status: TransactionStatus,
    /// Human description
    pub description: Option<String>,
    /// Additional metadata
    #[serde(default)]
    pub metadata: Metadata,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Type tag
    pub fn transaction_type(&self) -> TransactionType {
        self.kind.transaction_type()
    }

    /// Sending user
    pub fn sender_id(&self) -> Option<&UserId> {
        self.kind.sender().map(|p| &p.user_id)
    }

    /// Receiving user
    pub fn receiver_id(&self) -> Option<&UserId> {
        self.kind.receiver().map(|p| &p.user_id)
    }

    /// Whether the user is a party
    pub fn involves(&self, user: &UserId) -> bool {
        self.sender_id() == Some(user) || self.receiver_id() == Some(user)
    }

    /// Balance mutations processing applies
    ///
    /// `receive` and `refund` records carry no mutation of their own; the
    /// refund operation builds its postings from the original send.
    pub fn postings(&self) -> Vec<Posting> {
        match &self.kind {
            TransactionKind::Send { sender, receiver } => vec![
                Posting::debit(sender.wallet_id, self.amount),
                Posting::credit(receiver.wallet_id, self.net_amount),
            ],
            TransactionKind::Deposit { receiver } => {
                vec![Posting::credit(receiver.wallet_id, self.net_amount)]
            }
            TransactionKind::Withdrawal { sender } => {
                vec![Posting::debit(sender.wallet_id, self.amount)]
            }
            TransactionKind::Receive { .. } | TransactionKind::Refund { .. } => Vec::new(),
        }
    }

    /// Move to `next`, enforcing the state machine
    pub fn transition(&mut self, next: TransactionStatus) -> crate::Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(crate::Error::InvalidState {
                transaction_id: self.id,
                status: self.status,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Transaction creation request
#[derive(Debug, Clone)]
pub struct NewTransaction {
    /// Sending user
    pub sender_id: Option<UserId>,
    /// Receiving user
    pub receiver_id: Option<UserId>,
    /// Gross amount
    pub amount: Decimal,
    /// Currency (selects the primary wallets)
    pub currency: Currency,
    /// Type tag
    pub transaction_type: TransactionType,
    /// Human description
    pub description: Option<String>,
    /// Additional metadata
    pub metadata: Metadata,
    /// Originating IP address, passed to the risk screen
    pub ip_address: Option<String>,
}

impl NewTransaction {
    fn new(
        transaction_type: TransactionType,
        sender_id: Option<UserId>,
        receiver_id: Option<UserId>,
        amount: Decimal,
    ) -> Self {
        Self {
            sender_id,
            receiver_id,
            amount,
            currency: Currency::default(),
            transaction_type,
            description: None,
            metadata: Metadata::new(),
            ip_address: None,
        }
    }

    /// User-to-user send
    pub fn send(sender: impl Into<UserId>, receiver: impl Into<UserId>, amount: Decimal) -> Self {
        Self::new(TransactionType::Send, Some(sender.into()), Some(receiver.into()), amount)
    }

    /// Deposit into the receiver's primary wallet
    pub fn deposit(receiver: impl Into<UserId>, amount: Decimal) -> Self {
        Self::new(TransactionType::Deposit, None, Some(receiver.into()), amount)
    }

    /// Withdrawal from the sender's primary wallet
    pub fn withdrawal(sender: impl Into<UserId>, amount: Decimal) -> Self {
        Self::new(TransactionType::Withdrawal, Some(sender.into()), None, amount)
    }

    /// Record-only transaction of the given type
    pub fn record(
        transaction_type: TransactionType,
        sender: Option<UserId>,
        receiver: impl Into<UserId>,
        amount: Decimal,
    ) -> Self {
        Self::new(transaction_type, sender, Some(receiver.into()), amount)
    }

    /// Set currency
    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set originating IP address
    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }
}

/// Transfer-intake request
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Paying user
    pub sender_id: UserId,
    /// Paid user
    pub receiver_id: UserId,
    /// Gross amount
    pub amount: Decimal,
    /// Currency
    pub currency: Currency,
    /// Human description
    pub description: Option<String>,
    /// Originating IP address
    pub ip_address: Option<String>,
}

impl From<TransferRequest> for NewTransaction {
    fn from(req: TransferRequest) -> Self {
        let mut tx = NewTransaction::send(req.sender_id, req.receiver_id, req.amount)
            .with_currency(req.currency);
        tx.description = req.description;
        tx.ip_address = req.ip_address;
        tx
    }
}

/// Transfer-intake result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Transaction identity
    pub transaction_id: Uuid,
    /// External reference
    pub reference_id: ReferenceId,
    /// Gross amount
    pub amount: Decimal,
    /// Fee
    pub fee: Decimal,
    /// Credited amount
    pub net_amount: Decimal,
    /// Final status
    pub status: TransactionStatus,
    /// Risk verdict from the pre-creation screen
    pub risk: TransferRisk,
}

/// Transaction history query
#[derive(Debug, Clone)]
pub struct TransactionQuery {
    /// Page size
    pub limit: usize,
    /// Rows to skip
    pub offset: usize,
    /// Status filter
    pub status: Option<TransactionStatus>,
    /// Inclusive lower bound on creation time
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on creation time
    pub end: Option<DateTime<Utc>>,
}

impl Default for TransactionQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
            status: None,
            start: None,
            end: None,
        }
    }
}

impl TransactionQuery {
    /// Whether a transaction passes status and time filters
    pub fn matches(&self, tx: &Transaction) -> bool {
        self.status.map_or(true, |s| tx.status == s)
            && self.start.map_or(true, |start| tx.created_at >= start)
            && self.end.map_or(true, |end| tx.created_at <= end)
    }
}

/// Per-currency balance totals for a user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSummary {
    /// Sum of `balance`
    pub total_balance: Decimal,
    /// Sum of `available_balance`
    pub available_balance: Decimal,
    /// Sum of `pending_balance`
    pub pending_balance: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn party(user: &str) -> Party {
        Party {
            user_id: UserId::new(user),
            wallet_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_currency_from_str() {
        assert_eq!("USD".parse::<Currency>().unwrap(), Currency::USD);
        assert_eq!("EUR".parse::<Currency>().unwrap(), Currency::EUR);
        assert!("XYZ".parse::<Currency>().is_err());
    }

    #[test]
    fn test_status_state_machine() {
        use TransactionStatus::*;

        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Completed.can_transition_to(Refunded));

        for terminal in [Completed, Failed, Cancelled, Refunded] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(Pending));
            assert!(!terminal.can_transition_to(Completed));
            assert!(!terminal.can_transition_to(Failed));
        }
        assert!(!Pending.is_terminal());
        assert!(!Failed.can_transition_to(Refunded));
    }

    #[test]
    fn test_send_postings_retain_fee() {
        let sender = party("alice");
        let receiver = party("bob");
        let tx = Transaction {
            id: Uuid::now_v7(),
            reference_id: ReferenceId::generate(),
            kind: TransactionKind::Send {
                sender: sender.clone(),
                receiver: receiver.clone(),
            },
            amount: Decimal::new(10000, 2),
            currency: Currency::USD,
            fee: Decimal::new(320, 2),
            net_amount: Decimal::new(9680, 2),
            status: TransactionStatus::Pending,
            description: None,
            metadata: Metadata::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let postings = tx.postings();
        assert_eq!(
            postings,
            vec![
                Posting::debit(sender.wallet_id, Decimal::new(10000, 2)),
                Posting::credit(receiver.wallet_id, Decimal::new(9680, 2)),
            ]
        );
        assert!(tx.involves(&UserId::new("bob")));
        assert!(!tx.involves(&UserId::new("carol")));
    }

    #[test]
    fn test_record_only_kinds_have_no_postings() {
        let kind = TransactionKind::Refund {
            original_transaction_id: None,
            sender: None,
            receiver: party("bob"),
        };
        assert_eq!(kind.transaction_type(), TransactionType::Refund);
        assert!(kind.sender().is_none());

        let kind = TransactionKind::Withdrawal { sender: party("alice") };
        assert!(kind.receiver().is_none());
        assert_eq!(kind.sender().unwrap().user_id, UserId::new("alice"));
    }
}
