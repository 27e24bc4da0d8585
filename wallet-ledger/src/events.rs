//! Domain events and the collaborators they are handed to
//!
//! The audit sink and the notifier are implemented outside the ledger.
//! Both are fire-and-forget from the ledger's point of view: a failure is
//! logged and never changes the outcome of the operation that emitted it.

use crate::{
    reference::ReferenceId,
    types::{Currency, Transaction, TransactionStatus, TransactionType, UserId},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Ledger event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Pending record created
    TransactionCreated,
    /// Balance effects applied
    TransactionCompleted,
    /// Processing failed
    TransactionFailed,
    /// Withdrawn before processing
    TransactionCancelled,
    /// Compensated by a refund
    TransactionRefunded,
}

impl EventType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TransactionCreated => "transaction.created",
            EventType::TransactionCompleted => "transaction.completed",
            EventType::TransactionFailed => "transaction.failed",
            EventType::TransactionCancelled => "transaction.cancelled",
            EventType::TransactionRefunded => "transaction.refunded",
        }
    }

    /// Event announcing a transaction's current status
    pub fn for_status(status: TransactionStatus) -> Self {
        match status {
            TransactionStatus::Pending => EventType::TransactionCreated,
            TransactionStatus::Completed => EventType::TransactionCompleted,
            TransactionStatus::Failed => EventType::TransactionFailed,
            TransactionStatus::Cancelled => EventType::TransactionCancelled,
            TransactionStatus::Refunded => EventType::TransactionRefunded,
        }
    }
}

/// Domain event emitted on every transaction status change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Event ID
    pub event_id: Uuid,
    /// Event type
    pub event_type: EventType,
    /// Transaction
    pub transaction_id: Uuid,
    /// External reference
    pub reference_id: ReferenceId,
    /// Transaction type
    pub transaction_type: TransactionType,
    /// Status after the change
    pub status: TransactionStatus,
    /// Gross amount
    pub amount: Decimal,
    /// Fee
    pub fee: Decimal,
    /// Net amount
    pub net_amount: Decimal,
    /// Currency
    pub currency: Currency,
    /// Sending user
    pub sender_id: Option<UserId>,
    /// Receiving user
    pub receiver_id: Option<UserId>,
    /// Event timestamp
    pub occurred_at: DateTime<Utc>,
}

impl LedgerEvent {
    /// Snapshot of a transaction's current state
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: EventType::for_status(tx.status),
            transaction_id: tx.id,
            reference_id: tx.reference_id.clone(),
            transaction_type: tx.transaction_type(),
            status: tx.status,
            amount: tx.amount,
            fee: tx.fee,
            net_amount: tx.net_amount,
            currency: tx.currency,
            sender_id: tx.sender_id().cloned(),
            receiver_id: tx.receiver_id().cloned(),
            occurred_at: Utc::now(),
        }
    }

    /// Users who are told about the event
    pub fn recipients(&self) -> Vec<&UserId> {
        let mut out: Vec<&UserId> = self.sender_id.iter().collect();
        if let Some(receiver) = &self.receiver_id {
            if self.sender_id.as_ref() != Some(receiver) {
                out.push(receiver);
            }
        }
        out
    }
}

/// One audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// What happened, e.g. `transaction.completed` or `transaction.process_failed`
    pub action: String,
    /// Acting user, when known
    pub actor: Option<UserId>,
    /// Affected resource, e.g. `transaction:<id>`
    pub resource: String,
    /// State before the change
    pub old_value: Option<serde_json::Value>,
    /// State after the change
    pub new_value: Option<serde_json::Value>,
    /// Error message for failure records
    pub error: Option<String>,
    /// Record timestamp
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    /// New record with no values attached
    pub fn new(action: impl Into<String>, actor: Option<UserId>, resource: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            actor,
            resource: resource.into(),
            old_value: None,
            new_value: None,
            error: None,
            recorded_at: Utc::now(),
        }
    }

    /// Attach before/after values
    pub fn with_values(
        mut self,
        old_value: Option<serde_json::Value>,
        new_value: Option<serde_json::Value>,
    ) -> Self {
        self.old_value = old_value;
        self.new_value = new_value;
        self
    }

    /// Attach an error
    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Append-only audit sink
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record one entry
    async fn record(&self, record: AuditRecord) -> anyhow::Result<()>;
}

/// Payload plus its signature, as handed to the notifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedNotification {
    /// Event type wire name
    pub event: String,
    /// JSON payload
    pub payload: String,
    /// Hex HMAC-SHA256 of `payload`
    pub signature: String,
}

/// Best-effort notification dispatcher
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification to a user or merchant
    async fn notify(&self, recipient: &UserId, notification: SignedNotification) -> anyhow::Result<()>;
}

/// Signs notification payloads with a shared secret
#[derive(Clone)]
pub struct WebhookSigner {
    mac: HmacSha256,
}

impl std::fmt::Debug for WebhookSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSigner").finish_non_exhaustive()
    }
}

impl WebhookSigner {
    /// Create signer for a secret
    pub fn new(secret: &[u8]) -> crate::Result<Self> {
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| crate::Error::Config(format!("invalid webhook secret: {}", e)))?;
        Ok(Self { mac })
    }

    /// Hex HMAC-SHA256 of the payload
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time signature check
    pub fn verify(&self, payload: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    }

    /// Serialize and sign an event
    pub fn sign_event(&self, event: &LedgerEvent) -> serde_json::Result<SignedNotification> {
        let payload = serde_json::to_string(event)?;
        let signature = self.sign(payload.as_bytes());
        Ok(SignedNotification {
            event: event.event_type.as_str().to_string(),
            payload,
            signature,
        })
    }
}

/// Audit sink that writes records to the tracing pipeline
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) -> anyhow::Result<()> {
        match &record.error {
            Some(error) => tracing::warn!(
                target: "audit",
                action = %record.action,
                resource = %record.resource,
                actor = ?record.actor,
                error = %error,
                "audit"
            ),
            None => tracing::info!(
                target: "audit",
                action = %record.action,
                resource = %record.resource,
                actor = ?record.actor,
                "audit"
            ),
        }
        Ok(())
    }
}

/// Audit sink that keeps records in memory
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditSink {
    /// Create empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Records so far, oldest first
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, record: AuditRecord) -> anyhow::Result<()> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// Notifier that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _recipient: &UserId, _notification: SignedNotification) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Notifier that keeps deliveries in memory
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    sent: Mutex<Vec<(UserId, SignedNotification)>>,
}

impl InMemoryNotifier {
    /// Create empty notifier
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliveries so far, oldest first
    pub fn sent(&self) -> Vec<(UserId, SignedNotification)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, recipient: &UserId, notification: SignedNotification) -> anyhow::Result<()> {
        self.sent.lock().push((recipient.clone(), notification));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let signer = WebhookSigner::new(b"shared-secret").unwrap();
        let signature = signer.sign(b"{\"amount\":\"100\"}");

        assert_eq!(signature.len(), 64);
        assert!(signer.verify(b"{\"amount\":\"100\"}", &signature));
        assert!(!signer.verify(b"{\"amount\":\"1000\"}", &signature));
        assert!(!signer.verify(b"{\"amount\":\"100\"}", "not-hex"));

        let other = WebhookSigner::new(b"other-secret").unwrap();
        assert!(!other.verify(b"{\"amount\":\"100\"}", &signature));
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        let signer = WebhookSigner::new(b"Jefe").unwrap();
        assert_eq!(
            signer.sign(b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_event_type_for_status() {
        assert_eq!(
            EventType::for_status(TransactionStatus::Completed).as_str(),
            "transaction.completed"
        );
        assert_eq!(
            EventType::for_status(TransactionStatus::Refunded),
            EventType::TransactionRefunded
        );
    }

    #[tokio::test]
    async fn test_in_memory_collaborators() {
        let sink = InMemoryAuditSink::new();
        sink.record(
            AuditRecord::new("transaction.process_failed", None, "transaction:1")
                .with_error("Insufficient funds"),
        )
        .await
        .unwrap();
        assert_eq!(sink.records().len(), 1);
        assert_eq!(sink.records()[0].error.as_deref(), Some("Insufficient funds"));

        let notifier = InMemoryNotifier::new();
        let notification = SignedNotification {
            event: "transaction.completed".to_string(),
            payload: "{}".to_string(),
            signature: String::new(),
        };
        notifier.notify(&UserId::new("bob"), notification).await.unwrap();
        assert_eq!(notifier.sent()[0].0, UserId::new("bob"));
    }
}
