//! Core types for risk engine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Owning user reference, issued by the external identity provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create new user ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Additive risk score; not a probability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RiskScore(u32);

impl RiskScore {
    /// Score with no evidence
    pub const ZERO: RiskScore = RiskScore(0);

    /// Create new risk score
    pub fn new(points: u32) -> Self {
        Self(points)
    }

    /// Raw points
    pub fn points(&self) -> u32 {
        self.0
    }

    /// Add heuristic points
    pub fn add(&mut self, points: u32) {
        self.0 = self.0.saturating_add(points);
    }
}

impl fmt::Display for RiskScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transfer to be screened before the ledger creates a pending record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferScreening {
    /// Sending user
    pub user_id: UserId,
    /// Gross amount
    pub amount: Decimal,
    /// Receiving user, when the transfer has one
    pub receiver_id: Option<UserId>,
    /// Originating IP address
    pub ip_address: Option<String>,
}

/// Verdict for a single transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRisk {
    /// Accumulated score
    pub risk_score: RiskScore,
    /// Fired heuristics, in evaluation order
    pub reasons: Vec<String>,
    /// Score reached the suspicious threshold
    pub is_suspicious: bool,
    /// Alert raised for this verdict, if any was persisted
    pub alert_id: Option<Uuid>,
    /// Why a suspicious verdict has no persisted alert
    #[serde(default)]
    pub alert_error: Option<String>,
    /// False when history could not be read and the caller chose to proceed
    pub scored: bool,
}

impl TransferRisk {
    /// Verdict used when history is unavailable and scoring is degraded
    pub fn unscored() -> Self {
        Self {
            risk_score: RiskScore::ZERO,
            reasons: Vec::new(),
            is_suspicious: false,
            alert_id: None,
            alert_error: None,
            scored: false,
        }
    }
}

/// Heuristic that raised an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Login from an address not seen in recent successful logins
    SuspiciousLogin,
    /// Burst of failed logins
    MultipleFailedAttempts,
    /// Transfer scored at or above the suspicious threshold
    UnusualTransaction,
    /// Reviewer-confirmed takeover
    AccountTakeover,
    /// Reviewer-confirmed fraud
    FraudDetected,
}

impl AlertType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::SuspiciousLogin => "suspicious_login",
            AlertType::MultipleFailedAttempts => "multiple_failed_attempts",
            AlertType::UnusualTransaction => "unusual_transaction",
            AlertType::AccountTakeover => "account_takeover",
            AlertType::FraudDetected => "fraud_detected",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Low
    Low,
    /// Medium
    Medium,
    /// High
    High,
    /// Critical
    Critical,
}

/// Reviewer workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Newly raised
    Open,
    /// Under review
    Investigating,
    /// Closed as genuine
    Resolved,
    /// Closed as noise
    FalsePositive,
}

impl AlertStatus {
    /// Closed statuses accept no further change
    pub fn is_closed(&self) -> bool {
        matches!(self, AlertStatus::Resolved | AlertStatus::FalsePositive)
    }

    /// Whether a reviewer may move an alert from `self` to `next`
    pub fn can_transition_to(&self, next: AlertStatus) -> bool {
        match (self, next) {
            (AlertStatus::Open, AlertStatus::Investigating) => true,
            (AlertStatus::Open | AlertStatus::Investigating, s) => s.is_closed(),
            _ => false,
        }
    }
}

/// Evidence that triggered an alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertEvidence {
    /// Transfer screening evidence
    Transfer {
        /// Gross amount screened
        amount: Decimal,
        /// Receiving user
        receiver_id: Option<UserId>,
        /// Computed score
        risk_score: u32,
        /// Fired heuristics
        reasons: Vec<String>,
        /// Originating IP address
        ip_address: Option<String>,
    },
    /// Login screening evidence
    Login {
        /// Address of the attempt
        ip_address: String,
        /// Client user agent
        user_agent: String,
        /// Failed attempts counted in the window
        attempt_count: Option<usize>,
    },
}

/// Alert as requested by a heuristic
#[derive(Debug, Clone)]
pub struct NewAlert {
    /// Subject user
    pub user_id: Option<UserId>,
    /// Heuristic name
    pub alert_type: AlertType,
    /// Severity
    pub severity: Severity,
    /// Human description
    pub description: String,
    /// Triggering evidence
    pub evidence: AlertEvidence,
}

/// Persisted security alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityAlert {
    /// Alert ID (UUIDv7 for time-ordering)
    pub id: Uuid,
    /// Subject user
    pub user_id: Option<UserId>,
    /// Heuristic name
    pub alert_type: AlertType,
    /// Severity
    pub severity: Severity,
    /// Human description
    pub description: String,
    /// Triggering evidence
    pub evidence: AlertEvidence,
    /// Reviewer workflow status
    pub status: AlertStatus,
    /// Last reviewer to change the status
    pub reviewed_by: Option<String>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl SecurityAlert {
    /// Open a new alert
    pub fn open(alert: NewAlert) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id: alert.user_id,
            alert_type: alert.alert_type,
            severity: alert.severity,
            description: alert.description,
            evidence: alert.evidence,
            status: AlertStatus::Open,
            reviewed_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a reviewer status change
    pub fn transition(&mut self, status: AlertStatus, reviewer: &str) -> crate::Result<()> {
        if !self.status.can_transition_to(status) {
            return Err(crate::Error::InvalidTransition(format!(
                "alert {} cannot move from {:?} to {:?}",
                self.id, self.status, status
            )));
        }
        self.status = status;
        self.reviewed_by = Some(reviewer.to_string());
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_score_accumulates() {
        let mut score = RiskScore::ZERO;
        score.add(30);
        score.add(20);
        assert_eq!(score.points(), 50);
    }

    #[test]
    fn test_alert_status_transitions() {
        assert!(AlertStatus::Open.can_transition_to(AlertStatus::Investigating));
        assert!(AlertStatus::Open.can_transition_to(AlertStatus::FalsePositive));
        assert!(AlertStatus::Investigating.can_transition_to(AlertStatus::Resolved));
        assert!(!AlertStatus::Investigating.can_transition_to(AlertStatus::Open));
        assert!(!AlertStatus::Resolved.can_transition_to(AlertStatus::Investigating));
        assert!(!AlertStatus::Open.can_transition_to(AlertStatus::Open));
    }

    #[test]
    fn test_alert_transition_records_reviewer() {
        let mut alert = SecurityAlert::open(NewAlert {
            user_id: Some(UserId::new("user-1")),
            alert_type: AlertType::SuspiciousLogin,
            severity: Severity::Medium,
            description: "Login from new IP address: 10.0.0.9".to_string(),
            evidence: AlertEvidence::Login {
                ip_address: "10.0.0.9".to_string(),
                user_agent: "curl/8".to_string(),
                attempt_count: None,
            },
        });

        alert.transition(AlertStatus::Resolved, "admin-7").unwrap();
        assert_eq!(alert.status, AlertStatus::Resolved);
        assert_eq!(alert.reviewed_by.as_deref(), Some("admin-7"));
        assert!(alert.transition(AlertStatus::Open, "admin-7").is_err());
    }

    #[test]
    fn test_alert_type_wire_names() {
        assert_eq!(AlertType::UnusualTransaction.as_str(), "unusual_transaction");
        assert_eq!(
            serde_json::to_string(&AlertType::MultipleFailedAttempts).unwrap(),
            "\"multiple_failed_attempts\""
        );
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"high\"");
    }
}
