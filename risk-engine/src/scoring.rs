//! Transfer risk scoring
//!
//! Additive, order-independent heuristics evaluated against the sender's
//! trailing history:
//!
//! | Heuristic          | Condition                                   | Points |
//! |--------------------|---------------------------------------------|--------|
//! | Amount vs. average | amount > 5 × average of last 20 completed   | 30     |
//! | Amount vs. max     | amount > 2 × max of last 20 completed       | 20     |
//! | Velocity           | ≥ 3 transactions in trailing 5 minutes      | 25     |
//! | Absolute threshold | amount > 10,000                             | 15     |
//! | New counterpart    | no completed transaction to this receiver   | 10     |

use crate::{
    AlertEvidence, AlertStore, AlertType, Error, NewAlert, Result, RiskScore, Severity,
    TransactionHistory, TransferRisk, TransferScreening,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Heuristic thresholds and weights
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Completed transactions considered for average/max
    pub history_window: usize,

    /// Multiplier over the historical average
    pub average_multiplier: Decimal,
    /// Points when the average multiplier is exceeded
    pub average_points: u32,

    /// Multiplier over the historical maximum
    pub max_multiplier: Decimal,
    /// Points when the max multiplier is exceeded
    pub max_points: u32,

    /// Velocity window (seconds)
    pub velocity_window_secs: i64,
    /// Transactions in window that trigger the velocity heuristic
    pub velocity_count: usize,
    /// Points for velocity
    pub velocity_points: u32,

    /// Absolute amount above which a transfer is high-value
    pub high_value_threshold: Decimal,
    /// Points for high-value transfers
    pub high_value_points: u32,

    /// Points for a never-before-paid receiver
    pub new_receiver_points: u32,

    /// Score at which a transfer is suspicious and an alert is raised
    pub suspicious_score: u32,
    /// Score at which the alert is `high` instead of `medium`
    pub high_severity_score: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            history_window: 20,
            average_multiplier: Decimal::from(5),
            average_points: 30,
            max_multiplier: Decimal::from(2),
            max_points: 20,
            velocity_window_secs: 5 * 60,
            velocity_count: 3,
            velocity_points: 25,
            high_value_threshold: Decimal::from(10_000),
            high_value_points: 15,
            new_receiver_points: 10,
            suspicious_score: 40,
            high_severity_score: 60,
        }
    }
}

impl ScoringConfig {
    /// Reject configurations the heuristics cannot evaluate
    pub fn validate(&self) -> Result<()> {
        if self.history_window == 0 {
            return Err(Error::InvalidConfig("history_window must be at least 1".to_string()));
        }
        if self.velocity_window_secs <= 0 {
            return Err(Error::InvalidConfig(
                "velocity_window_secs must be positive".to_string(),
            ));
        }
        if self.high_severity_score < self.suspicious_score {
            return Err(Error::InvalidConfig(format!(
                "high_severity_score {} is below suspicious_score {}",
                self.high_severity_score, self.suspicious_score
            )));
        }
        Ok(())
    }
}

/// History facts the heuristics evaluate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFacts {
    /// Most recent completed amounts, newest first
    pub recent_amounts: Vec<Decimal>,
    /// Transactions in the velocity window
    pub recent_count: usize,
    /// `Some(true)` when the receiver was paid before; `None` without receiver
    pub known_receiver: Option<bool>,
}

/// Transfer scorer
pub struct TransferScorer {
    config: ScoringConfig,
    history: Arc<dyn TransactionHistory>,
    alerts: Arc<dyn AlertStore>,
}

impl std::fmt::Debug for TransferScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferScorer").field("config", &self.config).finish()
    }
}

impl TransferScorer {
    /// Create new scorer
    pub fn new(
        config: ScoringConfig,
        history: Arc<dyn TransactionHistory>,
        alerts: Arc<dyn AlertStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            history,
            alerts,
        })
    }

    /// Scoring configuration
    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score a transfer and raise an alert when it is suspicious
    ///
    /// History read failures are returned as-is; the caller's risk policy
    /// decides whether to proceed unscored or abort.
    pub async fn score_transfer(&self, transfer: &TransferScreening) -> Result<TransferRisk> {
        let facts = self.gather_facts(transfer).await?;
        let (risk_score, reasons) = self.evaluate(transfer.amount, &facts)?;
        let is_suspicious = risk_score.points() >= self.config.suspicious_score;

        tracing::debug!(
            user_id = %transfer.user_id,
            amount = %transfer.amount,
            risk_score = risk_score.points(),
            "Transfer scored"
        );

        let (alert_id, alert_error) = if is_suspicious {
            match self.raise_alert(transfer, risk_score, &reasons).await {
                Ok(id) => (Some(id), None),
                Err(e) => (None, Some(e.to_string())),
            }
        } else {
            (None, None)
        };

        Ok(TransferRisk {
            risk_score,
            reasons,
            is_suspicious,
            alert_id,
            alert_error,
            scored: true,
        })
    }

    /// Read the sender's history
    pub async fn gather_facts(&self, transfer: &TransferScreening) -> Result<HistoryFacts> {
        let recent_amounts = self
            .history
            .recent_completed_amounts(&transfer.user_id, self.config.history_window)
            .await?;

        let since = Utc::now() - Duration::seconds(self.config.velocity_window_secs);
        let recent_count = self.history.count_sent_since(&transfer.user_id, since).await?;

        let known_receiver = match &transfer.receiver_id {
            Some(receiver) => Some(
                self.history
                    .has_completed_transfer_to(&transfer.user_id, receiver)
                    .await?,
            ),
            None => None,
        };

        Ok(HistoryFacts {
            recent_amounts,
            recent_count,
            known_receiver,
        })
    }

    /// Apply every heuristic to the facts
    ///
    /// A threshold too large to represent cannot be exceeded, so that
    /// heuristic stays quiet. A history whose total overflows is an error.
    pub fn evaluate(
        &self,
        amount: Decimal,
        facts: &HistoryFacts,
    ) -> Result<(RiskScore, Vec<String>)> {
        let cfg = &self.config;
        let mut score = RiskScore::ZERO;
        let mut reasons = Vec::new();

        let window = &facts.recent_amounts[..facts.recent_amounts.len().min(cfg.history_window)];
        if !window.is_empty() {
            let total = window
                .iter()
                .try_fold(Decimal::ZERO, |acc, x| acc.checked_add(*x))
                .ok_or_else(|| {
                    Error::Scoring(format!("total of {} recent amounts overflows", window.len()))
                })?;
            let average = total / Decimal::from(window.len() as u64);
            let max = window.iter().copied().max().unwrap_or(Decimal::ZERO);

            if exceeds(amount, average, cfg.average_multiplier) {
                score.add(cfg.average_points);
                reasons.push("Transaction amount significantly higher than user average".to_string());
            }

            if exceeds(amount, max, cfg.max_multiplier) {
                score.add(cfg.max_points);
                reasons.push("Transaction amount exceeds previous maximum by 2x".to_string());
            }
        }

        if facts.recent_count >= cfg.velocity_count {
            score.add(cfg.velocity_points);
            reasons.push("Multiple transactions in short time period".to_string());
        }

        if amount > cfg.high_value_threshold {
            score.add(cfg.high_value_points);
            reasons.push("High-value transaction".to_string());
        }

        if facts.known_receiver == Some(false) {
            score.add(cfg.new_receiver_points);
            reasons.push("Transaction to new recipient".to_string());
        }

        Ok((score, reasons))
    }

    /// Severity for a suspicious score
    pub fn severity_for(&self, score: RiskScore) -> Severity {
        if score.points() >= self.config.high_severity_score {
            Severity::High
        } else {
            Severity::Medium
        }
    }

    async fn raise_alert(
        &self,
        transfer: &TransferScreening,
        risk_score: RiskScore,
        reasons: &[String],
    ) -> Result<uuid::Uuid> {
        let alert = NewAlert {
            user_id: Some(transfer.user_id.clone()),
            alert_type: AlertType::UnusualTransaction,
            severity: self.severity_for(risk_score),
            description: format!("Suspicious transaction detected: {}", transfer.amount),
            evidence: AlertEvidence::Transfer {
                amount: transfer.amount,
                receiver_id: transfer.receiver_id.clone(),
                risk_score: risk_score.points(),
                reasons: reasons.to_vec(),
                ip_address: transfer.ip_address.clone(),
            },
        };

        match self.alerts.create_alert(alert).await {
            Ok(alert) => Ok(alert.id),
            Err(e) => {
                tracing::warn!(
                    user_id = %transfer.user_id,
                    risk_score = risk_score.points(),
                    "Failed to persist security alert: {}",
                    e
                );
                Err(e)
            }
        }
    }
}

/// `amount > base * multiplier`; false when the product overflows
fn exceeds(amount: Decimal, base: Decimal, multiplier: Decimal) -> bool {
    base.checked_mul(multiplier).map_or(false, |threshold| amount > threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AlertFilter, AlertStatus, InMemoryAlertStore, SecurityAlert, UserId};
    use async_trait::async_trait;
    use chrono::DateTime;

    /// Fixed history for a single sender
    struct StaticHistory {
        amounts: Vec<Decimal>,
        recent_count: usize,
        paid_receivers: Vec<UserId>,
        fail: bool,
    }

    #[async_trait]
    impl TransactionHistory for StaticHistory {
        async fn recent_completed_amounts(&self, _: &UserId, limit: usize) -> Result<Vec<Decimal>> {
            if self.fail {
                return Err(Error::HistoryUnavailable("connection refused".to_string()));
            }
            Ok(self.amounts.iter().copied().take(limit).collect())
        }

        async fn count_sent_since(&self, _: &UserId, _: DateTime<Utc>) -> Result<usize> {
            Ok(self.recent_count)
        }

        async fn has_completed_transfer_to(&self, _: &UserId, receiver: &UserId) -> Result<bool> {
            Ok(self.paid_receivers.contains(receiver))
        }
    }

    fn scorer(history: StaticHistory) -> (TransferScorer, Arc<InMemoryAlertStore>) {
        let alerts = Arc::new(InMemoryAlertStore::new());
        let scorer =
            TransferScorer::new(ScoringConfig::default(), Arc::new(history), alerts.clone()).unwrap();
        (scorer, alerts)
    }

    fn screening(amount: i64, receiver: Option<&str>) -> TransferScreening {
        TransferScreening {
            user_id: UserId::new("sender"),
            amount: Decimal::from(amount),
            receiver_id: receiver.map(UserId::new),
            ip_address: Some("203.0.113.7".to_string()),
        }
    }

    #[tokio::test]
    async fn test_large_transfer_to_new_receiver_is_high_severity() {
        let (scorer, alerts) = scorer(StaticHistory {
            amounts: vec![Decimal::from(50); 2],
            recent_count: 2,
            paid_receivers: vec![UserId::new("friend")],
            fail: false,
        });

        let risk = scorer.score_transfer(&screening(1000, Some("stranger"))).await.unwrap();
        assert_eq!(risk.risk_score.points(), 60);
        assert!(risk.is_suspicious);
        assert_eq!(risk.reasons.len(), 3);

        let raised = alerts.list_alerts(&AlertFilter::default()).await.unwrap();
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].severity, Severity::High);
        assert_eq!(raised[0].alert_type, AlertType::UnusualTransaction);
        assert_eq!(Some(raised[0].id), risk.alert_id);
        match &raised[0].evidence {
            AlertEvidence::Transfer { risk_score, reasons, receiver_id, .. } => {
                assert_eq!(*risk_score, 60);
                assert_eq!(reasons, &risk.reasons);
                assert_eq!(receiver_id.as_ref(), Some(&UserId::new("stranger")));
            }
            other => panic!("unexpected evidence {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ordinary_transfer_is_not_suspicious() {
        let (scorer, alerts) = scorer(StaticHistory {
            amounts: vec![Decimal::from(100), Decimal::from(80)],
            recent_count: 0,
            paid_receivers: vec![UserId::new("friend")],
            fail: false,
        });

        let risk = scorer.score_transfer(&screening(120, Some("friend"))).await.unwrap();
        assert_eq!(risk.risk_score, RiskScore::ZERO);
        assert!(!risk.is_suspicious);
        assert!(risk.reasons.is_empty());
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn test_medium_severity_between_thresholds() {
        let (scorer, alerts) = scorer(StaticHistory {
            amounts: vec![],
            recent_count: 3,
            paid_receivers: vec![],
            fail: false,
        });

        // velocity 25 + high value 15 + new receiver 10
        let risk = scorer.score_transfer(&screening(20_000, Some("someone"))).await.unwrap();
        assert_eq!(risk.risk_score.points(), 50);
        assert!(risk.is_suspicious);

        let raised = alerts.list_alerts(&AlertFilter::default()).await.unwrap();
        assert_eq!(raised[0].severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_no_receiver_skips_counterpart_heuristic() {
        let (scorer, _) = scorer(StaticHistory {
            amounts: vec![],
            recent_count: 0,
            paid_receivers: vec![],
            fail: false,
        });

        let risk = scorer.score_transfer(&screening(500, None)).await.unwrap();
        assert_eq!(risk.risk_score, RiskScore::ZERO);
    }

    #[tokio::test]
    async fn test_history_failure_is_returned() {
        let (scorer, _) = scorer(StaticHistory {
            amounts: vec![],
            recent_count: 0,
            paid_receivers: vec![],
            fail: true,
        });

        let err = scorer.score_transfer(&screening(500, None)).await.unwrap_err();
        assert!(matches!(err, Error::HistoryUnavailable(_)));
    }

    #[test]
    fn test_boundaries_are_strict() {
        let (scorer, _) = scorer(StaticHistory {
            amounts: vec![],
            recent_count: 0,
            paid_receivers: vec![],
            fail: false,
        });

        let facts = HistoryFacts {
            recent_amounts: vec![Decimal::from(100)],
            recent_count: 2,
            known_receiver: Some(true),
        };

        // exactly 5x average and 10,000 do not fire
        let (score, _) = scorer.evaluate(Decimal::from(500), &facts).unwrap();
        assert_eq!(score.points(), 20);
        let (score, _) = scorer
            .evaluate(Decimal::from(10_000), &HistoryFacts::default())
            .unwrap();
        assert_eq!(score, RiskScore::ZERO);
    }

    #[tokio::test]
    async fn test_huge_history_amount_does_not_fire_ratio_heuristics() {
        let huge = Decimal::from_i128_with_scale(50_000_000_000_000_000_000_000_000_000, 0);
        let (scorer, alerts) = scorer(StaticHistory {
            amounts: vec![huge],
            recent_count: 0,
            paid_receivers: vec![],
            fail: false,
        });

        let risk = scorer.score_transfer(&screening(1, None)).await.unwrap();
        assert_eq!(risk.risk_score, RiskScore::ZERO);
        assert!(risk.reasons.is_empty());
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_overflowing_history_total_is_an_error() {
        let (scorer, _) = scorer(StaticHistory {
            amounts: vec![],
            recent_count: 0,
            paid_receivers: vec![],
            fail: false,
        });
        let facts = HistoryFacts {
            recent_amounts: vec![Decimal::MAX, Decimal::MAX],
            ..HistoryFacts::default()
        };

        let err = scorer.evaluate(Decimal::ONE, &facts).unwrap_err();
        assert!(matches!(err, Error::Scoring(_)));
    }

    /// Alert store that refuses every write
    struct RejectingAlerts;

    #[async_trait]
    impl AlertStore for RejectingAlerts {
        async fn create_alert(&self, _: NewAlert) -> Result<SecurityAlert> {
            Err(Error::AlertStore("disk full".to_string()))
        }

        async fn get_alert(&self, alert_id: uuid::Uuid) -> Result<SecurityAlert> {
            Err(Error::AlertNotFound(alert_id.to_string()))
        }

        async fn list_alerts(&self, _: &AlertFilter) -> Result<Vec<SecurityAlert>> {
            Ok(Vec::new())
        }

        async fn update_alert_status(
            &self,
            alert_id: uuid::Uuid,
            _: AlertStatus,
            _: &str,
        ) -> Result<SecurityAlert> {
            Err(Error::AlertNotFound(alert_id.to_string()))
        }
    }

    #[tokio::test]
    async fn test_alert_persistence_failure_is_reported() {
        let history = StaticHistory {
            amounts: vec![Decimal::from(50); 2],
            recent_count: 2,
            paid_receivers: vec![],
            fail: false,
        };
        let alerts: Arc<dyn AlertStore> = Arc::new(RejectingAlerts);
        let scorer = TransferScorer::new(ScoringConfig::default(), Arc::new(history), alerts).unwrap();

        let risk = scorer.score_transfer(&screening(1000, Some("stranger"))).await.unwrap();
        assert!(risk.is_suspicious);
        assert_eq!(risk.alert_id, None);
        assert!(risk.alert_error.as_deref().unwrap().contains("disk full"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ScoringConfig {
            suspicious_score: 70,
            high_severity_score: 60,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(ScoringConfig::default().validate().is_ok());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn facts_strategy() -> impl Strategy<Value = HistoryFacts> {
            (
                prop::collection::vec((1i64..5_000_00i64).prop_map(|c| Decimal::new(c, 2)), 0..30),
                0usize..10,
                prop::option::of(any::<bool>()),
            )
                .prop_map(|(recent_amounts, recent_count, known_receiver)| HistoryFacts {
                    recent_amounts,
                    recent_count,
                    known_receiver,
                })
        }

        proptest! {
            /// Every fired heuristic contributes one reason and a fixed weight
            #[test]
            fn prop_score_is_sum_of_fired_heuristics(
                cents in 1i64..5_000_000i64,
                facts in facts_strategy(),
            ) {
                let (scorer, _) = scorer(StaticHistory {
                    amounts: vec![],
                    recent_count: 0,
                    paid_receivers: vec![],
                    fail: false,
                });
                let (score, reasons) = scorer.evaluate(Decimal::new(cents, 2), &facts).unwrap();

                prop_assert!(score.points() <= 100);
                prop_assert!(reasons.len() <= 5);
                prop_assert_eq!(score == RiskScore::ZERO, reasons.is_empty());
            }

            /// More recent activity never lowers the score
            #[test]
            fn prop_velocity_is_monotonic(cents in 1i64..5_000_000i64, facts in facts_strategy()) {
                let (scorer, _) = scorer(StaticHistory {
                    amounts: vec![],
                    recent_count: 0,
                    paid_receivers: vec![],
                    fail: false,
                });
                let amount = Decimal::new(cents, 2);
                let busier = HistoryFacts {
                    recent_count: facts.recent_count + 1,
                    ..facts.clone()
                };

                let (quiet, _) = scorer.evaluate(amount, &facts).unwrap();
                let (busy, _) = scorer.evaluate(amount, &busier).unwrap();
                prop_assert!(busy >= quiet);
            }
        }
    }
}
