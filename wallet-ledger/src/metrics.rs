//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `wallet_transactions_total{status}` - Transactions reaching each status
//! - `wallet_risk_score` - Histogram of transfer risk scores
//! - `wallet_balance_mutations_total` - Balance postings committed
//! - `wallet_commit_duration_seconds` - Histogram of writer commit latencies
//!
//! Metrics are registered on a registry owned by this value, never on the
//! process-wide default registry.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Transactions by resulting status
    pub transactions_total: IntCounterVec,

    /// Risk score histogram
    pub risk_score: Histogram,

    /// Balance postings committed
    pub balance_mutations_total: IntCounter,

    /// Commit duration histogram
    pub commit_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transactions_total = IntCounterVec::new(
            Opts::new("wallet_transactions_total", "Transactions by resulting status"),
            &["status"],
        )?;
        registry.register(Box::new(transactions_total.clone()))?;

        let risk_score = Histogram::with_opts(
            HistogramOpts::new("wallet_risk_score", "Histogram of transfer risk scores")
                .buckets(vec![0.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 75.0, 85.0, 100.0]),
        )?;
        registry.register(Box::new(risk_score.clone()))?;

        let balance_mutations_total = IntCounter::new(
            "wallet_balance_mutations_total",
            "Balance postings committed",
        )?;
        registry.register(Box::new(balance_mutations_total.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "wallet_commit_duration_seconds",
                "Histogram of writer commit latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        Ok(Self {
            transactions_total,
            risk_score,
            balance_mutations_total,
            commit_duration,
            registry,
        })
    }

    /// Record a transaction reaching a status
    pub fn record_transaction(&self, status: &str) {
        self.transactions_total.with_label_values(&[status]).inc();
    }

    /// Record a transfer risk score
    pub fn record_risk_score(&self, score: u32) {
        self.risk_score.observe(f64::from(score));
    }

    /// Record committed postings
    pub fn record_balance_mutations(&self, count: usize) {
        self.balance_mutations_total.inc_by(count as u64);
    }

    /// Record commit duration
    pub fn record_commit_duration(&self, duration_seconds: f64) {
        self.commit_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("balance_mutations_total", &self.balance_mutations_total.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.balance_mutations_total.get(), 0);
        assert!(!metrics.registry().gather().is_empty());
    }

    #[test]
    fn test_independent_registries() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_transaction("completed");
        a.record_transaction("completed");
        b.record_transaction("failed");

        assert_eq!(a.transactions_total.with_label_values(&["completed"]).get(), 2);
        assert_eq!(b.transactions_total.with_label_values(&["completed"]).get(), 0);
    }

    #[test]
    fn test_record_balance_mutations() {
        let metrics = Metrics::new().unwrap();
        metrics.record_balance_mutations(2);
        metrics.record_balance_mutations(1);
        assert_eq!(metrics.balance_mutations_total.get(), 3);

        metrics.record_risk_score(60);
        assert_eq!(metrics.risk_score.get_sample_count(), 1);
    }
}
