//! Security alert persistence

use crate::{AlertStatus, AlertType, Error, NewAlert, Result, SecurityAlert, Severity, UserId};
use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

/// Default page size for alert listings
pub const DEFAULT_ALERT_LIMIT: usize = 50;

/// Alert listing filter
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    /// Subject user
    pub user_id: Option<UserId>,
    /// Heuristic name
    pub alert_type: Option<AlertType>,
    /// Severity
    pub severity: Option<Severity>,
    /// Reviewer status
    pub status: Option<AlertStatus>,
    /// Page size (defaults to [`DEFAULT_ALERT_LIMIT`])
    pub limit: Option<usize>,
}

impl AlertFilter {
    /// Whether an alert passes every set criterion
    pub fn matches(&self, alert: &SecurityAlert) -> bool {
        self.user_id.as_ref().map_or(true, |u| alert.user_id.as_ref() == Some(u))
            && self.alert_type.map_or(true, |t| alert.alert_type == t)
            && self.severity.map_or(true, |s| alert.severity == s)
            && self.status.map_or(true, |s| alert.status == s)
    }

    /// Effective page size
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_ALERT_LIMIT)
    }
}

/// Alert store
///
/// The risk engine only ever creates alerts; status changes come from the
/// external reviewer workflow. Alerts are never deleted.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Persist a newly raised alert with status `open`
    async fn create_alert(&self, alert: NewAlert) -> Result<SecurityAlert>;

    /// Fetch one alert
    async fn get_alert(&self, alert_id: Uuid) -> Result<SecurityAlert>;

    /// Alerts matching the filter, newest first
    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<SecurityAlert>>;

    /// Reviewer status change
    async fn update_alert_status(
        &self,
        alert_id: Uuid,
        status: AlertStatus,
        reviewer: &str,
    ) -> Result<SecurityAlert>;
}

/// In-memory alert store for tests and embedding
#[derive(Debug, Default)]
pub struct InMemoryAlertStore {
    // Insertion order is creation order
    alerts: RwLock<Vec<SecurityAlert>>,
}

impl InMemoryAlertStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of alerts held
    pub fn len(&self) -> usize {
        self.alerts.read().len()
    }

    /// Whether no alert was raised yet
    pub fn is_empty(&self) -> bool {
        self.alerts.read().is_empty()
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn create_alert(&self, alert: NewAlert) -> Result<SecurityAlert> {
        let alert = SecurityAlert::open(alert);
        self.alerts.write().push(alert.clone());

        tracing::info!(
            alert_id = %alert.id,
            alert_type = %alert.alert_type,
            severity = ?alert.severity,
            "Security alert created"
        );

        Ok(alert)
    }

    async fn get_alert(&self, alert_id: Uuid) -> Result<SecurityAlert> {
        self.alerts
            .read()
            .iter()
            .find(|a| a.id == alert_id)
            .cloned()
            .ok_or_else(|| Error::AlertNotFound(alert_id.to_string()))
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<SecurityAlert>> {
        Ok(self
            .alerts
            .read()
            .iter()
            .rev()
            .filter(|a| filter.matches(a))
            .take(filter.limit())
            .cloned()
            .collect())
    }

    async fn update_alert_status(
        &self,
        alert_id: Uuid,
        status: AlertStatus,
        reviewer: &str,
    ) -> Result<SecurityAlert> {
        let mut alerts = self.alerts.write();
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == alert_id)
            .ok_or_else(|| Error::AlertNotFound(alert_id.to_string()))?;

        alert.transition(status, reviewer)?;
        Ok(alert.clone())
    }
}
