//! Login-risk checks consulted by the auth collaborator

use crate::{
    AlertEvidence, AlertStore, AlertType, LoginAttempt, LoginHistory, NewAlert, Result, Severity,
    UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Login monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    /// Failed attempts that block the login
    pub max_failed_attempts: usize,

    /// Window for counting failed attempts (minutes)
    pub failed_window_minutes: i64,

    /// Successful logins whose addresses count as known
    pub known_address_lookback: usize,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            failed_window_minutes: 60,
            known_address_lookback: 10,
        }
    }
}

/// Per-user attempt log
struct UserLogins {
    failures: Vec<DateTime<Utc>>,
    // Newest last
    successes: Vec<LoginAttempt>,
}

impl UserLogins {
    fn new() -> Self {
        Self {
            failures: Vec::new(),
            successes: Vec::new(),
        }
    }

    /// Drop failures outside the window and successes beyond the lookback
    fn cleanup(&mut self, window_start: DateTime<Utc>, keep_successes: usize) {
        self.failures.retain(|at| *at >= window_start);
        if self.successes.len() > keep_successes {
            let excess = self.successes.len() - keep_successes;
            self.successes.drain(..excess);
        }
    }
}

/// In-memory login history
pub struct LoginLog {
    config: LoginConfig,
    // Map: user_id -> UserLogins
    users: DashMap<UserId, UserLogins>,
}

impl LoginLog {
    /// Create new log
    pub fn new(config: LoginConfig) -> Self {
        Self {
            config,
            users: DashMap::new(),
        }
    }

    /// Record an attempt
    pub fn record(&self, attempt: LoginAttempt) {
        let window_start = Utc::now() - Duration::minutes(self.config.failed_window_minutes);
        let mut entry = self
            .users
            .entry(attempt.user_id.clone())
            .or_insert_with(UserLogins::new);
        let user = entry.value_mut();

        if attempt.succeeded {
            user.successes.push(attempt);
        } else {
            user.failures.push(attempt.at);
        }
        user.cleanup(window_start, self.config.known_address_lookback);
    }

    /// Get total number of tracked users
    pub fn tracked_users(&self) -> usize {
        self.users.len()
    }
}

#[async_trait]
impl LoginHistory for LoginLog {
    async fn failed_attempts_since(&self, user: &UserId, since: DateTime<Utc>) -> Result<usize> {
        Ok(self
            .users
            .get(user)
            .map(|u| u.failures.iter().filter(|at| **at >= since).count())
            .unwrap_or(0))
    }

    async fn recent_successful_logins(&self, user: &UserId, limit: usize) -> Result<Vec<LoginAttempt>> {
        Ok(self
            .users
            .get(user)
            .map(|u| u.successes.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// Outcome of a login screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginVerdict {
    /// Login must be refused
    pub blocked: bool,
    /// Alert raised by this screen
    pub alert_id: Option<Uuid>,
}

/// Login-risk monitor
pub struct LoginMonitor {
    config: LoginConfig,
    history: Arc<dyn LoginHistory>,
    alerts: Arc<dyn AlertStore>,
}

impl LoginMonitor {
    /// Create new monitor
    pub fn new(
        config: LoginConfig,
        history: Arc<dyn LoginHistory>,
        alerts: Arc<dyn AlertStore>,
    ) -> Self {
        Self {
            config,
            history,
            alerts,
        }
    }

    /// Screen a login before it is accepted
    ///
    /// Returns `true` when the login must be blocked (failed-attempt burst).
    /// A login from an address absent from recent successful logins raises a
    /// medium alert but is not blocking.
    pub async fn check_suspicious_activity(
        &self,
        user_id: &UserId,
        ip_address: &str,
        user_agent: &str,
    ) -> Result<bool> {
        Ok(self.assess(user_id, ip_address, user_agent).await?.blocked)
    }

    /// Screen a login and report the alert it raised, if any
    pub async fn assess(
        &self,
        user_id: &UserId,
        ip_address: &str,
        user_agent: &str,
    ) -> Result<LoginVerdict> {
        let since = Utc::now() - Duration::minutes(self.config.failed_window_minutes);
        let failed = self.history.failed_attempts_since(user_id, since).await?;

        if failed >= self.config.max_failed_attempts {
            tracing::warn!(user_id = %user_id, failed, "Blocking login after failed attempts");
            let alert = self
                .alerts
                .create_alert(NewAlert {
                    user_id: Some(user_id.clone()),
                    alert_type: AlertType::MultipleFailedAttempts,
                    severity: Severity::High,
                    description: format!(
                        "User {} has {} failed login attempts in the last hour",
                        user_id, failed
                    ),
                    evidence: AlertEvidence::Login {
                        ip_address: ip_address.to_string(),
                        user_agent: user_agent.to_string(),
                        attempt_count: Some(failed),
                    },
                })
                .await?;
            return Ok(LoginVerdict {
                blocked: true,
                alert_id: Some(alert.id),
            });
        }

        let recent = self
            .history
            .recent_successful_logins(user_id, self.config.known_address_lookback)
            .await?;

        // A first-ever login has nothing to compare against
        let known = recent.iter().any(|l| l.ip_address == ip_address);
        let mut alert_id = None;
        if !recent.is_empty() && !known {
            let alert = self
                .alerts
                .create_alert(NewAlert {
                    user_id: Some(user_id.clone()),
                    alert_type: AlertType::SuspiciousLogin,
                    severity: Severity::Medium,
                    description: format!("Login from new IP address: {}", ip_address),
                    evidence: AlertEvidence::Login {
                        ip_address: ip_address.to_string(),
                        user_agent: user_agent.to_string(),
                        attempt_count: None,
                    },
                })
                .await?;
            alert_id = Some(alert.id);
        }

        Ok(LoginVerdict {
            blocked: false,
            alert_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AlertFilter, InMemoryAlertStore};

    fn attempt(user: &str, ip: &str, succeeded: bool) -> LoginAttempt {
        LoginAttempt {
            user_id: UserId::new(user),
            ip_address: ip.to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            succeeded,
            at: Utc::now(),
        }
    }

    fn monitor() -> (LoginMonitor, Arc<LoginLog>, Arc<InMemoryAlertStore>) {
        let log = Arc::new(LoginLog::new(LoginConfig::default()));
        let alerts = Arc::new(InMemoryAlertStore::new());
        let monitor = LoginMonitor::new(LoginConfig::default(), log.clone(), alerts.clone());
        (monitor, log, alerts)
    }

    #[tokio::test]
    async fn test_failed_attempts_block_login() {
        let (monitor, log, alerts) = monitor();
        let user = UserId::new("u1");
        for _ in 0..5 {
            log.record(attempt("u1", "198.51.100.1", false));
        }

        let blocked = monitor
            .check_suspicious_activity(&user, "198.51.100.1", "Mozilla/5.0")
            .await
            .unwrap();
        assert!(blocked);

        let raised = alerts.list_alerts(&AlertFilter::default()).await.unwrap();
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].alert_type, AlertType::MultipleFailedAttempts);
        assert_eq!(raised[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn test_four_failures_do_not_block() {
        let (monitor, log, alerts) = monitor();
        for _ in 0..4 {
            log.record(attempt("u1", "198.51.100.1", false));
        }

        let blocked = monitor
            .check_suspicious_activity(&UserId::new("u1"), "198.51.100.1", "ua")
            .await
            .unwrap();
        assert!(!blocked);
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn test_new_address_raises_non_blocking_alert() {
        let (monitor, log, alerts) = monitor();
        log.record(attempt("u1", "198.51.100.1", true));

        let blocked = monitor
            .check_suspicious_activity(&UserId::new("u1"), "192.0.2.44", "ua")
            .await
            .unwrap();
        assert!(!blocked);

        let raised = alerts.list_alerts(&AlertFilter::default()).await.unwrap();
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].alert_type, AlertType::SuspiciousLogin);
        assert_eq!(raised[0].severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_assess_reports_raised_alert() {
        let (monitor, log, alerts) = monitor();
        log.record(attempt("u1", "198.51.100.1", true));

        let verdict = monitor
            .assess(&UserId::new("u1"), "192.0.2.44", "ua")
            .await
            .unwrap();
        assert!(!verdict.blocked);

        let raised = alerts.list_alerts(&AlertFilter::default()).await.unwrap();
        assert_eq!(verdict.alert_id, Some(raised[0].id));

        let quiet = monitor
            .assess(&UserId::new("u1"), "198.51.100.1", "ua")
            .await
            .unwrap();
        assert_eq!(quiet.alert_id, None);
    }

    #[tokio::test]
    async fn test_known_address_and_first_login_are_quiet() {
        let (monitor, log, alerts) = monitor();

        monitor
            .check_suspicious_activity(&UserId::new("u1"), "198.51.100.1", "ua")
            .await
            .unwrap();
        assert!(alerts.is_empty());

        log.record(attempt("u1", "198.51.100.1", true));
        monitor
            .check_suspicious_activity(&UserId::new("u1"), "198.51.100.1", "ua")
            .await
            .unwrap();
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn test_lookback_forgets_old_addresses() {
        let (monitor, log, alerts) = monitor();
        log.record(attempt("u1", "198.51.100.1", true));
        for i in 0..10 {
            log.record(attempt("u1", &format!("10.0.0.{}", i), true));
        }
        assert_eq!(log.tracked_users(), 1);

        monitor
            .check_suspicious_activity(&UserId::new("u1"), "198.51.100.1", "ua")
            .await
            .unwrap();
        assert_eq!(alerts.len(), 1);
    }
}
