//! Concord Monitor - Security monitoring
//!
//! Tracks failed authentication attempts per principal, enforces
//! time-bounded lockouts and records security alerts:
//!
//! - Lockout state machine: clean → warned (attempts == max−1) →
//!   locked (attempts == max) → clean after `lockout_duration`
//! - Alerts are append-only; `acknowledged` is the only mutable field
//! - An optional webhook receives every alert; delivery runs detached and
//!   a failure never aborts the generating operation
//!
//! Lockout expiry is checked lazily on every `is_locked_out` call.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use concord_types::{Alert, AlertId, AlertKind, AlertSeverity, ConcordError, PrincipalId, Result};

/// Options for the security monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Failed attempts before a principal locks
    pub max_failed_attempts: u32,
    /// Lockout window, in seconds
    pub lockout_duration_secs: u64,
    /// Gates alert recording entirely
    pub enable_monitoring: bool,
    /// POST target for recorded alerts
    pub alert_webhook_url: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout_duration_secs: 900,
            enable_monitoring: true,
            alert_webhook_url: None,
        }
    }
}

/// Per-principal attempt tracking
#[derive(Debug, Clone)]
struct AttemptRecord {
    failed_count: u32,
    locked_until: Option<DateTime<Utc>>,
}

/// Aggregate monitor metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorMetrics {
    pub total_alerts: usize,
    pub active_alerts: usize,
    pub alerts_by_kind: HashMap<String, usize>,
    pub alerts_by_severity: HashMap<String, usize>,
    pub locked_principals: usize,
    pub tracked_principals: usize,
}

/// Security monitor
pub struct SecurityMonitor {
    config: MonitorConfig,
    attempts: RwLock<HashMap<PrincipalId, AttemptRecord>>,
    alerts: RwLock<Vec<Alert>>,
    http: reqwest::Client,
}

impl SecurityMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            attempts: RwLock::new(HashMap::new()),
            alerts: RwLock::new(Vec::new()),
            http: reqwest::Client::new(),
        }
    }

    /// Record one failed authentication attempt for a principal
    ///
    /// Emits a high-severity alert on the warned transition and a critical
    /// one on lockout. Returns the updated failed count.
    pub async fn record_failed_attempt(&self, principal: &PrincipalId) -> u32 {
        let (count, transition) = {
            let mut attempts = self.attempts.write().await;
            let record = attempts
                .entry(principal.clone())
                .or_insert(AttemptRecord { failed_count: 0, locked_until: None });

            record.failed_count += 1;
            let transition = if record.failed_count == self.config.max_failed_attempts {
                record.locked_until = Some(
                    Utc::now() + Duration::seconds(self.config.lockout_duration_secs as i64),
                );
                Some(AlertSeverity::Critical)
            } else if record.failed_count + 1 == self.config.max_failed_attempts {
                Some(AlertSeverity::High)
            } else {
                None
            };
            (record.failed_count, transition)
        };

        match transition {
            Some(AlertSeverity::Critical) => {
                warn!(principal = %principal, "principal locked out");
                self.record_alert(
                    AlertKind::UnauthorizedAccess,
                    AlertSeverity::Critical,
                    format!("principal {principal} locked out after {count} failed attempts"),
                    serde_json::json!({ "principal": principal, "failed_attempts": count }),
                )
                .await;
            }
            Some(severity) => {
                self.record_alert(
                    AlertKind::UnauthorizedAccess,
                    severity,
                    format!("principal {principal} approaching lockout ({count} failed attempts)"),
                    serde_json::json!({ "principal": principal, "failed_attempts": count }),
                )
                .await;
            }
            None => {}
        }

        count
    }

    /// Reset a principal to the clean state after successful authentication
    pub async fn clear_failed_attempts(&self, principal: &PrincipalId) {
        self.attempts.write().await.remove(principal);
        debug!(principal = %principal, "failed attempts cleared");
    }

    /// Whether the principal is currently locked out
    ///
    /// Lapsed lockouts are dissolved here: the principal returns to clean
    /// and its counter resets.
    pub async fn is_locked_out(&self, principal: &PrincipalId) -> bool {
        let mut attempts = self.attempts.write().await;
        let Some(record) = attempts.get(principal) else {
            return false;
        };
        let Some(locked_until) = record.locked_until else {
            return false;
        };

        if Utc::now() < locked_until {
            return true;
        }
        attempts.remove(principal);
        false
    }

    /// Seconds left on a principal's lockout, if any
    pub async fn lockout_remaining(&self, principal: &PrincipalId) -> Option<u64> {
        let attempts = self.attempts.read().await;
        let locked_until = attempts.get(principal)?.locked_until?;
        let remaining = (locked_until - Utc::now()).num_seconds();
        (remaining > 0).then_some(remaining as u64)
    }

    /// Guard helper: `LockedOut` when the principal is locked
    pub async fn ensure_not_locked(&self, principal: &PrincipalId) -> Result<()> {
        if self.is_locked_out(principal).await {
            let retry_after_secs = self.lockout_remaining(principal).await.unwrap_or(0);
            return Err(ConcordError::LockedOut {
                principal: principal.to_string(),
                retry_after_secs,
            });
        }
        Ok(())
    }

    /// Record an unauthorized access attempt
    pub async fn record_unauthorized_access(&self, message: impl Into<String>, context: serde_json::Value) {
        self.record_alert(AlertKind::UnauthorizedAccess, AlertSeverity::High, message.into(), context)
            .await;
    }

    /// Record a policy violation
    pub async fn record_policy_violation(&self, message: impl Into<String>, context: serde_json::Value) {
        self.record_alert(AlertKind::PolicyViolation, AlertSeverity::Medium, message.into(), context)
            .await;
    }

    /// Record a suspected key compromise
    pub async fn record_key_compromise(&self, message: impl Into<String>, context: serde_json::Value) {
        self.record_alert(AlertKind::KeyCompromise, AlertSeverity::Critical, message.into(), context)
            .await;
    }

    /// Record a failed signature verification
    pub async fn record_invalid_signature(&self, message: impl Into<String>, context: serde_json::Value) {
        self.record_alert(AlertKind::SignatureInvalid, AlertSeverity::High, message.into(), context)
            .await;
    }

    /// Record an anomaly
    pub async fn record_anomaly(&self, message: impl Into<String>, context: serde_json::Value) {
        self.record_alert(AlertKind::Anomaly, AlertSeverity::Low, message.into(), context).await;
    }

    /// Unacknowledged alerts, newest last
    pub async fn get_active_alerts(&self) -> Vec<Alert> {
        self.alerts.read().await.iter().filter(|a| !a.acknowledged).cloned().collect()
    }

    /// All alerts ever recorded
    pub async fn get_alerts(&self) -> Vec<Alert> {
        self.alerts.read().await.clone()
    }

    /// Acknowledge an alert by id
    pub async fn acknowledge(&self, alert_id: &AlertId) -> Result<()> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts
            .iter_mut()
            .find(|a| &a.id == alert_id)
            .ok_or_else(|| ConcordError::not_found("alert", alert_id.as_str()))?;
        alert.acknowledged = true;
        Ok(())
    }

    /// Aggregate monitor metrics
    pub async fn get_metrics(&self) -> MonitorMetrics {
        let now = Utc::now();
        let alerts = self.alerts.read().await;

        let mut by_kind: HashMap<String, usize> = HashMap::new();
        let mut by_severity: HashMap<String, usize> = HashMap::new();
        let mut active = 0;
        for alert in alerts.iter() {
            *by_kind.entry(alert.kind.to_string()).or_default() += 1;
            *by_severity.entry(alert.severity.to_string()).or_default() += 1;
            if !alert.acknowledged {
                active += 1;
            }
        }

        let attempts = self.attempts.read().await;
        let locked = attempts
            .values()
            .filter(|r| r.locked_until.map(|until| now < until).unwrap_or(false))
            .count();

        MonitorMetrics {
            total_alerts: alerts.len(),
            active_alerts: active,
            alerts_by_kind: by_kind,
            alerts_by_severity: by_severity,
            locked_principals: locked,
            tracked_principals: attempts.len(),
        }
    }

    async fn record_alert(
        &self,
        kind: AlertKind,
        severity: AlertSeverity,
        message: String,
        context: serde_json::Value,
    ) {
        if !self.config.enable_monitoring {
            return;
        }

        let mut alert = Alert::new(kind, severity, message);
        if let serde_json::Value::Object(map) = context {
            alert.context = map;
        }

        debug!(kind = %kind, severity = %severity, "alert recorded");
        self.publish_webhook(&alert);
        self.alerts.write().await.push(alert);
    }

    /// Fire-and-forget webhook delivery; failures are logged only
    fn publish_webhook(&self, alert: &Alert) {
        let Some(url) = self.config.alert_webhook_url.clone() else {
            return;
        };

        let payload = serde_json::json!({
            "id": alert.id,
            "type": alert.kind,
            "severity": alert.severity,
            "message": alert.message,
            "context": alert.context,
            "timestamp": alert.created_at,
            "acknowledged": alert.acknowledged,
        });
        let http = self.http.clone();

        tokio::spawn(async move {
            if let Err(e) = http.post(&url).json(&payload).send().await {
                warn!(url = %url, error = %e, "alert webhook delivery failed");
            }
        });
    }
}

impl Default for SecurityMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(max: u32, lockout_secs: u64) -> SecurityMonitor {
        SecurityMonitor::new(MonitorConfig {
            max_failed_attempts: max,
            lockout_duration_secs: lockout_secs,
            enable_monitoring: true,
            alert_webhook_url: None,
        })
    }

    #[tokio::test]
    async fn test_lockout_after_max_attempts() {
        let monitor = monitor(3, 900);
        let principal = PrincipalId::new("user-1");

        monitor.record_failed_attempt(&principal).await;
        assert!(!monitor.is_locked_out(&principal).await);
        monitor.record_failed_attempt(&principal).await;
        assert!(!monitor.is_locked_out(&principal).await);
        monitor.record_failed_attempt(&principal).await;
        assert!(monitor.is_locked_out(&principal).await);

        // One critical unauthorized_access alert for the lockout
        let criticals: Vec<_> = monitor
            .get_active_alerts()
            .await
            .into_iter()
            .filter(|a| a.severity == AlertSeverity::Critical)
            .collect();
        assert_eq!(criticals.len(), 1);
        assert_eq!(criticals[0].kind, AlertKind::UnauthorizedAccess);
    }

    #[tokio::test]
    async fn test_warned_transition_alert() {
        let monitor = monitor(3, 900);
        let principal = PrincipalId::new("user-1");

        monitor.record_failed_attempt(&principal).await;
        monitor.record_failed_attempt(&principal).await;

        let alerts = monitor.get_active_alerts().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::High);
    }

    #[tokio::test]
    async fn test_clear_returns_to_clean() {
        let monitor = monitor(3, 900);
        let principal = PrincipalId::new("user-1");

        for _ in 0..3 {
            monitor.record_failed_attempt(&principal).await;
        }
        assert!(monitor.is_locked_out(&principal).await);

        monitor.clear_failed_attempts(&principal).await;
        assert!(!monitor.is_locked_out(&principal).await);
    }

    #[tokio::test]
    async fn test_lockout_expires_and_counter_resets() {
        let monitor = monitor(2, 0);
        let principal = PrincipalId::new("user-1");

        monitor.record_failed_attempt(&principal).await;
        monitor.record_failed_attempt(&principal).await;

        // Zero-second lockout lapses immediately; the lazy check dissolves it
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!monitor.is_locked_out(&principal).await);

        // Counter restarted from clean
        let count = monitor.record_failed_attempt(&principal).await;
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_monitoring_disabled_gates_alerts() {
        let monitor = SecurityMonitor::new(MonitorConfig {
            enable_monitoring: false,
            ..MonitorConfig::default()
        });

        monitor.record_anomaly("odd", serde_json::json!({})).await;
        assert!(monitor.get_alerts().await.is_empty());
    }

    #[tokio::test]
    async fn test_acknowledge() {
        let monitor = monitor(5, 900);
        monitor.record_key_compromise("key leaked", serde_json::json!({"key_id": "k1"})).await;

        let alerts = monitor.get_active_alerts().await;
        assert_eq!(alerts.len(), 1);

        monitor.acknowledge(&alerts[0].id).await.unwrap();
        assert!(monitor.get_active_alerts().await.is_empty());
        assert_eq!(monitor.get_alerts().await.len(), 1);

        assert!(matches!(
            monitor.acknowledge(&AlertId::new("alert_missing")).await.unwrap_err(),
            ConcordError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_metrics() {
        let monitor = monitor(2, 900);
        monitor.record_anomaly("a", serde_json::json!({})).await;
        monitor.record_policy_violation("b", serde_json::json!({})).await;

        let principal = PrincipalId::new("user-1");
        monitor.record_failed_attempt(&principal).await;
        monitor.record_failed_attempt(&principal).await;

        let metrics = monitor.get_metrics().await;
        assert_eq!(metrics.alerts_by_kind["anomaly"], 1);
        assert_eq!(metrics.alerts_by_kind["policy_violation"], 1);
        assert_eq!(metrics.locked_principals, 1);
        assert!(metrics.total_alerts >= 3);
    }
}
