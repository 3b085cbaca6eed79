//! Security alert types
//!
//! Alerts are append-only; `acknowledged` is the only mutable field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::AlertId;

/// The kinds of security alert the monitor emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    UnauthorizedAccess,
    KeyCompromise,
    PolicyViolation,
    SignatureInvalid,
    Anomaly,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UnauthorizedAccess => "unauthorized_access",
            Self::KeyCompromise => "key_compromise",
            Self::PolicyViolation => "policy_violation",
            Self::SignatureInvalid => "signature_invalid",
            Self::Anomaly => "anomaly",
        };
        write!(f, "{s}")
    }
}

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// One recorded security event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    /// Structured context for after-the-fact investigation
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
}

impl Alert {
    /// A fresh unacknowledged alert
    pub fn new(kind: AlertKind, severity: AlertSeverity, message: impl Into<String>) -> Self {
        Self {
            id: AlertId::generate(),
            kind,
            severity,
            message: message.into(),
            context: serde_json::Map::new(),
            created_at: Utc::now(),
            acknowledged: false,
        }
    }

    /// Attach a structured context entry
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}
