//! Policy rule and evaluation types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::identity::RuleId;

/// Whether a matching rule grants or blocks access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyEffect {
    Allow,
    Deny,
}

/// One access-control rule
///
/// Principal and resource patterns match literally, with `*` standing for
/// any run of characters. Conditions constrain the request attributes via
/// dotted paths and operator objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: RuleId,
    pub name: String,
    /// Principal pattern, e.g. `user:*`
    pub principal: String,
    /// Resource pattern, e.g. `admin:panel`
    pub resource: String,
    pub effect: PolicyEffect,
    /// Attribute conditions; keys may be dotted paths, values may be
    /// operator objects (`$eq`, `$gt`, `$in`, ...), regex strings, lists
    /// (membership) or literals (equality)
    #[serde(default)]
    pub conditions: Option<HashMap<String, serde_json::Value>>,
    /// Rules past this instant are no longer applicable
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl PolicyRule {
    /// A condition-free rule
    pub fn new(
        name: impl Into<String>,
        principal: impl Into<String>,
        resource: impl Into<String>,
        effect: PolicyEffect,
    ) -> Self {
        Self {
            id: RuleId::generate(),
            name: name.into(),
            principal: principal.into(),
            resource: resource.into(),
            effect,
            conditions: None,
            expires_at: None,
        }
    }

    /// Attach a condition on a dotted attribute path
    pub fn with_condition(mut self, path: impl Into<String>, value: serde_json::Value) -> Self {
        self.conditions
            .get_or_insert_with(HashMap::new)
            .insert(path.into(), value);
        self
    }

    /// Whether the rule has lapsed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| now >= e).unwrap_or(false)
    }
}

/// A request under evaluation: principal × resource × action plus attributes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyContext {
    pub principal: String,
    pub resource: String,
    pub action: String,
    /// Request attributes, traversed by dotted condition paths
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl PolicyContext {
    pub fn new(
        principal: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            principal: principal.into(),
            resource: resource.into(),
            action: action.into(),
            attributes: serde_json::Map::new(),
        }
    }

    /// Attach a request attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// Outcome of a policy evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    /// Rules that determined the outcome: the single winning deny, or every
    /// matching allow
    pub matched_rules: Vec<PolicyRule>,
    pub reason: String,
}

impl PolicyDecision {
    /// A decision produced by the configured default effect
    pub fn by_default(effect: PolicyEffect) -> Self {
        Self {
            allowed: effect == PolicyEffect::Allow,
            matched_rules: Vec::new(),
            reason: format!(
                "no matching rules; default effect {}",
                match effect {
                    PolicyEffect::Allow => "allow",
                    PolicyEffect::Deny => "deny",
                }
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_expiry() {
        let now = Utc::now();
        let mut rule = PolicyRule::new("r", "user:*", "doc:*", PolicyEffect::Allow);
        assert!(!rule.is_expired(now));

        rule.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(rule.is_expired(now));
    }

    #[test]
    fn test_default_decision() {
        let deny = PolicyDecision::by_default(PolicyEffect::Deny);
        assert!(!deny.allowed);
        assert!(deny.matched_rules.is_empty());

        let allow = PolicyDecision::by_default(PolicyEffect::Allow);
        assert!(allow.allowed);
    }
}
