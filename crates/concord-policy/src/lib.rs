//! Concord Policy - Rule evaluation over principal × resource × action
//!
//! Evaluation order:
//! 1. Select applicable rules: not expired, principal pattern matches,
//!    resource pattern matches.
//! 2. Evaluate the deny subset with conditions; any match denies.
//! 3. Otherwise evaluate the allow subset; any match allows, and every
//!    matching allow is reported.
//! 4. Fall back to the configured default effect.
//!
//! Patterns match literally, with `*` standing for any run of characters;
//! all other regex metacharacters are escaped and matches are anchored.

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use concord_types::{
    ConcordError, PolicyContext, PolicyDecision, PolicyEffect, PolicyRule, Result, RuleId,
};

mod condition;

pub use condition::evaluate_conditions;

/// Options for the policy engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Effect applied when no rule matches
    pub default_effect: PolicyEffect,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self { default_effect: PolicyEffect::Deny }
    }
}

/// In-memory policy engine
pub struct PolicyEngine {
    config: PolicyConfig,
    rules: RwLock<Vec<PolicyRule>>,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config, rules: RwLock::new(Vec::new()) }
    }

    /// Add a rule; fails with `DuplicateId` when the rule id is taken
    pub async fn add_rule(&self, rule: PolicyRule) -> Result<()> {
        if rule.principal.is_empty() || rule.resource.is_empty() {
            return Err(ConcordError::invalid("rule requires principal and resource patterns"));
        }

        let mut rules = self.rules.write().await;
        if rules.iter().any(|r| r.id == rule.id) {
            return Err(ConcordError::duplicate("rule", rule.id.as_str()));
        }
        debug!(rule_id = %rule.id, name = %rule.name, "policy rule added");
        rules.push(rule);
        Ok(())
    }

    /// Remove a rule by id
    pub async fn remove_rule(&self, rule_id: &RuleId) -> Result<()> {
        let mut rules = self.rules.write().await;
        let before = rules.len();
        rules.retain(|r| &r.id != rule_id);
        if rules.len() == before {
            return Err(ConcordError::not_found("rule", rule_id.as_str()));
        }
        Ok(())
    }

    /// Evaluate a request context against the rule set
    pub async fn evaluate(&self, context: &PolicyContext) -> PolicyDecision {
        let now = Utc::now();
        let rules = self.rules.read().await;

        let applicable: Vec<&PolicyRule> = rules
            .iter()
            .filter(|rule| !rule.is_expired(now))
            .filter(|rule| pattern_matches(&rule.principal, &context.principal))
            .filter(|rule| pattern_matches(&rule.resource, &context.resource))
            .collect();

        // Deny beats allow: any matching deny wins outright
        for rule in applicable.iter().filter(|r| r.effect == PolicyEffect::Deny) {
            if evaluate_conditions(rule.conditions.as_ref(), &context.attributes) {
                return PolicyDecision {
                    allowed: false,
                    matched_rules: vec![(*rule).clone()],
                    reason: format!("denied by rule '{}'", rule.name),
                };
            }
        }

        let matching_allows: Vec<PolicyRule> = applicable
            .iter()
            .filter(|r| r.effect == PolicyEffect::Allow)
            .filter(|r| evaluate_conditions(r.conditions.as_ref(), &context.attributes))
            .map(|r| (*r).clone())
            .collect();

        if !matching_allows.is_empty() {
            let names: Vec<&str> = matching_allows.iter().map(|r| r.name.as_str()).collect();
            return PolicyDecision {
                allowed: true,
                reason: format!("allowed by rule(s) {}", names.join(", ")),
                matched_rules: matching_allows,
            };
        }

        PolicyDecision::by_default(self.config.default_effect)
    }

    /// All rules, in insertion order
    pub async fn rules(&self) -> Vec<PolicyRule> {
        self.rules.read().await.clone()
    }

    /// Export the rule set as JSON
    pub async fn export_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&*self.rules.read().await)
            .map_err(|e| ConcordError::invalid(format!("rule export failed: {e}")))
    }

    /// Replace the rule set from a JSON export
    pub async fn import_json(&self, json: &str) -> Result<usize> {
        let imported: Vec<PolicyRule> = serde_json::from_str(json)
            .map_err(|e| ConcordError::invalid(format!("rule import failed: {e}")))?;
        let count = imported.len();
        *self.rules.write().await = imported;
        Ok(count)
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}

/// Anchored wildcard match: `*` spans any run, everything else is literal
fn pattern_matches(pattern: &str, value: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == value;
    }

    let escaped: Vec<String> = pattern.split('*').map(|part| regex::escape(part)).collect();
    let anchored = format!("^{}$", escaped.join(".*"));
    match Regex::new(&anchored) {
        Ok(re) => re.is_match(value),
        Err(_) => false,
    }
}
