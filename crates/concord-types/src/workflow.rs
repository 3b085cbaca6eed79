//! Workflow definition types
//!
//! A workflow is an acyclic plan of steps binding capability invocations
//! into a composite process. Definitions are immutable once stored except
//! through explicit update, which re-validates.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::identity::{AgentId, CapabilityId, StepId, WorkflowId};

/// What the executor does after a step fails with no recovering handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnErrorPolicy {
    /// Fail the execution immediately
    Stop,
    /// Keep executing independent branches; dependents of the failed step
    /// never become ready and the run terminates through the deadlock check
    Continue,
    /// Undo completed steps in reverse order, then fail
    Rollback,
}

impl Default for OnErrorPolicy {
    fn default() -> Self {
        Self::Stop
    }
}

/// Retry policy for a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub delay: Duration,
    /// Multiplier applied per subsequent retry
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Backoff before retry attempt `n` (1-based): `min(delay * multiplier^(n-1), max_delay)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let millis = self.delay.as_millis() as f64 * self.backoff_multiplier.powi(exp);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// How a step recovers after its retries are exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorHandlerKind {
    /// Retries already exhausted; falls through to failure
    Retry,
    /// Mark the step skipped and treat it as success
    Skip,
    /// Notify out of band; the step still fails
    Callback,
    /// Execute a named fallback step instead
    Fallback,
}

/// Error handler attached to a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorHandler {
    pub kind: ErrorHandlerKind,
    /// Handler target: fallback step id or callback endpoint
    #[serde(default)]
    pub action: Option<String>,
    /// Handler-specific parameters
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

/// Comparison operators usable in execution conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
}

/// Gate deciding whether a step runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecutionCondition {
    /// Typed comparison against the execution's variables and step outputs
    Comparison {
        variable: String,
        operator: ConditionOperator,
        value: serde_json::Value,
    },
    /// Sandboxed boolean expression over the same scope
    Expression { expression: String },
}

/// One capability invocation inside a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Step id, unique within the workflow
    pub id: StepId,
    /// Target agent
    pub agent_id: AgentId,
    /// Capability to invoke on the agent
    pub capability_id: CapabilityId,
    /// Input mapping; string values of the exact form `${name}` resolve
    /// against execution variables and prior step outputs
    #[serde(default)]
    pub inputs: serde_json::Map<String, serde_json::Value>,
    /// Steps that must complete before this one becomes ready
    #[serde(default)]
    pub dependencies: Vec<StepId>,
    /// Retry policy; absent means a single attempt
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    /// Per-invocation timeout
    #[serde(default, with = "option_duration_millis")]
    pub timeout: Option<Duration>,
    /// Recovery behavior once retries are exhausted
    #[serde(default)]
    pub error_handler: Option<ErrorHandler>,
    /// Gate deciding whether the step runs at all
    #[serde(default)]
    pub condition: Option<ExecutionCondition>,
}

impl Step {
    /// A minimal step with no inputs, dependencies or policies
    pub fn new(
        id: impl Into<StepId>,
        agent_id: impl Into<AgentId>,
        capability_id: impl Into<CapabilityId>,
    ) -> Self {
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            capability_id: capability_id.into(),
            inputs: serde_json::Map::new(),
            dependencies: Vec::new(),
            retry_policy: None,
            timeout: None,
            error_handler: None,
            condition: None,
        }
    }

    /// Add a dependency on another step
    pub fn depends_on(mut self, step: impl Into<StepId>) -> Self {
        self.dependencies.push(step.into());
        self
    }

    /// Set an input value
    pub fn with_input(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }
}

/// An acyclic plan of steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub version: String,
    /// Ordered step list; order is also the rollback reference order
    pub steps: Vec<Step>,
    /// Seed values for the execution's variable map
    #[serde(default)]
    pub initial_inputs: HashMap<String, serde_json::Value>,
    /// Declared shape of the final outputs
    #[serde(default)]
    pub expected_output: serde_json::Value,
    /// Upper bound on total execution time
    #[serde(default, with = "option_duration_millis")]
    pub max_duration: Option<Duration>,
    /// What happens after an unrecovered step failure
    #[serde(default)]
    pub on_error: OnErrorPolicy,
}

impl Workflow {
    /// A workflow with the given id, name and steps
    pub fn new(id: impl Into<WorkflowId>, name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: "1.0.0".to_string(),
            steps,
            initial_inputs: HashMap::new(),
            expected_output: serde_json::Value::Null,
            max_duration: None,
            on_error: OnErrorPolicy::default(),
        }
    }

    /// Set the on-error policy
    pub fn with_on_error(mut self, policy: OnErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }

    /// Seed an initial variable
    pub fn with_input(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.initial_inputs.insert(key.into(), value);
        self
    }

    /// Look up a step by id
    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|s| &s.id == id)
    }
}

/// Serde adapters storing durations as integer milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

pub(crate) mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy {
            max_attempts: 5,
            delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        // 400ms capped at max_delay
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(4), Duration::from_millis(350));
    }

    #[test]
    fn test_step_builder() {
        let step = Step::new("validate", "guardian-1", "kyc.check")
            .depends_on("fetch")
            .with_input("subject", serde_json::json!("${applicant}"));

        assert_eq!(step.dependencies, vec![StepId::new("fetch")]);
        assert_eq!(step.inputs["subject"], serde_json::json!("${applicant}"));
    }

    #[test]
    fn test_workflow_serde_roundtrip() {
        let wf = Workflow::new("wf-onboard", "Onboarding", vec![
            Step::new("a", "guardian-1", "kyc.check"),
            Step::new("b", "atlas-1", "profile.build").depends_on("a"),
        ])
        .with_on_error(OnErrorPolicy::Rollback)
        .with_input("applicant", serde_json::json!("did:concord:alice"));

        let json = serde_json::to_string(&wf).unwrap();
        let back: Workflow = serde_json::from_str(&json).unwrap();
        assert_eq!(back, wf);
        assert_eq!(back.on_error, OnErrorPolicy::Rollback);
    }

    #[test]
    fn test_condition_serde_shapes() {
        let cmp: ExecutionCondition = serde_json::from_value(serde_json::json!({
            "variable": "flag", "operator": "eq", "value": true
        }))
        .unwrap();
        assert!(matches!(cmp, ExecutionCondition::Comparison { .. }));

        let expr: ExecutionCondition = serde_json::from_value(serde_json::json!({
            "expression": "score > 10"
        }))
        .unwrap();
        assert!(matches!(expr, ExecutionCondition::Expression { .. }));
    }
}
