//! Workflow execution records
//!
//! One `WorkflowExecution` is a concrete run of a workflow with its own
//! variables and state transitions. Step transitions are monotonic except
//! retry; a terminal execution state is permanent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::identity::{CapabilityId, CorrelationId, ExecutionId, StepId, WorkflowId};

/// Execution lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    RolledBack,
}

impl ExecutionState {
    /// Whether the state is terminal (permanent)
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::RolledBack)
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        };
        write!(f, "{s}")
    }
}

/// Per-step lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepState {
    /// Whether the state is terminal for the step
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Execution record for a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_id: StepId,
    pub state: StepState,
    /// Retries consumed so far
    pub retry_count: u32,
    /// Outputs produced on completion
    #[serde(default)]
    pub outputs: Option<serde_json::Map<String, serde_json::Value>>,
    /// Terminal error message, if the step failed
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepExecution {
    /// A fresh pending record for the step
    pub fn pending(step_id: StepId) -> Self {
        Self {
            step_id,
            state: StepState::Pending,
            retry_count: 0,
            outputs: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Shared variable scope of an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Named variables, seeded from the workflow's initial inputs
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    /// Outputs keyed by completed step id
    #[serde(default)]
    pub step_outputs: HashMap<StepId, serde_json::Map<String, serde_json::Value>>,
    /// Token threading this run through its events
    pub correlation_id: CorrelationId,
    /// Spawning execution, for sub-workflows
    #[serde(default)]
    pub parent_execution_id: Option<ExecutionId>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            variables: HashMap::new(),
            step_outputs: HashMap::new(),
            correlation_id: CorrelationId::generate(),
            parent_execution_id: None,
        }
    }
}

/// Outcome of one compensating action during rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    Pending,
    Executed,
    Failed,
}

/// One entry in an execution's rollback log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackEntry {
    /// The completed step being compensated
    pub step_id: StepId,
    /// Compensating capability, `<capability>_rollback`
    pub rollback_capability: CapabilityId,
    /// Inputs handed to the compensating capability (the step's outputs)
    pub inputs: serde_json::Map<String, serde_json::Value>,
    pub status: RollbackStatus,
    /// Error message when the compensation itself failed
    #[serde(default)]
    pub error: Option<String>,
}

/// One concrete run of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub state: ExecutionState,
    /// Per-step records, in workflow step order
    pub steps: Vec<StepExecution>,
    pub context: ExecutionContext,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Terminal error, if the run failed
    #[serde(default)]
    pub error: Option<String>,
    /// Compensations recorded during rollback, in execution order
    #[serde(default)]
    pub rollback_log: Vec<RollbackEntry>,
}

impl WorkflowExecution {
    /// Record for a given step id
    pub fn step(&self, id: &StepId) -> Option<&StepExecution> {
        self.steps.iter().find(|s| &s.step_id == id)
    }

    /// Mutable record for a given step id
    pub fn step_mut(&mut self, id: &StepId) -> Option<&mut StepExecution> {
        self.steps.iter_mut().find(|s| &s.step_id == id)
    }

    /// Whether every step reached a terminal state
    pub fn all_steps_terminal(&self) -> bool {
        self.steps.iter().all(|s| s.state.is_terminal())
    }

    /// Ids of steps that are not yet terminal
    pub fn non_terminal_steps(&self) -> Vec<StepId> {
        self.steps
            .iter()
            .filter(|s| !s.state.is_terminal())
            .map(|s| s.step_id.clone())
            .collect()
    }

    /// Flattened view of all step outputs, later steps winning on key clashes
    pub fn flat_outputs(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut flat = serde_json::Map::new();
        for step in &self.steps {
            if let Some(outputs) = &step.outputs {
                for (k, v) in outputs {
                    flat.insert(k.clone(), v.clone());
                }
            }
        }
        flat
    }
}
