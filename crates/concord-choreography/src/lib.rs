//! Concord Choreography - Workflow definitions and execution state
//!
//! Owns the workflow registry and the execution registry. Definition
//! validates shape and acyclicity; executions are created pending and
//! advanced by the executor through `next_steps`, which applies
//! condition-skips as a side effect.
//!
//! Locking: the engine-global locks protect only the two maps. Every
//! execution carries its own lock, and step-state updates serialize on it.

pub mod condition;
pub mod dag;
pub mod substitute;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use concord_types::{
    ConcordError, CorrelationId, ExecutionContext, ExecutionId, ExecutionState, Result, Step,
    StepExecution, StepState, Workflow, WorkflowExecution, WorkflowId,
};

use condition::ConditionScope;

/// Options for creating an execution
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Correlation token; generated when absent
    pub correlation_id: Option<CorrelationId>,
    /// Spawning execution, for sub-workflows
    pub parent_execution_id: Option<ExecutionId>,
    /// Variables merged over the workflow's initial inputs
    pub variables: HashMap<String, serde_json::Value>,
}

/// Aggregate choreography statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoreographyStatistics {
    pub total_workflows: usize,
    pub total_executions: usize,
    pub executions_by_state: HashMap<String, usize>,
}

/// Shared handle to one execution's mutable state
pub type ExecutionHandle = Arc<Mutex<WorkflowExecution>>;

/// Workflow and execution registry
pub struct ChoreographyEngine {
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
    executions: RwLock<HashMap<ExecutionId, ExecutionHandle>>,
}

impl ChoreographyEngine {
    pub fn new() -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            executions: RwLock::new(HashMap::new()),
        }
    }

    /// Store a validated workflow definition
    ///
    /// Fails with `InvalidArgument` on shape violations, `CircularDependency`
    /// on a dependency cycle, and `DuplicateId` when the id is taken.
    pub async fn define_workflow(&self, workflow: Workflow) -> Result<()> {
        validate_workflow(&workflow)?;

        let mut workflows = self.workflows.write().await;
        if workflows.contains_key(&workflow.id) {
            return Err(ConcordError::duplicate("workflow", workflow.id.as_str()));
        }
        info!(workflow_id = %workflow.id, steps = workflow.steps.len(), "workflow defined");
        workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    /// Replace an existing definition after re-validating it
    pub async fn update_workflow(&self, workflow: Workflow) -> Result<()> {
        validate_workflow(&workflow)?;

        let mut workflows = self.workflows.write().await;
        if !workflows.contains_key(&workflow.id) {
            return Err(ConcordError::not_found("workflow", workflow.id.as_str()));
        }
        info!(workflow_id = %workflow.id, "workflow updated");
        workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    /// Remove a definition
    pub async fn remove_workflow(&self, workflow_id: &WorkflowId) -> Result<Workflow> {
        self.workflows
            .write()
            .await
            .remove(workflow_id)
            .ok_or_else(|| ConcordError::not_found("workflow", workflow_id.as_str()))
    }

    /// Fetch a definition
    pub async fn workflow(&self, workflow_id: &WorkflowId) -> Result<Workflow> {
        self.workflows
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| ConcordError::not_found("workflow", workflow_id.as_str()))
    }

    /// All definitions
    pub async fn list_workflows(&self) -> Vec<Workflow> {
        self.workflows.read().await.values().cloned().collect()
    }

    /// Allocate a pending execution of a workflow
    pub async fn create_execution(
        &self,
        workflow_id: &WorkflowId,
        options: ExecutionOptions,
    ) -> Result<ExecutionId> {
        let workflow = self.workflow(workflow_id).await?;

        let mut variables = workflow.initial_inputs.clone();
        variables.extend(options.variables);

        let execution_id = ExecutionId::generate();
        let execution = WorkflowExecution {
            id: execution_id.clone(),
            workflow_id: workflow_id.clone(),
            state: ExecutionState::Pending,
            steps: workflow.steps.iter().map(|s| StepExecution::pending(s.id.clone())).collect(),
            context: ExecutionContext {
                variables,
                step_outputs: HashMap::new(),
                correlation_id: options.correlation_id.unwrap_or_else(CorrelationId::generate),
                parent_execution_id: options.parent_execution_id,
            },
            started_at: None,
            completed_at: None,
            error: None,
            rollback_log: Vec::new(),
        };

        debug!(execution_id = %execution_id, workflow_id = %workflow_id, "execution created");
        self.executions
            .write()
            .await
            .insert(execution_id.clone(), Arc::new(Mutex::new(execution)));
        Ok(execution_id)
    }

    /// Snapshot of an execution's current state
    pub async fn execution(&self, execution_id: &ExecutionId) -> Result<WorkflowExecution> {
        let handle = self.handle(execution_id).await?;
        let execution = handle.lock().await;
        Ok(execution.clone())
    }

    /// Snapshots of every execution of a workflow
    pub async fn executions_for_workflow(&self, workflow_id: &WorkflowId) -> Vec<WorkflowExecution> {
        let handles: Vec<ExecutionHandle> =
            self.executions.read().await.values().cloned().collect();

        let mut snapshots = Vec::new();
        for handle in handles {
            let execution = handle.lock().await;
            if &execution.workflow_id == workflow_id {
                snapshots.push(execution.clone());
            }
        }
        snapshots
    }

    /// The shared handle for an execution's mutable state
    pub async fn handle(&self, execution_id: &ExecutionId) -> Result<ExecutionHandle> {
        self.executions
            .read()
            .await
            .get(execution_id)
            .cloned()
            .ok_or_else(|| ConcordError::not_found("execution", execution_id.as_str()))
    }

    /// Steps ready to run now
    ///
    /// A step is ready when it is pending, every dependency completed, and
    /// its condition (if any) holds. Steps whose condition evaluates false
    /// transition to skipped here and are omitted from the result.
    pub async fn next_steps(&self, execution_id: &ExecutionId) -> Result<Vec<Step>> {
        let workflow = {
            let execution = self.execution(execution_id).await?;
            self.workflow(&execution.workflow_id).await?
        };
        let handle = self.handle(execution_id).await?;
        let mut execution = handle.lock().await;

        let mut ready = Vec::new();
        loop {
            // Skips may unlock nothing, but re-evaluate in case a skipped
            // step's absence changes which conditions can be read
            let mut changed = false;
            ready.clear();

            let flat = execution.flat_outputs();
            let scope = ConditionScope {
                variables: &execution.context.variables,
                step_outputs_flat: &flat,
            };

            let mut to_skip: Vec<concord_types::StepId> = Vec::new();
            for step in &workflow.steps {
                let record = execution
                    .step(&step.id)
                    .ok_or_else(|| ConcordError::not_found("step", step.id.as_str()))?;
                if record.state != StepState::Pending {
                    continue;
                }

                let deps_completed = step.dependencies.iter().all(|dep| {
                    execution
                        .step(dep)
                        .map(|d| d.state == StepState::Completed)
                        .unwrap_or(false)
                });
                if !deps_completed {
                    continue;
                }

                match &step.condition {
                    Some(condition) if !condition::evaluate(condition, &scope) => {
                        to_skip.push(step.id.clone());
                    }
                    _ => ready.push(step.clone()),
                }
            }

            for step_id in to_skip {
                if let Some(record) = execution.step_mut(&step_id) {
                    record.state = StepState::Skipped;
                    record.completed_at = Some(Utc::now());
                    changed = true;
                    debug!(execution_id = %execution_id, step_id = %step_id, "step skipped by condition");
                }
            }

            if !changed {
                break;
            }
        }

        Ok(ready)
    }

    /// Aggregate statistics
    pub async fn statistics(&self) -> ChoreographyStatistics {
        let total_workflows = self.workflows.read().await.len();
        let handles: Vec<ExecutionHandle> =
            self.executions.read().await.values().cloned().collect();

        let mut by_state: HashMap<String, usize> = HashMap::new();
        for handle in &handles {
            let execution = handle.lock().await;
            *by_state.entry(execution.state.to_string()).or_default() += 1;
        }

        ChoreographyStatistics {
            total_workflows,
            total_executions: handles.len(),
            executions_by_state: by_state,
        }
    }
}

impl Default for ChoreographyEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_workflow(workflow: &Workflow) -> Result<()> {
    if workflow.id.is_empty() {
        return Err(ConcordError::invalid("workflow id must not be empty"));
    }
    if workflow.name.is_empty() {
        return Err(ConcordError::invalid("workflow name must not be empty"));
    }
    if workflow.steps.is_empty() {
        return Err(ConcordError::invalid("workflow must define at least one step"));
    }

    let mut seen = std::collections::HashSet::new();
    for step in &workflow.steps {
        if step.id.is_empty() || step.agent_id.is_empty() || step.capability_id.is_empty() {
            return Err(ConcordError::invalid(format!(
                "step in workflow {} requires id, agent and capability",
                workflow.id
            )));
        }
        if !seen.insert(step.id.clone()) {
            return Err(ConcordError::invalid(format!(
                "duplicate step id {} in workflow {}",
                step.id, workflow.id
            )));
        }
    }

    dag::validate_acyclic(workflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_types::{ConditionOperator, ExecutionCondition};
    use serde_json::json;

    fn two_step_workflow() -> Workflow {
        Workflow::new("wf-1", "pipeline", vec![
            Step::new("fetch", "atlas-1", "profile.fetch"),
            Step::new("check", "guardian-1", "kyc.check").depends_on("fetch"),
        ])
    }

    #[tokio::test]
    async fn test_define_validates() {
        let engine = ChoreographyEngine::new();
        engine.define_workflow(two_step_workflow()).await.unwrap();

        // Duplicate id
        assert!(matches!(
            engine.define_workflow(two_step_workflow()).await.unwrap_err(),
            ConcordError::DuplicateId { .. }
        ));

        // Empty steps
        let empty = Workflow::new("wf-2", "empty", vec![]);
        assert!(matches!(
            engine.define_workflow(empty).await.unwrap_err(),
            ConcordError::InvalidArgument { .. }
        ));

        // Cycle
        let cyclic = Workflow::new("wf-3", "cycle", vec![
            Step::new("a", "x", "cap").depends_on("b"),
            Step::new("b", "x", "cap").depends_on("a"),
        ]);
        assert!(matches!(
            engine.define_workflow(cyclic).await.unwrap_err(),
            ConcordError::CircularDependency { .. }
        ));
    }

    #[tokio::test]
    async fn test_create_execution_seeds_variables() {
        let engine = ChoreographyEngine::new();
        engine
            .define_workflow(two_step_workflow().with_input("region", json!("eu-west")))
            .await
            .unwrap();

        let mut overrides = HashMap::new();
        overrides.insert("applicant".to_string(), json!("did:concord:alice"));

        let execution_id = engine
            .create_execution(
                &WorkflowId::new("wf-1"),
                ExecutionOptions { variables: overrides, ..Default::default() },
            )
            .await
            .unwrap();

        let execution = engine.execution(&execution_id).await.unwrap();
        assert_eq!(execution.state, ExecutionState::Pending);
        assert_eq!(execution.steps.len(), 2);
        assert_eq!(execution.context.variables["region"], json!("eu-west"));
        assert_eq!(execution.context.variables["applicant"], json!("did:concord:alice"));
        assert_eq!(execution.steps[0].retry_count, 0);
    }

    #[tokio::test]
    async fn test_next_steps_respects_dependencies() {
        let engine = ChoreographyEngine::new();
        engine.define_workflow(two_step_workflow()).await.unwrap();
        let execution_id = engine
            .create_execution(&WorkflowId::new("wf-1"), ExecutionOptions::default())
            .await
            .unwrap();

        let ready = engine.next_steps(&execution_id).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id.as_str(), "fetch");

        // Complete the first step; the dependent becomes ready
        {
            let handle = engine.handle(&execution_id).await.unwrap();
            let mut execution = handle.lock().await;
            let record = execution.step_mut(&concord_types::StepId::new("fetch")).unwrap();
            record.state = StepState::Completed;
        }

        let ready = engine.next_steps(&execution_id).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id.as_str(), "check");
    }

    #[tokio::test]
    async fn test_false_condition_skips_with_side_effect() {
        let engine = ChoreographyEngine::new();
        let mut workflow = Workflow::new("wf-c", "conditional", vec![
            Step::new("gated", "atlas-1", "profile.fetch"),
        ])
        .with_input("flag", json!(false));
        workflow.steps[0].condition = Some(ExecutionCondition::Comparison {
            variable: "flag".into(),
            operator: ConditionOperator::Eq,
            value: json!(true),
        });
        engine.define_workflow(workflow).await.unwrap();

        let execution_id = engine
            .create_execution(&WorkflowId::new("wf-c"), ExecutionOptions::default())
            .await
            .unwrap();

        let ready = engine.next_steps(&execution_id).await.unwrap();
        assert!(ready.is_empty());

        let execution = engine.execution(&execution_id).await.unwrap();
        assert_eq!(execution.steps[0].state, StepState::Skipped);
    }

    #[tokio::test]
    async fn test_update_and_remove_workflow() {
        let engine = ChoreographyEngine::new();
        engine.define_workflow(two_step_workflow()).await.unwrap();

        let mut updated = two_step_workflow();
        updated.version = "1.1.0".to_string();
        engine.update_workflow(updated).await.unwrap();
        assert_eq!(engine.workflow(&WorkflowId::new("wf-1")).await.unwrap().version, "1.1.0");

        engine.remove_workflow(&WorkflowId::new("wf-1")).await.unwrap();
        assert!(engine.workflow(&WorkflowId::new("wf-1")).await.is_err());

        // Updating a missing workflow fails
        assert!(matches!(
            engine.update_workflow(two_step_workflow()).await.unwrap_err(),
            ConcordError::NotFound { .. }
        ));
    }
}
