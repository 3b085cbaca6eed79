//! Concord Executor - Drives workflow executions to completion
//!
//! The executor owns the drive loop:
//!
//! 1. Mark the execution running, publish `workflow:started`.
//! 2. Fetch the ready set. Empty + all steps terminal → success; empty with
//!    non-terminal steps left → deadlock failure.
//! 3. Launch every ready step concurrently and wait for all to settle.
//! 4. Per step: substitute inputs, invoke the capability, retry transient
//!    failures with exponential backoff, then apply the step's error
//!    handler (skip / fallback / callback).
//! 5. Unrecovered failures consult the workflow's on-error policy: stop,
//!    continue, or rollback (compensations in reverse completion order).
//!
//! A step's `workflow:step_completed` event is published strictly before
//! any dependent becomes ready; the terminal `workflow:completed` /
//! `workflow:failed` event is the last one published for an execution.

pub mod cancel;
pub mod invoke;

pub use cancel::{sleep_cancellable, CancelToken};
pub use invoke::{capability_handler, AgentInvoker, CapabilityDispatcher, CapabilityHandler, ValueMap};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use concord_bus::EventBus;
use concord_choreography::substitute::substitute_inputs;
use concord_choreography::{ChoreographyEngine, ExecutionHandle};
use concord_types::{
    AgentId, CapabilityId, ConcordError, CorrelationId, ErrorHandlerKind, Event, EventType,
    ExecutionId, ExecutionState, OnErrorPolicy, Result, RollbackEntry, RollbackStatus,
    Step, StepId, StepState, Workflow, WorkflowExecution,
};

/// Suffix of the compensating capability invoked during rollback
pub const ROLLBACK_SUFFIX: &str = "_rollback";

/// Agent id the orchestrator uses as event source
const ORCHESTRATOR_SOURCE: &str = "maestro";

/// Options for the executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Concurrent executions admitted before `CapacityExceeded`
    pub max_concurrent_workflows: usize,
    /// Bound on a whole execution when the workflow declares none, in ms
    pub default_workflow_timeout_ms: u64,
    /// Bound on one capability invocation when the step declares none, in ms
    pub agent_timeout_ms: u64,
    /// Gates the rollback path entirely
    pub enable_rollback: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: 100,
            default_workflow_timeout_ms: 300_000,
            agent_timeout_ms: 10_000,
            enable_rollback: true,
        }
    }
}

/// Outcome of one step after retries and handlers
enum StepOutcome {
    Succeeded,
    Failed(ConcordError),
}

/// Workflow executor
pub struct WorkflowExecutor {
    engine: Arc<ChoreographyEngine>,
    bus: Arc<EventBus>,
    invoker: Arc<dyn AgentInvoker>,
    config: ExecutorConfig,
    active: AtomicUsize,
}

/// Releases an admission slot when the execution settles
struct AdmissionGuard<'a>(&'a AtomicUsize);

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkflowExecutor {
    pub fn new(
        engine: Arc<ChoreographyEngine>,
        bus: Arc<EventBus>,
        invoker: Arc<dyn AgentInvoker>,
        config: ExecutorConfig,
    ) -> Self {
        Self { engine, bus, invoker, config, active: AtomicUsize::new(0) }
    }

    /// Drive an execution to a terminal state
    ///
    /// Over-capacity invocations reject with `CapacityExceeded`. The token
    /// is honored at every suspension point; cancellation fails the
    /// execution with `Cancelled` and rolls back iff the workflow policy is
    /// rollback.
    pub async fn execute(
        &self,
        execution_id: &ExecutionId,
        token: CancelToken,
    ) -> Result<WorkflowExecution> {
        let _slot = self.admit()?;

        let handle = self.engine.handle(execution_id).await?;
        let workflow = {
            let execution = handle.lock().await;
            self.engine.workflow(&execution.workflow_id).await?
        };

        let correlation = {
            let mut execution = handle.lock().await;
            execution.state = ExecutionState::Running;
            execution.started_at = Some(Utc::now());
            execution.context.correlation_id.clone()
        };
        info!(execution_id = %execution_id, workflow_id = %workflow.id, "execution started");
        self.emit(EventType::WorkflowStarted, &workflow, execution_id, &correlation, serde_json::Value::Null)
            .await;

        let outcome = self.drive(&workflow, &handle, execution_id, &correlation, &token).await;

        match outcome {
            Ok(()) => {
                {
                    let mut execution = handle.lock().await;
                    execution.state = ExecutionState::Completed;
                    execution.completed_at = Some(Utc::now());
                }
                info!(execution_id = %execution_id, "execution completed");
                self.emit(
                    EventType::WorkflowCompleted,
                    &workflow,
                    execution_id,
                    &correlation,
                    serde_json::Value::Null,
                )
                .await;
            }
            Err(error) => {
                let rolled_back = if workflow.on_error == OnErrorPolicy::Rollback
                    && self.config.enable_rollback
                {
                    self.rollback(&workflow, &handle, execution_id).await;
                    true
                } else {
                    false
                };

                {
                    let mut execution = handle.lock().await;
                    execution.state = if rolled_back {
                        ExecutionState::RolledBack
                    } else {
                        ExecutionState::Failed
                    };
                    execution.error = Some(error.to_string());
                    execution.completed_at = Some(Utc::now());
                }
                warn!(execution_id = %execution_id, error = %error, "execution failed");
                self.emit(
                    EventType::WorkflowFailed,
                    &workflow,
                    execution_id,
                    &correlation,
                    serde_json::json!({ "error": error.to_string(), "rolled_back": rolled_back }),
                )
                .await;
            }
        }

        let execution = handle.lock().await;
        Ok(execution.clone())
    }

    /// The number of executions currently in flight
    pub fn active_executions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn admit(&self) -> Result<AdmissionGuard<'_>> {
        let limit = self.config.max_concurrent_workflows;
        let admitted = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < limit).then_some(current + 1)
            })
            .is_ok();
        if !admitted {
            return Err(ConcordError::CapacityExceeded { limit });
        }
        Ok(AdmissionGuard(&self.active))
    }

    async fn drive(
        &self,
        workflow: &Workflow,
        handle: &ExecutionHandle,
        execution_id: &ExecutionId,
        correlation: &CorrelationId,
        token: &CancelToken,
    ) -> Result<()> {
        let deadline = workflow
            .max_duration
            .unwrap_or(Duration::from_millis(self.config.default_workflow_timeout_ms));
        let started = std::time::Instant::now();

        loop {
            token.check()?;
            if started.elapsed() > deadline {
                return Err(ConcordError::permanent(format!(
                    "workflow timed out after {}ms",
                    deadline.as_millis()
                )));
            }

            // A paused execution holds its position until resumed
            let paused = { handle.lock().await.state == ExecutionState::Paused };
            if paused {
                sleep_cancellable(Duration::from_millis(25), token).await?;
                continue;
            }

            let ready = self.engine.next_steps(execution_id).await?;
            if ready.is_empty() {
                let execution = handle.lock().await;
                if execution.all_steps_terminal() {
                    return Ok(());
                }
                let pending = execution.non_terminal_steps().len();
                return Err(ConcordError::Deadlock {
                    execution_id: execution_id.clone(),
                    pending,
                });
            }

            let outcomes = join_all(ready.into_iter().map(|step| {
                self.run_step(workflow, step, handle, execution_id, correlation, token)
            }))
            .await;

            let mut failure = None;
            for outcome in outcomes {
                if let StepOutcome::Failed(error) = outcome {
                    failure = Some(error);
                }
            }

            if let Some(error) = failure {
                match workflow.on_error {
                    OnErrorPolicy::Stop | OnErrorPolicy::Rollback => return Err(error),
                    // Independent branches keep running; dependents of the
                    // failed step stay pending and terminate via the
                    // deadlock check above
                    OnErrorPolicy::Continue => {}
                }
            }
        }
    }

    async fn run_step(
        &self,
        workflow: &Workflow,
        step: Step,
        handle: &ExecutionHandle,
        execution_id: &ExecutionId,
        correlation: &CorrelationId,
        token: &CancelToken,
    ) -> StepOutcome {
        let inputs = {
            let mut execution = handle.lock().await;
            let flat = execution.flat_outputs();
            let inputs = substitute_inputs(&step.inputs, &execution.context.variables, &flat);
            if let Some(record) = execution.step_mut(&step.id) {
                record.state = StepState::Running;
                record.started_at = Some(Utc::now());
            }
            inputs
        };

        let policy = step.retry_policy.clone().unwrap_or_default();
        let timeout = step
            .timeout
            .unwrap_or(Duration::from_millis(self.config.agent_timeout_ms));

        let mut attempt: u32 = 1;
        let error = loop {
            match self.invoke_once(&step.agent_id, &step.capability_id, inputs.clone(), timeout, token).await {
                Ok(outputs) => {
                    self.complete_step(workflow, &step, handle, execution_id, correlation, outputs)
                        .await;
                    return StepOutcome::Succeeded;
                }
                Err(error) => {
                    if matches!(error, ConcordError::Cancelled) || !error.is_transient() {
                        break error;
                    }
                    if attempt >= policy.max_attempts.max(1) {
                        break error;
                    }

                    let backoff = policy.backoff(attempt);
                    debug!(
                        execution_id = %execution_id,
                        step_id = %step.id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "step retrying after transient failure"
                    );
                    {
                        let mut execution = handle.lock().await;
                        if let Some(record) = execution.step_mut(&step.id) {
                            record.retry_count = attempt;
                        }
                    }
                    if sleep_cancellable(backoff, token).await.is_err() {
                        break ConcordError::Cancelled;
                    }
                    attempt += 1;
                }
            }
        };

        if !matches!(error, ConcordError::Cancelled) {
            if let Some(outcome) = self
                .apply_error_handler(workflow, &step, handle, execution_id, correlation, &error, timeout, token)
                .await
            {
                return outcome;
            }
        }

        self.fail_step(workflow, &step, handle, execution_id, correlation, &error).await;
        StepOutcome::Failed(error.into_step_failure(step.id.clone()))
    }

    /// Apply the step's error handler; `Some` short-circuits the failure
    #[allow(clippy::too_many_arguments)]
    async fn apply_error_handler(
        &self,
        workflow: &Workflow,
        step: &Step,
        handle: &ExecutionHandle,
        execution_id: &ExecutionId,
        correlation: &CorrelationId,
        error: &ConcordError,
        timeout: Duration,
        token: &CancelToken,
    ) -> Option<StepOutcome> {
        let handler = step.error_handler.as_ref()?;
        match handler.kind {
            // Retries were already exhausted above
            ErrorHandlerKind::Retry => None,
            ErrorHandlerKind::Skip => {
                {
                    let mut execution = handle.lock().await;
                    if let Some(record) = execution.step_mut(&step.id) {
                        record.state = StepState::Skipped;
                        record.completed_at = Some(Utc::now());
                    }
                }
                debug!(execution_id = %execution_id, step_id = %step.id, "step skipped by error handler");
                Some(StepOutcome::Succeeded)
            }
            ErrorHandlerKind::Fallback => {
                let fallback_id = handler.action.as_deref()?;
                let fallback = workflow.step(&StepId::new(fallback_id))?.clone();

                let inputs = {
                    let execution = handle.lock().await;
                    let flat = execution.flat_outputs();
                    substitute_inputs(&fallback.inputs, &execution.context.variables, &flat)
                };

                match self
                    .invoke_once(&fallback.agent_id, &fallback.capability_id, inputs, timeout, token)
                    .await
                {
                    Ok(outputs) => {
                        // The original step completes with the fallback's outputs
                        self.complete_step(workflow, step, handle, execution_id, correlation, outputs)
                            .await;
                        Some(StepOutcome::Succeeded)
                    }
                    Err(fallback_error) => {
                        warn!(
                            execution_id = %execution_id,
                            step_id = %step.id,
                            fallback = %fallback.id,
                            error = %fallback_error,
                            "fallback step failed"
                        );
                        None
                    }
                }
            }
            ErrorHandlerKind::Callback => {
                // Out-of-band notification; the step still fails
                self.bus
                    .publish(
                        Event::new(EventType::AgentEvent, ORCHESTRATOR_SOURCE)
                            .with_workflow(workflow.id.clone())
                            .with_execution(execution_id.clone())
                            .with_correlation(correlation.clone())
                            .with_payload(serde_json::json!({
                                "callback": handler.action,
                                "step_id": step.id,
                                "error": error.to_string(),
                            })),
                    )
                    .await;
                None
            }
        }
    }

    async fn invoke_once(
        &self,
        agent_id: &AgentId,
        capability_id: &CapabilityId,
        inputs: ValueMap,
        timeout: Duration,
        token: &CancelToken,
    ) -> Result<ValueMap> {
        tokio::select! {
            result = self.invoker.invoke(agent_id, capability_id, inputs) => result,
            _ = tokio::time::sleep(timeout) => Err(ConcordError::transient(format!(
                "capability {capability_id} on {agent_id} timed out after {}ms",
                timeout.as_millis()
            ))),
            _ = token.cancelled() => Err(ConcordError::Cancelled),
        }
    }

    async fn complete_step(
        &self,
        workflow: &Workflow,
        step: &Step,
        handle: &ExecutionHandle,
        execution_id: &ExecutionId,
        correlation: &CorrelationId,
        outputs: ValueMap,
    ) {
        {
            let mut execution = handle.lock().await;
            execution.context.step_outputs.insert(step.id.clone(), outputs.clone());
            if let Some(record) = execution.step_mut(&step.id) {
                record.state = StepState::Completed;
                record.outputs = Some(outputs.clone());
                record.completed_at = Some(Utc::now());
            }
        }
        debug!(execution_id = %execution_id, step_id = %step.id, "step completed");
        self.emit(
            EventType::WorkflowStepCompleted,
            workflow,
            execution_id,
            correlation,
            serde_json::json!({ "step_id": step.id, "outputs": outputs }),
        )
        .await;
    }

    async fn fail_step(
        &self,
        workflow: &Workflow,
        step: &Step,
        handle: &ExecutionHandle,
        execution_id: &ExecutionId,
        correlation: &CorrelationId,
        error: &ConcordError,
    ) {
        {
            let mut execution = handle.lock().await;
            if let Some(record) = execution.step_mut(&step.id) {
                record.state = StepState::Failed;
                record.error = Some(error.to_string());
                record.completed_at = Some(Utc::now());
            }
        }
        warn!(execution_id = %execution_id, step_id = %step.id, error = %error, "step failed");
        self.emit(
            EventType::WorkflowStepFailed,
            workflow,
            execution_id,
            correlation,
            serde_json::json!({ "step_id": step.id, "error": error.to_string() }),
        )
        .await;
    }

    /// Compensate completed steps in reverse completion order
    ///
    /// Each completed step's outputs feed `<capability>_rollback` on the
    /// same agent. Compensation errors are recorded in the rollback log and
    /// never abort the remaining compensations.
    async fn rollback(
        &self,
        workflow: &Workflow,
        handle: &ExecutionHandle,
        execution_id: &ExecutionId,
    ) {
        let completed: Vec<(StepId, AgentId, CapabilityId, ValueMap)> = {
            let execution = handle.lock().await;
            let mut completed: Vec<_> = execution
                .steps
                .iter()
                .filter(|record| record.state == StepState::Completed)
                .filter_map(|record| {
                    let step = workflow.step(&record.step_id)?;
                    Some((
                        record.step_id.clone(),
                        step.agent_id.clone(),
                        step.capability_id.clone(),
                        record.outputs.clone().unwrap_or_default(),
                        record.completed_at,
                    ))
                })
                .collect();
            completed.sort_by_key(|(_, _, _, _, completed_at)| std::cmp::Reverse(*completed_at));
            completed
                .into_iter()
                .map(|(id, agent, cap, outputs, _)| (id, agent, cap, outputs))
                .collect()
        };

        for (step_id, agent_id, capability_id, outputs) in completed {
            let rollback_capability =
                CapabilityId::new(format!("{}{}", capability_id, ROLLBACK_SUFFIX));

            let entry_index = {
                let mut execution = handle.lock().await;
                execution.rollback_log.push(RollbackEntry {
                    step_id: step_id.clone(),
                    rollback_capability: rollback_capability.clone(),
                    inputs: outputs.clone(),
                    status: RollbackStatus::Pending,
                    error: None,
                });
                execution.rollback_log.len() - 1
            };

            let result = self.invoker.invoke(&agent_id, &rollback_capability, outputs).await;

            let mut execution = handle.lock().await;
            let entry = &mut execution.rollback_log[entry_index];
            match result {
                Ok(_) => {
                    entry.status = RollbackStatus::Executed;
                    debug!(execution_id = %execution_id, step_id = %step_id, "rollback executed");
                }
                Err(error) => {
                    entry.status = RollbackStatus::Failed;
                    entry.error = Some(error.to_string());
                    warn!(
                        execution_id = %execution_id,
                        step_id = %step_id,
                        error = %error,
                        "rollback capability failed"
                    );
                }
            }
        }
    }

    async fn emit(
        &self,
        event_type: EventType,
        workflow: &Workflow,
        execution_id: &ExecutionId,
        correlation: &CorrelationId,
        payload: serde_json::Value,
    ) {
        self.bus
            .publish(
                Event::new(event_type, ORCHESTRATOR_SOURCE)
                    .with_workflow(workflow.id.clone())
                    .with_execution(execution_id.clone())
                    .with_correlation(correlation.clone())
                    .with_payload(payload),
            )
            .await;
    }
}
