//! Concord Maestro - The orchestration facade
//!
//! Composes the agent registry, event bus, choreography engine, capability
//! dispatcher and workflow executor behind one entry point. Callers
//! register agents and handlers, define workflows and execute them;
//! Maestro wires the lifecycle events through the bus.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use concord_bus::{EventBus, EventBusConfig};
use concord_choreography::{ChoreographyEngine, ChoreographyStatistics, ExecutionOptions};
use concord_executor::{
    CancelToken, CapabilityDispatcher, CapabilityHandler, ExecutorConfig, WorkflowExecutor,
};
use concord_registry::{AgentRegistry, RegistryStatistics};
use concord_types::{
    Agent, AgentId, CapabilityId, ConcordError, Event, EventType, ExecutionId, ExecutionState,
    HealthKind, Result, Workflow, WorkflowExecution, WorkflowId,
};

/// Options for Maestro and its composed subsystems
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaestroConfig {
    pub executor: ExecutorConfig,
    pub bus: EventBusConfig,
}

/// Aggregate orchestration status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaestroStatus {
    pub registry: RegistryStatistics,
    pub choreography: ChoreographyStatistics,
    pub active_executions: usize,
}

/// The orchestration facade
pub struct Maestro {
    registry: Arc<AgentRegistry>,
    bus: Arc<EventBus>,
    engine: Arc<ChoreographyEngine>,
    dispatcher: Arc<CapabilityDispatcher>,
    executor: WorkflowExecutor,
    cancel_tokens: RwLock<HashMap<ExecutionId, CancelToken>>,
}

impl Maestro {
    pub fn new(config: MaestroConfig) -> Self {
        let registry = Arc::new(AgentRegistry::new());
        let bus = Arc::new(EventBus::new(config.bus));
        let engine = Arc::new(ChoreographyEngine::new());
        let dispatcher = Arc::new(CapabilityDispatcher::new());
        let executor = WorkflowExecutor::new(
            engine.clone(),
            bus.clone(),
            dispatcher.clone(),
            config.executor,
        );

        info!("maestro initialized");
        Self {
            registry,
            bus,
            engine,
            dispatcher,
            executor,
            cancel_tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Register an agent and publish `agent:registered`
    pub async fn register_agent(&self, agent: Agent) -> Result<()> {
        let agent_id = agent.id.clone();
        let kind = agent.kind;
        self.registry.register(agent).await?;
        self.bus
            .publish(
                Event::new(EventType::AgentRegistered, agent_id.clone())
                    .with_payload(serde_json::json!({ "agent_id": agent_id, "kind": kind })),
            )
            .await;
        Ok(())
    }

    /// Deregister an agent and publish `agent:deregistered`
    pub async fn deregister_agent(&self, agent_id: &AgentId) -> Result<()> {
        self.registry.deregister(agent_id).await?;
        self.bus
            .publish(
                Event::new(EventType::AgentDeregistered, agent_id.clone())
                    .with_payload(serde_json::json!({ "agent_id": agent_id })),
            )
            .await;
        Ok(())
    }

    /// Record a health report and publish `agent:health`
    pub async fn record_health(
        &self,
        agent_id: &AgentId,
        kind: HealthKind,
        detail: Option<String>,
    ) -> Result<()> {
        self.registry.record_health(agent_id, kind, detail.clone()).await?;
        self.bus
            .publish(
                Event::new(EventType::AgentHealth, agent_id.clone())
                    .with_payload(serde_json::json!({ "health": kind, "detail": detail })),
            )
            .await;
        Ok(())
    }

    /// Bind the in-process handler for an (agent, capability) pair
    pub async fn register_capability_handler(
        &self,
        agent_id: impl Into<AgentId>,
        capability_id: impl Into<CapabilityId>,
        handler: CapabilityHandler,
    ) {
        self.dispatcher.register(agent_id, capability_id, handler).await;
    }

    /// Store a workflow definition and publish `workflow:created`
    pub async fn define_workflow(&self, workflow: Workflow) -> Result<()> {
        let workflow_id = workflow.id.clone();
        self.engine.define_workflow(workflow).await?;
        self.bus
            .publish(
                Event::new(EventType::WorkflowCreated, "maestro")
                    .with_workflow(workflow_id.clone())
                    .with_payload(serde_json::json!({ "workflow_id": workflow_id })),
            )
            .await;
        Ok(())
    }

    /// Execute a workflow to a terminal state
    ///
    /// Creates the execution, seeds the given variables over the workflow's
    /// initial inputs and drives it with a fresh cancellation token.
    pub async fn execute_workflow(
        &self,
        workflow_id: &WorkflowId,
        variables: HashMap<String, serde_json::Value>,
    ) -> Result<WorkflowExecution> {
        let execution_id = self
            .engine
            .create_execution(workflow_id, ExecutionOptions { variables, ..Default::default() })
            .await?;

        let token = CancelToken::new();
        self.cancel_tokens.write().await.insert(execution_id.clone(), token.clone());

        let result = self.executor.execute(&execution_id, token).await;
        self.cancel_tokens.write().await.remove(&execution_id);
        result
    }

    /// Cancel an in-flight execution
    pub async fn cancel_execution(&self, execution_id: &ExecutionId) -> Result<()> {
        let tokens = self.cancel_tokens.read().await;
        let token = tokens
            .get(execution_id)
            .ok_or_else(|| ConcordError::not_found("execution", execution_id.as_str()))?;
        token.cancel();
        Ok(())
    }

    /// Pause a running execution and publish `workflow:paused`
    pub async fn pause_execution(&self, execution_id: &ExecutionId) -> Result<()> {
        self.set_pause(execution_id, true).await
    }

    /// Resume a paused execution and publish `workflow:resumed`
    pub async fn resume_execution(&self, execution_id: &ExecutionId) -> Result<()> {
        self.set_pause(execution_id, false).await
    }

    async fn set_pause(&self, execution_id: &ExecutionId, pause: bool) -> Result<()> {
        let handle = self.engine.handle(execution_id).await?;
        let workflow_id = {
            let mut execution = handle.lock().await;
            match (pause, execution.state) {
                (true, ExecutionState::Running) => execution.state = ExecutionState::Paused,
                (false, ExecutionState::Paused) => execution.state = ExecutionState::Running,
                (_, state) => {
                    return Err(ConcordError::invalid(format!(
                        "cannot {} execution in state {state}",
                        if pause { "pause" } else { "resume" }
                    )));
                }
            }
            execution.workflow_id.clone()
        };

        let event_type = if pause { EventType::WorkflowPaused } else { EventType::WorkflowResumed };
        self.bus
            .publish(
                Event::new(event_type, "maestro")
                    .with_workflow(workflow_id)
                    .with_execution(execution_id.clone()),
            )
            .await;
        Ok(())
    }

    /// Snapshot of one execution
    pub async fn execution(&self, execution_id: &ExecutionId) -> Result<WorkflowExecution> {
        self.engine.execution(execution_id).await
    }

    /// Snapshots of every execution of a workflow
    pub async fn executions_for_workflow(&self, workflow_id: &WorkflowId) -> Vec<WorkflowExecution> {
        self.engine.executions_for_workflow(workflow_id).await
    }

    /// Aggregate status for dashboards
    pub async fn status(&self) -> MaestroStatus {
        MaestroStatus {
            registry: self.registry.statistics().await,
            choreography: self.engine.statistics().await,
            active_executions: self.executor.active_executions(),
        }
    }

    /// Direct access to the agent registry
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Direct access to the event bus
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Direct access to the choreography engine
    pub fn choreography(&self) -> &Arc<ChoreographyEngine> {
        &self.engine
    }

    /// Direct access to the capability dispatcher
    pub fn dispatcher(&self) -> &Arc<CapabilityDispatcher> {
        &self.dispatcher
    }
}

impl Default for Maestro {
    fn default() -> Self {
        Self::new(MaestroConfig::default())
    }
}
