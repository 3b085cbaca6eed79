//! The closed system event set
//!
//! Every observable transition in the platform publishes one of these
//! events on the bus. The type set is closed; payloads carry the
//! transition-specific detail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::identity::{AgentId, CorrelationId, EventId, ExecutionId, WorkflowId};

/// Closed set of event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "agent:registered")]
    AgentRegistered,
    #[serde(rename = "agent:deregistered")]
    AgentDeregistered,
    #[serde(rename = "agent:health")]
    AgentHealth,
    #[serde(rename = "agent:event")]
    AgentEvent,
    #[serde(rename = "agent:alert")]
    AgentAlert,
    #[serde(rename = "workflow:created")]
    WorkflowCreated,
    #[serde(rename = "workflow:started")]
    WorkflowStarted,
    #[serde(rename = "workflow:step_completed")]
    WorkflowStepCompleted,
    #[serde(rename = "workflow:step_failed")]
    WorkflowStepFailed,
    #[serde(rename = "workflow:completed")]
    WorkflowCompleted,
    #[serde(rename = "workflow:failed")]
    WorkflowFailed,
    #[serde(rename = "workflow:paused")]
    WorkflowPaused,
    #[serde(rename = "workflow:resumed")]
    WorkflowResumed,
    #[serde(rename = "choreography:sync")]
    ChoreographySync,
}

impl EventType {
    /// The wire name, e.g. `workflow:step_completed`
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AgentRegistered => "agent:registered",
            Self::AgentDeregistered => "agent:deregistered",
            Self::AgentHealth => "agent:health",
            Self::AgentEvent => "agent:event",
            Self::AgentAlert => "agent:alert",
            Self::WorkflowCreated => "workflow:created",
            Self::WorkflowStarted => "workflow:started",
            Self::WorkflowStepCompleted => "workflow:step_completed",
            Self::WorkflowStepFailed => "workflow:step_failed",
            Self::WorkflowCompleted => "workflow:completed",
            Self::WorkflowFailed => "workflow:failed",
            Self::WorkflowPaused => "workflow:paused",
            Self::WorkflowResumed => "workflow:resumed",
            Self::ChoreographySync => "choreography:sync",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One event published on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub source_agent: AgentId,
    #[serde(default)]
    pub target_agent: Option<AgentId>,
    #[serde(default)]
    pub workflow_id: Option<WorkflowId>,
    #[serde(default)]
    pub execution_id: Option<ExecutionId>,
    pub correlation_id: CorrelationId,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl Event {
    /// A fresh event from the given source
    pub fn new(event_type: EventType, source_agent: impl Into<AgentId>) -> Self {
        Self {
            id: EventId::generate(),
            event_type,
            source_agent: source_agent.into(),
            target_agent: None,
            workflow_id: None,
            execution_id: None,
            correlation_id: CorrelationId::generate(),
            payload: serde_json::Value::Null,
            created_at: Utc::now(),
            metadata: None,
        }
    }

    /// Address the event at a target agent
    pub fn with_target(mut self, target: impl Into<AgentId>) -> Self {
        self.target_agent = Some(target.into());
        self
    }

    /// Attribute the event to a workflow
    pub fn with_workflow(mut self, workflow_id: WorkflowId) -> Self {
        self.workflow_id = Some(workflow_id);
        self
    }

    /// Attribute the event to an execution
    pub fn with_execution(mut self, execution_id: ExecutionId) -> Self {
        self.execution_id = Some(execution_id);
        self
    }

    /// Thread a correlation id through
    pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Attach the event payload
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Whether the event names the agent as source or target
    pub fn involves_agent(&self, agent_id: &AgentId) -> bool {
        &self.source_agent == agent_id || self.target_agent.as_ref() == Some(agent_id)
    }
}
