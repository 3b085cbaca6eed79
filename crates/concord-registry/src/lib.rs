//! Concord Registry - In-memory agent registry
//!
//! Owns the agent-id → agent mapping plus a capability index and the
//! latest health report per agent. Everyone else holds agent ids and must
//! tolerate absence.
//!
//! Health reports coerce liveness: `healthy` → online, `degraded` →
//! degraded, `unhealthy` → offline. A heartbeat is a status update with a
//! fresh timestamp.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use concord_types::{
    Agent, AgentId, AgentKind, AgentStatus, Capability, CapabilityId, ConcordError, HealthKind,
    Result,
};

/// One recorded health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub agent_id: AgentId,
    pub kind: HealthKind,
    #[serde(default)]
    pub detail: Option<String>,
    pub reported_at: DateTime<Utc>,
}

/// Filter for registry queries; empty fields match everything
///
/// Fields intersect: an agent must satisfy every provided filter.
/// `capability_ids` and `tags` match when the agent has any satisfying
/// capability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentQuery {
    #[serde(default)]
    pub kinds: Vec<AgentKind>,
    #[serde(default)]
    pub statuses: Vec<AgentStatus>,
    #[serde(default)]
    pub capability_ids: Vec<CapabilityId>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl AgentQuery {
    fn matches(&self, agent: &Agent) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&agent.kind) {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&agent.status) {
            return false;
        }
        if !self.capability_ids.is_empty()
            && !self.capability_ids.iter().any(|id| agent.has_capability(id))
        {
            return false;
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|tag| agent.has_tag(tag)) {
            return false;
        }
        true
    }
}

/// Aggregate registry statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStatistics {
    pub total_agents: usize,
    pub by_status: HashMap<String, usize>,
    pub by_kind: HashMap<String, usize>,
    pub total_capabilities: usize,
}

#[derive(Default)]
struct RegistryState {
    agents: HashMap<AgentId, Agent>,
    capability_index: HashMap<CapabilityId, HashSet<AgentId>>,
    health: HashMap<AgentId, HealthReport>,
}

/// In-memory agent registry
pub struct AgentRegistry {
    state: RwLock<RegistryState>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self { state: RwLock::new(RegistryState::default()) }
    }

    /// Register an agent; fails with `DuplicateId` when the id is taken
    pub async fn register(&self, agent: Agent) -> Result<()> {
        if agent.id.is_empty() {
            return Err(ConcordError::invalid("agent id must not be empty"));
        }

        let mut state = self.state.write().await;
        if state.agents.contains_key(&agent.id) {
            return Err(ConcordError::duplicate("agent", agent.id.as_str()));
        }

        for capability in &agent.capabilities {
            state
                .capability_index
                .entry(capability.id.clone())
                .or_default()
                .insert(agent.id.clone());
        }
        info!(agent_id = %agent.id, kind = %agent.kind, "agent registered");
        state.agents.insert(agent.id.clone(), agent);
        Ok(())
    }

    /// Remove an agent and its index entries
    pub async fn deregister(&self, agent_id: &AgentId) -> Result<Agent> {
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .remove(agent_id)
            .ok_or_else(|| ConcordError::not_found("agent", agent_id.as_str()))?;

        for capability in &agent.capabilities {
            if let Some(holders) = state.capability_index.get_mut(&capability.id) {
                holders.remove(agent_id);
                if holders.is_empty() {
                    state.capability_index.remove(&capability.id);
                }
            }
        }
        state.health.remove(agent_id);
        info!(agent_id = %agent_id, "agent deregistered");
        Ok(agent)
    }

    /// Fetch an agent by id
    pub async fn get(&self, agent_id: &AgentId) -> Result<Agent> {
        self.state
            .read()
            .await
            .agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| ConcordError::not_found("agent", agent_id.as_str()))
    }

    /// Agents satisfying every provided filter
    pub async fn query(&self, query: &AgentQuery) -> Vec<Agent> {
        self.state
            .read()
            .await
            .agents
            .values()
            .filter(|agent| query.matches(agent))
            .cloned()
            .collect()
    }

    /// All registered agents
    pub async fn list(&self) -> Vec<Agent> {
        self.state.read().await.agents.values().cloned().collect()
    }

    /// Set an agent's liveness status, refreshing its heartbeat timestamp
    pub async fn update_status(&self, agent_id: &AgentId, status: AgentStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| ConcordError::not_found("agent", agent_id.as_str()))?;
        debug!(agent_id = %agent_id, status = %status, "agent status updated");
        agent.status = status;
        agent.last_heartbeat = Utc::now();
        Ok(())
    }

    /// Record a heartbeat: online status with a fresh timestamp
    pub async fn heartbeat(&self, agent_id: &AgentId) -> Result<()> {
        self.update_status(agent_id, AgentStatus::Online).await
    }

    /// Merge entries into an agent's metadata map
    pub async fn update_metadata(
        &self,
        agent_id: &AgentId,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| ConcordError::not_found("agent", agent_id.as_str()))?;
        agent.metadata.extend(metadata);
        Ok(())
    }

    /// Record a health report, coercing the agent's status accordingly
    pub async fn record_health(
        &self,
        agent_id: &AgentId,
        kind: HealthKind,
        detail: Option<String>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| ConcordError::not_found("agent", agent_id.as_str()))?;

        agent.status = kind.as_status();
        agent.last_heartbeat = Utc::now();
        debug!(agent_id = %agent_id, health = ?kind, "health recorded");
        state.health.insert(
            agent_id.clone(),
            HealthReport { agent_id: agent_id.clone(), kind, detail, reported_at: Utc::now() },
        );
        Ok(())
    }

    /// The latest health report for an agent, if any
    pub async fn health(&self, agent_id: &AgentId) -> Option<HealthReport> {
        self.state.read().await.health.get(agent_id).cloned()
    }

    /// Agents declaring the given capability, via the capability index
    pub async fn find_by_capability(&self, capability_id: &CapabilityId) -> Vec<Agent> {
        let state = self.state.read().await;
        state
            .capability_index
            .get(capability_id)
            .map(|holders| {
                holders.iter().filter_map(|id| state.agents.get(id)).cloned().collect()
            })
            .unwrap_or_default()
    }

    /// A specific capability declared by a specific agent
    pub async fn capability(
        &self,
        agent_id: &AgentId,
        capability_id: &CapabilityId,
    ) -> Result<Capability> {
        let state = self.state.read().await;
        let agent = state
            .agents
            .get(agent_id)
            .ok_or_else(|| ConcordError::not_found("agent", agent_id.as_str()))?;
        agent
            .capability(capability_id)
            .cloned()
            .ok_or_else(|| ConcordError::not_found("capability", capability_id.as_str()))
    }

    /// Aggregate statistics for dashboards
    pub async fn statistics(&self) -> RegistryStatistics {
        let state = self.state.read().await;
        let mut by_status: HashMap<String, usize> = HashMap::new();
        let mut by_kind: HashMap<String, usize> = HashMap::new();
        for agent in state.agents.values() {
            *by_status.entry(agent.status.to_string()).or_default() += 1;
            *by_kind.entry(agent.kind.to_string()).or_default() += 1;
        }
        RegistryStatistics {
            total_agents: state.agents.len(),
            by_status,
            by_kind,
            total_capabilities: state.capability_index.len(),
        }
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
