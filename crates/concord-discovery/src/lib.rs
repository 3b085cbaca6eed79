//! Concord Discovery - Cross-platform agent discovery
//!
//! Agents announce themselves with their DID, address, capability names
//! and endpoint, and receive an opaque discovery-session id (distinct from
//! a handshake session). Heartbeats must present that session id. A
//! background sweep transitions agents whose heartbeat lapsed to offline
//! and publishes `agent:deregistered` (disconnection semantics).
//!
//! Discovery queries intersect: the agent's capability set must contain
//! every requested capability, and its metadata must equal every filter
//! entry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use concord_bus::EventBus;
use concord_types::{
    AgentId, AgentStatus, ConcordError, Did, DiscoverySessionId, Event, EventType, Result,
};

/// Options for the discovery service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Sweep cadence, in ms
    pub heartbeat_interval_ms: u64,
    /// Heartbeats older than this mark the agent offline, in ms
    pub heartbeat_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { heartbeat_interval_ms: 30_000, heartbeat_timeout_ms: 90_000 }
    }
}

/// Registration announced by an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub agent_id: AgentId,
    pub did: Did,
    pub address: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub endpoint: String,
}

/// A registered agent as the discovery service tracks it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredAgent {
    pub agent_id: AgentId,
    pub did: Did,
    pub address: String,
    pub capabilities: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub endpoint: String,
    pub status: AgentStatus,
    pub last_heartbeat: DateTime<Utc>,
}

/// Discovery query; AND semantics across fields
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryQuery {
    /// Every requested capability must appear in the agent's set
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Every filter entry must equal the agent's metadata value
    #[serde(default)]
    pub filters: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub max_results: Option<usize>,
}

/// Query result; `total_count` reflects the pre-cap size
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub agents: Vec<DiscoveredAgent>,
    pub total_count: usize,
}

struct Registration {
    agent: DiscoveredAgent,
    session_id: DiscoverySessionId,
}

/// Cross-platform agent discovery service
pub struct AgentDiscoveryService {
    config: DiscoveryConfig,
    bus: Arc<EventBus>,
    agents: DashMap<AgentId, Registration>,
}

impl AgentDiscoveryService {
    pub fn new(config: DiscoveryConfig, bus: Arc<EventBus>) -> Self {
        Self { config, bus, agents: DashMap::new() }
    }

    /// Register an agent; returns its discovery-session id
    ///
    /// Fails with `InvalidArgument` when any of agent id, DID, address or
    /// endpoint is empty, and `DuplicateId` on re-registration.
    pub async fn register(&self, registration: AgentRegistration) -> Result<DiscoverySessionId> {
        if registration.agent_id.is_empty()
            || registration.did.as_str().is_empty()
            || registration.address.is_empty()
            || registration.endpoint.is_empty()
        {
            return Err(ConcordError::invalid(
                "registration requires agent_id, did, address and endpoint",
            ));
        }
        if self.agents.contains_key(&registration.agent_id) {
            return Err(ConcordError::duplicate("agent", registration.agent_id.as_str()));
        }

        let session_id = DiscoverySessionId::generate();
        let agent = DiscoveredAgent {
            agent_id: registration.agent_id.clone(),
            did: registration.did,
            address: registration.address,
            capabilities: registration.capabilities,
            metadata: registration.metadata,
            endpoint: registration.endpoint,
            status: AgentStatus::Online,
            last_heartbeat: Utc::now(),
        };

        info!(agent_id = %agent.agent_id, did = %agent.did, "agent registered for discovery");
        self.agents.insert(
            registration.agent_id,
            Registration { agent, session_id: session_id.clone() },
        );
        Ok(session_id)
    }

    /// Remove a registration entirely
    pub async fn deregister(&self, agent_id: &AgentId) -> Result<()> {
        let (_, registration) = self
            .agents
            .remove(agent_id)
            .ok_or_else(|| ConcordError::not_found("agent", agent_id.as_str()))?;

        self.publish_deregistered(&registration.agent, "deregistered").await;
        Ok(())
    }

    /// Refresh an agent's heartbeat
    ///
    /// The presented discovery-session id must match the one issued at
    /// registration.
    pub async fn heartbeat(
        &self,
        agent_id: &AgentId,
        session_id: &DiscoverySessionId,
        status: AgentStatus,
    ) -> Result<()> {
        let mut registration = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| ConcordError::not_found("agent", agent_id.as_str()))?;

        if &registration.session_id != session_id {
            return Err(ConcordError::invalid("discovery session mismatch"));
        }

        registration.agent.status = status;
        registration.agent.last_heartbeat = Utc::now();
        debug!(agent_id = %agent_id, status = %status, "heartbeat recorded");
        Ok(())
    }

    /// One registered agent, if present
    pub async fn get(&self, agent_id: &AgentId) -> Option<DiscoveredAgent> {
        self.agents.get(agent_id).map(|r| r.agent.clone())
    }

    /// Whether an agent is currently registered
    pub fn is_registered(&self, agent_id: &AgentId) -> bool {
        self.agents.contains_key(agent_id)
    }

    /// Run a discovery query
    pub async fn discover(&self, query: &DiscoveryQuery) -> DiscoveryResult {
        let mut matching: Vec<DiscoveredAgent> = self
            .agents
            .iter()
            .map(|r| r.agent.clone())
            .filter(|agent| {
                query.capabilities.iter().all(|cap| agent.capabilities.contains(cap))
            })
            .filter(|agent| {
                query
                    .filters
                    .iter()
                    .all(|(key, value)| agent.metadata.get(key) == Some(value))
            })
            .collect();
        matching.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));

        let total_count = matching.len();
        if let Some(max) = query.max_results {
            matching.truncate(max);
        }
        DiscoveryResult { agents: matching, total_count }
    }

    /// Transition agents with lapsed heartbeats to offline
    ///
    /// Publishes `agent:deregistered` for every agent taken offline;
    /// the registration itself is retained.
    pub async fn sweep_expired(&self) -> usize {
        let timeout = Duration::milliseconds(self.config.heartbeat_timeout_ms as i64);
        let now = Utc::now();

        let mut lapsed: Vec<DiscoveredAgent> = Vec::new();
        for mut registration in self.agents.iter_mut() {
            let agent = &mut registration.agent;
            if agent.status != AgentStatus::Offline && now - agent.last_heartbeat > timeout {
                agent.status = AgentStatus::Offline;
                lapsed.push(agent.clone());
            }
        }

        for agent in &lapsed {
            warn!(agent_id = %agent.agent_id, "agent heartbeat lapsed; marked offline");
            self.publish_deregistered(agent, "heartbeat timeout").await;
        }
        lapsed.len()
    }

    /// Spawn the periodic sweep; the returned guard aborts it on drop
    pub fn start_sweeper(self: &Arc<Self>) -> SweeperGuard {
        let service = self.clone();
        let interval = std::time::Duration::from_millis(service.config.heartbeat_interval_ms);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                service.sweep_expired().await;
            }
        });
        SweeperGuard { handle }
    }

    async fn publish_deregistered(&self, agent: &DiscoveredAgent, reason: &str) {
        self.bus
            .publish(
                Event::new(EventType::AgentDeregistered, agent.agent_id.clone()).with_payload(
                    serde_json::json!({
                        "agent_id": agent.agent_id,
                        "did": agent.did,
                        "reason": reason,
                    }),
                ),
            )
            .await;
    }
}

/// Aborts the discovery sweeper when dropped
pub struct SweeperGuard {
    handle: tokio::task::JoinHandle<()>,
}

impl SweeperGuard {
    /// Stop the sweeper now
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

impl Drop for SweeperGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
