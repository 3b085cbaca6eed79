//! Agent and capability types
//!
//! Agents are addressable participants with a stable id, a public key and a
//! declared capability set. Capabilities live inside their agent; every
//! other component refers to agents by id and must tolerate absence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::identity::{AgentId, CapabilityId};

/// The specialized roles an agent can take in the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Security guardian
    Guardian,
    /// Protocol bridge
    Bridge,
    /// Sovereign identity holder
    Sovereign,
    /// Prism analytics
    Prism,
    /// Atlas knowledge
    Atlas,
    /// Workflow orchestrator
    Orchestrator,
    /// Context weaver
    Weaver,
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Guardian => "guardian",
            Self::Bridge => "bridge",
            Self::Sovereign => "sovereign",
            Self::Prism => "prism",
            Self::Atlas => "atlas",
            Self::Orchestrator => "orchestrator",
            Self::Weaver => "weaver",
        };
        write!(f, "{s}")
    }
}

/// Liveness status of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Degraded,
    Offline,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Online => "online",
            Self::Degraded => "degraded",
            Self::Offline => "offline",
        };
        write!(f, "{s}")
    }
}

/// Health report kinds accepted by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthKind {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthKind {
    /// The agent status this health kind coerces to
    pub fn as_status(self) -> AgentStatus {
        match self {
            Self::Healthy => AgentStatus::Online,
            Self::Degraded => AgentStatus::Degraded,
            Self::Unhealthy => AgentStatus::Offline,
        }
    }
}

/// A named operation an agent can perform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Capability id, unique within its agent
    pub id: CapabilityId,
    /// Human-readable name
    pub name: String,
    /// Semantic version string
    pub version: String,
    /// Declared input shape
    #[serde(default)]
    pub input_schema: serde_json::Value,
    /// Declared output shape
    #[serde(default)]
    pub output_schema: serde_json::Value,
    /// Free-form tags for discovery
    #[serde(default)]
    pub tags: Vec<String>,
    /// Whether callers should migrate away from this capability
    #[serde(default)]
    pub deprecated: bool,
}

impl Capability {
    /// A minimal capability with untyped input/output shapes
    pub fn new(id: impl Into<CapabilityId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: "1.0.0".to_string(),
            input_schema: serde_json::Value::Null,
            output_schema: serde_json::Value::Null,
            tags: Vec::new(),
            deprecated: false,
        }
    }

    /// Attach a tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// An addressable participant in the platform
///
/// Invariant: `status == Online` implies the last heartbeat is within the
/// registry's heartbeat timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Stable opaque id
    pub id: AgentId,
    /// Specialized role
    pub kind: AgentKind,
    /// Hex-encoded public key
    pub public_key: String,
    /// Ordered capability set
    pub capabilities: Vec<Capability>,
    /// Liveness status
    pub status: AgentStatus,
    /// Timestamp of the last heartbeat
    pub last_heartbeat: DateTime<Utc>,
    /// Optional metadata mapping
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Agent {
    /// Create a new online agent with the given capabilities
    pub fn new(
        id: impl Into<AgentId>,
        kind: AgentKind,
        public_key: impl Into<String>,
        capabilities: Vec<Capability>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            public_key: public_key.into(),
            capabilities,
            status: AgentStatus::Online,
            last_heartbeat: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Look up a capability by id
    pub fn capability(&self, id: &CapabilityId) -> Option<&Capability> {
        self.capabilities.iter().find(|c| &c.id == id)
    }

    /// Whether the agent declares the given capability
    pub fn has_capability(&self, id: &CapabilityId) -> bool {
        self.capability(id).is_some()
    }

    /// Whether any capability carries the given tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.capabilities.iter().any(|c| c.tags.iter().any(|t| t == tag))
    }
}
