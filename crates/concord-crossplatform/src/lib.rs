//! Concord Cross-Platform Adapter
//!
//! One seam over the session layer: agent discovery, the handshake
//! protocol and the conversation context store. Callers register agents,
//! connect them (full challenge-response round trip) and exchange
//! messages inside the authenticated session; every message lands in the
//! session's context ring.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use concord_bus::EventBus;
use concord_context::{ContextConfig, ContextStore, ContextSweeperGuard};
use concord_discovery::{
    AgentDiscoveryService, AgentRegistration, DiscoveryConfig, DiscoveryQuery, DiscoveryResult,
    SweeperGuard,
};
use concord_handshake::{HandshakeConfig, HandshakeProtocol, SessionSweeperGuard};
use concord_sentinel::Sentinel;
use concord_types::{
    AgentId, ConcordError, ContextMessage, DiscoverySessionId, EmotionalState, KeyAlgorithm,
    KeyId, MessageId, Result, Session, SessionId,
};

/// Options for the adapter and its composed subsystems
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossPlatformConfig {
    pub discovery: DiscoveryConfig,
    pub handshake: HandshakeConfig,
    pub context: ContextConfig,
}

/// Keeps every background sweeper alive; aborts them all on drop
pub struct AdapterSweepers {
    _discovery: SweeperGuard,
    _sessions: SessionSweeperGuard,
    _contexts: ContextSweeperGuard,
}

/// The cross-platform session seam
pub struct CrossPlatformAdapter {
    sentinel: Arc<Sentinel>,
    discovery: Arc<AgentDiscoveryService>,
    handshake: Arc<HandshakeProtocol>,
    context: Arc<ContextStore>,
}

impl CrossPlatformAdapter {
    pub fn new(config: CrossPlatformConfig, bus: Arc<EventBus>, sentinel: Arc<Sentinel>) -> Self {
        let discovery =
            Arc::new(AgentDiscoveryService::new(config.discovery, bus.clone()));
        let handshake = Arc::new(HandshakeProtocol::new(
            config.handshake,
            sentinel.clone(),
            discovery.clone(),
        ));
        let context = Arc::new(ContextStore::new(config.context, bus));

        info!("cross-platform adapter initialized");
        Self { sentinel, discovery, handshake, context }
    }

    /// Register an agent for discovery, minting its signing key on demand
    ///
    /// The signing key is stored under the agent id; an existing key is
    /// kept untouched.
    pub async fn register_agent(
        &self,
        registration: AgentRegistration,
    ) -> Result<DiscoverySessionId> {
        let key_id = KeyId::new(registration.agent_id.as_str());
        if self.sentinel.keystore().get(&key_id).await.is_err() {
            self.sentinel
                .generate_key(key_id, KeyAlgorithm::Ed25519)
                .await?;
        }
        self.discovery.register(registration).await
    }

    /// Run a discovery query
    pub async fn discover(&self, query: &DiscoveryQuery) -> DiscoveryResult {
        self.discovery.discover(query).await
    }

    /// Full handshake round trip between two registered agents
    ///
    /// Initiate → process → verify; only a verified response yields the
    /// session.
    pub async fn connect(&self, initiator: &AgentId, target: &AgentId) -> Result<Session> {
        let target_did = self
            .discovery
            .get(target)
            .await
            .map(|agent| agent.did)
            .ok_or_else(|| ConcordError::not_found("agent", target.as_str()))?;

        let request = self
            .handshake
            .initiate(initiator, target, &target_did, HashMap::new())
            .await?;
        let response = self.handshake.process(&request).await;

        if !response.success {
            return Err(ConcordError::HandshakeRejected {
                reason: response.message.unwrap_or_else(|| "unspecified".to_string()),
            });
        }
        if !self.handshake.verify_response(initiator, target, &response).await {
            return Err(ConcordError::HandshakeRejected {
                reason: "response verification failed".to_string(),
            });
        }

        let session_id = response.session_id.ok_or_else(|| ConcordError::HandshakeRejected {
            reason: "response carried no session".to_string(),
        })?;
        self.handshake
            .get_session(&session_id)
            .await
            .ok_or_else(|| ConcordError::not_found("session", session_id.as_str()))
    }

    /// Send a message inside a session; returns the stored message id
    pub async fn send_message(
        &self,
        session_id: &SessionId,
        from: &AgentId,
        content: serde_json::Value,
        emotional_state: Option<EmotionalState>,
    ) -> Result<MessageId> {
        let session = self.validated_session(session_id, from).await?;
        let to = if &session.initiator == from {
            session.target.clone()
        } else {
            session.initiator.clone()
        };

        let mut message = ContextMessage::new(session_id.clone(), from.clone(), to, content);
        message.emotional_state = emotional_state;
        Ok(self.context.add_message(message).await)
    }

    /// Record a message received from a peer transport
    pub async fn receive_message(&self, message: ContextMessage) -> Result<MessageId> {
        self.validated_session(&message.session_id, &message.from_agent).await?;
        Ok(self.context.add_message(message).await)
    }

    /// The session's recent messages, oldest first
    pub async fn get_messages(
        &self,
        session_id: &SessionId,
        caller: &AgentId,
        limit: Option<usize>,
    ) -> Result<Vec<ContextMessage>> {
        self.validated_session(session_id, caller).await?;
        Ok(self.context.get_message_history(session_id, limit).await)
    }

    /// Spawn every background sweeper; drop the result to stop them
    pub fn start_sweepers(&self) -> AdapterSweepers {
        AdapterSweepers {
            _discovery: self.discovery.start_sweeper(),
            _sessions: self
                .handshake
                .start_sweeper(std::time::Duration::from_millis(60_000)),
            _contexts: self.context.start_sweeper(),
        }
    }

    /// Direct access to the security gateway
    pub fn sentinel(&self) -> &Arc<Sentinel> {
        &self.sentinel
    }

    /// Direct access to the discovery service
    pub fn discovery(&self) -> &Arc<AgentDiscoveryService> {
        &self.discovery
    }

    /// Direct access to the handshake protocol
    pub fn handshake(&self) -> &Arc<HandshakeProtocol> {
        &self.handshake
    }

    /// Direct access to the context store
    pub fn context(&self) -> &Arc<ContextStore> {
        &self.context
    }

    async fn validated_session(
        &self,
        session_id: &SessionId,
        caller: &AgentId,
    ) -> Result<Session> {
        let session = self
            .handshake
            .get_session(session_id)
            .await
            .ok_or_else(|| ConcordError::not_found("session", session_id.as_str()))?;
        if !session.is_participant(caller) {
            return Err(ConcordError::invalid(format!(
                "agent {caller} is not a participant of session {session_id}"
            )));
        }
        Ok(session)
    }
}
