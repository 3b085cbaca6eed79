//! Concord Context - Per-session conversation state
//!
//! One `ConversationContext` per handshake session: a bounded message
//! ring, a shared-context map and the latest reported emotional state per
//! participant. The store holds session ids only, never session objects.
//!
//! Contexts expire `context_ttl_ms` after their last update; expired
//! entries purge lazily on access and through a background sweeper.
//! Lifecycle changes publish `choreography:sync` events through the
//! injected bus.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use concord_bus::EventBus;
use concord_types::{
    AgentId, ConcordError, ContextMessage, ContextStatistics, ConversationContext,
    EmotionalState, Event, EventType, MessageId, Result, SessionId,
};

/// Options for the context store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Per-context message ring capacity
    pub max_history: usize,
    /// Idle lifetime of a context, in ms
    pub context_ttl_ms: u64,
    /// Sweep cadence, in ms
    pub sweep_interval_ms: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { max_history: 100, context_ttl_ms: 86_400_000, sweep_interval_ms: 60_000 }
    }
}

/// Partial update applied by [`ContextStore::update_context`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextUpdate {
    #[serde(default)]
    pub participants: Option<Vec<AgentId>>,
    /// Entries merged into the shared-context map
    #[serde(default)]
    pub shared_context: Option<std::collections::HashMap<String, serde_json::Value>>,
}

/// Per-session conversation context store
pub struct ContextStore {
    config: ContextConfig,
    bus: Arc<EventBus>,
    contexts: DashMap<SessionId, ConversationContext>,
}

impl ContextStore {
    pub fn new(config: ContextConfig, bus: Arc<EventBus>) -> Self {
        Self { config, bus, contexts: DashMap::new() }
    }

    /// Store a context, replacing any existing entry for the session
    ///
    /// The message ring is re-bounded on the way in.
    pub async fn save_context(&self, mut context: ConversationContext) {
        while context.message_history.len() > self.config.max_history {
            context.message_history.pop_front();
        }
        let session_id = context.session_id.clone();
        self.contexts.insert(session_id.clone(), context);
        self.publish_sync(&session_id, "saved").await;
    }

    /// The context, or `None` when absent or past its TTL
    pub async fn get_context(&self, session_id: &SessionId) -> Option<ConversationContext> {
        let ttl = Duration::from_millis(self.config.context_ttl_ms);
        let expired = {
            let context = self.contexts.get(session_id)?;
            context.is_expired(ttl, Utc::now())
        };
        if expired {
            debug!(session_id = %session_id, "context expired; purging");
            self.contexts.remove(session_id);
            return None;
        }
        self.contexts.get(session_id).map(|c| c.clone())
    }

    /// Merge a partial update into an existing context
    pub async fn update_context(
        &self,
        session_id: &SessionId,
        update: ContextUpdate,
    ) -> Result<()> {
        {
            let mut context = self
                .contexts
                .get_mut(session_id)
                .ok_or_else(|| ConcordError::not_found("context", session_id.as_str()))?;

            if let Some(participants) = update.participants {
                context.participants = participants;
            }
            if let Some(shared) = update.shared_context {
                context.shared_context.extend(shared);
            }
            context.last_updated_at = Utc::now();
        }
        self.publish_sync(session_id, "updated").await;
        Ok(())
    }

    /// Append a message, creating the context on demand
    ///
    /// A missing context is created with the participants inferred from the
    /// message. Emotional state carried by the message updates the sender's
    /// latest snapshot.
    pub async fn add_message(&self, message: ContextMessage) -> MessageId {
        let message_id = message.id.clone();
        let session_id = message.session_id.clone();

        let mut context = self.contexts.entry(session_id.clone()).or_insert_with(|| {
            info!(session_id = %session_id, "context created on demand");
            ConversationContext::new(
                session_id.clone(),
                vec![message.from_agent.clone(), message.to_agent.clone()],
            )
        });
        context.push_message(message, self.config.max_history);
        drop(context);

        message_id
    }

    /// The most recent messages, oldest first
    pub async fn get_message_history(
        &self,
        session_id: &SessionId,
        limit: Option<usize>,
    ) -> Vec<ContextMessage> {
        let Some(context) = self.get_context(session_id).await else {
            return Vec::new();
        };
        let messages: Vec<ContextMessage> = context.message_history.into_iter().collect();
        match limit {
            Some(limit) if messages.len() > limit => messages[messages.len() - limit..].to_vec(),
            _ => messages,
        }
    }

    /// The shared-context map
    pub async fn get_shared_context(
        &self,
        session_id: &SessionId,
    ) -> Option<std::collections::HashMap<String, serde_json::Value>> {
        self.get_context(session_id).await.map(|c| c.shared_context)
    }

    /// Merge entries into the shared-context map
    pub async fn update_shared_context(
        &self,
        session_id: &SessionId,
        entries: std::collections::HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        self.update_context(session_id, ContextUpdate {
            shared_context: Some(entries),
            ..Default::default()
        })
        .await
    }

    /// Latest reported emotional state per participant
    pub async fn get_emotional_states(
        &self,
        session_id: &SessionId,
    ) -> std::collections::HashMap<AgentId, EmotionalState> {
        self.get_context(session_id)
            .await
            .map(|c| c.emotional_states)
            .unwrap_or_default()
    }

    /// Remove a context outright
    pub async fn delete_context(&self, session_id: &SessionId) -> Result<()> {
        self.contexts
            .remove(session_id)
            .ok_or_else(|| ConcordError::not_found("context", session_id.as_str()))?;
        self.publish_sync(session_id, "deleted").await;
        Ok(())
    }

    /// Session ids with a live (unexpired) context
    pub async fn get_active_sessions(&self) -> Vec<SessionId> {
        let ttl = Duration::from_millis(self.config.context_ttl_ms);
        let now = Utc::now();
        self.contexts
            .iter()
            .filter(|c| !c.is_expired(ttl, now))
            .map(|c| c.session_id.clone())
            .collect()
    }

    /// Aggregate statistics over live contexts
    pub async fn get_statistics(&self) -> ContextStatistics {
        let total_contexts = self.contexts.len();
        let total_messages: usize =
            self.contexts.iter().map(|c| c.message_history.len()).sum();
        ContextStatistics {
            total_contexts,
            total_messages,
            average_messages_per_context: if total_contexts == 0 {
                0.0
            } else {
                total_messages as f64 / total_contexts as f64
            },
        }
    }

    /// Drop every expired context
    pub async fn sweep_expired(&self) -> usize {
        let ttl = Duration::from_millis(self.config.context_ttl_ms);
        let now = Utc::now();
        let before = self.contexts.len();
        self.contexts.retain(|_, context| !context.is_expired(ttl, now));
        let removed = before - self.contexts.len();
        if removed > 0 {
            debug!(removed, "expired contexts swept");
        }
        removed
    }

    /// Spawn the periodic sweep; the returned guard aborts it on drop
    pub fn start_sweeper(self: &Arc<Self>) -> ContextSweeperGuard {
        let store = self.clone();
        let interval = Duration::from_millis(store.config.sweep_interval_ms);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                store.sweep_expired().await;
            }
        });
        ContextSweeperGuard { handle }
    }

    async fn publish_sync(&self, session_id: &SessionId, action: &str) {
        self.bus
            .publish(
                Event::new(EventType::ChoreographySync, "context-store").with_payload(
                    serde_json::json!({ "session_id": session_id, "action": action }),
                ),
            )
            .await;
    }
}

/// Aborts the context sweeper when dropped
pub struct ContextSweeperGuard {
    handle: tokio::task::JoinHandle<()>,
}

impl ContextSweeperGuard {
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

impl Drop for ContextSweeperGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
