//! Conversation context types
//!
//! Each authenticated session owns one conversation context: a bounded
//! message ring, a shared-context map and the latest reported emotional
//! state per participant. The context store holds session ids, never
//! session objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::identity::{AgentId, MessageId, SessionId};

/// Latest reported emotional state of a participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionalState {
    /// Reported label, e.g. `calm`, `frustrated`
    pub label: String,
    /// Reported intensity in `[0, 1]`
    pub intensity: f64,
    pub observed_at: DateTime<Utc>,
}

/// One message exchanged inside a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMessage {
    pub id: MessageId,
    pub session_id: SessionId,
    pub from_agent: AgentId,
    pub to_agent: AgentId,
    pub content: serde_json::Value,
    /// Emotional state the sender reported alongside the message
    #[serde(default)]
    pub emotional_state: Option<EmotionalState>,
    pub sent_at: DateTime<Utc>,
}

impl ContextMessage {
    /// A plain message with a fresh id and the current timestamp
    pub fn new(
        session_id: SessionId,
        from_agent: impl Into<AgentId>,
        to_agent: impl Into<AgentId>,
        content: serde_json::Value,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            session_id,
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            content,
            emotional_state: None,
            sent_at: Utc::now(),
        }
    }
}

/// Per-session durable record of exchanged messages and shared state
///
/// Invariant: `message_history.len() <= max_history`; the oldest entries
/// drop on overflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Identity; equals the owning session id
    pub session_id: SessionId,
    pub participants: Vec<AgentId>,
    /// Bounded FIFO of messages, oldest first
    pub message_history: VecDeque<ContextMessage>,
    /// Arbitrary state shared between the participants
    #[serde(default)]
    pub shared_context: HashMap<String, serde_json::Value>,
    /// Latest reported emotional state per participant
    #[serde(default)]
    pub emotional_states: HashMap<AgentId, EmotionalState>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl ConversationContext {
    /// An empty context for the given session and participants
    pub fn new(session_id: SessionId, participants: Vec<AgentId>) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            participants,
            message_history: VecDeque::new(),
            shared_context: HashMap::new(),
            emotional_states: HashMap::new(),
            created_at: now,
            last_updated_at: now,
        }
    }

    /// Append a message, dropping the oldest entries past `max_history`
    pub fn push_message(&mut self, message: ContextMessage, max_history: usize) {
        if let Some(state) = &message.emotional_state {
            self.emotional_states
                .insert(message.from_agent.clone(), state.clone());
        }
        self.message_history.push_back(message);
        while self.message_history.len() > max_history {
            self.message_history.pop_front();
        }
        self.last_updated_at = Utc::now();
    }

    /// Whether the context's TTL has lapsed
    pub fn is_expired(&self, ttl: std::time::Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now - self.last_updated_at > ttl,
            Err(_) => false,
        }
    }
}

/// Aggregate statistics over a context store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextStatistics {
    pub total_contexts: usize,
    pub total_messages: usize,
    pub average_messages_per_context: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_bound() {
        let session = SessionId::generate();
        let mut ctx = ConversationContext::new(
            session.clone(),
            vec![AgentId::new("a"), AgentId::new("b")],
        );

        for i in 0..150 {
            ctx.push_message(
                ContextMessage::new(session.clone(), "a", "b", serde_json::json!(i)),
                100,
            );
        }

        assert_eq!(ctx.message_history.len(), 100);
        // The last 100 in insertion order
        assert_eq!(ctx.message_history.front().unwrap().content, serde_json::json!(50));
        assert_eq!(ctx.message_history.back().unwrap().content, serde_json::json!(149));
    }

    #[test]
    fn test_emotional_state_capture() {
        let session = SessionId::generate();
        let mut ctx = ConversationContext::new(
            session.clone(),
            vec![AgentId::new("a"), AgentId::new("b")],
        );

        let mut msg = ContextMessage::new(session, "a", "b", serde_json::json!("hi"));
        msg.emotional_state = Some(EmotionalState {
            label: "calm".into(),
            intensity: 0.4,
            observed_at: Utc::now(),
        });
        ctx.push_message(msg, 10);

        assert_eq!(ctx.emotional_states[&AgentId::new("a")].label, "calm");
        assert!(!ctx.emotional_states.contains_key(&AgentId::new("b")));
    }
}
