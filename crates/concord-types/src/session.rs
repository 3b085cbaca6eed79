//! Handshake sessions and wire message shapes
//!
//! A session is an authenticated channel between two agents established by
//! challenge-response handshake and bounded by TTL. Transport is out of
//! scope; only the message shapes are defined here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::identity::{AgentId, Did, SessionId};
use crate::key::SignatureRecord;

/// An authenticated channel between two agents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub initiator: AgentId,
    pub target: AgentId,
    /// Hex-encoded shared secret derived during the handshake
    pub shared_secret: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Whether the session has lapsed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the caller is one of the two session ends
    pub fn is_participant(&self, caller: &AgentId) -> bool {
        &self.initiator == caller || &self.target == caller
    }
}

/// First handshake phase, sent initiator → target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub initiator: AgentId,
    pub target: AgentId,
    pub initiator_did: Did,
    pub target_did: Did,
    /// Hex-encoded random challenge
    pub challenge: String,
    /// Initiator signature over `challenge || target_did || timestamp`
    pub signature: SignatureRecord,
    /// Milliseconds since the Unix epoch, checked for freshness
    pub timestamp: i64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Second handshake phase, sent target → initiator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub success: bool,
    /// Issued session, present on success
    #[serde(default)]
    pub session_id: Option<SessionId>,
    /// Hex-encoded hash of `challenge || target_did || salt`
    #[serde(default)]
    pub challenge_response: Option<String>,
    /// Target signature over the challenge response
    #[serde(default)]
    pub signature: Option<SignatureRecord>,
    #[serde(default)]
    pub target_did: Option<Did>,
    /// Rejection reason, present on failure
    #[serde(default)]
    pub message: Option<String>,
}

impl HandshakeResponse {
    /// A rejection with the given reason; never raises
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            session_id: None,
            challenge_response: None,
            signature: None,
            target_did: None,
            message: Some(message.into()),
        }
    }
}
