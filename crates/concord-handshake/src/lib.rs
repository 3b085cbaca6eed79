//! Concord Handshake - Two-phase challenge-response authentication
//!
//! The initiator signs a random challenge bound to the target's DID and a
//! timestamp. The target validates freshness, challenge size, DID shape,
//! registration and the signature, then answers with a hashed
//! challenge-response, its own signature and a freshly issued session.
//! The initiator recomputes the response and checks the target's
//! signature before trusting the session.
//!
//! The challenge-response salt is deterministic: the first 16 characters
//! of the issued session id, which both sides possess when they hash.
//!
//! Sessions are valid while unexpired and only for their two
//! participants. Expired sessions purge lazily on access and through a
//! periodic sweep.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use concord_discovery::AgentDiscoveryService;
use concord_sentinel::Sentinel;
use concord_types::{
    AgentId, ConcordError, Did, HandshakeRequest, HandshakeResponse, KeyId, PrincipalId, Result,
    Session, SessionId,
};

/// Requests older than this are rejected as expired, in ms
const REQUEST_FRESHNESS_MS: i64 = 5 * 60 * 1000;

/// Characters of the session id used as the challenge-response salt
const RESPONSE_SALT_LEN: usize = 16;

/// Options for the handshake protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeConfig {
    /// Session lifetime, in seconds
    pub session_timeout_secs: u64,
    /// Challenge size, in bytes
    pub challenge_size: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self { session_timeout_secs: 86_400, challenge_size: 32 }
    }
}

#[derive(Clone)]
struct PendingChallenge {
    challenge: String,
    target_did: Did,
    issued_at: DateTime<Utc>,
}

/// Challenge-response handshake protocol
///
/// Signing and verification go through the sentinel, so failed
/// verifications feed the security monitor; keys are resolved by agent id.
pub struct HandshakeProtocol {
    config: HandshakeConfig,
    sentinel: Arc<Sentinel>,
    discovery: Arc<AgentDiscoveryService>,
    pending: DashMap<(AgentId, AgentId), PendingChallenge>,
    sessions: DashMap<SessionId, Session>,
}

impl HandshakeProtocol {
    pub fn new(
        config: HandshakeConfig,
        sentinel: Arc<Sentinel>,
        discovery: Arc<AgentDiscoveryService>,
    ) -> Self {
        Self {
            config,
            sentinel,
            discovery,
            pending: DashMap::new(),
            sessions: DashMap::new(),
        }
    }

    /// Initiator side: produce a signed handshake request
    pub async fn initiate(
        &self,
        initiator: &AgentId,
        target: &AgentId,
        target_did: &Did,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<HandshakeRequest> {
        let initiator_did = self
            .discovery
            .get(initiator)
            .await
            .map(|agent| agent.did)
            .ok_or_else(|| ConcordError::not_found("agent", initiator.as_str()))?;

        let challenge = hex::encode(concord_crypto::random_nonce(self.config.challenge_size));
        let timestamp = Utc::now().timestamp_millis();

        let signature = self
            .sentinel
            .sign(
                &PrincipalId::new(initiator.as_str()),
                &KeyId::new(initiator.as_str()),
                challenge_message(&challenge, target_did, timestamp).as_bytes(),
            )
            .await?;

        self.pending.insert(
            (initiator.clone(), target.clone()),
            PendingChallenge {
                challenge: challenge.clone(),
                target_did: target_did.clone(),
                issued_at: Utc::now(),
            },
        );

        debug!(initiator = %initiator, target = %target, "handshake initiated");
        Ok(HandshakeRequest {
            initiator: initiator.clone(),
            target: target.clone(),
            initiator_did,
            target_did: target_did.clone(),
            challenge,
            signature,
            timestamp,
            metadata,
        })
    }

    /// Target side: validate a request and issue a session
    ///
    /// Every failure yields `{success: false, message}`; nothing raises.
    pub async fn process(&self, request: &HandshakeRequest) -> HandshakeResponse {
        let age = (Utc::now().timestamp_millis() - request.timestamp).abs();
        if age >= REQUEST_FRESHNESS_MS {
            return HandshakeResponse::rejected("handshake request expired");
        }

        match hex::decode(&request.challenge) {
            Ok(bytes) if bytes.len() == self.config.challenge_size => {}
            _ => return HandshakeResponse::rejected("invalid challenge size"),
        }

        if !request.initiator_did.is_valid() || !request.target_did.is_valid() {
            return HandshakeResponse::rejected("invalid DID");
        }

        if !self.discovery.is_registered(&request.target) {
            return HandshakeResponse::rejected("unknown target agent");
        }

        // The signature must cover this exact challenge tuple
        let message = challenge_message(&request.challenge, &request.target_did, request.timestamp);
        if request.signature.message_hash != concord_crypto::sha256_hex(message.as_bytes()) {
            return HandshakeResponse::rejected("signature verification failed");
        }
        let initiator_key = match self
            .sentinel
            .keystore()
            .get_public(&KeyId::new(request.initiator.as_str()))
            .await
        {
            Ok(key) => key,
            Err(_) => return HandshakeResponse::rejected("signature verification failed"),
        };
        match self
            .sentinel
            .verify(
                &PrincipalId::new(request.initiator.as_str()),
                &request.signature,
                &initiator_key.public_key,
            )
            .await
        {
            Ok(true) => {}
            _ => return HandshakeResponse::rejected("signature verification failed"),
        }

        // Session first: its id prefix salts the challenge response
        let session_id = SessionId::generate();
        let salt = response_salt(&session_id);
        let challenge_response = concord_crypto::sha256_hex(
            format!("{}{}{}", request.challenge, request.target_did, salt).as_bytes(),
        );

        let signature = match self
            .sentinel
            .sign(
                &PrincipalId::new(request.target.as_str()),
                &KeyId::new(request.target.as_str()),
                challenge_response.as_bytes(),
            )
            .await
        {
            Ok(signature) => signature,
            Err(_) => return HandshakeResponse::rejected("signature verification failed"),
        };

        let now = Utc::now();
        let shared_secret = concord_crypto::sha256_hex(
            format!("{}{}{}{}", request.challenge, session_id, request.initiator, request.target)
                .as_bytes(),
        );
        let session = Session {
            id: session_id.clone(),
            initiator: request.initiator.clone(),
            target: request.target.clone(),
            shared_secret,
            created_at: now,
            expires_at: now + Duration::seconds(self.config.session_timeout_secs as i64),
        };
        self.sessions.insert(session_id.clone(), session);

        info!(
            initiator = %request.initiator,
            target = %request.target,
            session_id = %session_id,
            "handshake session issued"
        );
        HandshakeResponse {
            success: true,
            session_id: Some(session_id),
            challenge_response: Some(challenge_response),
            signature: Some(signature),
            target_did: Some(request.target_did.clone()),
            message: None,
        }
    }

    /// Initiator side: check the target's response against the pending
    /// challenge; `false` on any mismatch, never an error
    pub async fn verify_response(
        &self,
        initiator: &AgentId,
        target: &AgentId,
        response: &HandshakeResponse,
    ) -> bool {
        if !response.success {
            return false;
        }
        let (Some(session_id), Some(challenge_response), Some(signature)) =
            (&response.session_id, &response.challenge_response, &response.signature)
        else {
            return false;
        };

        let key = (initiator.clone(), target.clone());
        let Some(pending) = self.pending.get(&key).map(|p| p.clone()) else {
            warn!(initiator = %initiator, target = %target, "no pending challenge");
            return false;
        };

        let expected = concord_crypto::sha256_hex(
            format!("{}{}{}", pending.challenge, pending.target_did, response_salt(session_id))
                .as_bytes(),
        );
        if &expected != challenge_response {
            warn!(initiator = %initiator, target = %target, "challenge response mismatch");
            return false;
        }

        // The target's signature must cover the response we just recomputed
        if signature.message_hash != concord_crypto::sha256_hex(challenge_response.as_bytes()) {
            warn!(initiator = %initiator, target = %target, "target signature covers wrong payload");
            return false;
        }
        let Ok(target_key) = self
            .sentinel
            .keystore()
            .get_public(&KeyId::new(target.as_str()))
            .await
        else {
            return false;
        };
        let verified = self
            .sentinel
            .verify(&PrincipalId::new(target.as_str()), signature, &target_key.public_key)
            .await;
        if !matches!(verified, Ok(true)) {
            warn!(initiator = %initiator, target = %target, "target signature invalid");
            return false;
        }

        self.pending.remove(&key);
        true
    }

    /// The session, if present and unexpired; expired sessions purge here
    pub async fn get_session(&self, session_id: &SessionId) -> Option<Session> {
        let session = self.sessions.get(session_id).map(|s| s.clone())?;
        if session.is_expired(Utc::now()) {
            self.sessions.remove(session_id);
            return None;
        }
        Some(session)
    }

    /// Whether a session is valid for this caller
    pub async fn validate_session(&self, session_id: &SessionId, caller: &AgentId) -> bool {
        match self.get_session(session_id).await {
            Some(session) => session.is_participant(caller),
            None => false,
        }
    }

    /// Drop expired sessions and stale pending challenges
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired(now));
        self.pending
            .retain(|_, pending| (now - pending.issued_at).num_milliseconds() < REQUEST_FRESHNESS_MS);
        before - self.sessions.len()
    }

    /// Spawn the periodic sweep; the returned guard aborts it on drop
    pub fn start_sweeper(self: &Arc<Self>, interval: std::time::Duration) -> SessionSweeperGuard {
        let protocol = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                protocol.sweep_expired().await;
            }
        });
        SessionSweeperGuard { handle }
    }

    /// Count of live (possibly expired, not yet swept) sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Aborts the session sweeper when dropped
pub struct SessionSweeperGuard {
    handle: tokio::task::JoinHandle<()>,
}

impl SessionSweeperGuard {
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

impl Drop for SessionSweeperGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn challenge_message(challenge: &str, target_did: &Did, timestamp: i64) -> String {
    format!("{challenge}{target_did}{timestamp}")
}

fn response_salt(session_id: &SessionId) -> &str {
    let id = session_id.as_str();
    &id[..RESPONSE_SALT_LEN.min(id.len())]
}
