//! Error types for Concord
//!
//! All failures are returned explicitly; only programmer errors abort.
//! Subsystem faults that do not affect an in-flight caller request
//! (webhook delivery, subscriber callbacks, background sweepers) are
//! recovered locally and never surface through this enum.

use thiserror::Error;

use crate::identity::{ExecutionId, StepId};

/// Result type for Concord operations
pub type Result<T> = std::result::Result<T, ConcordError>;

/// Concord error taxonomy
#[derive(Debug, Clone, Error)]
pub enum ConcordError {
    /// A referent is absent (agent, workflow, execution, session, key)
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Registration of an already-registered id
    #[error("{entity} already registered: {id}")]
    DuplicateId { entity: &'static str, id: String },

    /// Malformed registration, workflow, rule, or request
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// A workflow defines a dependency cycle
    #[error("workflow {workflow_id} has a circular dependency through step {step_id}")]
    CircularDependency { workflow_id: String, step_id: String },

    /// An execution cannot make progress
    #[error("execution {execution_id} deadlocked with {pending} non-terminal step(s)")]
    Deadlock { execution_id: ExecutionId, pending: usize },

    /// A key is revoked, expired, or missing private material
    #[error("key {key_id} unavailable: {reason}")]
    KeyUnavailable { key_id: String, reason: String },

    /// The requested signing algorithm is not supported
    #[error("unsupported algorithm: {algorithm}")]
    AlgorithmUnsupported { algorithm: String },

    /// Signature verification failed
    #[error("signature invalid: {message}")]
    SignatureInvalid { message: String },

    /// Authenticated decryption failed (wrong key or tampered payload)
    #[error("decryption failed: {message}")]
    DecryptionFailed { message: String },

    /// A handshake was rejected, with its sub-reason
    #[error("handshake rejected: {reason}")]
    HandshakeRejected { reason: String },

    /// Too many failed authentication attempts
    #[error("principal {principal} is locked out for {retry_after_secs}s")]
    LockedOut { principal: String, retry_after_secs: u64 },

    /// A recoverable invocation failure; callers may retry
    #[error("transient failure: {message}")]
    Transient { message: String },

    /// A non-recoverable invocation failure; retries are pointless
    #[error("permanent failure: {message}")]
    Permanent { message: String },

    /// Cooperative cancellation was observed
    #[error("operation cancelled")]
    Cancelled,

    /// Too many concurrent workflow executions
    #[error("workflow capacity exceeded: limit {limit}")]
    CapacityExceeded { limit: usize },

    /// A workflow step failed, wrapping the underlying error
    #[error("step {step_id} failed: {source}")]
    StepFailed {
        step_id: StepId,
        #[source]
        source: Box<ConcordError>,
    },
}

impl ConcordError {
    /// A `NotFound` for the given entity kind and id
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    /// A `DuplicateId` for the given entity kind and id
    pub fn duplicate(entity: &'static str, id: impl Into<String>) -> Self {
        Self::DuplicateId { entity, id: id.into() }
    }

    /// An `InvalidArgument` with the given message
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    /// A `Transient` with the given message
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient { message: message.into() }
    }

    /// A `Permanent` with the given message
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent { message: message.into() }
    }

    /// Whether a retry may succeed
    ///
    /// Unknown invocation failures classify as transient.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Permanent { .. } | Self::Cancelled)
    }

    /// Wrap this error as the cause of a failed step
    pub fn into_step_failure(self, step_id: StepId) -> Self {
        Self::StepFailed { step_id, source: Box::new(self) }
    }
}
