//! Identity types for Concord
//!
//! All identity types are strongly typed wrappers around strings to prevent
//! accidental mixing of different ID types. Caller-assigned ids (agents,
//! workflows, steps, keys) accept arbitrary opaque strings; generated ids
//! (executions, sessions, events, alerts) carry a stable prefix.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate ID types with common implementations
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create from an existing opaque id
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh prefixed id
            pub fn generate() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::new_v4()))
            }

            /// The id as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the id carries any content
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

// Caller-assigned identity types
define_id_type!(AgentId, "agent", "Stable opaque identifier for an agent");
define_id_type!(CapabilityId, "cap", "Identifier for a declared agent capability");
define_id_type!(WorkflowId, "wf", "Identifier for a workflow definition");
define_id_type!(StepId, "step", "Identifier for a step, unique within its workflow");
define_id_type!(KeyId, "key", "Identifier for a managed key");
define_id_type!(PrincipalId, "principal", "Identifier for a policy principal or lockout subject");

// Generated identity types
define_id_type!(ExecutionId, "exec", "Identifier for a concrete workflow execution");
define_id_type!(SessionId, "sess", "Identifier for an authenticated agent session");
define_id_type!(DiscoverySessionId, "disc", "Identifier for a discovery registration session");
define_id_type!(EventId, "evt", "Identifier for a bus event");
define_id_type!(AlertId, "alert", "Identifier for a security alert");
define_id_type!(SubscriptionId, "sub", "Identifier for an event bus subscription");
define_id_type!(CorrelationId, "corr", "Opaque token threading a request through its events");
define_id_type!(MessageId, "msg", "Identifier for a conversation message");
define_id_type!(RuleId, "rule", "Identifier for a policy rule");

/// A decentralized identifier in `did:<method>:<specific-id>` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Did(pub String);

impl Did {
    /// Wrap an existing DID string without validation
    pub fn new(did: impl Into<String>) -> Self {
        Self(did.into())
    }

    /// Whether the string is a well-formed DID
    ///
    /// Requires the `did:` scheme, a non-empty method of lowercase
    /// alphanumerics, and a non-empty method-specific id.
    pub fn is_valid(&self) -> bool {
        let mut parts = self.0.splitn(3, ':');
        let scheme = parts.next().unwrap_or_default();
        let method = parts.next().unwrap_or_default();
        let specific = parts.next().unwrap_or_default();

        scheme == "did"
            && !method.is_empty()
            && method.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            && !specific.is_empty()
    }

    /// The DID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Did {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
