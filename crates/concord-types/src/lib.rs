//! Concord Types - Canonical domain types for the Concord agent platform
//!
//! This crate contains all foundational types for Concord with zero
//! dependencies on other concord crates. It defines the complete type
//! system for:
//!
//! - Identity types (AgentId, WorkflowId, SessionId, KeyId, etc.)
//! - Agents, capabilities and liveness status
//! - Workflows, steps, retry policies and execution conditions
//! - Execution records with per-step state machines
//! - Policy rules and evaluation contexts
//! - Keys, signatures and exported key bundles
//! - Handshake sessions and conversation contexts
//! - Security alerts
//! - The closed system event set
//!
//! # Architectural Invariants
//!
//! These types support the core Concord invariants:
//!
//! 1. Private key material never crosses a public facade unencrypted
//! 2. Workflow dependency graphs are acyclic
//! 3. Terminal execution states are permanent
//! 4. Cross-component references are ids, never owned objects

pub mod identity;
pub mod agent;
pub mod workflow;
pub mod execution;
pub mod policy;
pub mod key;
pub mod session;
pub mod context;
pub mod alert;
pub mod event;
pub mod error;
pub mod mirror;

pub use identity::*;
pub use agent::*;
pub use workflow::*;
pub use execution::*;
pub use policy::*;
pub use key::*;
pub use session::*;
pub use context::*;
pub use alert::*;
pub use event::*;
pub use error::*;
pub use mirror::*;

/// Version of the Concord types schema
pub const TYPES_VERSION: &str = "0.1.0";
