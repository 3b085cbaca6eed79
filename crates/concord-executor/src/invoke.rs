//! Agent invocation contract
//!
//! The executor never dispatches on agent subtypes; it calls one function
//! `(agent_id, capability_id, inputs) → outputs` behind the
//! [`AgentInvoker`] trait. The cross-process transport is a collaborator;
//! [`CapabilityDispatcher`] is the in-process implementation with handlers
//! registered at startup.
//!
//! Failures classify by error kind alone: `Permanent` skips retries,
//! `Cancelled` aborts, everything else is treated as transient.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::RwLock;

use concord_types::{AgentId, CapabilityId, ConcordError, Result};

/// Capability input/output maps
pub type ValueMap = serde_json::Map<String, serde_json::Value>;

/// The single seam between the executor and agent transports
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Invoke a capability on an agent
    async fn invoke(
        &self,
        agent_id: &AgentId,
        capability_id: &CapabilityId,
        inputs: ValueMap,
    ) -> Result<ValueMap>;
}

/// Async handler backing one (agent, capability) pair
pub type CapabilityHandler =
    Arc<dyn Fn(ValueMap) -> BoxFuture<'static, Result<ValueMap>> + Send + Sync>;

/// Wrap an async closure as a [`CapabilityHandler`]
pub fn capability_handler<F, Fut>(f: F) -> CapabilityHandler
where
    F: Fn(ValueMap) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<ValueMap>> + Send + 'static,
{
    Arc::new(move |inputs| Box::pin(f(inputs)))
}

/// In-process capability dispatch table
#[derive(Default)]
pub struct CapabilityDispatcher {
    handlers: RwLock<HashMap<(AgentId, CapabilityId), CapabilityHandler>>,
}

impl CapabilityDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for an (agent, capability) pair
    pub async fn register(
        &self,
        agent_id: impl Into<AgentId>,
        capability_id: impl Into<CapabilityId>,
        handler: CapabilityHandler,
    ) {
        self.handlers
            .write()
            .await
            .insert((agent_id.into(), capability_id.into()), handler);
    }

    /// Drop the handler for an (agent, capability) pair
    pub async fn deregister(&self, agent_id: &AgentId, capability_id: &CapabilityId) {
        self.handlers
            .write()
            .await
            .remove(&(agent_id.clone(), capability_id.clone()));
    }
}

#[async_trait]
impl AgentInvoker for CapabilityDispatcher {
    async fn invoke(
        &self,
        agent_id: &AgentId,
        capability_id: &CapabilityId,
        inputs: ValueMap,
    ) -> Result<ValueMap> {
        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&(agent_id.clone(), capability_id.clone())).cloned()
        };

        match handler {
            Some(handler) => handler(inputs).await,
            None => Err(ConcordError::permanent(format!(
                "no handler for capability {capability_id} on agent {agent_id}"
            ))),
        }
    }
}
