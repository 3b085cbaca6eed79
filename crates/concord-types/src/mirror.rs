//! Persistence mirror contract
//!
//! The core runs fully in memory. A deployment may wire a repository
//! collaborator behind this trait for a write-through mirror of agents,
//! terminal execution records and alerts, with read-through restoration at
//! startup. Mirror failures must never affect the in-memory path; callers
//! log and continue.

use async_trait::async_trait;

use crate::alert::Alert;
use crate::agent::Agent;
use crate::error::Result;
use crate::execution::WorkflowExecution;

/// Write-through / read-through repository collaborator
#[async_trait]
pub trait MirrorRepository: Send + Sync {
    /// Mirror an agent registration or update
    async fn store_agent(&self, agent: &Agent) -> Result<()>;

    /// Mirror a terminal execution record
    async fn store_execution(&self, execution: &WorkflowExecution) -> Result<()>;

    /// Mirror a recorded alert
    async fn store_alert(&self, alert: &Alert) -> Result<()>;

    /// Restore mirrored agents at startup
    async fn load_agents(&self) -> Result<Vec<Agent>>;

    /// Restore mirrored alerts at startup
    async fn load_alerts(&self) -> Result<Vec<Alert>>;
}

/// Mirror that drops everything; the default when nothing is wired
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMirror;

#[async_trait]
impl MirrorRepository for NullMirror {
    async fn store_agent(&self, _agent: &Agent) -> Result<()> {
        Ok(())
    }

    async fn store_execution(&self, _execution: &WorkflowExecution) -> Result<()> {
        Ok(())
    }

    async fn store_alert(&self, _alert: &Alert) -> Result<()> {
        Ok(())
    }

    async fn load_agents(&self) -> Result<Vec<Agent>> {
        Ok(Vec::new())
    }

    async fn load_alerts(&self) -> Result<Vec<Alert>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentKind;

    #[tokio::test]
    async fn test_null_mirror_accepts_everything() {
        let mirror = NullMirror;
        let agent = Agent::new("guardian-1", AgentKind::Guardian, "aabb", vec![]);

        mirror.store_agent(&agent).await.unwrap();
        assert!(mirror.load_agents().await.unwrap().is_empty());
        assert!(mirror.load_alerts().await.unwrap().is_empty());
    }
}
