//! Agent registry
//!
//! Agents are created once and never deleted. The only irreversible change
//! is the kill transition; everything else is a status update that a killed
//! agent refuses.

use agentmolt_core::{Agent, AgentStatus, Error, Metadata, Result};
use agentmolt_store::Store;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct AgentRegistry {
    store: Arc<Store>,
}

impl AgentRegistry {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn register_agent(&self, name: &str, model: &str) -> Result<Agent> {
        self.register_agent_with_metadata(name, model, Metadata::new())
    }

    pub fn register_agent_with_metadata(
        &self,
        name: &str,
        model: &str,
        metadata: Metadata,
    ) -> Result<Agent> {
        let agent = self.store.insert_agent(name, model, metadata)?;
        info!("Registered agent {} ({}) model={}", agent.id, agent.name, agent.model);
        Ok(agent)
    }

    pub fn get_agent(&self, agent_id: &str) -> Result<Agent> {
        self.store
            .get_agent(agent_id)?
            .ok_or_else(|| Error::agent_not_found(agent_id))
    }

    pub fn list_agents(&self) -> Result<Vec<Agent>> {
        self.store.list_agents()
    }

    /// Mark the agent killed. Killing an already-killed agent leaves
    /// `killed_at` untouched and returns the current record.
    pub fn kill(&self, agent_id: &str) -> Result<Agent> {
        let transition = self
            .store
            .mark_killed(agent_id)?
            .ok_or_else(|| Error::agent_not_found(agent_id))?;
        if transition.transitioned {
            warn!("Agent {} killed", agent_id);
        } else {
            debug!("Agent {} was already killed", agent_id);
        }
        Ok(transition.agent)
    }

    pub fn is_killed(&self, agent_id: &str) -> Result<bool> {
        Ok(self.get_agent(agent_id)?.killed)
    }

    /// Record a lifecycle status. `killed` is reserved for [`kill`](Self::kill).
    pub fn update_status(&self, agent_id: &str, status: AgentStatus) -> Result<Agent> {
        let agent = self
            .store
            .set_agent_status(agent_id, status)?
            .ok_or_else(|| Error::agent_not_found(agent_id))?;
        debug!("Agent {} status -> {}", agent_id, status);
        Ok(agent)
    }
}
