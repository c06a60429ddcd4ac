//! Local control plane: registry, audit log, and policy engine over one store

use agentmolt_core::{
    Agent, ControlPlane, Event, Metric, MetricSample, NewEvent, NewPolicyRule, PolicyResult,
    PolicyRule, Result, StoreConfig, StoreStats, UsageTotals,
};
use agentmolt_store::Store;
use std::sync::Arc;

use crate::audit::AuditLog;
use crate::policy::PolicyEngine;
use crate::registry::AgentRegistry;

pub struct LocalControlPlane {
    store: Arc<Store>,
    registry: AgentRegistry,
    audit: AuditLog,
    policy: PolicyEngine,
}

impl LocalControlPlane {
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Self::from_store(Arc::new(Store::open(config)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_store(Arc::new(Store::open_in_memory()?))
    }

    pub fn from_store(store: Arc<Store>) -> Result<Self> {
        let registry = AgentRegistry::new(store.clone());
        let audit = AuditLog::new(store.clone());
        let policy = PolicyEngine::new(store.clone(), registry.clone())?;
        Ok(Self {
            store,
            registry,
            audit,
            policy,
        })
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.store.stats()
    }

    pub fn reset_policies(&self) -> Result<usize> {
        self.policy.reset_policies()
    }
}

impl ControlPlane for LocalControlPlane {
    fn register_agent(&self, name: &str, model: &str) -> Result<Agent> {
        self.registry.register_agent(name, model)
    }

    fn get_agent(&self, agent_id: &str) -> Result<Agent> {
        self.registry.get_agent(agent_id)
    }

    fn list_agents(&self) -> Result<Vec<Agent>> {
        self.registry.list_agents()
    }

    fn kill(&self, agent_id: &str) -> Result<Agent> {
        self.registry.kill(agent_id)
    }

    fn log_event(&self, event: NewEvent) -> Result<Event> {
        self.audit.record_event(event)
    }

    fn log_metric(&self, agent_id: &str, sample: MetricSample) -> Result<Metric> {
        self.audit.log_metric(agent_id, sample)
    }

    fn list_events(&self, agent_id: &str) -> Result<Vec<Event>> {
        self.audit.list_events(agent_id)
    }

    fn list_metrics(&self, agent_id: &str) -> Result<Vec<Metric>> {
        self.audit.list_metrics(agent_id)
    }

    fn cumulative(&self, agent_id: &str) -> Result<UsageTotals> {
        self.audit.cumulative(agent_id)
    }

    fn check_policy(&self, agent_id: &str, action: &str) -> Result<PolicyResult> {
        self.policy.check_policy(agent_id, action)
    }

    fn add_policy(&self, rule: NewPolicyRule) -> Result<PolicyRule> {
        self.policy.add_policy(rule)
    }

    fn list_policies(&self) -> Result<Vec<PolicyRule>> {
        self.policy.list_policies()
    }
}
