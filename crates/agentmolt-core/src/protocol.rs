//! The control-plane operation surface.
//!
//! The local engine implements this trait directly. A remote mirror that
//! proxies the same operations to a hosted service implements it too, so
//! callers (the CLI, the kill-switch monitor) work against either.

use crate::error::Result;
use crate::types::{
    Agent, Event, Metric, MetricSample, NewEvent, NewPolicyRule, PolicyResult, PolicyRule,
    UsageTotals,
};

pub trait ControlPlane: Send + Sync {
    // --- Agents ---

    fn register_agent(&self, name: &str, model: &str) -> Result<Agent>;

    /// Fails with `NotFound` for an unknown id.
    fn get_agent(&self, agent_id: &str) -> Result<Agent>;

    /// Creation order.
    fn list_agents(&self) -> Result<Vec<Agent>>;

    /// Idempotent: killing a killed agent returns its current state.
    fn kill(&self, agent_id: &str) -> Result<Agent>;

    fn is_killed(&self, agent_id: &str) -> Result<bool> {
        Ok(self.get_agent(agent_id)?.killed)
    }

    // --- Audit ---

    fn log_event(&self, event: NewEvent) -> Result<Event>;

    fn log_metric(&self, agent_id: &str, sample: MetricSample) -> Result<Metric>;

    /// Insertion order.
    fn list_events(&self, agent_id: &str) -> Result<Vec<Event>>;

    /// Insertion order.
    fn list_metrics(&self, agent_id: &str) -> Result<Vec<Metric>>;

    fn cumulative(&self, agent_id: &str) -> Result<UsageTotals>;

    // --- Policy ---

    fn check_policy(&self, agent_id: &str, action: &str) -> Result<PolicyResult>;

    fn add_policy(&self, rule: NewPolicyRule) -> Result<PolicyRule>;

    /// Insertion order.
    fn list_policies(&self) -> Result<Vec<PolicyRule>>;
}
