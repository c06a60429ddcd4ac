//! Append-only audit log of agent events and resource metrics

use agentmolt_core::{Event, Metric, MetricSample, NewEvent, Result, UsageTotals};
use agentmolt_store::Store;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct AuditLog {
    store: Arc<Store>,
}

impl AuditLog {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn log_event(&self, agent_id: &str, action: &str, target: Option<&str>) -> Result<Event> {
        let mut event = NewEvent::new(agent_id, action);
        event.target = target.map(str::to_string);
        self.record_event(event)
    }

    /// Append a fully described event (status, metadata).
    pub fn record_event(&self, event: NewEvent) -> Result<Event> {
        self.store.append_event(&event)
    }

    pub fn log_metric(&self, agent_id: &str, sample: MetricSample) -> Result<Metric> {
        self.log_metric_with_totals(agent_id, sample)
            .map(|(metric, _)| metric)
    }

    /// Append a metric and return the agent's totals including it, read in
    /// the same transaction.
    pub fn log_metric_with_totals(
        &self,
        agent_id: &str,
        sample: MetricSample,
    ) -> Result<(Metric, UsageTotals)> {
        let (metric, totals) = self.store.append_metric_with_totals(agent_id, &sample)?;
        debug!(
            "Agent {} usage now {} tokens, cost {}",
            agent_id, totals.total_tokens, totals.total_cost
        );
        Ok((metric, totals))
    }

    pub fn list_events(&self, agent_id: &str) -> Result<Vec<Event>> {
        self.store.list_events(agent_id)
    }

    pub fn list_metrics(&self, agent_id: &str) -> Result<Vec<Metric>> {
        self.store.list_metrics(agent_id)
    }

    /// Totals over every committed metric at call time. Never cached.
    pub fn cumulative(&self, agent_id: &str) -> Result<UsageTotals> {
        self.store.cumulative(agent_id)
    }
}
