//! AgentMolt - local control plane for autonomous agents
//!
//! Re-exports the member crates so embedders depend on one package:
//! register agents, keep an append-only audit trail, evaluate governance
//! rules, and kill agents with an optional background monitor.

pub mod args;
pub mod format;

pub use agentmolt_core::*;
pub use agentmolt_engine::{AgentRegistry, AuditLog, LocalControlPlane, PolicyEngine};
pub use agentmolt_killswitch::{kill_now, KillCallback, KillSwitch, MonitorState};
pub use agentmolt_store::{KillTransition, Store, SCHEMA_VERSION};

#[cfg(test)]
mod tests;
