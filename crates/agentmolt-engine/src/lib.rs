//! AgentMolt Engine - agent registry, audit log, and policy evaluation
//!
//! [`LocalControlPlane`] wires the three components over a shared
//! [`Store`](agentmolt_store::Store) and implements
//! [`ControlPlane`](agentmolt_core::ControlPlane).

pub mod audit;
pub mod local;
pub mod policy;
pub mod registry;

pub use audit::AuditLog;
pub use local::LocalControlPlane;
pub use policy::PolicyEngine;
pub use registry::AgentRegistry;
