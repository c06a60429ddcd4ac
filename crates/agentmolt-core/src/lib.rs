//! AgentMolt Core - Types, configuration, the control-plane contract, and error handling

pub mod config;
pub mod error;
pub mod protocol;
pub mod types;

pub use config::{AgentMoltConfig, KillSwitchConfig, StoreConfig};
pub use error::{Error, Result};
pub use protocol::ControlPlane;
pub use types::*;
