//! AgentMolt Kill Switch - immediate kill and background kill-state monitoring

pub mod monitor;

pub use monitor::{kill_now, KillCallback, KillSwitch, MonitorState};
