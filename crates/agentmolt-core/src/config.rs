//! Control-plane configuration
//!
//! Loaded from TOML at startup, falls back to defaults when no config file
//! exists. Environment variables override individual values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Overrides `[store] path`.
pub const DB_PATH_ENV: &str = "AGENTMOLT_DB_PATH";
/// Overrides `[killswitch] poll_interval_secs`.
pub const POLL_INTERVAL_ENV: &str = "AGENTMOLT_POLL_INTERVAL";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentMoltConfig {
    /// Local persistence.
    pub store: StoreConfig,
    /// Background kill-switch monitor.
    pub killswitch: KillSwitchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file.
    pub path: PathBuf,
    /// How long a writer waits on a lock held by another connection or process.
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KillSwitchConfig {
    /// Seconds between kill-state polls. Must be positive.
    pub poll_interval_secs: f64,
}

// ============================================================
// Defaults
// ============================================================

/// `~/.agentmolt`, or `./.agentmolt` when no home directory is known.
pub fn agentmolt_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agentmolt")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: agentmolt_home().join("agentmolt.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5.0,
        }
    }
}

// ============================================================
// Loading
// ============================================================

impl AgentMoltConfig {
    pub fn default_path() -> PathBuf {
        agentmolt_home().join("agentmolt.toml")
    }

    /// Load config from a TOML file. A missing file yields defaults; an
    /// unreadable or malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let config = Self::from_toml(&content)
                    .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;
                tracing::info!("Loaded config from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config at {} - using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(Error::config(format!("{}: {e}", path.display()))),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(e.to_string()))
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Apply overrides from the process environment.
    pub fn with_env(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(path) = lookup(DB_PATH_ENV).filter(|p| !p.is_empty()) {
            self.store.path = PathBuf::from(path);
        }
        if let Some(raw) = lookup(POLL_INTERVAL_ENV).filter(|v| !v.is_empty()) {
            self.killswitch.poll_interval_secs = raw.trim().parse().map_err(|_| {
                Error::config(format!("{POLL_INTERVAL_ENV} must be a number, got {raw:?}"))
            })?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.killswitch.poll_interval()?;
        Ok(())
    }
}

impl KillSwitchConfig {
    /// The poll interval as a `Duration`; rejects zero, negative, and non-finite values.
    pub fn poll_interval(&self) -> Result<Duration> {
        let secs = self.poll_interval_secs;
        if !secs.is_finite() || secs <= 0.0 {
            return Err(Error::config(format!(
                "killswitch.poll_interval_secs must be a positive number, got {secs}"
            )));
        }
        Duration::try_from_secs_f64(secs).map_err(|e| Error::config(e.to_string()))
    }
}
