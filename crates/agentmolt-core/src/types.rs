//! Core types for AgentMolt

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Free-form JSON attributes attached to agents, events, and metrics.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Costs are persisted as integer micro-units so that sums are exact.
pub const COST_MICROS_PER_UNIT: i64 = 1_000_000;

/// Convert a caller-supplied cost into micro-units, rounding to the nearest
/// micro-unit. Rejects negative or non-finite values, and positive costs
/// too small to be represented (they would round to zero).
pub fn cost_to_micros(cost: f64) -> Result<i64> {
    if !cost.is_finite() || cost < 0.0 {
        return Err(Error::validation(format!(
            "cost must be a non-negative number, got {cost}"
        )));
    }
    let scaled = (cost * COST_MICROS_PER_UNIT as f64).round();
    if scaled >= i64::MAX as f64 {
        return Err(Error::validation(format!("cost {cost} is out of range")));
    }
    if cost > 0.0 && scaled == 0.0 {
        return Err(Error::validation(format!(
            "cost {cost} is below the smallest recorded unit (0.000001)"
        )));
    }
    Ok(scaled as i64)
}

pub fn micros_to_cost(micros: i64) -> f64 {
    micros as f64 / COST_MICROS_PER_UNIT as f64
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// Lifecycle status of an agent
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Running,
    Stopped,
    Failed,
    Killed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Killed => "killed",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "failed" => Ok(Self::Failed),
            "killed" => Ok(Self::Killed),
            other => Err(Error::validation(format!("unknown agent status: {other}"))),
        }
    }
}

/// A registered agent. Never deleted; only the kill path flips `killed`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub killed: bool,
    #[serde(default)]
    pub killed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Outcome recorded alongside an audited action
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Allowed,
    Denied,
    Started,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Denied => "denied",
            Self::Started => "started",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "allowed" => Ok(Self::Allowed),
            "denied" => Ok(Self::Denied),
            "started" => Ok(Self::Started),
            "failed" => Ok(Self::Failed),
            other => Err(Error::validation(format!("unknown event status: {other}"))),
        }
    }
}

/// One immutable audit entry
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: i64,
    pub agent_id: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(default)]
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
}

/// An event to be appended
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewEvent {
    pub agent_id: String,
    pub action: String,
    pub target: Option<String>,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(default)]
    pub metadata: Metadata,
}

impl NewEvent {
    pub fn new(agent_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            action: action.into(),
            ..Default::default()
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_status(mut self, status: EventStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// One immutable usage sample
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Metric {
    pub id: i64,
    pub agent_id: String,
    pub tokens_used: u64,
    pub cost: f64,
    pub tool_calls: u64,
    #[serde(default)]
    pub files_accessed: u64,
    #[serde(default)]
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
}

/// Usage to record for an agent. All counters default to zero.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MetricSample {
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub tool_calls: u64,
    #[serde(default)]
    pub files_accessed: u64,
    #[serde(default)]
    pub metadata: Metadata,
}

impl MetricSample {
    pub fn tokens(tokens_used: u64) -> Self {
        Self {
            tokens_used,
            ..Default::default()
        }
    }

    /// Costs are recorded in micro-units (0.000001), rounded to the nearest
    /// one; a positive cost below half a micro-unit is rejected when logged.
    pub fn cost(cost: f64) -> Self {
        Self {
            cost,
            ..Default::default()
        }
    }

    pub fn with_tokens(mut self, tokens_used: u64) -> Self {
        self.tokens_used = tokens_used;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: u64) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_files_accessed(mut self, files_accessed: u64) -> Self {
        self.files_accessed = files_accessed;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Sums over every committed metric row of one agent
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageTotals {
    pub total_cost: f64,
    pub total_tokens: u64,
    pub total_tool_calls: u64,
    pub total_files_accessed: u64,
    pub samples: u64,
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Kind of governance rule
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Denylist,
    Allowlist,
    CostLimit,
    TokenLimit,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Denylist => "denylist",
            Self::Allowlist => "allowlist",
            Self::CostLimit => "cost_limit",
            Self::TokenLimit => "token_limit",
        }
    }

    /// Limit rules carry a numeric threshold; list rules carry an action name.
    pub fn is_limit(&self) -> bool {
        matches!(self, Self::CostLimit | Self::TokenLimit)
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PolicyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "denylist" => Ok(Self::Denylist),
            "allowlist" => Ok(Self::Allowlist),
            "cost_limit" => Ok(Self::CostLimit),
            "token_limit" => Ok(Self::TokenLimit),
            other => Err(Error::validation(format!(
                "unknown policy kind: {other} (expected denylist, allowlist, cost_limit or token_limit)"
            ))),
        }
    }
}

/// A persisted governance rule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PolicyRule {
    pub id: i64,
    pub kind: PolicyKind,
    pub value: String,
    /// `None` applies the rule to every agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PolicyRule {
    pub fn applies_to(&self, agent_id: &str) -> bool {
        self.agent_id.as_deref().map_or(true, |scoped| scoped == agent_id)
    }
}

/// A rule to be added
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewPolicyRule {
    pub kind: PolicyKind,
    pub value: String,
    #[serde(default)]
    pub agent_id: Option<String>,
}

impl NewPolicyRule {
    pub fn new(kind: PolicyKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            agent_id: None,
        }
    }

    pub fn denylist(action: impl Into<String>) -> Self {
        Self::new(PolicyKind::Denylist, action)
    }

    pub fn allowlist(action: impl Into<String>) -> Self {
        Self::new(PolicyKind::Allowlist, action)
    }

    pub fn cost_limit(limit: impl Into<String>) -> Self {
        Self::new(PolicyKind::CostLimit, limit)
    }

    pub fn token_limit(limit: impl Into<String>) -> Self {
        Self::new(PolicyKind::TokenLimit, limit)
    }

    pub fn for_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }
}

/// Verdict of a policy check. A deny is a normal result, not an error.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyResult {
    pub allowed: bool,
    pub reason: Option<String>,
    /// Rule that produced a deny, if a rule did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<i64>,
}

impl PolicyResult {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            rule_id: None,
        }
    }

    pub fn deny(reason: impl Into<String>, rule_id: Option<i64>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            rule_id,
        }
    }

    pub fn is_denied(&self) -> bool {
        !self.allowed
    }
}

/// Row counts across the store
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreStats {
    pub agents: u64,
    pub events: u64,
    pub metrics: u64,
    pub policies: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_micros_are_exact_for_cents() {
        assert_eq!(cost_to_micros(5.01).unwrap(), 5_010_000);
        assert_eq!(cost_to_micros(0.0).unwrap(), 0);
        assert_eq!(micros_to_cost(4_000_000), 4.0);
    }

    #[test]
    fn cost_rejects_negative_and_nan() {
        assert!(cost_to_micros(-0.5).unwrap_err().is_validation());
        assert!(cost_to_micros(f64::NAN).unwrap_err().is_validation());
        assert!(cost_to_micros(f64::INFINITY).unwrap_err().is_validation());
    }

    #[test]
    fn sub_micro_cost_is_rejected_not_dropped() {
        assert!(cost_to_micros(0.000_000_4).unwrap_err().is_validation());
        assert_eq!(cost_to_micros(0.000_001).unwrap(), 1);
        assert_eq!(cost_to_micros(0.000_000_6).unwrap(), 1);
        assert_eq!(cost_to_micros(1.000_000_4).unwrap(), 1_000_000);
    }

    #[test]
    fn scoped_rule_applies_only_to_its_agent() {
        let rule = PolicyRule {
            id: 1,
            kind: PolicyKind::Denylist,
            value: "rm".into(),
            agent_id: Some("a1".into()),
            created_at: Utc::now(),
        };
        assert!(rule.applies_to("a1"));
        assert!(!rule.applies_to("a2"));
    }
}
