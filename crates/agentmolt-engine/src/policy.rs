//! Policy engine
//!
//! Rules are validated and compiled when added, so evaluation never has to
//! parse a threshold and is total over the configured rule set. The compiled
//! set lives behind a `RwLock`; readers see a rule either fully added or not
//! at all.
//!
//! Evaluation order is fixed: killed agent, denylist, allowlist, cost limit,
//! token limit. The first violation wins.

use agentmolt_core::{
    cost_to_micros, micros_to_cost, Error, NewPolicyRule, PolicyKind, PolicyResult, PolicyRule,
    Result, COST_MICROS_PER_UNIT,
};
use agentmolt_store::Store;
use std::str::FromStr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::registry::AgentRegistry;

/// Typed form of a rule value, checked once at add/load time.
#[derive(Debug, Clone, PartialEq)]
enum Check {
    Deny(String),
    Allow(String),
    CostLimit { micros: i64 },
    TokenLimit(u64),
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: PolicyRule,
    check: Check,
}

/// Validate a rule value for its kind. Returns the normalized value to
/// persist and the compiled check.
fn compile(kind: PolicyKind, raw: &str) -> Result<(String, Check)> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(Error::validation(format!("{} rule needs a value", kind.as_str())));
    }
    let check = match kind {
        PolicyKind::Denylist => Check::Deny(value.to_string()),
        PolicyKind::Allowlist => Check::Allow(value.to_string()),
        PolicyKind::CostLimit => {
            let limit: f64 = value.parse().map_err(|_| {
                Error::validation(format!("cost_limit must be a number, got {value:?}"))
            })?;
            Check::CostLimit {
                micros: cost_to_micros(limit)?,
            }
        }
        PolicyKind::TokenLimit => {
            let limit: u64 = value.parse().map_err(|_| {
                Error::validation(format!(
                    "token_limit must be a non-negative integer, got {value:?}"
                ))
            })?;
            Check::TokenLimit(limit)
        }
    };
    Ok((value.to_string(), check))
}

pub struct PolicyEngine {
    store: Arc<Store>,
    registry: AgentRegistry,
    rules: RwLock<Vec<CompiledRule>>,
}

impl PolicyEngine {
    /// Build an engine over the rules already persisted in `store`.
    pub fn new(store: Arc<Store>, registry: AgentRegistry) -> Result<Self> {
        let rules = load_rules(&store)?;
        debug!("Policy engine loaded {} rules", rules.len());
        Ok(Self {
            store,
            registry,
            rules: RwLock::new(rules),
        })
    }

    pub fn add_policy(&self, rule: NewPolicyRule) -> Result<PolicyRule> {
        let (value, check) = compile(rule.kind, &rule.value)?;
        let normalized = NewPolicyRule { value, ..rule };

        // Held across the insert so the in-memory order matches row ids.
        let mut rules = self.write_rules()?;
        let stored = self.store.insert_policy(&normalized)?;
        info!(
            "Added policy {} {}={}{}",
            stored.id,
            stored.kind.as_str(),
            stored.value,
            stored
                .agent_id
                .as_deref()
                .map(|a| format!(" (agent {a})"))
                .unwrap_or_default()
        );
        rules.push(CompiledRule {
            rule: stored.clone(),
            check,
        });
        Ok(stored)
    }

    /// Parse `kind` from text (e.g. CLI input) and add the rule.
    pub fn add_policy_str(&self, kind: &str, value: &str) -> Result<PolicyRule> {
        self.add_policy(NewPolicyRule::new(PolicyKind::from_str(kind)?, value))
    }

    /// Insertion order.
    pub fn list_policies(&self) -> Result<Vec<PolicyRule>> {
        Ok(self.read_rules()?.iter().map(|c| c.rule.clone()).collect())
    }

    /// Rules that govern `agent_id`: global ones plus those scoped to it.
    pub fn list_policies_for(&self, agent_id: &str) -> Result<Vec<PolicyRule>> {
        self.registry.get_agent(agent_id)?;
        Ok(self
            .read_rules()?
            .iter()
            .filter(|c| c.rule.applies_to(agent_id))
            .map(|c| c.rule.clone())
            .collect())
    }

    /// Remove every rule. Returns how many were removed.
    pub fn reset_policies(&self) -> Result<usize> {
        let mut rules = self.write_rules()?;
        let removed = self.store.clear_policies()?;
        rules.clear();
        Ok(removed)
    }

    /// Re-read the rule set from the store, picking up rules written by
    /// other processes.
    pub fn reload_policies(&self) -> Result<usize> {
        let mut rules = self.write_rules()?;
        *rules = load_rules(&self.store)?;
        Ok(rules.len())
    }

    pub fn check_policy(&self, agent_id: &str, action: &str) -> Result<PolicyResult> {
        let agent = self.registry.get_agent(agent_id)?;
        if agent.killed {
            return Ok(PolicyResult::deny("agent is killed", None));
        }

        let rules: Vec<CompiledRule> = self
            .read_rules()?
            .iter()
            .filter(|c| c.rule.applies_to(agent_id))
            .cloned()
            .collect();

        for c in &rules {
            if let Check::Deny(blocked) = &c.check {
                if blocked == action {
                    return Ok(deny(
                        c,
                        format!("action '{action}' is denied by policy {}", c.rule.id),
                    ));
                }
            }
        }

        let mut allowlist = rules.iter().filter(|c| matches!(c.check, Check::Allow(_)));
        if let Some(first) = allowlist.clone().next() {
            let listed = allowlist.any(|c| matches!(&c.check, Check::Allow(a) if a == action));
            if !listed {
                return Ok(deny(first, format!("action '{action}' not in allowlist")));
            }
        }

        let has_limits = rules
            .iter()
            .any(|c| matches!(c.check, Check::CostLimit { .. } | Check::TokenLimit(_)));
        if !has_limits {
            return Ok(PolicyResult::allow());
        }

        // One snapshot of the committed totals serves every limit rule.
        let totals = self.store.cumulative(agent_id)?;
        // Saturating: totals may be clamped at the top of the range.
        let spent = (totals.total_cost * COST_MICROS_PER_UNIT as f64).round() as i64;

        for c in &rules {
            if let Check::CostLimit { micros } = c.check {
                if spent > micros {
                    return Ok(deny(
                        c,
                        format!(
                            "cost limit ${} exceeded (${})",
                            micros_to_cost(micros),
                            totals.total_cost
                        ),
                    ));
                }
            }
        }

        for c in &rules {
            if let Check::TokenLimit(limit) = c.check {
                if totals.total_tokens > limit {
                    return Ok(deny(
                        c,
                        format!("token limit {limit} exceeded ({})", totals.total_tokens),
                    ));
                }
            }
        }

        Ok(PolicyResult::allow())
    }

    fn read_rules(&self) -> Result<RwLockReadGuard<'_, Vec<CompiledRule>>> {
        self.rules
            .read()
            .map_err(|_| Error::storage("policy rule set lock poisoned"))
    }

    fn write_rules(&self) -> Result<RwLockWriteGuard<'_, Vec<CompiledRule>>> {
        self.rules
            .write()
            .map_err(|_| Error::storage("policy rule set lock poisoned"))
    }
}

fn deny(rule: &CompiledRule, reason: String) -> PolicyResult {
    debug!("Policy {} denied: {}", rule.rule.id, reason);
    PolicyResult::deny(reason, Some(rule.rule.id))
}

fn load_rules(store: &Store) -> Result<Vec<CompiledRule>> {
    store
        .list_policies()?
        .into_iter()
        .map(|rule| {
            let (_, check) = compile(rule.kind, &rule.value).map_err(|e| {
                Error::storage(format!("stored policy {} is invalid: {e}", rule.id))
            })?;
            Ok(CompiledRule { rule, check })
        })
        .collect()
}
