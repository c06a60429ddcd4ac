use agentmolt_core::{Error, NewPolicyRule, PolicyKind, PolicyRule, Result};
use rusqlite::{params, Row};
use std::str::FromStr;
use tracing::info;

use crate::{ensure_agent, now_utc, parse_sql_time, storage_err, to_sql_time, Store};

struct PolicyRow {
    id: i64,
    kind: String,
    value: String,
    agent_id: Option<String>,
    created_at: String,
}

impl PolicyRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            value: row.get(2)?,
            agent_id: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_rule(self) -> Result<PolicyRule> {
        Ok(PolicyRule {
            kind: PolicyKind::from_str(&self.kind)
                .map_err(|_| Error::storage(format!("invalid policy kind {:?}", self.kind)))?,
            created_at: parse_sql_time(&self.created_at)?,
            id: self.id,
            value: self.value,
            agent_id: self.agent_id,
        })
    }
}

impl Store {
    /// Persist a rule as given. Value validation belongs to the policy engine;
    /// the store only checks that a scoped agent exists.
    pub fn insert_policy(&self, rule: &NewPolicyRule) -> Result<PolicyRule> {
        let now = now_utc();
        let id = self.write(|conn| {
            if let Some(agent_id) = &rule.agent_id {
                ensure_agent(conn, agent_id)?;
            }
            conn.execute(
                "INSERT INTO policies (kind, value, agent_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![rule.kind.as_str(), rule.value, rule.agent_id, to_sql_time(&now)],
            )
            .map_err(storage_err)?;
            Ok(conn.last_insert_rowid())
        })?;
        Ok(PolicyRule {
            id,
            kind: rule.kind,
            value: rule.value.clone(),
            agent_id: rule.agent_id.clone(),
            created_at: now,
        })
    }

    /// Every rule in insertion order.
    pub fn list_policies(&self) -> Result<Vec<PolicyRule>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, kind, value, agent_id, created_at FROM policies ORDER BY id ASC")
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], PolicyRow::read)
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;
        rows.into_iter().map(PolicyRow::into_rule).collect()
    }

    /// Remove every rule. Returns how many were removed.
    pub fn clear_policies(&self) -> Result<usize> {
        let removed = self.write(|conn| {
            conn.execute("DELETE FROM policies", [])
                .map_err(storage_err)
        })?;
        info!("Cleared {} policy rules", removed);
        Ok(removed)
    }
}
