use agentmolt_core::{Agent, AgentStatus, Error, Metadata, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::str::FromStr;

use crate::{now_utc, parse_sql_time, storage_err, to_sql_time, Store};

const AGENT_COLUMNS: &str =
    "id, name, model, status, metadata_json, killed, killed_at, created_at, updated_at";

/// Raw column values; converted outside the rusqlite row callback so that
/// parse failures surface as storage errors.
struct AgentRow {
    id: String,
    name: String,
    model: String,
    status: String,
    metadata_json: String,
    killed: bool,
    killed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl AgentRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            model: row.get(2)?,
            status: row.get(3)?,
            metadata_json: row.get(4)?,
            killed: row.get(5)?,
            killed_at: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_agent(self) -> Result<Agent> {
        Ok(Agent {
            status: AgentStatus::from_str(&self.status)
                .map_err(|_| Error::storage(format!("invalid agent status {:?}", self.status)))?,
            metadata: serde_json::from_str(&self.metadata_json).map_err(|e| {
                Error::storage(format!("invalid metadata for agent {}: {e}", self.id))
            })?,
            killed_at: self.killed_at.as_deref().map(parse_sql_time).transpose()?,
            created_at: parse_sql_time(&self.created_at)?,
            updated_at: parse_sql_time(&self.updated_at)?,
            id: self.id,
            name: self.name,
            model: self.model,
            killed: self.killed,
        })
    }
}

/// Outcome of a kill request against the store.
#[derive(Debug, Clone)]
pub struct KillTransition {
    pub agent: Agent,
    /// `false` when the agent was already killed before this call.
    pub transitioned: bool,
}

fn select_agent(conn: &Connection, agent_id: &str) -> Result<Option<Agent>> {
    conn.query_row(
        &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?1"),
        [agent_id],
        AgentRow::read,
    )
    .optional()
    .map_err(storage_err)?
    .map(AgentRow::into_agent)
    .transpose()
}

impl Store {
    pub fn insert_agent(&self, name: &str, model: &str, metadata: Metadata) -> Result<Agent> {
        let now = now_utc();
        let agent = Agent {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name: name.to_string(),
            model: model.to_string(),
            status: AgentStatus::Idle,
            metadata,
            killed: false,
            killed_at: None,
            created_at: now,
            updated_at: now,
        };
        let metadata_json = serde_json::to_string(&agent.metadata)?;
        let stamp = to_sql_time(&now);
        self.write(|conn| {
            conn.execute(
                "INSERT INTO agents (id, name, model, status, metadata_json, killed, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
                params![agent.id, agent.name, agent.model, agent.status.as_str(), metadata_json, stamp],
            )
            .map_err(storage_err)?;
            Ok(())
        })?;
        Ok(agent)
    }

    pub fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>> {
        let conn = self.lock()?;
        select_agent(&conn, agent_id)
    }

    /// All agents in creation order.
    pub fn list_agents(&self) -> Result<Vec<Agent>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {AGENT_COLUMNS} FROM agents ORDER BY seq ASC"))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], AgentRow::read)
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;
        rows.into_iter().map(AgentRow::into_agent).collect()
    }

    /// Flip `killed` false→true, stamping `killed_at` only on the first call.
    /// Returns `None` for an unknown agent.
    pub fn mark_killed(&self, agent_id: &str) -> Result<Option<KillTransition>> {
        self.write(|conn| {
            let stamp = to_sql_time(&now_utc());
            let changed = conn
                .execute(
                    "UPDATE agents
                     SET killed = 1, killed_at = ?1, status = 'killed', updated_at = ?1
                     WHERE id = ?2 AND killed = 0",
                    params![stamp, agent_id],
                )
                .map_err(storage_err)?;
            Ok(select_agent(conn, agent_id)?.map(|agent| KillTransition {
                agent,
                transitioned: changed == 1,
            }))
        })
    }

    /// Set a non-terminal lifecycle status. Returns `None` for an unknown agent.
    pub fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> Result<Option<Agent>> {
        if status == AgentStatus::Killed {
            return Err(Error::validation(
                "status 'killed' can only be set through the kill switch",
            ));
        }
        self.write(|conn| {
            let Some(current) = select_agent(conn, agent_id)? else {
                return Ok(None);
            };
            if current.killed {
                return Err(Error::validation(format!(
                    "agent {agent_id} is killed; its status can no longer change"
                )));
            }
            conn.execute(
                "UPDATE agents SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), to_sql_time(&now_utc()), agent_id],
            )
            .map_err(storage_err)?;
            select_agent(conn, agent_id)
        })
    }
}
