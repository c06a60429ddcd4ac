//! AgentMolt Store - durable SQLite persistence for agents, events, metrics, and policy rules
//!
//! One `Store` wraps one connection behind a mutex, so it is safe to share
//! across threads. Several `Store`s (or processes) may open the same file;
//! WAL mode plus a busy timeout and `IMMEDIATE` write transactions keep
//! concurrent writers from losing rows.

mod agents;
mod audit;
mod policies;
mod schema;

use agentmolt_core::{Error, Result, StoreConfig, StoreStats};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

pub use agents::KillTransition;
pub use schema::SCHEMA_VERSION;

pub struct Store {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (creating if needed) the database described by `config`.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        Self::open_with_timeout(&config.path, Duration::from_millis(config.busy_timeout_ms))
    }

    /// Open a database file with the default busy timeout.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(&StoreConfig {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        })
    }

    fn open_with_timeout(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::storage(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path).map_err(|e| {
            Error::storage(format!("failed to open sqlite database at {}: {e}", path.display()))
        })?;
        conn.busy_timeout(busy_timeout).map_err(storage_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(storage_err)?;
        migrate(&conn)?;
        info!("Store opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// A private, non-durable database. Useful for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(storage_err)?;
        migrate(&conn)?;
        debug!("In-memory store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Backing file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;
        let count = |table: &str| -> Result<u64> {
            let n: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
                .map_err(storage_err)?;
            Ok(n.max(0) as u64)
        };
        Ok(StoreStats {
            agents: count("agents")?,
            events: count("events")?,
            metrics: count("metrics")?,
            policies: count("policies")?,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::storage("store connection mutex poisoned"))
    }

    /// Run `f` inside an `IMMEDIATE` transaction, committing only on success.
    fn write<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage_err)?;
        let out = f(&*tx)?;
        tx.commit().map_err(storage_err)?;
        Ok(out)
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .map_err(storage_err)?;
    if version > SCHEMA_VERSION {
        return Err(Error::storage(format!(
            "database schema version {version} is newer than supported version {SCHEMA_VERSION}"
        )));
    }
    conn.execute_batch(schema::SCHEMA)
        .map_err(|e| Error::storage(format!("failed to apply schema: {e}")))?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(storage_err)?;
    Ok(())
}

/// Fails with `NotFound` unless the agent row exists.
fn ensure_agent(conn: &Connection, agent_id: &str) -> Result<()> {
    conn.query_row("SELECT 1 FROM agents WHERE id = ?1", [agent_id], |_| Ok(()))
        .optional()
        .map_err(storage_err)?
        .ok_or_else(|| Error::agent_not_found(agent_id))
}

pub(crate) fn storage_err(e: rusqlite::Error) -> Error {
    Error::storage(e.to_string())
}

/// Current time truncated to the precision the store keeps.
pub(crate) fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn to_sql_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_sql_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::storage(format!("invalid timestamp {raw:?}: {e}")))
}

pub(crate) fn to_sql_count(name: &str, value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::validation(format!("{name} {value} is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.lock().unwrap();
        migrate(&conn).unwrap();
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn newer_schema_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();
        assert!(migrate(&conn).unwrap_err().is_storage());
    }

    #[test]
    fn timestamps_survive_text_round_trip() {
        let now = now_utc();
        assert_eq!(parse_sql_time(&to_sql_time(&now)).unwrap(), now);
    }

    #[test]
    fn ensure_agent_reports_not_found() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.lock().unwrap();
        assert!(ensure_agent(&conn, "ghost").unwrap_err().is_not_found());
    }

    #[test]
    fn audit_rows_are_append_only() {
        let store = Store::open_in_memory().unwrap();
        let agent = store
            .insert_agent("bot", "", agentmolt_core::Metadata::new())
            .unwrap();
        store
            .append_event(&agentmolt_core::NewEvent::new(&agent.id, "search"))
            .unwrap();
        store
            .append_metric(&agent.id, &agentmolt_core::MetricSample::tokens(10))
            .unwrap();

        let conn = store.lock().unwrap();
        for sql in [
            "UPDATE events SET action = 'other'",
            "DELETE FROM events",
            "UPDATE metrics SET tokens_used = 0",
            "DELETE FROM metrics",
            "DELETE FROM agents",
        ] {
            assert!(conn.execute(sql, []).is_err(), "{sql} should be refused");
        }
    }

    #[test]
    fn corrupt_metadata_is_a_storage_error() {
        let store = Store::open_in_memory().unwrap();
        let agent = store
            .insert_agent("bot", "", agentmolt_core::Metadata::new())
            .unwrap();
        {
            let conn = store.lock().unwrap();
            conn.execute("UPDATE agents SET metadata_json = '{bad'", [])
                .unwrap();
            conn.execute(
                "INSERT INTO events (agent_id, action, status, metadata_json, created_at)
                 VALUES (?1, 'search', 'allowed', '{bad', ?2)",
                rusqlite::params![agent.id, to_sql_time(&now_utc())],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO metrics (agent_id, tokens_used, cost_micros, tool_calls, files_accessed, metadata_json, created_at)
                 VALUES (?1, 1, 0, 0, 0, '[1,', ?2)",
                rusqlite::params![agent.id, to_sql_time(&now_utc())],
            )
            .unwrap();
        }

        assert!(store.get_agent(&agent.id).unwrap_err().is_storage());
        assert!(store.list_agents().unwrap_err().is_storage());
        assert!(store.list_events(&agent.id).unwrap_err().is_storage());
        assert!(store.list_metrics(&agent.id).unwrap_err().is_storage());
        // Totals never read metadata.
        assert_eq!(store.cumulative(&agent.id).unwrap().samples, 1);
    }
}
