use agentmolt_core::{
    cost_to_micros, micros_to_cost, Error, Event, EventStatus, Metric, MetricSample, NewEvent,
    Result, UsageTotals,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::str::FromStr;
use tracing::debug;

use crate::{ensure_agent, now_utc, parse_sql_time, storage_err, to_sql_count, to_sql_time, Store};

struct EventRow {
    id: i64,
    agent_id: String,
    action: String,
    target: Option<String>,
    status: String,
    metadata_json: String,
    created_at: String,
}

impl EventRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            agent_id: row.get(1)?,
            action: row.get(2)?,
            target: row.get(3)?,
            status: row.get(4)?,
            metadata_json: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_event(self) -> Result<Event> {
        Ok(Event {
            status: EventStatus::from_str(&self.status)
                .map_err(|_| Error::storage(format!("invalid event status {:?}", self.status)))?,
            metadata: serde_json::from_str(&self.metadata_json).map_err(|e| {
                Error::storage(format!("invalid metadata for event {}: {e}", self.id))
            })?,
            timestamp: parse_sql_time(&self.created_at)?,
            id: self.id,
            agent_id: self.agent_id,
            action: self.action,
            target: self.target,
        })
    }
}

struct MetricRow {
    id: i64,
    agent_id: String,
    tokens_used: i64,
    cost_micros: i64,
    tool_calls: i64,
    files_accessed: i64,
    metadata_json: String,
    created_at: String,
}

impl MetricRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            agent_id: row.get(1)?,
            tokens_used: row.get(2)?,
            cost_micros: row.get(3)?,
            tool_calls: row.get(4)?,
            files_accessed: row.get(5)?,
            metadata_json: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_metric(self) -> Result<Metric> {
        Ok(Metric {
            metadata: serde_json::from_str(&self.metadata_json).map_err(|e| {
                Error::storage(format!("invalid metadata for metric {}: {e}", self.id))
            })?,
            timestamp: parse_sql_time(&self.created_at)?,
            id: self.id,
            agent_id: self.agent_id,
            tokens_used: self.tokens_used.max(0) as u64,
            cost: micros_to_cost(self.cost_micros),
            tool_calls: self.tool_calls.max(0) as u64,
            files_accessed: self.files_accessed.max(0) as u64,
        })
    }
}

/// Sum every committed metric row of an agent, as seen by `conn`. Totals
/// saturate instead of failing, so one huge row never blocks later reads.
fn sum_metrics(conn: &Connection, agent_id: &str) -> Result<UsageTotals> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT tokens_used, cost_micros, tool_calls, files_accessed
             FROM metrics WHERE agent_id = ?1",
        )
        .map_err(storage_err)?;
    let mut rows = stmt.query([agent_id]).map_err(storage_err)?;

    let mut cost_micros: i64 = 0;
    let mut totals = UsageTotals::default();
    while let Some(r) = rows.next().map_err(storage_err)? {
        let column = |i: usize| -> Result<i64> { Ok(r.get::<_, i64>(i).map_err(storage_err)?.max(0)) };
        totals.total_tokens = totals.total_tokens.saturating_add(column(0)? as u64);
        cost_micros = cost_micros.saturating_add(column(1)?);
        totals.total_tool_calls = totals.total_tool_calls.saturating_add(column(2)? as u64);
        totals.total_files_accessed = totals.total_files_accessed.saturating_add(column(3)? as u64);
        totals.samples += 1;
    }
    totals.total_cost = micros_to_cost(cost_micros);
    Ok(totals)
}

/// A validated metric ready for insertion.
struct MetricInsert {
    tokens_used: i64,
    cost_micros: i64,
    tool_calls: i64,
    files_accessed: i64,
    metadata_json: String,
}

impl MetricInsert {
    fn new(sample: &MetricSample) -> Result<Self> {
        Ok(Self {
            cost_micros: cost_to_micros(sample.cost)?,
            tokens_used: to_sql_count("tokens_used", sample.tokens_used)?,
            tool_calls: to_sql_count("tool_calls", sample.tool_calls)?,
            files_accessed: to_sql_count("files_accessed", sample.files_accessed)?,
            metadata_json: serde_json::to_string(&sample.metadata)?,
        })
    }

    fn execute(&self, conn: &Connection, agent_id: &str, stamp: &str) -> Result<i64> {
        ensure_agent(conn, agent_id)?;
        conn.execute(
            "INSERT INTO metrics (agent_id, tokens_used, cost_micros, tool_calls, files_accessed, metadata_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                agent_id,
                self.tokens_used,
                self.cost_micros,
                self.tool_calls,
                self.files_accessed,
                self.metadata_json,
                stamp,
            ],
        )
        .map_err(storage_err)?;
        Ok(conn.last_insert_rowid())
    }

    fn into_metric(
        self,
        id: i64,
        agent_id: &str,
        sample: &MetricSample,
        timestamp: DateTime<Utc>,
    ) -> Metric {
        Metric {
            id,
            agent_id: agent_id.to_string(),
            tokens_used: sample.tokens_used,
            cost: micros_to_cost(self.cost_micros),
            tool_calls: sample.tool_calls,
            files_accessed: sample.files_accessed,
            metadata: sample.metadata.clone(),
            timestamp,
        }
    }
}

impl Store {
    // --- Events ---

    pub fn append_event(&self, event: &NewEvent) -> Result<Event> {
        if event.action.trim().is_empty() {
            return Err(Error::validation("event action must not be empty"));
        }
        let metadata_json = serde_json::to_string(&event.metadata)?;
        let now = now_utc();
        let id = self.write(|conn| {
            ensure_agent(conn, &event.agent_id)?;
            conn.execute(
                "INSERT INTO events (agent_id, action, target, status, metadata_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.agent_id,
                    event.action,
                    event.target,
                    event.status.as_str(),
                    metadata_json,
                    to_sql_time(&now),
                ],
            )
            .map_err(storage_err)?;
            Ok(conn.last_insert_rowid())
        })?;
        debug!("Event {} appended for agent {}: {}", id, event.agent_id, event.action);
        Ok(Event {
            id,
            agent_id: event.agent_id.clone(),
            action: event.action.clone(),
            target: event.target.clone(),
            status: event.status,
            metadata: event.metadata.clone(),
            timestamp: now,
        })
    }

    /// Events of one agent in insertion order.
    pub fn list_events(&self, agent_id: &str) -> Result<Vec<Event>> {
        let conn = self.lock()?;
        ensure_agent(&conn, agent_id)?;
        let mut stmt = conn
            .prepare(
                "SELECT id, agent_id, action, target, status, metadata_json, created_at
                 FROM events WHERE agent_id = ?1 ORDER BY id ASC",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([agent_id], EventRow::read)
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;
        rows.into_iter().map(EventRow::into_event).collect()
    }

    // --- Metrics ---

    /// Append one metric row. Independent of every other row.
    pub fn append_metric(&self, agent_id: &str, sample: &MetricSample) -> Result<Metric> {
        let insert = MetricInsert::new(sample)?;
        let now = now_utc();
        let id = self.write(|conn| insert.execute(conn, agent_id, &to_sql_time(&now)))?;
        debug!("Metric {} appended for agent {}", id, agent_id);
        Ok(insert.into_metric(id, agent_id, sample, now))
    }

    /// Append a metric row and read the agent's updated totals in the same
    /// transaction, so concurrent writers never observe a half-applied sum.
    pub fn append_metric_with_totals(
        &self,
        agent_id: &str,
        sample: &MetricSample,
    ) -> Result<(Metric, UsageTotals)> {
        let insert = MetricInsert::new(sample)?;
        let now = now_utc();
        let (id, totals) = self.write(|conn| {
            let id = insert.execute(conn, agent_id, &to_sql_time(&now))?;
            Ok((id, sum_metrics(conn, agent_id)?))
        })?;
        debug!(
            "Metric {} appended for agent {} (total cost {}, total tokens {})",
            id, agent_id, totals.total_cost, totals.total_tokens
        );
        Ok((insert.into_metric(id, agent_id, sample, now), totals))
    }

    /// Metrics of one agent in insertion order.
    pub fn list_metrics(&self, agent_id: &str) -> Result<Vec<Metric>> {
        let conn = self.lock()?;
        ensure_agent(&conn, agent_id)?;
        let mut stmt = conn
            .prepare(
                "SELECT id, agent_id, tokens_used, cost_micros, tool_calls, files_accessed, metadata_json, created_at
                 FROM metrics WHERE agent_id = ?1 ORDER BY id ASC",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([agent_id], MetricRow::read)
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;
        rows.into_iter().map(MetricRow::into_metric).collect()
    }

    /// Totals over every committed metric row of the agent at call time.
    pub fn cumulative(&self, agent_id: &str) -> Result<UsageTotals> {
        let conn = self.lock()?;
        ensure_agent(&conn, agent_id)?;
        sum_metrics(&conn, agent_id)
    }
}
