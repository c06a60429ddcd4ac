//! SQLite schema for the local store

/// Bumped whenever `SCHEMA` changes shape. Stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS agents (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  id TEXT NOT NULL UNIQUE,
  name TEXT NOT NULL,
  model TEXT NOT NULL DEFAULT '',
  status TEXT NOT NULL DEFAULT 'idle'
    CHECK (status IN ('idle','running','stopped','failed','killed')),
  metadata_json TEXT NOT NULL DEFAULT '{}',
  killed INTEGER NOT NULL DEFAULT 0 CHECK (killed IN (0,1)),
  killed_at TEXT,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS events (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  agent_id TEXT NOT NULL,
  action TEXT NOT NULL,
  target TEXT,
  status TEXT NOT NULL DEFAULT 'allowed'
    CHECK (status IN ('allowed','denied','started','failed')),
  metadata_json TEXT NOT NULL DEFAULT '{}',
  created_at TEXT NOT NULL,
  FOREIGN KEY (agent_id) REFERENCES agents(id)
);
CREATE INDEX IF NOT EXISTS idx_events_agent ON events(agent_id, id);

CREATE TABLE IF NOT EXISTS metrics (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  agent_id TEXT NOT NULL,
  tokens_used INTEGER NOT NULL DEFAULT 0 CHECK (tokens_used >= 0),
  cost_micros INTEGER NOT NULL DEFAULT 0 CHECK (cost_micros >= 0),
  tool_calls INTEGER NOT NULL DEFAULT 0 CHECK (tool_calls >= 0),
  files_accessed INTEGER NOT NULL DEFAULT 0 CHECK (files_accessed >= 0),
  metadata_json TEXT NOT NULL DEFAULT '{}',
  created_at TEXT NOT NULL,
  FOREIGN KEY (agent_id) REFERENCES agents(id)
);
CREATE INDEX IF NOT EXISTS idx_metrics_agent ON metrics(agent_id, id);

CREATE TABLE IF NOT EXISTS policies (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  kind TEXT NOT NULL CHECK (kind IN ('denylist','allowlist','cost_limit','token_limit')),
  value TEXT NOT NULL,
  agent_id TEXT,
  created_at TEXT NOT NULL,
  FOREIGN KEY (agent_id) REFERENCES agents(id)
);

CREATE TRIGGER IF NOT EXISTS trg_agents_no_delete
BEFORE DELETE ON agents
BEGIN
  SELECT RAISE(FAIL, 'agents are never deleted');
END;

CREATE TRIGGER IF NOT EXISTS trg_events_no_update
BEFORE UPDATE ON events
BEGIN
  SELECT RAISE(FAIL, 'events is append-only');
END;
CREATE TRIGGER IF NOT EXISTS trg_events_no_delete
BEFORE DELETE ON events
BEGIN
  SELECT RAISE(FAIL, 'events is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_metrics_no_update
BEFORE UPDATE ON metrics
BEGIN
  SELECT RAISE(FAIL, 'metrics is append-only');
END;
CREATE TRIGGER IF NOT EXISTS trg_metrics_no_delete
BEFORE DELETE ON metrics
BEGIN
  SELECT RAISE(FAIL, 'metrics is append-only');
END;
";
