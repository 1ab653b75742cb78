use rusqlite::Connection;

use crate::error::AppError;

/// Schema version. Bump when adding a migration; migrations are ordered,
/// idempotent SQL blocks applied in sequence and recorded in
/// `schema_migrations` so re-opening the database never re-applies one.
pub const SCHEMA_VERSION: i32 = 2;

pub fn init_schema(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        "#,
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER PRIMARY KEY, applied_at TEXT NOT NULL)",
        [],
    )?;

    for (version, sql) in MIGRATIONS.iter().enumerate() {
        let version = version as i32 + 1;
        let already_applied: bool = conn
            .query_row(
                "SELECT 1 FROM schema_migrations WHERE version = ?1",
                [version],
                |_| Ok(true),
            )
            .unwrap_or(false);
        if already_applied {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, datetime('now'))",
            [version],
        )?;
    }

    Ok(())
}

const MIGRATIONS: &[&str] = &[r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    agent TEXT NOT NULL,
    source_machine_id TEXT NOT NULL,
    project_root TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    summary TEXT,
    title TEXT,
    title_manually_edited INTEGER NOT NULL DEFAULT 0,
    parent_session_id TEXT REFERENCES sessions(id),
    parent_reason TEXT,
    transcript_path TEXT,
    summary_embedded INTEGER NOT NULL DEFAULT 0,
    first_prompt_preview TEXT
);

CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
CREATE INDEX IF NOT EXISTS idx_sessions_parent ON sessions(parent_session_id);

CREATE TABLE IF NOT EXISTS prompt_batches (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    prompt_number INTEGER NOT NULL,
    user_prompt TEXT,
    source_type TEXT NOT NULL DEFAULT 'user',
    classification TEXT,
    plan_file_path TEXT,
    plan_content TEXT,
    response_summary TEXT,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    processed INTEGER NOT NULL DEFAULT 0,
    extraction_attempts INTEGER NOT NULL DEFAULT 0,
    extraction_error TEXT,
    UNIQUE(session_id, prompt_number)
);

CREATE INDEX IF NOT EXISTS idx_batches_session ON prompt_batches(session_id);
CREATE INDEX IF NOT EXISTS idx_batches_status ON prompt_batches(status);
CREATE INDEX IF NOT EXISTS idx_batches_processed ON prompt_batches(processed);

CREATE TABLE IF NOT EXISTS activities (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    prompt_batch_id TEXT REFERENCES prompt_batches(id),
    tool_name TEXT NOT NULL,
    tool_input TEXT NOT NULL,
    tool_output_summary TEXT,
    file_path TEXT,
    success INTEGER NOT NULL DEFAULT 1,
    error_message TEXT,
    tool_use_id TEXT,
    created_at TEXT NOT NULL,
    dedup_hash TEXT NOT NULL UNIQUE
);

CREATE INDEX IF NOT EXISTS idx_activities_session ON activities(session_id);
CREATE INDEX IF NOT EXISTS idx_activities_batch ON activities(prompt_batch_id);
CREATE INDEX IF NOT EXISTS idx_activities_created ON activities(created_at);

CREATE TABLE IF NOT EXISTS observations (
    id TEXT PRIMARY KEY,
    memory_type TEXT NOT NULL,
    observation TEXT NOT NULL,
    context TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    source_session_id TEXT REFERENCES sessions(id),
    source_batch_id TEXT REFERENCES prompt_batches(id),
    source_machine_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    superseded_by TEXT REFERENCES observations(id),
    session_origin_type TEXT NOT NULL DEFAULT 'mixed',
    importance INTEGER NOT NULL DEFAULT 5,
    archived INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    dedup_hash TEXT NOT NULL UNIQUE
);

CREATE INDEX IF NOT EXISTS idx_observations_status ON observations(status);
CREATE INDEX IF NOT EXISTS idx_observations_type ON observations(memory_type);
CREATE INDEX IF NOT EXISTS idx_observations_context ON observations(context);

CREATE TABLE IF NOT EXISTS resolution_events (
    id TEXT PRIMARY KEY,
    observation_id TEXT NOT NULL REFERENCES observations(id),
    action TEXT NOT NULL,
    reason TEXT,
    actor TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_resolution_events_obs ON resolution_events(observation_id);

CREATE TABLE IF NOT EXISTS plans (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    title TEXT NOT NULL,
    file_path TEXT,
    content TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    embedded INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_plans_session ON plans(session_id);

CREATE TABLE IF NOT EXISTS governance_audit_events (
    id TEXT PRIMARY KEY,
    session_id TEXT,
    tool_name TEXT NOT NULL,
    rule_name TEXT,
    decision TEXT NOT NULL,
    mode TEXT NOT NULL,
    message TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_governance_audit_created ON governance_audit_events(created_at);

CREATE TABLE IF NOT EXISTS cron_tasks (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    cron_expression TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    next_run_at TEXT,
    last_run_at TEXT
);

CREATE TABLE IF NOT EXISTS daemon_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#, r#"
CREATE TABLE IF NOT EXISTS file_index_state (
    file_path TEXT PRIMARY KEY,
    content_hash TEXT NOT NULL,
    chunk_count INTEGER NOT NULL DEFAULT 0,
    ast_success INTEGER NOT NULL DEFAULT 0,
    indexed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS file_index_chunks (
    file_path TEXT NOT NULL,
    chunk_id TEXT NOT NULL,
    PRIMARY KEY (file_path, chunk_id)
);

CREATE INDEX IF NOT EXISTS idx_file_index_chunks_path ON file_index_chunks(file_path);
"#];
