//! The activity store: a durable relational store (SQLite via `rusqlite`)
//! tying together sessions, prompt batches, activities, observations,
//! resolution events, plans, and governance audit events.
//!
//! All mutations run inside a single transaction; the connection is
//! guarded by a `Mutex` since `rusqlite::Connection` is not `Sync` and the
//! spec requires writes to be serialized through one lane regardless.

pub mod activities;
pub mod backup;
pub mod batches;
pub mod cron;
pub mod governance_audit;
pub mod index_state;
pub mod observations;
pub mod plans;
pub mod schema;
pub mod sessions;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use crate::error::AppError;

pub struct Store {
    conn: Mutex<Connection>,
    install_root: String,
}

impl Store {
    pub fn open(db_path: &Path, install_root: &str) -> Result<Self, AppError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        schema::init_schema(&conn)?;
        let store = Self {
            conn: Mutex::new(conn),
            install_root: install_root.to_string(),
        };
        store.check_install_root()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            install_root: "test".to_string(),
        })
    }

    /// Warns (but does not fail) if the recorded package installation root
    /// differs from the current one — a stale-installation signal.
    fn check_install_root(&self) -> Result<(), AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let recorded: Option<String> = conn
            .query_row(
                "SELECT value FROM daemon_meta WHERE key = 'install_root'",
                [],
                |row| row.get(0),
            )
            .ok();
        match recorded {
            Some(ref prev) if prev != &self.install_root => {
                tracing::warn!(
                    "install root changed from {prev} to {}; paths recorded in this store may be stale",
                    self.install_root
                );
            }
            None => {
                conn.execute(
                    "INSERT INTO daemon_meta (key, value) VALUES ('install_root', ?1)",
                    [&self.install_root],
                )?;
            }
            _ => {}
        }
        Ok(())
    }

    pub fn vacuum(&self) -> Result<(), AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute("VACUUM", [])?;
        Ok(())
    }
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub(crate) fn parse_ts(s: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now())
}
