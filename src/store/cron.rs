use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::error::AppError;

use super::{now_rfc3339, parse_ts, Store};

/// A persisted row from `cron_tasks`. Mirrors `scheduler::cron_tasks::CronTask`
/// plus the identity and run-history columns the in-memory type doesn't
/// need to carry.
#[derive(Debug, Clone)]
pub struct CronTaskRow {
    pub id: Uuid,
    pub name: String,
    pub cron_expression: String,
    pub enabled: bool,
    pub next_run_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_run_at: Option<chrono::DateTime<chrono::Utc>>,
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<CronTaskRow> {
    let id: String = row.get("id")?;
    let next_run_at: Option<String> = row.get("next_run_at")?;
    let last_run_at: Option<String> = row.get("last_run_at")?;
    Ok(CronTaskRow {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        name: row.get("name")?,
        cron_expression: row.get("cron_expression")?,
        enabled: row.get::<_, i64>("enabled")? != 0,
        next_run_at: next_run_at.map(|s| parse_ts(&s)),
        last_run_at: last_run_at.map(|s| parse_ts(&s)),
    })
}

impl Store {
    pub fn list_cron_tasks(&self) -> Result<Vec<CronTaskRow>, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare("SELECT * FROM cron_tasks ORDER BY name ASC")?;
        let rows = stmt
            .query_map([], row_to_task)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn upsert_cron_task(&self, task: &CronTaskRow) -> Result<(), AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            r#"
            INSERT INTO cron_tasks (id, name, cron_expression, enabled, next_run_at, last_run_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                cron_expression = excluded.cron_expression,
                enabled = excluded.enabled,
                next_run_at = excluded.next_run_at,
                last_run_at = excluded.last_run_at
            "#,
            params![
                task.id.to_string(),
                task.name,
                task.cron_expression,
                task.enabled as i64,
                task.next_run_at.map(|t| t.to_rfc3339()),
                task.last_run_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Records that `id` just dispatched: stamps `last_run_at` to now and
    /// `next_run_at` to the schedule's following occurrence (`None` if the
    /// expression has no further occurrences).
    pub fn record_cron_dispatch(
        &self,
        id: Uuid,
        next_run_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<(), AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "UPDATE cron_tasks SET last_run_at = ?2, next_run_at = ?3 WHERE id = ?1",
            params![
                id.to_string(),
                now_rfc3339(),
                next_run_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task(enabled: bool) -> CronTaskRow {
        CronTaskRow {
            id: Uuid::new_v4(),
            name: "reindex-sweep".into(),
            cron_expression: "0 0 * * * *".into(),
            enabled,
            next_run_at: None,
            last_run_at: None,
        }
    }

    #[test]
    fn upserted_task_round_trips_through_list() {
        let store = Store::open_in_memory().unwrap();
        let task = sample_task(true);
        store.upsert_cron_task(&task).unwrap();

        let listed = store.list_cron_tasks().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "reindex-sweep");
        assert!(listed[0].enabled);
    }

    #[test]
    fn recording_a_dispatch_updates_run_timestamps() {
        let store = Store::open_in_memory().unwrap();
        let task = sample_task(true);
        store.upsert_cron_task(&task).unwrap();

        let next = chrono::Utc::now() + chrono::Duration::hours(1);
        store.record_cron_dispatch(task.id, Some(next)).unwrap();

        let listed = store.list_cron_tasks().unwrap();
        assert!(listed[0].last_run_at.is_some());
        assert!(listed[0].next_run_at.is_some());
    }
}
