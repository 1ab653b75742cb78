use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::error::AppError;
use crate::model::Plan;

use super::{now_rfc3339, parse_ts, Store};

fn row_to_plan(row: &rusqlite::Row) -> rusqlite::Result<Plan> {
    let id: String = row.get("id")?;
    let session_id: String = row.get("session_id")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(Plan {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        session_id: Uuid::parse_str(&session_id).unwrap_or_default(),
        title: row.get("title")?,
        file_path: row.get("file_path")?,
        content: row.get("content")?,
        content_hash: row.get("content_hash")?,
        embedded: row.get::<_, i64>("embedded")? != 0,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

impl Store {
    /// Captures or updates a plan. A plan is identified by `(session_id,
    /// file_path)` when `file_path` is set (the common case, a file written
    /// under a plan directory); otherwise by `id`. Re-capturing identical
    /// content (same `content_hash`) touches `updated_at` only and leaves
    /// `embedded` untouched, so the indexer doesn't re-embed unchanged plans.
    pub fn upsert_plan(&self, plan: &Plan) -> Result<Uuid, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");

        let existing_id: Option<String> = if let Some(file_path) = plan.file_path.as_deref() {
            conn.query_row(
                "SELECT id FROM plans WHERE session_id = ?1 AND file_path = ?2",
                params![plan.session_id.to_string(), file_path],
                |row| row.get(0),
            )
            .optional()?
        } else {
            None
        };

        if let Some(existing_id) = existing_id {
            let existing_hash: String = conn.query_row(
                "SELECT content_hash FROM plans WHERE id = ?1",
                [&existing_id],
                |row| row.get(0),
            )?;
            let content_changed = existing_hash != plan.content_hash;
            conn.execute(
                r#"
                UPDATE plans
                SET title = ?2, content = ?3, content_hash = ?4, updated_at = ?5,
                    embedded = CASE WHEN ?6 THEN 0 ELSE embedded END
                WHERE id = ?1
                "#,
                params![
                    existing_id,
                    plan.title,
                    plan.content,
                    plan.content_hash,
                    now_rfc3339(),
                    content_changed,
                ],
            )?;
            return Ok(Uuid::parse_str(&existing_id).unwrap_or(plan.id));
        }

        conn.execute(
            r#"
            INSERT INTO plans (
                id, session_id, title, file_path, content, content_hash, embedded,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                plan.id.to_string(),
                plan.session_id.to_string(),
                plan.title,
                plan.file_path,
                plan.content,
                plan.content_hash,
                plan.embedded as i64,
                plan.created_at.to_rfc3339(),
                plan.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(plan.id)
    }

    pub fn get_plan(&self, id: Uuid) -> Result<Option<Plan>, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let plan = conn
            .query_row("SELECT * FROM plans WHERE id = ?1", [id.to_string()], row_to_plan)
            .optional()?;
        Ok(plan)
    }

    pub fn list_plans_for_session(&self, session_id: Uuid) -> Result<Vec<Plan>, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt =
            conn.prepare("SELECT * FROM plans WHERE session_id = ?1 ORDER BY created_at ASC")?;
        let rows = stmt
            .query_map([session_id.to_string()], row_to_plan)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn find_plans_pending_embedding(&self, limit: usize) -> Result<Vec<Plan>, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT * FROM plans WHERE embedded = 0 ORDER BY updated_at ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], row_to_plan)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn mark_plan_embedded(&self, id: Uuid) -> Result<(), AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute("UPDATE plans SET embedded = 1 WHERE id = ?1", [id.to_string()])?;
        Ok(())
    }
}
