use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::error::AppError;
use crate::model::{Session, SessionStatus};

use super::{now_rfc3339, parse_ts, Store};

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    let status: String = row.get("status")?;
    let id: String = row.get("id")?;
    let parent: Option<String> = row.get("parent_session_id")?;
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    Ok(Session {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        agent: row.get("agent")?,
        source_machine_id: row.get("source_machine_id")?,
        project_root: row.get("project_root")?,
        started_at: parse_ts(&started_at),
        ended_at: ended_at.as_deref().map(parse_ts),
        status: if status == "completed" {
            SessionStatus::Completed
        } else {
            SessionStatus::Active
        },
        summary: row.get("summary")?,
        title: row.get("title")?,
        title_manually_edited: row.get::<_, i64>("title_manually_edited")? != 0,
        parent_session_id: parent.and_then(|p| Uuid::parse_str(&p).ok()),
        parent_reason: row.get("parent_reason")?,
        transcript_path: row.get("transcript_path")?,
        summary_embedded: row.get::<_, i64>("summary_embedded")? != 0,
        first_prompt_preview: row.get("first_prompt_preview")?,
    })
}

impl Store {
    /// Creates or merges a session. On conflict by id, non-null incoming
    /// fields are merged; `title` is never clobbered once
    /// `title_manually_edited` is set.
    ///
    /// If `parent_session_id` is set, rejects the link if it would create a
    /// cycle in the session lineage DAG.
    pub fn upsert_session(&self, session: &Session) -> Result<(), AppError> {
        if let Some(parent_id) = session.parent_session_id {
            if self.would_create_cycle(session.id, parent_id)? {
                return Err(AppError::Conflict(format!(
                    "linking session {} to parent {} would create a lineage cycle",
                    session.id, parent_id
                )));
            }
        }

        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            r#"
            INSERT INTO sessions (
                id, agent, source_machine_id, project_root, started_at, ended_at,
                status, summary, title, title_manually_edited, parent_session_id,
                parent_reason, transcript_path, summary_embedded, first_prompt_preview
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(id) DO UPDATE SET
                agent = COALESCE(excluded.agent, agent),
                source_machine_id = COALESCE(excluded.source_machine_id, source_machine_id),
                project_root = COALESCE(excluded.project_root, project_root),
                ended_at = COALESCE(excluded.ended_at, ended_at),
                status = excluded.status,
                summary = COALESCE(excluded.summary, summary),
                title = CASE WHEN title_manually_edited = 1 THEN title ELSE COALESCE(excluded.title, title) END,
                title_manually_edited = title_manually_edited OR excluded.title_manually_edited,
                parent_session_id = COALESCE(excluded.parent_session_id, parent_session_id),
                parent_reason = COALESCE(excluded.parent_reason, parent_reason),
                transcript_path = COALESCE(excluded.transcript_path, transcript_path),
                summary_embedded = excluded.summary_embedded OR summary_embedded,
                first_prompt_preview = COALESCE(excluded.first_prompt_preview, first_prompt_preview)
            "#,
            params![
                session.id.to_string(),
                session.agent,
                session.source_machine_id,
                session.project_root,
                session.started_at.to_rfc3339(),
                session.ended_at.map(|t| t.to_rfc3339()),
                match session.status {
                    SessionStatus::Active => "active",
                    SessionStatus::Completed => "completed",
                },
                session.summary,
                session.title,
                session.title_manually_edited as i64,
                session.parent_session_id.map(|p| p.to_string()),
                session.parent_reason,
                session.transcript_path,
                session.summary_embedded as i64,
                session.first_prompt_preview,
            ],
        )?;
        Ok(())
    }

    /// Walks ancestors of `parent_id`; rejects if `child_id` already appears
    /// among them (would make the graph cyclic).
    fn would_create_cycle(&self, child_id: Uuid, parent_id: Uuid) -> Result<bool, AppError> {
        if child_id == parent_id {
            return Ok(true);
        }
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut current = Some(parent_id);
        let mut hops = 0;
        while let Some(cur) = current {
            if cur == child_id {
                return Ok(true);
            }
            hops += 1;
            if hops > 10_000 {
                // Defensive bound; a real cycle would have been caught already.
                return Ok(true);
            }
            current = conn
                .query_row(
                    "SELECT parent_session_id FROM sessions WHERE id = ?1",
                    [cur.to_string()],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?
                .flatten()
                .and_then(|s| Uuid::parse_str(&s).ok());
        }
        Ok(false)
    }

    /// Marks completed and stamps `ended_at`. Idempotent.
    pub fn end_session(&self, session_id: Uuid) -> Result<(), AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let updated = conn.execute(
            "UPDATE sessions SET status = 'completed', ended_at = COALESCE(ended_at, ?2) WHERE id = ?1",
            params![session_id.to_string(), now_rfc3339()],
        )?;
        if updated == 0 {
            return Err(AppError::NotFound(format!("session {session_id}")));
        }
        Ok(())
    }

    pub fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let session = conn
            .query_row(
                "SELECT * FROM sessions WHERE id = ?1",
                [session_id.to_string()],
                row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    pub fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Session>, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let status_str = status.map(|s| match s {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
        });
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM sessions
            WHERE (?1 IS NULL OR status = ?1)
            ORDER BY started_at DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )?;
        let rows = stmt
            .query_map(params![status_str, limit as i64, offset as i64], row_to_session)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Sessions with `status=active` whose last activity (or, absent any
    /// activity, `started_at`) is older than `cutoff`.
    pub fn find_stale_active_sessions(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            r#"
            SELECT s.id
            FROM sessions s
            WHERE s.status = 'active'
              AND COALESCE(
                    (SELECT MAX(a.created_at) FROM activities a WHERE a.session_id = s.id),
                    s.started_at
                  ) < ?1
            "#,
        )?;
        let ids = stmt
            .query_map([cutoff.to_rfc3339()], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .filter_map(|s| Uuid::parse_str(&s).ok())
            .collect();
        Ok(ids)
    }

    pub fn count_activity_for_session(&self, session_id: Uuid) -> Result<i64, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM activities WHERE session_id = ?1",
            [session_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count_batches_for_session(&self, session_id: Uuid) -> Result<i64, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM prompt_batches WHERE session_id = ?1",
            [session_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
