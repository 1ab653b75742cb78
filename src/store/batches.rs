use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::error::AppError;
use crate::model::{BatchSourceType, BatchStatus, PromptBatch};

use super::{now_rfc3339, parse_ts, Store};

fn row_to_batch(row: &rusqlite::Row) -> rusqlite::Result<PromptBatch> {
    let id: String = row.get("id")?;
    let session_id: String = row.get("session_id")?;
    let source_type: String = row.get("source_type")?;
    let status: String = row.get("status")?;
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    Ok(PromptBatch {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        session_id: Uuid::parse_str(&session_id).unwrap_or_default(),
        prompt_number: row.get("prompt_number")?,
        user_prompt: row.get("user_prompt")?,
        source_type: match source_type.as_str() {
            "agent_notification" => BatchSourceType::AgentNotification,
            "plan" => BatchSourceType::Plan,
            "system" => BatchSourceType::System,
            _ => BatchSourceType::User,
        },
        classification: row.get("classification")?,
        plan_file_path: row.get("plan_file_path")?,
        plan_content: row.get("plan_content")?,
        response_summary: row.get("response_summary")?,
        started_at: parse_ts(&started_at),
        ended_at: ended_at.as_deref().map(parse_ts),
        status: if status == "completed" {
            BatchStatus::Completed
        } else {
            BatchStatus::Active
        },
        processed: row.get::<_, i64>("processed")? != 0,
    })
}

fn source_type_str(t: BatchSourceType) -> &'static str {
    match t {
        BatchSourceType::User => "user",
        BatchSourceType::AgentNotification => "agent_notification",
        BatchSourceType::Plan => "plan",
        BatchSourceType::System => "system",
    }
}

impl Store {
    /// Starts a new prompt batch for a session. Rejects with `Conflict` if
    /// the session already has an active batch — a session must finish one
    /// batch before another begins.
    pub fn begin_batch(&self, batch: &PromptBatch) -> Result<(), AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");

        let existing_active: Option<String> = conn
            .query_row(
                "SELECT id FROM prompt_batches WHERE session_id = ?1 AND status = 'active'",
                [batch.session_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(existing_id) = existing_active {
            if existing_id != batch.id.to_string() {
                return Err(AppError::Conflict(format!(
                    "session {} already has an active batch ({existing_id})",
                    batch.session_id
                )));
            }
        }

        conn.execute(
            r#"
            INSERT INTO prompt_batches (
                id, session_id, prompt_number, user_prompt, source_type, classification,
                plan_file_path, plan_content, response_summary, started_at, ended_at,
                status, processed
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(id) DO NOTHING
            "#,
            params![
                batch.id.to_string(),
                batch.session_id.to_string(),
                batch.prompt_number,
                batch.user_prompt,
                source_type_str(batch.source_type),
                batch.classification,
                batch.plan_file_path,
                batch.plan_content,
                batch.response_summary,
                batch.started_at.to_rfc3339(),
                batch.ended_at.map(|t| t.to_rfc3339()),
                match batch.status {
                    BatchStatus::Active => "active",
                    BatchStatus::Completed => "completed",
                },
                batch.processed as i64,
            ],
        )?;
        Ok(())
    }

    /// Next sequential `prompt_number` for a session (1-based).
    pub fn next_prompt_number(&self, session_id: Uuid) -> Result<i64, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(prompt_number) FROM prompt_batches WHERE session_id = ?1",
            [session_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0) + 1)
    }

    /// Completes a batch. Idempotent: completing an already-completed batch
    /// is a no-op. Returns `NotFound` if the batch does not exist.
    pub fn complete_batch(
        &self,
        batch_id: Uuid,
        response_summary: Option<&str>,
    ) -> Result<(), AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let updated = conn.execute(
            r#"
            UPDATE prompt_batches
            SET status = 'completed',
                ended_at = COALESCE(ended_at, ?2),
                response_summary = COALESCE(?3, response_summary)
            WHERE id = ?1
            "#,
            params![batch_id.to_string(), now_rfc3339(), response_summary],
        )?;
        if updated == 0 {
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM prompt_batches WHERE id = ?1",
                    [batch_id.to_string()],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);
            if !exists {
                return Err(AppError::NotFound(format!("prompt batch {batch_id}")));
            }
        }
        Ok(())
    }

    pub fn mark_batch_processed(&self, batch_id: Uuid) -> Result<(), AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "UPDATE prompt_batches SET processed = 1 WHERE id = ?1",
            [batch_id.to_string()],
        )?;
        Ok(())
    }

    pub fn record_extraction_attempt(
        &self,
        batch_id: Uuid,
        error: Option<&str>,
    ) -> Result<(), AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            r#"
            UPDATE prompt_batches
            SET extraction_attempts = extraction_attempts + 1,
                extraction_error = ?2
            WHERE id = ?1
            "#,
            params![batch_id.to_string(), error],
        )?;
        Ok(())
    }

    pub fn get_batch(&self, batch_id: Uuid) -> Result<Option<PromptBatch>, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let batch = conn
            .query_row(
                "SELECT * FROM prompt_batches WHERE id = ?1",
                [batch_id.to_string()],
                row_to_batch,
            )
            .optional()?;
        Ok(batch)
    }

    pub fn list_batches_for_session(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<PromptBatch>, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT * FROM prompt_batches WHERE session_id = ?1 ORDER BY prompt_number ASC",
        )?;
        let rows = stmt
            .query_map([session_id.to_string()], row_to_batch)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Active batches whose `started_at` is older than `cutoff` — candidates
    /// for forced finalization by the background pipeline.
    pub fn find_stuck_batches(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id FROM prompt_batches WHERE status = 'active' AND started_at < ?1",
        )?;
        let ids = stmt
            .query_map([cutoff.to_rfc3339()], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .filter_map(|s| Uuid::parse_str(&s).ok())
            .collect();
        Ok(ids)
    }

    /// Completed, unprocessed batches — candidates for observation
    /// extraction, ordered oldest first and bounded by `max_retries`.
    pub fn find_batches_pending_extraction(
        &self,
        max_retries: u32,
        limit: usize,
    ) -> Result<Vec<PromptBatch>, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM prompt_batches
            WHERE status = 'completed' AND processed = 0 AND extraction_attempts < ?1
            ORDER BY started_at ASC
            LIMIT ?2
            "#,
        )?;
        let rows = stmt
            .query_map(params![max_retries, limit as i64], row_to_batch)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Clears extraction attempt counters and errors on every batch that
    /// exhausted its retries, letting the next pipeline tick pick them back
    /// up. Used by the reset-processing devtool after fixing a provider
    /// outage that had stalled extraction.
    pub fn reset_stuck_extraction_attempts(&self, max_retries: u32) -> Result<usize, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let affected = conn.execute(
            r#"
            UPDATE prompt_batches
            SET extraction_attempts = 0, extraction_error = NULL
            WHERE status = 'completed' AND processed = 0 AND extraction_attempts >= ?1
            "#,
            [max_retries],
        )?;
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Session;
    use crate::model::SessionStatus;

    fn setup_session(store: &Store) -> Uuid {
        let id = Uuid::new_v4();
        store
            .upsert_session(&Session {
                id,
                agent: "claude-code".into(),
                source_machine_id: "m".into(),
                project_root: "/tmp".into(),
                started_at: chrono::Utc::now(),
                ended_at: None,
                status: SessionStatus::Active,
                summary: None,
                title: None,
                title_manually_edited: false,
                parent_session_id: None,
                parent_reason: None,
                transcript_path: None,
                summary_embedded: false,
                first_prompt_preview: None,
            })
            .unwrap();
        id
    }

    fn sample_batch(session_id: Uuid, prompt_number: i64) -> PromptBatch {
        PromptBatch {
            id: Uuid::new_v4(),
            session_id,
            prompt_number,
            user_prompt: Some("do the thing".into()),
            source_type: BatchSourceType::User,
            classification: None,
            plan_file_path: None,
            plan_content: None,
            response_summary: None,
            started_at: chrono::Utc::now(),
            ended_at: None,
            status: BatchStatus::Active,
            processed: false,
        }
    }

    #[test]
    fn rejects_second_active_batch_for_same_session() {
        let store = Store::open_in_memory().unwrap();
        let session_id = setup_session(&store);
        store.begin_batch(&sample_batch(session_id, 1)).unwrap();
        let err = store
            .begin_batch(&sample_batch(session_id, 2))
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn complete_batch_is_idempotent_and_not_found_is_reported() {
        let store = Store::open_in_memory().unwrap();
        let session_id = setup_session(&store);
        let batch = sample_batch(session_id, 1);
        store.begin_batch(&batch).unwrap();
        store.complete_batch(batch.id, Some("done")).unwrap();
        store.complete_batch(batch.id, None).unwrap();

        let fetched = store.get_batch(batch.id).unwrap().unwrap();
        assert_eq!(fetched.status, BatchStatus::Completed);
        assert_eq!(fetched.response_summary.as_deref(), Some("done"));

        let err = store.complete_batch(Uuid::new_v4(), None).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn reset_stuck_extraction_attempts_clears_only_batches_past_the_retry_ceiling() {
        let store = Store::open_in_memory().unwrap();
        let session_id = setup_session(&store);

        let mut exhausted = sample_batch(session_id, 1);
        exhausted.status = BatchStatus::Completed;
        store.begin_batch(&exhausted).unwrap();
        for _ in 0..3 {
            store.record_extraction_attempt(exhausted.id, Some("provider unreachable")).unwrap();
        }

        let mut fresh = sample_batch(session_id, 2);
        fresh.status = BatchStatus::Completed;
        store.begin_batch(&fresh).unwrap();
        store.record_extraction_attempt(fresh.id, Some("transient")).unwrap();

        // Before the reset, the exhausted batch has fallen out of the
        // pending-extraction pool while the fresh one is still in it.
        let pending_before = store.find_batches_pending_extraction(3, 10).unwrap();
        assert!(pending_before.iter().any(|b| b.id == fresh.id));
        assert!(!pending_before.iter().any(|b| b.id == exhausted.id));

        let reset = store.reset_stuck_extraction_attempts(3).unwrap();
        assert_eq!(reset, 1);

        let pending_after = store.find_batches_pending_extraction(3, 10).unwrap();
        assert!(pending_after.iter().any(|b| b.id == exhausted.id));
        assert!(pending_after.iter().any(|b| b.id == fresh.id));

        // Running it again is a no-op: nothing is at or past the ceiling.
        let reset_again = store.reset_stuck_extraction_attempts(3).unwrap();
        assert_eq!(reset_again, 0);
    }
}
