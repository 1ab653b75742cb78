use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::error::AppError;
use crate::model::Activity;

use super::{parse_ts, Store};

fn row_to_activity(row: &rusqlite::Row) -> rusqlite::Result<Activity> {
    let id: String = row.get("id")?;
    let session_id: String = row.get("session_id")?;
    let prompt_batch_id: Option<String> = row.get("prompt_batch_id")?;
    let tool_input: String = row.get("tool_input")?;
    let created_at: String = row.get("created_at")?;
    Ok(Activity {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        session_id: Uuid::parse_str(&session_id).unwrap_or_default(),
        prompt_batch_id: prompt_batch_id.and_then(|s| Uuid::parse_str(&s).ok()),
        tool_name: row.get("tool_name")?,
        tool_input: serde_json::from_str(&tool_input).unwrap_or(serde_json::Value::Null),
        tool_output_summary: row.get("tool_output_summary")?,
        file_path: row.get("file_path")?,
        success: row.get::<_, i64>("success")? != 0,
        error_message: row.get("error_message")?,
        tool_use_id: row.get("tool_use_id")?,
        created_at: parse_ts(&created_at),
    })
}

/// Activities are keyed by session + tool_use_id when the agent provides
/// one (the common case — both `PostToolUse` and a duplicate retry of the
/// same tool call carry the same id), falling back to a content hash over
/// session/tool/file/input/minute-bucketed timestamp so hookless activity
/// still dedups reasonable near-duplicates.
fn dedup_hash(activity: &Activity) -> String {
    if let Some(tool_use_id) = activity.tool_use_id.as_deref() {
        return crate::hash::content_hash(&[
            activity.session_id.to_string().as_str(),
            "tool_use_id",
            tool_use_id,
        ]);
    }
    let minute_bucket = activity.created_at.format("%Y-%m-%dT%H:%M").to_string();
    crate::hash::content_hash(&[
        activity.session_id.to_string().as_str(),
        activity.tool_name.as_str(),
        activity.file_path.as_deref().unwrap_or(""),
        activity.tool_input.to_string().as_str(),
        minute_bucket.as_str(),
    ])
}

impl Store {
    /// Inserts an activity. If an activity with the same dedup hash already
    /// exists (duplicate hook delivery), returns the existing id instead of
    /// inserting a second row.
    pub fn append_activity(&self, activity: &Activity) -> Result<Uuid, AppError> {
        let hash = dedup_hash(activity);
        let conn = self.conn.lock().expect("store mutex poisoned");

        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM activities WHERE dedup_hash = ?1",
                [&hash],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(existing_id) = existing {
            return Ok(Uuid::parse_str(&existing_id).unwrap_or(activity.id));
        }

        conn.execute(
            r#"
            INSERT INTO activities (
                id, session_id, prompt_batch_id, tool_name, tool_input, tool_output_summary,
                file_path, success, error_message, tool_use_id, created_at, dedup_hash
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                activity.id.to_string(),
                activity.session_id.to_string(),
                activity.prompt_batch_id.map(|p| p.to_string()),
                activity.tool_name,
                activity.tool_input.to_string(),
                activity.tool_output_summary,
                activity.file_path,
                activity.success as i64,
                activity.error_message,
                activity.tool_use_id,
                activity.created_at.to_rfc3339(),
                hash,
            ],
        )?;
        Ok(activity.id)
    }

    pub fn list_activities_for_batch(
        &self,
        batch_id: Uuid,
    ) -> Result<Vec<Activity>, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT * FROM activities WHERE prompt_batch_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map([batch_id.to_string()], row_to_activity)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_activities_for_session(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<Activity>, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT * FROM activities WHERE session_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map([session_id.to_string()], row_to_activity)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Activities recorded after a session's last processed batch finished,
    /// not yet attached to any batch — orphans created when a tool call
    /// lands after `Stop` fires but before the next `UserPromptSubmit`.
    pub fn find_orphan_activities(&self, session_id: Uuid) -> Result<Vec<Activity>, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT * FROM activities WHERE session_id = ?1 AND prompt_batch_id IS NULL ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map([session_id.to_string()], row_to_activity)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn reattach_activity(&self, activity_id: Uuid, batch_id: Uuid) -> Result<(), AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "UPDATE activities SET prompt_batch_id = ?2 WHERE id = ?1",
            params![activity_id.to_string(), batch_id.to_string()],
        )?;
        Ok(())
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

    fn sample_activity(session_id: Uuid, tool_use_id: Option<&str>) -> Activity {
        Activity {
            id: Uuid::new_v4(),
            session_id,
            prompt_batch_id: None,
            tool_name: "Edit".into(),
            tool_input: serde_json::json!({"file_path": "src/main.rs"}),
            tool_output_summary: None,
            file_path: Some("src/main.rs".into()),
            success: true,
            error_message: None,
            tool_use_id: tool_use_id.map(|s| s.to_string()),
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn duplicate_tool_use_id_is_deduped() {
        let store = Store::open_in_memory().unwrap();
        let session_id = setup_session(&store);
        let first = sample_activity(session_id, Some("tu-1"));
        let second = sample_activity(session_id, Some("tu-1"));

        let first_id = store.append_activity(&first).unwrap();
        let second_id = store.append_activity(&second).unwrap();
        assert_eq!(first_id, second_id);

        let all = store.list_activities_for_session(session_id).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn orphan_activities_can_be_reattached() {
        use crate::model::{BatchSourceType, BatchStatus, PromptBatch};

        let store = Store::open_in_memory().unwrap();
        let session_id = setup_session(&store);
        let activity = sample_activity(session_id, Some("tu-2"));
        store.append_activity(&activity).unwrap();

        let orphans = store.find_orphan_activities(session_id).unwrap();
        assert_eq!(orphans.len(), 1);

        let batch = PromptBatch {
            id: Uuid::new_v4(),
            session_id,
            prompt_number: 1,
            user_prompt: None,
            source_type: BatchSourceType::User,
            classification: None,
            plan_file_path: None,
            plan_content: None,
            response_summary: None,
            started_at: chrono::Utc::now(),
            ended_at: None,
            status: BatchStatus::Active,
            processed: false,
        };
        store.begin_batch(&batch).unwrap();
        store.reattach_activity(activity.id, batch.id).unwrap();
        let orphans_after = store.find_orphan_activities(session_id).unwrap();
        assert!(orphans_after.is_empty());
    }
}
