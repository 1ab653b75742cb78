use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::error::AppError;
use crate::model::{
    MemoryType, Observation, ObservationStatus, ResolutionAction, ResolutionEvent,
    SessionOriginType,
};

use super::{parse_ts, Store};

fn memory_type_from_str(s: &str) -> MemoryType {
    match s {
        "decision" => MemoryType::Decision,
        "bug_fix" => MemoryType::BugFix,
        "discovery" => MemoryType::Discovery,
        "trade_off" => MemoryType::TradeOff,
        "session_summary" => MemoryType::SessionSummary,
        _ => MemoryType::Gotcha,
    }
}

fn origin_from_str(s: &str) -> SessionOriginType {
    match s {
        "planning" => SessionOriginType::Planning,
        "investigation" => SessionOriginType::Investigation,
        "implementation" => SessionOriginType::Implementation,
        _ => SessionOriginType::Mixed,
    }
}

fn status_from_str(s: &str) -> ObservationStatus {
    match s {
        "resolved" => ObservationStatus::Resolved,
        "superseded" => ObservationStatus::Superseded,
        _ => ObservationStatus::Active,
    }
}

fn row_to_observation(row: &rusqlite::Row) -> rusqlite::Result<Observation> {
    let id: String = row.get("id")?;
    let memory_type: String = row.get("memory_type")?;
    let tags: String = row.get("tags")?;
    let source_session_id: Option<String> = row.get("source_session_id")?;
    let source_batch_id: Option<String> = row.get("source_batch_id")?;
    let status: String = row.get("status")?;
    let superseded_by: Option<String> = row.get("superseded_by")?;
    let origin: String = row.get("session_origin_type")?;
    let created_at: String = row.get("created_at")?;
    Ok(Observation {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        memory_type: memory_type_from_str(&memory_type),
        observation: row.get("observation")?,
        context: row.get("context")?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        source_session_id: source_session_id.and_then(|s| Uuid::parse_str(&s).ok()),
        source_batch_id: source_batch_id.and_then(|s| Uuid::parse_str(&s).ok()),
        source_machine_id: row.get("source_machine_id")?,
        status: status_from_str(&status),
        superseded_by: superseded_by.and_then(|s| Uuid::parse_str(&s).ok()),
        session_origin_type: origin_from_str(&origin),
        importance: row.get("importance")?,
        archived: row.get::<_, i64>("archived")? != 0,
        created_at: parse_ts(&created_at),
    })
}

impl Store {
    /// Inserts an observation. If one with the same dedup hash already
    /// exists, returns its id without inserting a duplicate row — this is
    /// what lets the same durable fact surface from two different agents or
    /// machines without cluttering memory search results.
    pub fn insert_observation(&self, observation: &Observation) -> Result<Uuid, AppError> {
        let hash = observation.dedup_hash();
        let importance = observation.capped_importance();
        let conn = self.conn.lock().expect("store mutex poisoned");

        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM observations WHERE dedup_hash = ?1",
                [&hash],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(existing_id) = existing {
            return Ok(Uuid::parse_str(&existing_id).unwrap_or(observation.id));
        }

        conn.execute(
            r#"
            INSERT INTO observations (
                id, memory_type, observation, context, tags, source_session_id, source_batch_id,
                source_machine_id, status, superseded_by, session_origin_type, importance,
                archived, created_at, dedup_hash
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                observation.id.to_string(),
                observation.memory_type.as_str(),
                observation.observation,
                observation.context,
                serde_json::to_string(&observation.tags).unwrap_or_else(|_| "[]".to_string()),
                observation.source_session_id.map(|s| s.to_string()),
                observation.source_batch_id.map(|s| s.to_string()),
                observation.source_machine_id,
                match observation.status {
                    ObservationStatus::Active => "active",
                    ObservationStatus::Resolved => "resolved",
                    ObservationStatus::Superseded => "superseded",
                },
                observation.superseded_by.map(|s| s.to_string()),
                match observation.session_origin_type {
                    SessionOriginType::Planning => "planning",
                    SessionOriginType::Investigation => "investigation",
                    SessionOriginType::Implementation => "implementation",
                    SessionOriginType::Mixed => "mixed",
                },
                importance,
                observation.archived as i64,
                observation.created_at.to_rfc3339(),
                hash,
            ],
        )?;
        Ok(observation.id)
    }

    pub fn get_observation(&self, id: Uuid) -> Result<Option<Observation>, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let observation = conn
            .query_row(
                "SELECT * FROM observations WHERE id = ?1",
                [id.to_string()],
                row_to_observation,
            )
            .optional()?;
        Ok(observation)
    }

    /// Transitions an observation's status and records a `ResolutionEvent`
    /// atomically. Reactivating a superseded observation requires the
    /// explicit `Reactivate` action; `Resolve`/`Supersede` on an already
    /// terminal observation is accepted idempotently.
    pub fn set_observation_status(
        &self,
        observation_id: Uuid,
        action: ResolutionAction,
        superseded_by: Option<Uuid>,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<(), AppError> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;

        let current_status: Option<String> = tx
            .query_row(
                "SELECT status FROM observations WHERE id = ?1",
                [observation_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current_status) = current_status else {
            return Err(AppError::NotFound(format!("observation {observation_id}")));
        };
        let current_status = status_from_str(&current_status);

        if current_status == ObservationStatus::Superseded
            && action != ResolutionAction::Reactivate
        {
            return Err(AppError::Conflict(format!(
                "observation {observation_id} is superseded; reactivate explicitly before resolving or superseding it again"
            )));
        }

        let new_status = match action {
            ResolutionAction::Resolve => "resolved",
            ResolutionAction::Supersede => "superseded",
            ResolutionAction::Reactivate => "active",
        };

        tx.execute(
            "UPDATE observations SET status = ?2, superseded_by = ?3 WHERE id = ?1",
            params![
                observation_id.to_string(),
                new_status,
                superseded_by.map(|s| s.to_string()),
            ],
        )?;

        let event = ResolutionEvent {
            id: Uuid::new_v4(),
            observation_id,
            action,
            reason: reason.map(|s| s.to_string()),
            actor: actor.to_string(),
            created_at: chrono::Utc::now(),
        };
        tx.execute(
            r#"
            INSERT INTO resolution_events (id, observation_id, action, reason, actor, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                event.id.to_string(),
                event.observation_id.to_string(),
                match event.action {
                    ResolutionAction::Resolve => "resolve",
                    ResolutionAction::Supersede => "supersede",
                    ResolutionAction::Reactivate => "reactivate",
                },
                event.reason,
                event.actor,
                event.created_at.to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    pub fn query_observations(
        &self,
        status: Option<ObservationStatus>,
        memory_type: Option<MemoryType>,
        context: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Observation>, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let status_str = status.map(|s| match s {
            ObservationStatus::Active => "active",
            ObservationStatus::Resolved => "resolved",
            ObservationStatus::Superseded => "superseded",
        });
        let type_str = memory_type.map(|t| t.as_str());
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM observations
            WHERE (?1 IS NULL OR status = ?1)
              AND (?2 IS NULL OR memory_type = ?2)
              AND (?3 IS NULL OR context = ?3)
            ORDER BY created_at DESC
            LIMIT ?4 OFFSET ?5
            "#,
        )?;
        let rows = stmt
            .query_map(
                params![status_str, type_str, context, limit as i64, offset as i64],
                row_to_observation,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn resolution_events_for_observation(
        &self,
        observation_id: Uuid,
    ) -> Result<Vec<ResolutionEvent>, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT * FROM resolution_events WHERE observation_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map([observation_id.to_string()], |row| {
                let id: String = row.get("id")?;
                let observation_id: String = row.get("observation_id")?;
                let action: String = row.get("action")?;
                let created_at: String = row.get("created_at")?;
                Ok(ResolutionEvent {
                    id: Uuid::parse_str(&id).unwrap_or_default(),
                    observation_id: Uuid::parse_str(&observation_id).unwrap_or_default(),
                    action: match action.as_str() {
                        "resolve" => ResolutionAction::Resolve,
                        "supersede" => ResolutionAction::Supersede,
                        _ => ResolutionAction::Reactivate,
                    },
                    reason: row.get("reason")?,
                    actor: row.get("actor")?,
                    created_at: parse_ts(&created_at),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_observation() -> Observation {
        Observation {
            id: Uuid::new_v4(),
            memory_type: MemoryType::Gotcha,
            observation: "sqlite requires foreign_keys pragma per connection".into(),
            context: Some("store".into()),
            tags: vec!["sqlite".into()],
            source_session_id: None,
            source_batch_id: None,
            source_machine_id: "m".into(),
            status: ObservationStatus::Active,
            superseded_by: None,
            session_origin_type: SessionOriginType::Implementation,
            importance: 7,
            archived: false,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn duplicate_observation_dedupes_to_same_id() {
        let store = Store::open_in_memory().unwrap();
        let a = sample_observation();
        let mut b = sample_observation();
        b.id = Uuid::new_v4();
        b.source_machine_id = "other-machine".into();

        let id_a = store.insert_observation(&a).unwrap();
        let id_b = store.insert_observation(&b).unwrap();
        assert_eq!(id_a, id_b);
    }

    #[test]
    fn importance_capped_for_planning_origin() {
        let store = Store::open_in_memory().unwrap();
        let mut obs = sample_observation();
        obs.session_origin_type = SessionOriginType::Planning;
        obs.importance = 9;
        let id = store.insert_observation(&obs).unwrap();
        let fetched = store.get_observation(id).unwrap().unwrap();
        assert_eq!(fetched.importance, 5);
    }

    #[test]
    fn superseded_observation_requires_explicit_reactivation() {
        let store = Store::open_in_memory().unwrap();
        let obs = sample_observation();
        let id = store.insert_observation(&obs).unwrap();
        store
            .set_observation_status(id, ResolutionAction::Supersede, None, None, "agent")
            .unwrap();

        let err = store
            .set_observation_status(id, ResolutionAction::Resolve, None, None, "agent")
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        store
            .set_observation_status(id, ResolutionAction::Reactivate, None, None, "agent")
            .unwrap();
        let fetched = store.get_observation(id).unwrap().unwrap();
        assert_eq!(fetched.status, ObservationStatus::Active);

        let events = store.resolution_events_for_observation(id).unwrap();
        assert_eq!(events.len(), 2);
    }
}
