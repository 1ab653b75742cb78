//! Read-side browsing of sessions/batches/activities, plus the one mutation
//! this surface exposes directly: force-completing a session a hook never
//! got to close out cleanly (the pipeline's stale-session recovery handles
//! the automatic case; this is the manual override).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::model::{Activity, PromptBatch, Session, SessionStatus};

use super::ServerState;

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

fn parse_status(raw: Option<&str>) -> Option<SessionStatus> {
    match raw? {
        "active" => Some(SessionStatus::Active),
        "completed" => Some(SessionStatus::Completed),
        _ => None,
    }
}

pub async fn list_sessions(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<ListSessionsQuery>,
) -> Result<Json<Vec<Session>>, AppError> {
    let sessions = state.store.list_sessions(
        parse_status(params.status.as_deref()),
        params.limit,
        params.offset,
    )?;
    Ok(Json(sessions))
}

#[derive(Debug, Serialize)]
pub struct SessionDetail {
    pub session: Session,
    pub batches: Vec<PromptBatch>,
    pub activities: Vec<Activity>,
}

pub async fn get_session(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionDetail>, AppError> {
    let session = state
        .store
        .get_session(id)?
        .ok_or_else(|| AppError::NotFound(format!("session {id}")))?;
    let batches = state.store.list_batches_for_session(id)?;
    let activities = state.store.list_activities_for_session(id)?;
    Ok(Json(SessionDetail {
        session,
        batches,
        activities,
    }))
}

#[derive(Debug, Serialize)]
pub struct CompleteSessionResponse {
    pub ok: bool,
}

pub async fn complete_session(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CompleteSessionResponse>, AppError> {
    state.store.end_session(id)?;
    Ok(Json(CompleteSessionResponse { ok: true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::test_state;

    fn sample_session(id: Uuid) -> Session {
        Session {
            id,
            agent: "claude-code".to_string(),
            source_machine_id: "m".to_string(),
            project_root: "/tmp/project".to_string(),
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
        }
    }

    #[tokio::test]
    async fn get_session_reports_not_found_for_unknown_id() {
        let state = test_state();
        let err = get_session(State(state), Path(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_sessions_filters_by_status() {
        let state = test_state();
        let active_id = Uuid::new_v4();
        state.store.upsert_session(&sample_session(active_id)).unwrap();
        let completed_id = Uuid::new_v4();
        let mut completed = sample_session(completed_id);
        completed.status = SessionStatus::Completed;
        completed.ended_at = Some(chrono::Utc::now());
        state.store.upsert_session(&completed).unwrap();

        let active = list_sessions(
            State(state.clone()),
            Query(ListSessionsQuery {
                status: Some("active".to_string()),
                limit: 50,
                offset: 0,
            }),
        )
        .await
        .unwrap();
        assert_eq!(active.0.len(), 1);
        assert_eq!(active.0[0].id, active_id);

        let all = list_sessions(
            State(state),
            Query(ListSessionsQuery {
                status: None,
                limit: 50,
                offset: 0,
            }),
        )
        .await
        .unwrap();
        assert_eq!(all.0.len(), 2);
    }

    #[tokio::test]
    async fn complete_session_marks_it_completed() {
        let state = test_state();
        let id = Uuid::new_v4();
        state.store.upsert_session(&sample_session(id)).unwrap();

        complete_session(State(state.clone()), Path(id)).await.unwrap();

        let detail = get_session(State(state), Path(id)).await.unwrap();
        assert_eq!(detail.0.session.status, SessionStatus::Completed);
    }
}
