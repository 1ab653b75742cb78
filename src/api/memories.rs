//! Browsing and lifecycle management for extracted memories: listing with
//! filters, and the manual resolve/supersede/reactivate actions a user
//! triggers from a UI after reviewing what the pipeline extracted.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::model::{MemoryType, Observation, ObservationStatus, ResolutionAction};

use super::ServerState;

#[derive(Debug, Deserialize)]
pub struct ListMemoriesQuery {
    pub status: Option<String>,
    pub memory_type: Option<String>,
    pub context: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

fn parse_status(raw: Option<&str>) -> Option<ObservationStatus> {
    match raw? {
        "active" => Some(ObservationStatus::Active),
        "resolved" => Some(ObservationStatus::Resolved),
        "superseded" => Some(ObservationStatus::Superseded),
        _ => None,
    }
}

fn parse_memory_type(raw: Option<&str>) -> Option<MemoryType> {
    match raw? {
        "gotcha" => Some(MemoryType::Gotcha),
        "decision" => Some(MemoryType::Decision),
        "bug_fix" => Some(MemoryType::BugFix),
        "discovery" => Some(MemoryType::Discovery),
        "trade_off" => Some(MemoryType::TradeOff),
        "session_summary" => Some(MemoryType::SessionSummary),
        _ => None,
    }
}

pub async fn list_memories(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<ListMemoriesQuery>,
) -> Result<Json<Vec<Observation>>, AppError> {
    let observations = state.store.query_observations(
        parse_status(params.status.as_deref()),
        parse_memory_type(params.memory_type.as_deref()),
        params.context.as_deref(),
        params.limit,
        params.offset,
    )?;
    Ok(Json(observations))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub action: String,
    pub superseded_by: Option<Uuid>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpdateStatusResponse {
    pub ok: bool,
}

pub async fn update_status(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<UpdateStatusResponse>, AppError> {
    let action = match req.action.as_str() {
        "resolve" => ResolutionAction::Resolve,
        "supersede" => ResolutionAction::Supersede,
        "reactivate" => ResolutionAction::Reactivate,
        other => return Err(AppError::Validation(format!("unknown action '{other}'"))),
    };
    state.store.set_observation_status(
        id,
        action,
        req.superseded_by,
        req.reason.as_deref(),
        "api",
    )?;
    Ok(Json(UpdateStatusResponse { ok: true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::search::{remember, RememberRequest};
    use crate::api::test_support::test_state;

    async fn remember_one(state: &Arc<ServerState>) -> Uuid {
        remember(
            State(state.clone()),
            Json(RememberRequest {
                memory_type: "decision".to_string(),
                observation: "use sqlite for the vector index".to_string(),
                context: None,
                tags: vec![],
                importance: 5,
            }),
        )
        .await
        .unwrap()
        .0
        .id
    }

    #[tokio::test]
    async fn list_memories_returns_what_was_remembered() {
        let state = test_state();
        remember_one(&state).await;

        let listed = list_memories(
            State(state),
            Query(ListMemoriesQuery {
                status: None,
                memory_type: None,
                context: None,
                limit: 50,
                offset: 0,
            }),
        )
        .await
        .unwrap();
        assert_eq!(listed.0.len(), 1);
    }

    #[tokio::test]
    async fn update_status_resolves_and_then_filters_out_by_status() {
        let state = test_state();
        let id = remember_one(&state).await;

        update_status(
            State(state.clone()),
            Path(id),
            Json(UpdateStatusRequest {
                action: "resolve".to_string(),
                superseded_by: None,
                reason: Some("no longer relevant".to_string()),
            }),
        )
        .await
        .unwrap();

        let active = list_memories(
            State(state.clone()),
            Query(ListMemoriesQuery {
                status: Some("active".to_string()),
                memory_type: None,
                context: None,
                limit: 50,
                offset: 0,
            }),
        )
        .await
        .unwrap();
        assert!(active.0.is_empty());

        let resolved = list_memories(
            State(state),
            Query(ListMemoriesQuery {
                status: Some("resolved".to_string()),
                memory_type: None,
                context: None,
                limit: 50,
                offset: 0,
            }),
        )
        .await
        .unwrap();
        assert_eq!(resolved.0.len(), 1);
    }

    #[tokio::test]
    async fn update_status_rejects_unknown_action() {
        let state = test_state();
        let id = remember_one(&state).await;
        let err = update_status(
            State(state),
            Path(id),
            Json(UpdateStatusRequest {
                action: "delete".to_string(),
                superseded_by: None,
                reason: None,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
