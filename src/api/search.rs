//! Direct memory/context retrieval endpoints — the same underlying
//! `MemoryEngine` calls the hook handlers make, exposed for a CLI or UI to
//! call on demand rather than only as a side effect of hook delivery.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::memory::{InjectionPayload, ScoredObservation};
use crate::model::{MemoryType, Observation, ObservationStatus, SessionOriginType};

use super::ServerState;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub memory_type: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

#[derive(Debug, Serialize)]
pub struct SearchHit {
    pub id: Uuid,
    pub memory_type: &'static str,
    pub observation: String,
    pub context: Option<String>,
    pub score: f32,
    pub tier: &'static str,
}

fn to_hit(scored: ScoredObservation) -> SearchHit {
    SearchHit {
        id: scored.observation.id,
        memory_type: scored.observation.memory_type.as_str(),
        observation: scored.observation.observation,
        context: scored.observation.context,
        score: scored.score,
        tier: match scored.tier {
            crate::memory::ConfidenceTier::High => "high",
            crate::memory::ConfidenceTier::Medium => "medium",
            crate::memory::ConfidenceTier::Low => "low",
        },
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

pub async fn search_get(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<SearchHit>>, AppError> {
    let memory_type = parse_memory_type(params.memory_type.as_deref());
    let hits = state.memory.search(&params.q, memory_type, params.limit).await?;
    Ok(Json(hits.into_iter().map(to_hit).collect()))
}

pub async fn search_post(
    State(state): State<Arc<ServerState>>,
    Json(params): Json<SearchQuery>,
) -> Result<Json<Vec<SearchHit>>, AppError> {
    let memory_type = parse_memory_type(params.memory_type.as_deref());
    let hits = state.memory.search(&params.q, memory_type, params.limit).await?;
    Ok(Json(hits.into_iter().map(to_hit).collect()))
}

#[derive(Debug, Deserialize)]
pub struct FetchRequest {
    pub id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct FetchResponse {
    pub observation: Option<Observation>,
}

pub async fn fetch(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<FetchRequest>,
) -> Result<Json<FetchResponse>, AppError> {
    let observation = state.store.get_observation(req.id)?;
    Ok(Json(FetchResponse { observation }))
}

#[derive(Debug, Deserialize)]
pub struct RememberRequest {
    pub memory_type: String,
    pub observation: String,
    pub context: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_importance")]
    pub importance: i32,
}

fn default_importance() -> i32 {
    5
}

#[derive(Debug, Serialize)]
pub struct RememberResponse {
    pub id: Uuid,
}

/// Manually-authored memories (as opposed to ones extracted from a
/// finished session) have no `source_session_id`/`source_batch_id` and are
/// attributed directly to this machine.
pub async fn remember(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<RememberRequest>,
) -> Result<Json<RememberResponse>, AppError> {
    let memory_type = parse_memory_type(Some(&req.memory_type))
        .ok_or_else(|| AppError::Validation(format!("unknown memory_type '{}'", req.memory_type)))?;

    let observation = Observation {
        id: Uuid::new_v4(),
        memory_type,
        observation: req.observation,
        context: req.context,
        tags: req.tags,
        source_session_id: None,
        source_batch_id: None,
        source_machine_id: state.source_machine_id.clone(),
        status: ObservationStatus::Active,
        superseded_by: None,
        session_origin_type: SessionOriginType::Mixed,
        importance: req.importance.clamp(1, 10),
        archived: false,
        created_at: chrono::Utc::now(),
    };
    let id = state.memory.record_observation(observation).await?;
    Ok(Json(RememberResponse { id }))
}

#[derive(Debug, Deserialize)]
pub struct ContextRequest {
    pub task_description: String,
}

pub async fn context(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<ContextRequest>,
) -> Result<Json<InjectionPayload>, AppError> {
    let payload = state.memory.context_for_task(&req.task_description).await?;
    Ok(Json(payload))
}
