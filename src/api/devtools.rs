//! Maintenance endpoints for an operator or support flow, not the normal
//! request path: force a full reindex, unstick extraction, or rebuild the
//! memory vectors from the relational source of truth.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::error::AppError;
use crate::index::VectorNamespace;
use crate::indexer::engine::{rebuild_from_store, IndexStats};

use super::ServerState;

#[derive(Debug, Serialize)]
pub struct RebuildIndexResponse {
    pub files_scanned: usize,
    pub files_reindexed: usize,
    pub files_removed: usize,
    pub chunks_indexed: usize,
}

impl From<IndexStats> for RebuildIndexResponse {
    fn from(stats: IndexStats) -> Self {
        Self {
            files_scanned: stats.files_scanned,
            files_reindexed: stats.files_reindexed,
            files_removed: stats.files_removed,
            chunks_indexed: stats.chunks_indexed,
        }
    }
}

pub async fn rebuild_index(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<RebuildIndexResponse>, AppError> {
    let stats = rebuild_from_store(
        state.paths.project_root(),
        &state.config.indexer,
        &state.store,
        &state.embedder,
        &state.vector_index,
    )
    .await?;
    Ok(Json(stats.into()))
}

#[derive(Debug, Serialize)]
pub struct ResetProcessingResponse {
    pub batches_reset: usize,
}

pub async fn reset_processing(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<ResetProcessingResponse>, AppError> {
    let batches_reset = state
        .store
        .reset_stuck_extraction_attempts(state.config.pipeline.extraction_max_retries)?;
    Ok(Json(ResetProcessingResponse { batches_reset }))
}

#[derive(Debug, Serialize)]
pub struct RebuildMemoriesResponse {
    pub memories_reembedded: usize,
}

/// Re-embeds every active observation against the current embedding
/// provider — needed after switching embedding models, since old vectors
/// are no longer comparable to new queries.
pub async fn rebuild_memories(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<RebuildMemoriesResponse>, AppError> {
    state
        .vector_index
        .clear_namespace(VectorNamespace::Observation)
        .await?;

    let observations = state.store.query_observations(None, None, None, usize::MAX, 0)?;
    let mut reembedded = 0;
    for observation in observations {
        let embeddings = state
            .embedder
            .embed(&[format!("{} {}", observation.observation, observation.context.clone().unwrap_or_default())])
            .await?;
        let Some(vector) = embeddings.into_iter().next() else {
            continue;
        };
        state
            .vector_index
            .upsert(crate::index::VectorRecord {
                id: observation.id,
                namespace: VectorNamespace::Observation,
                embedding: vector,
                metadata: serde_json::json!({ "memory_type": observation.memory_type.as_str() }),
            })
            .await?;
        reembedded += 1;
    }
    Ok(Json(RebuildMemoriesResponse {
        memories_reembedded: reembedded,
    }))
}

#[derive(Debug, Serialize)]
pub struct CompactResponse {
    pub ok: bool,
}

pub async fn compact_chromadb(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<CompactResponse>, AppError> {
    state.vector_index.compact().await?;
    Ok(Json(CompactResponse { ok: true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::search::{remember, RememberRequest};
    use crate::api::test_support::test_state;

    #[tokio::test]
    async fn rebuild_index_reports_zero_files_for_an_empty_project() {
        let state = test_state();
        let response = rebuild_index(State(state)).await.unwrap();
        assert_eq!(response.0.files_scanned, 0);
    }

    #[tokio::test]
    async fn reset_processing_reports_zero_when_nothing_is_stuck() {
        let state = test_state();
        let response = reset_processing(State(state)).await.unwrap();
        assert_eq!(response.0.batches_reset, 0);
    }

    #[tokio::test]
    async fn rebuild_memories_reembeds_every_active_observation() {
        let state = test_state();
        remember(
            State(state.clone()),
            Json(RememberRequest {
                memory_type: "gotcha".to_string(),
                observation: "index drift after a force-push".to_string(),
                context: None,
                tags: vec![],
                importance: 5,
            }),
        )
        .await
        .unwrap();

        let response = rebuild_memories(State(state)).await.unwrap();
        assert_eq!(response.0.memories_reembedded, 1);
    }

    #[tokio::test]
    async fn compact_reports_ok() {
        let state = test_state();
        let response = compact_chromadb(State(state)).await.unwrap();
        assert!(response.0.ok);
    }
}
