//! The memory engine: unifies the relational store and the vector index
//! into the ranked, capped retrieval the hook ingestion API injects back
//! into agent prompts.

mod ranking;

pub use ranking::{
    confidence_tier, doc_type_weight, ConfidenceTier, AUTO_RESOLVE_NO_CONTEXT_THRESHOLD,
    AUTO_RESOLVE_SAME_CONTEXT_THRESHOLD, LOW_CONFIDENCE_THRESHOLD,
};

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::error::AppError;
use crate::index::{Embedding, VectorIndex, VectorNamespace, VectorRecord};
use crate::model::{MemoryType, Observation, ObservationStatus, ResolutionAction};
use crate::providers::EmbeddingProvider;
use crate::store::Store;

/// How many nearest same-type active observations auto-resolve considers
/// per new insertion. Bounds the vector search instead of scanning every
/// active observation of that type in the relational store.
const AUTO_RESOLVE_CANDIDATE_TOP_K: usize = 20;

/// Injection caps from the context-building contract: at most this many
/// code chunks, memories, and session summaries are ever assembled into a
/// single prompt injection payload, regardless of how much the search
/// turns up.
pub const MAX_INJECTED_CODE_CHUNKS: usize = 3;
pub const MAX_INJECTED_CODE_CHUNK_LINES: usize = 50;
pub const MAX_INJECTED_MEMORIES: usize = 10;
pub const MAX_INJECTED_SESSION_SUMMARIES: usize = 5;

pub struct MemoryEngine {
    store: Arc<Store>,
    vector_index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ScoredObservation {
    pub observation: Observation,
    pub score: f32,
    pub tier: ConfidenceTier,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ScoredCodeHit {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub score: f32,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct InjectionPayload {
    pub code_chunks: Vec<ScoredCodeHit>,
    pub memories: Vec<ScoredObservation>,
    pub session_summaries: Vec<String>,
}

impl MemoryEngine {
    pub fn new(
        store: Arc<Store>,
        vector_index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            store,
            vector_index,
            embedder,
        }
    }

    /// Ranked, status-filtered, doc-type-weighted search over active
    /// observations for a free-text query.
    pub async fn search(
        &self,
        query: &str,
        memory_type: Option<MemoryType>,
        top_k: usize,
    ) -> Result<Vec<ScoredObservation>, AppError> {
        let embeddings = self.embedder.embed(&[query.to_string()]).await?;
        let Some(query_vector) = embeddings.into_iter().next() else {
            return Ok(Vec::new());
        };

        let hits = self
            .vector_index
            .search(VectorNamespace::Observation, &query_vector, top_k * 4)
            .await?;

        let mut scored = Vec::new();
        for hit in hits {
            let Some(observation) = self.store.get_observation(hit.id)? else {
                continue;
            };
            if observation.status != ObservationStatus::Active {
                continue;
            }
            if let Some(wanted) = memory_type {
                if observation.memory_type != wanted {
                    continue;
                }
            }
            let tier = confidence_tier(hit.score);
            scored.push(ScoredObservation {
                observation,
                score: hit.score,
                tier,
            });
        }

        scored.retain(|s| s.score >= LOW_CONFIDENCE_THRESHOLD);
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Assembles the capped injection payload for a new prompt batch: the
    /// closest code chunks, the highest-confidence active memories, and the
    /// most recent related session summaries, each bounded by the
    /// injection caps above.
    pub async fn context_for_task(&self, task_description: &str) -> Result<InjectionPayload, AppError> {
        let embeddings = self.embedder.embed(&[task_description.to_string()]).await?;
        let Some(query_vector) = embeddings.into_iter().next() else {
            return Ok(InjectionPayload::default());
        };

        let code_hits = self
            .vector_index
            .search(VectorNamespace::Code, &query_vector, MAX_INJECTED_CODE_CHUNKS * 3)
            .await?;
        let mut code_chunks: Vec<ScoredCodeHit> = code_hits
            .into_iter()
            .filter_map(|hit| {
                let file_path = hit.metadata.get("file_path")?.as_str()?.to_string();
                let start_line = hit.metadata.get("start_line")?.as_u64()? as usize;
                let end_line = hit.metadata.get("end_line")?.as_u64()? as usize;
                let content = hit.metadata.get("content")?.as_str()?.to_string();
                let doc_type = hit
                    .metadata
                    .get("doc_type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("code");
                let weighted_score = hit.score * doc_type_weight(doc_type);
                Some(ScoredCodeHit {
                    file_path,
                    start_line,
                    end_line: end_line.min(start_line + MAX_INJECTED_CODE_CHUNK_LINES - 1),
                    content: content
                        .lines()
                        .take(MAX_INJECTED_CODE_CHUNK_LINES)
                        .collect::<Vec<_>>()
                        .join("\n"),
                    score: weighted_score,
                })
            })
            .collect();
        code_chunks.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        code_chunks.truncate(MAX_INJECTED_CODE_CHUNKS);

        let memories = self
            .search(task_description, None, MAX_INJECTED_MEMORIES)
            .await?;

        let summary_hits = self
            .vector_index
            .search(VectorNamespace::SessionSummary, &query_vector, MAX_INJECTED_SESSION_SUMMARIES)
            .await?;
        let session_summaries = summary_hits
            .into_iter()
            .filter_map(|hit| hit.metadata.get("summary")?.as_str().map(|s| s.to_string()))
            .take(MAX_INJECTED_SESSION_SUMMARIES)
            .collect();

        Ok(InjectionPayload {
            code_chunks,
            memories,
            session_summaries,
        })
    }

    /// Inserts a freshly extracted observation, embeds it into the vector
    /// index, and runs auto-resolve against existing active observations of
    /// the same memory type. Returns the id of the stored row — the dedup
    /// hash's existing id if this is a repeat, in which case nothing further
    /// happens (no re-embedding, no auto-resolve pass).
    pub async fn record_observation(&self, observation: Observation) -> Result<Uuid, AppError> {
        let stored_id = self.store.insert_observation(&observation)?;
        if stored_id != observation.id {
            return Ok(stored_id);
        }

        let embed_text = match &observation.context {
            Some(context) => format!("{context}\n{}", observation.observation),
            None => observation.observation.clone(),
        };
        let embeddings = self.embedder.embed(&[embed_text]).await?;
        if let Some(vector) = embeddings.into_iter().next() {
            self.vector_index
                .upsert(VectorRecord {
                    id: observation.id,
                    namespace: VectorNamespace::Observation,
                    embedding: vector.clone(),
                    metadata: json!({
                        "memory_type": observation.memory_type.as_str(),
                        "context": observation.context,
                    }),
                })
                .await?;
            self.auto_resolve_against_existing(&observation, &vector).await?;
        }

        Ok(stored_id)
    }

    /// Compares a new observation against the top-K nearest same-type active
    /// observations already in the vector index; any older one whose cosine
    /// similarity crosses the threshold for their shared-context status is
    /// superseded by the new one. Same-file/same-context pairs need only
    /// cross 0.85; unrelated-context pairs need 0.92. Candidates come from
    /// the index rather than a full relational scan, and their similarity is
    /// read off the index's own embeddings rather than re-embedded here —
    /// re-embedding on every insertion could drift from what the index
    /// actually holds if the embedding model or text normalization changes.
    async fn auto_resolve_against_existing(
        &self,
        new_obs: &Observation,
        new_vector: &Embedding,
    ) -> Result<(), AppError> {
        let hits = self
            .vector_index
            .search(VectorNamespace::Observation, new_vector, AUTO_RESOLVE_CANDIDATE_TOP_K)
            .await?;

        for hit in hits {
            if hit.id == new_obs.id {
                continue;
            }
            let Some(candidate) = self.store.get_observation(hit.id)? else {
                continue;
            };
            if candidate.status != ObservationStatus::Active || candidate.memory_type != new_obs.memory_type {
                continue;
            }

            let same_context = new_obs.context.is_some() && candidate.context == new_obs.context;
            let threshold = if same_context {
                AUTO_RESOLVE_SAME_CONTEXT_THRESHOLD
            } else {
                AUTO_RESOLVE_NO_CONTEXT_THRESHOLD
            };

            if hit.score >= threshold {
                let (older, newer) = if candidate.created_at <= new_obs.created_at {
                    (candidate.id, new_obs.id)
                } else {
                    (new_obs.id, candidate.id)
                };
                self.store.set_observation_status(
                    older,
                    ResolutionAction::Supersede,
                    Some(newer),
                    Some("auto-resolved: superseded by a near-duplicate observation"),
                    "auto-resolve",
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{Embedding, SqliteVectorIndex};
    use async_trait::async_trait;

    /// Returns a fixed vector per call count so the first two embedded texts
    /// come out near-identical (for auto-resolve) and any later ones differ.
    struct ScriptedEmbedder {
        vectors: std::sync::Mutex<std::collections::VecDeque<Embedding>>,
        default: Embedding,
    }

    #[async_trait]
    impl EmbeddingProvider for ScriptedEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>, AppError> {
            let mut queue = self.vectors.lock().unwrap();
            Ok(texts
                .iter()
                .map(|_| queue.pop_front().unwrap_or_else(|| self.default.clone()))
                .collect())
        }
    }

    fn engine_with(vectors: Vec<Embedding>) -> (MemoryEngine, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let vector_index: Arc<dyn VectorIndex> =
            Arc::new(SqliteVectorIndex::open_in_memory().unwrap());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(ScriptedEmbedder {
            vectors: std::sync::Mutex::new(vectors.into()),
            default: vec![0.0, 1.0],
        });
        (MemoryEngine::new(store.clone(), vector_index, embedder), store)
    }

    fn sample_observation(text: &str, context: Option<&str>) -> Observation {
        Observation {
            id: Uuid::new_v4(),
            memory_type: MemoryType::Gotcha,
            observation: text.to_string(),
            context: context.map(|s| s.to_string()),
            tags: Vec::new(),
            source_session_id: None,
            source_batch_id: None,
            source_machine_id: "m".into(),
            status: ObservationStatus::Active,
            superseded_by: None,
            session_origin_type: crate::model::SessionOriginType::Implementation,
            importance: 5,
            archived: false,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn near_duplicate_same_context_supersedes_the_older_one() {
        let (engine, store) = engine_with(vec![vec![1.0, 0.0], vec![0.999, 0.001]]);
        let first = sample_observation("retry flaky network calls", Some("tests"));
        let first_id = engine.record_observation(first.clone()).await.unwrap();

        let mut second = first.clone();
        second.id = Uuid::new_v4();
        second.observation = "retry flaky network calls in CI".to_string();
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        let second_id = engine.record_observation(second).await.unwrap();

        let first_row = store.get_observation(first_id).unwrap().unwrap();
        assert_eq!(first_row.status, ObservationStatus::Superseded);
        assert_eq!(first_row.superseded_by, Some(second_id));
    }

    #[tokio::test]
    async fn dissimilar_observations_both_stay_active() {
        let (engine, store) = engine_with(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let first = sample_observation("retry flaky network calls", Some("tests"));
        let first_id = engine.record_observation(first).await.unwrap();

        let mut second = sample_observation("migrate auth middleware", Some("tests"));
        second.created_at = chrono::Utc::now() + chrono::Duration::seconds(1);
        engine.record_observation(second).await.unwrap();

        let first_row = store.get_observation(first_id).unwrap().unwrap();
        assert_eq!(first_row.status, ObservationStatus::Active);
    }

    #[tokio::test]
    async fn search_drops_scores_below_the_low_confidence_threshold() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let vector_index: Arc<dyn VectorIndex> =
            Arc::new(SqliteVectorIndex::open_in_memory().unwrap());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(ScriptedEmbedder {
            vectors: std::sync::Mutex::new(vec![vec![1.0, 0.0]].into()),
            default: vec![1.0, 0.0],
        });
        let engine = MemoryEngine::new(store.clone(), vector_index.clone(), embedder);

        let observation = sample_observation("a fact nobody asked about", None);
        let id = store.insert_observation(&observation).unwrap();
        vector_index
            .upsert(VectorRecord {
                id,
                namespace: VectorNamespace::Observation,
                embedding: vec![0.0, 1.0],
                metadata: json!({}),
            })
            .await
            .unwrap();

        let results = engine.search("unrelated query", None, 10).await.unwrap();
        assert!(results.is_empty());
    }
}
