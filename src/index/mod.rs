//! Vector index abstraction for semantic code/memory retrieval. Kept behind
//! a trait so the daemon can swap in a native ANN backend later without
//! touching callers — the default implementation is a SQLite-backed
//! brute-force cosine search, adequate at single-project scale and free of
//! any native extension beyond the bundled SQLite already pulled in by the
//! relational store.

mod sqlite;

pub use sqlite::SqliteVectorIndex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

pub type Embedding = Vec<f32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorNamespace {
    Code,
    Observation,
    Plan,
    SessionSummary,
}

impl VectorNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorNamespace::Code => "code",
            VectorNamespace::Observation => "observation",
            VectorNamespace::Plan => "plan",
            VectorNamespace::SessionSummary => "session_summary",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: Uuid,
    pub namespace: VectorNamespace,
    pub embedding: Embedding,
    /// Opaque metadata carried alongside the vector (file path, doc type,
    /// observation id, etc.) — serialized as JSON so different namespaces
    /// can attach different shapes without a schema migration.
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSearchHit {
    pub id: Uuid,
    pub score: f32,
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, record: VectorRecord) -> Result<(), AppError>;
    async fn delete(&self, namespace: VectorNamespace, id: Uuid) -> Result<(), AppError>;
    async fn search(
        &self,
        namespace: VectorNamespace,
        query: &Embedding,
        top_k: usize,
    ) -> Result<Vec<VectorSearchHit>, AppError>;
    /// Drops and rebuilds a namespace from scratch — used after a backup
    /// restore, or when the embedding model changes and every vector in
    /// the index is stale.
    async fn clear_namespace(&self, namespace: VectorNamespace) -> Result<(), AppError>;
    /// Compacts on-disk storage. A brute-force index has nothing to
    /// rebalance, but deleted rows still occupy pages until this runs.
    async fn compact(&self) -> Result<(), AppError>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
