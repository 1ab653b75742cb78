use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{cosine_similarity, Embedding, VectorIndex, VectorNamespace, VectorRecord, VectorSearchHit};
use crate::error::AppError;

/// Brute-force cosine-similarity vector index backed by SQLite. Every
/// search scans the namespace's rows and ranks by cosine similarity —
/// fine up to tens of thousands of vectors, which covers a single
/// project's code chunks and memory comfortably.
pub struct SqliteVectorIndex {
    conn: Mutex<Connection>,
}

impl SqliteVectorIndex {
    pub fn open(db_path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), AppError> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            CREATE TABLE IF NOT EXISTS vectors (
                id TEXT NOT NULL,
                namespace TEXT NOT NULL,
                embedding BLOB NOT NULL,
                metadata TEXT NOT NULL,
                PRIMARY KEY (namespace, id)
            );
            "#,
        )?;
        Ok(())
    }

    fn encode(embedding: &Embedding) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(embedding.len() * 4);
        for v in embedding {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes
    }

    fn decode(bytes: &[u8]) -> Embedding {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, record: VectorRecord) -> Result<(), AppError> {
        let conn = self.conn.lock().expect("vector index mutex poisoned");
        conn.execute(
            r#"
            INSERT INTO vectors (id, namespace, embedding, metadata) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(namespace, id) DO UPDATE SET embedding = excluded.embedding, metadata = excluded.metadata
            "#,
            params![
                record.id.to_string(),
                record.namespace.as_str(),
                Self::encode(&record.embedding),
                record.metadata.to_string(),
            ],
        )?;
        Ok(())
    }

    async fn delete(&self, namespace: VectorNamespace, id: Uuid) -> Result<(), AppError> {
        let conn = self.conn.lock().expect("vector index mutex poisoned");
        conn.execute(
            "DELETE FROM vectors WHERE namespace = ?1 AND id = ?2",
            params![namespace.as_str(), id.to_string()],
        )?;
        Ok(())
    }

    async fn search(
        &self,
        namespace: VectorNamespace,
        query: &Embedding,
        top_k: usize,
    ) -> Result<Vec<VectorSearchHit>, AppError> {
        let conn = self.conn.lock().expect("vector index mutex poisoned");
        let mut stmt =
            conn.prepare("SELECT id, embedding, metadata FROM vectors WHERE namespace = ?1")?;
        let mut hits: Vec<VectorSearchHit> = stmt
            .query_map([namespace.as_str()], |row| {
                let id: String = row.get(0)?;
                let embedding: Vec<u8> = row.get(1)?;
                let metadata: String = row.get(2)?;
                Ok((id, embedding, metadata))
            })?
            .filter_map(|r| r.ok())
            .map(|(id, embedding, metadata)| {
                let vector = Self::decode(&embedding);
                let score = cosine_similarity(query, &vector);
                VectorSearchHit {
                    id: Uuid::parse_str(&id).unwrap_or_default(),
                    score,
                    metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn clear_namespace(&self, namespace: VectorNamespace) -> Result<(), AppError> {
        let conn = self.conn.lock().expect("vector index mutex poisoned");
        conn.execute("DELETE FROM vectors WHERE namespace = ?1", [namespace.as_str()])?;
        Ok(())
    }

    async fn compact(&self) -> Result<(), AppError> {
        let conn = self.conn.lock().expect("vector index mutex poisoned");
        conn.execute("VACUUM", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: Uuid, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id,
            namespace: VectorNamespace::Code,
            embedding,
            metadata: serde_json::json!({"file_path": "src/lib.rs"}),
        }
    }

    #[tokio::test]
    async fn search_ranks_closest_vector_first() {
        let index = SqliteVectorIndex::open_in_memory().unwrap();
        let near = Uuid::new_v4();
        let far = Uuid::new_v4();
        index.upsert(rec(near, vec![1.0, 0.0, 0.0])).await.unwrap();
        index.upsert(rec(far, vec![0.0, 1.0, 0.0])).await.unwrap();

        let hits = index
            .search(VectorNamespace::Code, &vec![0.9, 0.1, 0.0], 2)
            .await
            .unwrap();
        assert_eq!(hits[0].id, near);
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_vector() {
        let index = SqliteVectorIndex::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        index.upsert(rec(id, vec![1.0, 0.0])).await.unwrap();
        index.upsert(rec(id, vec![0.0, 1.0])).await.unwrap();

        let hits = index
            .search(VectorNamespace::Code, &vec![0.0, 1.0], 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn clear_namespace_removes_all_vectors() {
        let index = SqliteVectorIndex::open_in_memory().unwrap();
        index.upsert(rec(Uuid::new_v4(), vec![1.0, 0.0])).await.unwrap();
        index.clear_namespace(VectorNamespace::Code).await.unwrap();
        let hits = index
            .search(VectorNamespace::Code, &vec![1.0, 0.0], 5)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
