//! Ties the walker, chunker, embedding provider, and vector index together
//! into the two operations everything else calls: a full project rebuild
//! and a single-file incremental reindex triggered by the file watcher.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::config::IndexerConfig;
use crate::error::AppError;
use crate::index::{VectorIndex, VectorNamespace, VectorRecord};
use crate::model::CodeChunk;
use crate::providers::EmbeddingProvider;
use crate::store::Store;

use super::chunker::chunk_file;
use super::walker::walk_project;

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexStats {
    pub files_scanned: usize,
    pub files_reindexed: usize,
    pub files_unchanged: usize,
    pub files_removed: usize,
    pub chunks_indexed: usize,
}

/// Walks the whole project, skipping any file whose content hash matches
/// what was recorded the last time it was indexed, and removes index
/// entries for files that disappeared since the last pass.
pub async fn index_project(
    root: &Path,
    config: &IndexerConfig,
    store: &Store,
    embedder: &Arc<dyn EmbeddingProvider>,
    vector_index: &Arc<dyn VectorIndex>,
) -> Result<IndexStats, AppError> {
    let walked = walk_project(root, &config.exclude);
    let mut stats = IndexStats {
        files_scanned: walked.len(),
        ..Default::default()
    };

    let mut seen_paths = std::collections::HashSet::new();
    for file in &walked {
        seen_paths.insert(file.relative_path.clone());
        let content = match std::fs::read_to_string(&file.path) {
            Ok(c) => c,
            Err(_) => continue, // binary or unreadable, silently skipped
        };
        let content_hash = crate::hash::file_content_hash(content.as_bytes());
        let previous_hash = store.get_indexed_file_hash(&file.relative_path)?;
        if previous_hash.as_deref() == Some(content_hash.as_str()) {
            stats.files_unchanged += 1;
            continue;
        }

        let chunks = chunk_file(
            &file.relative_path,
            &file.language,
            &content,
            file.doc_type,
            config.max_chunk_lines,
        );
        let chunk_count =
            reindex_chunks(&file.relative_path, chunks, store, embedder, vector_index).await?;
        store.record_indexed_file(&file.relative_path, &content_hash, chunk_count, true)?;
        stats.files_reindexed += 1;
        stats.chunks_indexed += chunk_count;
    }

    for tracked in store.list_indexed_file_paths()? {
        if !seen_paths.contains(&tracked) {
            remove_file_from_index(&tracked, store, vector_index).await?;
            stats.files_removed += 1;
        }
    }

    Ok(stats)
}

/// Re-chunks and re-embeds a single file, called by the file watcher when a
/// change survives debounce. Returns `None` if the path isn't one the
/// indexer tracks (unsupported language, or now excluded).
pub async fn reindex_file(
    root: &Path,
    relative_path: &str,
    config: &IndexerConfig,
    store: &Store,
    embedder: &Arc<dyn EmbeddingProvider>,
    vector_index: &Arc<dyn VectorIndex>,
) -> Result<Option<IndexStats>, AppError> {
    let absolute = root.join(relative_path);
    let Some(language) = super::walker::language_for_path(&absolute) else {
        remove_file_from_index(relative_path, store, vector_index).await?;
        return Ok(None);
    };
    let Ok(content) = std::fs::read_to_string(&absolute) else {
        remove_file_from_index(relative_path, store, vector_index).await?;
        return Ok(None);
    };

    let content_hash = crate::hash::file_content_hash(content.as_bytes());
    if store.get_indexed_file_hash(relative_path)?.as_deref() == Some(content_hash.as_str()) {
        return Ok(Some(IndexStats {
            files_scanned: 1,
            files_unchanged: 1,
            ..Default::default()
        }));
    }

    let doc_type = classify_for_watch(relative_path);
    let chunks = chunk_file(relative_path, &language, &content, doc_type, config.max_chunk_lines);
    let chunk_count = reindex_chunks(relative_path, chunks, store, embedder, vector_index).await?;
    store.record_indexed_file(relative_path, &content_hash, chunk_count, true)?;

    Ok(Some(IndexStats {
        files_scanned: 1,
        files_reindexed: 1,
        chunks_indexed: chunk_count,
        ..Default::default()
    }))
}

pub async fn remove_file_from_index(
    relative_path: &str,
    store: &Store,
    vector_index: &Arc<dyn VectorIndex>,
) -> Result<(), AppError> {
    for chunk_id in store.list_chunk_ids_for_file(relative_path)? {
        vector_index.delete(VectorNamespace::Code, chunk_id).await?;
    }
    store.clear_chunk_ids_for_file(relative_path)?;
    store.forget_indexed_file(relative_path)?;
    Ok(())
}

/// Drops every stored content hash and code vector, forcing the next
/// `index_project` call to treat the whole tree as changed. Used by the
/// rebuild-index devtool and after a backup restore.
pub async fn rebuild_from_store(
    root: &Path,
    config: &IndexerConfig,
    store: &Store,
    embedder: &Arc<dyn EmbeddingProvider>,
    vector_index: &Arc<dyn VectorIndex>,
) -> Result<IndexStats, AppError> {
    vector_index.clear_namespace(VectorNamespace::Code).await?;
    store.clear_indexed_file_state()?;
    index_project(root, config, store, embedder, vector_index).await
}

async fn reindex_chunks(
    relative_path: &str,
    chunks: Vec<CodeChunk>,
    store: &Store,
    embedder: &Arc<dyn EmbeddingProvider>,
    vector_index: &Arc<dyn VectorIndex>,
) -> Result<usize, AppError> {
    for old_id in store.list_chunk_ids_for_file(relative_path)? {
        vector_index.delete(VectorNamespace::Code, old_id).await?;
    }
    if chunks.is_empty() {
        store.clear_chunk_ids_for_file(relative_path)?;
        return Ok(0);
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let embeddings = embedder.embed(&texts).await?;
    for (chunk, embedding) in chunks.iter().zip(embeddings.into_iter()) {
        let record = VectorRecord {
            id: chunk.id,
            namespace: VectorNamespace::Code,
            embedding,
            metadata: json!({
                "file_path": chunk.file_path,
                "start_line": chunk.start_line,
                "end_line": chunk.end_line,
                "chunk_type": chunk.chunk_type,
                "name": chunk.name,
                "content": chunk.content,
                "content_hash": chunk.content_hash,
                "doc_type": chunk.doc_type,
                "language": chunk.language,
            }),
        };
        vector_index.upsert(record).await?;
    }
    let chunk_ids: Vec<Uuid> = chunks.iter().map(|c| c.id).collect();
    store.set_chunk_ids_for_file(relative_path, &chunk_ids)?;
    tracing::debug!("reindexed {} chunks for {relative_path}", chunks.len());
    Ok(chunks.len())
}

fn classify_for_watch(relative_path: &str) -> crate::model::ChunkDocType {
    let lower = relative_path.to_ascii_lowercase();
    if lower.contains("/test") || lower.contains("test_") || lower.ends_with("_test.rs") {
        crate::model::ChunkDocType::Tests
    } else if lower.ends_with(".md") || lower.ends_with(".mdx") {
        crate::model::ChunkDocType::Docs
    } else if lower.ends_with(".toml") || lower.ends_with(".yaml") || lower.ends_with(".yml") {
        crate::model::ChunkDocType::Config
    } else {
        crate::model::ChunkDocType::Code
    }
}
