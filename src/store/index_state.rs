//! Per-file content hashes from the last successful index pass, so a
//! project rebuild can skip files that haven't changed since they were
//! last chunked and embedded.

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::error::AppError;

use super::{now_rfc3339, Store};

pub struct IndexedFileState {
    pub file_path: String,
    pub content_hash: String,
    pub chunk_count: usize,
    pub ast_success: bool,
}

impl Store {
    pub fn get_indexed_file_hash(&self, file_path: &str) -> Result<Option<String>, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let hash = conn
            .query_row(
                "SELECT content_hash FROM file_index_state WHERE file_path = ?1",
                [file_path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    pub fn record_indexed_file(
        &self,
        file_path: &str,
        content_hash: &str,
        chunk_count: usize,
        ast_success: bool,
    ) -> Result<(), AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            r#"
            INSERT INTO file_index_state (file_path, content_hash, chunk_count, ast_success, indexed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(file_path) DO UPDATE SET
                content_hash = excluded.content_hash,
                chunk_count = excluded.chunk_count,
                ast_success = excluded.ast_success,
                indexed_at = excluded.indexed_at
            "#,
            params![file_path, content_hash, chunk_count as i64, ast_success as i64, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn forget_indexed_file(&self, file_path: &str) -> Result<(), AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute("DELETE FROM file_index_state WHERE file_path = ?1", [file_path])?;
        Ok(())
    }

    /// Records the set of vector-index chunk ids that currently belong to
    /// `file_path`, replacing whatever was recorded before — so a later
    /// reindex or removal knows exactly which vectors to delete.
    pub fn set_chunk_ids_for_file(&self, file_path: &str, chunk_ids: &[Uuid]) -> Result<(), AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute("DELETE FROM file_index_chunks WHERE file_path = ?1", [file_path])?;
        for id in chunk_ids {
            conn.execute(
                "INSERT OR IGNORE INTO file_index_chunks (file_path, chunk_id) VALUES (?1, ?2)",
                params![file_path, id.to_string()],
            )?;
        }
        Ok(())
    }

    pub fn list_chunk_ids_for_file(&self, file_path: &str) -> Result<Vec<Uuid>, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare("SELECT chunk_id FROM file_index_chunks WHERE file_path = ?1")?;
        let rows = stmt
            .query_map([file_path], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .filter_map(|s| Uuid::parse_str(&s).ok())
            .collect();
        Ok(rows)
    }

    pub fn clear_chunk_ids_for_file(&self, file_path: &str) -> Result<(), AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute("DELETE FROM file_index_chunks WHERE file_path = ?1", [file_path])?;
        Ok(())
    }

    /// Every tracked path, for pruning entries whose file was deleted or
    /// moved out from under the walker between index passes.
    pub fn list_indexed_file_paths(&self) -> Result<Vec<String>, AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare("SELECT file_path FROM file_index_state")?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn clear_indexed_file_state(&self) -> Result<(), AppError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute("DELETE FROM file_index_state", [])?;
        conn.execute("DELETE FROM file_index_chunks", [])?;
        Ok(())
    }
}
