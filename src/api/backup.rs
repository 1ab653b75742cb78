//! On-demand backup export/import. The scheduler runs these automatically
//! on an interval; these endpoints exist for "back up right now" and for
//! restoring onto a fresh machine or after a wipe.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::store::backup::BackupBundle;

use super::ServerState;

#[derive(Debug, Serialize)]
pub struct BackupCreateResponse {
    pub path: String,
}

/// Filenames are `{user}_{hash::path_hash(project_root)}-{timestamp}.json`:
/// the `{user}_{hash}` half follows the export contract (never the raw
/// path), and the timestamp suffix lets a project accumulate a rolling
/// history of bundles rather than overwriting the previous one on every
/// backup.
pub async fn create(State(state): State<Arc<ServerState>>) -> Result<Json<BackupCreateResponse>, AppError> {
    let bundle = state
        .store
        .backup_export(state.config.backup.include_activities)?;
    let dir = state.paths.backup_dir();
    std::fs::create_dir_all(&dir)?;

    let root_hash = crate::hash::path_hash(&state.paths.project_root().to_string_lossy());
    let user = crate::paths::backup_user();
    let file_name = format!("{user}_{root_hash}-{}.json", chrono::Utc::now().timestamp());
    let path = dir.join(&file_name);
    let json = serde_json::to_vec_pretty(&bundle).map_err(anyhow::Error::from)?;
    std::fs::write(&path, json)?;

    Ok(Json(BackupCreateResponse {
        path: path.to_string_lossy().to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct RestoreRequest {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct RestoreResponse {
    pub sessions_imported: usize,
    pub observations_imported: usize,
}

/// Restores a single bundle file. Every insert goes through the store's
/// dedup-hash paths, so restoring a bundle already present is a no-op
/// rather than producing duplicates.
pub async fn restore(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<RestoreRequest>,
) -> Result<Json<RestoreResponse>, AppError> {
    let bundle = read_bundle(&state, &req.path)?;
    let summary = state.store.backup_import(&bundle)?;
    schedule_reindex(&state);
    Ok(Json(RestoreResponse {
        sessions_imported: summary.sessions,
        observations_imported: summary.observations,
    }))
}

#[derive(Debug, Serialize)]
pub struct RestoreAllResponse {
    pub bundles_restored: usize,
}

/// Restores every bundle found in the backup directory, in filename order
/// (which sorts by timestamp since the prefix is a stable path hash).
pub async fn restore_all(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<RestoreAllResponse>, AppError> {
    let dir = state.paths.backup_dir();
    let mut paths: Vec<_> = std::fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut restored = 0;
    for path in &paths {
        let bundle = read_bundle(&state, &path.to_string_lossy())?;
        state.store.backup_import(&bundle)?;
        restored += 1;
    }
    if restored > 0 {
        schedule_reindex(&state);
    }
    Ok(Json(RestoreAllResponse {
        bundles_restored: restored,
    }))
}

#[derive(Debug, Serialize)]
pub struct BackupStatusResponse {
    pub backup_dir: String,
    pub auto_backup_enabled: bool,
    pub interval_secs: u64,
    pub known_bundles: usize,
}

pub async fn status(State(state): State<Arc<ServerState>>) -> Result<Json<BackupStatusResponse>, AppError> {
    let dir = state.paths.backup_dir();
    let known_bundles = std::fs::read_dir(&dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
                .count()
        })
        .unwrap_or(0);
    Ok(Json(BackupStatusResponse {
        backup_dir: dir.to_string_lossy().to_string(),
        auto_backup_enabled: state.config.backup.auto_backup_enabled,
        interval_secs: state.config.backup.interval_secs,
        known_bundles,
    }))
}

/// Resolves `path` against the backup directory and rejects anything that
/// escapes it. `Path::starts_with` only compares lexical components, so a
/// request like `../../etc/passwd` would otherwise slip past it without ever
/// producing a path that looks like it left `dir` — both sides are
/// canonicalized (which also requires the target to exist) before the
/// containment check runs.
fn read_bundle(state: &ServerState, path: &str) -> Result<BackupBundle, AppError> {
    let dir = state.paths.backup_dir();
    std::fs::create_dir_all(&dir)?;
    let requested = std::path::Path::new(path);
    let resolved = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        dir.join(requested)
    };

    let canonical_dir = dir.canonicalize()?;
    let canonical_resolved = resolved
        .canonicalize()
        .map_err(|_| AppError::Validation(format!("backup file not found: {path}")))?;
    if !canonical_resolved.starts_with(&canonical_dir) {
        return Err(AppError::Validation(
            "backup path must resolve inside the project's backup directory".into(),
        ));
    }

    let raw = std::fs::read(&canonical_resolved)?;
    serde_json::from_slice(&raw).map_err(|e| AppError::Other(anyhow::Error::from(e)))
}

/// A restore can reintroduce code that was never indexed locally (or whose
/// index state has since drifted), so the code index is rebuilt from
/// scratch on the next pipeline tick rather than trusted to still match.
fn schedule_reindex(state: &ServerState) {
    let root = state.paths.project_root().to_path_buf();
    let config = state.config.indexer.clone();
    let store = state.store.clone();
    let embedder = state.embedder.clone();
    let vector_index = state.vector_index.clone();
    tokio::spawn(async move {
        if let Err(e) =
            crate::indexer::engine::rebuild_from_store(&root, &config, &store, &embedder, &vector_index)
                .await
        {
            tracing::warn!("post-restore reindex failed: {e}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::search::{remember, RememberRequest};
    use crate::api::test_support::{test_state, test_state_in};

    #[tokio::test]
    async fn create_then_restore_round_trips_a_remembered_observation() {
        let root = std::env::temp_dir().join(format!("oak-ci-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();

        let writer = test_state_in(root.clone());
        remember(
            State(writer.clone()),
            Json(RememberRequest {
                memory_type: "decision".to_string(),
                observation: "back up before a schema migration".to_string(),
                context: None,
                tags: vec![],
                importance: 5,
            }),
        )
        .await
        .unwrap();
        let created = create(State(writer.clone())).await.unwrap();

        // A different store instance sharing the same on-disk backup
        // directory, as if the daemon restarted against a fresh database.
        let reader = test_state_in(root);
        let restored = restore(
            State(reader.clone()),
            Json(RestoreRequest { path: created.0.path.clone() }),
        )
        .await
        .unwrap();
        assert_eq!(restored.0.observations_imported, 1);

        let status = status(State(reader)).await.unwrap();
        assert_eq!(status.0.known_bundles, 1);
    }

    #[tokio::test]
    async fn restore_rejects_a_path_escaping_the_backup_directory() {
        let state = test_state();
        let err = restore(
            State(state),
            Json(RestoreRequest {
                path: "../../etc/passwd".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn status_reports_backup_dir_and_known_bundle_count() {
        let state = test_state();
        create(State(state.clone())).await.unwrap();
        let response = status(State(state)).await.unwrap();
        assert_eq!(response.0.known_bundles, 1);
    }
}
