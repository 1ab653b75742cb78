//! The hook ingestion and control HTTP API: a single axum router binding
//! together session/batch/activity ingestion, memory search, activity
//! browsing, backups, governance, and devtools endpoints. Bearer-token
//! auth and a localhost/tunnel-restricted CORS layer wrap every route.

pub mod activity;
pub mod auth;
pub mod backup;
pub mod dedup;
pub mod devtools;
pub mod governance;
pub mod hooks;
pub mod memories;
pub mod search;

use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::routing::{get, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{Config, GovernanceConfig};
use crate::index::VectorIndex;
use crate::memory::MemoryEngine;
use crate::paths::ProjectPaths;
use crate::providers::EmbeddingProvider;
use crate::scheduler::PowerController;
use crate::store::Store;

pub struct ServerState {
    pub store: Arc<Store>,
    pub memory: Arc<MemoryEngine>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub config: Config,
    pub governance: RwLock<GovernanceConfig>,
    pub power: Arc<PowerController>,
    pub paths: ProjectPaths,
    pub token: String,
    pub dedup: dedup::DedupCache,
    pub active_tunnel_url: RwLock<Option<String>>,
    pub source_machine_id: String,
    pub plan_dirs: Vec<String>,
}

/// Binds the router to `bind:port` and serves it on a background task.
/// Returns the bound address (with the OS-assigned port resolved, if `port`
/// was 0) and a handle the caller can abort on shutdown.
pub async fn start_server(
    state: Arc<ServerState>,
    bind: &str,
    port: u16,
) -> anyhow::Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>)> {
    let cors = build_cors_layer(state.clone());
    let app = build_router(state).layer(cors).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind((bind, port)).await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app.into_make_service()).await {
            tracing::error!("HTTP server exited: {e}");
        }
    });
    Ok((addr, handle))
}

fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/api/oak/ci/{event}", post(hooks::handle_hook))
        .route("/api/search", get(search::search_get).post(search::search_post))
        .route("/api/fetch", post(search::fetch))
        .route("/api/remember", post(search::remember))
        .route("/api/context", post(search::context))
        .route("/api/memories", get(memories::list_memories))
        .route("/api/memories/{id}/status", put(memories::update_status))
        .route("/api/activity/sessions", get(activity::list_sessions))
        .route("/api/activity/sessions/{id}", get(activity::get_session))
        .route(
            "/api/activity/sessions/{id}/complete",
            post(activity::complete_session),
        )
        .route("/api/backup/create", post(backup::create))
        .route("/api/backup/restore", post(backup::restore))
        .route("/api/backup/restore-all", post(backup::restore_all))
        .route("/api/backup/status", get(backup::status))
        .route(
            "/api/governance/config",
            get(governance::get_config).put(governance::put_config),
        )
        .route("/api/governance/audit", get(governance::audit))
        .route("/api/governance/test", post(governance::test))
        .route("/api/governance/audit/prune", post(governance::prune))
        .route("/api/devtools/rebuild-index", post(devtools::rebuild_index))
        .route("/api/devtools/reset-processing", post(devtools::reset_processing))
        .route("/api/devtools/rebuild-memories", post(devtools::rebuild_memories))
        .route("/api/devtools/compact-chromadb", post(devtools::compact_chromadb))
        .route("/api/self-restart", post(self_restart))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer_token,
        ))
        .with_state(state)
}

/// CORS restricted to localhost origins plus whatever tunnel URL is
/// currently registered (a tunnel can be started/stopped while the daemon
/// runs, so this is checked per-request rather than baked in at startup).
fn build_cors_layer(state: Arc<ServerState>) -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(tower_http::cors::Any)
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let Ok(origin) = origin.to_str() else {
                return false;
            };
            if is_localhost_origin(origin) {
                return true;
            }
            match state.active_tunnel_url.try_read() {
                Ok(guard) => guard.as_deref() == Some(origin),
                Err(_) => false,
            }
        }))
}

fn is_localhost_origin(origin: &str) -> bool {
    origin.starts_with("http://localhost")
        || origin.starts_with("https://localhost")
        || origin.starts_with("http://127.0.0.1")
        || origin.starts_with("https://127.0.0.1")
}

/// Resolves the running executable by name through `PATH` rather than
/// reusing `std::env::current_exe()`'s cached path, so an in-place binary
/// replacement (e.g. after a self-update) restarts into the new version.
async fn self_restart() -> Result<axum::Json<serde_json::Value>, crate::error::AppError> {
    let exe_name = std::env::args()
        .next()
        .and_then(|p| {
            std::path::Path::new(&p)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
        })
        .unwrap_or_else(|| "oak-ci".to_string());

    let resolved = which(&exe_name).ok_or_else(|| {
        crate::error::AppError::Dependency(format!("could not resolve executable '{exe_name}' on PATH"))
    })?;

    tracing::info!("self-restart requested, spawning {}", resolved.display());
    std::process::Command::new(&resolved)
        .args(std::env::args().skip(1))
        .spawn()
        .map_err(|e| crate::error::AppError::Fatal(format!("failed to spawn replacement process: {e}")))?;

    tokio::spawn(async {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        std::process::exit(0);
    });

    Ok(axum::Json(serde_json::json!({ "restarting": true })))
}

fn which(name: &str) -> Option<std::path::PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_origins_are_recognized() {
        assert!(is_localhost_origin("http://localhost:5173"));
        assert!(is_localhost_origin("http://127.0.0.1:8080"));
        assert!(!is_localhost_origin("https://example.com"));
    }
}

/// A `ServerState` wired entirely to in-memory/stub backends, shared by the
/// handler unit tests across the `api` submodules so each one doesn't have
/// to re-derive the wiring `main.rs` does for real.
#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::RwLock;

    use crate::config::Config;
    use crate::error::AppError;
    use crate::index::{Embedding, SqliteVectorIndex, VectorIndex};
    use crate::memory::MemoryEngine;
    use crate::paths::ProjectPaths;
    use crate::providers::{EmbeddingProvider, SummarizationProvider};
    use crate::scheduler::PowerController;
    use crate::store::Store;

    use super::{dedup::DedupCache, ServerState};

    pub struct StubEmbedder;

    #[async_trait]
    impl EmbeddingProvider for StubEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>, AppError> {
            Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect())
        }
    }

    pub struct StubSummarizer;

    #[async_trait]
    impl SummarizationProvider for StubSummarizer {
        async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String, AppError> {
            Ok("stub summary".to_string())
        }
    }

    /// Each call gets its own scratch project root under the system temp
    /// dir, so concurrently-running tests never trip over each other's
    /// backup files or stray indexable sources.
    pub fn test_state() -> Arc<ServerState> {
        let root = std::env::temp_dir().join(format!("oak-ci-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();
        test_state_in(root)
    }

    /// Same wiring as `test_state`, but pinned to a caller-supplied project
    /// root — for tests that need two independent stores sharing one
    /// on-disk backup directory (simulating a restore onto a fresh
    /// database).
    pub fn test_state_in(root: std::path::PathBuf) -> Arc<ServerState> {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let vector_index: Arc<dyn VectorIndex> = Arc::new(SqliteVectorIndex::open_in_memory().unwrap());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(StubEmbedder);
        let memory = Arc::new(MemoryEngine::new(store.clone(), vector_index.clone(), embedder.clone()));
        let config = Config::default();
        let (power, _power_rx) = PowerController::new(config.power.clone());

        Arc::new(ServerState {
            store,
            memory,
            vector_index,
            embedder,
            governance: RwLock::new(config.governance.clone()),
            config,
            power,
            paths: ProjectPaths::new(root),
            token: "test-token".to_string(),
            dedup: DedupCache::new(),
            active_tunnel_url: RwLock::new(None),
            source_machine_id: "test-machine".to_string(),
            plan_dirs: vec!["plans/".to_string()],
        })
    }
}
