mod api;
mod config;
mod error;
mod governance;
mod hash;
mod index;
mod indexer;
mod logging;
mod memory;
mod model;
mod paths;
mod pipeline;
mod providers;
mod scheduler;
mod store;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::RwLock;

use api::{auth, ServerState};
use config::Config;
use paths::{resolve_project_root, ProjectPaths};
use providers::OpenAiCompatibleProvider;
use scheduler::PowerController;
use store::Store;

#[derive(Parser, Debug)]
#[command(name = "oak-ci", version)]
#[command(about = "Codebase intelligence daemon: captures agent activity, indexes code, and injects context back into prompts", long_about = None)]
struct Cli {
    /// Project root. If omitted, detects by walking up for .git.
    #[arg(long, global = true)]
    root: Option<std::path::PathBuf>,

    /// Run as a detached background daemon.
    #[arg(short, long, default_value_t = false)]
    daemon: bool,

    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stop the running daemon for this project.
    Stop,
    /// Show whether the daemon is running and on which port.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_root = resolve_project_root(cli.root.clone()).context("resolving project root")?;
    let paths = ProjectPaths::new(project_root.clone());
    paths.ensure_dirs().context("creating .oak/ci directories")?;

    match cli.cmd {
        Some(Command::Stop) => return stop_daemon(&paths),
        Some(Command::Status) => return print_status(&paths),
        None => {}
    }

    if cli.daemon {
        return spawn_daemon(&project_root);
    }

    run_foreground(project_root, paths).await
}

fn stop_daemon(paths: &ProjectPaths) -> Result<()> {
    let pid_file = paths.pid_file();
    let Ok(pid_str) = std::fs::read_to_string(&pid_file) else {
        println!("no daemon running for this project");
        return Ok(());
    };
    let pid: i32 = pid_str.trim().parse().context("malformed pid file")?;
    #[cfg(unix)]
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    let _ = std::fs::remove_file(&pid_file);
    println!("sent stop signal to daemon (pid {pid})");
    Ok(())
}

fn print_status(paths: &ProjectPaths) -> Result<()> {
    let pid_file = paths.pid_file();
    match std::fs::read_to_string(&pid_file) {
        Ok(pid_str) => {
            let port = std::fs::read_to_string(paths.port_file()).unwrap_or_else(|_| "unknown".to_string());
            println!("daemon running (pid {}, port {})", pid_str.trim(), port.trim());
        }
        Err(_) => println!("no daemon running for this project"),
    }
    Ok(())
}

/// Re-execs the current binary with `--daemon` stripped and its stdio
/// detached, then exits. The child writes its own pid file once it reaches
/// `run_foreground`, so `status`/`stop` have something to read immediately
/// after this returns.
fn spawn_daemon(project_root: &std::path::Path) -> Result<()> {
    let exe = std::env::current_exe().context("resolving current executable")?;
    let mut args: Vec<String> = std::env::args().skip(1).filter(|a| a != "--daemon" && a != "-d").collect();
    args.push("--root".to_string());
    args.push(project_root.to_string_lossy().to_string());

    std::process::Command::new(exe)
        .args(&args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .context("spawning background daemon")?;
    println!("daemon started in background");
    Ok(())
}

async fn run_foreground(project_root: std::path::PathBuf, paths: ProjectPaths) -> Result<()> {
    let (config, config_path) = Config::load(&project_root).unwrap_or_else(|e| {
        eprintln!("warning: failed to load config, using defaults: {e}");
        (Config::default(), None)
    });

    let log_dir = logging::setup_tracing_with_settings(logging::LoggingSettings {
        level: config.logging.level.as_deref(),
        directory: config.logging.directory.as_deref().map(std::path::Path::new),
        retention_days: config.logging.retention_days,
    })
    .context("initializing logging")?;

    tracing::info!("--- oak-ci daemon startup ---");
    tracing::info!("project root: {}", project_root.display());
    if let Some(path) = &config_path {
        tracing::info!("config file: {}", path.display());
    } else {
        tracing::info!("config file: (defaults)");
    }
    tracing::info!("log directory: {}", log_dir.display());

    std::fs::write(paths.pid_file(), std::process::id().to_string())
        .context("writing pid file")?;

    let store = Arc::new(Store::open(&paths.activities_db(), &project_root.to_string_lossy())?);
    let vector_index: Arc<dyn index::VectorIndex> =
        Arc::new(index::SqliteVectorIndex::open(&paths.vector_index_db())?);
    let embedder: Arc<dyn providers::EmbeddingProvider> =
        Arc::new(OpenAiCompatibleProvider::new(&config.embedding));
    let summarizer: Arc<dyn providers::SummarizationProvider> =
        Arc::new(OpenAiCompatibleProvider::new(&config.summarization));
    let memory = Arc::new(memory::MemoryEngine::new(store.clone(), vector_index.clone(), embedder.clone()));

    let (power, power_rx) = PowerController::new(config.power.clone());

    let generated_token = auth::generate_token();
    let token = auth::resolve_token(&generated_token);
    auth::persist_token(&paths.daemon_token(), &token).context("persisting daemon token")?;

    let source_machine_id = gethostname::gethostname().to_string_lossy().to_string();

    let server_state = Arc::new(ServerState {
        store: store.clone(),
        memory: memory.clone(),
        vector_index: vector_index.clone(),
        embedder: embedder.clone(),
        config: config.clone(),
        governance: RwLock::new(config.governance.clone()),
        power: power.clone(),
        paths: paths.clone(),
        token,
        dedup: api::dedup::DedupCache::new(),
        active_tunnel_url: RwLock::new(None),
        source_machine_id: source_machine_id.clone(),
        plan_dirs: vec!["plans/".to_string(), ".oak/plans/".to_string()],
    });

    let (bound_addr, server_handle) =
        api::start_server(server_state.clone(), &config.server.bind, config.server.port).await?;
    std::fs::write(paths.port_file(), bound_addr.port().to_string())
        .context("writing port file")?;
    tracing::info!("listening on {bound_addr}");

    let pipeline_ctx = Arc::new(pipeline::PipelineContext {
        store: store.clone(),
        memory: memory.clone(),
        summarizer: summarizer.clone(),
        config: config.clone(),
        backup_dir: paths.backup_dir(),
        source_machine_id,
    });
    let pipeline_handle = tokio::spawn(pipeline::run_loop(pipeline_ctx, power_rx.clone()));

    let watcher_handle = spawn_watch_loop(project_root.clone(), config.clone(), store, embedder, vector_index, power);

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    tracing::info!("shutdown signal received");
    server_handle.abort();
    pipeline_handle.abort();
    watcher_handle.abort();
    let _ = std::fs::remove_file(paths.pid_file());
    Ok(())
}

/// Runs the filesystem watcher and feeds debounced changes into the
/// incremental reindexer. Kept as its own task so a watcher panic (rare,
/// but `notify` backends differ across platforms) doesn't take the whole
/// daemon down with it.
fn spawn_watch_loop(
    project_root: std::path::PathBuf,
    config: Config,
    store: Arc<Store>,
    embedder: Arc<dyn providers::EmbeddingProvider>,
    vector_index: Arc<dyn index::VectorIndex>,
    power: Arc<PowerController>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let debounce = std::time::Duration::from_millis(config.indexer.watch_debounce_ms);
        let (_watcher, mut rx) = match indexer::spawn_watcher(project_root.clone(), debounce) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("failed to start file watcher: {e}");
                return;
            }
        };

        if let Err(e) =
            indexer::index_project(&project_root, &config.indexer, &store, &embedder, &vector_index).await
        {
            tracing::warn!("initial index build failed: {e}");
        }

        while let Some(event) = rx.recv().await {
            power.record_activity();
            let Some(relative) = event
                .path
                .strip_prefix(&project_root)
                .ok()
                .map(|p| p.to_string_lossy().to_string())
            else {
                continue;
            };
            let result = match event.kind {
                indexer::FileChangeKind::CreatedOrModified => {
                    indexer::reindex_file(&project_root, &relative, &config.indexer, &store, &embedder, &vector_index)
                        .await
                        .map(|_| ())
                }
                indexer::FileChangeKind::Removed => {
                    indexer::remove_file_from_index(&relative, &store, &vector_index).await
                }
            };
            if let Err(e) = result {
                tracing::warn!("failed to reindex {relative}: {e}");
            }
        }
    })
}
