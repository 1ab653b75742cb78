//! The background pipeline: a dedicated tokio task that periodically
//! finalizes stuck work, extracts durable observations from completed
//! prompt batches, summarizes sessions, and runs housekeeping. It never
//! shares the HTTP server's executor — a slow summarization call must not
//! stall an incoming hook request.

mod extraction;

pub use extraction::extract_observations_for_batch;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::config::Config;
use crate::memory::MemoryEngine;
use crate::model::{BatchSourceType, BatchStatus, PromptBatch, SessionStatus};
use crate::providers::SummarizationProvider;
use crate::scheduler::cron_tasks;
use crate::scheduler::power::{tick_interval, PowerState};
use crate::store::backup::BackupBundle;
use crate::store::Store;
use uuid::Uuid;

pub struct PipelineContext {
    pub store: Arc<Store>,
    pub memory: Arc<MemoryEngine>,
    pub summarizer: Arc<dyn SummarizationProvider>,
    pub config: Config,
    pub backup_dir: std::path::PathBuf,
    pub source_machine_id: String,
}

/// Runs the pipeline tick loop until the process shuts down. `power_rx`
/// lets the loop stretch its own interval under the same power-state
/// signal the HTTP hooks feed, without the pipeline having to track idle
/// time itself.
pub async fn run_loop(ctx: Arc<PipelineContext>, mut power_rx: watch::Receiver<PowerState>) {
    let base_interval = Duration::from_secs(ctx.config.pipeline.tick_interval_secs.max(1));
    loop {
        let state = *power_rx.borrow();
        let interval = tick_interval(base_interval, state);
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = power_rx.changed() => { continue; }
        }

        if let Err(e) = run_tick(&ctx).await {
            tracing::warn!("pipeline tick failed: {e}");
        }
    }
}

/// Runs one full tick: the housekeeping steps in order. Each step is
/// independent and logs its own failures rather than aborting the whole
/// tick, so one broken batch doesn't block session recovery or backups.
pub async fn run_tick(ctx: &PipelineContext) -> anyhow::Result<()> {
    finalize_stuck_batches(ctx)?;
    recover_stale_sessions(ctx)?;
    recover_orphan_activities(ctx)?;
    extraction::run_extraction_pass(ctx).await;
    summarize_sessions(ctx).await;
    dispatch_due_cron_tasks(ctx)?;
    run_auto_backup(ctx)?;
    prune_governance_audit(ctx)?;
    Ok(())
}

/// Reads the `cron_tasks` table, and for each enabled task whose schedule
/// is due, dispatches it and stamps its run timestamps. The daemon owns only
/// the scheduling state — actually running a due task against the OAK
/// Agents runner is an external integration, so "dispatch" here means
/// emitting the injection event (a structured log line a downstream
/// collector can pick up) and advancing `last_run_at`/`next_run_at`.
fn dispatch_due_cron_tasks(ctx: &PipelineContext) -> anyhow::Result<()> {
    let tasks = ctx.store.list_cron_tasks()?;
    let now = chrono::Utc::now();
    for row in tasks {
        let task = cron_tasks::CronTask {
            name: row.name.clone(),
            expression: row.cron_expression.clone(),
            enabled: row.enabled,
        };
        match cron_tasks::is_due(&task, row.last_run_at, now) {
            Ok(true) => {
                tracing::info!(
                    task = %row.name,
                    event = "cron_dispatch",
                    "dispatching due cron task as an injection event"
                );
                let next = cron_tasks::next_run(&task, now).ok().flatten();
                if let Err(e) = ctx.store.record_cron_dispatch(row.id, next) {
                    tracing::warn!("failed to record cron dispatch for '{}': {e}", row.name);
                }
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!("cron task '{}' has an invalid schedule: {e}", row.name);
            }
        }
    }
    Ok(())
}

fn finalize_stuck_batches(ctx: &PipelineContext) -> anyhow::Result<()> {
    let cutoff = chrono::Utc::now()
        - chrono::Duration::seconds(ctx.config.pipeline.stuck_batch_timeout_secs as i64);
    let stuck = ctx.store.find_stuck_batches(cutoff)?;
    for batch_id in stuck {
        tracing::info!("finalizing stuck batch {batch_id}");
        if let Err(e) = ctx.store.complete_batch(batch_id, None) {
            tracing::warn!("failed to finalize stuck batch {batch_id}: {e}");
        }
    }
    Ok(())
}

fn recover_stale_sessions(ctx: &PipelineContext) -> anyhow::Result<()> {
    let cutoff = chrono::Utc::now()
        - chrono::Duration::seconds(ctx.config.pipeline.stale_session_timeout_secs as i64);
    let stale = ctx.store.find_stale_active_sessions(cutoff)?;
    for session_id in stale {
        tracing::info!("recovering stale session {session_id}");
        if let Err(e) = ctx.store.end_session(session_id) {
            tracing::warn!("failed to end stale session {session_id}: {e}");
        }
    }
    Ok(())
}

fn recover_orphan_activities(ctx: &PipelineContext) -> anyhow::Result<()> {
    let sessions = ctx.store.list_sessions(None, usize::MAX, 0)?;
    for session in sessions {
        let orphans = ctx.store.find_orphan_activities(session.id)?;
        if orphans.is_empty() {
            continue;
        }
        let batches = ctx.store.list_batches_for_session(session.id)?;
        if batches.is_empty() {
            let prompt_number = ctx.store.next_prompt_number(session.id)?;
            let recovery_batch = PromptBatch {
                id: Uuid::new_v4(),
                session_id: session.id,
                prompt_number,
                user_prompt: None,
                source_type: BatchSourceType::System,
                classification: None,
                plan_file_path: None,
                plan_content: None,
                response_summary: Some("recovered orphan activities with no owning batch".to_string()),
                started_at: chrono::Utc::now(),
                ended_at: None,
                status: BatchStatus::Completed,
                processed: false,
            };
            ctx.store.begin_batch(&recovery_batch)?;
            for orphan in orphans {
                if let Err(e) = ctx.store.reattach_activity(orphan.id, recovery_batch.id) {
                    tracing::warn!("failed to reattach orphan activity {}: {e}", orphan.id);
                }
            }
            continue;
        }

        for orphan in orphans {
            let nearest = batches
                .iter()
                .min_by_key(|batch| batch_time_distance(orphan.created_at, batch))
                .expect("batches is non-empty in this branch");
            if let Err(e) = ctx.store.reattach_activity(orphan.id, nearest.id) {
                tracing::warn!("failed to reattach orphan activity {}: {e}", orphan.id);
            }
        }
    }
    Ok(())
}

/// Milliseconds from `at` to the nearest edge of `batch`'s
/// `started_at..=ended_at` window — zero if `at` falls inside it. Used to
/// pick each orphan activity's individually nearest batch rather than
/// bulk-reattaching every orphan in a session to the same one.
fn batch_time_distance(at: chrono::DateTime<chrono::Utc>, batch: &PromptBatch) -> i64 {
    let end = batch.ended_at.unwrap_or(batch.started_at);
    let (start, end) = if batch.started_at <= end {
        (batch.started_at, end)
    } else {
        (end, batch.started_at)
    };
    if at >= start && at <= end {
        return 0;
    }
    let to_start = (at - start).num_milliseconds().abs();
    let to_end = (at - end).num_milliseconds().abs();
    to_start.min(to_end)
}

async fn summarize_sessions(ctx: &PipelineContext) {
    let Ok(sessions) = ctx.store.list_sessions(None, usize::MAX, 0) else {
        return;
    };
    for session in sessions {
        if session.status != SessionStatus::Completed || session.summary.is_some() {
            continue;
        }
        let Ok(batches) = ctx.store.list_batches_for_session(session.id) else {
            continue;
        };
        if batches.is_empty() || !batches.iter().all(|b| b.processed) {
            continue;
        }
        let transcript: String = batches
            .iter()
            .filter_map(|b| b.user_prompt.as_deref())
            .collect::<Vec<_>>()
            .join("\n---\n");
        if transcript.trim().is_empty() {
            continue;
        }

        let system_prompt = "Summarize this coding session in 2-3 sentences. Respond with only the summary text.";
        match ctx.summarizer.complete(system_prompt, &transcript).await {
            Ok(summary) => {
                let mut updated = session.clone();
                updated.summary = Some(summary.trim().to_string());
                if updated.title.is_none() {
                    updated.title = Some(generate_title(ctx, &transcript).await);
                }
                if let Err(e) = ctx.store.upsert_session(&updated) {
                    tracing::warn!("failed to persist session summary for {}: {e}", session.id);
                }
            }
            Err(e) => {
                tracing::warn!("session summarization failed for {}: {e}", session.id);
            }
        }
    }
}

/// Asks the summarization provider for a short session title. A reasoning
/// model sometimes returns an empty or malformed completion for a terse
/// instruction like this one; that case is retried once with a blunter
/// non-reasoning phrasing before falling back to a deterministic title
/// derived from the transcript's first line.
async fn generate_title(ctx: &PipelineContext, transcript: &str) -> String {
    let system_prompt =
        "Generate a short, specific title (under 72 characters, no surrounding quotes) for this coding session. Respond with only the title.";
    if let Ok(title) = ctx.summarizer.complete(system_prompt, transcript).await {
        let title = sanitize_title(&title);
        if !title.is_empty() {
            return title;
        }
    }

    let retry_prompt =
        "Reply with only a short title (under 72 characters) for this session. Do not explain your reasoning, just answer.";
    match ctx.summarizer.complete(retry_prompt, transcript).await {
        Ok(title) => {
            let title = sanitize_title(&title);
            if title.is_empty() {
                fallback_title(transcript)
            } else {
                title
            }
        }
        Err(e) => {
            tracing::warn!("title generation retry failed: {e}");
            fallback_title(transcript)
        }
    }
}

fn sanitize_title(raw: &str) -> String {
    raw.trim().trim_matches('"').trim().chars().take(72).collect()
}

fn fallback_title(transcript: &str) -> String {
    let first_line = transcript.lines().next().unwrap_or("Untitled session");
    first_line.chars().take(72).collect()
}

fn run_auto_backup(ctx: &PipelineContext) -> anyhow::Result<()> {
    if !ctx.config.backup.auto_backup_enabled {
        return Ok(());
    }
    let bundle: BackupBundle = ctx.store.backup_export(ctx.config.backup.include_activities)?;
    std::fs::create_dir_all(&ctx.backup_dir)?;
    let file_name = format!(
        "{}_{}-{}.json",
        crate::paths::backup_user(),
        crate::hash::path_hash(&ctx.source_machine_id),
        chrono::Utc::now().format("%Y%m%dT%H%M%S")
    );
    let path = ctx.backup_dir.join(file_name);
    let json = serde_json::to_vec_pretty(&bundle)?;
    std::fs::write(&path, json)?;
    tracing::info!("wrote backup to {}", path.display());
    Ok(())
}

fn prune_governance_audit(ctx: &PipelineContext) -> anyhow::Result<()> {
    if !ctx.config.governance.enabled {
        return Ok(());
    }
    let deleted = ctx
        .store
        .prune_governance_events(ctx.config.governance.audit_retention_days)?;
    if deleted > 0 {
        tracing::debug!("pruned {deleted} governance audit events");
    }
    Ok(())
}
