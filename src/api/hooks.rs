//! Hook ingestion: one endpoint, `POST /api/oak/ci/{event}`, dispatching on
//! a normalized event name to the session/batch/activity mutation the event
//! implies, then building whatever injection payload that event calls for.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::governance::{evaluate, ToolInvocation};
use crate::memory::InjectionPayload;
use crate::model::{
    Activity, BatchSourceType, BatchStatus, GovernanceAuditEvent, Plan, PromptBatch, Session,
    SessionStatus,
};

use super::ServerState;

/// Incoming hook events carry a grab-bag of fields depending on which event
/// fired; unused fields for a given event are simply absent from the body.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct HookRequest {
    pub session_id: Option<Uuid>,
    pub agent: Option<String>,
    pub source_machine_id: Option<String>,
    pub project_root: Option<String>,
    pub transcript_path: Option<String>,
    pub generation_id: Option<String>,
    pub prompt: Option<String>,
    pub batch_id: Option<Uuid>,
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<serde_json::Value>,
    pub tool_output_summary: Option<String>,
    pub file_path: Option<String>,
    pub success: Option<bool>,
    pub error_message: Option<String>,
    pub tool_use_id: Option<String>,
    pub response_summary: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct HookResponse {
    pub injected_context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Lowercases and strips `-`/`_` so `session-start`, `session_start`, and
/// `SessionStart` all compare equal — hook scripts in the wild are not
/// consistent about casing or separators.
pub fn normalize_event_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '-' && *c != '_')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

pub async fn handle_hook(
    State(state): State<Arc<ServerState>>,
    Path(event): Path<String>,
    Json(req): Json<HookRequest>,
) -> Result<Json<HookResponse>, AppError> {
    state.power.record_activity();
    let normalized = normalize_event_name(&event);
    tracing::debug!(target: crate::logging::HOOKS_TARGET, "hook {normalized} session={:?}", req.session_id);

    match normalized.as_str() {
        "sessionstart" => session_start(&state, req).await,
        "userpromptsubmit" => user_prompt_submit(&state, req).await,
        "posttooluse" => post_tool_use(&state, req, true).await,
        "posttoolusefailure" => post_tool_use(&state, req, false).await,
        "pretooluse" => pre_tool_use(&state, req).await,
        "stop" => stop(&state, req).await,
        "sessionend" => session_end(&state, req).await,
        "subagentstart" | "subagentstop" | "precompact" => Ok(Json(HookResponse::default())),
        other => Err(AppError::Validation(format!("unknown hook event '{other}'"))),
    }
}

async fn session_start(state: &ServerState, req: HookRequest) -> Result<Json<HookResponse>, AppError> {
    let agent = req.agent.unwrap_or_else(|| "unknown".to_string());
    let source = req
        .source_machine_id
        .unwrap_or_else(|| state.source_machine_id.clone());
    let dedup_key = crate::hash::content_hash(&["session-start", &agent, &source]);
    if !state.dedup.check_and_record(&dedup_key) {
        return Ok(Json(HookResponse::default()));
    }

    let session_id = req.session_id.unwrap_or_else(Uuid::new_v4);
    let session = Session {
        id: session_id,
        agent,
        source_machine_id: source,
        project_root: req
            .project_root
            .unwrap_or_else(|| state.paths.project_root().to_string_lossy().to_string()),
        started_at: chrono::Utc::now(),
        ended_at: None,
        status: SessionStatus::Active,
        summary: None,
        title: None,
        title_manually_edited: false,
        parent_session_id: None,
        parent_reason: None,
        transcript_path: req.transcript_path,
        summary_embedded: false,
        first_prompt_preview: req.prompt.clone(),
    };
    state.store.upsert_session(&session)?;

    let task = req.prompt.as_deref().unwrap_or("starting a new session");
    let payload = state.memory.context_for_task(task).await?;
    Ok(Json(HookResponse {
        injected_context: Some(format_injection(&payload)),
        decision: None,
        message: None,
    }))
}

async fn user_prompt_submit(state: &ServerState, req: HookRequest) -> Result<Json<HookResponse>, AppError> {
    let session_id = req
        .session_id
        .ok_or_else(|| AppError::Validation("session_id is required".into()))?;
    let prompt = req
        .prompt
        .clone()
        .ok_or_else(|| AppError::Validation("prompt is required".into()))?;
    let prompt_hash = crate::hash::content_hash(&[&prompt]);
    let generation_id = req.generation_id.unwrap_or_default();
    let dedup_key = crate::hash::content_hash(&["user-prompt-submit", &generation_id, &prompt_hash]);
    if !state.dedup.check_and_record(&dedup_key) {
        return Ok(Json(HookResponse::default()));
    }

    let prompt_number = state.store.next_prompt_number(session_id)?;
    let batch = PromptBatch {
        id: req.batch_id.unwrap_or_else(Uuid::new_v4),
        session_id,
        prompt_number,
        user_prompt: Some(prompt.clone()),
        source_type: BatchSourceType::User,
        classification: None,
        plan_file_path: None,
        plan_content: None,
        response_summary: None,
        started_at: chrono::Utc::now(),
        ended_at: None,
        status: BatchStatus::Active,
        processed: false,
    };
    state.store.begin_batch(&batch)?;

    let payload = state.memory.context_for_task(&prompt).await?;
    Ok(Json(HookResponse {
        injected_context: Some(format_injection(&payload)),
        decision: None,
        message: None,
    }))
}

async fn post_tool_use(
    state: &ServerState,
    req: HookRequest,
    success_default: bool,
) -> Result<Json<HookResponse>, AppError> {
    let session_id = req
        .session_id
        .ok_or_else(|| AppError::Validation("session_id is required".into()))?;
    let tool_name = req
        .tool_name
        .clone()
        .ok_or_else(|| AppError::Validation("tool_name is required".into()))?;

    let dedup_key = req.tool_use_id.clone().unwrap_or_else(|| {
        crate::hash::content_hash(&[
            session_id.to_string().as_str(),
            &tool_name,
            req.file_path.as_deref().unwrap_or(""),
        ])
    });
    if !state.dedup.check_and_record(&dedup_key) {
        return Ok(Json(HookResponse::default()));
    }

    let active_batch_id = state
        .store
        .list_batches_for_session(session_id)?
        .into_iter()
        .rev()
        .find(|b| b.status == BatchStatus::Active)
        .map(|b| b.id);

    let activity = Activity {
        id: Uuid::new_v4(),
        session_id,
        prompt_batch_id: active_batch_id,
        tool_name: tool_name.clone(),
        tool_input: req.tool_input.clone().unwrap_or(serde_json::Value::Null),
        tool_output_summary: req.tool_output_summary,
        file_path: req.file_path.clone(),
        success: req.success.unwrap_or(success_default),
        error_message: req.error_message,
        tool_use_id: req.tool_use_id,
        created_at: chrono::Utc::now(),
    };
    state.store.append_activity(&activity)?;

    capture_plan(state, session_id, active_batch_id, &tool_name, req.file_path.as_deref())?;

    let Some(file_path) = activity.file_path.as_deref() else {
        return Ok(Json(HookResponse::default()));
    };
    let scored = state.memory.search(file_path, None, crate::memory::MAX_INJECTED_MEMORIES).await?;
    let relevant: Vec<_> = scored
        .into_iter()
        .filter(|s| !matches!(s.tier, crate::memory::ConfidenceTier::Low))
        .collect();
    if relevant.is_empty() {
        return Ok(Json(HookResponse::default()));
    }
    let text = relevant
        .iter()
        .map(|s| format!("- [{}] {}", s.observation.memory_type.as_str(), s.observation.observation))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(Json(HookResponse {
        injected_context: Some(text),
        decision: None,
        message: None,
    }))
}

/// `Write` calls whose target lies under a configured plan directory persist
/// the written content as a plan; re-capturing the same path updates it in
/// place (`Store::upsert_plan` is keyed by `(session_id, file_path)`).
/// `ExitPlanMode` re-reads that file from disk to capture its final form.
fn capture_plan(
    state: &ServerState,
    session_id: Uuid,
    batch_id: Option<Uuid>,
    tool_name: &str,
    file_path: Option<&str>,
) -> Result<(), AppError> {
    if tool_name == "Write" {
        let Some(path) = file_path else { return Ok(()) };
        if !state.plan_dirs.iter().any(|dir| path.starts_with(dir.as_str())) {
            return Ok(());
        }
        let absolute = state.paths.project_root().join(path);
        let Ok(content) = std::fs::read_to_string(&absolute) else {
            return Ok(());
        };
        persist_plan(state, session_id, path, &content)?;
        if let Some(batch_id) = batch_id {
            if let Some(mut batch) = state.store.get_batch(batch_id)? {
                batch.plan_file_path = Some(path.to_string());
                batch.plan_content = Some(content);
                batch.source_type = BatchSourceType::Plan;
                state.store.begin_batch(&batch)?;
            }
        }
    } else if tool_name == "ExitPlanMode" {
        let existing = state.store.list_plans_for_session(session_id)?;
        if let Some(latest) = existing.last() {
            if let Some(path) = &latest.file_path {
                let absolute = state.paths.project_root().join(path);
                if let Ok(content) = std::fs::read_to_string(&absolute) {
                    persist_plan(state, session_id, path, &content)?;
                }
            }
        }
    }
    Ok(())
}

fn persist_plan(state: &ServerState, session_id: Uuid, path: &str, content: &str) -> Result<(), AppError> {
    let plan = Plan {
        id: Uuid::new_v4(),
        session_id,
        title: path.to_string(),
        file_path: Some(path.to_string()),
        content: content.to_string(),
        content_hash: crate::hash::file_content_hash(content.as_bytes()),
        embedded: false,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    state.store.upsert_plan(&plan)?;
    Ok(())
}

/// Not part of the hook event table but required by the governance
/// evaluator's synchronous contract: a `PreToolUse` delivery is evaluated
/// against the configured rules and the verdict is returned as `decision`
/// instead of a mutation.
async fn pre_tool_use(state: &ServerState, req: HookRequest) -> Result<Json<HookResponse>, AppError> {
    let tool_name = req.tool_name.clone().unwrap_or_default();
    let tool_input = req.tool_input.clone().unwrap_or(serde_json::Value::Null);
    let config = state.governance.read().await;
    let invocation = ToolInvocation {
        tool_name: &tool_name,
        tool_input: &tool_input,
        file_path: req.file_path.as_deref(),
    };
    let verdict = evaluate(&config, &invocation);

    state.store.record_governance_event(&GovernanceAuditEvent {
        id: Uuid::new_v4(),
        session_id: req.session_id,
        tool_name,
        rule_name: verdict.rule_name.clone(),
        decision: verdict.decision,
        mode: match verdict.mode {
            crate::config::GovernanceMode::Observe => "observe".to_string(),
            crate::config::GovernanceMode::Enforce => "enforce".to_string(),
        },
        message: verdict.message.clone(),
        created_at: chrono::Utc::now(),
    })?;

    Ok(Json(HookResponse {
        injected_context: None,
        decision: Some(verdict.decision.as_str()),
        message: verdict.message,
    }))
}

async fn stop(state: &ServerState, req: HookRequest) -> Result<Json<HookResponse>, AppError> {
    let batch_id = req
        .batch_id
        .ok_or_else(|| AppError::Validation("batch_id is required".into()))?;
    let dedup_key = crate::hash::content_hash(&["stop", batch_id.to_string().as_str()]);
    if !state.dedup.check_and_record(&dedup_key) {
        return Ok(Json(HookResponse::default()));
    }
    state.store.complete_batch(batch_id, req.response_summary.as_deref())?;
    Ok(Json(HookResponse::default()))
}

async fn session_end(state: &ServerState, req: HookRequest) -> Result<Json<HookResponse>, AppError> {
    let session_id = req
        .session_id
        .ok_or_else(|| AppError::Validation("session_id is required".into()))?;
    let dedup_key = crate::hash::content_hash(&["session-end", session_id.to_string().as_str()]);
    if !state.dedup.check_and_record(&dedup_key) {
        return Ok(Json(HookResponse::default()));
    }
    state.store.end_session(session_id)?;
    Ok(Json(HookResponse::default()))
}

fn format_injection(payload: &InjectionPayload) -> String {
    let mut out = String::new();
    for chunk in &payload.code_chunks {
        out.push_str(&format!(
            "# {} (L{}-{})\n{}\n\n",
            chunk.file_path, chunk.start_line, chunk.end_line, chunk.content
        ));
    }
    for memory in &payload.memories {
        out.push_str(&format!(
            "- [{}] {}\n",
            memory.observation.memory_type.as_str(),
            memory.observation.observation
        ));
    }
    for summary in &payload.session_summaries {
        out.push_str(&format!("> {summary}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::test_state;
    use crate::config::{GovernanceConfig, GovernanceMode, GovernanceRuleConfig};
    use crate::model::GovernanceDecision;
    use axum::extract::Path as AxumPath;

    #[test]
    fn normalization_strips_separators_and_case() {
        assert_eq!(normalize_event_name("session-start"), "sessionstart");
        assert_eq!(normalize_event_name("Session_Start"), "sessionstart");
        assert_eq!(normalize_event_name("SessionStart"), "sessionstart");
    }

    fn empty_request() -> HookRequest {
        HookRequest::default()
    }

    #[tokio::test]
    async fn session_start_creates_an_active_session_and_is_deduped_on_retry() {
        let state = test_state();
        let session_id = Uuid::new_v4();
        let req = HookRequest {
            session_id: Some(session_id),
            agent: Some("claude-code".to_string()),
            prompt: Some("help me fix the build".to_string()),
            ..empty_request()
        };

        handle_hook(
            axum::extract::State(state.clone()),
            AxumPath("session-start".to_string()),
            Json(req.clone()),
        )
        .await
        .unwrap();

        let stored = state.store.get_session(session_id).unwrap();
        assert!(stored.is_some());

        // A second delivery of the identical event is a retry, not a new
        // session — the dedup cache should swallow it.
        let retried = handle_hook(
            axum::extract::State(state),
            AxumPath("session-start".to_string()),
            Json(req),
        )
        .await
        .unwrap();
        assert!(retried.0.injected_context.is_none());
    }

    #[tokio::test]
    async fn user_prompt_submit_requires_session_id() {
        let state = test_state();
        let err = handle_hook(
            axum::extract::State(state),
            AxumPath("user-prompt-submit".to_string()),
            Json(HookRequest {
                prompt: Some("do the thing".to_string()),
                ..empty_request()
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn user_prompt_submit_opens_a_batch_for_the_session() {
        let state = test_state();
        let session_id = Uuid::new_v4();
        handle_hook(
            axum::extract::State(state.clone()),
            AxumPath("session-start".to_string()),
            Json(HookRequest {
                session_id: Some(session_id),
                ..empty_request()
            }),
        )
        .await
        .unwrap();

        handle_hook(
            axum::extract::State(state.clone()),
            AxumPath("user-prompt-submit".to_string()),
            Json(HookRequest {
                session_id: Some(session_id),
                prompt: Some("add a retry loop".to_string()),
                ..empty_request()
            }),
        )
        .await
        .unwrap();

        let batches = state.store.list_batches_for_session(session_id).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].user_prompt.as_deref(), Some("add a retry loop"));
    }

    #[tokio::test]
    async fn post_tool_use_records_an_activity_against_the_active_batch() {
        let state = test_state();
        let session_id = Uuid::new_v4();
        handle_hook(
            axum::extract::State(state.clone()),
            AxumPath("session-start".to_string()),
            Json(HookRequest {
                session_id: Some(session_id),
                ..empty_request()
            }),
        )
        .await
        .unwrap();
        handle_hook(
            axum::extract::State(state.clone()),
            AxumPath("user-prompt-submit".to_string()),
            Json(HookRequest {
                session_id: Some(session_id),
                prompt: Some("run the tests".to_string()),
                ..empty_request()
            }),
        )
        .await
        .unwrap();

        handle_hook(
            axum::extract::State(state.clone()),
            AxumPath("post-tool-use".to_string()),
            Json(HookRequest {
                session_id: Some(session_id),
                tool_name: Some("Bash".to_string()),
                tool_use_id: Some("tool-1".to_string()),
                ..empty_request()
            }),
        )
        .await
        .unwrap();

        let batches = state.store.list_batches_for_session(session_id).unwrap();
        let activities = state.store.list_activities_for_session(session_id).unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].prompt_batch_id, Some(batches[0].id));
        assert!(activities[0].success);
    }

    #[tokio::test]
    async fn pre_tool_use_records_a_governance_audit_event_and_returns_its_decision() {
        let state = test_state();
        {
            let mut guard = state.governance.write().await;
            *guard = GovernanceConfig {
                enabled: true,
                mode: GovernanceMode::Enforce,
                rules: vec![GovernanceRuleConfig {
                    name: "no-rm-rf".to_string(),
                    tool_glob: "Bash".to_string(),
                    input_regex: Some("rm -rf".to_string()),
                    file_glob: None,
                    action: GovernanceDecision::Deny,
                }],
                audit_retention_days: 30,
            };
        }

        let session_id = Uuid::new_v4();
        let response = handle_hook(
            axum::extract::State(state.clone()),
            AxumPath("pre-tool-use".to_string()),
            Json(HookRequest {
                session_id: Some(session_id),
                tool_name: Some("Bash".to_string()),
                tool_input: Some(serde_json::json!({ "command": "rm -rf /" })),
                ..empty_request()
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.0.decision, Some("deny"));

        let events = state.store.list_governance_events(Some(session_id), 50, 0).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].decision, GovernanceDecision::Deny);
    }

    #[tokio::test]
    async fn unknown_event_is_rejected() {
        let state = test_state();
        let err = handle_hook(
            axum::extract::State(state),
            AxumPath("totally-made-up".to_string()),
            Json(empty_request()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
