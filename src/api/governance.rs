//! Governance rule configuration, dry-run testing, and audit trail browsing.
//! The live config lives behind a lock on `ServerState` (distinct from the
//! rest of `Config`, which is loaded once and treated as immutable) so an
//! operator can tighten or loosen rules without a daemon restart.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::config::GovernanceConfig;
use crate::error::AppError;
use crate::governance::{categorize_tool, evaluate, ToolCategory, ToolInvocation};
use crate::model::GovernanceAuditEvent;

use super::ServerState;

pub async fn get_config(State(state): State<Arc<ServerState>>) -> Json<GovernanceConfig> {
    Json(state.governance.read().await.clone())
}

pub async fn put_config(
    State(state): State<Arc<ServerState>>,
    Json(config): Json<GovernanceConfig>,
) -> Json<GovernanceConfig> {
    let mut guard = state.governance.write().await;
    *guard = config.clone();
    Json(config)
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub session_id: Option<uuid::Uuid>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    /// Filters by the fixed tool-category map (`categorize_tool`), not by
    /// the rule-based decision — applied after the store query since the
    /// category isn't a stored column.
    #[serde(default)]
    pub category: Option<ToolCategory>,
}

fn default_limit() -> usize {
    50
}

pub async fn audit(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<AuditQuery>,
) -> Result<Json<Vec<GovernanceAuditEvent>>, AppError> {
    let events = state
        .store
        .list_governance_events(params.session_id, params.limit, params.offset)?;
    let events = match params.category {
        Some(category) => events
            .into_iter()
            .filter(|e| categorize_tool(&e.tool_name) == category)
            .collect(),
        None => events,
    };
    Ok(Json(events))
}

#[derive(Debug, Deserialize)]
pub struct TestRequest {
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: serde_json::Value,
    pub file_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TestResponse {
    pub decision: &'static str,
    pub rule_name: Option<String>,
    pub message: Option<String>,
}

/// Dry run: evaluates the rules without recording an audit event, so an
/// operator can check "would this be denied?" before writing a new rule.
pub async fn test(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<TestRequest>,
) -> Result<Json<TestResponse>, AppError> {
    let config = state.governance.read().await;
    let invocation = ToolInvocation {
        tool_name: &req.tool_name,
        tool_input: &req.tool_input,
        file_path: req.file_path.as_deref(),
    };
    let verdict = evaluate(&config, &invocation);
    Ok(Json(TestResponse {
        decision: verdict.decision.as_str(),
        rule_name: verdict.rule_name,
        message: verdict.message,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PruneRequest {
    pub retention_days: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct PruneResponse {
    pub pruned: usize,
}

pub async fn prune(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<PruneRequest>,
) -> Result<Json<PruneResponse>, AppError> {
    let retention_days = req
        .retention_days
        .unwrap_or(state.governance.read().await.audit_retention_days);
    let pruned = state.store.prune_governance_events(retention_days)?;
    Ok(Json(PruneResponse { pruned }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::test_state;
    use crate::config::GovernanceRuleConfig;
    use crate::model::GovernanceDecision;

    fn deny_rm_rf_config() -> GovernanceConfig {
        GovernanceConfig {
            enabled: true,
            mode: crate::config::GovernanceMode::Enforce,
            rules: vec![GovernanceRuleConfig {
                name: "no-rm-rf".to_string(),
                tool_glob: "Bash".to_string(),
                input_regex: Some("rm -rf".to_string()),
                file_glob: None,
                action: GovernanceDecision::Deny,
            }],
            audit_retention_days: 30,
        }
    }

    #[tokio::test]
    async fn put_then_get_config_round_trips() {
        let state = test_state();
        let config = deny_rm_rf_config();
        put_config(State(state.clone()), Json(config.clone())).await;
        let fetched = get_config(State(state)).await;
        assert_eq!(fetched.0.rules.len(), 1);
        assert_eq!(fetched.0.rules[0].name, "no-rm-rf");
    }

    #[tokio::test]
    async fn test_endpoint_reports_deny_without_recording_audit_event() {
        let state = test_state();
        put_config(State(state.clone()), Json(deny_rm_rf_config())).await;

        let result = test(
            State(state.clone()),
            Json(TestRequest {
                tool_name: "Bash".to_string(),
                tool_input: serde_json::json!({ "command": "rm -rf /" }),
                file_path: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(result.0.decision, "deny");

        let events = audit(
            State(state),
            Query(AuditQuery {
                session_id: None,
                limit: 50,
                offset: 0,
                category: None,
            }),
        )
        .await
        .unwrap();
        assert!(events.0.is_empty());
    }

    #[tokio::test]
    async fn audit_category_filter_only_returns_matching_tool_category() {
        let state = test_state();
        state
            .store
            .record_governance_event(&GovernanceAuditEvent {
                id: uuid::Uuid::new_v4(),
                session_id: None,
                tool_name: "Bash".to_string(),
                rule_name: None,
                decision: GovernanceDecision::Allow,
                mode: "enforce".to_string(),
                message: None,
                created_at: chrono::Utc::now(),
            })
            .unwrap();
        state
            .store
            .record_governance_event(&GovernanceAuditEvent {
                id: uuid::Uuid::new_v4(),
                session_id: None,
                tool_name: "Write".to_string(),
                rule_name: None,
                decision: GovernanceDecision::Allow,
                mode: "enforce".to_string(),
                message: None,
                created_at: chrono::Utc::now(),
            })
            .unwrap();

        let shell_only = audit(
            State(state.clone()),
            Query(AuditQuery {
                session_id: None,
                limit: 50,
                offset: 0,
                category: Some(ToolCategory::Shell),
            }),
        )
        .await
        .unwrap();
        assert_eq!(shell_only.0.len(), 1);
        assert_eq!(shell_only.0[0].tool_name, "Bash");
    }

    #[tokio::test]
    async fn prune_defaults_to_live_config_retention() {
        let state = test_state();
        put_config(State(state.clone()), Json(deny_rm_rf_config())).await;
        let response = prune(State(state), Json(PruneRequest { retention_days: None }))
            .await
            .unwrap();
        assert_eq!(response.0.pruned, 0);
    }
}
