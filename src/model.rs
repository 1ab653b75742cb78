//! Domain entities shared by the activity store, the memory engine, and the
//! hook ingestion API. Field names mirror the relational schema in
//! `store::schema`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub agent: String,
    pub source_machine_id: String,
    pub project_root: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub status: SessionStatus,
    pub summary: Option<String>,
    pub title: Option<String>,
    pub title_manually_edited: bool,
    pub parent_session_id: Option<Uuid>,
    pub parent_reason: Option<String>,
    pub transcript_path: Option<String>,
    pub summary_embedded: bool,
    pub first_prompt_preview: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchSourceType {
    User,
    AgentNotification,
    Plan,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptBatch {
    pub id: Uuid,
    pub session_id: Uuid,
    pub prompt_number: i64,
    pub user_prompt: Option<String>,
    pub source_type: BatchSourceType,
    pub classification: Option<String>,
    pub plan_file_path: Option<String>,
    pub plan_content: Option<String>,
    pub response_summary: Option<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub status: BatchStatus,
    pub processed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub session_id: Uuid,
    pub prompt_batch_id: Option<Uuid>,
    pub tool_name: String,
    pub tool_input: serde_json::Value,
    pub tool_output_summary: Option<String>,
    pub file_path: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub tool_use_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Gotcha,
    Decision,
    BugFix,
    Discovery,
    TradeOff,
    SessionSummary,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Gotcha => "gotcha",
            MemoryType::Decision => "decision",
            MemoryType::BugFix => "bug_fix",
            MemoryType::Discovery => "discovery",
            MemoryType::TradeOff => "trade_off",
            MemoryType::SessionSummary => "session_summary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationStatus {
    Active,
    Resolved,
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOriginType {
    Planning,
    Investigation,
    Implementation,
    Mixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: Uuid,
    pub memory_type: MemoryType,
    pub observation: String,
    pub context: Option<String>,
    pub tags: Vec<String>,
    pub source_session_id: Option<Uuid>,
    pub source_batch_id: Option<Uuid>,
    pub source_machine_id: String,
    pub status: ObservationStatus,
    pub superseded_by: Option<Uuid>,
    pub session_origin_type: SessionOriginType,
    pub importance: i32,
    pub archived: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Observation {
    /// sha256(observation \|\| memory_type \|\| context), used for cross-machine dedup.
    pub fn dedup_hash(&self) -> String {
        crate::hash::content_hash(&[
            self.observation.as_str(),
            self.memory_type.as_str(),
            self.context.as_deref().unwrap_or(""),
        ])
    }

    /// Importance is capped at 5 for origin types planning or investigation.
    pub fn capped_importance(&self) -> i32 {
        match self.session_origin_type {
            SessionOriginType::Planning | SessionOriginType::Investigation => {
                self.importance.min(5)
            }
            _ => self.importance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    Resolve,
    Supersede,
    Reactivate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionEvent {
    pub id: Uuid,
    pub observation_id: Uuid,
    pub action: ResolutionAction,
    pub reason: Option<String>,
    pub actor: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub session_id: Uuid,
    pub title: String,
    pub file_path: Option<String>,
    pub content: String,
    pub content_hash: String,
    pub embedded: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceDecision {
    Allow,
    Observe,
    Warn,
    Deny,
}

impl GovernanceDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            GovernanceDecision::Allow => "allow",
            GovernanceDecision::Observe => "observe",
            GovernanceDecision::Warn => "warn",
            GovernanceDecision::Deny => "deny",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceAuditEvent {
    pub id: Uuid,
    pub session_id: Option<Uuid>,
    pub tool_name: String,
    pub rule_name: Option<String>,
    pub decision: GovernanceDecision,
    pub mode: String,
    pub message: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkDocType {
    Code,
    Tests,
    Docs,
    Config,
    Generated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChunk {
    pub id: Uuid,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub chunk_type: String,
    pub name: Option<String>,
    pub content: String,
    pub content_hash: String,
    pub doc_type: ChunkDocType,
    pub language: String,
}
