//! Turns a completed prompt batch into durable observations by asking the
//! summarization provider to name what happened, then parsing its answer
//! defensively — models don't always honor "respond with only JSON".

use uuid::Uuid;

use crate::model::{MemoryType, Observation, ObservationStatus, SessionOriginType};
use crate::providers::extract_json_object;

use super::PipelineContext;

const EXTRACTION_SYSTEM_PROMPT: &str = r#"You extract durable engineering observations from a coding session's tool activity.
Respond with only a JSON object of the shape:
{"observations": [{"memory_type": "gotcha|decision|bug_fix|discovery|trade_off", "observation": "...", "context": "...", "tags": ["..."], "importance": 1-10, "session_origin_type": "planning|investigation|implementation|mixed"}]}
Only include observations that would still matter to someone picking up this project weeks later. An empty array is a valid answer."#;

pub async fn run_extraction_pass(ctx: &PipelineContext) {
    let Ok(batches) = ctx
        .store
        .find_batches_pending_extraction(ctx.config.pipeline.extraction_max_retries, 20)
    else {
        return;
    };

    for batch in batches {
        match extract_observations_for_batch(ctx, &batch).await {
            Ok(count) => {
                if let Err(e) = ctx.store.mark_batch_processed(batch.id) {
                    tracing::warn!("failed to mark batch {} processed: {e}", batch.id);
                }
                tracing::debug!("extracted {count} observations from batch {}", batch.id);
            }
            Err(e) => {
                tracing::warn!("extraction failed for batch {}: {e}", batch.id);
                let _ = ctx.store.record_extraction_attempt(batch.id, Some(&e.to_string()));
            }
        }
    }
}

/// Runs extraction for a single batch and inserts any observations found.
/// Returns the number of observations inserted (after dedup — a repeat of
/// an existing observation counts as zero new ones is not tracked here,
/// only the count handed to the provider's response).
pub async fn extract_observations_for_batch(
    ctx: &PipelineContext,
    batch: &crate::model::PromptBatch,
) -> anyhow::Result<usize> {
    let activities = ctx.store.list_activities_for_batch(batch.id)?;
    if activities.is_empty() && batch.user_prompt.is_none() {
        return Ok(0);
    }

    let mut transcript = String::new();
    if let Some(prompt) = &batch.user_prompt {
        transcript.push_str("User prompt: ");
        transcript.push_str(prompt);
        transcript.push('\n');
    }
    for activity in &activities {
        transcript.push_str(&format!(
            "Tool: {} file={:?} success={}\n",
            activity.tool_name, activity.file_path, activity.success
        ));
        if let Some(err) = &activity.error_message {
            transcript.push_str(&format!("  error: {err}\n"));
        }
    }

    let raw = ctx
        .summarizer
        .complete(EXTRACTION_SYSTEM_PROMPT, &transcript)
        .await?;
    let Some(json) = extract_json_object(&raw) else {
        anyhow::bail!("extraction response did not contain a JSON object");
    };
    let Some(entries) = json.get("observations").and_then(|v| v.as_array()) else {
        return Ok(0);
    };

    let mut inserted = 0;
    for entry in entries {
        let Some(text) = entry.get("observation").and_then(|v| v.as_str()) else {
            continue;
        };
        let memory_type = entry
            .get("memory_type")
            .and_then(|v| v.as_str())
            .map(memory_type_from_str)
            .unwrap_or(MemoryType::Discovery);
        let session_origin_type = entry
            .get("session_origin_type")
            .and_then(|v| v.as_str())
            .map(origin_from_str)
            .unwrap_or(SessionOriginType::Mixed);
        let tags = entry
            .get("tags")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|t| t.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let importance = entry
            .get("importance")
            .and_then(|v| v.as_i64())
            .unwrap_or(5)
            .clamp(1, 10) as i32;

        let observation = Observation {
            id: Uuid::new_v4(),
            memory_type,
            observation: text.to_string(),
            context: entry
                .get("context")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            tags,
            source_session_id: Some(batch.session_id),
            source_batch_id: Some(batch.id),
            source_machine_id: ctx.source_machine_id.clone(),
            status: ObservationStatus::Active,
            superseded_by: None,
            session_origin_type,
            importance,
            archived: false,
            created_at: chrono::Utc::now(),
        };
        ctx.memory.record_observation(observation).await?;
        inserted += 1;
    }
    Ok(inserted)
}

fn memory_type_from_str(s: &str) -> MemoryType {
    match s {
        "decision" => MemoryType::Decision,
        "bug_fix" => MemoryType::BugFix,
        "discovery" => MemoryType::Discovery,
        "trade_off" => MemoryType::TradeOff,
        "session_summary" => MemoryType::SessionSummary,
        _ => MemoryType::Gotcha,
    }
}

fn origin_from_str(s: &str) -> SessionOriginType {
    match s {
        "planning" => SessionOriginType::Planning,
        "investigation" => SessionOriginType::Investigation,
        "implementation" => SessionOriginType::Implementation,
        _ => SessionOriginType::Mixed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::model::{BatchSourceType, BatchStatus, PromptBatch, Session, SessionStatus};
    use crate::providers::SummarizationProvider;
    use crate::store::Store;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct StaticSummarizer(String);

    #[async_trait]
    impl SummarizationProvider for StaticSummarizer {
        async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String, AppError> {
            Ok(self.0.clone())
        }
    }

    fn test_ctx(response: &str) -> PipelineContext {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let vector_index: Arc<dyn crate::index::VectorIndex> =
            Arc::new(crate::index::SqliteVectorIndex::open_in_memory().unwrap());
        let embedder: Arc<dyn crate::providers::EmbeddingProvider> =
            Arc::new(ZeroEmbedder);
        PipelineContext {
            store: store.clone(),
            memory: Arc::new(crate::memory::MemoryEngine::new(store, vector_index, embedder)),
            summarizer: Arc::new(StaticSummarizer(response.to_string())),
            config: crate::config::Config::default(),
            backup_dir: std::path::PathBuf::from("/tmp/oak-ci-test-backups"),
            source_machine_id: "test-machine".into(),
        }
    }

    struct ZeroEmbedder;

    #[async_trait]
    impl crate::providers::EmbeddingProvider for ZeroEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<crate::index::Embedding>, AppError> {
            Ok(texts.iter().map(|_| vec![0.0, 0.0]).collect())
        }
    }

    fn setup_session_and_batch(ctx: &PipelineContext) -> PromptBatch {
        let session_id = Uuid::new_v4();
        ctx.store
            .upsert_session(&Session {
                id: session_id,
                agent: "claude-code".into(),
                source_machine_id: "test-machine".into(),
                project_root: "/tmp".into(),
                started_at: chrono::Utc::now(),
                ended_at: None,
                status: SessionStatus::Active,
                summary: None,
                title: None,
                title_manually_edited: false,
                parent_session_id: None,
                parent_reason: None,
                transcript_path: None,
                summary_embedded: false,
                first_prompt_preview: None,
            })
            .unwrap();
        let batch = PromptBatch {
            id: Uuid::new_v4(),
            session_id,
            prompt_number: 1,
            user_prompt: Some("fix the flaky test".into()),
            source_type: BatchSourceType::User,
            classification: None,
            plan_file_path: None,
            plan_content: None,
            response_summary: None,
            started_at: chrono::Utc::now(),
            ended_at: None,
            status: BatchStatus::Completed,
            processed: false,
        };
        ctx.store.begin_batch(&batch).unwrap();
        batch
    }

    #[tokio::test]
    async fn extracts_observations_from_fenced_json_response() {
        let ctx = test_ctx(
            "```json\n{\"observations\": [{\"memory_type\": \"bug_fix\", \"observation\": \"retry flaky network calls\", \"context\": \"tests\", \"tags\": [\"flaky\"], \"importance\": 6, \"session_origin_type\": \"implementation\"}]}\n```",
        );
        let batch = setup_session_and_batch(&ctx);
        let count = extract_observations_for_batch(&ctx, &batch).await.unwrap();
        assert_eq!(count, 1);

        let observations = ctx
            .store
            .query_observations(None, None, None, 10, 0)
            .unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].memory_type, MemoryType::BugFix);
    }

    #[tokio::test]
    async fn empty_observations_array_inserts_nothing() {
        let ctx = test_ctx(r#"{"observations": []}"#);
        let batch = setup_session_and_batch(&ctx);
        let count = extract_observations_for_batch(&ctx, &batch).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn non_json_response_is_an_error() {
        let ctx = test_ctx("sorry, I can't help with that");
        let batch = setup_session_and_batch(&ctx);
        assert!(extract_observations_for_batch(&ctx, &batch).await.is_err());
    }
}
