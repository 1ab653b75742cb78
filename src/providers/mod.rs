//! Pluggable externals: embedding and summarization providers speak the
//! OpenAI-compatible HTTP API (the same surface a local Ollama server or a
//! hosted model exposes), mirroring the request/response shapes the daemon's
//! chat clients use elsewhere in the ecosystem.

mod openai_compatible;

pub use openai_compatible::OpenAiCompatibleProvider;

use async_trait::async_trait;

use crate::error::AppError;
use crate::index::Embedding;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>, AppError>;
}

#[async_trait]
pub trait SummarizationProvider: Send + Sync {
    /// Sends `prompt` as the sole user message and returns the raw
    /// completion text. Callers that need structured output (observation
    /// extraction, session titling) are responsible for parsing it and
    /// defensively unwrapping it if the model wraps JSON in prose or a
    /// markdown fence.
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, AppError>;
}

/// Best-effort extraction of a JSON value from a model completion that may
/// be wrapped in a markdown code fence or prefaced with explanatory prose.
/// Summarization models are not always obedient about "respond with only
/// JSON" instructions.
pub fn extract_json_object(raw: &str) -> Option<serde_json::Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return Some(value);
    }
    let fenced = trimmed
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(fenced) {
        return Some(value);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_plain_json() {
        let value = extract_json_object(r#"{"observation": "x"}"#).unwrap();
        assert_eq!(value["observation"], "x");
    }

    #[test]
    fn extracts_json_from_markdown_fence() {
        let raw = "```json\n{\"observation\": \"x\"}\n```";
        let value = extract_json_object(raw).unwrap();
        assert_eq!(value["observation"], "x");
    }

    #[test]
    fn extracts_json_with_leading_prose() {
        let raw = "Sure, here is the result:\n{\"observation\": \"x\"}\nHope that helps!";
        let value = extract_json_object(raw).unwrap();
        assert_eq!(value["observation"], "x");
    }

    #[test]
    fn returns_none_for_no_json() {
        assert!(extract_json_object("no json here").is_none());
    }
}
