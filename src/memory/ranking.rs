#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

/// Buckets a raw cosine similarity score into a coarse confidence tier for
/// display — callers that want to show "strong match" vs "loose match"
/// badges don't need to reason about the raw float. Scores below the low
/// threshold are not tiered here; callers drop them before ranking.
pub fn confidence_tier(score: f32) -> ConfidenceTier {
    if score >= HIGH_CONFIDENCE_THRESHOLD {
        ConfidenceTier::High
    } else if score >= MEDIUM_CONFIDENCE_THRESHOLD {
        ConfidenceTier::Medium
    } else {
        ConfidenceTier::Low
    }
}

pub const HIGH_CONFIDENCE_THRESHOLD: f32 = 0.75;
pub const MEDIUM_CONFIDENCE_THRESHOLD: f32 = 0.60;
pub const LOW_CONFIDENCE_THRESHOLD: f32 = 0.45;

/// Same-file/same-context observations are considered duplicates above a
/// lower bar than unrelated ones — shared context is itself evidence.
pub const AUTO_RESOLVE_SAME_CONTEXT_THRESHOLD: f32 = 0.85;
pub const AUTO_RESOLVE_NO_CONTEXT_THRESHOLD: f32 = 0.92;

/// Code chunks from source and tests rank above generated code and config
/// when relevance is otherwise close, since those are what an agent is
/// usually trying to read or modify.
pub fn doc_type_weight(doc_type: &str) -> f32 {
    match doc_type {
        "code" => 1.0,
        "tests" => 0.95,
        "docs" => 0.85,
        "config" => 0.7,
        "generated" => 0.4,
        _ => 0.8,
    }
}
