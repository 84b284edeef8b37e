//! Iterative reasoning and graph-exploration engine.
//!
//! Leaf-first: [`EvidenceTracker`] and [`ComplexityEstimator`] hold no I/O;
//! [`ChainedExploration`] walks a [`GraphStore`](crate::storage::GraphStore);
//! [`DualPathSearcher`] fans retrieval out over two sources; the
//! [`QueryGenerator`], [`ThinkingEngine`] and [`AnswerValidator`] wrap model
//! calls through a shared [`ReasoningCore`]; [`KnowledgeGraphBuilder`] turns
//! collected evidence into a per-question graph; [`ResearchAgent`] composes them.

mod complexity;
mod core;
mod dual_search;
mod evidence;
mod exploration;
mod kg_builder;
mod query_generator;
mod research;
mod thinking;
mod validator;

pub use self::core::{CallMetrics, ErrorKind, ErrorStats, MetricsSnapshot, ReasoningCore};
pub use complexity::{
    ComplexityDistribution, ComplexityEstimator, ComplexityLevel, ComplexityMetrics,
};
pub use dual_search::{
    fuse_results, DualPathSearcher, SearchFilters, SearchHit, SearchMode, SearchSource,
    SearchStatistics,
};
pub use evidence::{
    evidence_fingerprint, ChainSummary, Evidence, EvidenceChain, EvidenceDetails,
    EvidenceTracker, NewEvidence, ReasoningStep, SourceType, TraceEvidence, TraceStep,
};
pub use exploration::{
    ChainedExploration, ExplorationNode, ExplorationPath, ExplorationStatus, ExplorationSummary,
    StepOutcome,
};
pub use kg_builder::{
    GraphEntity, GraphRelation, GraphSummary, KnowledgeGraph, KnowledgeGraphBuilder,
};
pub use query_generator::{OptimizationGoal, QueryContext, QueryGenerator, SubQueryList};
pub use research::{ResearchAgent, ResearchReport, Strategy, FALLBACK_ANSWER};
pub use thinking::{
    SessionStatus, SessionSummary, ThinkingEngine, ThinkingOutcome, ThinkingSession,
    ThinkingStatus, ThinkingStep,
};
pub use validator::{
    AccuracyCheck, AnswerValidator, CompletenessCheck, ConsistencyCheck, ValidationResult,
    ValidationStatistics,
};

use serde::de::DeserializeOwned;

/// Extract JSON from a completion string, handling markdown code blocks.
///
/// Attempts extraction in this order:
/// 1. Raw JSON (fast path)
/// 2. ```json ... ``` code blocks
/// 3. ``` ... ``` code blocks
pub(crate) fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed);
    }

    if completion.contains("```json") {
        return completion
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ```json block but content was empty or malformed".to_string());
    }

    if completion.contains("```") {
        return completion
            .split("```")
            .nth(1)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ``` block but content was empty or malformed".to_string());
    }

    Err(format!(
        "No JSON found in response. First 100 chars: '{}'",
        completion.chars().take(100).collect::<String>()
    ))
}

/// Extract and deserialize a typed record from a completion.
pub(crate) fn parse_completion<T: DeserializeOwned>(completion: &str) -> Result<T, String> {
    let json = extract_json_from_completion(completion)?;
    serde_json::from_str(json).map_err(|e| format!("Failed to parse completion JSON: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Score {
        score: f64,
    }

    #[test]
    fn test_extract_raw_json() {
        assert_eq!(
            extract_json_from_completion("  {\"a\": 1} ").unwrap(),
            "{\"a\": 1}"
        );
    }

    #[test]
    fn test_extract_fenced_json() {
        let completion = "Here you go:\n```json\n{\"score\": 0.9}\n```\nDone.";
        assert_eq!(
            extract_json_from_completion(completion).unwrap(),
            "{\"score\": 0.9}"
        );
        let plain = "```\n[1, 2]\n```";
        assert_eq!(extract_json_from_completion(plain).unwrap(), "[1, 2]");
    }

    #[test]
    fn test_extract_failure_mentions_prefix() {
        let err = extract_json_from_completion("no json here").unwrap_err();
        assert!(err.contains("no json here"));
        assert!(extract_json_from_completion("```json\n```").is_err());
    }

    #[test]
    fn test_parse_completion() {
        let parsed: Score = parse_completion("```json\n{\"score\": 0.25}\n```").unwrap();
        assert_eq!(parsed, Score { score: 0.25 });
        assert!(parse_completion::<Score>("{\"other\": 1}").is_err());
    }
}
