//! Post-hoc answer scoring against evidence and the question.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{info, warn};

use super::{parse_completion, ErrorKind, ReasoningCore};
use crate::config::ValidationConfig;
use crate::langbase::Message;
use crate::prompts::{ACCURACY_CHECK_PROMPT, COMPLETENESS_CHECK_PROMPT, CONSISTENCY_CHECK_PROMPT};
use crate::text::split_sentences;

const NEUTRAL_SCORE: f64 = 0.5;
const ACCURACY_WEIGHT: f64 = 0.3;
const COMPLETENESS_WEIGHT: f64 = 0.25;
const CONSISTENCY_WEIGHT: f64 = 0.25;
const CLARITY_WEIGHT: f64 = 0.2;

static STRUCTURE_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(#{1,6}\s|[-*•]\s|\d+[.、)]\s?|[一二三四五六七八九十]+、)")
        .expect("static regex")
});
static REFERENCE_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[\d+\]|根据|参考|来源|according to|source:").expect("static regex")
});

/// Accuracy against evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyCheck {
    #[serde(default = "neutral")]
    pub accuracy_score: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// Coverage of the question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletenessCheck {
    #[serde(default = "neutral")]
    pub completeness_score: f64,
    #[serde(default)]
    pub missing_aspects: Vec<String>,
}

/// Internal consistency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyCheck {
    #[serde(default = "neutral")]
    pub consistency_score: f64,
    #[serde(default)]
    pub contradictions: Vec<String>,
}

fn neutral() -> f64 {
    NEUTRAL_SCORE
}

impl Default for AccuracyCheck {
    fn default() -> Self {
        Self {
            accuracy_score: NEUTRAL_SCORE,
            issues: Vec::new(),
            suggestions: Vec::new(),
        }
    }
}

impl Default for CompletenessCheck {
    fn default() -> Self {
        Self {
            completeness_score: NEUTRAL_SCORE,
            missing_aspects: Vec::new(),
        }
    }
}

impl Default for ConsistencyCheck {
    fn default() -> Self {
        Self {
            consistency_score: NEUTRAL_SCORE,
            contradictions: Vec::new(),
        }
    }
}

/// Combined validation outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub overall_score: f64,
    pub accuracy: AccuracyCheck,
    pub completeness: CompletenessCheck,
    pub consistency: ConsistencyCheck,
    pub clarity_score: f64,
    pub feedback: Vec<String>,
}

/// Totals over validations run so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationStatistics {
    pub total_validations: usize,
    pub valid_count: usize,
    pub average_score: f64,
    pub valid_rate: f64,
}

/// Validations kept for [`AnswerValidator::validation_statistics`].
pub const HISTORY_LIMIT: usize = 100;

/// Runs the three model checks plus local clarity scoring.
pub struct AnswerValidator {
    core: ReasoningCore,
    config: ValidationConfig,
    history: VecDeque<(bool, f64)>,
}

impl AnswerValidator {
    /// Create a validator.
    pub fn new(core: ReasoningCore, config: ValidationConfig) -> Self {
        Self {
            core,
            config,
            history: VecDeque::new(),
        }
    }

    /// Score `answer` for `question` against `evidence`.
    pub async fn validate_answer(
        &mut self,
        question: &str,
        answer: &str,
        evidence: &[String],
    ) -> ValidationResult {
        if !self.config.enabled {
            return ValidationResult {
                is_valid: true,
                overall_score: 1.0,
                accuracy: AccuracyCheck::default(),
                completeness: CompletenessCheck::default(),
                consistency: ConsistencyCheck::default(),
                clarity_score: clarity_score(answer),
                feedback: vec!["Validation disabled".to_string()],
            };
        }

        let evidence_block = evidence
            .iter()
            .enumerate()
            .map(|(i, e)| format!("[{}] {}", i + 1, e))
            .collect::<Vec<_>>()
            .join("\n");

        let accuracy: AccuracyCheck = self
            .check(
                "validate_accuracy",
                ACCURACY_CHECK_PROMPT,
                format!("Evidence:\n{}\n\nAnswer:\n{}", evidence_block, answer),
            )
            .await;
        let completeness: CompletenessCheck = self
            .check(
                "validate_completeness",
                COMPLETENESS_CHECK_PROMPT,
                format!("Question:\n{}\n\nAnswer:\n{}", question, answer),
            )
            .await;
        let consistency: ConsistencyCheck = self
            .check(
                "validate_consistency",
                CONSISTENCY_CHECK_PROMPT,
                format!("Answer:\n{}", answer),
            )
            .await;
        let clarity = clarity_score(answer);

        let overall_score = (accuracy.accuracy_score.clamp(0.0, 1.0) * ACCURACY_WEIGHT
            + completeness.completeness_score.clamp(0.0, 1.0) * COMPLETENESS_WEIGHT
            + consistency.consistency_score.clamp(0.0, 1.0) * CONSISTENCY_WEIGHT
            + clarity * CLARITY_WEIGHT)
            .clamp(0.0, 1.0);
        let is_valid = overall_score >= self.config.threshold;

        let mut feedback: Vec<String> = Vec::new();
        feedback.extend(accuracy.issues.iter().map(|i| format!("Accuracy issue: {}", i)));
        feedback.extend(accuracy.suggestions.iter().map(|s| format!("Suggestion: {}", s)));
        feedback.extend(
            completeness
                .missing_aspects
                .iter()
                .map(|m| format!("Missing: {}", m)),
        );
        feedback.extend(
            consistency
                .contradictions
                .iter()
                .map(|c| format!("Contradiction: {}", c)),
        );
        if clarity < 0.7 {
            feedback.push("Improve clarity and structure".to_string());
        }

        self.history.push_back((is_valid, overall_score));
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
        info!(
            overall_score = overall_score,
            is_valid = is_valid,
            "Answer validated"
        );

        ValidationResult {
            is_valid,
            overall_score,
            accuracy,
            completeness,
            consistency,
            clarity_score: clarity,
            feedback,
        }
    }

    /// Totals over the most recent [`HISTORY_LIMIT`] validations.
    pub fn validation_statistics(&self) -> ValidationStatistics {
        let total = self.history.len();
        if total == 0 {
            return ValidationStatistics::default();
        }
        let valid_count = self.history.iter().filter(|(valid, _)| *valid).count();
        let sum: f64 = self.history.iter().map(|(_, score)| score).sum();
        ValidationStatistics {
            total_validations: total,
            valid_count,
            average_score: sum / total as f64,
            valid_rate: valid_count as f64 / total as f64,
        }
    }

    async fn check<T>(&self, namespace: &str, prompt: &str, content: String) -> T
    where
        T: serde::de::DeserializeOwned + Default,
    {
        let messages = vec![Message::system(prompt), Message::user(content)];
        let completion = match self.core.invoke(namespace, messages).await {
            Ok(completion) => completion,
            Err(_) => return T::default(),
        };
        match parse_completion::<T>(&completion) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.core.errors().record(ErrorKind::Parse);
                warn!(check = namespace, error = %e, "Unparsable validation response");
                T::default()
            }
        }
    }
}

/// Local readability heuristic in [0, 1].
pub(crate) fn clarity_score(answer: &str) -> f64 {
    let chars = answer.chars().count();
    let mut score: f64 = 1.0;
    if chars < 50 {
        score -= 0.2;
    } else if chars > 2000 {
        score -= 0.1;
    }
    if STRUCTURE_MARKERS.is_match(answer) {
        score += 0.1;
    }
    if REFERENCE_MARKERS.is_match(&answer.to_lowercase()) {
        score += 0.1;
    }
    let sentences = split_sentences(answer);
    if !sentences.is_empty() {
        let average = sentences
            .iter()
            .map(|s| s.chars().count())
            .sum::<usize>() as f64
            / sentences.len() as f64;
        if average > 100.0 {
            score -= 0.1;
        }
    }
    score.clamp(0.0, 1.0)
}
