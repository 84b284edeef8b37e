//! Heuristic query complexity scoring used to pick a research strategy.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::text::{extract_entities, extract_keywords, tokenize};

const LEXICAL_WEIGHT: f64 = 0.2;
const SEMANTIC_WEIGHT: f64 = 0.3;
const STRUCTURAL_WEIGHT: f64 = 0.25;
const REASONING_WEIGHT: f64 = 0.25;

/// Overall floor once a query makes two distinct reasoning demands.
const MULTI_DEMAND_FLOOR: f64 = 0.6;

const COMPARISON: &[&str] = &[
    "compare", "comparison", "versus", "difference", "differences", "similarities", "contrast",
    "比较", "对比", "区别", "差异", "相比", "异同",
];
const ANALYSIS: &[&str] = &[
    "analyze", "analyse", "analysis", "examine", "investigate", "relationship", "分析", "研究",
    "探讨", "关系", "剖析",
];
const EVALUATION: &[&str] = &[
    "evaluate", "assess", "assessment", "pros and cons", "advantages", "disadvantages", "评估",
    "评价", "优缺点", "利弊",
];
const SYNTHESIS: &[&str] = &[
    "synthesize", "combine", "integrate", "summarize", "overall", "综合", "总结", "整合", "归纳",
];
const INFERENCE: &[&str] = &[
    "infer", "predict", "implication", "implications", "conclude", "deduce", "推断", "预测",
    "推理", "意味着",
];
const CAUSAL: &[&str] = &[
    "because", "why", "cause", "causes", "effect", "effects", "impact", "reason", "reasons",
    "therefore", "lead to", "result in", "因为", "为什么", "原因", "导致", "影响", "所以",
    "因此", "结果",
];
const MULTI_STEP: &[&str] = &[
    "first", "then", "finally", "next", "step by step", "afterwards", "首先", "然后", "最后",
    "其次", "接着", "进一步",
];

const DEMANDS: &[(&str, &[&str])] = &[
    ("comparison", COMPARISON),
    ("analysis", ANALYSIS),
    ("evaluation", EVALUATION),
    ("synthesis", SYNTHESIS),
    ("inference", INFERENCE),
    ("causal", CAUSAL),
    ("multi-step", MULTI_STEP),
];

static COMPOUND_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        (
            "conditional",
            r"\bif\b.*\bthen\b|\bunless\b|\bprovided that\b|如果|假如|假设|只要",
        ),
        (
            "concessive",
            r"\balthough\b|\bthough\b|\beven if\b|\bdespite\b|虽然|尽管|即使",
        ),
        (
            "enumerative",
            r"\bfirst(ly)?\b.*\b(second(ly)?|then|next)\b|首先.*(其次|然后)|第一.*第二",
        ),
        (
            "contrastive",
            r"\bwhereas\b|\bon the other hand\b|\bhowever\b|然而|但是|相反|与此同时",
        ),
        (
            "progressive",
            r"\bnot only\b.*\bbut also\b|\bfurthermore\b|\bmoreover\b|不仅.*而且|不但|此外|并且",
        ),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).expect("static regex")))
    .collect()
});

const CLAUSE_PUNCTUATION: &[char] = &[',', '，', ';', '；', ':', '：', '、'];

/// Complexity band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    /// overall < 0.3
    Simple,
    /// 0.3 ≤ overall < 0.6
    Moderate,
    /// 0.6 ≤ overall < 0.8
    Complex,
    /// overall ≥ 0.8
    VeryComplex,
}

impl ComplexityLevel {
    /// Threshold lookup for an overall score.
    pub fn from_score(score: f64) -> Self {
        if score < 0.3 {
            ComplexityLevel::Simple
        } else if score < 0.6 {
            ComplexityLevel::Moderate
        } else if score < 0.8 {
            ComplexityLevel::Complex
        } else {
            ComplexityLevel::VeryComplex
        }
    }

    /// Get the level as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityLevel::Simple => "simple",
            ComplexityLevel::Moderate => "moderate",
            ComplexityLevel::Complex => "complex",
            ComplexityLevel::VeryComplex => "very_complex",
        }
    }

    /// Whether this level selects the iterative loop by default.
    pub fn prefers_iteration(&self) -> bool {
        matches!(self, ComplexityLevel::Complex | ComplexityLevel::VeryComplex)
    }
}

impl fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComplexityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" => Ok(ComplexityLevel::Simple),
            "moderate" => Ok(ComplexityLevel::Moderate),
            "complex" => Ok(ComplexityLevel::Complex),
            "very_complex" => Ok(ComplexityLevel::VeryComplex),
            _ => Err(format!("Unknown complexity level: {}", s)),
        }
    }
}

/// Sub-scores, overall score and advice for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplexityMetrics {
    pub lexical_complexity: f64,
    pub semantic_complexity: f64,
    pub structural_complexity: f64,
    pub reasoning_complexity: f64,
    pub overall_complexity: f64,
    pub level: ComplexityLevel,
    pub factors: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Level counts over a batch of queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplexityDistribution {
    pub total: usize,
    pub levels: BTreeMap<String, usize>,
    pub average_overall: f64,
}

/// Stateless scorer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComplexityEstimator;

impl ComplexityEstimator {
    /// Create an estimator.
    pub fn new() -> Self {
        Self
    }

    /// Score a query. `context` contributes entities only.
    pub fn estimate_complexity(&self, query: &str, context: Option<&str>) -> ComplexityMetrics {
        let lower = query.to_lowercase();

        let lexical = lexical_score(query);
        let semantic = semantic_score(query, &lower, context);
        let (structural, patterns) = structural_score(query, &lower);
        let reasoning = reasoning_score(query, &lower);
        let demands = reasoning_demands(&lower);

        let mut overall = (LEXICAL_WEIGHT * lexical
            + SEMANTIC_WEIGHT * semantic
            + STRUCTURAL_WEIGHT * structural
            + REASONING_WEIGHT * reasoning)
            .clamp(0.0, 1.0);
        // short comparative or causal questions still need several hops
        if demands.len() >= 2 {
            overall = overall.max(MULTI_DEMAND_FLOOR);
        }
        let level = ComplexityLevel::from_score(overall);

        let mut factors = Vec::new();
        for (name, score) in [
            ("lexical", lexical),
            ("semantic", semantic),
            ("structural", structural),
            ("reasoning", reasoning),
        ] {
            if score > 0.7 {
                factors.push(format!("high {} complexity", name));
            }
        }
        if demands.len() >= 2 {
            factors.push(format!("multiple reasoning demands: {}", demands.join(", ")));
        }
        if !patterns.is_empty() {
            factors.push(format!("compound sentence: {}", patterns.join(", ")));
        }
        if query.chars().count() > 100 {
            factors.push("long query".to_string());
        }
        if question_marks(query) > 1 {
            factors.push("multiple questions".to_string());
        }

        ComplexityMetrics {
            lexical_complexity: lexical,
            semantic_complexity: semantic,
            structural_complexity: structural,
            reasoning_complexity: reasoning,
            overall_complexity: overall,
            level,
            factors,
            recommendations: recommendations(level),
        }
    }

    /// Score each query independently.
    pub fn batch_estimate(&self, queries: &[String]) -> Vec<ComplexityMetrics> {
        queries
            .iter()
            .map(|q| self.estimate_complexity(q, None))
            .collect()
    }

    /// Per-level counts and the mean overall score.
    pub fn complexity_distribution(&self, queries: &[String]) -> ComplexityDistribution {
        let metrics = self.batch_estimate(queries);
        let mut levels: BTreeMap<String, usize> = [
            ComplexityLevel::Simple,
            ComplexityLevel::Moderate,
            ComplexityLevel::Complex,
            ComplexityLevel::VeryComplex,
        ]
        .iter()
        .map(|l| (l.as_str().to_string(), 0))
        .collect();
        for m in &metrics {
            *levels.entry(m.level.as_str().to_string()).or_insert(0) += 1;
        }
        let total = metrics.len();
        let average_overall = if total == 0 {
            0.0
        } else {
            metrics.iter().map(|m| m.overall_complexity).sum::<f64>() / total as f64
        };
        ComplexityDistribution {
            total,
            levels,
            average_overall,
        }
    }
}

fn ratio(count: usize, saturation: f64) -> f64 {
    (count as f64 / saturation).min(1.0)
}

/// Latin terms must sit on word boundaries; Han terms match as substrings.
fn contains_term(haystack: &str, term: &str) -> bool {
    if !term.is_ascii() {
        return haystack.contains(term);
    }
    haystack.match_indices(term).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + term.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_alphanumeric())
            && !after.is_some_and(|c| c.is_ascii_alphanumeric())
    })
}

fn term_hits(haystack: &str, families: &[&[&str]]) -> usize {
    families
        .iter()
        .flat_map(|family| family.iter())
        .filter(|term| contains_term(haystack, term))
        .count()
}

/// Names of the reasoning families a query draws on.
fn reasoning_demands(lower: &str) -> Vec<&'static str> {
    DEMANDS
        .iter()
        .filter(|(_, terms)| terms.iter().any(|term| contains_term(lower, term)))
        .map(|(name, _)| *name)
        .collect()
}

fn question_marks(query: &str) -> usize {
    query.chars().filter(|c| *c == '?' || *c == '？').count()
}

fn lexical_score(query: &str) -> f64 {
    let tokens = tokenize(query);
    if tokens.is_empty() {
        return 0.0;
    }
    let length = ratio(query.chars().count(), 100.0);
    let unique: HashSet<&String> = tokens.iter().collect();
    let diversity = unique.len() as f64 / tokens.len() as f64;
    let latin: Vec<&String> = tokens.iter().filter(|t| t.is_ascii()).collect();
    let long_words = if latin.is_empty() {
        0.0
    } else {
        latin.iter().filter(|t| t.chars().count() >= 7).count() as f64 / latin.len() as f64
    };
    0.5 * length + 0.3 * diversity + 0.2 * long_words
}

fn semantic_score(query: &str, lower: &str, context: Option<&str>) -> f64 {
    let mut entities = extract_entities(query).len();
    if let Some(context) = context {
        entities += extract_entities(context).len();
    }
    let keywords = extract_keywords(query, 20).len();
    let families = term_hits(lower, &[COMPARISON, ANALYSIS, EVALUATION, SYNTHESIS, INFERENCE]);
    0.3 * ratio(entities, 3.0) + 0.3 * ratio(keywords, 10.0) + 0.4 * ratio(families, 3.0)
}

fn structural_score(query: &str, lower: &str) -> (f64, Vec<&'static str>) {
    let patterns: Vec<&'static str> = COMPOUND_PATTERNS
        .iter()
        .filter(|(_, re)| re.is_match(lower))
        .map(|(name, _)| *name)
        .collect();
    let punctuation = query
        .chars()
        .filter(|c| CLAUSE_PUNCTUATION.contains(c))
        .count();
    let score = 0.6 * ratio(patterns.len(), 2.0) + 0.4 * ratio(punctuation, 4.0);
    (score, patterns)
}

fn reasoning_score(query: &str, lower: &str) -> f64 {
    let causal = term_hits(lower, &[CAUSAL]);
    let steps = term_hits(lower, &[MULTI_STEP]);
    let multi_question = if question_marks(query) > 1 { 1.0 } else { 0.0 };
    0.5 * ratio(causal, 3.0) + 0.3 * ratio(steps, 2.0) + 0.2 * multi_question
}

fn recommendations(level: ComplexityLevel) -> Vec<String> {
    let advice: &[&str] = match level {
        ComplexityLevel::Simple => &[
            "Answer with a single retrieval pass",
            "Prefer the fast keyword path",
        ],
        ComplexityLevel::Moderate => &[
            "Combine knowledge-base and graph retrieval",
            "One retrieval round is usually enough",
        ],
        ComplexityLevel::Complex => &[
            "Use the iterative reasoning loop",
            "Decompose the question into sub-queries",
            "Track evidence across rounds",
        ],
        ComplexityLevel::VeryComplex => &[
            "Use the iterative reasoning loop with the full iteration budget",
            "Explore the graph from the main entities",
            "Validate the final answer against collected evidence",
        ],
    };
    advice.iter().map(|s| s.to_string()).collect()
}
