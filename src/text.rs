//! Text heuristics shared by query extraction, scoring, and retrieval.
//!
//! Everything here is deterministic and bilingual (English and Chinese).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Maximum queries returned by [`extract_queries`].
pub const MAX_EXTRACTED_QUERIES: usize = 10;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));
static NUMBERED_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+\s*[.、)]\s*(.+)$").expect("static regex"));
static QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["“「『]([^"”」』]+)["”」』]"#).expect("static regex"));
static QUESTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^.!?。！？\n]*[?？]").expect("static regex"));
static SENTENCE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?。！？]").expect("static regex"));
static IMPERATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(请|帮|告诉|说明|解释|描述|find|search|tell|explain|describe|show|list|compare)")
        .expect("static regex")
});

static PERSON_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\b[A-Z][a-z]+ [A-Z][a-z]+\b",
        r"[\p{Han}]{1,4}(?:先生|女士|教授|博士|老师)",
    ])
});
static ORGANIZATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\b[A-Z][A-Za-z]*(?: [A-Z][A-Za-z]*)* (?:Inc|Corp|Ltd|Company|University|Institute)\b",
        r"[\p{Han}]{2,8}(?:公司|大学|学院|研究所|机构|组织)",
    ])
});
static LOCATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\b[A-Z][a-z]+(?: [A-Z][a-z]+)* (?:City|State|Country)\b",
        r"[\p{Han}]{1,6}(?:市|省|县|州)",
    ])
});

const QUERY_CUES: &[&str] = &[
    "什么", "如何", "为什么", "哪里", "哪个", "谁", "何时", "what", "how", "why", "where",
    "which", "who", "when", "请", "帮助", "查找", "搜索", "告诉我",
];

const STOPWORDS: &[&str] = &[
    "的", "了", "在", "是", "我", "有", "和", "就", "不", "人", "都", "一", "一个", "the", "a",
    "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "is", "are",
    "was", "were", "be", "it", "its", "this", "that", "as", "from", "what", "how", "why",
];

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("static regex"))
        .collect()
}

/// Collapse runs of whitespace and trim.
pub fn clean_text(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// First `max` characters, with `...` appended when something was cut.
pub fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max).collect();
        format!("{}...", head)
    }
}

/// Split on sentence punctuation, keeping fragments longer than 5 characters.
pub fn split_sentences(text: &str) -> Vec<String> {
    SENTENCE_BREAK
        .split(text)
        .map(str::trim)
        .filter(|s| s.chars().count() > 5)
        .map(str::to_string)
        .collect()
}

/// Whether a sentence reads like a question or a search instruction.
pub fn is_query_like(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() < 3 {
        return false;
    }
    let lower = trimmed.to_lowercase();
    QUERY_CUES.iter().any(|cue| lower.contains(cue))
        || trimmed.ends_with('?')
        || trimmed.ends_with('？')
        || IMPERATIVE.is_match(&lower)
}

/// Pull candidate search queries out of free-form model output.
///
/// Tries numbered-list lines, then quoted substrings, then question sentences,
/// then query-like sentences; the first strategy that yields anything wins.
/// Results are whitespace-normalized, deduplicated, longer than 3 characters,
/// and capped at [`MAX_EXTRACTED_QUERIES`].
pub fn extract_queries(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let strategies: [fn(&str) -> Vec<String>; 4] = [
        numbered_lines,
        quoted_substrings,
        question_sentences,
        query_like_sentences,
    ];

    let raw = strategies
        .iter()
        .map(|strategy| strategy(text))
        .find(|found| !found.is_empty())
        .unwrap_or_default();

    dedupe_queries(raw, MAX_EXTRACTED_QUERIES)
}

/// Clean, drop short entries, and dedupe preserving first-seen order.
pub fn dedupe_queries(queries: impl IntoIterator<Item = String>, cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    queries
        .into_iter()
        .map(|q| clean_text(&q))
        .filter(|q| q.chars().count() > 3)
        .filter(|q| seen.insert(q.clone()))
        .take(cap)
        .collect()
}

fn numbered_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| NUMBERED_LINE.captures(line.trim()))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .filter(|q| q.chars().count() > 3)
        .collect()
}

fn quoted_substrings(text: &str) -> Vec<String> {
    QUOTED
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .filter(|q| q.chars().count() > 3)
        .collect()
}

fn question_sentences(text: &str) -> Vec<String> {
    QUESTION
        .find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .filter(|q| q.chars().count() > 3)
        .collect()
}

fn query_like_sentences(text: &str) -> Vec<String> {
    split_sentences(text)
        .into_iter()
        .filter(|s| is_query_like(s))
        .collect()
}

fn is_han(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

/// Lowercased tokens. Latin words split on non-alphanumerics; Han runs become
/// overlapping character bigrams so Chinese text can overlap without a segmenter.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut han_run: Vec<char> = Vec::new();

    let flush_han = |run: &mut Vec<char>, tokens: &mut Vec<String>| {
        match run.len() {
            0 => {}
            1 => tokens.push(run[0].to_string()),
            _ => tokens.extend(run.windows(2).map(|pair| pair.iter().collect::<String>())),
        }
        run.clear();
    };

    for c in text.chars() {
        if is_han(c) {
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
            han_run.push(c);
        } else if c.is_alphanumeric() {
            flush_han(&mut han_run, &mut tokens);
            word.extend(c.to_lowercase());
        } else {
            flush_han(&mut han_run, &mut tokens);
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
        }
    }
    flush_han(&mut han_run, &mut tokens);
    if !word.is_empty() {
        tokens.push(word);
    }
    tokens
}

/// Most frequent non-stopword tokens, ties broken by first occurrence.
pub fn extract_keywords(text: &str, max_keywords: usize) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();

    for token in tokenize(text) {
        if token.chars().count() < 2 || STOPWORDS.contains(&token.as_str()) {
            continue;
        }
        let count = counts.entry(token.clone()).or_insert(0);
        if *count == 0 {
            order.push(token);
        }
        *count += 1;
    }

    // stable sort keeps first-occurrence order among equal counts
    order.sort_by(|a, b| counts[b].cmp(&counts[a]));
    order.truncate(max_keywords);
    order
}

/// Share of `query` tokens that also occur in `content`, in [0, 1].
pub fn token_overlap(query: &str, content: &str) -> f64 {
    let query_tokens: HashSet<String> = tokenize(query)
        .into_iter()
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect();
    if query_tokens.is_empty() {
        return 0.0;
    }
    let content_tokens: HashSet<String> = tokenize(content).into_iter().collect();
    let hits = query_tokens
        .iter()
        .filter(|t| content_tokens.contains(*t))
        .count();
    hits as f64 / query_tokens.len() as f64
}

/// Named entities found by surface patterns.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractedEntities {
    pub persons: Vec<String>,
    pub organizations: Vec<String>,
    pub locations: Vec<String>,
}

impl ExtractedEntities {
    /// Total entities across categories.
    pub fn len(&self) -> usize {
        self.persons.len() + self.organizations.len() + self.locations.len()
    }

    /// Whether nothing was found.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pattern-based person/organization/location extraction.
pub fn extract_entities(text: &str) -> ExtractedEntities {
    fn collect(patterns: &[Regex], text: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for pattern in patterns {
            for m in pattern.find_iter(text) {
                let value = m.as_str().to_string();
                if !found.contains(&value) {
                    found.push(value);
                }
            }
        }
        found
    }

    ExtractedEntities {
        persons: collect(&PERSON_PATTERNS, text),
        organizations: collect(&ORGANIZATION_PATTERNS, text),
        locations: collect(&LOCATION_PATTERNS, text),
    }
}

/// Leading sentences that fit in `max_chars`, or a hard cut with `...`.
pub fn summarize(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut summary = String::new();
    for sentence in split_sentences(text) {
        if summary.chars().count() + sentence.chars().count() + 1 > max_chars {
            break;
        }
        summary.push_str(&sentence);
        summary.push_str(". ");
    }
    if summary.is_empty() {
        preview(text, max_chars)
    } else {
        summary.trim_end().to_string()
    }
}
