//! Sub-query, follow-up, rewrite and clarification generation.
//!
//! Every operation is one model call. Output is parsed as a [`SubQueryList`]
//! when the model returns JSON and otherwise mined with the text heuristics in
//! [`crate::text::extract_queries`]. A failed call yields no queries.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use super::{parse_completion, ErrorKind, ReasoningCore};
use crate::langbase::Message;
use crate::prompts::{
    CLARIFICATION_PROMPT, FOLLOWUP_QUERY_PROMPT, OPTIMIZE_QUERY_PROMPT, SUB_QUERY_PROMPT,
};
use crate::text::{clean_text, dedupe_queries, extract_queries};

const MAX_SUB_QUERIES: usize = 5;
const MAX_FOLLOWUPS: usize = 3;
const CLARIFICATIONS_PER_TERM: usize = 2;
const HISTORY_LIMIT: usize = 100;

/// What the generator knows about the running research.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryContext {
    pub original_query: String,
    pub current_context: String,
    pub previous_results: Vec<String>,
    pub keywords: Vec<String>,
    pub query_type: Option<String>,
}

impl QueryContext {
    /// Context for a fresh question.
    pub fn new(original_query: impl Into<String>) -> Self {
        Self {
            original_query: original_query.into(),
            ..Self::default()
        }
    }

    /// Set the running context text.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.current_context = context.into();
        self
    }

    /// Set the results retrieved so far.
    pub fn with_previous_results(mut self, results: Vec<String>) -> Self {
        self.previous_results = results;
        self
    }

    /// Set extracted keywords.
    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    fn render(&self) -> String {
        let mut prompt = format!("Question: {}", self.original_query);
        if let Some(query_type) = &self.query_type {
            prompt.push_str(&format!("\nQuestion type: {}", query_type));
        }
        if !self.keywords.is_empty() {
            prompt.push_str(&format!("\nKeywords: {}", self.keywords.join(", ")));
        }
        if !self.current_context.trim().is_empty() {
            prompt.push_str(&format!("\nContext: {}", self.current_context.trim()));
        }
        if !self.previous_results.is_empty() {
            prompt.push_str("\nResults so far:");
            for (i, result) in self.previous_results.iter().enumerate() {
                prompt.push_str(&format!("\n{}. {}", i + 1, result));
            }
        }
        prompt
    }
}

/// Goal for [`QueryGenerator::optimize_query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationGoal {
    /// Unambiguous wording.
    Clarity,
    /// Narrower, more concrete scope.
    Specificity,
    /// Broader recall.
    Coverage,
    /// Fewer irrelevant matches.
    Precision,
}

impl OptimizationGoal {
    /// Get the goal as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationGoal::Clarity => "clarity",
            OptimizationGoal::Specificity => "specificity",
            OptimizationGoal::Coverage => "coverage",
            OptimizationGoal::Precision => "precision",
        }
    }
}

impl fmt::Display for OptimizationGoal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizationGoal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "clarity" => Ok(OptimizationGoal::Clarity),
            "specificity" => Ok(OptimizationGoal::Specificity),
            "coverage" => Ok(OptimizationGoal::Coverage),
            "precision" => Ok(OptimizationGoal::Precision),
            _ => Err(format!("Unknown optimization goal: {}", s)),
        }
    }
}

/// Structured query list returned by the model.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SubQueryList {
    #[serde(default, alias = "sub_queries")]
    pub queries: Vec<String>,
}

impl SubQueryList {
    /// JSON `{"queries": [..]}` or a bare array; otherwise heuristic extraction.
    pub fn parse(completion: &str) -> Self {
        if let Ok(list) = parse_completion::<SubQueryList>(completion) {
            return list;
        }
        if let Ok(queries) = parse_completion::<Vec<String>>(completion) {
            return Self { queries };
        }
        Self {
            queries: extract_queries(completion),
        }
    }
}

/// Model-backed query generation with a bounded history.
pub struct QueryGenerator {
    core: ReasoningCore,
    history: VecDeque<String>,
}

impl QueryGenerator {
    /// Create a generator.
    pub fn new(core: ReasoningCore) -> Self {
        Self {
            core,
            history: VecDeque::new(),
        }
    }

    /// Split a question into at most five sub-queries.
    pub async fn generate_sub_queries(&mut self, context: &QueryContext) -> Vec<String> {
        self.generate_list("sub_queries", SUB_QUERY_PROMPT, context.render(), MAX_SUB_QUERIES)
            .await
    }

    /// At most three queries that fill gaps left by `context.previous_results`.
    pub async fn generate_followup_queries(&mut self, context: &QueryContext) -> Vec<String> {
        self.generate_list("followups", FOLLOWUP_QUERY_PROMPT, context.render(), MAX_FOLLOWUPS)
            .await
    }

    /// Up to two clarifying questions per ambiguous term.
    pub async fn generate_clarification_queries(
        &mut self,
        query: &str,
        ambiguous_terms: &[String],
    ) -> Vec<String> {
        if ambiguous_terms.is_empty() {
            return Vec::new();
        }
        let prompt = format!(
            "Question: {}\nAmbiguous terms: {}",
            query,
            ambiguous_terms.join(", ")
        );
        self.generate_list(
            "clarifications",
            CLARIFICATION_PROMPT,
            prompt,
            CLARIFICATIONS_PER_TERM * ambiguous_terms.len(),
        )
        .await
    }

    /// Rewrite `query` for `goal`; falls back to the original on failure or
    /// when the rewrite is three characters or fewer.
    pub async fn optimize_query(&mut self, query: &str, goal: OptimizationGoal) -> String {
        let messages = vec![
            Message::system(OPTIMIZE_QUERY_PROMPT),
            Message::user(format!("Goal: {}\nQuery: {}", goal, query)),
        ];
        let completion = match self.core.invoke("optimize_query", messages).await {
            Ok(completion) => completion,
            Err(_) => return query.to_string(),
        };

        let rewritten = completion
            .lines()
            .map(|line| clean_text(line).trim_matches(|c| c == '"' || c == '\'').to_string())
            .find(|line| !line.is_empty())
            .unwrap_or_default();
        if rewritten.chars().count() <= 3 {
            debug!(query = %query, "Rewrite too short, keeping original");
            return query.to_string();
        }
        self.remember(std::slice::from_ref(&rewritten));
        rewritten
    }

    /// Prefix matches from history, shortest first.
    pub fn query_suggestions(&self, partial: &str, limit: usize) -> Vec<String> {
        let partial = partial.trim().to_lowercase();
        if partial.is_empty() {
            return Vec::new();
        }
        let mut seen = HashSet::new();
        let mut matches: Vec<&String> = self
            .history
            .iter()
            .filter(|q| q.to_lowercase().starts_with(&partial))
            .filter(|q| seen.insert(q.as_str()))
            .collect();
        matches.sort_by_key(|q| q.chars().count());
        matches.into_iter().take(limit).cloned().collect()
    }

    /// Generated queries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &String> {
        self.history.iter()
    }

    /// Forget generated queries.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    async fn generate_list(
        &mut self,
        namespace: &str,
        system_prompt: &str,
        user_prompt: String,
        cap: usize,
    ) -> Vec<String> {
        let messages = vec![Message::system(system_prompt), Message::user(user_prompt)];
        let completion = match self.core.invoke(namespace, messages).await {
            Ok(completion) => completion,
            Err(e) => {
                warn!(operation = namespace, error = %e, "Query generation failed");
                return Vec::new();
            }
        };

        let list = SubQueryList::parse(&completion);
        if list.queries.is_empty() {
            self.core.errors().record(ErrorKind::Parse);
            debug!(operation = namespace, "No queries in model output");
        }
        let queries = dedupe_queries(list.queries, cap);
        self.remember(&queries);
        queries
    }

    fn remember(&mut self, queries: &[String]) {
        for query in queries {
            self.history.push_back(query.clone());
        }
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TieredCache;
    use crate::error::LangbaseError;
    use crate::langbase::MockLanguageModel;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    fn scripted(reply: &'static str) -> QueryGenerator {
        let mut model = MockLanguageModel::new();
        model
            .expect_invoke()
            .returning(move |_| Ok(reply.to_string()));
        QueryGenerator::new(ReasoningCore::new(
            Arc::new(model),
            TieredCache::in_memory(16, Duration::from_secs(60)),
        ))
    }

    fn failing_generator() -> QueryGenerator {
        let mut model = MockLanguageModel::new();
        model.expect_invoke().returning(|_| {
            Err(LangbaseError::Timeout { timeout_ms: 10 })
        });
        QueryGenerator::new(ReasoningCore::new(
            Arc::new(model),
            TieredCache::in_memory(16, Duration::from_secs(60)),
        ))
    }

    #[test]
    fn test_sub_query_list_parsing() {
        assert_eq!(
            SubQueryList::parse(r#"{"queries": ["a query", "b query"]}"#).queries,
            vec!["a query", "b query"]
        );
        assert_eq!(
            SubQueryList::parse("```json\n[\"only one\"]\n```").queries,
            vec!["only one"]
        );
        assert_eq!(
            SubQueryList::parse("1. what causes inflation\n2. how do wages respond").queries,
            vec!["what causes inflation", "how do wages respond"]
        );
    }

    #[tokio::test]
    async fn test_sub_queries_are_capped_and_deduped() {
        let mut generator = scripted(
            r#"{"queries": ["q one", "q one", "q two", "q three", "q four", "q five", "q six"]}"#,
        );
        let queries = generator
            .generate_sub_queries(&QueryContext::new("big question"))
            .await;
        assert_eq!(queries, vec!["q one", "q two", "q three", "q four", "q five"]);
    }

    #[tokio::test]
    async fn test_followups_capped_at_three() {
        let mut generator = scripted("1. first gap\n2. second gap\n3. third gap\n4. fourth gap");
        let context = QueryContext::new("q").with_previous_results(vec!["known fact".into()]);
        assert_eq!(generator.generate_followup_queries(&context).await.len(), 3);
    }

    #[tokio::test]
    async fn test_clarifications_two_per_term() {
        let mut generator = scripted(
            r#"{"queries": ["which bank?", "central or retail bank?", "what period?", "which year?", "extra?"]}"#,
        );
        let queries = generator
            .generate_clarification_queries("bank rates", &["bank".into(), "rates".into()])
            .await;
        assert_eq!(queries.len(), 4);
        assert!(generator
            .generate_clarification_queries("q", &[])
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_failed_call_yields_empty() {
        let mut generator = failing_generator();
        assert!(generator
            .generate_sub_queries(&QueryContext::new("q"))
            .await
            .is_empty());
        assert_eq!(
            generator
                .optimize_query("original query", OptimizationGoal::Precision)
                .await,
            "original query"
        );
    }

    #[tokio::test]
    async fn test_optimize_query_rewrites_and_rejects_short_output() {
        let mut generator = scripted("\"inflation drivers 2022 energy prices\"\n");
        assert_eq!(
            generator
                .optimize_query("why prices up", OptimizationGoal::Specificity)
                .await,
            "inflation drivers 2022 energy prices"
        );

        let mut generator = scripted("ok");
        assert_eq!(
            generator
                .optimize_query("why prices up", OptimizationGoal::Clarity)
                .await,
            "why prices up"
        );
    }

    #[tokio::test]
    async fn test_suggestions_shortest_first() {
        let mut generator = scripted(
            r#"{"queries": ["inflation in europe since 2020", "inflation causes", "wage growth"]}"#,
        );
        generator
            .generate_sub_queries(&QueryContext::new("q"))
            .await;
        assert_eq!(
            generator.query_suggestions("Infl", 5),
            vec!["inflation causes", "inflation in europe since 2020"]
        );
        generator.clear_history();
        assert!(generator.query_suggestions("infl", 5).is_empty());
    }
}
