//! Think → search → think session state machine.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::ReasoningCore;
use crate::config::ThinkingConfig;
use crate::error::LangbaseError;
use crate::langbase::Message;
use crate::prompts::THINKING_SYSTEM_PROMPT;
use crate::text::{dedupe_queries, extract_queries, preview};

/// Classification of one thinking step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingStatus {
    /// The model proposed queries to run.
    HasQuery,
    /// The model is ready to answer, or the depth budget is spent.
    AnswerReady,
    /// Neither queries nor readiness; call again.
    ContinueThinking,
    /// The model call exceeded its time budget.
    Timeout,
    /// The model call failed.
    Error,
}

impl ThinkingStatus {
    /// Get the status as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            ThinkingStatus::HasQuery => "has_query",
            ThinkingStatus::AnswerReady => "answer_ready",
            ThinkingStatus::ContinueThinking => "continue_thinking",
            ThinkingStatus::Timeout => "timeout",
            ThinkingStatus::Error => "error",
        }
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
}

/// One model turn and the queries extracted from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThinkingStep {
    pub step_number: usize,
    pub reasoning: String,
    pub queries: Vec<String>,
    pub status: ThinkingStatus,
    pub timestamp: DateTime<Utc>,
}

/// Result of [`ThinkingEngine::generate_next_query`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThinkingOutcome {
    pub status: ThinkingStatus,
    pub queries: Vec<String>,
    pub reasoning: String,
    pub step: usize,
}

impl ThinkingOutcome {
    fn without_step(status: ThinkingStatus, step: usize, reasoning: impl Into<String>) -> Self {
        Self {
            status,
            queries: Vec::new(),
            reasoning: reasoning.into(),
            step,
        }
    }
}

/// State of one user query's thinking loop.
#[derive(Debug, Clone)]
pub struct ThinkingSession {
    pub session_id: String,
    pub query: String,
    pub steps: Vec<ThinkingStep>,
    pub current_step: usize,
    pub status: SessionStatus,
    pub executed_queries: Vec<String>,
    pub created_at: DateTime<Utc>,
    messages: Vec<Message>,
    terminal: Option<ThinkingOutcome>,
}

/// Read-only view of the current session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub query: String,
    pub status: SessionStatus,
    pub total_steps: usize,
    pub total_queries: usize,
    pub executed_queries: usize,
    pub duration_secs: f64,
}

/// Drives one session at a time.
pub struct ThinkingEngine {
    core: ReasoningCore,
    config: ThinkingConfig,
    session: Option<ThinkingSession>,
}

impl ThinkingEngine {
    /// Create an engine.
    pub fn new(core: ReasoningCore, config: ThinkingConfig) -> Self {
        Self {
            core,
            config,
            session: None,
        }
    }

    /// Start a session for `query`, replacing any current one.
    pub fn create_session(&mut self, query: &str) -> String {
        let session_id = Uuid::new_v4().to_string();
        let messages = vec![
            Message::system(THINKING_SYSTEM_PROMPT),
            Message::user(format!(
                "Question: {}\n\nWhat information do you need to answer this question? List the searches to run, or say that you can answer.",
                query
            )),
        ];
        self.session = Some(ThinkingSession {
            session_id: session_id.clone(),
            query: query.to_string(),
            steps: Vec::new(),
            current_step: 0,
            status: SessionStatus::Active,
            executed_queries: Vec::new(),
            created_at: Utc::now(),
            messages,
            terminal: None,
        });
        info!(session_id = %session_id, "Thinking session created");
        session_id
    }

    /// The current session.
    pub fn session(&self) -> Option<&ThinkingSession> {
        self.session.as_ref()
    }

    /// Run one model turn and classify it.
    ///
    /// Reaching `max_depth` steps forces [`ThinkingStatus::AnswerReady`].
    /// Once a session has terminated, the terminal outcome is returned again
    /// without calling the model.
    pub async fn generate_next_query(&mut self) -> ThinkingOutcome {
        let Some(session) = self.session.as_mut() else {
            warn!("generate_next_query called without an active session");
            return ThinkingOutcome::without_step(ThinkingStatus::Error, 0, "no active session");
        };

        if let Some(terminal) = &session.terminal {
            return terminal.clone();
        }

        if session.steps.len() >= self.config.max_depth {
            let outcome = ThinkingOutcome::without_step(
                ThinkingStatus::AnswerReady,
                session.current_step,
                "maximum thinking depth reached",
            );
            finish(session, SessionStatus::Completed, &outcome);
            return outcome;
        }

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let result = self
            .core
            .invoke_with_timeout("thinking", session.messages.clone(), timeout)
            .await;

        let text = match result {
            Ok(text) => text,
            Err(LangbaseError::Timeout { timeout_ms }) => {
                let outcome = ThinkingOutcome::without_step(
                    ThinkingStatus::Timeout,
                    session.current_step,
                    format!("model call timed out after {}ms", timeout_ms),
                );
                finish(session, SessionStatus::Completed, &outcome);
                return outcome;
            }
            Err(e) => {
                let outcome = ThinkingOutcome::without_step(
                    ThinkingStatus::Error,
                    session.current_step,
                    e.to_string(),
                );
                finish(session, SessionStatus::Failed, &outcome);
                return outcome;
            }
        };

        let executed: HashSet<String> = session
            .executed_queries
            .iter()
            .map(|q| q.to_lowercase())
            .collect();
        let queries = dedupe_queries(
            extract_queries(&text)
                .into_iter()
                .filter(|q| !executed.contains(&q.to_lowercase())),
            self.config.max_queries_per_step,
        );

        let mut status = if !queries.is_empty() {
            ThinkingStatus::HasQuery
        } else if is_ready(&text, &self.config.ready_phrases) {
            ThinkingStatus::AnswerReady
        } else {
            ThinkingStatus::ContinueThinking
        };

        session.current_step += 1;
        session.messages.push(Message::assistant(text.clone()));
        if session.current_step >= self.config.max_depth {
            status = ThinkingStatus::AnswerReady;
        }
        session.steps.push(ThinkingStep {
            step_number: session.current_step,
            reasoning: text.clone(),
            queries: queries.clone(),
            status,
            timestamp: Utc::now(),
        });

        info!(
            session_id = %session.session_id,
            step = session.current_step,
            status = status.as_str(),
            queries = queries.len(),
            "Thinking step"
        );

        let outcome = ThinkingOutcome {
            status,
            queries,
            reasoning: text,
            step: session.current_step,
        };
        if status == ThinkingStatus::AnswerReady {
            finish(session, SessionStatus::Completed, &outcome);
        }
        outcome
    }

    /// Feed an executed query and its results back into the context.
    pub fn add_executed_query(&mut self, query: &str, results: Option<&[String]>) -> bool {
        let Some(session) = self.session.as_mut() else {
            warn!("add_executed_query called without an active session");
            return false;
        };
        let mut content = format!("Executed search: {}", query);
        match results {
            Some(results) if !results.is_empty() => {
                content.push_str("\nResults:");
                for (i, result) in results.iter().enumerate() {
                    content.push_str(&format!("\n{}. {}", i + 1, preview(result, 500)));
                }
            }
            _ => content.push_str("\nNo results."),
        }
        session.executed_queries.push(query.to_string());
        session.messages.push(Message::user(content));
        true
    }

    /// Add free-form information to the context.
    pub fn add_reasoning_step(&mut self, info: &str) -> bool {
        let Some(session) = self.session.as_mut() else {
            warn!("add_reasoning_step called without an active session");
            return false;
        };
        session
            .messages
            .push(Message::user(format!("Additional information: {}", info)));
        true
    }

    /// Status and counts for the current session.
    pub fn session_summary(&self) -> Option<SessionSummary> {
        let session = self.session.as_ref()?;
        Some(SessionSummary {
            session_id: session.session_id.clone(),
            query: session.query.clone(),
            status: session.status,
            total_steps: session.steps.len(),
            total_queries: session.steps.iter().map(|s| s.queries.len()).sum(),
            executed_queries: session.executed_queries.len(),
            duration_secs: (Utc::now() - session.created_at).num_milliseconds() as f64 / 1000.0,
        })
    }

    /// Steps of the current session.
    pub fn thinking_history(&self) -> Vec<ThinkingStep> {
        self.session
            .as_ref()
            .map(|s| s.steps.clone())
            .unwrap_or_default()
    }

    /// Drop the current session.
    pub fn reset_session(&mut self) {
        self.session = None;
    }
}

fn is_ready(text: &str, phrases: &[String]) -> bool {
    let lower = text.to_lowercase();
    phrases
        .iter()
        .any(|phrase| lower.contains(&phrase.to_lowercase()))
}

fn finish(session: &mut ThinkingSession, status: SessionStatus, outcome: &ThinkingOutcome) {
    session.status = status;
    session.terminal = Some(outcome.clone());
    info!(
        session_id = %session.session_id,
        status = outcome.status.as_str(),
        steps = session.steps.len(),
        "Thinking session finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TieredCache;
    use crate::error::LangbaseResult;
    use crate::langbase::{LanguageModel, MockLanguageModel};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn engine(model: impl LanguageModel + 'static, config: ThinkingConfig) -> ThinkingEngine {
        ThinkingEngine::new(
            ReasoningCore::new(
                Arc::new(model),
                TieredCache::in_memory(16, Duration::from_secs(60)),
            ),
            config,
        )
    }

    fn replying(text: &'static str) -> MockLanguageModel {
        let mut model = MockLanguageModel::new();
        model
            .expect_invoke()
            .returning(move |_| Ok(text.to_string()));
        model
    }

    #[tokio::test]
    async fn test_no_session_is_error_sentinel() {
        let mut engine = engine(MockLanguageModel::new(), ThinkingConfig::default());
        let outcome = engine.generate_next_query().await;
        assert_eq!(outcome.status, ThinkingStatus::Error);
        assert!(!engine.add_executed_query("q", None));
        assert!(engine.session_summary().is_none());
    }

    #[tokio::test]
    async fn test_extracts_queries_capped_per_step() {
        let mut engine = engine(
            replying("I need:\n1. inflation rate 2022\n2. unemployment 2022\n3. wage growth\n4. energy prices"),
            ThinkingConfig::default(),
        );
        engine.create_session("q");
        let outcome = engine.generate_next_query().await;
        assert_eq!(outcome.status, ThinkingStatus::HasQuery);
        assert_eq!(
            outcome.queries,
            vec!["inflation rate 2022", "unemployment 2022", "wage growth"]
        );
    }

    #[tokio::test]
    async fn test_ready_phrase_completes_session() {
        let mut engine = engine(
            replying("Based on the results, I can now answer."),
            ThinkingConfig::default(),
        );
        engine.create_session("q");
        let outcome = engine.generate_next_query().await;
        assert_eq!(outcome.status, ThinkingStatus::AnswerReady);
        assert_eq!(engine.session().unwrap().status, SessionStatus::Completed);

        let again = engine.generate_next_query().await;
        assert_eq!(again, outcome);
        assert_eq!(engine.thinking_history().len(), 1);
    }

    #[tokio::test]
    async fn test_depth_budget_forces_answer_ready() {
        let mut model = MockLanguageModel::new();
        model
            .expect_invoke()
            .times(3)
            .returning(|messages| Ok(format!("1. search number {}", messages.len())));
        let mut engine = engine(
            model,
            ThinkingConfig {
                max_depth: 3,
                ..ThinkingConfig::default()
            },
        );
        engine.create_session("q");

        let statuses: Vec<ThinkingStatus> = {
            let mut statuses = Vec::new();
            for _ in 0..3 {
                let outcome = engine.generate_next_query().await;
                for query in &outcome.queries {
                    engine.add_executed_query(query, Some(&["result".to_string()]));
                }
                statuses.push(outcome.status);
            }
            statuses
        };
        assert_eq!(
            statuses,
            vec![
                ThinkingStatus::HasQuery,
                ThinkingStatus::HasQuery,
                ThinkingStatus::AnswerReady
            ]
        );
        let summary = engine.session_summary().unwrap();
        assert_eq!(summary.status, SessionStatus::Completed);
        assert_eq!(summary.total_steps, 3);
        assert_eq!(summary.executed_queries, 3);
    }

    #[tokio::test]
    async fn test_executed_queries_are_not_proposed_again() {
        let mut engine = engine(
            replying("1. inflation rate 2022\n2. wage growth"),
            ThinkingConfig::default(),
        );
        engine.create_session("q");
        engine.add_executed_query("Inflation rate 2022", None);
        let outcome = engine.generate_next_query().await;
        assert_eq!(outcome.queries, vec!["wage growth"]);
    }

    #[tokio::test]
    async fn test_model_error_fails_session() {
        let mut model = MockLanguageModel::new();
        model.expect_invoke().times(1).returning(|_| {
            Err(LangbaseError::Api {
                status: 401,
                message: "bad key".to_string(),
            })
        });
        let mut engine = engine(model, ThinkingConfig::default());
        engine.create_session("q");
        assert_eq!(engine.generate_next_query().await.status, ThinkingStatus::Error);
        assert_eq!(engine.session().unwrap().status, SessionStatus::Failed);
        assert_eq!(engine.generate_next_query().await.status, ThinkingStatus::Error);
    }

    struct Slow;

    #[async_trait]
    impl LanguageModel for Slow {
        async fn invoke(&self, _messages: Vec<Message>) -> LangbaseResult<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("too late".to_string())
        }
    }

    #[tokio::test]
    async fn test_timeout_completes_session() {
        let mut engine = engine(
            Slow,
            ThinkingConfig {
                timeout_secs: 1,
                ..ThinkingConfig::default()
            },
        );
        engine.create_session("q");
        let outcome = engine.generate_next_query().await;
        assert_eq!(outcome.status, ThinkingStatus::Timeout);
        assert_eq!(engine.session().unwrap().status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_reset_session() {
        let mut engine = engine(MockLanguageModel::new(), ThinkingConfig::default());
        engine.create_session("q");
        assert!(engine.add_reasoning_step("graph says A relates to B"));
        engine.reset_session();
        assert!(engine.session().is_none());
        assert!(engine.thinking_history().is_empty());
    }
}
