//! Question answering: complexity gate, reasoning loop, synthesis, validation.

use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::{
    AnswerValidator, ChainSummary, ChainedExploration, ComplexityEstimator, ComplexityMetrics,
    DualPathSearcher, EvidenceTracker, ExplorationSummary, KnowledgeGraphBuilder, MetricsSnapshot,
    NewEvidence, QueryContext, QueryGenerator, ReasoningCore, SearchHit, SearchMode, SearchSource,
    SourceType, ThinkingEngine, ThinkingStatus, ThinkingStep, TraceStep, ValidationResult,
};
use crate::config::{ReasoningConfig, ResearchConfig};
use crate::langbase::Message;
use crate::prompts::ANSWER_SYNTHESIS_PROMPT;
use crate::streaming::{ProgressEvent, ProgressSender};
use crate::text::{extract_keywords, preview};

/// Answer used when nothing relevant was found and synthesis failed.
pub const FALLBACK_ANSWER: &str =
    "Sorry, I could not find relevant information to answer this question.";

/// Extracted graph evidence ranks below the passages it came from.
const GRAPH_RELEVANCE_FACTOR: f64 = 0.9;

/// Path chosen from the complexity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One combined search, then one answer call.
    SingleShot,
    /// The think → search loop.
    Iterative,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::SingleShot => write!(f, "single_shot"),
            Strategy::Iterative => write!(f, "iterative"),
        }
    }
}

/// Everything produced while answering one question.
#[derive(Debug, Clone, Serialize)]
pub struct ResearchReport {
    pub query: String,
    pub answer: String,
    pub strategy: Strategy,
    pub complexity: ComplexityMetrics,
    pub thinking_history: Vec<ThinkingStep>,
    pub evidence_summary: Option<ChainSummary>,
    pub reasoning_trace: Vec<TraceStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exploration: Option<ExplorationSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
    pub iterations: usize,
    pub execution_log: Vec<String>,
    pub metrics: MetricsSnapshot,
    pub duration_secs: f64,
}

/// Composition root of the reasoning engine.
pub struct ResearchAgent {
    config: ResearchConfig,
    core: ReasoningCore,
    estimator: ComplexityEstimator,
    searcher: DualPathSearcher,
    evidence: EvidenceTracker,
    thinking: ThinkingEngine,
    queries: QueryGenerator,
    validator: AnswerValidator,
    graph_builder: KnowledgeGraphBuilder,
    evidence_capacity: usize,
    exploration: Option<ChainedExploration>,
    progress: Option<ProgressSender>,
}

impl ResearchAgent {
    /// Wire every component to one core. Use the `with_*` methods to give
    /// query generation or validation their own model.
    pub fn new(config: &ReasoningConfig, core: ReasoningCore, searcher: DualPathSearcher) -> Self {
        Self {
            config: config.research.clone(),
            estimator: ComplexityEstimator::new(),
            searcher,
            evidence: EvidenceTracker::new(config.evidence.clone()),
            thinking: ThinkingEngine::new(core.clone(), config.thinking.clone()),
            queries: QueryGenerator::new(core.clone()),
            validator: AnswerValidator::new(core.clone(), config.validation.clone()),
            graph_builder: KnowledgeGraphBuilder::new(core.clone()),
            evidence_capacity: config.evidence.max_evidence_items,
            exploration: None,
            progress: None,
            core,
        }
    }

    /// Generate sub-queries through `core`.
    pub fn with_query_core(mut self, core: ReasoningCore) -> Self {
        self.queries = QueryGenerator::new(core);
        self
    }

    /// Validate answers through `core`.
    pub fn with_validator(mut self, validator: AnswerValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Run chained exploration before the loop when enabled in config.
    pub fn with_exploration(mut self, exploration: ChainedExploration) -> Self {
        self.exploration = Some(exploration);
        self
    }

    /// Emit progress events to `sender`.
    pub fn with_progress(mut self, sender: ProgressSender) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Answer `query`. Sub-call failures degrade; this never errors.
    pub async fn answer(&mut self, query: &str) -> ResearchReport {
        let start = Instant::now();
        let mut log = Vec::new();
        self.emit(ProgressEvent::Started {
            query: query.to_string(),
        });

        let complexity = self.estimator.estimate_complexity(query, None);
        let strategy = if self
            .config
            .single_shot_levels
            .iter()
            .any(|level| level.eq_ignore_ascii_case(complexity.level.as_str()))
        {
            Strategy::SingleShot
        } else {
            Strategy::Iterative
        };
        log.push(format!(
            "complexity: {} ({:.2})",
            complexity.level, complexity.overall_complexity
        ));
        log.push(format!("strategy: {}", strategy));
        self.emit(ProgressEvent::Strategy {
            strategy: strategy.to_string(),
            level: complexity.level.to_string(),
        });
        info!(
            level = complexity.level.as_str(),
            strategy = %strategy,
            "Research strategy selected"
        );

        let chain_id = self.evidence.create_evidence_chain(query);
        let mut exploration = None;
        let iterations = match strategy {
            Strategy::SingleShot => {
                let step = self
                    .evidence
                    .add_reasoning_step("Single-shot retrieval", "retrieval", 0.8);
                let hits = self.searcher.search(query, SearchMode::Both).await;
                let added = self.record_hits(&hits, step.as_deref());
                log.push(format!("single-shot search: {} hits, {} evidence", hits.len(), added));
                1
            }
            Strategy::Iterative => {
                self.thinking.create_session(query);
                exploration = self.explore(query, &mut log).await;
                let iterations = self.reasoning_loop(query, start, &mut log).await;
                self.build_graph(query, &mut log).await;
                iterations
            }
        };

        let evidence = self.evidence.evidence_contents();
        let answer = self.synthesize(query, &evidence).await;
        for chunk in answer.split("\n\n").filter(|c| !c.trim().is_empty()) {
            self.emit(ProgressEvent::AnswerChunk {
                text: chunk.to_string(),
            });
        }

        let validation = if evidence.is_empty() {
            None
        } else {
            Some(
                self.validator
                    .validate_answer(query, &answer, &evidence)
                    .await,
            )
        };

        let report = ResearchReport {
            query: query.to_string(),
            answer,
            strategy,
            complexity,
            thinking_history: self.thinking.thinking_history(),
            evidence_summary: self.evidence.get_evidence_chain_summary(),
            reasoning_trace: self.evidence.get_reasoning_trace(),
            exploration,
            validation,
            iterations,
            execution_log: log,
            metrics: self.core.snapshot(),
            duration_secs: start.elapsed().as_secs_f64(),
        };

        self.evidence.clear_chain(&chain_id);
        self.thinking.reset_session();
        self.emit(ProgressEvent::Finished { iterations });
        info!(
            iterations = iterations,
            evidence = evidence.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Research finished"
        );
        report
    }

    async fn reasoning_loop(
        &mut self,
        query: &str,
        start: Instant,
        log: &mut Vec<String>,
    ) -> usize {
        let context = QueryContext::new(query).with_keywords(extract_keywords(query, 8));
        let mut pending: VecDeque<String> = self
            .queries
            .generate_sub_queries(&context)
            .await
            .into_iter()
            .take(self.config.max_sub_queries)
            .collect();
        log.push(format!("sub-queries: {}", pending.len()));

        let budget = Duration::from_secs(self.config.max_reasoning_secs);
        let mut executed: HashSet<String> = HashSet::new();
        let mut iterations = 0;

        while iterations < self.config.max_iterations {
            let evidence_count = self.evidence_count();
            if evidence_count >= self.config.evidence_sufficiency {
                log.push(format!("stop: sufficient evidence ({})", evidence_count));
                break;
            }
            if start.elapsed() >= budget {
                log.push("stop: reasoning time budget exhausted".to_string());
                break;
            }

            let outcome = self.thinking.generate_next_query().await;
            iterations += 1;
            self.emit(ProgressEvent::Thinking {
                step: outcome.step,
                status: outcome.status.as_str().to_string(),
            });

            let per_round = self.config.queries_per_iteration;
            let mut round: Vec<String> = Vec::new();
            for q in &outcome.queries {
                if round.len() >= per_round {
                    break;
                }
                if executed.insert(q.to_lowercase()) {
                    round.push(q.clone());
                }
            }
            let continuing = matches!(
                outcome.status,
                ThinkingStatus::HasQuery | ThinkingStatus::ContinueThinking
            );
            if round.is_empty() && continuing {
                if pending.is_empty() {
                    let followup_context = context
                        .clone()
                        .with_previous_results(self.evidence.evidence_contents());
                    pending.extend(self.queries.generate_followup_queries(&followup_context).await);
                }
                while round.len() < per_round {
                    match pending.pop_front() {
                        Some(q) if executed.insert(q.to_lowercase()) => round.push(q),
                        Some(_) => {}
                        None => break,
                    }
                }
            }

            if !round.is_empty() {
                self.emit(ProgressEvent::Searching {
                    queries: round.clone(),
                });
                let step = self.evidence.add_reasoning_step(
                    &format!("Round {}: {}", iterations, preview(&outcome.reasoning, 200)),
                    "search",
                    0.7,
                );
                let results = self.searcher.batch_search(&round, SearchMode::Both).await;
                let mut hits_total = 0;
                let mut added = 0;
                for (q, hits) in round.iter().zip(results.iter()) {
                    hits_total += hits.len();
                    added += self.record_hits(hits, step.as_deref());
                    let contents: Vec<String> = hits.iter().map(|h| h.content.clone()).collect();
                    self.thinking.add_executed_query(q, Some(&contents));
                }
                log.push(format!(
                    "round {}: {} queries, {} hits, {} evidence",
                    iterations,
                    round.len(),
                    hits_total,
                    added
                ));
                self.emit(ProgressEvent::Evidence {
                    count: self.evidence_count(),
                });
            } else {
                log.push(format!(
                    "round {}: {} without queries",
                    iterations,
                    outcome.status.as_str()
                ));
            }

            match outcome.status {
                ThinkingStatus::AnswerReady | ThinkingStatus::Timeout | ThinkingStatus::Error => {
                    log.push(format!("stop: {}", outcome.status.as_str()));
                    break;
                }
                ThinkingStatus::HasQuery | ThinkingStatus::ContinueThinking => {}
            }
        }
        iterations
    }

    async fn explore(&mut self, query: &str, log: &mut Vec<String>) -> Option<ExplorationSummary> {
        if !self.config.explore_graph {
            return None;
        }
        let explorer = self.exploration.as_mut()?;

        let seeds = explorer.seed_entities(query, 3).await;
        if seeds.is_empty() {
            log.push("exploration: no seed entities".to_string());
            return None;
        }
        let path_id = explorer.start_exploration(query, &seeds);
        explorer.explore_to_completion(&path_id).await;
        let summary = explorer.get_exploration_summary(&path_id);
        let nodes = explorer.get_exploration_path(&path_id).unwrap_or_default();
        explorer.clear_path(&path_id);

        let found: Vec<_> = nodes.into_iter().filter(|n| n.depth >= 1).collect();
        if !found.is_empty() {
            let step = self
                .evidence
                .add_reasoning_step("Graph exploration", "exploration", 0.7);
            for node in &found {
                let item = NewEvidence::new(
                    node.node_id.clone(),
                    node.content.clone(),
                    SourceType::Entity,
                )
                .with_scores(self.config.evidence_relevance, self.config.evidence_confidence);
                let item = match &step {
                    Some(step) => item.for_step(step),
                    None => item,
                };
                self.evidence.add_evidence(item);
            }
            let digest: Vec<String> = found.iter().map(|n| preview(&n.content, 200)).collect();
            self.thinking.add_reasoning_step(&format!(
                "Related entities from the knowledge graph:\n{}",
                digest.join("\n")
            ));
        }
        log.push(format!(
            "exploration: {} seeds, {} related nodes",
            seeds.len(),
            found.len()
        ));
        summary
    }

    /// Extract a graph from the collected evidence and add its entities and
    /// relationships to the chain while there is room.
    async fn build_graph(&mut self, query: &str, log: &mut Vec<String>) {
        if !self.config.build_graph {
            return;
        }
        let contents = self.evidence.evidence_contents();
        if contents.is_empty() {
            return;
        }
        let text = format!("{}\n{}", query, contents.join("\n"));
        let graph_id = self
            .graph_builder
            .build_from_text(&text, "evidence", None)
            .await;

        let relevance = self.config.evidence_relevance * GRAPH_RELEVANCE_FACTOR;
        let room = self.evidence_capacity.saturating_sub(self.evidence_count());
        let mut items: Vec<NewEvidence> = Vec::new();
        if let Some(graph) = self.graph_builder.graph(&graph_id) {
            items.extend(graph.entities.values().map(|e| {
                NewEvidence::new(
                    e.entity_id.clone(),
                    format!("{} ({}): {}", e.name, e.entity_type, e.description),
                    SourceType::Entity,
                )
                .with_scores(relevance, e.confidence)
            }));
            items.extend(graph.relations.values().map(|r| {
                NewEvidence::new(
                    r.relation_id.clone(),
                    format!(
                        "{} -[{}]-> {}: {}",
                        r.source_entity, r.relation_type, r.target_entity, r.description
                    ),
                    SourceType::Relationship,
                )
                .with_scores(relevance, r.confidence)
            }));
        }
        self.graph_builder.clear_graph(Some(&graph_id));
        let extracted = items.len();

        let mut added = 0;
        if extracted > 0 && room > 0 {
            let step = self.evidence.add_reasoning_step(
                "Knowledge graph construction",
                "graph_building",
                0.7,
            );
            for item in items.into_iter().take(room) {
                let item = match &step {
                    Some(step) => item.for_step(step),
                    None => item,
                };
                if self.evidence.add_evidence(item).is_some() {
                    added += 1;
                }
            }
        }
        log.push(format!(
            "knowledge graph: {} extracted, {} evidence",
            extracted, added
        ));
    }

    async fn synthesize(&self, query: &str, evidence: &[String]) -> String {
        if evidence.is_empty() {
            return FALLBACK_ANSWER.to_string();
        }
        let numbered = evidence
            .iter()
            .enumerate()
            .map(|(i, e)| format!("[{}] {}", i + 1, e))
            .collect::<Vec<_>>()
            .join("\n");
        let messages = vec![
            Message::system(ANSWER_SYNTHESIS_PROMPT),
            Message::user(format!("Question: {}\n\nEvidence:\n{}", query, numbered)),
        ];
        match self.core.invoke("answer", messages).await {
            Ok(answer) if !answer.trim().is_empty() => answer.trim().to_string(),
            Ok(_) | Err(_) => {
                warn!("Answer synthesis failed, returning evidence digest");
                let digest: Vec<String> = evidence
                    .iter()
                    .take(3)
                    .map(|e| format!("- {}", preview(e, 300)))
                    .collect();
                format!("Based on the collected evidence:\n{}", digest.join("\n"))
            }
        }
    }

    fn record_hits(&mut self, hits: &[SearchHit], step_id: Option<&str>) -> usize {
        let mut added = 0;
        for hit in hits {
            let (source_id, source_type) = match hit.source {
                SearchSource::Kb => ("kb", SourceType::Document),
                SearchSource::Kg => ("kg", SourceType::Entity),
            };
            let mut item = NewEvidence::new(source_id, hit.content.clone(), source_type)
                .with_scores(self.config.evidence_relevance, self.config.evidence_confidence);
            if let Some(step) = step_id {
                item = item.for_step(step);
            }
            if self.evidence.add_evidence(item).is_some() {
                added += 1;
            }
        }
        added
    }

    fn evidence_count(&self) -> usize {
        self.evidence
            .current_chain()
            .map(|c| c.evidence_items.len())
            .unwrap_or(0)
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(progress) = &self.progress {
            progress.send(event);
        }
    }
}
