//! Fan-out/fan-in retrieval across the knowledge-base and graph paths.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use super::{ErrorKind, ReasoningCore};
use crate::config::SearchConfig;
use crate::retrieval::Retriever;

/// Which retrieval paths a search uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Knowledge-base (document) path only.
    Kb,
    /// Knowledge-graph path only.
    Kg,
    /// Both paths concurrently.
    Both,
}

impl SearchMode {
    /// Get the mode as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Kb => "kb",
            SearchMode::Kg => "kg",
            SearchMode::Both => "both",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kb" => Ok(SearchMode::Kb),
            "kg" => Ok(SearchMode::Kg),
            "both" => Ok(SearchMode::Both),
            _ => Err(format!("Unknown search mode: {}", s)),
        }
    }
}

/// Path that produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    /// Knowledge-base path.
    Kb,
    /// Knowledge-graph path.
    Kg,
}

/// One fused search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub content: String,
    pub source: SearchSource,
}

/// Post-hoc filters; keyword matching is case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    /// Keep hits containing at least one of these.
    pub include_keywords: Vec<String>,
    /// Drop hits containing any of these.
    pub exclude_keywords: Vec<String>,
}

impl SearchFilters {
    fn accepts(&self, content: &str) -> bool {
        let len = content.chars().count();
        if self.min_length.is_some_and(|min| len < min) {
            return false;
        }
        if self.max_length.is_some_and(|max| len > max) {
            return false;
        }
        let lower = content.to_lowercase();
        if !self.include_keywords.is_empty()
            && !self
                .include_keywords
                .iter()
                .any(|k| lower.contains(&k.to_lowercase()))
        {
            return false;
        }
        !self
            .exclude_keywords
            .iter()
            .any(|k| lower.contains(&k.to_lowercase()))
    }
}

#[derive(Debug, Clone)]
struct SearchRecord {
    mode: SearchMode,
    duration: Duration,
    timestamp: DateTime<Utc>,
}

/// Aggregate over the rolling search history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchStatistics {
    pub total_searches: usize,
    pub total_duration_ms: u64,
    pub average_duration_ms: f64,
    pub searches_by_mode: BTreeMap<String, usize>,
    pub last_search_at: Option<DateTime<Utc>>,
    pub kb_name: String,
}

/// Concatenate both paths, preferred weight first, dropping repeated contents.
pub fn fuse_results(
    kb: Vec<String>,
    kg: Vec<String>,
    kb_weight: f64,
    kg_weight: f64,
) -> Vec<SearchHit> {
    let kb = kb.into_iter().map(|content| SearchHit {
        content,
        source: SearchSource::Kb,
    });
    let kg = kg.into_iter().map(|content| SearchHit {
        content,
        source: SearchSource::Kg,
    });
    let ordered: Vec<SearchHit> = if kb_weight >= kg_weight {
        kb.chain(kg).collect()
    } else {
        kg.chain(kb).collect()
    };

    let mut seen = HashSet::new();
    ordered
        .into_iter()
        .filter(|hit| seen.insert(hit.content.clone()))
        .collect()
}

/// Two retrievers behind a bounded worker pool.
#[derive(Clone)]
pub struct DualPathSearcher {
    kb: Arc<dyn Retriever>,
    kg: Arc<dyn Retriever>,
    config: SearchConfig,
    core: ReasoningCore,
    workers: Arc<Semaphore>,
    history: Arc<Mutex<VecDeque<SearchRecord>>>,
}

impl DualPathSearcher {
    /// Create a searcher over a knowledge-base and a graph retriever.
    pub fn new(
        kb: Arc<dyn Retriever>,
        kg: Arc<dyn Retriever>,
        config: SearchConfig,
        core: ReasoningCore,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.max_workers.max(1)));
        Self {
            kb,
            kg,
            config,
            core,
            workers,
            history: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Search one query. A failed or timed-out path contributes nothing.
    pub async fn search(&self, query: &str, mode: SearchMode) -> Vec<SearchHit> {
        let start = Instant::now();

        let (kb, kg) = match mode {
            SearchMode::Kb => (self.run_path(SearchSource::Kb, query).await, Vec::new()),
            SearchMode::Kg => (Vec::new(), self.run_path(SearchSource::Kg, query).await),
            SearchMode::Both => {
                let kb_task = self.spawn_path(SearchSource::Kb, query);
                let kg_task = self.spawn_path(SearchSource::Kg, query);
                let (kb, kg) = tokio::join!(kb_task, kg_task);
                (
                    kb.unwrap_or_else(|e| self.join_failed(e)),
                    kg.unwrap_or_else(|e| self.join_failed(e)),
                )
            }
        };

        let hits = fuse_results(kb, kg, self.config.kb_weight, self.config.kg_weight);
        let duration = start.elapsed();
        self.record(mode, duration).await;

        info!(
            query = %query,
            mode = mode.as_str(),
            results = hits.len(),
            latency_ms = duration.as_millis() as u64,
            "Search completed"
        );
        hits
    }

    /// Search several queries concurrently; results keep the input order.
    pub async fn batch_search(&self, queries: &[String], mode: SearchMode) -> Vec<Vec<SearchHit>> {
        let handles: Vec<_> = queries
            .iter()
            .map(|query| {
                let searcher = self.clone();
                let query = query.clone();
                tokio::spawn(async move { searcher.search(&query, mode).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.unwrap_or_else(|e| {
                self.core.errors().record(ErrorKind::Query);
                warn!(error = %e, "Batch search task failed");
                Vec::new()
            }));
        }
        results
    }

    /// Search, then drop hits rejected by `filters`.
    pub async fn search_with_filters(
        &self,
        query: &str,
        mode: SearchMode,
        filters: &SearchFilters,
    ) -> Vec<SearchHit> {
        self.search(query, mode)
            .await
            .into_iter()
            .filter(|hit| filters.accepts(&hit.content))
            .collect()
    }

    /// Search with a context line appended to the query.
    pub async fn search_with_context(
        &self,
        query: &str,
        context: &str,
        mode: SearchMode,
    ) -> Vec<SearchHit> {
        if context.trim().is_empty() {
            return self.search(query, mode).await;
        }
        let enhanced = format!("{}\nContext: {}", query, context.trim());
        self.search(&enhanced, mode).await
    }

    /// Totals over the rolling history.
    pub async fn search_statistics(&self) -> SearchStatistics {
        let history = self.history.lock().await;
        let total_searches = history.len();
        let total_duration_ms: u64 = history
            .iter()
            .map(|r| r.duration.as_millis() as u64)
            .sum();
        let mut searches_by_mode = BTreeMap::new();
        for record in history.iter() {
            *searches_by_mode
                .entry(record.mode.as_str().to_string())
                .or_insert(0) += 1;
        }
        SearchStatistics {
            total_searches,
            total_duration_ms,
            average_duration_ms: if total_searches == 0 {
                0.0
            } else {
                total_duration_ms as f64 / total_searches as f64
            },
            searches_by_mode,
            last_search_at: history.back().map(|r| r.timestamp),
            kb_name: self.config.kb_name.clone(),
        }
    }

    /// Forget the search history.
    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
    }

    fn spawn_path(
        &self,
        source: SearchSource,
        query: &str,
    ) -> tokio::task::JoinHandle<Vec<String>> {
        let searcher = self.clone();
        let query = query.to_string();
        tokio::spawn(async move { searcher.run_path(source, &query).await })
    }

    async fn run_path(&self, source: SearchSource, query: &str) -> Vec<String> {
        let retriever = match source {
            SearchSource::Kb => &self.kb,
            SearchSource::Kg => &self.kg,
        };

        let Ok(_permit) = self.workers.acquire().await else {
            return Vec::new();
        };

        let start = Instant::now();
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let outcome = tokio::time::timeout(timeout, retriever.retrieve(query)).await;
        self.core.metrics().record_retrieval(start.elapsed());

        match outcome {
            Ok(Ok(results)) => {
                debug!(source = ?source, results = results.len(), "Retrieval path finished");
                results
            }
            Ok(Err(e)) => {
                self.core.errors().record(ErrorKind::Query);
                warn!(source = ?source, error = %e, "Retrieval path failed");
                Vec::new()
            }
            Err(_) => {
                self.core.errors().record(ErrorKind::Timeout);
                warn!(
                    source = ?source,
                    timeout_secs = self.config.timeout_secs,
                    "Retrieval path timed out"
                );
                Vec::new()
            }
        }
    }

    fn join_failed(&self, e: tokio::task::JoinError) -> Vec<String> {
        self.core.errors().record(ErrorKind::Query);
        warn!(error = %e, "Retrieval task failed");
        Vec::new()
    }

    async fn record(&self, mode: SearchMode, duration: Duration) {
        let mut history = self.history.lock().await;
        history.push_back(SearchRecord {
            mode,
            duration,
            timestamp: Utc::now(),
        });
        while history.len() > self.config.history_limit.max(1) {
            history.pop_front();
        }
    }
}
