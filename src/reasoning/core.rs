//! Shared plumbing injected into every reasoning component.
//!
//! [`ReasoningCore`] bundles the language model, the tiered cache, error
//! counters, and call metrics. Components hold a clone of it instead of
//! re-implementing cached LLM calls.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::cache::{cache_key, TieredCache};
use crate::error::{LangbaseError, LangbaseResult};
use crate::langbase::{LanguageModel, Message};

/// Degradable failure classes that are counted rather than propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A retrieval branch failed.
    Query,
    /// A language-model call failed.
    Llm,
    /// A call exceeded its time budget.
    Timeout,
    /// A graph expansion failed.
    Graph,
    /// Model output could not be parsed.
    Parse,
}

impl ErrorKind {
    /// Get the kind as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Query => "query",
            ErrorKind::Llm => "llm",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Graph => "graph",
            ErrorKind::Parse => "parse",
        }
    }
}

/// Counters per [`ErrorKind`].
#[derive(Debug, Default)]
pub struct ErrorStats {
    query: AtomicU64,
    llm: AtomicU64,
    timeout: AtomicU64,
    graph: AtomicU64,
    parse: AtomicU64,
}

impl ErrorStats {
    /// Count one failure.
    pub fn record(&self, kind: ErrorKind) {
        self.counter(kind).fetch_add(1, Ordering::Relaxed);
    }

    /// Current count for one kind.
    pub fn count(&self, kind: ErrorKind) -> u64 {
        self.counter(kind).load(Ordering::Relaxed)
    }

    fn counter(&self, kind: ErrorKind) -> &AtomicU64 {
        match kind {
            ErrorKind::Query => &self.query,
            ErrorKind::Llm => &self.llm,
            ErrorKind::Timeout => &self.timeout,
            ErrorKind::Graph => &self.graph,
            ErrorKind::Parse => &self.parse,
        }
    }
}

/// Timing and volume counters.
#[derive(Debug, Default)]
pub struct CallMetrics {
    llm_calls: AtomicU64,
    llm_cache_hits: AtomicU64,
    llm_time_ms: AtomicU64,
    retrieval_calls: AtomicU64,
    retrieval_time_ms: AtomicU64,
}

impl CallMetrics {
    /// Record one retrieval round-trip.
    pub fn record_retrieval(&self, elapsed: Duration) {
        self.retrieval_calls.fetch_add(1, Ordering::Relaxed);
        self.retrieval_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    fn record_llm(&self, elapsed: Duration) {
        self.llm_calls.fetch_add(1, Ordering::Relaxed);
        self.llm_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }
}

/// Serializable view of metrics and error counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub llm_calls: u64,
    pub llm_cache_hits: u64,
    pub llm_time_ms: u64,
    pub retrieval_calls: u64,
    pub retrieval_time_ms: u64,
    pub cache_errors: u64,
    pub errors: BTreeMap<String, u64>,
}

/// Model + cache + counters shared by the reasoning components.
#[derive(Clone)]
pub struct ReasoningCore {
    model: Arc<dyn LanguageModel>,
    cache: TieredCache,
    errors: Arc<ErrorStats>,
    metrics: Arc<CallMetrics>,
}

impl ReasoningCore {
    /// Create a core around a model and cache.
    pub fn new(model: Arc<dyn LanguageModel>, cache: TieredCache) -> Self {
        Self {
            model,
            cache,
            errors: Arc::new(ErrorStats::default()),
            metrics: Arc::new(CallMetrics::default()),
        }
    }

    /// Same cache and counters, different model (e.g. another pipe).
    pub fn with_model(&self, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            cache: self.cache.clone(),
            errors: Arc::clone(&self.errors),
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Get the cache.
    #[inline]
    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    /// Get the error counters.
    #[inline]
    pub fn errors(&self) -> &ErrorStats {
        &self.errors
    }

    /// Get the call metrics.
    #[inline]
    pub fn metrics(&self) -> &CallMetrics {
        &self.metrics
    }

    /// Run the model, memoized under `namespace` + the serialized messages.
    ///
    /// Failures are counted as [`ErrorKind::Llm`] and returned to the caller,
    /// which decides on its own fallback.
    pub async fn invoke(&self, namespace: &str, messages: Vec<Message>) -> LangbaseResult<String> {
        let key = match serde_json::to_string(&messages) {
            Ok(serialized) => Some(cache_key(namespace, &[&serialized])),
            Err(e) => {
                warn!(error = %e, "Failed to serialize messages for cache key");
                None
            }
        };

        if let Some(key) = &key {
            if let Some(cached) = self.cache.get_json::<String>(key).await {
                self.metrics.llm_cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!(namespace = namespace, "LLM cache hit");
                return Ok(cached);
            }
        }

        let start = Instant::now();
        let result = self.model.invoke(messages).await;
        self.metrics.record_llm(start.elapsed());

        match result {
            Ok(completion) => {
                if let Some(key) = &key {
                    self.cache.set_json(key, &completion, None).await;
                }
                Ok(completion)
            }
            Err(e) => {
                self.errors.record(ErrorKind::Llm);
                warn!(namespace = namespace, error = %e, "LLM call failed");
                Err(e)
            }
        }
    }

    /// [`invoke`](Self::invoke) bounded by `timeout`; expiry is reported as
    /// [`LangbaseError::Timeout`] and counted as [`ErrorKind::Timeout`].
    pub async fn invoke_with_timeout(
        &self,
        namespace: &str,
        messages: Vec<Message>,
        timeout: Duration,
    ) -> LangbaseResult<String> {
        match tokio::time::timeout(timeout, self.invoke(namespace, messages)).await {
            Ok(result) => result,
            Err(_) => {
                self.errors.record(ErrorKind::Timeout);
                warn!(
                    namespace = namespace,
                    timeout_ms = timeout.as_millis() as u64,
                    "LLM call timed out"
                );
                Err(LangbaseError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Snapshot of metrics, error counters, and cache errors.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let errors = [
            ErrorKind::Query,
            ErrorKind::Llm,
            ErrorKind::Timeout,
            ErrorKind::Graph,
            ErrorKind::Parse,
        ]
        .into_iter()
        .map(|kind| (kind.as_str().to_string(), self.errors.count(kind)))
        .collect();

        MetricsSnapshot {
            llm_calls: self.metrics.llm_calls.load(Ordering::Relaxed),
            llm_cache_hits: self.metrics.llm_cache_hits.load(Ordering::Relaxed),
            llm_time_ms: self.metrics.llm_time_ms.load(Ordering::Relaxed),
            retrieval_calls: self.metrics.retrieval_calls.load(Ordering::Relaxed),
            retrieval_time_ms: self.metrics.retrieval_time_ms.load(Ordering::Relaxed),
            cache_errors: self.cache.stats().errors,
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::langbase::MockLanguageModel;

    fn core_with(model: MockLanguageModel) -> ReasoningCore {
        ReasoningCore::new(
            Arc::new(model),
            TieredCache::in_memory(16, Duration::from_secs(60)),
        )
    }

    #[tokio::test]
    async fn test_invoke_is_memoized_per_message_history() {
        let mut model = MockLanguageModel::new();
        model
            .expect_invoke()
            .times(1)
            .returning(|_| Ok("cached answer".to_string()));
        let core = core_with(model);

        let first = core.invoke("ns", vec![Message::user("q")]).await.unwrap();
        let second = core.invoke("ns", vec![Message::user("q")]).await.unwrap();

        assert_eq!(first, "cached answer");
        assert_eq!(second, "cached answer");
        let snapshot = core.snapshot();
        assert_eq!(snapshot.llm_calls, 1);
        assert_eq!(snapshot.llm_cache_hits, 1);
    }

    #[tokio::test]
    async fn test_failures_are_counted_and_not_cached() {
        let mut model = MockLanguageModel::new();
        model.expect_invoke().times(2).returning(|_| {
            Err(LangbaseError::Api {
                status: 500,
                message: "boom".to_string(),
            })
        });
        let core = core_with(model);

        assert!(core.invoke("ns", vec![Message::user("q")]).await.is_err());
        assert!(core.invoke("ns", vec![Message::user("q")]).await.is_err());
        assert_eq!(core.errors().count(ErrorKind::Llm), 2);
        assert_eq!(core.snapshot().errors["llm"], 2);
    }
}
