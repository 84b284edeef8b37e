//! Retrieval paths fed into the dual-path searcher.
//!
//! [`DocumentRetriever`] is the knowledge-base path (ranked chunks) and
//! [`GraphRetriever`] the knowledge-graph path (matched entities plus their
//! strongest relationships). Both are memoized through the tiered cache.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::cache::{cache_key, TieredCache};
use crate::error::AppResult;
use crate::storage::{GraphQuery, GraphStore};

/// One retrieval source: query text in, result texts out.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve result texts for `query`, best first.
    async fn retrieve(&self, query: &str) -> AppResult<Vec<String>>;
}

/// Knowledge-base path: chunks ranked by keyword overlap.
pub struct DocumentRetriever {
    store: Arc<dyn GraphStore>,
    cache: TieredCache,
    limit: usize,
}

impl DocumentRetriever {
    /// Create a retriever returning at most `limit` chunks.
    pub fn new(store: Arc<dyn GraphStore>, cache: TieredCache, limit: usize) -> Self {
        Self {
            store,
            cache,
            limit,
        }
    }
}

#[async_trait]
impl Retriever for DocumentRetriever {
    async fn retrieve(&self, query: &str) -> AppResult<Vec<String>> {
        let key = cache_key("kb", &[query, &self.limit.to_string()]);
        if let Some(cached) = self.cache.get_json::<Vec<String>>(&key).await {
            debug!(query = %query, "kb retrieval cache hit");
            return Ok(cached);
        }

        let rows = self
            .store
            .query(&GraphQuery::SearchChunks {
                text: query.to_string(),
                limit: self.limit,
            })
            .await?;
        let results: Vec<String> = rows.into_iter().map(|r| r.content).collect();

        self.cache.set_json(&key, &results, None).await;
        Ok(results)
    }
}

/// Knowledge-graph path: matched entities with their strongest relationships.
pub struct GraphRetriever {
    store: Arc<dyn GraphStore>,
    cache: TieredCache,
    limit: usize,
    neighbors: usize,
}

impl GraphRetriever {
    /// Create a retriever returning at most `limit` entities, each with up to
    /// `neighbors` related entities.
    pub fn new(store: Arc<dyn GraphStore>, cache: TieredCache, limit: usize, neighbors: usize) -> Self {
        Self {
            store,
            cache,
            limit,
            neighbors,
        }
    }
}

#[async_trait]
impl Retriever for GraphRetriever {
    async fn retrieve(&self, query: &str) -> AppResult<Vec<String>> {
        let key = cache_key(
            "kg",
            &[query, &self.limit.to_string(), &self.neighbors.to_string()],
        );
        if let Some(cached) = self.cache.get_json::<Vec<String>>(&key).await {
            debug!(query = %query, "kg retrieval cache hit");
            return Ok(cached);
        }

        let entities = self
            .store
            .query(&GraphQuery::SearchEntities {
                text: query.to_string(),
                limit: self.limit,
            })
            .await?;

        let mut results = Vec::with_capacity(entities.len());
        for entity in entities {
            let related = self
                .store
                .query(&GraphQuery::EntityNeighbors {
                    entity_id: entity.id.clone(),
                    limit: self.neighbors,
                })
                .await?;
            if related.is_empty() {
                results.push(entity.content);
            } else {
                let names: Vec<&str> = related
                    .iter()
                    .map(|r| r.content.split(": ").next().unwrap_or(&r.content))
                    .collect();
                results.push(format!("{}\nRelated: {}", entity.content, names.join(", ")));
            }
        }

        self.cache.set_json(&key, &results, None).await;
        Ok(results)
    }
}
