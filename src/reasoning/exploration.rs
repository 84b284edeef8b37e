//! Frontier-based graph walk with relevance decay and backtracking.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ErrorKind, ReasoningCore};
use crate::config::ExplorationConfig;
use crate::storage::{GraphQuery, GraphRow, GraphStore, NodeType};
use crate::text::token_overlap;

const RAW_WEIGHT: f64 = 0.7;
const OVERLAP_WEIGHT: f64 = 0.3;

/// Status of a path, also reported by each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplorationStatus {
    /// More steps may add nodes.
    Continue,
    /// Depth budget reached or frontier exhausted.
    Completed,
    /// The step could not run (unknown path).
    Error,
}

impl ExplorationStatus {
    /// Get the status as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            ExplorationStatus::Continue => "continue",
            ExplorationStatus::Completed => "completed",
            ExplorationStatus::Error => "error",
        }
    }
}

/// A visited graph node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplorationNode {
    pub node_id: String,
    pub node_type: NodeType,
    pub content: String,
    pub relevance_score: f64,
    pub depth: usize,
    pub parent_id: Option<String>,
    pub children_ids: Vec<String>,
}

/// Nodes reachable from the seeds, in insertion order.
#[derive(Debug, Clone)]
pub struct ExplorationPath {
    pub path_id: String,
    pub query: String,
    pub nodes: Vec<ExplorationNode>,
    pub status: ExplorationStatus,
    pub created_at: DateTime<Utc>,
    visited: HashSet<String>,
}

impl ExplorationPath {
    fn max_depth(&self) -> Option<usize> {
        self.nodes.iter().map(|n| n.depth).max()
    }

    fn frontier(&self) -> Vec<&ExplorationNode> {
        match self.max_depth() {
            Some(depth) => self.nodes.iter().filter(|n| n.depth == depth).collect(),
            None => Vec::new(),
        }
    }
}

/// Result of one [`ChainedExploration::explore_next_step`] call.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub status: ExplorationStatus,
    pub depth: usize,
    pub new_nodes: Vec<ExplorationNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StepOutcome {
    fn terminal(status: ExplorationStatus, depth: usize, message: impl Into<String>) -> Self {
        Self {
            status,
            depth,
            new_nodes: Vec::new(),
            message: Some(message.into()),
        }
    }
}

/// Counts and scores for a path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplorationSummary {
    pub path_id: String,
    pub query: String,
    pub status: ExplorationStatus,
    pub total_nodes: usize,
    pub max_depth: usize,
    pub nodes_by_depth: BTreeMap<usize, usize>,
    pub nodes_by_type: BTreeMap<String, usize>,
    pub total_score: f64,
    pub average_score: f64,
}

struct Candidate {
    row: GraphRow,
    parent_id: String,
    score: f64,
}

/// Depth-bounded walk over a [`GraphStore`].
pub struct ChainedExploration {
    store: Arc<dyn GraphStore>,
    config: ExplorationConfig,
    core: ReasoningCore,
    paths: HashMap<String, ExplorationPath>,
}

impl ChainedExploration {
    /// Create an explorer over `store`.
    pub fn new(store: Arc<dyn GraphStore>, config: ExplorationConfig, core: ReasoningCore) -> Self {
        Self {
            store,
            config,
            core,
            paths: HashMap::new(),
        }
    }

    /// Ids of up to `limit` entities matching `query`, usable as seeds.
    pub async fn seed_entities(&self, query: &str, limit: usize) -> Vec<String> {
        let search = GraphQuery::SearchEntities {
            text: query.to_string(),
            limit,
        };
        match self.store.query(&search).await {
            Ok(rows) => rows.into_iter().map(|r| r.id).collect(),
            Err(e) => {
                self.core.errors().record(ErrorKind::Graph);
                warn!(error = %e, "Seed entity search failed");
                Vec::new()
            }
        }
    }

    /// Seed a new path; duplicate seeds collapse to one node.
    pub fn start_exploration(&mut self, query: &str, seed_entities: &[String]) -> String {
        let path_id = format!("path_{}", Uuid::new_v4().simple());
        let mut visited = HashSet::new();
        let nodes: Vec<ExplorationNode> = seed_entities
            .iter()
            .filter(|id| visited.insert(id.to_string()))
            .map(|id| ExplorationNode {
                node_id: id.clone(),
                node_type: NodeType::Entity,
                content: id.clone(),
                relevance_score: 1.0,
                depth: 0,
                parent_id: None,
                children_ids: Vec::new(),
            })
            .collect();

        let status = if nodes.is_empty() {
            ExplorationStatus::Completed
        } else {
            ExplorationStatus::Continue
        };

        info!(
            path_id = %path_id,
            seeds = nodes.len(),
            "Exploration started"
        );

        self.paths.insert(
            path_id.clone(),
            ExplorationPath {
                path_id: path_id.clone(),
                query: query.to_string(),
                nodes,
                status,
                created_at: Utc::now(),
                visited,
            },
        );
        path_id
    }

    /// Expand every node at the current maximum depth by one level.
    pub async fn explore_next_step(&mut self, path_id: &str) -> StepOutcome {
        let Some(path) = self.paths.get(path_id) else {
            warn!(path_id = %path_id, "explore_next_step on unknown path");
            return StepOutcome::terminal(ExplorationStatus::Error, 0, "unknown path");
        };

        let depth = path.max_depth().unwrap_or(0);
        if path.status == ExplorationStatus::Completed {
            return StepOutcome::terminal(ExplorationStatus::Completed, depth, "already completed");
        }
        if depth >= self.config.max_steps {
            self.set_status(path_id, ExplorationStatus::Completed);
            return StepOutcome::terminal(ExplorationStatus::Completed, depth, "max depth reached");
        }

        let frontier: Vec<ExplorationNode> = path.frontier().into_iter().cloned().collect();
        if frontier.is_empty() {
            self.set_status(path_id, ExplorationStatus::Completed);
            return StepOutcome::terminal(ExplorationStatus::Completed, depth, "empty frontier");
        }

        let query = path.query.clone();
        let candidates = self.collect_candidates(path, &query, &frontier, depth).await;

        let new_depth = depth + 1;
        let Some(path) = self.paths.get_mut(path_id) else {
            return StepOutcome::terminal(ExplorationStatus::Error, depth, "path removed");
        };

        let mut new_nodes = Vec::new();
        for candidate in candidates.into_iter().take(self.config.exploration_width) {
            let node = ExplorationNode {
                node_id: candidate.row.id.clone(),
                node_type: candidate.row.node_type,
                content: candidate.row.content,
                relevance_score: candidate.score,
                depth: new_depth,
                parent_id: Some(candidate.parent_id.clone()),
                children_ids: Vec::new(),
            };
            if let Some(parent) = path
                .nodes
                .iter_mut()
                .find(|n| n.node_id == candidate.parent_id)
            {
                parent.children_ids.push(node.node_id.clone());
            }
            path.visited.insert(node.node_id.clone());
            path.nodes.push(node.clone());
            new_nodes.push(node);
        }

        let status = if new_nodes.is_empty() || new_depth >= self.config.max_steps {
            ExplorationStatus::Completed
        } else {
            ExplorationStatus::Continue
        };
        path.status = status;

        debug!(
            path_id = %path_id,
            depth = new_depth,
            added = new_nodes.len(),
            status = status.as_str(),
            "Exploration step"
        );

        StepOutcome {
            status,
            depth: if new_nodes.is_empty() { depth } else { new_depth },
            new_nodes,
            message: None,
        }
    }

    /// Step until the path is no longer `continue`; returns the final status.
    pub async fn explore_to_completion(&mut self, path_id: &str) -> ExplorationStatus {
        for _ in 0..=self.config.max_steps {
            let outcome = self.explore_next_step(path_id).await;
            if outcome.status != ExplorationStatus::Continue {
                return outcome.status;
            }
        }
        self.paths
            .get(path_id)
            .map(|p| p.status)
            .unwrap_or(ExplorationStatus::Error)
    }

    async fn collect_candidates(
        &self,
        path: &ExplorationPath,
        query: &str,
        frontier: &[ExplorationNode],
        depth: usize,
    ) -> Vec<Candidate> {
        let limit = self.config.exploration_width.saturating_mul(2).max(1);
        let decay = self.config.decay_factor.powi(depth as i32 + 1);

        let mut candidates: Vec<Candidate> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for node in frontier {
            let Some(graph_query) = expansion_query(node, limit) else {
                continue;
            };
            let rows = match self.store.query(&graph_query).await {
                Ok(rows) => rows,
                Err(e) => {
                    self.core.errors().record(ErrorKind::Graph);
                    warn!(
                        node_id = %node.node_id,
                        query = graph_query.kind(),
                        error = %e,
                        "Node expansion failed, skipping"
                    );
                    continue;
                }
            };

            for row in rows {
                if path.visited.contains(&row.id) || row.relevance < self.config.relevance_threshold
                {
                    continue;
                }
                let score = (RAW_WEIGHT * row.relevance
                    + OVERLAP_WEIGHT * token_overlap(query, &row.content))
                    * decay;
                match index.get(&row.id) {
                    Some(&idx) => {
                        if score > candidates[idx].score {
                            candidates[idx].score = score;
                            candidates[idx].parent_id = node.node_id.clone();
                        }
                    }
                    None => {
                        index.insert(row.id.clone(), candidates.len());
                        candidates.push(Candidate {
                            row,
                            parent_id: node.node_id.clone(),
                            score,
                        });
                    }
                }
            }
        }

        // stable: ties keep discovery order
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        candidates
    }

    /// Drop nodes deeper than `target_depth` and release them for re-exploration.
    pub fn backtrack(&mut self, path_id: &str, target_depth: usize) -> bool {
        if !self.config.backtracking {
            warn!(path_id = %path_id, "Backtracking disabled");
            return false;
        }
        let Some(path) = self.paths.get_mut(path_id) else {
            warn!(path_id = %path_id, "backtrack on unknown path");
            return false;
        };

        let removed: HashSet<String> = path
            .nodes
            .iter()
            .filter(|n| n.depth > target_depth)
            .map(|n| n.node_id.clone())
            .collect();
        path.nodes.retain(|n| n.depth <= target_depth);
        for node in &mut path.nodes {
            node.children_ids.retain(|id| !removed.contains(id));
        }
        for id in &removed {
            path.visited.remove(id);
        }
        path.status = if path.nodes.is_empty() {
            ExplorationStatus::Completed
        } else {
            ExplorationStatus::Continue
        };

        info!(
            path_id = %path_id,
            target_depth = target_depth,
            released = removed.len(),
            "Backtracked"
        );
        true
    }

    /// Node counts and scores for a path.
    pub fn get_exploration_summary(&self, path_id: &str) -> Option<ExplorationSummary> {
        let path = self.paths.get(path_id)?;
        let mut nodes_by_depth = BTreeMap::new();
        let mut nodes_by_type = BTreeMap::new();
        for node in &path.nodes {
            *nodes_by_depth.entry(node.depth).or_insert(0) += 1;
            *nodes_by_type
                .entry(node.node_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        let total_score: f64 = path.nodes.iter().map(|n| n.relevance_score).sum();
        let total_nodes = path.nodes.len();

        Some(ExplorationSummary {
            path_id: path.path_id.clone(),
            query: path.query.clone(),
            status: path.status,
            total_nodes,
            max_depth: path.max_depth().unwrap_or(0),
            nodes_by_depth,
            nodes_by_type,
            total_score,
            average_score: if total_nodes == 0 {
                0.0
            } else {
                total_score / total_nodes as f64
            },
        })
    }

    /// All nodes of a path in insertion order.
    pub fn get_exploration_path(&self, path_id: &str) -> Option<Vec<ExplorationNode>> {
        self.paths.get(path_id).map(|p| p.nodes.clone())
    }

    /// Nodes at the path's current maximum depth.
    pub fn frontier(&self, path_id: &str) -> Vec<ExplorationNode> {
        self.paths
            .get(path_id)
            .map(|p| p.frontier().into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop one path.
    pub fn clear_path(&mut self, path_id: &str) -> bool {
        self.paths.remove(path_id).is_some()
    }

    /// Drop all paths.
    pub fn close(&mut self) {
        self.paths.clear();
    }

    fn set_status(&mut self, path_id: &str, status: ExplorationStatus) {
        if let Some(path) = self.paths.get_mut(path_id) {
            path.status = status;
        }
    }
}

fn expansion_query(node: &ExplorationNode, limit: usize) -> Option<GraphQuery> {
    let id = node.node_id.clone();
    match node.node_type {
        NodeType::Entity => Some(GraphQuery::EntityNeighbors {
            entity_id: id,
            limit,
        }),
        NodeType::Document => Some(GraphQuery::DocumentEntities {
            document_id: id,
            limit,
        }),
        NodeType::Community => Some(GraphQuery::CommunityEntities {
            community_id: id,
            limit,
        }),
        NodeType::Chunk => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TieredCache;
    use crate::error::{StorageError, StorageResult};
    use crate::langbase::MockLanguageModel;
    use crate::storage::{EntityRecord, GraphSnapshot, MemoryGraphStore, RelationshipRecord};
    use async_trait::async_trait;
    use std::time::Duration;

    fn core() -> ReasoningCore {
        ReasoningCore::new(
            Arc::new(MockLanguageModel::new()),
            TieredCache::in_memory(8, Duration::from_secs(60)),
        )
    }

    fn entity(id: &str) -> EntityRecord {
        EntityRecord {
            id: id.to_string(),
            name: id.to_uppercase(),
            entity_type: None,
            description: String::new(),
            rank: 0.5,
        }
    }

    fn edge(source: &str, target: &str, weight: f64) -> RelationshipRecord {
        RelationshipRecord {
            source: source.to_string(),
            target: target.to_string(),
            description: String::new(),
            weight,
        }
    }

    fn explorer(relationships: Vec<RelationshipRecord>, config: ExplorationConfig) -> ChainedExploration {
        let store = MemoryGraphStore::from_snapshot(GraphSnapshot {
            entities: ["a", "b", "c", "d", "e"].into_iter().map(entity).collect(),
            relationships,
            ..GraphSnapshot::default()
        });
        ChainedExploration::new(Arc::new(store), config, core())
    }

    #[tokio::test]
    async fn test_step_scores_with_decay_and_keeps_top_width() {
        let mut explorer = explorer(
            vec![edge("a", "b", 0.9), edge("a", "c", 0.8), edge("a", "d", 0.7)],
            ExplorationConfig {
                exploration_width: 2,
                ..ExplorationConfig::default()
            },
        );
        let path = explorer.start_exploration("unrelated words", &["a".to_string()]);

        let outcome = explorer.explore_next_step(&path).await;
        assert_eq!(outcome.status, ExplorationStatus::Continue);
        let ids: Vec<&str> = outcome.new_nodes.iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!((outcome.new_nodes[0].relevance_score - 0.7 * 0.9 * 0.9).abs() < 1e-9);
        assert_eq!(outcome.new_nodes[0].parent_id.as_deref(), Some("a"));

        let nodes = explorer.get_exploration_path(&path).unwrap();
        assert_eq!(nodes[0].children_ids, vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_threshold_applies_to_raw_weight() {
        let mut explorer = explorer(
            vec![edge("a", "b", 0.9), edge("a", "c", 0.3)],
            ExplorationConfig::default(),
        );
        let path = explorer.start_exploration("q", &["a".to_string()]);
        let outcome = explorer.explore_next_step(&path).await;
        assert_eq!(outcome.new_nodes.len(), 1);
        assert_eq!(outcome.new_nodes[0].node_id, "b");
    }

    #[tokio::test]
    async fn test_no_new_nodes_completes() {
        let mut explorer = explorer(vec![edge("a", "b", 0.9)], ExplorationConfig::default());
        let path = explorer.start_exploration("q", &["a".to_string(), "b".to_string()]);
        let outcome = explorer.explore_next_step(&path).await;
        assert_eq!(outcome.status, ExplorationStatus::Completed);
        assert!(outcome.new_nodes.is_empty());
    }

    #[tokio::test]
    async fn test_backtrack_releases_nodes() {
        let mut explorer = explorer(
            vec![edge("a", "b", 0.9), edge("b", "c", 0.9)],
            ExplorationConfig::default(),
        );
        let path = explorer.start_exploration("q", &["a".to_string()]);
        explorer.explore_next_step(&path).await;
        explorer.explore_next_step(&path).await;
        assert_eq!(explorer.get_exploration_summary(&path).unwrap().max_depth, 2);

        assert!(explorer.backtrack(&path, 0));
        let nodes = explorer.get_exploration_path(&path).unwrap();
        assert_eq!(nodes.len(), 1);
        assert!(nodes[0].children_ids.is_empty());

        let outcome = explorer.explore_next_step(&path).await;
        assert_eq!(outcome.new_nodes[0].node_id, "b");
    }

    #[tokio::test]
    async fn test_backtracking_disabled() {
        let mut explorer = explorer(
            vec![edge("a", "b", 0.9)],
            ExplorationConfig {
                backtracking: false,
                ..ExplorationConfig::default()
            },
        );
        let path = explorer.start_exploration("q", &["a".to_string()]);
        assert!(!explorer.backtrack(&path, 0));
    }

    #[tokio::test]
    async fn test_unknown_path_is_error() {
        let mut explorer = explorer(Vec::new(), ExplorationConfig::default());
        let outcome = explorer.explore_next_step("path_missing").await;
        assert_eq!(outcome.status, ExplorationStatus::Error);
        assert!(explorer.get_exploration_summary("path_missing").is_none());
    }

    struct FailingStore;

    #[async_trait]
    impl GraphStore for FailingStore {
        async fn query(&self, _query: &GraphQuery) -> StorageResult<Vec<GraphRow>> {
            Err(StorageError::Query {
                message: "down".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_failed_expansion_is_skipped_and_counted() {
        let core = core();
        let mut explorer =
            ChainedExploration::new(Arc::new(FailingStore), ExplorationConfig::default(), core.clone());
        let path = explorer.start_exploration("q", &["a".to_string(), "b".to_string()]);
        let outcome = explorer.explore_next_step(&path).await;
        assert_eq!(outcome.status, ExplorationStatus::Completed);
        assert_eq!(core.errors().count(ErrorKind::Graph), 2);
    }
}
