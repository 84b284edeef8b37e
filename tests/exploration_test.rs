//! Integration tests for chained graph exploration
//!
//! Runs exploration over both graph stores, including cyclic graphs.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use graph_rag_reasoning::cache::TieredCache;
use graph_rag_reasoning::config::{DatabaseConfig, ExplorationConfig};
use graph_rag_reasoning::error::{LangbaseError, LangbaseResult};
use graph_rag_reasoning::langbase::{LanguageModel, Message};
use graph_rag_reasoning::reasoning::{ChainedExploration, ExplorationStatus, ReasoningCore};
use graph_rag_reasoning::storage::{
    EntityRecord, GraphSnapshot, GraphStore, MemoryGraphStore, RelationshipRecord,
    SqliteGraphStore,
};

/// Exploration never calls the model.
struct Unused;

#[async_trait]
impl LanguageModel for Unused {
    async fn invoke(&self, _messages: Vec<Message>) -> LangbaseResult<String> {
        Err(LangbaseError::InvalidResponse {
            message: "no model in exploration tests".into(),
        })
    }
}

fn core() -> ReasoningCore {
    ReasoningCore::new(
        Arc::new(Unused),
        TieredCache::in_memory(8, Duration::from_secs(60)),
    )
}

fn entity(id: &str) -> EntityRecord {
    EntityRecord {
        id: id.to_string(),
        name: format!("Node {}", id),
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

/// Triangle a-b-c with a tail c-d.
fn cyclic() -> GraphSnapshot {
    GraphSnapshot {
        entities: ["a", "b", "c", "d"].into_iter().map(entity).collect(),
        relationships: vec![
            edge("a", "b", 0.9),
            edge("b", "c", 0.9),
            edge("c", "a", 0.8),
            edge("c", "d", 0.7),
        ],
        ..GraphSnapshot::default()
    }
}

async fn run(store: Arc<dyn GraphStore>, config: ExplorationConfig) -> ChainedExploration {
    let mut exploration = ChainedExploration::new(store, config, core());
    let path_id = exploration.start_exploration("node", &["a".to_string()]);
    let status = exploration.explore_to_completion(&path_id).await;
    assert_eq!(status, ExplorationStatus::Completed);

    let nodes = exploration.get_exploration_path(&path_id).expect("path");
    let unique: HashSet<&str> = nodes.iter().map(|n| n.node_id.as_str()).collect();
    assert_eq!(unique.len(), nodes.len(), "a node was visited twice");
    exploration
}

#[cfg(test)]
mod cycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_cycle_terminates_in_memory() {
        let store = Arc::new(MemoryGraphStore::from_snapshot(cyclic()));
        run(store, ExplorationConfig::default()).await;
    }

    #[tokio::test]
    async fn test_cycle_terminates_in_sqlite() {
        let dir = TempDir::new().unwrap();
        let store = SqliteGraphStore::new(&DatabaseConfig {
            path: dir.path().join("graph.db"),
            max_connections: 1,
        })
        .await
        .unwrap();
        store.import_snapshot(&cyclic()).await.unwrap();

        let mut exploration = ChainedExploration::new(
            Arc::new(store),
            ExplorationConfig::default(),
            core(),
        );
        let path_id = exploration.start_exploration("node", &["a".to_string()]);
        exploration.explore_to_completion(&path_id).await;

        let summary = exploration.get_exploration_summary(&path_id).unwrap();
        assert_eq!(summary.total_nodes, 4);
        assert_eq!(summary.max_depth, 2);
        assert_eq!(summary.nodes_by_depth.get(&1), Some(&2));
        assert_eq!(summary.nodes_by_depth.get(&2), Some(&1));
    }

    #[tokio::test]
    async fn test_width_and_depth_limits() {
        let store = Arc::new(MemoryGraphStore::from_snapshot(cyclic()));
        let config = ExplorationConfig {
            max_steps: 1,
            exploration_width: 1,
            ..ExplorationConfig::default()
        };
        let mut exploration = ChainedExploration::new(store, config, core());
        let path_id = exploration.start_exploration("node", &["a".to_string()]);
        exploration.explore_to_completion(&path_id).await;

        let nodes = exploration.get_exploration_path(&path_id).unwrap();
        let ids: Vec<&str> = nodes.iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(nodes[1].parent_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_backtrack_then_reexplore() {
        let store = Arc::new(MemoryGraphStore::from_snapshot(cyclic()));
        let mut exploration = run(store, ExplorationConfig::default()).await;
        let path_id = exploration.start_exploration("node", &["a".to_string()]);
        exploration.explore_to_completion(&path_id).await;

        assert!(exploration.backtrack(&path_id, 1));
        let nodes = exploration.get_exploration_path(&path_id).unwrap();
        assert!(nodes.iter().all(|n| n.depth <= 1));

        exploration.explore_to_completion(&path_id).await;
        let nodes = exploration.get_exploration_path(&path_id).unwrap();
        assert!(nodes.iter().any(|n| n.node_id == "d" && n.depth == 2));
    }
}
