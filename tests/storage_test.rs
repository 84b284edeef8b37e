//! Integration tests for the SQLite graph store
//!
//! Tests database operations against a file database in a temporary directory.

use tempfile::TempDir;

use graph_rag_reasoning::config::DatabaseConfig;
use graph_rag_reasoning::error::StorageError;
use graph_rag_reasoning::storage::{
    ChunkRecord, CommunityRecord, DocumentRecord, EntityRecord, GraphQuery, GraphSnapshot,
    GraphStore, MemoryGraphStore, NodeType, RelationshipRecord, SqliteGraphStore,
};

fn entity(id: &str, name: &str, description: &str, rank: f64) -> EntityRecord {
    EntityRecord {
        id: id.to_string(),
        name: name.to_string(),
        entity_type: Some("concept".to_string()),
        description: description.to_string(),
        rank,
    }
}

fn relationship(source: &str, target: &str, weight: f64) -> RelationshipRecord {
    RelationshipRecord {
        source: source.to_string(),
        target: target.to_string(),
        description: String::new(),
        weight,
    }
}

fn snapshot() -> GraphSnapshot {
    GraphSnapshot {
        entities: vec![
            entity("inflation", "Inflation", "general rise in prices", 0.9),
            entity("unemployment", "Unemployment", "share of the labour force without work", 0.8),
            entity("wages", "Wages", "pay for labour", 0.5),
            entity("rates", "Interest rates", "price of borrowing", 0.7),
        ],
        relationships: vec![
            relationship("inflation", "unemployment", 0.9),
            relationship("wages", "inflation", 0.6),
            relationship("rates", "inflation", 0.8),
        ],
        documents: vec![DocumentRecord {
            id: "phillips".to_string(),
            title: "The Phillips curve".to_string(),
            chunks: vec![
                ChunkRecord {
                    id: "phillips-0".to_string(),
                    text: "Inflation and unemployment move inversely in the short run".to_string(),
                    entity_ids: vec!["inflation".to_string(), "unemployment".to_string()],
                },
                ChunkRecord {
                    id: "phillips-1".to_string(),
                    text: "Wage growth feeds into inflation".to_string(),
                    entity_ids: vec!["wages".to_string(), "inflation".to_string()],
                },
            ],
        }],
        communities: vec![CommunityRecord {
            id: "macro".to_string(),
            title: "Macroeconomics".to_string(),
            summary: "Prices, jobs and policy".to_string(),
            members: vec!["inflation".to_string(), "rates".to_string()],
        }],
    }
}

/// Open a fresh database inside `dir`
async fn create_test_store(dir: &TempDir) -> SqliteGraphStore {
    let config = DatabaseConfig {
        path: dir.path().join("data").join("graph.db"),
        max_connections: 2,
    };
    SqliteGraphStore::new(&config)
        .await
        .expect("Failed to open graph database")
}

fn ids(rows: &[graph_rag_reasoning::storage::GraphRow]) -> Vec<&str> {
    rows.iter().map(|r| r.id.as_str()).collect()
}

#[cfg(test)]
mod import_tests {
    use super::*;

    #[tokio::test]
    async fn test_import_snapshot_counts_rows() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir).await;

        let counts = store.import_snapshot(&snapshot()).await.unwrap();

        assert_eq!(counts.entities, 4);
        assert_eq!(counts.relationships, 3);
        assert_eq!(counts.documents, 1);
        assert_eq!(counts.chunks, 2);
        assert_eq!(counts.communities, 1);
    }

    #[tokio::test]
    async fn test_reimport_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir).await;

        store.import_snapshot(&snapshot()).await.unwrap();
        let counts = store.import_snapshot(&snapshot()).await.unwrap();

        assert_eq!(counts.entities, 4);
        assert_eq!(counts.relationships, 3);
        assert_eq!(counts.chunks, 2);
    }

    #[tokio::test]
    async fn test_dangling_relationship_rolls_back() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir).await;

        let mut broken = snapshot();
        broken.relationships.push(relationship("inflation", "ghost", 0.5));

        let result = store.import_snapshot(&broken).await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
        assert_eq!(store.counts().await.unwrap().entities, 0);
    }

    #[tokio::test]
    async fn test_database_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = create_test_store(&dir).await;
            store.import_snapshot(&snapshot()).await.unwrap();
        }
        let store = create_test_store(&dir).await;
        assert_eq!(store.counts().await.unwrap().entities, 4);
    }
}

#[cfg(test)]
mod query_tests {
    use super::*;

    async fn loaded(dir: &TempDir) -> SqliteGraphStore {
        let store = create_test_store(dir).await;
        store.import_snapshot(&snapshot()).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_neighbors_are_undirected_and_weight_ordered() {
        let dir = TempDir::new().unwrap();
        let store = loaded(&dir).await;

        let rows = store
            .query(&GraphQuery::EntityNeighbors {
                entity_id: "inflation".into(),
                limit: 10,
            })
            .await
            .unwrap();

        assert_eq!(ids(&rows), vec!["unemployment", "rates", "wages"]);
        assert_eq!(rows[0].relevance, 0.9);
        assert_eq!(rows[0].node_type, NodeType::Entity);
        assert_eq!(
            rows[0].content,
            "Unemployment: share of the labour force without work"
        );
    }

    #[tokio::test]
    async fn test_document_and_community_entities() {
        let dir = TempDir::new().unwrap();
        let store = loaded(&dir).await;

        let doc = store
            .query(&GraphQuery::DocumentEntities {
                document_id: "phillips".into(),
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(ids(&doc), vec!["inflation", "unemployment", "wages"]);

        let community = store
            .query(&GraphQuery::CommunityEntities {
                community_id: "macro".into(),
                limit: 1,
            })
            .await
            .unwrap();
        assert_eq!(ids(&community), vec!["inflation"]);
    }

    #[tokio::test]
    async fn test_search_matches_memory_store() {
        let dir = TempDir::new().unwrap();
        let sqlite = loaded(&dir).await;
        let memory = MemoryGraphStore::from_snapshot(snapshot());

        for query in [
            GraphQuery::SearchChunks {
                text: "inflation unemployment".into(),
                limit: 5,
            },
            GraphQuery::SearchEntities {
                text: "inflation unemployment".into(),
                limit: 5,
            },
        ] {
            let from_sqlite = sqlite.query(&query).await.unwrap();
            let from_memory = memory.query(&query).await.unwrap();
            assert_eq!(ids(&from_sqlite), ids(&from_memory), "{}", query.kind());
        }
    }

    #[tokio::test]
    async fn test_unknown_ids_yield_no_rows() {
        let dir = TempDir::new().unwrap();
        let store = loaded(&dir).await;

        let rows = store
            .query(&GraphQuery::EntityNeighbors {
                entity_id: "missing".into(),
                limit: 5,
            })
            .await
            .unwrap();
        assert!(rows.is_empty());
    }
}
