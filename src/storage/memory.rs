use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use super::{
    entity_content, keyword_match_score, search_keywords, EntityRecord, GraphQuery, GraphRow,
    GraphSnapshot, GraphStore, NodeType,
};
use crate::error::StorageResult;

/// Graph store over an in-memory [`GraphSnapshot`].
#[derive(Debug, Clone, Default)]
pub struct MemoryGraphStore {
    snapshot: GraphSnapshot,
    entities: HashMap<String, usize>,
}

impl MemoryGraphStore {
    /// Index a snapshot.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let entities = snapshot
            .entities
            .iter()
            .enumerate()
            .map(|(idx, e)| (e.id.clone(), idx))
            .collect();
        Self { snapshot, entities }
    }

    fn entity(&self, id: &str) -> Option<&EntityRecord> {
        self.entities.get(id).map(|&idx| &self.snapshot.entities[idx])
    }

    fn entity_row(&self, entity: &EntityRecord, relevance: f64) -> GraphRow {
        GraphRow {
            id: entity.id.clone(),
            node_type: NodeType::Entity,
            content: entity_content(&entity.name, &entity.description),
            relevance: relevance.clamp(0.0, 1.0),
        }
    }

    fn ranked_entities<'a>(
        &self,
        ids: impl Iterator<Item = &'a String>,
        limit: usize,
    ) -> Vec<GraphRow> {
        let mut seen = HashSet::new();
        let mut found: Vec<&EntityRecord> = ids
            .filter(|id| seen.insert(id.to_string()))
            .filter_map(|id| self.entity(id))
            .collect();
        found.sort_by(|a, b| b.rank.partial_cmp(&a.rank).unwrap_or(Ordering::Equal));
        found
            .into_iter()
            .take(limit)
            .map(|e| self.entity_row(e, e.rank))
            .collect()
    }

    fn neighbors(&self, entity_id: &str, limit: usize) -> Vec<GraphRow> {
        let mut edges: Vec<(&EntityRecord, f64)> = self
            .snapshot
            .relationships
            .iter()
            .filter_map(|rel| {
                let other = if rel.source == entity_id {
                    &rel.target
                } else if rel.target == entity_id {
                    &rel.source
                } else {
                    return None;
                };
                self.entity(other).map(|e| (e, rel.weight))
            })
            .collect();
        edges.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        edges
            .into_iter()
            .take(limit)
            .map(|(e, weight)| self.entity_row(e, weight))
            .collect()
    }

    fn search_chunks(&self, text: &str, limit: usize) -> Vec<GraphRow> {
        let keywords = search_keywords(text);
        let mut rows: Vec<GraphRow> = self
            .snapshot
            .documents
            .iter()
            .flat_map(|doc| doc.chunks.iter())
            .filter_map(|chunk| {
                let score = keyword_match_score(&keywords, &chunk.text);
                (score > 0.0).then(|| GraphRow {
                    id: chunk.id.clone(),
                    node_type: NodeType::Chunk,
                    content: chunk.text.clone(),
                    relevance: score,
                })
            })
            .collect();
        rows.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap_or(Ordering::Equal));
        rows.truncate(limit);
        rows
    }

    fn search_entities(&self, text: &str, limit: usize) -> Vec<GraphRow> {
        let keywords = search_keywords(text);
        let mut scored: Vec<(&EntityRecord, f64)> = self
            .snapshot
            .entities
            .iter()
            .filter_map(|e| {
                let haystack = format!("{} {}", e.name, e.description);
                let score = keyword_match_score(&keywords, &haystack);
                (score > 0.0).then_some((e, score))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(b.0.rank.partial_cmp(&a.0.rank).unwrap_or(Ordering::Equal))
        });
        scored
            .into_iter()
            .take(limit)
            .map(|(e, score)| self.entity_row(e, score))
            .collect()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn query(&self, query: &GraphQuery) -> StorageResult<Vec<GraphRow>> {
        let rows = match query {
            GraphQuery::EntityNeighbors { entity_id, limit } => self.neighbors(entity_id, *limit),
            GraphQuery::DocumentEntities { document_id, limit } => {
                let ids = self
                    .snapshot
                    .documents
                    .iter()
                    .filter(|d| &d.id == document_id)
                    .flat_map(|d| d.chunks.iter())
                    .flat_map(|c| c.entity_ids.iter());
                self.ranked_entities(ids, *limit)
            }
            GraphQuery::CommunityEntities {
                community_id,
                limit,
            } => {
                let ids = self
                    .snapshot
                    .communities
                    .iter()
                    .filter(|c| &c.id == community_id)
                    .flat_map(|c| c.members.iter());
                self.ranked_entities(ids, *limit)
            }
            GraphQuery::SearchChunks { text, limit } => self.search_chunks(text, *limit),
            GraphQuery::SearchEntities { text, limit } => self.search_entities(text, *limit),
        };
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ChunkRecord, CommunityRecord, DocumentRecord, RelationshipRecord};

    fn entity(id: &str, name: &str, rank: f64) -> EntityRecord {
        EntityRecord {
            id: id.to_string(),
            name: name.to_string(),
            entity_type: None,
            description: format!("{} description", name),
            rank,
        }
    }

    fn store() -> MemoryGraphStore {
        MemoryGraphStore::from_snapshot(GraphSnapshot {
            entities: vec![
                entity("a", "Inflation", 0.9),
                entity("b", "Interest Rates", 0.7),
                entity("c", "Unemployment", 0.8),
            ],
            relationships: vec![
                RelationshipRecord {
                    source: "a".into(),
                    target: "b".into(),
                    description: "drives".into(),
                    weight: 0.6,
                },
                RelationshipRecord {
                    source: "c".into(),
                    target: "a".into(),
                    description: "trades off".into(),
                    weight: 0.9,
                },
            ],
            documents: vec![DocumentRecord {
                id: "doc1".into(),
                title: "Macro primer".into(),
                chunks: vec![ChunkRecord {
                    id: "chunk1".into(),
                    text: "Inflation and unemployment move in opposite directions".into(),
                    entity_ids: vec!["b".into(), "a".into(), "a".into()],
                }],
            }],
            communities: vec![CommunityRecord {
                id: "comm1".into(),
                title: "Macro".into(),
                summary: String::new(),
                members: vec!["b".into(), "c".into()],
            }],
        })
    }

    #[tokio::test]
    async fn test_neighbors_are_undirected_and_weight_ordered() {
        let rows = store()
            .query(&GraphQuery::EntityNeighbors {
                entity_id: "a".into(),
                limit: 10,
            })
            .await
            .unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
        assert_eq!(rows[0].relevance, 0.9);
    }

    #[tokio::test]
    async fn test_document_entities_dedup_and_rank() {
        let rows = store()
            .query(&GraphQuery::DocumentEntities {
                document_id: "doc1".into(),
                limit: 10,
            })
            .await
            .unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_community_members() {
        let rows = store()
            .query(&GraphQuery::CommunityEntities {
                community_id: "comm1".into(),
                limit: 1,
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "c");
    }

    #[tokio::test]
    async fn test_search_chunks_and_entities() {
        let store = store();
        let chunks = store
            .query(&GraphQuery::SearchChunks {
                text: "inflation unemployment".into(),
                limit: 5,
            })
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].node_type, NodeType::Chunk);
        assert_eq!(chunks[0].relevance, 1.0);

        let entities = store
            .query(&GraphQuery::SearchEntities {
                text: "unemployment".into(),
                limit: 5,
            })
            .await
            .unwrap();
        assert_eq!(entities[0].id, "c");
    }

    #[tokio::test]
    async fn test_unknown_ids_yield_no_rows() {
        let rows = store()
            .query(&GraphQuery::EntityNeighbors {
                entity_id: "zzz".into(),
                limit: 5,
            })
            .await
            .unwrap();
        assert!(rows.is_empty());
    }
}
