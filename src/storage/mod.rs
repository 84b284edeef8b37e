//! Graph store boundary for exploration and retrieval.
//!
//! The reasoning engine only needs neighbor lookups and ranked text search.
//! [`GraphQuery`] names those lookups as a closed set of typed requests and
//! [`GraphStore`] answers them with flat [`GraphRow`]s. Two stores ship here:
//! [`SqliteGraphStore`] for persistent graphs and [`MemoryGraphStore`] for
//! snapshots held in memory.

mod memory;
mod sqlite;

pub use memory::MemoryGraphStore;
pub use sqlite::SqliteGraphStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StorageResult;

/// Kind of graph node a row or exploration node refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// A named entity.
    Entity,
    /// A source document.
    Document,
    /// A detected community of entities.
    Community,
    /// A text chunk of a document.
    Chunk,
}

impl NodeType {
    /// Get the node type as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Entity => "entity",
            NodeType::Document => "document",
            NodeType::Community => "community",
            NodeType::Chunk => "chunk",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "entity" => Ok(NodeType::Entity),
            "document" => Ok(NodeType::Document),
            "community" => Ok(NodeType::Community),
            "chunk" => Ok(NodeType::Chunk),
            _ => Err(format!("Unknown node type: {}", s)),
        }
    }
}

/// Typed lookups a graph store must answer.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphQuery {
    /// Entities related to `entity_id`, strongest relationship first.
    EntityNeighbors { entity_id: String, limit: usize },
    /// Entities mentioned in a document's chunks, highest rank first.
    DocumentEntities { document_id: String, limit: usize },
    /// Members of a community, highest rank first.
    CommunityEntities { community_id: String, limit: usize },
    /// Chunks ranked by keyword overlap with `text`.
    SearchChunks { text: String, limit: usize },
    /// Entities whose name or description overlaps `text`.
    SearchEntities { text: String, limit: usize },
}

impl GraphQuery {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GraphQuery::EntityNeighbors { .. } => "entity_neighbors",
            GraphQuery::DocumentEntities { .. } => "document_entities",
            GraphQuery::CommunityEntities { .. } => "community_entities",
            GraphQuery::SearchChunks { .. } => "search_chunks",
            GraphQuery::SearchEntities { .. } => "search_entities",
        }
    }
}

/// One result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRow {
    /// Node identifier.
    pub id: String,
    /// Node kind.
    pub node_type: NodeType,
    /// Display text (name and description, or chunk text).
    pub content: String,
    /// Source-side weight in [0, 1]: relationship weight, entity rank, or match score.
    pub relevance: f64,
}

/// Neighbor lookup and ranked search over a knowledge graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Run one typed query.
    async fn query(&self, query: &GraphQuery) -> StorageResult<Vec<GraphRow>>;
}

/// Entity record in a graph snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub description: String,
    /// Importance in [0, 1]
    #[serde(default = "default_weight")]
    pub rank: f64,
}

/// Undirected relationship between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub description: String,
    /// Strength in [0, 1]
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// Chunk of a document and the entities it mentions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub entity_ids: Vec<String>,
}

/// Source document with its chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub chunks: Vec<ChunkRecord>,
}

/// Entity community with a summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub members: Vec<String>,
}

/// Whole-graph import format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub entities: Vec<EntityRecord>,
    #[serde(default)]
    pub relationships: Vec<RelationshipRecord>,
    #[serde(default)]
    pub documents: Vec<DocumentRecord>,
    #[serde(default)]
    pub communities: Vec<CommunityRecord>,
}

fn default_weight() -> f64 {
    0.5
}

/// `name: description`, or just the name when there is no description.
pub(crate) fn entity_content(name: &str, description: &str) -> String {
    if description.trim().is_empty() {
        name.to_string()
    } else {
        format!("{}: {}", name, description)
    }
}

/// Share of the query keywords that appear (case-insensitively) in `text`.
pub(crate) fn keyword_match_score(keywords: &[String], text: &str) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let lower = text.to_lowercase();
    let hits = keywords.iter().filter(|k| lower.contains(k.as_str())).count();
    hits as f64 / keywords.len() as f64
}

/// Keywords used for ranked search.
pub(crate) fn search_keywords(text: &str) -> Vec<String> {
    crate::text::extract_keywords(text, 12)
}
