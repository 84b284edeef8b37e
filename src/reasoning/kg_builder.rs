//! Per-question knowledge graphs extracted from retrieved text.
//!
//! Entities come from two places: the surface patterns in
//! [`crate::text::extract_entities`] and one model call that returns JSON.
//! When both name the same entity the model's reading wins. Relationships come
//! from the model only and must join two extracted entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{parse_completion, ErrorKind, ReasoningCore};
use crate::langbase::Message;
use crate::prompts::KG_EXTRACTION_PROMPT;
use crate::text::extract_entities;

const PATTERN_CONFIDENCE: f64 = 0.8;
const MODEL_CONFIDENCE: f64 = 0.9;
const RELATION_CONFIDENCE: f64 = 0.8;
const MAX_ENTITIES: usize = 50;
const MAX_RELATIONS: usize = 100;
const DEFAULT_ENTITY_TYPE: &str = "concept";
const DEFAULT_RELATION: &str = "related_to";

/// An entity in a built graph. `entity_id` is `type:lowercased name`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphEntity {
    pub entity_id: String,
    pub entity_type: String,
    pub name: String,
    pub description: String,
    pub confidence: f64,
    pub source: String,
}

impl GraphEntity {
    fn new(
        entity_type: &str,
        name: &str,
        description: &str,
        confidence: f64,
        source: &str,
    ) -> Self {
        let entity_type = entity_type.trim().to_lowercase();
        let name = name.trim().to_string();
        let description = if description.trim().is_empty() {
            format!("{}: {}", entity_type, name)
        } else {
            description.trim().to_string()
        };
        Self {
            entity_id: format!("{}:{}", entity_type, name.to_lowercase()),
            entity_type,
            name,
            description,
            confidence,
            source: source.to_string(),
        }
    }
}

/// A directed relationship between two entity names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphRelation {
    pub relation_id: String,
    pub source_entity: String,
    pub target_entity: String,
    pub relation_type: String,
    pub description: String,
    pub confidence: f64,
    pub source: String,
}

/// One graph built by [`KnowledgeGraphBuilder`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeGraph {
    pub graph_id: String,
    pub entities: BTreeMap<String, GraphEntity>,
    pub relations: BTreeMap<String, GraphRelation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeGraph {
    fn new(graph_id: &str) -> Self {
        let now = Utc::now();
        Self {
            graph_id: graph_id.to_string(),
            entities: BTreeMap::new(),
            relations: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn upsert_entity(&mut self, entity: GraphEntity) {
        match self.entities.get(&entity.entity_id) {
            Some(existing) if existing.confidence >= entity.confidence => {}
            _ => {
                self.entities.insert(entity.entity_id.clone(), entity);
            }
        }
    }

    fn upsert_relation(&mut self, relation: GraphRelation) {
        match self.relations.get(&relation.relation_id) {
            Some(existing) if existing.confidence >= relation.confidence => {}
            _ => {
                self.relations.insert(relation.relation_id.clone(), relation);
            }
        }
    }
}

/// Counts per type for one graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphSummary {
    pub graph_id: String,
    pub entities_count: usize,
    pub relations_count: usize,
    pub entity_types: BTreeMap<String, usize>,
    pub relation_types: BTreeMap<String, usize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
struct Extraction {
    #[serde(default)]
    entities: Vec<RawEntity>,
    #[serde(default, alias = "relations")]
    relationships: Vec<RawRelation>,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    name: String,
    #[serde(default, rename = "type", alias = "entity_type")]
    entity_type: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct RawRelation {
    source: String,
    target: String,
    #[serde(default, alias = "type", alias = "relation_type")]
    relation: String,
    #[serde(default)]
    description: String,
}

/// Builds, merges and discards in-memory graphs.
pub struct KnowledgeGraphBuilder {
    core: ReasoningCore,
    graphs: HashMap<String, KnowledgeGraph>,
    current: Option<String>,
}

impl KnowledgeGraphBuilder {
    /// Create a builder with no graphs.
    pub fn new(core: ReasoningCore) -> Self {
        Self {
            core,
            graphs: HashMap::new(),
            current: None,
        }
    }

    /// Create (or reset) a graph and make it current.
    pub fn create_graph(&mut self, graph_id: Option<&str>) -> String {
        let graph_id = graph_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("kg_{}", Uuid::new_v4().simple()));
        self.graphs.insert(graph_id.clone(), KnowledgeGraph::new(&graph_id));
        self.current = Some(graph_id.clone());
        info!(graph_id = %graph_id, "Knowledge graph created");
        graph_id
    }

    /// The graph new text goes into when no id is given.
    pub fn current_graph_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Entities and relationships found in `text`.
    ///
    /// A failed or unparsable model call leaves pattern matches only.
    pub async fn extract(
        &self,
        text: &str,
        source: &str,
    ) -> (Vec<GraphEntity>, Vec<GraphRelation>) {
        let mut entities = pattern_entities(text, source);
        let mut raw_relations = Vec::new();

        if let Some(extraction) = self.model_extraction(text).await {
            entities.extend(
                extraction
                    .entities
                    .iter()
                    .filter(|raw| !raw.name.trim().is_empty())
                    .map(|raw| {
                        let entity_type = if raw.entity_type.trim().is_empty() {
                            DEFAULT_ENTITY_TYPE
                        } else {
                            raw.entity_type.as_str()
                        };
                        GraphEntity::new(
                            entity_type,
                            &raw.name,
                            &raw.description,
                            MODEL_CONFIDENCE,
                            source,
                        )
                    }),
            );
            raw_relations = extraction.relationships;
        }

        let mut entities = dedupe_entities(entities);
        if entities.len() > MAX_ENTITIES {
            entities.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
            entities.truncate(MAX_ENTITIES);
        }
        let relations = known_relations(raw_relations, &entities, source);
        (entities, relations)
    }

    /// Extract from `text` into `graph_id`, the current graph, or a new one.
    pub async fn build_from_text(
        &mut self,
        text: &str,
        source: &str,
        graph_id: Option<&str>,
    ) -> String {
        let graph_id = match graph_id.map(str::to_string).or_else(|| self.current.clone()) {
            Some(id) => id,
            None => self.create_graph(None),
        };
        if !self.graphs.contains_key(&graph_id) {
            self.create_graph(Some(&graph_id));
        }

        let (entities, relations) = self.extract(text, source).await;
        let (entity_count, relation_count) = (entities.len(), relations.len());

        let graph = self
            .graphs
            .entry(graph_id.clone())
            .or_insert_with(|| KnowledgeGraph::new(&graph_id));
        for entity in entities {
            graph.upsert_entity(entity);
        }
        for relation in relations {
            graph.upsert_relation(relation);
        }
        graph.updated_at = Utc::now();

        info!(
            graph_id = %graph_id,
            entities = entity_count,
            relations = relation_count,
            "Knowledge graph built"
        );
        graph_id
    }

    /// Borrow a graph.
    pub fn graph(&self, graph_id: &str) -> Option<&KnowledgeGraph> {
        self.graphs.get(graph_id)
    }

    /// Type counts for `graph_id`, or the current graph.
    pub fn summary(&self, graph_id: Option<&str>) -> Option<GraphSummary> {
        let graph_id = graph_id.or(self.current.as_deref())?;
        let graph = self.graphs.get(graph_id)?;

        let mut entity_types = BTreeMap::new();
        for entity in graph.entities.values() {
            *entity_types.entry(entity.entity_type.clone()).or_insert(0) += 1;
        }
        let mut relation_types = BTreeMap::new();
        for relation in graph.relations.values() {
            *relation_types
                .entry(relation.relation_type.clone())
                .or_insert(0) += 1;
        }

        Some(GraphSummary {
            graph_id: graph.graph_id.clone(),
            entities_count: graph.entities.len(),
            relations_count: graph.relations.len(),
            entity_types,
            relation_types,
            created_at: graph.created_at,
            updated_at: graph.updated_at,
        })
    }

    /// Copy `source_id` into `target_id`, keeping the more confident of two
    /// entries with the same id. False when either graph is missing.
    pub fn merge_graphs(&mut self, source_id: &str, target_id: &str) -> bool {
        let Some(source) = self.graphs.get(source_id).cloned() else {
            warn!(graph_id = %source_id, "Merge source graph not found");
            return false;
        };
        let Some(target) = self.graphs.get_mut(target_id) else {
            warn!(graph_id = %target_id, "Merge target graph not found");
            return false;
        };

        for entity in source.entities.into_values() {
            target.upsert_entity(entity);
        }
        for relation in source.relations.into_values() {
            target.upsert_relation(relation);
        }
        target.updated_at = Utc::now();
        info!(source = %source_id, target = %target_id, "Knowledge graphs merged");
        true
    }

    /// Drop `graph_id`, or the current graph. Returns whether one was removed.
    pub fn clear_graph(&mut self, graph_id: Option<&str>) -> bool {
        let Some(graph_id) = graph_id.map(str::to_string).or_else(|| self.current.clone()) else {
            return false;
        };
        let removed = self.graphs.remove(&graph_id).is_some();
        if self.current.as_deref() == Some(graph_id.as_str()) {
            self.current = None;
        }
        if removed {
            debug!(graph_id = %graph_id, "Knowledge graph cleared");
        }
        removed
    }

    /// Drop every graph.
    pub fn clear_all(&mut self) {
        self.graphs.clear();
        self.current = None;
    }

    async fn model_extraction(&self, text: &str) -> Option<Extraction> {
        let messages = vec![
            Message::system(KG_EXTRACTION_PROMPT),
            Message::user(format!("Text:\n{}", text)),
        ];
        let completion = match self.core.invoke("kg_extract", messages).await {
            Ok(completion) => completion,
            Err(e) => {
                warn!(error = %e, "Entity extraction failed, using patterns only");
                return None;
            }
        };
        match parse_completion::<Extraction>(&completion) {
            Ok(extraction) => Some(extraction),
            Err(e) => {
                self.core.errors().record(ErrorKind::Parse);
                debug!(error = %e, "Unparsable entity extraction");
                None
            }
        }
    }
}

fn pattern_entities(text: &str, source: &str) -> Vec<GraphEntity> {
    let found = extract_entities(text);
    [
        ("person", found.persons),
        ("organization", found.organizations),
        ("location", found.locations),
    ]
    .into_iter()
    .flat_map(|(entity_type, names)| {
        names
            .into_iter()
            .map(move |name| GraphEntity::new(entity_type, &name, "", PATTERN_CONFIDENCE, source))
    })
    .collect()
}

/// First occurrence keeps its position; a more confident duplicate replaces it.
fn dedupe_entities(entities: Vec<GraphEntity>) -> Vec<GraphEntity> {
    let mut unique: Vec<GraphEntity> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for entity in entities {
        match index.get(&entity.entity_id) {
            Some(&i) => {
                if entity.confidence > unique[i].confidence {
                    unique[i] = entity;
                }
            }
            None => {
                index.insert(entity.entity_id.clone(), unique.len());
                unique.push(entity);
            }
        }
    }
    unique
}

fn known_relations(
    raw: Vec<RawRelation>,
    entities: &[GraphEntity],
    source: &str,
) -> Vec<GraphRelation> {
    if entities.len() < 2 {
        return Vec::new();
    }
    let names: HashSet<String> = entities.iter().map(|e| e.name.to_lowercase()).collect();

    let mut relations: Vec<GraphRelation> = Vec::new();
    let mut seen = HashSet::new();
    for relation in raw {
        let from = relation.source.trim();
        let to = relation.target.trim();
        if from.eq_ignore_ascii_case(to)
            || !names.contains(&from.to_lowercase())
            || !names.contains(&to.to_lowercase())
        {
            continue;
        }
        let relation_type = match relation.relation.trim() {
            "" => DEFAULT_RELATION.to_string(),
            other => other.to_string(),
        };
        let relation_id = format!(
            "{}|{}|{}",
            from.to_lowercase(),
            relation_type.to_lowercase(),
            to.to_lowercase()
        );
        if !seen.insert(relation_id.clone()) {
            continue;
        }
        let description = if relation.description.trim().is_empty() {
            format!("{} {} {}", from, relation_type, to)
        } else {
            relation.description.trim().to_string()
        };
        relations.push(GraphRelation {
            relation_id,
            source_entity: from.to_string(),
            target_entity: to.to_string(),
            relation_type,
            description,
            confidence: RELATION_CONFIDENCE,
            source: source.to_string(),
        });
        if relations.len() >= MAX_RELATIONS {
            break;
        }
    }
    relations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TieredCache;
    use crate::error::LangbaseError;
    use crate::langbase::MockLanguageModel;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    const EXTRACTION: &str = r#"```json
{
  "entities": [
    {"name": "Alice Smith", "type": "person", "description": "Economist at the central bank"},
    {"name": "Inflation", "type": "concept"},
    {"name": "Unemployment", "type": "concept", "description": "Share of the labour force without work"}
  ],
  "relationships": [
    {"source": "Inflation", "target": "Unemployment", "relation": "trades off with"},
    {"source": "inflation", "target": "Unemployment", "relation": "trades off with"},
    {"source": "Inflation", "target": "Interest Rates", "relation": "drives"},
    {"source": "Alice Smith", "target": "Alice Smith", "relation": "is"}
  ]
}
```"#;

    const TEXT: &str = "Alice Smith argues that Inflation and Unemployment move inversely in the short run.";

    fn builder(reply: Result<&'static str, ()>) -> KnowledgeGraphBuilder {
        let mut model = MockLanguageModel::new();
        model.expect_invoke().returning(move |_| match reply {
            Ok(text) => Ok(text.to_string()),
            Err(()) => Err(LangbaseError::Timeout { timeout_ms: 10 }),
        });
        KnowledgeGraphBuilder::new(ReasoningCore::new(
            Arc::new(model),
            TieredCache::in_memory(16, Duration::from_secs(60)),
        ))
    }

    #[tokio::test]
    async fn test_model_entities_override_pattern_matches() {
        let builder = builder(Ok(EXTRACTION));
        let (entities, relations) = builder.extract(TEXT, "evidence").await;

        let ids: Vec<&str> = entities.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["person:alice smith", "concept:inflation", "concept:unemployment"]
        );
        assert_eq!(entities[0].confidence, MODEL_CONFIDENCE);
        assert_eq!(entities[0].description, "Economist at the central bank");
        assert_eq!(entities[1].description, "concept: Inflation");

        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].relation_id, "inflation|trades off with|unemployment");
        assert_eq!(relations[0].source, "evidence");
    }

    #[tokio::test]
    async fn test_failed_model_call_keeps_pattern_entities() {
        let builder = builder(Err(()));
        let (entities, relations) = builder.extract(TEXT, "evidence").await;

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].entity_id, "person:alice smith");
        assert_eq!(entities[0].confidence, PATTERN_CONFIDENCE);
        assert!(relations.is_empty());
    }

    #[tokio::test]
    async fn test_unparsable_reply_counts_parse_error() {
        let builder = builder(Ok("I found some entities but forgot the format"));
        let (entities, _) = builder.extract("nothing named here", "evidence").await;

        assert!(entities.is_empty());
        assert_eq!(builder.core.errors().count(ErrorKind::Parse), 1);
    }

    #[tokio::test]
    async fn test_build_summary_and_clear() {
        let mut builder = builder(Ok(EXTRACTION));
        let graph_id = builder.build_from_text(TEXT, "evidence", None).await;
        assert_eq!(builder.current_graph_id(), Some(graph_id.as_str()));

        let summary = builder.summary(None).expect("summary");
        assert_eq!(summary.entities_count, 3);
        assert_eq!(summary.relations_count, 1);
        assert_eq!(summary.entity_types["concept"], 2);
        assert_eq!(summary.relation_types["trades off with"], 1);

        // same text again only refreshes
        builder.build_from_text(TEXT, "evidence", None).await;
        assert_eq!(builder.summary(None).map(|s| s.entities_count), Some(3));

        assert!(builder.clear_graph(None));
        assert!(builder.current_graph_id().is_none());
        assert!(builder.summary(Some(&graph_id)).is_none());
        assert!(!builder.clear_graph(None));
    }

    #[tokio::test]
    async fn test_merge_keeps_more_confident_entity() {
        let mut builder = builder(Err(()));
        let target = builder.create_graph(Some("target"));
        builder.build_from_text(TEXT, "patterns", Some(&target)).await;

        let source = builder.create_graph(Some("source"));
        let graph = builder.graphs.get_mut(&source).expect("source graph");
        graph.upsert_entity(GraphEntity::new(
            "person",
            "Alice Smith",
            "Economist",
            MODEL_CONFIDENCE,
            "model",
        ));
        graph.upsert_entity(GraphEntity::new("location", "Boston City", "", 0.85, "model"));

        assert!(builder.merge_graphs("source", "target"));
        let merged = builder.graph("target").expect("target graph");
        assert_eq!(merged.entities.len(), 2);
        assert_eq!(merged.entities["person:alice smith"].source, "model");
        assert_eq!(
            merged.entities["location:boston city"].description,
            "location: Boston City"
        );

        assert!(!builder.merge_graphs("missing", "target"));
        assert!(!builder.merge_graphs("source", "missing"));
        builder.clear_all();
        assert!(builder.graph("target").is_none());
    }

    #[test]
    fn test_dedupe_keeps_first_position() {
        let entities = vec![
            GraphEntity::new("concept", "GDP", "", 0.8, "a"),
            GraphEntity::new("concept", "CPI", "", 0.8, "a"),
            GraphEntity::new("concept", "gdp", "gross domestic product", 0.9, "b"),
        ];
        let unique = dedupe_entities(entities);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].name, "gdp");
        assert_eq!(unique[0].source, "b");
        assert_eq!(unique[1].name, "CPI");
    }
}
