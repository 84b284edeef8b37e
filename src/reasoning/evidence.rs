//! Evidence chains: per-query accumulation of scored snippets and the
//! reasoning steps that cite them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EvidenceConfig;
use crate::text::preview;

/// Where a piece of evidence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Document chunk (kb path).
    Document,
    /// Graph entity (kg path or exploration).
    Entity,
    /// Relationship between entities.
    Relationship,
    /// Community summary.
    Community,
}

impl SourceType {
    /// Get the source type as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Document => "document",
            SourceType::Entity => "entity",
            SourceType::Relationship => "relationship",
            SourceType::Community => "community",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "document" => Ok(SourceType::Document),
            "entity" => Ok(SourceType::Entity),
            "relationship" => Ok(SourceType::Relationship),
            "community" => Ok(SourceType::Community),
            _ => Err(format!("Unknown source type: {}", s)),
        }
    }
}

/// A scored supporting snippet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub evidence_id: String,
    pub source_id: String,
    pub content: String,
    pub source_type: SourceType,
    pub relevance_score: f64,
    pub confidence_score: f64,
    pub timestamp: DateTime<Utc>,
}

/// One step of reasoning and the evidence it used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub step_id: String,
    pub description: String,
    pub evidence_ids: Vec<String>,
    pub reasoning_type: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// Evidence and steps for one query.
///
/// `evidence_items` keeps insertion order; eviction removes in place so
/// survivors never move relative to each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceChain {
    pub chain_id: String,
    pub query: String,
    pub reasoning_steps: Vec<ReasoningStep>,
    pub evidence_items: Vec<Evidence>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EvidenceChain {
    fn find(&self, evidence_id: &str) -> Option<usize> {
        self.evidence_items
            .iter()
            .position(|e| e.evidence_id == evidence_id)
    }
}

/// Input for [`EvidenceTracker::add_evidence`].
#[derive(Debug, Clone)]
pub struct NewEvidence {
    pub source_id: String,
    pub content: String,
    pub source_type: SourceType,
    pub step_id: Option<String>,
    pub relevance_score: f64,
    pub confidence_score: f64,
}

impl NewEvidence {
    /// Evidence with neutral scores (0.5 / 0.5) and no step link.
    pub fn new(
        source_id: impl Into<String>,
        content: impl Into<String>,
        source_type: SourceType,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            content: content.into(),
            source_type,
            step_id: None,
            relevance_score: 0.5,
            confidence_score: 0.5,
        }
    }

    /// Set relevance and confidence, clamped to [0, 1].
    pub fn with_scores(mut self, relevance: f64, confidence: f64) -> Self {
        self.relevance_score = relevance.clamp(0.0, 1.0);
        self.confidence_score = confidence.clamp(0.0, 1.0);
        self
    }

    /// Link the evidence to an existing reasoning step.
    pub fn for_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }
}

/// Read-only projection of a chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainSummary {
    pub chain_id: String,
    pub query: String,
    pub evidence_count: usize,
    pub reasoning_steps_count: usize,
    pub evidence_by_type: BTreeMap<String, usize>,
    pub avg_confidence: f64,
    pub avg_relevance: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub duration_secs: f64,
}

/// Evidence preview within a trace step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEvidence {
    pub evidence_id: String,
    pub source_type: SourceType,
    pub content_preview: String,
    pub relevance_score: f64,
}

/// One step of the reasoning trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceStep {
    pub step_id: String,
    pub description: String,
    pub reasoning_type: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub evidence: Vec<TraceEvidence>,
}

/// Evidence plus the steps that cite it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceDetails {
    pub evidence: Evidence,
    pub referenced_by: Vec<String>,
}

/// Owns evidence chains and tracks the current one.
pub struct EvidenceTracker {
    config: EvidenceConfig,
    chains: HashMap<String, EvidenceChain>,
    current_chain_id: Option<String>,
}

/// Content fingerprint: SHA-256 over `source_id:first-50-chars`, 16 hex chars.
pub fn evidence_fingerprint(source_id: &str, content: &str) -> String {
    let prefix: String = content.chars().take(50).collect();
    let digest = Sha256::digest(format!("{}:{}", source_id, prefix).as_bytes());
    hex::encode(digest)[..16].to_string()
}

impl EvidenceTracker {
    /// Create a tracker with no chains.
    pub fn new(config: EvidenceConfig) -> Self {
        Self {
            config,
            chains: HashMap::new(),
            current_chain_id: None,
        }
    }

    /// Start a chain for `query` and make it current.
    pub fn create_evidence_chain(&mut self, query: &str) -> String {
        let chain_id = format!("chain_{}", Uuid::new_v4().simple());
        let now = Utc::now();
        self.chains.insert(
            chain_id.clone(),
            EvidenceChain {
                chain_id: chain_id.clone(),
                query: query.to_string(),
                reasoning_steps: Vec::new(),
                evidence_items: Vec::new(),
                created_at: now,
                updated_at: now,
            },
        );
        self.current_chain_id = Some(chain_id.clone());
        info!(chain_id = %chain_id, "Evidence chain created");
        chain_id
    }

    /// Id of the current chain.
    pub fn current_chain_id(&self) -> Option<&str> {
        self.current_chain_id.as_deref()
    }

    /// The current chain.
    pub fn current_chain(&self) -> Option<&EvidenceChain> {
        self.current_chain_id
            .as_ref()
            .and_then(|id| self.chains.get(id))
    }

    fn current_chain_mut(&mut self) -> Option<&mut EvidenceChain> {
        let id = self.current_chain_id.as_ref()?;
        self.chains.get_mut(id)
    }

    /// Add evidence to the current chain.
    ///
    /// Returns the evidence id, or `None` when there is no current chain or the
    /// item is rejected (below the relevance threshold or failing quality
    /// checks). Re-adding an existing fingerprint returns the existing id.
    pub fn add_evidence(&mut self, evidence: NewEvidence) -> Option<String> {
        let config = self.config.clone();
        let Some(chain) = self.current_chain_mut() else {
            warn!(source_id = %evidence.source_id, "add_evidence called without an active chain");
            return None;
        };

        let evidence_id = evidence_fingerprint(&evidence.source_id, &evidence.content);
        let now = Utc::now();

        if let Some(idx) = chain.find(&evidence_id) {
            if !config.deduplicate {
                let existing = &mut chain.evidence_items[idx];
                existing.relevance_score = evidence.relevance_score;
                existing.confidence_score = evidence.confidence_score;
                existing.timestamp = now;
            }
            link_step(chain, evidence.step_id.as_deref(), &evidence_id);
            chain.updated_at = now;
            debug!(evidence_id = %evidence_id, "Duplicate evidence");
            return Some(evidence_id);
        }

        if evidence.relevance_score < config.relevance_threshold {
            debug!(
                evidence_id = %evidence_id,
                relevance = evidence.relevance_score,
                threshold = config.relevance_threshold,
                "Evidence below relevance threshold"
            );
            return None;
        }

        if config.validate {
            if let Err(reason) = validate_quality(&config, &evidence) {
                debug!(evidence_id = %evidence_id, reason = reason, "Evidence failed validation");
                return None;
            }
        }

        while chain.evidence_items.len() >= config.max_evidence_items {
            if !evict_least_relevant(chain) {
                break;
            }
        }

        chain.evidence_items.push(Evidence {
            evidence_id: evidence_id.clone(),
            source_id: evidence.source_id,
            content: evidence.content,
            source_type: evidence.source_type,
            relevance_score: evidence.relevance_score,
            confidence_score: evidence.confidence_score,
            timestamp: now,
        });
        link_step(chain, evidence.step_id.as_deref(), &evidence_id);
        chain.updated_at = now;

        debug!(
            evidence_id = %evidence_id,
            evidence_count = chain.evidence_items.len(),
            "Evidence added"
        );
        Some(evidence_id)
    }

    /// Append a reasoning step to the current chain; ids are `step_{n}`.
    pub fn add_reasoning_step(
        &mut self,
        description: &str,
        reasoning_type: &str,
        confidence: f64,
    ) -> Option<String> {
        let Some(chain) = self.current_chain_mut() else {
            warn!("add_reasoning_step called without an active chain");
            return None;
        };

        let step_id = format!("step_{}", chain.reasoning_steps.len() + 1);
        let now = Utc::now();
        chain.reasoning_steps.push(ReasoningStep {
            step_id: step_id.clone(),
            description: description.to_string(),
            evidence_ids: Vec::new(),
            reasoning_type: reasoning_type.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            timestamp: now,
        });
        chain.updated_at = now;
        Some(step_id)
    }

    /// Counts and averages for the current chain.
    pub fn get_evidence_chain_summary(&self) -> Option<ChainSummary> {
        let chain = self.current_chain()?;
        let count = chain.evidence_items.len();

        let mut evidence_by_type = BTreeMap::new();
        for item in &chain.evidence_items {
            *evidence_by_type
                .entry(item.source_type.as_str().to_string())
                .or_insert(0) += 1;
        }

        let average = |f: fn(&Evidence) -> f64| {
            if count == 0 {
                0.0
            } else {
                chain.evidence_items.iter().map(f).sum::<f64>() / count as f64
            }
        };

        Some(ChainSummary {
            chain_id: chain.chain_id.clone(),
            query: chain.query.clone(),
            evidence_count: count,
            reasoning_steps_count: chain.reasoning_steps.len(),
            evidence_by_type,
            avg_confidence: average(|e| e.confidence_score),
            avg_relevance: average(|e| e.relevance_score),
            created_at: chain.created_at,
            updated_at: chain.updated_at,
            duration_secs: (chain.updated_at - chain.created_at).num_milliseconds() as f64
                / 1000.0,
        })
    }

    /// Step-by-step trace with 100-character evidence previews.
    pub fn get_reasoning_trace(&self) -> Vec<TraceStep> {
        let Some(chain) = self.current_chain() else {
            return Vec::new();
        };

        chain
            .reasoning_steps
            .iter()
            .map(|step| TraceStep {
                step_id: step.step_id.clone(),
                description: step.description.clone(),
                reasoning_type: step.reasoning_type.clone(),
                confidence: step.confidence,
                timestamp: step.timestamp,
                evidence: step
                    .evidence_ids
                    .iter()
                    .filter_map(|id| chain.find(id).map(|idx| &chain.evidence_items[idx]))
                    .map(|e| TraceEvidence {
                        evidence_id: e.evidence_id.clone(),
                        source_type: e.source_type,
                        content_preview: preview(&e.content, 100),
                        relevance_score: e.relevance_score,
                    })
                    .collect(),
            })
            .collect()
    }

    /// One evidence item and the steps that reference it.
    pub fn get_evidence_details(&self, evidence_id: &str) -> Option<EvidenceDetails> {
        let chain = self.current_chain()?;
        let evidence = chain.evidence_items[chain.find(evidence_id)?].clone();
        let referenced_by = chain
            .reasoning_steps
            .iter()
            .filter(|s| s.evidence_ids.iter().any(|id| id == evidence_id))
            .map(|s| s.step_id.clone())
            .collect();
        Some(EvidenceDetails {
            evidence,
            referenced_by,
        })
    }

    /// Evidence linked to one step, in link order.
    pub fn evidence_for_step(&self, step_id: &str) -> Vec<Evidence> {
        let Some(chain) = self.current_chain() else {
            return Vec::new();
        };
        chain
            .reasoning_steps
            .iter()
            .find(|s| s.step_id == step_id)
            .map(|step| {
                step.evidence_ids
                    .iter()
                    .filter_map(|id| chain.find(id).map(|idx| chain.evidence_items[idx].clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Evidence texts of the current chain in insertion order.
    pub fn evidence_contents(&self) -> Vec<String> {
        self.current_chain()
            .map(|c| c.evidence_items.iter().map(|e| e.content.clone()).collect())
            .unwrap_or_default()
    }

    /// Drop one chain; clears "current" if it was current.
    pub fn clear_chain(&mut self, chain_id: &str) -> bool {
        let removed = self.chains.remove(chain_id).is_some();
        if self.current_chain_id.as_deref() == Some(chain_id) {
            self.current_chain_id = None;
        }
        removed
    }

    /// Drop all state.
    pub fn close(&mut self) {
        self.chains.clear();
        self.current_chain_id = None;
    }
}

fn link_step(chain: &mut EvidenceChain, step_id: Option<&str>, evidence_id: &str) {
    let Some(step_id) = step_id else {
        return;
    };
    match chain.reasoning_steps.iter_mut().find(|s| s.step_id == step_id) {
        Some(step) => {
            if !step.evidence_ids.iter().any(|id| id == evidence_id) {
                step.evidence_ids.push(evidence_id.to_string());
            }
        }
        None => warn!(step_id = %step_id, "Evidence linked to unknown step"),
    }
}

/// Remove the minimum-relevance item and unlink it from every step.
fn evict_least_relevant(chain: &mut EvidenceChain) -> bool {
    let Some(idx) = chain
        .evidence_items
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            a.relevance_score
                .partial_cmp(&b.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(idx, _)| idx)
    else {
        return false;
    };

    let evicted = chain.evidence_items.remove(idx);
    for step in &mut chain.reasoning_steps {
        step.evidence_ids.retain(|id| id != &evicted.evidence_id);
    }
    debug!(
        evidence_id = %evicted.evidence_id,
        relevance = evicted.relevance_score,
        "Evicted least relevant evidence"
    );
    true
}

fn validate_quality(config: &EvidenceConfig, evidence: &NewEvidence) -> Result<(), &'static str> {
    let content = evidence.content.trim();
    if content.chars().count() < config.min_content_chars {
        return Err("content too short");
    }
    if evidence.confidence_score < config.min_confidence {
        return Err("confidence too low");
    }
    let lower = content.to_lowercase();
    if config
        .rejection_markers
        .iter()
        .any(|marker| lower.contains(&marker.to_lowercase()))
    {
        return Err("content contains an uncertainty marker");
    }
    Ok(())
}
