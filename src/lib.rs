//! # Graph RAG Reasoning
//!
//! Iterative reasoning and graph-exploration engine for knowledge-graph RAG
//! agents. Questions are scored for complexity; simple ones get one combined
//! search, complex ones run a think → search loop driven by Langbase Pipes.
//!
//! ## Features
//!
//! - **Thinking Engine**: model-driven loop that proposes the next searches
//! - **Evidence Tracking**: deduplicated, scored evidence chains with a reasoning trace
//! - **Chained Exploration**: breadth-first graph walk with decayed relevance
//! - **Dual-Path Search**: knowledge-base and knowledge-graph retrieval in parallel
//! - **Complexity Estimation**: bilingual heuristics selecting the strategy
//! - **Answer Validation**: accuracy, completeness and consistency checks
//! - **Tiered Cache**: LRU memory tier over a JSON-file disk tier
//!
//! ## Architecture
//!
//! ```text
//! CLI → ResearchAgent → Langbase Pipes (HTTP)
//!            ↓
//!     GraphStore (SQLite) + TieredCache
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use graph_rag_reasoning::cache::TieredCache;
//! use graph_rag_reasoning::langbase::{LangbaseClient, PipeModel};
//! use graph_rag_reasoning::reasoning::{DualPathSearcher, ReasoningCore, ResearchAgent};
//! use graph_rag_reasoning::retrieval::{DocumentRetriever, GraphRetriever};
//! use graph_rag_reasoning::storage::SqliteGraphStore;
//! use graph_rag_reasoning::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = Arc::new(SqliteGraphStore::new(&config.database).await?);
//!     let cache = TieredCache::from_config(&config.cache)?;
//!     let client = LangbaseClient::new(&config.langbase, config.request.clone())?;
//!     let core = ReasoningCore::new(
//!         Arc::new(PipeModel::new(client, &config.pipes.reasoning)),
//!         cache.clone(),
//!     );
//!     let searcher = DualPathSearcher::new(
//!         Arc::new(DocumentRetriever::new(store.clone(), cache.clone(), 5)),
//!         Arc::new(GraphRetriever::new(store, cache, 5, 3)),
//!         config.reasoning.search.clone(),
//!         core.clone(),
//!     );
//!     let mut agent = ResearchAgent::new(&config.reasoning, core, searcher);
//!     let report = agent.answer("How does inflation affect unemployment?").await;
//!     println!("{}", report.answer);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Two-tier (memory + disk) result cache.
pub mod cache;
/// Configuration management.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Langbase API client and the language-model abstraction.
pub mod langbase;
/// System prompts for Langbase pipes.
pub mod prompts;
/// Thinking, evidence, exploration, search, validation and orchestration.
pub mod reasoning;
/// Knowledge-base and knowledge-graph retrievers.
pub mod retrieval;
/// Knowledge-graph storage.
pub mod storage;
/// Progress events for streaming consumers.
pub mod streaming;
/// Text heuristics shared by the reasoning components.
pub mod text;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use reasoning::{ResearchAgent, ResearchReport};
