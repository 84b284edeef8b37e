use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use graph_rag_reasoning::{
    cache::TieredCache,
    config::{Config, LogFormat},
    error::{AppError, ToolError},
    langbase::{LangbaseClient, PipeModel},
    reasoning::{
        AnswerValidator, ChainedExploration, ComplexityEstimator, DualPathSearcher,
        ReasoningCore, ResearchAgent,
    },
    retrieval::{DocumentRetriever, GraphRetriever},
    storage::{GraphSnapshot, SqliteGraphStore},
    streaming::{progress_channel, RecvOutcome},
};

const RETRIEVAL_LIMIT: usize = 5;
const RELATED_ENTITIES: usize = 3;

#[derive(Parser)]
#[command(name = "graph-rag-reasoning", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a question over the knowledge graph
    Ask {
        query: String,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Score question complexity without calling any model
    Complexity { queries: Vec<String> },
    /// Import a JSON graph snapshot into the database
    Import { path: PathBuf },
    /// Walk the graph outward from seed entities
    Explore {
        query: String,
        #[arg(long = "seed", required = true)]
        seeds: Vec<String>,
    },
    /// Create any missing Langbase pipes
    Pipes,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Command::Complexity { queries } = &cli.command {
        let estimator = ComplexityEstimator::new();
        let metrics = estimator.batch_estimate(queries);
        println!("{}", serde_json::to_string_pretty(&metrics)?);
        return Ok(());
    }

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Graph RAG reasoning starting..."
    );

    match cli.command {
        Command::Ask { query, json } => ask(&config, &query, json).await,
        Command::Import { path } => import(&config, &path).await,
        Command::Explore { query, seeds } => explore(&config, &query, &seeds).await,
        Command::Pipes => {
            let client = LangbaseClient::new(&config.langbase, config.request.clone())?;
            if let Err(e) = client.ensure_pipes(&config.pipes).await {
                error!(error = %e, "Failed to ensure pipes exist");
                return Err(e.into());
            }
            info!("All pipes present");
            Ok(())
        }
        Command::Complexity { .. } => Ok(()),
    }
}

async fn ask(config: &Config, query: &str, json: bool) -> anyhow::Result<()> {
    if query.trim().is_empty() {
        return Err(AppError::from(ToolError::Validation {
            field: "query".to_string(),
            reason: "must not be empty".to_string(),
        })
        .into());
    }

    let store = match SqliteGraphStore::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            Arc::new(s)
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };
    let cache = TieredCache::from_config(&config.cache)?;
    let client = LangbaseClient::new(&config.langbase, config.request.clone())?;
    info!(base_url = %config.langbase.base_url, "Langbase client initialized");

    let core = ReasoningCore::new(
        Arc::new(PipeModel::new(client.clone(), &config.pipes.reasoning)),
        cache.clone(),
    );
    let query_core = core.with_model(Arc::new(PipeModel::new(client.clone(), &config.pipes.query)));
    let validation_core =
        core.with_model(Arc::new(PipeModel::new(client, &config.pipes.validation)));

    let searcher = DualPathSearcher::new(
        Arc::new(DocumentRetriever::new(store.clone(), cache.clone(), RETRIEVAL_LIMIT)),
        Arc::new(GraphRetriever::new(
            store.clone(),
            cache,
            RETRIEVAL_LIMIT,
            RELATED_ENTITIES,
        )),
        config.reasoning.search.clone(),
        core.clone(),
    );
    let exploration =
        ChainedExploration::new(store, config.reasoning.exploration.clone(), core.clone());

    let (progress, mut events) = progress_channel(64);
    let consumer = tokio::spawn(async move {
        loop {
            match events.next_timeout(Duration::from_secs(1)).await {
                RecvOutcome::Event(event) => info!(event = ?event, "Progress"),
                RecvOutcome::TimedOut => continue,
                RecvOutcome::Closed => break,
            }
        }
    });

    let mut agent = ResearchAgent::new(&config.reasoning, core, searcher)
        .with_query_core(query_core)
        .with_validator(AnswerValidator::new(
            validation_core,
            config.reasoning.validation.clone(),
        ))
        .with_exploration(exploration)
        .with_progress(progress);
    let report = agent.answer(query).await;
    drop(agent);
    let _ = consumer.await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.answer);
    }
    Ok(())
}

async fn import(config: &Config, path: &PathBuf) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(path).await?;
    let snapshot: GraphSnapshot = serde_json::from_str(&raw)?;
    let store = SqliteGraphStore::new(&config.database).await?;
    let counts = store.import_snapshot(&snapshot).await?;
    info!(
        entities = counts.entities,
        relationships = counts.relationships,
        documents = counts.documents,
        "Snapshot imported"
    );
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}

async fn explore(config: &Config, query: &str, seeds: &[String]) -> anyhow::Result<()> {
    let store = Arc::new(SqliteGraphStore::new(&config.database).await?);
    let cache = TieredCache::from_config(&config.cache)?;
    let client = LangbaseClient::new(&config.langbase, config.request.clone())?;
    let core = ReasoningCore::new(
        Arc::new(PipeModel::new(client, &config.pipes.reasoning)),
        cache,
    );

    let mut exploration =
        ChainedExploration::new(store, config.reasoning.exploration.clone(), core);
    let path_id = exploration.start_exploration(query, seeds);
    exploration.explore_to_completion(&path_id).await;

    let (Some(summary), Some(nodes)) = (
        exploration.get_exploration_summary(&path_id),
        exploration.get_exploration_path(&path_id),
    ) else {
        return Err(AppError::from(ToolError::Session(format!(
            "exploration path {} vanished",
            path_id
        )))
        .into());
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "summary": summary,
            "nodes": nodes,
        }))?
    );
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
