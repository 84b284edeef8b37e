//! Config environment variable tests
//!
//! These tests verify that Config::from_env() correctly reads and applies
//! environment variable overrides. Note that Config::from_env() also loads
//! from .env file via dotenvy, so these tests focus on override behavior.
//!
//! Tests use #[serial] to prevent race conditions with shared env vars.

use graph_rag_reasoning::config::{Config, LogFormat};
use serial_test::serial;
use std::env;

fn with_key() {
    env::set_var("LANGBASE_API_KEY", "test-key");
}

#[test]
#[serial]
fn test_config_requires_api_key() {
    env::remove_var("LANGBASE_API_KEY");
    // A .env file may still provide the key; only assert when it does not.
    if dotenvy::var("LANGBASE_API_KEY").is_err() {
        assert!(Config::from_env().is_err());
    }
    with_key();
    assert!(Config::from_env().is_ok());
}

#[test]
#[serial]
fn test_config_from_env_custom_base_url() {
    with_key();
    env::set_var("LANGBASE_BASE_URL", "https://custom.api.com");

    let config = Config::from_env().unwrap();
    assert_eq!(config.langbase.base_url, "https://custom.api.com");

    env::remove_var("LANGBASE_BASE_URL");
}

#[test]
#[serial]
fn test_config_from_env_custom_database() {
    with_key();
    env::set_var("DATABASE_PATH", "/custom/graph.db");
    env::set_var("DATABASE_MAX_CONNECTIONS", "10");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.path.to_str().unwrap(), "/custom/graph.db");
    assert_eq!(config.database.max_connections, 10);

    env::remove_var("DATABASE_PATH");
    env::remove_var("DATABASE_MAX_CONNECTIONS");
}

#[test]
#[serial]
fn test_config_from_env_json_log_format() {
    with_key();
    env::set_var("LOG_FORMAT", "json");
    env::set_var("LOG_LEVEL", "debug");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.logging.level, "debug");

    env::remove_var("LOG_FORMAT");
    env::remove_var("LOG_LEVEL");
}

#[test]
#[serial]
fn test_config_from_env_custom_pipes() {
    with_key();
    env::set_var("PIPE_REASONING", "custom-reasoning-v2");
    env::set_var("PIPE_VALIDATION", "custom-validation-v2");

    let config = Config::from_env().unwrap();
    assert_eq!(config.pipes.reasoning, "custom-reasoning-v2");
    assert_eq!(config.pipes.validation, "custom-validation-v2");
    assert_eq!(config.pipes.query, "graph-rag-query-v1");

    env::remove_var("PIPE_REASONING");
    env::remove_var("PIPE_VALIDATION");
}

#[test]
#[serial]
fn test_config_reasoning_overrides() {
    with_key();
    env::set_var("THINKING_MAX_DEPTH", "8");
    env::set_var("EXPLORATION_DECAY_FACTOR", "0.75");
    env::set_var("SEARCH_MAX_WORKERS", "4");
    env::set_var("VALIDATION_ENABLED", "false");
    env::set_var("RESEARCH_EXPLORE_GRAPH", "false");
    env::set_var("RESEARCH_BUILD_GRAPH", "false");

    let config = Config::from_env().unwrap();
    assert_eq!(config.reasoning.thinking.max_depth, 8);
    assert_eq!(config.reasoning.exploration.decay_factor, 0.75);
    assert_eq!(config.reasoning.search.max_workers, 4);
    assert!(!config.reasoning.validation.enabled);
    assert!(!config.reasoning.research.explore_graph);
    assert!(!config.reasoning.research.build_graph);

    for key in [
        "THINKING_MAX_DEPTH",
        "EXPLORATION_DECAY_FACTOR",
        "SEARCH_MAX_WORKERS",
        "VALIDATION_ENABLED",
        "RESEARCH_EXPLORE_GRAPH",
        "RESEARCH_BUILD_GRAPH",
    ] {
        env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_config_invalid_number_uses_default() {
    with_key();
    env::set_var("DATABASE_MAX_CONNECTIONS", "not-a-number");
    env::set_var("CACHE_MAX_SIZE", "lots");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.max_connections, 5);
    assert_eq!(config.cache.max_size, 1000);

    env::remove_var("DATABASE_MAX_CONNECTIONS");
    env::remove_var("CACHE_MAX_SIZE");
}

#[test]
#[serial]
fn test_config_out_of_range_weight_is_rejected() {
    with_key();
    env::set_var("SEARCH_KB_WEIGHT", "1.5");

    assert!(Config::from_env().is_err());

    env::remove_var("SEARCH_KB_WEIGHT");
}
