use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub langbase: LangbaseConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub pipes: PipeConfig,
    pub cache: CacheConfig,
    pub reasoning: ReasoningConfig,
}

/// Langbase API configuration
#[derive(Debug, Clone)]
pub struct LangbaseConfig {
    pub api_key: String,
    pub base_url: String,
}

/// Graph database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Langbase pipe names, one per LLM call site family
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Thinking engine and answer synthesis
    pub reasoning: String,
    /// Query generation
    pub query: String,
    /// Answer validation checks
    pub validation: String,
}

/// Tiered cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub memory_enabled: bool,
    pub disk_enabled: bool,
    pub max_size: usize,
    pub default_ttl_secs: u64,
    pub directory: PathBuf,
}

/// Tuning for every reasoning component
#[derive(Debug, Clone, Default)]
pub struct ReasoningConfig {
    pub thinking: ThinkingConfig,
    pub evidence: EvidenceConfig,
    pub exploration: ExplorationConfig,
    pub search: SearchConfig,
    pub validation: ValidationConfig,
    pub research: ResearchConfig,
}

/// Thinking engine limits
#[derive(Debug, Clone)]
pub struct ThinkingConfig {
    pub max_depth: usize,
    pub timeout_secs: u64,
    pub max_queries_per_step: usize,
    /// Substrings (case-insensitive) that mark a completion as ready to answer
    pub ready_phrases: Vec<String>,
}

/// Evidence chain acceptance rules
#[derive(Debug, Clone)]
pub struct EvidenceConfig {
    pub max_evidence_items: usize,
    pub relevance_threshold: f64,
    pub min_confidence: f64,
    pub min_content_chars: usize,
    pub deduplicate: bool,
    pub validate: bool,
    /// Markers that disqualify evidence content when validation is on
    pub rejection_markers: Vec<String>,
}

/// Chained exploration bounds
#[derive(Debug, Clone)]
pub struct ExplorationConfig {
    pub max_steps: usize,
    pub exploration_width: usize,
    pub relevance_threshold: f64,
    pub decay_factor: f64,
    pub backtracking: bool,
}

/// Dual-path search fan-out settings
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub max_workers: usize,
    pub timeout_secs: u64,
    pub kb_weight: f64,
    pub kg_weight: f64,
    pub history_limit: usize,
    pub kb_name: String,
}

/// Answer validation settings
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub enabled: bool,
    pub threshold: f64,
}

/// Research loop budget
#[derive(Debug, Clone)]
pub struct ResearchConfig {
    pub max_iterations: usize,
    pub queries_per_iteration: usize,
    pub max_sub_queries: usize,
    pub evidence_sufficiency: usize,
    pub evidence_relevance: f64,
    pub evidence_confidence: f64,
    pub max_reasoning_secs: u64,
    /// Run graph exploration from query-matched entities before iterating
    pub explore_graph: bool,
    /// Extract a per-question graph from collected evidence after the loop
    pub build_graph: bool,
    /// Complexity levels answered with a single search + answer call
    pub single_shot_levels: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let langbase = LangbaseConfig {
            api_key: env::var("LANGBASE_API_KEY").map_err(|_| AppError::Config {
                message: "LANGBASE_API_KEY is required".to_string(),
            })?,
            base_url: env::var("LANGBASE_BASE_URL")
                .unwrap_or_else(|_| "https://api.langbase.com".to_string()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/graph.db".to_string()),
            ),
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_env("REQUEST_TIMEOUT_MS", 30000),
            max_retries: parse_env("MAX_RETRIES", 3),
            retry_delay_ms: parse_env("RETRY_DELAY_MS", 1000),
        };

        let pipes = PipeConfig {
            reasoning: env::var("PIPE_REASONING")
                .unwrap_or_else(|_| "graph-rag-reasoning-v1".to_string()),
            query: env::var("PIPE_QUERY").unwrap_or_else(|_| "graph-rag-query-v1".to_string()),
            validation: env::var("PIPE_VALIDATION")
                .unwrap_or_else(|_| "graph-rag-validation-v1".to_string()),
        };

        let cache = CacheConfig::from_env();
        let reasoning = ReasoningConfig::from_env();
        reasoning.validate()?;

        Ok(Config {
            langbase,
            database,
            logging,
            request,
            pipes,
            cache,
            reasoning,
        })
    }
}

impl CacheConfig {
    /// Load cache settings from `CACHE_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            memory_enabled: parse_env("CACHE_MEMORY_ENABLED", defaults.memory_enabled),
            disk_enabled: parse_env("CACHE_DISK_ENABLED", defaults.disk_enabled),
            max_size: parse_env("CACHE_MAX_SIZE", defaults.max_size),
            default_ttl_secs: parse_env("CACHE_TTL_SECS", defaults.default_ttl_secs),
            directory: env::var("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.directory),
        }
    }
}

impl ReasoningConfig {
    /// Load every reasoning section, falling back to defaults per field
    pub fn from_env() -> Self {
        let thinking = ThinkingConfig::default();
        let evidence = EvidenceConfig::default();
        let exploration = ExplorationConfig::default();
        let search = SearchConfig::default();
        let validation = ValidationConfig::default();
        let research = ResearchConfig::default();

        Self {
            thinking: ThinkingConfig {
                max_depth: parse_env("THINKING_MAX_DEPTH", thinking.max_depth),
                timeout_secs: parse_env("THINKING_TIMEOUT_SECS", thinking.timeout_secs),
                max_queries_per_step: parse_env(
                    "THINKING_MAX_QUERIES_PER_STEP",
                    thinking.max_queries_per_step,
                ),
                ready_phrases: parse_list_env("THINKING_READY_PHRASES")
                    .unwrap_or(thinking.ready_phrases),
            },
            evidence: EvidenceConfig {
                max_evidence_items: parse_env("EVIDENCE_MAX_ITEMS", evidence.max_evidence_items),
                relevance_threshold: parse_env(
                    "EVIDENCE_RELEVANCE_THRESHOLD",
                    evidence.relevance_threshold,
                ),
                min_confidence: parse_env("EVIDENCE_MIN_CONFIDENCE", evidence.min_confidence),
                min_content_chars: parse_env("EVIDENCE_MIN_CHARS", evidence.min_content_chars),
                deduplicate: parse_env("EVIDENCE_DEDUPLICATE", evidence.deduplicate),
                validate: parse_env("EVIDENCE_VALIDATE", evidence.validate),
                rejection_markers: parse_list_env("EVIDENCE_REJECTION_MARKERS")
                    .unwrap_or(evidence.rejection_markers),
            },
            exploration: ExplorationConfig {
                max_steps: parse_env("EXPLORATION_MAX_STEPS", exploration.max_steps),
                exploration_width: parse_env("EXPLORATION_WIDTH", exploration.exploration_width),
                relevance_threshold: parse_env(
                    "EXPLORATION_RELEVANCE_THRESHOLD",
                    exploration.relevance_threshold,
                ),
                decay_factor: parse_env("EXPLORATION_DECAY_FACTOR", exploration.decay_factor),
                backtracking: parse_env("EXPLORATION_BACKTRACKING", exploration.backtracking),
            },
            search: SearchConfig {
                max_workers: parse_env("SEARCH_MAX_WORKERS", search.max_workers),
                timeout_secs: parse_env("SEARCH_TIMEOUT_SECS", search.timeout_secs),
                kb_weight: parse_env("SEARCH_KB_WEIGHT", search.kb_weight),
                kg_weight: parse_env("SEARCH_KG_WEIGHT", search.kg_weight),
                history_limit: parse_env("SEARCH_HISTORY_LIMIT", search.history_limit),
                kb_name: env::var("SEARCH_KB_NAME").unwrap_or(search.kb_name),
            },
            validation: ValidationConfig {
                enabled: parse_env("VALIDATION_ENABLED", validation.enabled),
                threshold: parse_env("VALIDATION_THRESHOLD", validation.threshold),
            },
            research: ResearchConfig {
                max_iterations: parse_env("RESEARCH_MAX_ITERATIONS", research.max_iterations),
                queries_per_iteration: parse_env(
                    "RESEARCH_QUERIES_PER_ITERATION",
                    research.queries_per_iteration,
                ),
                max_sub_queries: parse_env("RESEARCH_MAX_SUB_QUERIES", research.max_sub_queries),
                evidence_sufficiency: parse_env(
                    "RESEARCH_EVIDENCE_SUFFICIENCY",
                    research.evidence_sufficiency,
                ),
                evidence_relevance: parse_env(
                    "RESEARCH_EVIDENCE_RELEVANCE",
                    research.evidence_relevance,
                ),
                evidence_confidence: parse_env(
                    "RESEARCH_EVIDENCE_CONFIDENCE",
                    research.evidence_confidence,
                ),
                max_reasoning_secs: parse_env(
                    "RESEARCH_MAX_REASONING_SECS",
                    research.max_reasoning_secs,
                ),
                explore_graph: parse_env("RESEARCH_EXPLORE_GRAPH", research.explore_graph),
                build_graph: parse_env("RESEARCH_BUILD_GRAPH", research.build_graph),
                single_shot_levels: parse_list_env("RESEARCH_SINGLE_SHOT_LEVELS")
                    .unwrap_or(research.single_shot_levels),
            },
        }
    }

    /// Reject values that would make a component loop forever or score outside [0, 1]
    pub fn validate(&self) -> Result<(), AppError> {
        let unit_values = [
            ("EVIDENCE_RELEVANCE_THRESHOLD", self.evidence.relevance_threshold),
            ("EVIDENCE_MIN_CONFIDENCE", self.evidence.min_confidence),
            (
                "EXPLORATION_RELEVANCE_THRESHOLD",
                self.exploration.relevance_threshold,
            ),
            ("SEARCH_KB_WEIGHT", self.search.kb_weight),
            ("SEARCH_KG_WEIGHT", self.search.kg_weight),
            ("VALIDATION_THRESHOLD", self.validation.threshold),
            ("RESEARCH_EVIDENCE_RELEVANCE", self.research.evidence_relevance),
            ("RESEARCH_EVIDENCE_CONFIDENCE", self.research.evidence_confidence),
        ];
        for (name, value) in unit_values {
            if !(0.0..=1.0).contains(&value) {
                return Err(config_error(format!("{} must be within [0, 1], got {}", name, value)));
            }
        }

        if !(self.exploration.decay_factor > 0.0 && self.exploration.decay_factor <= 1.0) {
            return Err(config_error(format!(
                "EXPLORATION_DECAY_FACTOR must be within (0, 1], got {}",
                self.exploration.decay_factor
            )));
        }

        let positive_counts = [
            ("THINKING_MAX_DEPTH", self.thinking.max_depth),
            ("THINKING_MAX_QUERIES_PER_STEP", self.thinking.max_queries_per_step),
            ("EVIDENCE_MAX_ITEMS", self.evidence.max_evidence_items),
            ("EXPLORATION_MAX_STEPS", self.exploration.max_steps),
            ("EXPLORATION_WIDTH", self.exploration.exploration_width),
            ("SEARCH_MAX_WORKERS", self.search.max_workers),
            ("RESEARCH_MAX_ITERATIONS", self.research.max_iterations),
        ];
        for (name, value) in positive_counts {
            if value == 0 {
                return Err(config_error(format!("{} must be greater than zero", name)));
            }
        }

        Ok(())
    }
}

fn config_error(message: String) -> AppError {
    AppError::Config { message }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Comma-separated list; `None` when unset or empty so callers keep their defaults.
fn parse_list_env(key: &str) -> Option<Vec<String>> {
    let items: Vec<String> = env::var(key)
        .ok()?
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_enabled: true,
            disk_enabled: true,
            max_size: 1000,
            default_ttl_secs: 3600,
            directory: PathBuf::from("./data/cache"),
        }
    }
}

impl Default for ThinkingConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            timeout_secs: 30,
            max_queries_per_step: 3,
            ready_phrases: strings(&[
                "答案准备好了",
                "可以回答",
                "总结如下",
                "结论是",
                "综合以上",
                "基于分析",
                "最终答案",
                "final answer",
                "ready to answer",
                "in conclusion",
                "i can now answer",
            ]),
        }
    }
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            max_evidence_items: 10,
            relevance_threshold: 0.7,
            min_confidence: 0.5,
            min_content_chars: 10,
            deduplicate: true,
            validate: true,
            rejection_markers: strings(&["错误", "不确定", "可能错误", "not sure", "unverified"]),
        }
    }
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            max_steps: 5,
            exploration_width: 3,
            relevance_threshold: 0.6,
            decay_factor: 0.9,
            backtracking: true,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_workers: 2,
            timeout_secs: 30,
            kb_weight: 0.6,
            kg_weight: 0.4,
            history_limit: 100,
            kb_name: "default".to_string(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.8,
        }
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            queries_per_iteration: 3,
            max_sub_queries: 5,
            evidence_sufficiency: 5,
            evidence_relevance: 0.8,
            evidence_confidence: 0.8,
            max_reasoning_secs: 300,
            explore_graph: true,
            build_graph: true,
            single_shot_levels: strings(&["simple", "moderate"]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_reasoning_config_is_valid() {
        assert!(ReasoningConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_weight() {
        let mut config = ReasoningConfig::default();
        config.search.kg_weight = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("SEARCH_KG_WEIGHT"));
    }

    #[test]
    fn test_validate_rejects_zero_decay() {
        let mut config = ReasoningConfig::default();
        config.exploration.decay_factor = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_width() {
        let mut config = ReasoningConfig::default();
        config.exploration.exploration_width = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("EXPLORATION_WIDTH"));
    }

    #[test]
    fn test_default_ready_phrases_are_bilingual() {
        let phrases = ThinkingConfig::default().ready_phrases;
        assert!(phrases.iter().any(|p| p == "最终答案"));
        assert!(phrases.iter().any(|p| p == "final answer"));
    }
}
