use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the document corpus and checkpoints are stored
    pub data_dir: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    /// Chat-model provider configuration
    pub llm: LlmConfig,
    /// Dual-language embedding configuration
    pub embedding: EmbeddingConfig,
    /// Hybrid-retrieval tuning
    pub search: SearchConfig,
    /// Pipeline orchestration bounds and thresholds
    pub workflow: WorkflowConfig,
    /// Optional web-search fallback
    pub web: WebConfig,
    /// Entity-type literals (runtime-discovered vocabulary) that denote
    /// documents embedded inside other documents. Never hard-coded.
    pub embedded_entity_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "ollama" or "openai"
    pub provider: String,
    /// Base URL for the LLM API
    pub base_url: String,
    /// Model name for chat and structured generation
    pub chat_model: String,
    /// API key (only needed for cloud providers)
    pub api_key: Option<String>,
    /// Per-call timeout in seconds
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding model used for Korean queries
    pub model_korean: String,
    /// Embedding model used for English queries
    pub model_english: String,
    /// Embedding vector dimension
    pub dim: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Final per-subtask result count
    pub top_k: usize,
    /// RRF smoothing constant
    pub rrf_k: f32,
    /// Informational only; fusion is pure RRF
    pub semantic_weight: f32,
    /// Informational only; fusion is pure RRF
    pub keyword_weight: f32,
    /// Fixed worker pool bounding concurrent store searches
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Planner cap on subtasks per turn
    pub max_subtasks: usize,
    /// Synthesis-retry cap
    pub max_retries: u32,
    /// Hallucination score above this fails the gate
    pub threshold_hallucination: f32,
    /// Overall grade below this fails the gate
    pub threshold_grade: f32,
    /// Route simple/history queries instead of always planning
    pub routing_enabled: bool,
    /// Per-turn deadline in seconds
    pub turn_deadline_secs: u64,
    /// Directory for per-turn state checkpoints; None disables them
    pub checkpoint_dir: Option<PathBuf>,
    /// Store metadata cache TTL in seconds
    pub metadata_ttl_secs: u64,
}

/// Configuration for the optional web-search sidecar. If `base_url` is None
/// the tool is treated as unavailable even when `enabled` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Results requested per search
    pub max_results: usize,
    /// Searches allowed per UTC day
    pub daily_quota: u32,
    /// Document-count floor below which the fallback triggers
    pub fallback_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "127.0.0.1:9100".to_string(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            workflow: WorkflowConfig::default(),
            web: WebConfig::default(),
            embedded_entity_types: Vec::new(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            chat_model: "llama3.2".to_string(),
            api_key: None,
            request_timeout_secs: 60,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_korean: "bge-m3".to_string(),
            model_english: "nomic-embed-text".to_string(),
            dim: 768,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            rrf_k: 60.0,
            semantic_weight: 0.5,
            keyword_weight: 0.5,
            workers: 3,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_subtasks: 5,
            max_retries: 3,
            threshold_hallucination: 0.7,
            threshold_grade: 0.6,
            routing_enabled: true,
            turn_deadline_secs: 60,
            checkpoint_dir: None,
            metadata_ttl_secs: 300,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            api_key: None,
            max_results: 3,
            daily_quota: 100,
            fallback_threshold: 3,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(val) = std::env::var(key) {
        if let Ok(parsed) = val.parse() {
            *target = parsed;
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("DOC_QA_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("DOC_QA_BIND_ADDR") {
            config.bind_addr = addr;
        }

        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("LLM_CHAT_MODEL") {
            config.llm.chat_model = model;
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }
        env_parse("LLM_REQUEST_TIMEOUT_SECS", &mut config.llm.request_timeout_secs);

        if let Ok(model) = std::env::var("EMBEDDING_MODEL_KOREAN") {
            config.embedding.model_korean = model;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL_ENGLISH") {
            config.embedding.model_english = model;
        }
        env_parse("EMBEDDING_DIM", &mut config.embedding.dim);

        env_parse("DOC_QA_TOP_K", &mut config.search.top_k);
        env_parse("DOC_QA_RRF_K", &mut config.search.rrf_k);
        env_parse("DOC_QA_SEMANTIC_WEIGHT", &mut config.search.semantic_weight);
        env_parse("DOC_QA_KEYWORD_WEIGHT", &mut config.search.keyword_weight);
        env_parse("DOC_QA_SEARCH_WORKERS", &mut config.search.workers);

        env_parse("DOC_QA_MAX_SUBTASKS", &mut config.workflow.max_subtasks);
        env_parse("DOC_QA_MAX_RETRIES", &mut config.workflow.max_retries);
        env_parse(
            "DOC_QA_THRESHOLD_HALLUCINATION",
            &mut config.workflow.threshold_hallucination,
        );
        env_parse("DOC_QA_THRESHOLD_GRADE", &mut config.workflow.threshold_grade);
        env_parse("DOC_QA_ROUTING_ENABLED", &mut config.workflow.routing_enabled);
        env_parse(
            "DOC_QA_TURN_DEADLINE_SECS",
            &mut config.workflow.turn_deadline_secs,
        );
        if let Ok(dir) = std::env::var("DOC_QA_CHECKPOINT_DIR") {
            if !dir.is_empty() {
                config.workflow.checkpoint_dir = Some(PathBuf::from(dir));
            }
        }
        env_parse("DOC_QA_METADATA_TTL_SECS", &mut config.workflow.metadata_ttl_secs);

        env_parse("DOC_QA_WEB_ENABLED", &mut config.web.enabled);
        if let Ok(url) = std::env::var("WEB_SEARCH_BASE_URL") {
            config.web.base_url = Some(url);
        }
        if let Ok(key) = std::env::var("WEB_SEARCH_API_KEY") {
            config.web.api_key = Some(key);
        }
        env_parse("WEB_SEARCH_MAX_RESULTS", &mut config.web.max_results);
        env_parse("WEB_SEARCH_DAILY_QUOTA", &mut config.web.daily_quota);
        env_parse(
            "DOC_QA_WEB_FALLBACK_THRESHOLD",
            &mut config.web.fallback_threshold,
        );

        if let Ok(types) = std::env::var("DOC_QA_EMBEDDED_ENTITY_TYPES") {
            config.embedded_entity_types = types
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }

        config
    }

    /// Validate ranges that would otherwise fail deep inside a turn.
    pub fn validate(&self) -> Result<(), String> {
        if self.search.top_k == 0 {
            return Err("top_k must be at least 1".to_string());
        }
        if self.workflow.max_subtasks == 0 {
            return Err("max_subtasks must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.workflow.threshold_hallucination) {
            return Err("threshold_hallucination must be within [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.workflow.threshold_grade) {
            return Err("threshold_grade must be within [0, 1]".to_string());
        }
        if self.search.workers == 0 {
            return Err("search workers must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn turn_deadline(&self) -> Duration {
        Duration::from_secs(self.workflow.turn_deadline_secs)
    }

    pub fn corpus_path(&self) -> PathBuf {
        self.data_dir.join("documents.json")
    }

    /// Step budget for one turn, derived from the planner and retry caps.
    pub fn step_budget(&self) -> usize {
        self.workflow.max_subtasks * 3 + self.workflow.max_retries as usize * 4 + 30
    }
}
