use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration — maps to `scour.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScourConfig {
    pub server: ServerConfig,
    pub search: SearchConfig,
    pub scrape: ScrapeConfig,
    pub trust: TrustConfig,
    pub vector: VectorConfig,
    pub llm: LlmConfig,
    pub graph: GraphConfig,
    pub credentials: CredentialsConfig,
    pub logging: LoggingConfig,
}

/// Resolve the base data directory: explicit config > ~/.scour.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".scour")
}

// ── Server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listen address.
    pub listen: String,
    /// Seconds between SSE heartbeats when no task event is pending.
    pub heartbeat_interval_secs: u64,
    /// Grace period after a task finishes before it leaves the registry,
    /// giving an attached SSE stream time to drain the queue.
    pub task_cleanup_delay_secs: f64,
    /// Enable permissive CORS.
    pub cors: bool,
    /// Directory the ingest endpoint may read uploaded files from.
    pub upload_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8001".into(),
            heartbeat_interval_secs: 2,
            task_cleanup_delay_secs: 2.0,
            cors: true,
            upload_dir: None,
        }
    }
}

// ── Search ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Providers used when the request does not name any.
    pub providers_default: Vec<String>,
    /// Providers tried when every preferred provider is rate-limited.
    pub providers_fallback: Vec<String>,
    /// Results requested per provider per query.
    pub max_results_per_query: usize,
    /// Wall-clock budget for a single provider call.
    pub provider_timeout_secs: u64,
    /// Path of the JSON rate-limit ignore list.
    pub rate_limit_file: PathBuf,
    /// Default ignore duration after a provider is marked.
    pub default_ignore_secs: u64,
    /// Short ignore duration for transient provider errors.
    pub short_ignore_secs: u64,
    /// Long ignore duration for fatal provider errors.
    pub fatal_ignore_secs: u64,
    /// Registered domains that are never scraped.
    pub domain_blocklist: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            providers_default: vec![
                "duckduckgo".into(),
                "wikipedia".into(),
                "courtlistener".into(),
            ],
            providers_fallback: vec![
                "brave".into(),
                "google_custom_search".into(),
                "bing".into(),
            ],
            max_results_per_query: 5,
            provider_timeout_secs: 20,
            rate_limit_file: default_data_dir().join("rate_limit_ignore_list.json"),
            default_ignore_secs: 30 * 60,
            short_ignore_secs: 300,
            fatal_ignore_secs: 3600,
            domain_blocklist: vec!["pinterest.com".into(), "quora.com".into()],
        }
    }
}

// ── Scrape ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    /// Command that runs the isolated scrape subprocess; the target URL is
    /// appended as the final argument. Stdout must be a JSON list with one
    /// `{url, content, links, metadata}` item.
    pub command: Vec<String>,
    /// Wall-clock timeout before the subprocess is killed.
    pub subprocess_timeout_secs: u64,
    /// Number of URLs scraped in parallel per hop.
    pub concurrency: usize,
    /// Respect robots.txt. Off by default for parity with the research
    /// assistant deployment; public deployments should turn this on.
    pub respect_robots_txt: bool,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            command: vec!["python3".into(), "-m".into(), "scour_scraper".into()],
            subprocess_timeout_secs: 25,
            concurrency: 5,
            respect_robots_txt: false,
        }
    }
}

// ── Trust ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// SQLite database holding `domain_trust_profiles`.
    pub db_path: PathBuf,
    /// Seconds a WHOIS age lookup stays cached in-process.
    pub whois_cache_secs: u64,
    /// TLD suffixes that earn the provisional-score bonus.
    pub privileged_tlds: Vec<String>,
    /// Disable WHOIS lookups entirely (age contributes nothing).
    pub disable_whois: bool,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            db_path: default_data_dir().join("community.db"),
            whois_cache_secs: 24 * 3600,
            privileged_tlds: vec![".gov".into(), ".edu".into(), ".org".into()],
            disable_whois: false,
        }
    }
}

// ── Vector ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// SQLite database backing the vector table.
    pub db_path: PathBuf,
    pub table_name: String,
    /// Local embedding endpoint (OpenAI-compatible `/embeddings`).
    pub embedding_endpoint: String,
    /// Embedding model identifier or local path. Usually resolved from the
    /// application database; a config value overrides.
    pub embedding_model: Option<String>,
    /// Permit a non-loopback embedding endpoint. Off by default so the
    /// service cannot silently depend on remote models.
    pub allow_remote_embedding: bool,
    /// Chunks batched per embedding call.
    pub embedding_batch_size: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            db_path: default_data_dir().join("research_vectors.db"),
            table_name: "research_embeddings".into(),
            embedding_endpoint: "http://127.0.0.1:11434".into(),
            embedding_model: None,
            allow_remote_embedding: false,
            embedding_batch_size: 64,
        }
    }
}

// ── LLM ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Retries after the first attempt (total attempts = max_retries + 1).
    pub max_retries: u32,
    pub default_temperature: f32,
    /// Baseline temperature for reasoning calls (query generation etc.)
    pub reasoning_temperature: f32,
    /// Temperature for synthesis and refinement calls.
    pub synthesis_temperature: f32,
    /// Context window assumed when the model descriptor does not carry one.
    pub default_context_window: usize,
    /// Default reasoning model when the request names none.
    pub default_reasoning_model: String,
    /// OpenAI-compatible base for models registered as provider "local".
    pub local_api_base: String,
    /// Internal API that streams completions from the persistent local model.
    pub internal_node_api_base_url: String,
    pub internal_node_api_endpoint_path: String,
    /// Chunks per batch for LLM re-ranking.
    pub rerank_batch_size: usize,
    /// Estimated prompt-token ceiling for self-budgeting batch wrappers.
    pub safe_prompt_token_limit: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            default_temperature: 0.3,
            reasoning_temperature: 0.2,
            synthesis_temperature: 0.1,
            default_context_window: 8192,
            default_reasoning_model: "local-default".into(),
            local_api_base: "http://localhost:3000/api/v1".into(),
            internal_node_api_base_url: "http://localhost:3000".into(),
            internal_node_api_endpoint_path: "/api/internal/v1/local_completion".into(),
            rerank_batch_size: 10,
            safe_prompt_token_limit: 6000,
        }
    }
}

// ── Graph ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Distinct search queries generated and executed per hop.
    pub max_queries_per_hop: usize,
    pub chunk_size_words: usize,
    pub chunk_overlap_words: usize,
    /// Chunks retrieved from the vector store per hop for analysis.
    pub top_k_retrieval: usize,
    /// Target word count for the synthesis draft.
    pub synthesis_target_word_count: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_queries_per_hop: 5,
            chunk_size_words: 500,
            chunk_overlap_words: 100,
            top_k_retrieval: 30,
            synthesis_target_word_count: 1500,
        }
    }
}

// ── Credentials ────────────────────────────────────────────────

/// Search-provider and LLM credentials. Environment variables fill in
/// values the config file leaves unset; the application database (when
/// configured) is consulted before either.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Path of the application SQLite database carrying `settings`, `models`,
    /// `api_providers`, and `api_keys`. Optional.
    pub app_db_path: Option<PathBuf>,
    pub brave_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub google_cx: Option<String>,
    pub bing_api_key: Option<String>,
    pub courtlistener_api_key: Option<String>,
    pub xai_api_key: Option<String>,
    pub xai_api_base: Option<String>,
    pub google_llm_api_key: Option<String>,
    pub mistral_api_key: Option<String>,
    pub mistral_api_base: Option<String>,
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Default for root ───────────────────────────────────────────

impl Default for ScourConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            search: SearchConfig::default(),
            scrape: ScrapeConfig::default(),
            trust: TrustConfig::default(),
            vector: VectorConfig::default(),
            llm: LlmConfig::default(),
            graph: GraphConfig::default(),
            credentials: CredentialsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ScourConfig {
    /// Validate the configuration. Returns warnings for suspicious values,
    /// an error string for values the service cannot run with.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if self.server.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "server.listen is not a valid socket address: {}",
                self.server.listen
            ));
        }
        if self.server.heartbeat_interval_secs == 0 {
            return Err("server.heartbeat_interval_secs must be at least 1".into());
        }
        if self.scrape.command.is_empty() {
            return Err("scrape.command must name an executable".into());
        }
        if self.search.providers_default.is_empty() && self.search.providers_fallback.is_empty() {
            return Err("no search providers configured".into());
        }
        if self.graph.chunk_overlap_words >= self.graph.chunk_size_words {
            return Err("graph.chunk_overlap_words must be smaller than chunk_size_words".into());
        }
        if self.scrape.subprocess_timeout_secs < 5 {
            warnings.push("scrape.subprocess_timeout_secs below 5s will kill most real pages".into());
        }
        if self.llm.max_retries > 5 {
            warnings.push(format!(
                "llm.max_retries = {} is unusually high and will slow failing tasks",
                self.llm.max_retries
            ));
        }
        if !self.vector.allow_remote_embedding
            && !crate::loader::is_local_endpoint(&self.vector.embedding_endpoint)
        {
            return Err(format!(
                "vector.embedding_endpoint {} is not local; set vector.allow_remote_embedding to use it",
                self.vector.embedding_endpoint
            ));
        }

        Ok(warnings)
    }
}
