use thiserror::Error;

/// Unified error type for the entire scour workspace.
#[derive(Error, Debug)]
pub enum ScourError {
    // ── Configuration errors ───────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Task lifecycle errors ──────────────────────────────────
    #[error("task error: {0}")]
    Task(String),

    #[error("operation cancelled")]
    Cancelled,

    // ── LLM errors ─────────────────────────────────────────────
    #[error("llm provider error: {0}")]
    LlmProvider(String),

    #[error("llm rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("llm returned invalid JSON after repair: {0}")]
    InvalidJson(String),

    #[error("llm finished due to length but returned no content")]
    TruncatedEmpty,

    // ── Search / scrape errors ─────────────────────────────────
    #[error("search provider error: {provider}: {reason}")]
    SearchProvider { provider: String, reason: String },

    #[error("scrape error: {url}: {reason}")]
    Scrape { url: String, reason: String },

    // ── Vector store errors ────────────────────────────────────
    #[error("vector store error: {0}")]
    Vector(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    // ── Domain trust errors ────────────────────────────────────
    #[error("trust store error: {0}")]
    Trust(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ScourError>;
