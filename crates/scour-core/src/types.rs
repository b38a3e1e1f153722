use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Server-assigned opaque task identifier.
pub type TaskId = String;

/// Descriptor for an LLM model as supplied by the client or resolved from
/// configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model name, e.g. "grok-3" or a local model identifier.
    pub name: String,
    /// Provider key: "xai", "local", "google", "mistral", or anything the
    /// unified client can route.
    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Context window in tokens. Falls back to the adapter default when absent.
    #[serde(default)]
    pub context_window: Option<usize>,
    /// Database id of the model row, carried through for usage accounting.
    #[serde(default)]
    pub id: Option<i64>,
}

/// Per-request overrides for a research task. Everything except the initial
/// query is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestParams {
    pub initial_query: String,
    /// Ordered list of preferred search providers.
    #[serde(default)]
    pub search_providers: Option<Vec<String>>,
    #[serde(default)]
    pub reasoning_model_info: Option<ModelInfo>,
    #[serde(default)]
    pub synthesis_model_info: Option<ModelInfo>,
    #[serde(default)]
    pub max_hops: Option<u32>,
    #[serde(default)]
    pub max_distinct_search_queries: Option<u32>,
    #[serde(default)]
    pub max_results_per_provider_query: Option<usize>,
    #[serde(default)]
    pub max_url_exploration_depth: Option<u32>,
    #[serde(default)]
    pub chunk_size_words: Option<usize>,
    #[serde(default)]
    pub chunk_overlap_words: Option<usize>,
    #[serde(default)]
    pub top_k_retrieval_per_hop: Option<usize>,
    /// Set when the request primarily targets the user's uploaded documents.
    #[serde(default)]
    pub is_document_focused: Option<bool>,
    /// Explicit date context; when absent, current UTC in long form is used.
    #[serde(default)]
    pub task_date_context: Option<String>,
}

/// One item returned by a search provider for a query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    pub provider_name: String,
    /// Query phrase that produced this item.
    pub query_phrase_used: String,
    /// 1-based rank as reported by the provider.
    pub position: usize,
    /// Trust signals attached at vetting time.
    #[serde(default)]
    pub trust: Option<TrustSignals>,
}

/// Trust signals attached to a search result or scraped page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustSignals {
    pub domain: String,
    pub trust_score: f64,
    pub is_https: bool,
    #[serde(default)]
    pub domain_age_days: Option<i64>,
    pub reference_count: i64,
    #[serde(default)]
    pub tld_type_bonus: f64,
    /// Where the score came from: "specific_db_entry", "tld_pattern",
    /// "newly_discovered", or one of the provisional fallbacks.
    pub source_trust_type: String,
}

/// A link extracted from a scraped page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedLink {
    pub url: String,
    #[serde(default)]
    pub anchor_text: Option<String>,
    #[serde(default)]
    pub context_around_link: Option<String>,
}

/// One chunk of processed page content, keyed by a task-unique id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentChunk {
    pub chunk_id: String,
    pub original_url: String,
    #[serde(default)]
    pub page_title: Option<String>,
    pub text_content: String,
    pub chunk_index_in_page: usize,
    /// Hop depth at which this chunk was indexed. 0 for the initial hop.
    pub depth: u32,
    /// Free-form metadata stored alongside the chunk in the vector table.
    /// Always carries at least the original url and page title.
    #[serde(default)]
    pub vector_metadata: HashMap<String, serde_json::Value>,
}

/// A cited source in the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSource {
    pub url: String,
    pub title: String,
    /// Short marker assigned during citation rewriting, e.g. "S1".
    pub citation_marker: String,
    #[serde(default)]
    pub trust_score: Option<f64>,
    #[serde(default)]
    pub provider: Option<String>,
}

/// Token usage for a single LLM call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn merge(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Token usage attributed to a specific model, aggregated per task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelUsage {
    pub model_id: i64,
    pub model_name: String,
    #[serde(flatten)]
    pub usage: TokenUsage,
}

/// A document submitted for ingestion into the vector store. Text is already
/// extracted; rich-format parsing happens outside the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericDocument {
    pub id: String,
    pub text_content: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Lifecycle status of a research task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completing,
    Complete,
    Error,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completing => "completing",
            TaskStatus::Complete => "complete",
            TaskStatus::Error => "error",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// Resolved per-provider credentials for a task. Values merge the application
/// database with environment overrides; request-level `api_config` wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiCredentials {
    #[serde(default)]
    pub brave_api_key: Option<String>,
    #[serde(default)]
    pub google_api_key: Option<String>,
    #[serde(default)]
    pub google_cx: Option<String>,
    #[serde(default)]
    pub bing_api_key: Option<String>,
    #[serde(default)]
    pub courtlistener_api_key: Option<String>,
    /// LLM credentials keyed by provider name, e.g. "xai" →
    /// {"api_key": "...", "api_base": "..."}.
    #[serde(default)]
    pub llm: HashMap<String, LlmCredential>,
}

/// Credential pair for one LLM provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmCredential {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
}

impl ApiCredentials {
    pub fn llm_for(&self, provider: &str) -> LlmCredential {
        self.llm.get(provider).cloned().unwrap_or_default()
    }
}
