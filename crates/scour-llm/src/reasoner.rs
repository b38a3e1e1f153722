use parking_lot::Mutex;
use rand::RngExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use scour_core::{ApiCredentials, ContentChunk, ModelInfo, ScourError, TokenUsage};
use scour_config::schema::LlmConfig;

use crate::json_repair;
use crate::local::LocalStreamBackend;
use crate::provider::{
    is_retryable, retry_after_hint, ChatRequest, CompletionBackend, OutputFormat,
};
use crate::trim;
use crate::unified::UnifiedBackend;
use crate::xai::XaiBackend;

/// Output of a successful call: text, or parsed JSON when the caller asked
/// for it (always an object or array, never a bare string).
#[derive(Debug, Clone)]
pub enum LlmOutput {
    Text(String),
    Json(Value),
}

impl LlmOutput {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            LlmOutput::Text(s) => Some(s),
            LlmOutput::Json(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            LlmOutput::Json(v) => Some(v),
            LlmOutput::Text(_) => None,
        }
    }
}

/// Every adapter call resolves to this shape; errors are carried as data,
/// not raised, so graph stages can convert them to SSE events.
#[derive(Debug, Clone, Default)]
pub struct CallOutcome {
    pub output: Option<LlmOutput>,
    pub usage: TokenUsage,
    pub error: Option<String>,
}

impl CallOutcome {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            output: None,
            usage: TokenUsage::default(),
            error: Some(message.into()),
        }
    }
}

/// The provider-agnostic reasoning adapter. One instance per task; the
/// per-call cache lives for the instance's lifetime.
pub struct Reasoner {
    config: LlmConfig,
    credentials: ApiCredentials,
    client: reqwest::Client,
    cache: Mutex<HashMap<String, CallOutcome>>,
    /// Test seam: when set, every call goes to this backend regardless of
    /// the model's provider.
    backend_override: Option<Arc<dyn CompletionBackend>>,
}

impl Reasoner {
    pub fn new(config: LlmConfig, credentials: ApiCredentials) -> Self {
        Self {
            config,
            credentials,
            client: reqwest::Client::new(),
            cache: Mutex::new(HashMap::new()),
            backend_override: None,
        }
    }

    /// Route every call to the given backend (tests).
    pub fn with_backend(mut self, backend: Arc<dyn CompletionBackend>) -> Self {
        self.backend_override = Some(backend);
        self
    }

    /// Execute one prompt against the model named by `model_info`.
    ///
    /// Carries the shared behaviors: cancellation checks before and between
    /// attempts, prompt trimming to the context window, provider routing,
    /// retries with exponential backoff and jitter, JSON repair, per-call
    /// caching, and token-usage fallback.
    pub async fn execute(
        &self,
        request_type: &str,
        prompt: &str,
        model_info: &ModelInfo,
        user_id: Option<&str>,
        request_id: &str,
        expected_format: OutputFormat,
        cancel: &CancellationToken,
    ) -> CallOutcome {
        if cancel.is_cancelled() {
            return CallOutcome::failed("Operation cancelled.");
        }
        if prompt.is_empty() || model_info.name.is_empty() {
            return CallOutcome::failed(format!(
                "Prompt and model info are required for {request_type}."
            ));
        }

        let temperature = model_info
            .temperature
            .unwrap_or(self.config.reasoning_temperature);
        let format_tag = match expected_format {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
        };
        let cache_key = format!(
            "{request_type}::{prompt}::{}::{temperature}::{format_tag}",
            model_info.name
        );
        if let Some(hit) = self.cache.lock().get(&cache_key).cloned() {
            debug!(request_type, request_id, "reasoner cache hit");
            return hit;
        }

        let context_window = model_info
            .context_window
            .unwrap_or(self.config.default_context_window);
        let trimmed = trim::trim_prompt(prompt, context_window);

        let backend: Arc<dyn CompletionBackend> = match self.backend(model_info) {
            Ok(b) => b,
            Err(message) => return CallOutcome::failed(message),
        };

        let request = ChatRequest {
            model: model_info.name.clone(),
            prompt: trimmed,
            temperature,
            json_mode: expected_format == OutputFormat::Json,
            user: user_id
                .map(str::to_string)
                .or_else(|| Some(format!("research_task_{request_id}"))),
        };

        let max_retries = self.config.max_retries;
        let mut last_error = String::from("Max retries reached for LLM call.");

        for attempt in 0..=max_retries {
            if cancel.is_cancelled() {
                return CallOutcome::failed("Operation cancelled.");
            }

            match backend.complete(&request, cancel).await {
                Ok(raw) => {
                    let mut usage = raw.usage;
                    let output = match expected_format {
                        OutputFormat::Text => LlmOutput::Text(raw.content.clone()),
                        OutputFormat::Json => match json_repair::repair_and_parse(&raw.content) {
                            Ok(v) => LlmOutput::Json(v),
                            Err(e) => {
                                last_error = format!("LLM output not valid JSON: {e}");
                                warn!(
                                    request_type,
                                    request_id,
                                    attempt,
                                    error = %e,
                                    "JSON parsing failed, retrying"
                                );
                                if attempt < max_retries {
                                    self.backoff(attempt, None).await;
                                    continue;
                                }
                                break;
                            }
                        },
                    };

                    // Providers sometimes omit usage; approximate the
                    // completion by word count so accounting stays sane.
                    if usage.completion_tokens == 0 {
                        if let LlmOutput::Text(ref text) = output {
                            usage.completion_tokens = text.split_whitespace().count() as u64;
                            usage.total_tokens = usage.prompt_tokens + usage.completion_tokens;
                        }
                    }

                    let outcome = CallOutcome {
                        output: Some(output),
                        usage,
                        error: None,
                    };
                    self.cache.lock().insert(cache_key, outcome.clone());
                    return outcome;
                }
                Err(ScourError::Cancelled) => {
                    return CallOutcome::failed("Operation cancelled.");
                }
                Err(ScourError::TruncatedEmpty) => {
                    return CallOutcome::failed(
                        "LLM finished due to length but returned no content.",
                    );
                }
                Err(e) => {
                    last_error = e.to_string();
                    if is_retryable(&e) && attempt < max_retries {
                        warn!(
                            request_type,
                            request_id,
                            attempt = attempt + 1,
                            max = max_retries + 1,
                            error = %e,
                            "retrying after transient LLM error"
                        );
                        self.backoff(attempt, retry_after_hint(&e)).await;
                        continue;
                    }
                    break;
                }
            }
        }

        CallOutcome::failed(last_error)
    }

    fn backend(&self, model_info: &ModelInfo) -> Result<Arc<dyn CompletionBackend>, String> {
        if let Some(ref backend) = self.backend_override {
            return Ok(Arc::clone(backend));
        }

        let provider = model_info
            .provider_name
            .as_deref()
            .unwrap_or("local")
            .trim()
            .to_lowercase();

        match provider.as_str() {
            "xai" => {
                let cred = self.credentials.llm_for("xai");
                let Some(key) = cred.api_key.filter(|k| !k.is_empty()) else {
                    return Err("xAI API key not found in credentials.".into());
                };
                let Some(base) = cred.api_base.filter(|b| !b.is_empty()) else {
                    return Err("xAI API base URL not found in credentials.".into());
                };
                Ok(Arc::new(XaiBackend::new(self.client.clone(), key, base)))
            }
            "local" | "local_active_model_node_api" => Ok(Arc::new(LocalStreamBackend::new(
                self.client.clone(),
                &self.config.internal_node_api_base_url,
                &self.config.internal_node_api_endpoint_path,
            ))),
            other => {
                let cred = self.credentials.llm_for(other);
                Ok(Arc::new(UnifiedBackend::new(
                    self.client.clone(),
                    other,
                    cred.api_key,
                    cred.api_base,
                    &self.config.local_api_base,
                )))
            }
        }
    }

    /// Exponential backoff from 1s with jitter; an explicit Retry-After
    /// hint wins over the computed delay.
    async fn backoff(&self, attempt: u32, retry_after_secs: Option<u64>) {
        let base_ms = match retry_after_secs {
            Some(secs) if secs > 0 => secs * 1000,
            _ => 1000u64 * 2u64.pow(attempt),
        };
        let jitter_ms = rand::rng().random_range(0..500);
        tokio::time::sleep(Duration::from_millis(base_ms + jitter_ms)).await;
    }

    // ── Task-specific wrappers ─────────────────────────────────
    //
    // All share the execute contract; each owns its prompt and its output
    // decoding.

    /// Generate search queries for the research objective.
    pub async fn generate_search_queries(
        &self,
        original_query: &str,
        max_queries: usize,
        date_context: &str,
        model_info: &ModelInfo,
        user_id: Option<&str>,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> QueriesOutcome {
        let prompt = format!(
            "You are a research assistant planning web searches.\n\
             Research objective: {original_query}\n\
             Current date context: {date_context}\n\n\
             Produce up to {max_queries} distinct, self-contained web search queries that together \
             cover the objective. Prefer concrete phrasings a search engine handles well.\n\
             Respond with JSON only, in the form {{\"queries\": [\"...\"]}}."
        );
        let outcome = self
            .execute(
                "generate_search_queries",
                &prompt,
                model_info,
                user_id,
                request_id,
                OutputFormat::Json,
                cancel,
            )
            .await;

        let queries = outcome
            .output
            .as_ref()
            .and_then(LlmOutput::as_json)
            .map(decode_string_list_field)
            .unwrap_or_default()
            .into_iter()
            .take(max_queries)
            .collect();
        QueriesOutcome {
            queries,
            usage: outcome.usage,
            error: outcome.error,
        }
    }

    /// Draft the synthesis from accumulated chunks. The model is told to
    /// cite as `[ref: FULL_URL]`; finalization rewrites those to short
    /// markers.
    pub async fn synthesize_initial_draft(
        &self,
        original_query: &str,
        chunks: &[ContentChunk],
        target_word_count: usize,
        model_info: &ModelInfo,
        user_id: Option<&str>,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> DraftOutcome {
        let mut sources_digest = String::new();
        for chunk in chunks {
            sources_digest.push_str(&format!(
                "--- Source: {} ({})\n{}\n\n",
                chunk.page_title.as_deref().unwrap_or("Web Source"),
                chunk.original_url,
                chunk.text_content
            ));
        }

        let temperature_override = ModelInfo {
            temperature: Some(
                model_info
                    .temperature
                    .unwrap_or(self.config.synthesis_temperature),
            ),
            ..model_info.clone()
        };

        let prompt = format!(
            "Write a well-structured markdown research report answering:\n{original_query}\n\n\
             Use ONLY the source material below. Aim for roughly {target_word_count} words.\n\
             Cite every claim inline with the exact form [ref: FULL_URL] using the source's URL. \
             Do not fabricate URLs and do not add a sources section; it is appended later.\n\n\
             Source material:\n{sources_digest}"
        );
        let outcome = self
            .execute(
                "synthesize_initial_draft",
                &prompt,
                &temperature_override,
                user_id,
                request_id,
                OutputFormat::Text,
                cancel,
            )
            .await;

        DraftOutcome {
            draft_text: outcome
                .output
                .as_ref()
                .and_then(LlmOutput::as_text)
                .unwrap_or_default()
                .to_string(),
            usage: outcome.usage,
            error: outcome.error,
        }
    }

    /// Summarize a long text into a few sentences.
    pub async fn summarize_text(
        &self,
        text: &str,
        target: &str,
        model_info: &ModelInfo,
        user_id: Option<&str>,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> DraftOutcome {
        let prompt = format!(
            "Summarize the following text in {target}. Keep concrete facts and figures.\n\n{text}"
        );
        let outcome = self
            .execute(
                "summarize_text",
                &prompt,
                model_info,
                user_id,
                request_id,
                OutputFormat::Text,
                cancel,
            )
            .await;
        DraftOutcome {
            draft_text: outcome
                .output
                .as_ref()
                .and_then(LlmOutput::as_text)
                .unwrap_or_default()
                .to_string(),
            usage: outcome.usage,
            error: outcome.error,
        }
    }

    /// Score chunks for relevance to the query, batching so each prompt
    /// stays under the configured token budget. Per-batch failures are
    /// skipped; the call only errors when every batch fails.
    pub async fn rerank_chunks(
        &self,
        query: &str,
        chunks: &[ContentChunk],
        model_info: &ModelInfo,
        user_id: Option<&str>,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> RerankOutcome {
        let items: Vec<&ContentChunk> = chunks.iter().collect();
        let batches = trim::budget_batches(items, self.config.safe_prompt_token_limit, |c| {
            trim::estimate_tokens(&c.text_content) + 32
        });

        let mut scores: Vec<(String, f64)> = Vec::new();
        let mut usage = TokenUsage::default();
        let mut errors: Vec<String> = Vec::new();
        let total_batches = batches.len();

        for (batch_no, batch) in batches.into_iter().enumerate() {
            if cancel.is_cancelled() {
                errors.push("Operation cancelled.".into());
                break;
            }
            let mut listing = String::new();
            for chunk in &batch {
                listing.push_str(&format!(
                    "chunk_id: {}\ntext: {}\n\n",
                    chunk.chunk_id, chunk.text_content
                ));
            }
            let prompt = format!(
                "Rate each chunk's relevance to the query on a 0.0-1.0 scale.\n\
                 Query: {query}\n\n{listing}\
                 Respond with JSON only: [{{\"chunk_id\": \"...\", \"score\": 0.0}}]."
            );
            let outcome = self
                .execute(
                    "rerank_chunks",
                    &prompt,
                    model_info,
                    user_id,
                    &format!("{request_id}_batch{batch_no}"),
                    OutputFormat::Json,
                    cancel,
                )
                .await;
            usage.merge(&outcome.usage);
            match (outcome.output, outcome.error) {
                (Some(LlmOutput::Json(v)), None) => {
                    for entry in v.as_array().map(|a| a.as_slice()).unwrap_or(&[]) {
                        if let (Some(id), Some(score)) =
                            (entry["chunk_id"].as_str(), entry["score"].as_f64())
                        {
                            scores.push((id.to_string(), score.clamp(0.0, 1.0)));
                        }
                    }
                }
                (_, error) => {
                    errors.push(error.unwrap_or_else(|| "unexpected output shape".into()));
                }
            }
        }

        let error = (errors.len() == total_batches && total_batches > 0)
            .then(|| errors.join("; "));
        RerankOutcome { scores, usage, error }
    }

    /// Keep only the search results likely to contain an answer.
    pub async fn filter_results_for_quality(
        &self,
        query: &str,
        results: &[scour_core::SearchResultItem],
        keep_top_n: usize,
        model_info: &ModelInfo,
        user_id: Option<&str>,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> IndicesOutcome {
        let mut listing = String::new();
        for (i, r) in results.iter().enumerate() {
            listing.push_str(&format!(
                "{}: {} — {}\n",
                i,
                r.title.as_deref().unwrap_or("(untitled)"),
                r.snippet.as_deref().unwrap_or("")
            ));
        }
        let prompt = format!(
            "Given the research query below, pick the at most {keep_top_n} search results most \
             likely to contain substantive answers. Skip spam, listicles, and duplicates.\n\
             Query: {query}\n\nResults:\n{listing}\n\
             Respond with JSON only: {{\"keep\": [0, 2, ...]}} using the result indices."
        );
        let outcome = self
            .execute(
                "filter_results_for_quality",
                &prompt,
                model_info,
                user_id,
                request_id,
                OutputFormat::Json,
                cancel,
            )
            .await;
        let keep = outcome
            .output
            .as_ref()
            .and_then(LlmOutput::as_json)
            .and_then(|v| v.get("keep").or(Some(v)).cloned())
            .and_then(|v| v.as_array().cloned())
            .map(|arr| {
                arr.iter()
                    .filter_map(|x| x.as_u64().map(|i| i as usize))
                    .filter(|i| *i < results.len())
                    .take(keep_top_n)
                    .collect()
            })
            .unwrap_or_default();
        IndicesOutcome {
            keep_indices: keep,
            usage: outcome.usage,
            error: outcome.error,
        }
    }

    /// Compare retrieved chunks against the research objectives: which
    /// objectives are covered, which remain open, and which chunks carry
    /// the coverage.
    pub async fn librarian_check(
        &self,
        objectives: &[String],
        chunks: &[ContentChunk],
        model_info: &ModelInfo,
        user_id: Option<&str>,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> AnalysisOutcome {
        let mut listing = String::new();
        for chunk in chunks {
            listing.push_str(&format!(
                "chunk_id: {}\nsource: {}\ntext: {}\n\n",
                chunk.chunk_id, chunk.original_url, chunk.text_content
            ));
        }
        let objectives_list = objectives
            .iter()
            .enumerate()
            .map(|(i, o)| format!("{}. {o}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "You are reviewing gathered research material against the objectives.\n\
             Objectives:\n{objectives_list}\n\nMaterial:\n{listing}\
             For each objective decide whether the material covers it. Respond with JSON only:\n\
             {{\"covered\": [{{\"objective\": 1, \"supporting_chunk_ids\": [\"...\"]}}],\n  \
               \"uncovered\": [2, 3],\n  \"notes\": \"...\"}}"
        );
        self.json_analysis("librarian_check", &prompt, model_info, user_id, request_id, cancel)
            .await
    }

    /// Generate a short hypothetical answer document for embedding-based
    /// retrieval (HyDE): the embedding of a plausible answer retrieves
    /// better than the embedding of the question.
    pub async fn generate_hypothetical_document(
        &self,
        query: &str,
        target: &str,
        model_info: &ModelInfo,
        user_id: Option<&str>,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> DraftOutcome {
        let prompt = format!(
            "Write a plausible, factual-sounding passage of {target} that would directly answer \
             the question below, as it might appear in an authoritative source. No preamble, no \
             hedging about being hypothetical.\n\nQuestion: {query}"
        );
        let outcome = self
            .execute(
                "generate_hypothetical_document",
                &prompt,
                model_info,
                user_id,
                request_id,
                OutputFormat::Text,
                cancel,
            )
            .await;
        DraftOutcome {
            draft_text: outcome
                .output
                .as_ref()
                .and_then(LlmOutput::as_text)
                .unwrap_or_default()
                .to_string(),
            usage: outcome.usage,
            error: outcome.error,
        }
    }

    /// Pick the extracted links most worth following for the uncovered
    /// objectives. Batched by token budget like re-ranking.
    pub async fn select_links_to_follow(
        &self,
        uncovered_objectives: &[String],
        links: &[scour_core::ExtractedLink],
        top_n: usize,
        model_info: &ModelInfo,
        user_id: Option<&str>,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> QueriesOutcome {
        let items: Vec<&scour_core::ExtractedLink> = links.iter().collect();
        let batches = trim::budget_batches(items, self.config.safe_prompt_token_limit, |l| {
            trim::estimate_tokens(&l.url)
                + l.anchor_text.as_deref().map(trim::estimate_tokens).unwrap_or(0)
                + 16
        });
        let objectives = uncovered_objectives.join("; ");

        let mut selected: Vec<String> = Vec::new();
        let mut usage = TokenUsage::default();
        let mut failures = 0usize;
        let total_batches = batches.len();

        for (batch_no, batch) in batches.into_iter().enumerate() {
            if cancel.is_cancelled() || selected.len() >= top_n {
                break;
            }
            let mut listing = String::new();
            for link in &batch {
                listing.push_str(&format!(
                    "{} — {}\n",
                    link.url,
                    link.anchor_text.as_deref().unwrap_or("(no anchor text)")
                ));
            }
            let prompt = format!(
                "Research objectives still uncovered: {objectives}\n\n\
                 Candidate links:\n{listing}\n\
                 Pick up to {top_n} links most likely to cover the uncovered objectives. \
                 Respond with JSON only: {{\"urls\": [\"...\"]}}."
            );
            let outcome = self
                .execute(
                    "select_links_to_follow",
                    &prompt,
                    model_info,
                    user_id,
                    &format!("{request_id}_batch{batch_no}"),
                    OutputFormat::Json,
                    cancel,
                )
                .await;
            usage.merge(&outcome.usage);
            if let Some(LlmOutput::Json(v)) = outcome.output {
                if let Some(urls) = v.get("urls").and_then(|u| u.as_array()) {
                    selected.extend(
                        urls.iter()
                            .filter_map(|u| u.as_str().map(str::to_string))
                            .take(top_n.saturating_sub(selected.len())),
                    );
                }
            } else {
                failures += 1;
            }
        }

        // Per-batch failures are tolerated; the call only errors when no
        // batch produced anything.
        let error = (total_batches > 0 && failures == total_batches)
            .then(|| "link selection failed for every batch".to_string());
        QueriesOutcome {
            queries: selected,
            usage,
            error,
        }
    }

    /// Extract checkable factual claims from a draft, phrased as search
    /// queries for a fact-check pass against general-web providers.
    pub async fn identify_claims_for_fact_check(
        &self,
        draft: &str,
        max_claims: usize,
        model_info: &ModelInfo,
        user_id: Option<&str>,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> QueriesOutcome {
        let prompt = format!(
            "From the draft below, extract up to {max_claims} concrete factual claims that are \
             worth independently verifying (figures, dates, attributions). Phrase each as a \
             self-contained web search query. Respond with JSON only: {{\"queries\": [\"...\"]}}.\n\n\
             {draft}"
        );
        let outcome = self
            .execute(
                "identify_claims_for_fact_check",
                &prompt,
                model_info,
                user_id,
                request_id,
                OutputFormat::Json,
                cancel,
            )
            .await;
        let queries = outcome
            .output
            .as_ref()
            .and_then(LlmOutput::as_json)
            .map(decode_string_list_field)
            .unwrap_or_default()
            .into_iter()
            .take(max_claims)
            .collect();
        QueriesOutcome {
            queries,
            usage: outcome.usage,
            error: outcome.error,
        }
    }

    /// Extract entities and relationships from a text chunk.
    pub async fn extract_entities_relationships(
        &self,
        text: &str,
        model_info: &ModelInfo,
        user_id: Option<&str>,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> AnalysisOutcome {
        let prompt = format!(
            "Extract the named entities and the relationships between them from this text. \
             Respond with JSON only:\n\
             {{\"entities\": [{{\"name\": \"...\", \"type\": \"person|org|place|other\"}}],\n  \
               \"relationships\": [{{\"source\": \"...\", \"relation\": \"...\", \"target\": \"...\"}}]}}\n\n\
             {text}"
        );
        self.json_analysis(
            "extract_entities_relationships",
            &prompt,
            model_info,
            user_id,
            request_id,
            cancel,
        )
        .await
    }

    /// Rewrite a text with pronouns and other references resolved to the
    /// entities they point at, so downstream extraction sees explicit names.
    pub async fn resolve_coreferences(
        &self,
        text: &str,
        model_info: &ModelInfo,
        user_id: Option<&str>,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> DraftOutcome {
        let prompt = format!(
            "Rewrite the following text replacing pronouns and indirect references with the \
             explicit entity they refer to. Change nothing else. Output the rewritten text only.\n\n\
             {text}"
        );
        let outcome = self
            .execute(
                "resolve_coreferences",
                &prompt,
                model_info,
                user_id,
                request_id,
                OutputFormat::Text,
                cancel,
            )
            .await;
        DraftOutcome {
            draft_text: outcome
                .output
                .as_ref()
                .and_then(LlmOutput::as_text)
                .unwrap_or_default()
                .to_string(),
            usage: outcome.usage,
            error: outcome.error,
        }
    }

    /// Summarize a markdown table and surface its key insights.
    pub async fn analyze_table(
        &self,
        table_markdown: &str,
        document_name: &str,
        model_info: &ModelInfo,
        user_id: Option<&str>,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> AnalysisOutcome {
        let prompt = format!(
            "This table comes from the document \"{document_name}\". Summarize what it shows and \
             list its key insights. Respond with JSON only:\n\
             {{\"table_summary\": \"...\", \"key_insights\": [\"...\"], \"potential_entities\": [\"...\"]}}\n\n\
             {table_markdown}"
        );
        self.json_analysis("analyze_table", &prompt, model_info, user_id, request_id, cancel)
            .await
    }

    /// Shared plumbing for wrappers that return a free-form JSON analysis.
    async fn json_analysis(
        &self,
        request_type: &str,
        prompt: &str,
        model_info: &ModelInfo,
        user_id: Option<&str>,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> AnalysisOutcome {
        let outcome = self
            .execute(
                request_type,
                prompt,
                model_info,
                user_id,
                request_id,
                OutputFormat::Json,
                cancel,
            )
            .await;
        AnalysisOutcome {
            analysis: outcome.output.as_ref().and_then(LlmOutput::as_json).cloned(),
            usage: outcome.usage,
            error: outcome.error,
        }
    }

    /// Suggest follow-up research questions from the final report.
    pub async fn suggest_follow_up_questions(
        &self,
        report_markdown: &str,
        model_info: &ModelInfo,
        user_id: Option<&str>,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> QueriesOutcome {
        let prompt = format!(
            "Based on this research report, suggest 3 follow-up questions the reader is likely \
             to ask next. Respond with JSON only: {{\"questions\": [\"...\"]}}.\n\n{report_markdown}"
        );
        let outcome = self
            .execute(
                "suggest_follow_up_questions",
                &prompt,
                model_info,
                user_id,
                request_id,
                OutputFormat::Json,
                cancel,
            )
            .await;
        let questions = outcome
            .output
            .as_ref()
            .and_then(LlmOutput::as_json)
            .map(decode_string_list_field)
            .unwrap_or_default();
        QueriesOutcome {
            queries: questions,
            usage: outcome.usage,
            error: outcome.error,
        }
    }
}

/// Accept `{"queries": [...]}`, `{"questions": [...]}`, or a bare array.
fn decode_string_list_field(value: &Value) -> Vec<String> {
    let arr = value
        .get("queries")
        .or_else(|| value.get("questions"))
        .or(Some(value))
        .and_then(|v| v.as_array());
    arr.map(|items| {
        items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.trim().is_empty())
            .collect()
    })
    .unwrap_or_default()
}

/// Wrapper outcome: a list of strings (queries, questions).
#[derive(Debug, Clone, Default)]
pub struct QueriesOutcome {
    pub queries: Vec<String>,
    pub usage: TokenUsage,
    pub error: Option<String>,
}

/// Wrapper outcome: generated prose.
#[derive(Debug, Clone, Default)]
pub struct DraftOutcome {
    pub draft_text: String,
    pub usage: TokenUsage,
    pub error: Option<String>,
}

/// Wrapper outcome: relevance scores keyed by chunk id.
#[derive(Debug, Clone, Default)]
pub struct RerankOutcome {
    pub scores: Vec<(String, f64)>,
    pub usage: TokenUsage,
    pub error: Option<String>,
}

/// Wrapper outcome: indices into the caller's result list.
#[derive(Debug, Clone, Default)]
pub struct IndicesOutcome {
    pub keep_indices: Vec<usize>,
    pub usage: TokenUsage,
    pub error: Option<String>,
}

/// Wrapper outcome: a free-form JSON analysis object.
#[derive(Debug, Clone, Default)]
pub struct AnalysisOutcome {
    pub analysis: Option<Value>,
    pub usage: TokenUsage,
    pub error: Option<String>,
}
