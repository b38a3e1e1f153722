use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use scour_core::event::{emit, EventQueue};
use scour_core::{ContentChunk, ModelInfo, ModelUsage, ReportSource, TaskEvent};
use scour_config::ScourConfig;
use scour_llm::Reasoner;
use scour_search::SearchScrape;
use scour_vector::VectorStore;

use crate::citations;
use crate::state::{OverallState, StateDelta};

/// Process-scoped services handed to each graph run.
pub struct Services {
    pub reasoner: Arc<Reasoner>,
    pub search: Arc<SearchScrape>,
    /// `None` when vector-store initialization failed at startup; the
    /// pre-flight check turns that into a fatal task error.
    pub vector: Option<Arc<VectorStore>>,
    pub config: Arc<ScourConfig>,
}

const SYNTHESIS_START: &str =
    "**[Editor]** Synthesizing comprehensive report from research findings...";
const SYNTHESIS_NO_CONTENT_FALLBACK: &str = "**[Editor]** Insufficient content was gathered to \
     provide a comprehensive analysis. The research may need to be expanded with different \
     search strategies or additional sources.";
const SYNTHESIS_DRAFT_ERROR_FALLBACK: &str =
    "**[Editor]** Error during draft synthesis. Please try again or contact support.";

/// Drive the full pipeline. Stages run in order; once the cancellation
/// signal is set (by the client or by a stage reporting a fatal error) no
/// further stage runs, keeping the terminal event unique.
pub async fn run_research_graph(state: &mut OverallState, services: &Services, queue: &EventQueue) {
    macro_rules! run_stage {
        ($f:ident) => {
            if state.cancel.is_cancelled() {
                info!(task_id = %state.task_id, stage = stringify!($f), "skipping stage, task cancelled");
                return;
            }
            let delta = $f(state, services, queue).await;
            state.apply(delta);
        };
    }

    run_stage!(initialize_task);
    run_stage!(generate_search_queries);
    run_stage!(web_search);
    run_stage!(process_content);
    run_stage!(synthesize_report);
    run_stage!(finalize_task);
}

// ── Stage 1: initialize ────────────────────────────────────────

pub async fn initialize_task(
    state: &OverallState,
    services: &Services,
    queue: &EventQueue,
) -> StateDelta {
    let mut delta = StateDelta {
        start_time: Some(Instant::now()),
        ..Default::default()
    };

    let date_context = state
        .request_params
        .task_date_context
        .clone()
        .unwrap_or_else(|| chrono::Utc::now().format("%B %d, %Y").to_string());
    delta.task_date_context = Some(date_context);

    emit(
        queue,
        TaskEvent::progress("graph_initialization", "Research graph initialized."),
    )
    .await;

    if services.vector.is_none() {
        emit(
            queue,
            TaskEvent::fatal_error("pre_flight_vector_store", "Vector store critical failure."),
        )
        .await;
        state.cancel.cancel();
        return delta;
    }
    emit(
        queue,
        TaskEvent::progress("pre_flight_vector_store_ready", "Vector store ready."),
    )
    .await;
    emit(
        queue,
        TaskEvent::progress(
            "pre_flight_search_engines_complete",
            "Search engine pre-flight checks complete.",
        ),
    )
    .await;

    delta
}

// ── Stage 2: query generation ──────────────────────────────────

pub async fn generate_search_queries(
    state: &OverallState,
    services: &Services,
    queue: &EventQueue,
) -> StateDelta {
    let mut delta = StateDelta::default();
    emit(
        queue,
        TaskEvent::progress("generate_search_queries", "Generating search queries..."),
    )
    .await;

    let model_info = effective_model(
        state.request_params.reasoning_model_info.as_ref(),
        None,
        &services.config,
    );
    let date_context = state.task_date_context.clone().unwrap_or_default();

    let result = services
        .reasoner
        .generate_search_queries(
            &state.original_query,
            services.config.graph.max_queries_per_hop,
            &date_context,
            &model_info,
            Some(state.user_id.as_str()),
            &format!("{}_generate_queries", state.task_id),
            &state.cancel,
        )
        .await;

    push_usage(&mut delta, &model_info, result.usage);

    if let Some(error) = result.error {
        emit(
            queue,
            TaskEvent::fatal_error(
                "query_generation",
                format!("Failed to generate search queries: {error}"),
            ),
        )
        .await;
        state.cancel.cancel();
        delta.current_queries_for_hop = Some(vec![]);
        return delta;
    }

    emit(
        queue,
        TaskEvent::progress(
            "query_generation_complete",
            format!("Generated {} search queries.", result.queries.len()),
        ),
    )
    .await;
    delta.current_queries_for_hop = Some(result.queries);
    delta
}

// ── Stage 3: web search ────────────────────────────────────────

pub async fn web_search(state: &OverallState, services: &Services, queue: &EventQueue) -> StateDelta {
    let mut delta = StateDelta::default();
    let mut results = Vec::new();

    if state.current_queries_for_hop.is_empty() {
        delta.search_results_this_hop = Some(results);
        return delta;
    }

    let providers = state
        .request_params
        .search_providers
        .clone()
        .unwrap_or_else(|| services.config.search.providers_default.clone());
    let max_results = state
        .request_params
        .max_results_per_provider_query
        .unwrap_or(services.config.search.max_results_per_query);

    for query in &state.current_queries_for_hop {
        if state.cancel.is_cancelled() {
            break;
        }
        if state.executed_search_queries.contains(query) {
            continue;
        }

        let (items, errors) = services
            .search
            .execute_search_pass(
                query,
                &providers,
                &state.credentials,
                max_results,
                false,
                Some(queue),
                &state.cancel,
            )
            .await;

        results.extend(items);

        for (provider, error) in errors {
            emit(
                queue,
                TaskEvent::progress(
                    format!("web_search_provider_error_{provider}"),
                    format!("Warning: Provider {provider} error: {error}"),
                ),
            )
            .await;
        }
        delta.executed_search_queries.push(query.clone());
    }

    emit(
        queue,
        TaskEvent::progress(
            "search_done",
            format!(
                "Web search phase complete. Found {} items for processing.",
                results.len()
            ),
        ),
    )
    .await;
    delta.search_results_this_hop = Some(results);
    delta
}

// ── Stage 4: content processing ────────────────────────────────

pub async fn process_content(
    state: &OverallState,
    services: &Services,
    queue: &EventQueue,
) -> StateDelta {
    let mut delta = StateDelta::default();
    if state.search_results_this_hop.is_empty() {
        delta.processed_chunks_this_hop = Some(vec![]);
        return delta;
    }

    // Deduplicate by URL, skipping anything already visited.
    let mut unique: HashMap<&str, &scour_core::SearchResultItem> = HashMap::new();
    for item in &state.search_results_this_hop {
        if !item.url.is_empty() && !unique.contains_key(item.url.as_str()) {
            unique.insert(item.url.as_str(), item);
        }
    }
    let to_scrape: Vec<&scour_core::SearchResultItem> = unique
        .values()
        .filter(|item| !state.visited_urls.contains(&item.url))
        .take(services.config.scrape.concurrency)
        .copied()
        .collect();

    let mut futures = Vec::new();
    let mut scraped_urls: Vec<String> = Vec::new();
    for item in &to_scrape {
        let mut source_info = HashMap::new();
        source_info.insert("title".to_string(), serde_json::json!(item.title));
        source_info.insert("snippet".to_string(), serde_json::json!(item.snippet));
        source_info.insert("provider".to_string(), serde_json::json!(item.provider_name));
        source_info.insert(
            "source_query".to_string(),
            serde_json::json!(item.query_phrase_used),
        );
        source_info.insert("task_id".to_string(), serde_json::json!(state.task_id));

        emit(
            queue,
            TaskEvent::progress(
                format!("scraping_{}", truncate_chars(&item.url, 30)),
                format!("Scraping: {}", item.url),
            ),
        )
        .await;

        let url = item.url.clone();
        scraped_urls.push(url.clone());
        let search = Arc::clone(&services.search);
        let cancel = state.cancel.clone();
        futures.push(async move {
            search.scrape_url_with_vetting(&url, source_info, &cancel).await
        });
    }

    let outputs = futures::future::join_all(futures).await;

    let chunk_size_words = state
        .request_params
        .chunk_size_words
        .unwrap_or(services.config.graph.chunk_size_words);
    let chunk_overlap_words = state
        .request_params
        .chunk_overlap_words
        .unwrap_or(services.config.graph.chunk_overlap_words);
    // The chunker works in characters; word budgets scale by the average
    // English word-plus-space length.
    const CHARS_PER_WORD: usize = 6;

    let mut processed: Vec<ContentChunk> = Vec::new();
    'outer: for (url, output) in scraped_urls.into_iter().zip(outputs) {
        if state.cancel.is_cancelled() {
            break;
        }
        delta.visited_urls.push(url.clone());

        let Some(content) = output.content else {
            if let Some(err) = output.source_info.get("error").and_then(|v| v.as_str()) {
                warn!(url = %url, error = err, "scrape yielded no content");
            }
            continue;
        };
        let page_title = output.title.unwrap_or_else(|| "Web Source".to_string());

        let chunk_texts = scour_vector::chunk_text(
            &content,
            chunk_size_words * CHARS_PER_WORD,
            chunk_overlap_words * CHARS_PER_WORD,
        );
        for (idx, text) in chunk_texts.into_iter().enumerate() {
            if state.cancel.is_cancelled() {
                break 'outer;
            }
            let chunk_id = Uuid::new_v4().to_string();
            let mut metadata = HashMap::new();
            metadata.insert("original_url".to_string(), serde_json::json!(url));
            metadata.insert("page_title".to_string(), serde_json::json!(page_title));
            if let Some(score) = output.source_info.get("trust_score") {
                metadata.insert("trust_score".to_string(), score.clone());
            }

            let chunk = ContentChunk {
                chunk_id: chunk_id.clone(),
                original_url: url.clone(),
                page_title: Some(page_title.clone()),
                text_content: text,
                chunk_index_in_page: idx,
                depth: 0,
                vector_metadata: metadata,
            };
            delta.all_processed_chunks.insert(chunk_id, chunk.clone());
            processed.push(chunk);
        }
    }

    emit(
        queue,
        TaskEvent::progress(
            "content_processing_complete",
            format!(
                "Content processing complete. {} new chunks processed.",
                processed.len()
            ),
        ),
    )
    .await;
    delta.processed_chunks_this_hop = Some(processed);
    delta
}

// ── Stage 5: synthesis ─────────────────────────────────────────

pub async fn synthesize_report(
    state: &OverallState,
    services: &Services,
    queue: &EventQueue,
) -> StateDelta {
    let mut delta = StateDelta::default();
    emit(queue, TaskEvent::progress("synthesis_start", SYNTHESIS_START)).await;

    let chunks = &state.processed_chunks_this_hop;
    if chunks.is_empty() {
        emit(
            queue,
            TaskEvent::MarkdownChunk {
                chunk_id: 0,
                content: SYNTHESIS_NO_CONTENT_FALLBACK.to_string(),
                is_final_chunk: true,
            },
        )
        .await;
        delta.final_report_md = Some(SYNTHESIS_NO_CONTENT_FALLBACK.to_string());
        delta.report_sources = Some(vec![]);
        return delta;
    }

    let model_info = effective_model(
        state.request_params.synthesis_model_info.as_ref(),
        state.request_params.reasoning_model_info.as_ref(),
        &services.config,
    );

    let draft = services
        .reasoner
        .synthesize_initial_draft(
            &state.original_query,
            chunks,
            services.config.graph.synthesis_target_word_count,
            &model_info,
            Some(state.user_id.as_str()),
            &format!("{}_synthesis_draft_graph", state.task_id),
            &state.cancel,
        )
        .await;

    push_usage(&mut delta, &model_info, draft.usage);

    let draft_text = if draft.error.is_some() || draft.draft_text.is_empty() {
        if let Some(ref e) = draft.error {
            warn!(task_id = %state.task_id, error = %e, "synthesis draft failed, using fallback");
        }
        SYNTHESIS_DRAFT_ERROR_FALLBACK.to_string()
    } else {
        draft.draft_text
    };

    // Rewrite [ref: URL] markers to short identifiers and build the
    // sources section from the URLs the draft actually cited.
    let (report_body, citation_map) = citations::extract_and_map_llm_citations(&draft_text);

    let mut sources_md_lines = vec!["\n\n---\n\n## Sources\n".to_string()];
    let mut report_sources: Vec<ReportSource> = Vec::new();

    if citation_map.is_empty() {
        sources_md_lines.push("No primary web sources cited.".to_string());
    } else {
        let mut idents: Vec<&String> = citation_map.keys().collect();
        idents.sort_by_key(|ident| citations::marker_order(ident));
        for ident in idents {
            let url = &citation_map[ident];
            let title = chunks
                .iter()
                .find(|c| &c.original_url == url)
                .and_then(|c| c.page_title.clone())
                .unwrap_or_else(|| "Web Source".to_string());
            let trust_score = chunks
                .iter()
                .find(|c| &c.original_url == url)
                .and_then(|c| c.vector_metadata.get("trust_score"))
                .and_then(|v| v.as_f64());
            sources_md_lines.push(format!("- [{ident}] [{title}]({url})"));
            report_sources.push(ReportSource {
                url: url.clone(),
                title,
                citation_marker: format!("[{ident}]"),
                trust_score,
                provider: None,
            });
        }
    }

    let date_line = match state.task_date_context {
        Some(ref ctx) => format!(
            "\n\n---\n*Report generated based on information available up to or relevant to: {ctx}*"
        ),
        None => String::new(),
    };
    let final_report = format!("{report_body}{date_line}{}", sources_md_lines.join("\n"));

    emit(
        queue,
        TaskEvent::MarkdownChunk {
            chunk_id: 0,
            content: final_report.clone(),
            is_final_chunk: true,
        },
    )
    .await;

    delta.final_report_md = Some(final_report);
    delta.report_sources = Some(report_sources);
    delta
}

// ── Stage 6: finalize ──────────────────────────────────────────

pub async fn finalize_task(state: &OverallState, _services: &Services, queue: &EventQueue) -> StateDelta {
    let duration_display = state
        .start_time
        .map(|start| format_duration(start.elapsed().as_secs()))
        .unwrap_or_else(|| "N/A".to_string());

    emit(
        queue,
        TaskEvent::Complete {
            message: "Research completed successfully.".into(),
            detailed_token_usage: state.aggregated_token_usage.clone(),
            report_sources: state.report_sources.clone(),
            stat_duration_display: duration_display,
        },
    )
    .await;
    StateDelta::default()
}

// ── helpers ────────────────────────────────────────────────────

fn effective_model(
    preferred: Option<&ModelInfo>,
    fallback: Option<&ModelInfo>,
    config: &ScourConfig,
) -> ModelInfo {
    let mut model = preferred
        .or(fallback)
        .cloned()
        .unwrap_or_default();
    if model.name.is_empty() {
        model.name = config.llm.default_reasoning_model.clone();
        model.provider_name.get_or_insert_with(|| "local".to_string());
    }
    model
}

fn push_usage(delta: &mut StateDelta, model_info: &ModelInfo, usage: scour_core::TokenUsage) {
    if usage.total_tokens == 0 && usage.prompt_tokens == 0 && usage.completion_tokens == 0 {
        return;
    }
    delta.token_usage.push(ModelUsage {
        model_id: model_info.id.unwrap_or(0),
        model_name: model_info.name.clone(),
        usage,
    });
}

/// "1h 2m 3s", "2m 3s", or "3s".
pub fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
