#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    use scour_config::ScourConfig;
    use scour_core::{ApiCredentials, ContentChunk, RequestParams, TaskEvent};
    use scour_graph::stages;
    use scour_graph::{run_research_graph, OverallState, Services};
    use scour_llm::mock::MockBackend;
    use scour_llm::Reasoner;
    use scour_search::{DomainTrustStore, RateLimitRegistry, SearchScrape};
    use scour_vector::{MockEmbedding, VectorStore};

    struct Harness {
        services: Services,
        _dir: tempfile::TempDir,
    }

    async fn harness(mock: MockBackend, with_vector: bool, rate_limit_all: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ScourConfig::default();
        config.trust.db_path = dir.path().join("trust.db");
        config.trust.disable_whois = true;
        config.search.rate_limit_file = dir.path().join("rl.json");
        config.vector.db_path = dir.path().join("vectors.db");

        let rate_limits = Arc::new(RateLimitRegistry::new(
            config.search.rate_limit_file.clone(),
            config.search.default_ignore_secs,
        ));
        if rate_limit_all {
            for p in [
                "duckduckgo",
                "wikipedia",
                "courtlistener",
                "brave",
                "google_custom_search",
                "bing",
                "openalex",
            ] {
                rate_limits.mark(p, Some(3600)).await;
            }
        }

        let trust = Arc::new(DomainTrustStore::new(config.trust.clone()));
        trust.ensure_schema().unwrap();

        let search = Arc::new(SearchScrape::new(
            config.search.clone(),
            config.scrape.clone(),
            rate_limits,
            trust,
        ));

        let vector = with_vector.then(|| {
            Arc::new(
                VectorStore::open(&config.vector, Arc::new(MockEmbedding::new(32))).unwrap(),
            )
        });

        let reasoner = Arc::new(
            Reasoner::new(config.llm.clone(), ApiCredentials::default())
                .with_backend(Arc::new(mock)),
        );

        Harness {
            services: Services {
                reasoner,
                search,
                vector,
                config: Arc::new(config),
            },
            _dir: dir,
        }
    }

    fn new_state(cancel: CancellationToken) -> OverallState {
        OverallState::new(
            "task-1".into(),
            "user-1".into(),
            RequestParams {
                initial_query: "What is quantum supremacy?".into(),
                search_providers: Some(vec!["duckduckgo".into(), "wikipedia".into()]),
                ..Default::default()
            },
            ApiCredentials::default(),
            cancel,
        )
    }

    fn drain(rx: &mut scour_core::EventReceiver) -> Vec<TaskEvent> {
        let mut events = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Some(ev) = item {
                events.push(ev);
            }
        }
        events
    }

    fn chunk(id: &str, url: &str, title: &str, text: &str) -> ContentChunk {
        ContentChunk {
            chunk_id: id.into(),
            original_url: url.into(),
            page_title: Some(title.into()),
            text_content: text.into(),
            chunk_index_in_page: 0,
            depth: 0,
            vector_metadata: HashMap::new(),
        }
    }

    // ── Full-graph runs ────────────────────────────────────────

    #[tokio::test]
    async fn all_providers_rate_limited_still_reaches_complete() {
        let mock = MockBackend::new("mock").with_response(r#"{"queries": ["q1"]}"#);
        let h = harness(mock, true, true).await;
        let (tx, mut rx) = tokio::sync::mpsc::channel(256);
        let mut state = new_state(CancellationToken::new());

        run_research_graph(&mut state, &h.services, &tx).await;
        let events = drain(&mut rx);

        let terminal: Vec<&TaskEvent> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminal.len(), 1, "exactly one terminal event");
        assert!(matches!(terminal[0], TaskEvent::Complete { .. }));

        // Provider errors surface as non-fatal progress events.
        assert!(events.iter().any(|e| matches!(
            e,
            TaskEvent::Progress { stage, .. } if stage.starts_with("web_search_provider_error")
        )));

        // The no-content fallback markdown went out as the single final chunk.
        let md: Vec<&TaskEvent> = events
            .iter()
            .filter(|e| matches!(e, TaskEvent::MarkdownChunk { .. }))
            .collect();
        assert_eq!(md.len(), 1);
        if let TaskEvent::MarkdownChunk {
            content,
            is_final_chunk,
            ..
        } = md[0]
        {
            assert!(*is_final_chunk);
            assert!(content.contains("Insufficient content"));
        }
    }

    #[tokio::test]
    async fn missing_vector_store_is_fatal_with_single_error_event() {
        let mock = MockBackend::new("mock");
        let h = harness(mock, false, false).await;
        let (tx, mut rx) = tokio::sync::mpsc::channel(256);
        let mut state = new_state(CancellationToken::new());

        run_research_graph(&mut state, &h.services, &tx).await;
        let events = drain(&mut rx);

        let terminal: Vec<&TaskEvent> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert!(matches!(
            terminal[0],
            TaskEvent::Error { is_fatal: true, .. }
        ));
        assert!(state.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn query_generation_failure_is_fatal() {
        let mock = MockBackend::new("mock");
        mock.queue_response(scour_llm::mock::MockResponse::error("Invalid API key"));
        let h = harness(mock, true, true).await;
        let (tx, mut rx) = tokio::sync::mpsc::channel(256);
        let mut state = new_state(CancellationToken::new());

        run_research_graph(&mut state, &h.services, &tx).await;
        let events = drain(&mut rx);

        let terminal: Vec<&TaskEvent> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        if let TaskEvent::Error {
            error_message,
            stage,
            is_fatal,
        } = terminal[0]
        {
            assert!(*is_fatal);
            assert_eq!(stage.as_deref(), Some("query_generation"));
            assert!(error_message.contains("Failed to generate search queries"));
        } else {
            panic!("expected error event");
        }
    }

    #[tokio::test]
    async fn cancellation_before_start_emits_nothing() {
        let mock = MockBackend::new("mock");
        let h = harness(mock, true, false).await;
        let (tx, mut rx) = tokio::sync::mpsc::channel(256);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut state = new_state(cancel);

        run_research_graph(&mut state, &h.services, &tx).await;
        assert!(drain(&mut rx).is_empty());
    }

    // ── Content processing ─────────────────────────────────────

    #[tokio::test]
    async fn scrape_timeout_marks_url_visited_without_error_event() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ScourConfig::default();
        config.trust.db_path = dir.path().join("trust.db");
        config.trust.disable_whois = true;
        config.search.rate_limit_file = dir.path().join("rl.json");
        // A scraper that hangs past its budget.
        config.scrape.command = vec!["sleep".into(), "30".into()];
        config.scrape.subprocess_timeout_secs = 1;

        let rate_limits = Arc::new(RateLimitRegistry::new(
            config.search.rate_limit_file.clone(),
            config.search.default_ignore_secs,
        ));
        let trust = Arc::new(DomainTrustStore::new(config.trust.clone()));
        trust.ensure_schema().unwrap();
        let search = Arc::new(SearchScrape::new(
            config.search.clone(),
            config.scrape.clone(),
            rate_limits,
            trust,
        ));
        let services = Services {
            reasoner: Arc::new(
                Reasoner::new(config.llm.clone(), ApiCredentials::default())
                    .with_backend(Arc::new(MockBackend::new("mock"))),
            ),
            search,
            vector: None,
            config: Arc::new(config),
        };

        let (tx, mut rx) = tokio::sync::mpsc::channel(256);
        let mut state = new_state(CancellationToken::new());
        state.search_results_this_hop = vec![scour_core::SearchResultItem {
            url: "https://hangs.example/page".into(),
            title: Some("Hangs".into()),
            snippet: None,
            provider_name: "Test".into(),
            query_phrase_used: "q".into(),
            position: 1,
            trust: None,
        }];

        let delta = stages::process_content(&state, &services, &tx).await;
        state.apply(delta);

        // The URL is marked visited, no chunk was created, and nothing
        // terminal or error-shaped was emitted — research continues.
        assert!(state.visited_urls.contains("https://hangs.example/page"));
        assert!(state.processed_chunks_this_hop.is_empty());
        let events = drain(&mut rx);
        assert!(events.iter().all(|e| !matches!(e, TaskEvent::Error { .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            TaskEvent::Progress { stage, .. } if stage == "content_processing_complete"
        )));
    }

    // ── Synthesis stage ────────────────────────────────────────

    #[tokio::test]
    async fn synthesis_rewrites_citations_and_builds_sources_section() {
        let draft = "Quantum supremacy was demonstrated [ref: https://a.example/paper]. \
                     Critics disagreed [ref: https://b.example/critique] and the original team \
                     responded [ref: https://a.example/paper].";
        let mock = MockBackend::new("mock").with_response(draft);
        let h = harness(mock, true, false).await;
        let (tx, mut rx) = tokio::sync::mpsc::channel(256);
        let mut state = new_state(CancellationToken::new());
        state.task_date_context = Some("June 01, 2025".into());
        state.processed_chunks_this_hop = vec![
            chunk("c1", "https://a.example/paper", "The Paper", "quantum text"),
            chunk("c2", "https://b.example/critique", "The Critique", "critique text"),
        ];

        let delta = stages::synthesize_report(&state, &h.services, &tx).await;
        state.apply(delta);

        let report = state.final_report_md.clone().unwrap();
        assert!(report.contains("[S1]"));
        assert!(report.contains("[S2]"));
        assert!(!report.contains("[ref:"));
        assert!(report.contains("## Sources"));
        assert!(report.contains("- [S1] [The Paper](https://a.example/paper)"));
        assert!(report.contains("- [S2] [The Critique](https://b.example/critique)"));
        assert!(report.contains("June 01, 2025"));

        // Every source-section marker appears in the body and vice versa.
        for source in &state.report_sources {
            assert!(report.contains(&source.citation_marker));
        }
        assert_eq!(state.report_sources.len(), 2);
        assert_eq!(state.report_sources[0].citation_marker, "[S1]");
        assert_eq!(state.report_sources[0].url, "https://a.example/paper");

        let events = drain(&mut rx);
        let finals: Vec<&TaskEvent> = events
            .iter()
            .filter(|e| matches!(e, TaskEvent::MarkdownChunk { is_final_chunk: true, .. }))
            .collect();
        assert_eq!(finals.len(), 1);
    }

    #[tokio::test]
    async fn synthesis_draft_error_falls_back_without_fatal() {
        let mock = MockBackend::new("mock");
        mock.queue_response(scour_llm::mock::MockResponse::error("Invalid API key"));
        let h = harness(mock, true, false).await;
        let (tx, mut rx) = tokio::sync::mpsc::channel(256);
        let mut state = new_state(CancellationToken::new());
        state.processed_chunks_this_hop =
            vec![chunk("c1", "https://a.example", "T", "some text")];

        let delta = stages::synthesize_report(&state, &h.services, &tx).await;
        state.apply(delta);

        assert!(state
            .final_report_md
            .unwrap()
            .contains("Error during draft synthesis"));
        assert!(!state.cancel.is_cancelled());
        let events = drain(&mut rx);
        assert!(events.iter().all(|e| !matches!(e, TaskEvent::Error { .. })));
    }

    // ── Finalize stage ─────────────────────────────────────────

    #[tokio::test]
    async fn finalize_reports_duration_and_sources() {
        let mock = MockBackend::new("mock");
        let h = harness(mock, true, false).await;
        let (tx, mut rx) = tokio::sync::mpsc::channel(256);
        let mut state = new_state(CancellationToken::new());
        state.start_time = Some(std::time::Instant::now());
        state.report_sources = vec![scour_core::ReportSource {
            url: "https://a.example".into(),
            title: "A".into(),
            citation_marker: "[S1]".into(),
            trust_score: None,
            provider: None,
        }];

        stages::finalize_task(&state, &h.services, &tx).await;
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        if let TaskEvent::Complete {
            report_sources,
            stat_duration_display,
            ..
        } = &events[0]
        {
            assert_eq!(report_sources.len(), 1);
            assert!(stat_duration_display.ends_with('s'));
        } else {
            panic!("expected complete event");
        }
    }
}
