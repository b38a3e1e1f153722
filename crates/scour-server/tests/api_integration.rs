//! HTTP API integration tests — exercise the endpoints with a mock LLM
//! backend and every search provider rate-limited, so nothing touches the
//! network.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use scour_config::ScourConfig;
use scour_core::{Result as ScourResult, ScourError};
use scour_llm::mock::MockBackend;
use scour_llm::{ChatRequest, CompletionBackend, RawCompletion};
use scour_search::{DomainTrustStore, RateLimitRegistry};
use scour_server::tasks::{SharedServices, TaskRegistry};
use scour_server::{AppState, build_router};
use scour_vector::{MockEmbedding, VectorStore};

/// A backend that never answers until cancelled — for exercising the
/// cancel path deterministically.
struct StallBackend;

#[async_trait]
impl CompletionBackend for StallBackend {
    fn name(&self) -> &str {
        "stall"
    }
    async fn complete(
        &self,
        _request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> ScourResult<RawCompletion> {
        cancel.cancelled().await;
        Err(ScourError::Cancelled)
    }
}

struct TestApp {
    router: axum::Router,
    state: Arc<AppState>,
    _dir: tempfile::TempDir,
}

async fn setup(backend: Arc<dyn CompletionBackend>) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ScourConfig::default();
    config.trust.db_path = dir.path().join("trust.db");
    config.trust.disable_whois = true;
    config.search.rate_limit_file = dir.path().join("rl.json");
    config.vector.db_path = dir.path().join("vectors.db");
    // Long enough that registry entries survive every assertion window.
    config.server.task_cleanup_delay_secs = 30.0;
    config.server.heartbeat_interval_secs = 1;

    let rate_limits = Arc::new(RateLimitRegistry::new(
        config.search.rate_limit_file.clone(),
        config.search.default_ignore_secs,
    ));
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

    let trust = Arc::new(DomainTrustStore::new(config.trust.clone()));
    trust.ensure_schema().unwrap();

    let vector = Arc::new(
        VectorStore::open(&config.vector, Arc::new(MockEmbedding::new(32))).unwrap(),
    );

    let state = Arc::new(AppState {
        registry: Arc::new(TaskRegistry::new()),
        shared: SharedServices {
            config: Arc::new(config),
            rate_limits,
            trust,
            vector: Some(vector),
            base_credentials: Default::default(),
            llm_backend_override: Some(backend),
        },
    });

    TestApp {
        router: build_router(Arc::clone(&state)),
        state,
        _dir: dir,
    }
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

const CREATE_BODY: &str = r#"{
    "user_id": "u1",
    "request_params": {
        "initial_query": "What is quantum supremacy?",
        "search_providers": ["duckduckgo", "wikipedia"]
    }
}"#;

// ── Health & root ──────────────────────────────────────────────

#[tokio::test]
async fn test_health_endpoint() {
    let app = setup(Arc::new(MockBackend::new("mock"))).await;
    let resp = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_root_banner() {
    let app = setup(Arc::new(MockBackend::new("mock"))).await;
    let resp = app
        .router
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert!(json["message"].as_str().unwrap().contains("running"));
}

// ── Task creation & validation ─────────────────────────────────

#[tokio::test]
async fn test_create_task_returns_202_with_urls() {
    let mock = MockBackend::new("mock").with_response(r#"{"queries": ["q1"]}"#);
    let app = setup(Arc::new(mock)).await;

    let resp = app
        .router
        .oneshot(post_json("/research_tasks", CREATE_BODY))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let json = body_json(resp).await;
    let task_id = json["task_id"].as_str().unwrap();
    assert_eq!(json["status"], "pending");
    assert_eq!(
        json["stream_url"],
        format!("/research_tasks/{task_id}/stream")
    );
    assert_eq!(
        json["cancel_url"],
        format!("/research_tasks/{task_id}/cancel")
    );
}

#[tokio::test]
async fn test_validation_error_is_422_with_detail_list() {
    let app = setup(Arc::new(MockBackend::new("mock"))).await;

    // Missing required field.
    let resp = app
        .router
        .clone()
        .oneshot(post_json("/research_tasks", r#"{"user_id": "u1"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(resp).await;
    assert!(json["detail"].is_array());

    // Empty initial query.
    let resp = app
        .router
        .oneshot(post_json(
            "/research_tasks",
            r#"{"user_id": "u1", "request_params": {"initial_query": "  "}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_unknown_task_is_404() {
    let app = setup(Arc::new(MockBackend::new("mock"))).await;
    let resp = app
        .router
        .clone()
        .oneshot(
            Request::get("/research_tasks/nope/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app
        .router
        .oneshot(post_json("/research_tasks/nope/cancel", "{}"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ── SSE stream ─────────────────────────────────────────────────

#[tokio::test]
async fn test_stream_carries_terminal_complete_event() {
    let mock = MockBackend::new("mock").with_response(r#"{"queries": ["q1"]}"#);
    let app = setup(Arc::new(mock)).await;

    let resp = app
        .router
        .clone()
        .oneshot(post_json("/research_tasks", CREATE_BODY))
        .await
        .unwrap();
    let task_id = body_json(resp).await["task_id"].as_str().unwrap().to_string();

    // Let the graph run to completion (all providers are rate-limited, so
    // it finishes fast with the fallback report).
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    let resp = app
        .router
        .oneshot(
            Request::get(format!("/research_tasks/{task_id}/stream"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8_lossy(&body);

    assert!(text.contains("event: heartbeat"));
    assert!(text.contains("stream_start"));
    assert!(text.contains("event: markdown_chunk"));
    assert!(text.contains("event: complete"));
    // Exactly one terminal event on the wire.
    assert_eq!(text.matches("event: complete").count(), 1);
    assert_eq!(text.matches("event: error").count(), 0);
    assert_eq!(text.matches("event: cancelled").count(), 0);

    // The generator removed the queue from the registry on exit.
    assert!(app.state.registry.queues.get(&task_id).is_none());
}

#[tokio::test]
async fn test_stream_for_unknown_task_is_404() {
    let app = setup(Arc::new(MockBackend::new("mock"))).await;
    let resp = app
        .router
        .oneshot(
            Request::get("/research_tasks/ghost/stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ── Cancellation ───────────────────────────────────────────────

#[tokio::test]
async fn test_cancel_mid_task_reaches_cancelled_status() {
    let app = setup(Arc::new(StallBackend)).await;

    let resp = app
        .router
        .clone()
        .oneshot(post_json("/research_tasks", CREATE_BODY))
        .await
        .unwrap();
    let task_id = body_json(resp).await["task_id"].as_str().unwrap().to_string();

    // The stalling backend parks the graph in query generation.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let resp = app
        .router
        .clone()
        .oneshot(post_json(&format!("/research_tasks/{task_id}/cancel"), "{}"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["status"], "cancellation_requested");

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let resp = app
        .router
        .clone()
        .oneshot(
            Request::get(format!("/research_tasks/{task_id}/status"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["status"], "cancelled");

    // The stream sees the cancelled terminal event.
    let resp = app
        .router
        .clone()
        .oneshot(
            Request::get(format!("/research_tasks/{task_id}/stream"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8_lossy(&body);
    assert_eq!(text.matches("event: cancelled").count(), 1);

    // Second cancel reports already_completed.
    let resp = app
        .router
        .oneshot(post_json(&format!("/research_tasks/{task_id}/cancel"), "{}"))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["status"], "already_completed");
}

// ── Vector endpoints ───────────────────────────────────────────

#[tokio::test]
async fn test_vector_add_search_delete_roundtrip() {
    let app = setup(Arc::new(MockBackend::new("mock"))).await;

    let add_body = r#"{
        "group_id": "g1",
        "documents": [
            {"id": "d1", "text_content": "rust memory safety without garbage collection", "metadata": {}}
        ]
    }"#;
    let resp = app
        .router
        .clone()
        .oneshot(post_json("/vector/documents", add_body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["success"], true);

    let search_body = r#"{"query_text": "memory safety", "top_k": 3, "group_id": "g1"}"#;
    let resp = app
        .router
        .clone()
        .oneshot(post_json("/vector/search", search_body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0]["text_content"].as_str().unwrap().contains("rust"));

    let resp = app
        .router
        .clone()
        .oneshot(post_json("/vector/delete_by_group", r#"{"group_id": "g1"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .router
        .oneshot(post_json("/vector/search", search_body))
        .await
        .unwrap();
    let json = body_json(resp).await;
    assert_eq!(json["results"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_embed_texts_reports_dimension() {
    let app = setup(Arc::new(MockBackend::new("mock"))).await;
    let resp = app
        .router
        .clone()
        .oneshot(post_json("/vector/embed-texts", r#"{"texts": ["a", "b"]}"#))
        .await
        .unwrap();
    let json = body_json(resp).await;
    assert_eq!(json["dimension"], 32);
    assert_eq!(json["embeddings"].as_array().unwrap().len(), 2);

    let resp = app
        .router
        .oneshot(post_json("/vector/embed-texts", r#"{"texts": []}"#))
        .await
        .unwrap();
    let json = body_json(resp).await;
    assert_eq!(json["embeddings"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_vector_search_rejects_empty_query() {
    let app = setup(Arc::new(MockBackend::new("mock"))).await;
    let resp = app
        .router
        .oneshot(post_json("/vector/search", r#"{"query_text": ""}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ── Ingestion ──────────────────────────────────────────────────

#[tokio::test]
async fn test_ingest_documents_stores_under_task_group() {
    let app = setup(Arc::new(MockBackend::new("mock"))).await;
    let ingest_body = r#"{
        "documents": [
            {"file_id": "41", "original_name": "notes.txt", "text_content": "uploaded research notes about fusion"},
            {"file_id": "42", "original_name": "empty.txt"}
        ]
    }"#;
    let resp = app
        .router
        .clone()
        .oneshot(post_json("/tasks/task-xyz/ingest_documents", ingest_body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["details"]["files_processed"], 1);
    assert_eq!(json["details"]["files_failed_or_skipped"], 1);

    let resp = app
        .router
        .oneshot(post_json(
            "/vector/search",
            r#"{"query_text": "fusion notes", "group_id": "task-xyz", "top_k": 5}"#,
        ))
        .await
        .unwrap();
    let json = body_json(resp).await;
    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["metadata"]["is_from_uploaded_doc"], true);
    assert_eq!(results[0]["metadata"]["original_document_id"], "41");
}
