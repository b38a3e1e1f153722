//! # scour-server
//!
//! HTTP surface for the orchestrator:
//!
//! - research task lifecycle (create / SSE stream / cancel / status)
//! - uploaded-document ingestion into the vector store
//! - direct vector-store endpoints (add / search / delete / embed)

pub mod tasks;

use axum::{
    Router,
    extract::rejection::JsonRejection,
    extract::{Path, State},
    http::StatusCode,
    response::{Json, Sse, sse::Event as SseEvent},
    routing::{get, post},
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use scour_core::{GenericDocument, RequestParams, TaskStatus};
use scour_vector::store::SearchQuery;

use tasks::{SharedServices, TaskRegistry, spawn_research_task};

/// Shared server state.
pub struct AppState {
    pub registry: Arc<TaskRegistry>,
    pub shared: SharedServices,
}

// ── Request / response bodies ──────────────────────────────────

#[derive(Deserialize)]
struct CreateTaskRequest {
    user_id: String,
    request_params: RequestParams,
    #[serde(default)]
    api_config: Option<HashMap<String, String>>,
}

#[derive(Serialize)]
struct TaskCreationResponse {
    task_id: String,
    status: &'static str,
    stream_url: String,
    cancel_url: String,
}

#[derive(Serialize)]
struct CancellationResponse {
    task_id: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Serialize)]
struct TaskStatusResponse {
    task_id: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress_message: Option<String>,
}

#[derive(Deserialize)]
struct AddDocumentsRequest {
    group_id: String,
    documents: Vec<GenericDocument>,
}

#[derive(Deserialize)]
struct VectorSearchRequest {
    query_text: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
    #[serde(default)]
    group_id: Option<String>,
}

fn default_top_k() -> usize {
    5
}

#[derive(Deserialize)]
struct DeleteByGroupRequest {
    group_id: String,
}

#[derive(Deserialize)]
struct EmbedTextsRequest {
    texts: Vec<String>,
}

#[derive(Deserialize)]
struct IngestDocumentsRequest {
    documents: Vec<IngestDocumentItem>,
}

/// One document to ingest. Text is pre-extracted by the caller; a
/// `file_path` relative to the upload directory is accepted for plain-text
/// files only — rich-format parsing lives outside this service.
#[derive(Deserialize)]
struct IngestDocumentItem {
    file_id: String,
    original_name: String,
    #[serde(default)]
    text_content: Option<String>,
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    metadata: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Serialize)]
struct GeneralVectorResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

// ── Router ─────────────────────────────────────────────────────

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = state.shared.config.server.cors;
    let mut router = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/research_tasks", post(create_research_task))
        .route("/research_tasks/{task_id}/stream", get(stream_task_updates))
        .route("/research_tasks/{task_id}/cancel", post(cancel_research_task))
        .route("/research_tasks/{task_id}/status", get(get_task_status))
        .route("/tasks/{task_id}/ingest_documents", post(ingest_documents))
        .route("/vector/documents", post(add_vector_documents))
        .route("/vector/search", post(search_vector_documents))
        .route("/vector/delete_by_group", post(delete_vectors_by_group))
        .route("/vector/embed-texts", post(embed_texts))
        .with_state(state);

    if cors {
        router = router.layer(CorsLayer::permissive());
    }
    router
}

async fn root_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"message": "Live Search Orchestrator Service is running."}))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Schema-validation failures answer 422 with the standard issue list.
/// The request body is never echoed back; logs get an abbreviated view.
fn validation_error_response(rejection: JsonRejection) -> (StatusCode, Json<serde_json::Value>) {
    let summary: String = rejection.body_text().chars().take(200).collect();
    warn!(error = %summary, "request validation failed");
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(serde_json::json!({
            "detail": [{"type": "validation_error", "msg": summary}]
        })),
    )
}

// ── Research task lifecycle ────────────────────────────────────

async fn create_research_task(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TaskCreationResponse>), (StatusCode, Json<serde_json::Value>)> {
    let Json(request) = payload.map_err(validation_error_response)?;
    if request.request_params.initial_query.trim().is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({
                "detail": [{"type": "validation_error", "msg": "initial_query must not be empty"}]
            })),
        ));
    }

    info!(user_id = %request.user_id, "research task request accepted");
    let task_id = spawn_research_task(
        Arc::clone(&state.registry),
        &state.shared,
        request.user_id,
        request.request_params,
        request.api_config,
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(TaskCreationResponse {
            stream_url: format!("/research_tasks/{task_id}/stream"),
            cancel_url: format!("/research_tasks/{task_id}/cancel"),
            task_id,
            status: "pending",
        }),
    ))
}

async fn stream_task_updates(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, StatusCode> {
    let queue_slot = state.registry.queues.get(&task_id).map(|e| Arc::clone(&e));
    let Some(queue_slot) = queue_slot else {
        // No queue: completed-and-drained tasks 404; a live task with no
        // queue is an inconsistent registry.
        return match state.registry.tasks.get(&task_id) {
            Some(entry) if !entry.is_done() => Err(StatusCode::INTERNAL_SERVER_ERROR),
            _ => Err(StatusCode::NOT_FOUND),
        };
    };
    let mut receiver = queue_slot
        .lock()
        .await
        .take()
        .ok_or(StatusCode::CONFLICT)?;

    let heartbeat = std::time::Duration::from_secs(state.shared.config.server.heartbeat_interval_secs);
    let registry = Arc::clone(&state.registry);

    let stream = async_stream::stream! {
        info!(task_id = %task_id, "SSE stream starting");
        yield Ok(sse_event("heartbeat", serde_json::json!({
            "message": "SSE stream initializing",
            "timestamp": chrono::Utc::now(),
        })));
        yield Ok(sse_event("progress", serde_json::json!({
            "stage": "stream_start",
            "message": "SSE stream connected.",
        })));

        loop {
            // Yields cannot live inside select! arms; race the queue against
            // the heartbeat timer, then emit outside.
            let next = tokio::select! {
                item = receiver.recv() => Some(item),
                _ = tokio::time::sleep(heartbeat) => None,
            };
            match next {
                Some(Some(Some(event))) => {
                    let terminal = event.is_terminal();
                    let data = serde_json::to_value(&event).unwrap_or_default();
                    yield Ok(sse_event(event.event_name(), data));
                    if terminal {
                        info!(task_id = %task_id, kind = event.event_name(), "terminal event streamed");
                        break;
                    }
                }
                // None sentinel or closed channel: stream is over.
                Some(_) => break,
                // Heartbeat tick.
                None => {
                    yield Ok(sse_event("heartbeat", serde_json::json!({
                        "timestamp": chrono::Utc::now(),
                    })));
                }
            }
        }

        registry.queues.remove(&task_id);
        info!(task_id = %task_id, "SSE stream finished, queue removed");
    };

    Ok(Sse::new(stream))
}

async fn cancel_research_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<CancellationResponse>, StatusCode> {
    let entry = state
        .registry
        .tasks
        .get(&task_id)
        .map(|e| Arc::clone(&e))
        .ok_or(StatusCode::NOT_FOUND)?;

    if entry.is_done() {
        return Ok(Json(CancellationResponse {
            task_id,
            status: "already_completed",
            message: Some("Task already completed/cancelled.".into()),
        }));
    }
    entry.client_cancel.cancel();
    Ok(Json(CancellationResponse {
        task_id,
        status: "cancellation_requested",
        message: None,
    }))
}

async fn get_task_status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusResponse>, StatusCode> {
    let entry = state
        .registry
        .tasks
        .get(&task_id)
        .map(|e| Arc::clone(&e))
        .ok_or(StatusCode::NOT_FOUND)?;

    let status = *entry.status.read();
    let progress_message = match status {
        TaskStatus::Running => Some("Task running.".to_string()),
        TaskStatus::Completing => Some("Task finalizing.".to_string()),
        TaskStatus::Cancelled => Some("Task cancelled.".to_string()),
        TaskStatus::Error => Some("Task failed.".to_string()),
        _ => None,
    };
    Ok(Json(TaskStatusResponse {
        task_id,
        status: status.as_str().to_string(),
        progress_message,
    }))
}

// ── Document ingestion ─────────────────────────────────────────

async fn ingest_documents(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
    payload: Result<Json<IngestDocumentsRequest>, JsonRejection>,
) -> Result<Json<GeneralVectorResponse>, (StatusCode, Json<serde_json::Value>)> {
    let Json(request) = payload.map_err(validation_error_response)?;
    let Some(ref vector) = state.shared.vector else {
        return Err(service_unavailable("Vector service not ready."));
    };

    let upload_dir = state.shared.config.server.upload_dir.clone();
    let mut processed = 0usize;
    let mut failed = 0usize;
    let mut docs: Vec<GenericDocument> = Vec::new();

    for item in request.documents {
        let text = match item.text_content {
            Some(t) if !t.trim().is_empty() => t,
            _ => match read_plain_upload(&upload_dir, item.file_path.as_deref()).await {
                Some(t) => t,
                None => {
                    failed += 1;
                    continue;
                }
            },
        };

        let mut metadata = item.metadata.unwrap_or_default();
        metadata.insert("original_name".into(), serde_json::json!(item.original_name));
        metadata.insert("source_type".into(), serde_json::json!("uploaded_file"));
        metadata.insert("is_from_uploaded_doc".into(), serde_json::json!(true));
        metadata.insert("original_document_id".into(), serde_json::json!(item.file_id));

        docs.push(GenericDocument {
            id: format!("file_{}", item.file_id),
            text_content: text.trim().to_string(),
            metadata,
        });
        processed += 1;
    }

    let added = if docs.is_empty() {
        0
    } else {
        vector.add(&task_id, &docs).await.map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"detail": format!("Vector store add failed: {e}")})),
            )
        })?
    };

    Ok(Json(GeneralVectorResponse {
        success: true,
        message: format!("Ingestion complete. Processed: {processed}, Failed/Skipped: {failed}."),
        details: Some(serde_json::json!({
            "files_processed": processed,
            "files_failed_or_skipped": failed,
            "items_added_to_vector_store": added,
        })),
    }))
}

/// Read a plain-text upload, confined to the configured upload directory.
async fn read_plain_upload(
    upload_dir: &Option<std::path::PathBuf>,
    file_path: Option<&str>,
) -> Option<String> {
    let base = upload_dir.as_ref()?;
    let rel = file_path?;
    let joined = base.join(rel);
    let canonical = tokio::fs::canonicalize(&joined).await.ok()?;
    let base_canonical = tokio::fs::canonicalize(base).await.ok()?;
    if !canonical.starts_with(&base_canonical) {
        warn!(path = %rel, "upload path escapes the upload directory, skipping");
        return None;
    }
    tokio::fs::read_to_string(&canonical).await.ok()
}

// ── Direct vector endpoints ────────────────────────────────────

fn service_unavailable(msg: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({"detail": msg})),
    )
}

async fn add_vector_documents(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AddDocumentsRequest>, JsonRejection>,
) -> Result<Json<GeneralVectorResponse>, (StatusCode, Json<serde_json::Value>)> {
    let Json(request) = payload.map_err(validation_error_response)?;
    let Some(ref vector) = state.shared.vector else {
        return Err(service_unavailable("Vector service not ready."));
    };
    let added = vector
        .add(&request.group_id, &request.documents)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"detail": e.to_string()})),
            )
        })?;
    Ok(Json(GeneralVectorResponse {
        success: true,
        message: format!("{} documents processed, {added} chunks added.", request.documents.len()),
        details: None,
    }))
}

async fn search_vector_documents(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<VectorSearchRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let Json(request) = payload.map_err(validation_error_response)?;
    if request.query_text.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"detail": "query_text empty."})),
        ));
    }
    let Some(ref vector) = state.shared.vector else {
        return Err(service_unavailable("Vector service not ready."));
    };

    let embedding = vector
        .embed(&[&request.query_text])
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"detail": format!("Query embedding failed: {e}")})),
            )
        })?
        .into_iter()
        .next()
        .ok_or_else(|| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"detail": "Query embedding failed."})),
            )
        })?;

    let results = vector
        .search(SearchQuery {
            vector: Some(embedding),
            group_id: request.group_id,
            top_k: request.top_k,
            ..Default::default()
        })
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"detail": e.to_string()})),
            )
        })?;

    let rows: Vec<serde_json::Value> = results
        .iter()
        .map(|r| {
            serde_json::json!({
                "id": r.id,
                "text_content": r.text_content,
                "metadata": r.metadata,
                "distance": r.distance,
                "similarity": r.similarity,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "success": true,
        "message": format!("Found {} results.", rows.len()),
        "results": rows,
    })))
}

async fn delete_vectors_by_group(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DeleteByGroupRequest>, JsonRejection>,
) -> Result<Json<GeneralVectorResponse>, (StatusCode, Json<serde_json::Value>)> {
    let Json(request) = payload.map_err(validation_error_response)?;
    let Some(ref vector) = state.shared.vector else {
        return Err(service_unavailable("Vector service not ready."));
    };
    vector.delete_by_group(&request.group_id).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"detail": e.to_string()})),
        )
    })?;
    Ok(Json(GeneralVectorResponse {
        success: true,
        message: format!("Vectors for group ID {} deleted.", request.group_id),
        details: None,
    }))
}

async fn embed_texts(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<EmbedTextsRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let Json(request) = payload.map_err(validation_error_response)?;
    let Some(ref vector) = state.shared.vector else {
        return Err(service_unavailable("Embedding model not loaded."));
    };
    if request.texts.is_empty() {
        return Ok(Json(serde_json::json!({
            "embeddings": [],
            "dimension": vector.dimensions(),
        })));
    }

    let refs: Vec<&str> = request.texts.iter().map(String::as_str).collect();
    let embeddings = vector.embed(&refs).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"detail": e.to_string()})),
        )
    })?;

    Ok(Json(serde_json::json!({
        "embeddings": embeddings,
        "dimension": vector.dimensions(),
    })))
}

// ── helpers ────────────────────────────────────────────────────

fn sse_event(name: &str, data: serde_json::Value) -> SseEvent {
    SseEvent::default()
        .event(name)
        .id(uuid::Uuid::new_v4().to_string())
        .data(data.to_string())
}

/// Start the HTTP server.
pub async fn serve(state: Arc<AppState>) -> scour_core::Result<()> {
    let listen = state.shared.config.server.listen.clone();
    let router = build_router(state);

    info!(listen = %listen, "starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .map_err(|e| scour_core::ScourError::Config(format!("failed to bind {listen}: {e}")))?;

    axum::serve(listener, router)
        .await
        .map_err(|e| scour_core::ScourError::Task(format!("server error: {e}")))?;
    Ok(())
}
