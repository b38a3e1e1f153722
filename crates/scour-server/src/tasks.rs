//! Per-task lifecycle: registry entries, the background graph driver, and
//! cancellation plumbing.
//!
//! Two cancellation mechanisms exist on purpose. The *client* token is set
//! by `POST /cancel` and aborts the driver, which then emits the
//! `cancelled` terminal event. The *graph* token is the flag stages set on
//! fatal errors (after emitting their own terminal event) and check at
//! suspension points. Keeping them separate preserves the one-terminal-
//! event guarantee.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use scour_core::event::{emit, emit_sentinel};
use scour_core::{
    ApiCredentials, EventQueue, EventReceiver, LlmCredential, RequestParams, TaskEvent, TaskStatus,
};
use scour_config::ScourConfig;
use scour_graph::{run_research_graph, OverallState, Services};
use scour_llm::Reasoner;
use scour_search::{DomainTrustStore, RateLimitRegistry, SearchScrape};
use scour_vector::VectorStore;

/// Event queue depth per task. The graph is the only producer, so a full
/// queue just backpressures the next stage until the client drains.
const EVENT_QUEUE_CAPACITY: usize = 256;

pub struct TaskEntry {
    pub status: RwLock<TaskStatus>,
    /// Client-initiated cancellation; aborts the driver.
    pub client_cancel: CancellationToken,
    /// Graph-internal cancellation flag (also set on client cancel).
    pub graph_cancel: CancellationToken,
    done: RwLock<bool>,
}

impl TaskEntry {
    pub fn is_done(&self) -> bool {
        *self.done.read()
    }
}

/// The active-task registry: task entries plus the per-task event queues.
/// Queues are removed by the SSE generator on exit; task entries are
/// removed by the done-callback after the cleanup grace period.
pub struct TaskRegistry {
    pub tasks: DashMap<String, Arc<TaskEntry>>,
    pub queues: DashMap<String, Arc<tokio::sync::Mutex<Option<EventReceiver>>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            queues: DashMap::new(),
        }
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-scoped pieces shared by every task.
pub struct SharedServices {
    pub config: Arc<ScourConfig>,
    pub rate_limits: Arc<RateLimitRegistry>,
    pub trust: Arc<DomainTrustStore>,
    pub vector: Option<Arc<VectorStore>>,
    pub base_credentials: ApiCredentials,
    /// Test seam: route every task's LLM calls to this backend.
    pub llm_backend_override: Option<Arc<dyn scour_llm::CompletionBackend>>,
}

/// Create a task: allocate its queue and registry entry, assemble per-task
/// services, and start the background driver. Returns the task id.
pub fn spawn_research_task(
    registry: Arc<TaskRegistry>,
    shared: &SharedServices,
    user_id: String,
    request_params: RequestParams,
    api_config: Option<HashMap<String, String>>,
) -> String {
    let task_id = uuid::Uuid::new_v4().to_string();
    let (tx, rx) = tokio::sync::mpsc::channel(EVENT_QUEUE_CAPACITY);

    let entry = Arc::new(TaskEntry {
        status: RwLock::new(TaskStatus::Running),
        client_cancel: CancellationToken::new(),
        graph_cancel: CancellationToken::new(),
        done: RwLock::new(false),
    });
    registry.tasks.insert(task_id.clone(), Arc::clone(&entry));
    registry
        .queues
        .insert(task_id.clone(), Arc::new(tokio::sync::Mutex::new(Some(rx))));

    let credentials = merge_request_credentials(&shared.base_credentials, api_config);
    let mut reasoner = Reasoner::new(shared.config.llm.clone(), credentials.clone());
    if let Some(ref backend) = shared.llm_backend_override {
        reasoner = reasoner.with_backend(Arc::clone(backend));
    }
    let services = Services {
        reasoner: Arc::new(reasoner),
        search: Arc::new(SearchScrape::new(
            shared.config.search.clone(),
            shared.config.scrape.clone(),
            Arc::clone(&shared.rate_limits),
            Arc::clone(&shared.trust),
        )),
        vector: shared.vector.clone(),
        config: Arc::clone(&shared.config),
    };

    let cleanup_delay = shared.config.server.task_cleanup_delay_secs;
    let driver_task_id = task_id.clone();
    tokio::spawn(drive_task(
        registry,
        entry,
        services,
        driver_task_id,
        user_id,
        request_params,
        credentials,
        tx,
        cleanup_delay,
    ));

    task_id
}

#[allow(clippy::too_many_arguments)]
async fn drive_task(
    registry: Arc<TaskRegistry>,
    entry: Arc<TaskEntry>,
    services: Services,
    task_id: String,
    user_id: String,
    request_params: RequestParams,
    credentials: ApiCredentials,
    tx: EventQueue,
    cleanup_delay_secs: f64,
) {
    info!(task_id = %task_id, "research task driver starting");

    let mut state = OverallState::new(
        task_id.clone(),
        user_id,
        request_params,
        credentials,
        entry.graph_cancel.clone(),
    );

    tokio::select! {
        _ = run_research_graph(&mut state, &services, &tx) => {
            let final_status = if entry.graph_cancel.is_cancelled() {
                TaskStatus::Error
            } else {
                TaskStatus::Completing
            };
            *entry.status.write() = final_status;
            info!(task_id = %task_id, status = final_status.as_str(), "graph finished");
        }
        _ = entry.client_cancel.cancelled() => {
            warn!(task_id = %task_id, "task explicitly cancelled");
            // Stop anything the dropped graph future left behind at its
            // next suspension point.
            entry.graph_cancel.cancel();
            emit(
                &tx,
                TaskEvent::Cancelled {
                    message: "Task explicitly cancelled during graph execution.".into(),
                },
            )
            .await;
            *entry.status.write() = TaskStatus::Cancelled;
        }
    }

    // The sentinel lets the SSE generator close even when no terminal event
    // was queued (client went away mid-cancel).
    emit_sentinel(&tx).await;
    *entry.done.write() = true;

    // Grace period so an attached SSE stream can drain the queue before the
    // task disappears from the registry.
    tokio::time::sleep(std::time::Duration::from_secs_f64(cleanup_delay_secs)).await;
    registry.tasks.remove(&task_id);
    info!(task_id = %task_id, "task removed from registry");
}

/// Apply request-level `api_config` overrides onto the resolved base
/// credentials. Keys use the historical naming (`BRAVE_SEARCH_API_KEY`,
/// `llm_xAI_apiKey`, `llm_xAI_apiBase`, …).
pub fn merge_request_credentials(
    base: &ApiCredentials,
    api_config: Option<HashMap<String, String>>,
) -> ApiCredentials {
    let mut creds = base.clone();
    let Some(overrides) = api_config else {
        return creds;
    };

    for (key, value) in overrides {
        if value.is_empty() {
            continue;
        }
        match key.as_str() {
            "BRAVE_SEARCH_API_KEY" => creds.brave_api_key = Some(value),
            "GOOGLE_API_KEY" => creds.google_api_key = Some(value),
            "GOOGLE_CX" => creds.google_cx = Some(value),
            "BING_API_KEY" => creds.bing_api_key = Some(value),
            "COURTLISTENER_API_KEY" => creds.courtlistener_api_key = Some(value),
            other => {
                // llm_<Provider>_apiKey / llm_<Provider>_apiBase
                if let Some(rest) = other.strip_prefix("llm_") {
                    let (provider, field) = match rest.rsplit_once('_') {
                        Some(pair) => pair,
                        None => continue,
                    };
                    let provider = provider.to_lowercase();
                    let slot = creds
                        .llm
                        .entry(provider)
                        .or_insert_with(LlmCredential::default);
                    match field {
                        "apiKey" => slot.api_key = Some(value),
                        "apiBase" => slot.api_base = Some(value),
                        _ => {}
                    }
                }
            }
        }
    }
    creds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_credentials_override_base() {
        let base = ApiCredentials {
            brave_api_key: Some("base-key".into()),
            ..Default::default()
        };
        let overrides = HashMap::from([
            ("BRAVE_SEARCH_API_KEY".to_string(), "req-key".to_string()),
            ("llm_xAI_apiKey".to_string(), "xai-key".to_string()),
            ("llm_xAI_apiBase".to_string(), "https://api.x.ai".to_string()),
            ("ignored".to_string(), "x".to_string()),
            ("GOOGLE_API_KEY".to_string(), String::new()),
        ]);

        let merged = merge_request_credentials(&base, Some(overrides));
        assert_eq!(merged.brave_api_key.as_deref(), Some("req-key"));
        assert!(merged.google_api_key.is_none());
        let xai = merged.llm_for("xai");
        assert_eq!(xai.api_key.as_deref(), Some("xai-key"));
        assert_eq!(xai.api_base.as_deref(), Some("https://api.x.ai"));
    }

    #[test]
    fn no_overrides_returns_base() {
        let base = ApiCredentials {
            bing_api_key: Some("b".into()),
            ..Default::default()
        };
        let merged = merge_request_credentials(&base, None);
        assert_eq!(merged.bing_api_key.as_deref(), Some("b"));
    }
}
