use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ModelUsage, ReportSource};

/// Events emitted by a running research task and streamed to the client as
/// server-sent events. Exactly one terminal event (`Complete`, `Error`, or
/// `Cancelled`) is enqueued per task, followed by a `None` sentinel that
/// closes the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskEvent {
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
    Progress {
        stage: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_key_summary: Option<bool>,
    },
    MarkdownChunk {
        chunk_id: u64,
        content: String,
        is_final_chunk: bool,
    },
    Error {
        error_message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
        is_fatal: bool,
    },
    Cancelled {
        message: String,
    },
    Complete {
        message: String,
        detailed_token_usage: Vec<ModelUsage>,
        report_sources: Vec<ReportSource>,
        stat_duration_display: String,
    },
}

impl TaskEvent {
    /// SSE event name on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            TaskEvent::Heartbeat { .. } => "heartbeat",
            TaskEvent::Progress { .. } => "progress",
            TaskEvent::MarkdownChunk { .. } => "markdown_chunk",
            TaskEvent::Error { .. } => "error",
            TaskEvent::Cancelled { .. } => "cancelled",
            TaskEvent::Complete { .. } => "complete",
        }
    }

    /// Terminal events end the task's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskEvent::Complete { .. } | TaskEvent::Error { .. } | TaskEvent::Cancelled { .. }
        )
    }

    pub fn progress(stage: impl Into<String>, message: impl Into<String>) -> Self {
        TaskEvent::Progress {
            stage: stage.into(),
            message: message.into(),
            details: None,
            is_key_summary: None,
        }
    }

    pub fn fatal_error(stage: impl Into<String>, message: impl Into<String>) -> Self {
        TaskEvent::Error {
            error_message: message.into(),
            stage: Some(stage.into()),
            is_fatal: true,
        }
    }
}

/// Sender half of a task's event queue. The `None` sentinel closes the SSE
/// stream after the terminal event.
pub type EventQueue = tokio::sync::mpsc::Sender<Option<TaskEvent>>;

/// Receiver half, owned by the SSE generator.
pub type EventReceiver = tokio::sync::mpsc::Receiver<Option<TaskEvent>>;

/// Enqueue an event, ignoring a closed receiver (client went away).
pub async fn emit(queue: &EventQueue, event: TaskEvent) {
    let _ = queue.send(Some(event)).await;
}

/// Enqueue the closing sentinel.
pub async fn emit_sentinel(queue: &EventQueue) {
    let _ = queue.send(None).await;
}
