//! Mock completion backend for deterministic testing.
//!
//! Returns pre-configured responses without making any HTTP calls.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use scour_core::{Result, ScourError, TokenUsage};

use crate::provider::*;

/// A pre-configured response from the mock backend.
#[derive(Clone)]
pub struct MockResponse {
    pub content: String,
    pub finish_reason: Option<String>,
    pub usage: TokenUsage,
    /// If set, the backend returns this error instead.
    pub error: Option<MockError>,
}

/// Error shapes the mock can produce.
#[derive(Clone)]
pub enum MockError {
    Provider(String),
    RateLimited(u64),
    TruncatedEmpty,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            content: String::new(),
            finish_reason: Some("stop".into()),
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 50,
                total_tokens: 150,
            },
            error: None,
        }
    }
}

impl MockResponse {
    pub fn text(content: &str) -> Self {
        Self {
            content: content.to_string(),
            ..Default::default()
        }
    }

    pub fn error(msg: &str) -> Self {
        Self {
            error: Some(MockError::Provider(msg.to_string())),
            ..Default::default()
        }
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self {
            error: Some(MockError::RateLimited(retry_after_secs)),
            ..Default::default()
        }
    }

    pub fn without_usage(content: &str) -> Self {
        Self {
            content: content.to_string(),
            usage: TokenUsage::default(),
            ..Default::default()
        }
    }
}

/// A mock backend that replays queued responses in order. When the queue
/// runs dry it returns a fixed placeholder so tests fail loudly on
/// unexpected extra calls.
pub struct MockBackend {
    responses: Arc<Mutex<Vec<MockResponse>>>,
    /// Track all requests received (for assertions in tests).
    pub requests: Arc<Mutex<Vec<ChatRequest>>>,
    name: String,
}

impl MockBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(vec![])),
            requests: Arc::new(Mutex::new(vec![])),
            name: name.into(),
        }
    }

    pub fn with_response(self, content: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push(MockResponse::text(content));
        self
    }

    pub fn with_mock_response(self, resp: MockResponse) -> Self {
        self.responses.lock().unwrap().push(resp);
        self
    }

    pub fn queue_response(&self, resp: MockResponse) {
        self.responses.lock().unwrap().push(resp);
    }

    pub fn recorded_requests(&self) -> Arc<Mutex<Vec<ChatRequest>>> {
        Arc::clone(&self.requests)
    }

    fn next_response(&self) -> MockResponse {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            MockResponse::text("(mock: no more queued responses)")
        } else {
            responses.remove(0)
        }
    }
}

#[async_trait]
impl CompletionBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: &ChatRequest,
        _cancel: &CancellationToken,
    ) -> Result<RawCompletion> {
        self.requests.lock().unwrap().push(request.clone());
        let mock = self.next_response();

        if let Some(error) = mock.error {
            return Err(match error {
                MockError::Provider(msg) => ScourError::LlmProvider(msg),
                MockError::RateLimited(secs) => ScourError::RateLimited {
                    retry_after_secs: secs,
                },
                MockError::TruncatedEmpty => ScourError::TruncatedEmpty,
            });
        }

        Ok(RawCompletion {
            content: mock.content,
            usage: mock.usage,
            finish_reason: mock.finish_reason,
        })
    }
}
