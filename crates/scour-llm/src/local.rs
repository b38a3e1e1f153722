use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use scour_core::{Result, ScourError, TokenUsage};

use crate::provider::*;

/// Completions from the persistent local-model worker, reached through the
/// internal API. The endpoint only streams: the request always carries
/// `stream: true` and the response is an SSE event stream of
/// `data: {choices:[{delta:{content}}]}` lines ending in `data: [DONE]`.
///
/// The reader is byte-chunked and tolerates chunk boundaries mid-line.
/// When the cancellation signal fires mid-stream the partial content is
/// discarded and the call reports cancellation.
pub struct LocalStreamBackend {
    client: reqwest::Client,
    endpoint_url: String,
}

impl LocalStreamBackend {
    pub fn new(client: reqwest::Client, base_url: &str, endpoint_path: &str) -> Self {
        let endpoint_url = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            endpoint_path.trim_start_matches('/')
        );
        Self {
            client,
            endpoint_url,
        }
    }
}

#[async_trait]
impl CompletionBackend for LocalStreamBackend {
    fn name(&self) -> &str {
        "local_active_model_node_api"
    }

    async fn complete(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<RawCompletion> {
        let Some(ref user) = request.user else {
            return Err(ScourError::LlmProvider(
                "User ID missing for internal API call.".into(),
            ));
        };

        let body = serde_json::json!({
            "messages": [{"role": "user", "content": &request.prompt}],
            "stream": true,
            "user_id": user,
            "temperature": request.temperature,
        });

        debug!(endpoint = %self.endpoint_url, "local stream request");

        let send = self.client.post(&self.endpoint_url).json(&body).send();
        let resp = tokio::select! {
            r = send => r.map_err(|e| ScourError::LlmProvider(format!("local: connection error: {e}")))?,
            _ = cancel.cancelled() => return Err(ScourError::Cancelled),
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            // 5xx from the worker is a transient condition worth a retry.
            return Err(ScourError::LlmProvider(format!("HTTP {status}: {text}")));
        }

        let mut stream = resp.bytes_stream();
        let mut buffer = String::new();
        let mut content = String::new();
        let mut usage = TokenUsage::default();

        loop {
            let chunk = tokio::select! {
                c = stream.next() => c,
                _ = cancel.cancelled() => {
                    debug!("local stream cancelled mid-read, discarding partial content");
                    return Err(ScourError::Cancelled);
                }
            };
            let Some(chunk) = chunk else { break };
            let bytes =
                chunk.map_err(|e| ScourError::LlmProvider(format!("local: stream error: {e}")))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);
                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                let data = data.trim();
                if data.is_empty() {
                    continue;
                }
                if data == "[DONE]" {
                    return finish(content, usage);
                }
                match serde_json::from_str::<serde_json::Value>(data) {
                    Ok(event) => {
                        if let Some(token) = event["choices"][0]["delta"]["content"].as_str() {
                            content.push_str(token);
                        }
                        if let Some(u) = event.get("usage") {
                            if let Some(pt) = u["prompt_tokens"].as_u64() {
                                usage.prompt_tokens = pt;
                            }
                            if let Some(ct) = u["completion_tokens"].as_u64() {
                                usage.completion_tokens = ct;
                            }
                            if let Some(tt) = u["total_tokens"].as_u64() {
                                usage.total_tokens = tt;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, line = %truncate(data, 100), "unparseable SSE data line");
                    }
                }
            }
        }

        // Stream ended without [DONE]; accept what accumulated.
        finish(content, usage)
    }
}

fn finish(content: String, usage: TokenUsage) -> Result<RawCompletion> {
    if content.is_empty() {
        return Err(ScourError::LlmProvider("provider returned empty content".into()));
    }
    Ok(RawCompletion {
        content,
        usage,
        finish_reason: None,
    })
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}
