use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use scour_core::{Result, ScourError, TokenUsage};

/// Output shape the caller expects. JSON mode instructs OpenAI-compatible
/// providers to emit `response_format = json_object` and runs the repair
/// cascade on the raw string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// A single-prompt completion request after trimming.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub json_mode: bool,
    /// Attributed user, forwarded where the provider supports it.
    pub user: Option<String>,
}

/// Raw completion before JSON handling.
#[derive(Debug, Clone, Default)]
pub struct RawCompletion {
    pub content: String,
    pub usage: TokenUsage,
    pub finish_reason: Option<String>,
}

/// One provider call strategy. The adapter dispatches to exactly one
/// backend per call based on `ModelInfo.provider_name`.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<RawCompletion>;
}

/// Transient errors worth another attempt: rate limits, connection trouble,
/// timeouts, 5xx. Truncation-with-no-content and cancellation never retry.
pub fn is_retryable(err: &ScourError) -> bool {
    match err {
        ScourError::RateLimited { .. } => true,
        ScourError::TruncatedEmpty => false,
        ScourError::Cancelled => false,
        ScourError::LlmProvider(msg) => {
            msg.starts_with("HTTP 429")
                || msg.starts_with("HTTP 500")
                || msg.starts_with("HTTP 502")
                || msg.starts_with("HTTP 503")
                || msg.starts_with("HTTP 504")
                || msg.starts_with("HTTP 529")
                || msg.contains("timed out")
                || msg.contains("connection")
                || msg.contains("overloaded")
                || msg.contains("empty content")
        }
        _ => false,
    }
}

/// Retry-After hint in seconds, when the provider sent one.
pub fn retry_after_hint(err: &ScourError) -> Option<u64> {
    if let ScourError::RateLimited { retry_after_secs } = err {
        Some(*retry_after_secs)
    } else {
        None
    }
}

/// Shared response handling for OpenAI-compatible chat completions.
pub(crate) fn parse_openai_response(data: &serde_json::Value) -> Result<RawCompletion> {
    let choice = &data["choices"][0];
    let content = choice["message"]["content"]
        .as_str()
        .unwrap_or("")
        .to_string();
    let finish_reason = choice["finish_reason"].as_str().map(str::to_string);

    // Providers occasionally report finish_reason=length with no content at
    // all; retrying cannot help, the prompt has to shrink.
    if content.is_empty() && finish_reason.as_deref() == Some("length") {
        return Err(ScourError::TruncatedEmpty);
    }
    if content.is_empty() {
        return Err(ScourError::LlmProvider("provider returned empty content".into()));
    }

    let usage = &data["usage"];
    Ok(RawCompletion {
        content,
        usage: TokenUsage {
            prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
            completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
            total_tokens: usage["total_tokens"].as_u64().unwrap_or(0),
        },
        finish_reason,
    })
}

/// Map an HTTP error response to the error taxonomy, honouring Retry-After.
pub(crate) fn classify_http_error(
    status: reqwest::StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> ScourError {
    if status.as_u16() == 429 {
        return ScourError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(0),
        };
    }
    ScourError::LlmProvider(format!("HTTP {status}: {body}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn retryability_classification() {
        assert!(is_retryable(&ScourError::RateLimited { retry_after_secs: 3 }));
        assert!(is_retryable(&ScourError::LlmProvider("HTTP 503: busy".into())));
        assert!(is_retryable(&ScourError::LlmProvider("connection reset by peer".into())));
        assert!(!is_retryable(&ScourError::TruncatedEmpty));
        assert!(!is_retryable(&ScourError::LlmProvider("Invalid API key".into())));
        assert!(!is_retryable(&ScourError::Cancelled));
    }

    #[test]
    fn parse_response_happy_path() {
        let data = json!({
            "choices": [{"message": {"content": "hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
        });
        let parsed = parse_openai_response(&data).unwrap();
        assert_eq!(parsed.content, "hello");
        assert_eq!(parsed.usage.total_tokens, 12);
    }

    #[test]
    fn length_with_empty_content_aborts() {
        let data = json!({
            "choices": [{"message": {"content": ""}, "finish_reason": "length"}],
            "usage": {}
        });
        assert!(matches!(
            parse_openai_response(&data),
            Err(ScourError::TruncatedEmpty)
        ));
    }

    #[test]
    fn http_429_maps_to_rate_limited_with_hint() {
        let err = classify_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, Some(17), "slow");
        assert!(matches!(err, ScourError::RateLimited { retry_after_secs: 17 }));
    }
}
