use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use scour_core::{Result, ScourError};

use crate::provider::*;

/// Direct REST against the xAI API using its OpenAI-compatible surface.
/// The SDK path requires the base URL to end in `/v1`; a configured base
/// without it is corrected rather than rejected.
pub struct XaiBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl XaiBackend {
    pub fn new(client: reqwest::Client, api_key: String, api_base: String) -> Self {
        let trimmed = api_base.trim_end_matches('/');
        let base_url = if trimmed.ends_with("/v1") {
            trimmed.to_string()
        } else {
            format!("{trimmed}/v1")
        };
        Self {
            client,
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl CompletionBackend for XaiBackend {
    fn name(&self) -> &str {
        "xai"
    }

    async fn complete(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<RawCompletion> {
        let mut body = serde_json::json!({
            "model": &request.model,
            "messages": [{"role": "user", "content": &request.prompt}],
            "temperature": request.temperature,
        });
        if request.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        if let Some(ref user) = request.user {
            body["user"] = serde_json::json!(user);
        }

        debug!(model = %request.model, base = %self.base_url, "xai completion request");

        let send = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send();

        let resp = tokio::select! {
            r = send => r.map_err(|e| ScourError::LlmProvider(format!("xai: connection error: {e}")))?,
            _ = cancel.cancelled() => return Err(ScourError::Cancelled),
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_http_error(status, retry_after, &text));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ScourError::LlmProvider(format!("xai: parse error: {e}")))?;
        parse_openai_response(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized_to_v1() {
        let client = reqwest::Client::new();
        let b = XaiBackend::new(client.clone(), "k".into(), "https://api.x.ai".into());
        assert_eq!(b.base_url, "https://api.x.ai/v1");

        let b = XaiBackend::new(client.clone(), "k".into(), "https://api.x.ai/v1/".into());
        assert_eq!(b.base_url, "https://api.x.ai/v1");

        let b = XaiBackend::new(client, "k".into(), "https://api.x.ai/v1".into());
        assert_eq!(b.base_url, "https://api.x.ai/v1");
    }
}
