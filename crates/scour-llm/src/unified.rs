use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use scour_core::{Result, ScourError};

use crate::provider::*;

/// The catch-all route: any provider exposing an OpenAI-compatible chat
/// surface (Google's and Mistral's compatibility endpoints, self-hosted
/// gateways, and models registered as plain "local"). Known providers get a
/// default base URL and a model-name prefix convention.
pub struct UnifiedBackend {
    client: reqwest::Client,
    provider_name: String,
    api_key: Option<String>,
    base_url: String,
}

impl UnifiedBackend {
    pub fn new(
        client: reqwest::Client,
        provider_name: &str,
        api_key: Option<String>,
        api_base: Option<String>,
        local_api_base: &str,
    ) -> Self {
        let base_url = api_base.unwrap_or_else(|| default_base(provider_name, local_api_base));
        Self {
            client,
            provider_name: provider_name.to_string(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Providers that route through a shared gateway are addressed by a
    /// prefixed model name; direct compatibility endpoints are not.
    pub fn qualified_model(&self, model: &str) -> String {
        match self.provider_name.as_str() {
            "google" | "mistral" => model.to_string(),
            "local" | "" => model.to_string(),
            other => {
                if model.starts_with(&format!("{other}/")) {
                    model.to_string()
                } else {
                    format!("{other}/{model}")
                }
            }
        }
    }
}

fn default_base(provider_name: &str, local_api_base: &str) -> String {
    match provider_name {
        "google" => "https://generativelanguage.googleapis.com/v1beta/openai".into(),
        "mistral" => "https://api.mistral.ai/v1".into(),
        _ => local_api_base.trim_end_matches('/').to_string(),
    }
}

#[async_trait]
impl CompletionBackend for UnifiedBackend {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn complete(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<RawCompletion> {
        let mut body = serde_json::json!({
            "model": self.qualified_model(&request.model),
            "messages": [{"role": "user", "content": &request.prompt}],
            "temperature": request.temperature,
        });
        // JSON mode is only reliable on OpenAI-style models; other providers
        // get the instruction through the prompt and the repair cascade.
        if request.json_mode
            && (self.provider_name == "openai" || request.model.to_lowercase().contains("gpt-"))
        {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        if let Some(ref user) = request.user {
            body["user"] = serde_json::json!(user);
        }

        debug!(
            provider = %self.provider_name,
            model = %request.model,
            base = %self.base_url,
            "unified completion request"
        );

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let resp = tokio::select! {
            r = req.send() => r.map_err(|e| {
                ScourError::LlmProvider(format!("{}: connection error: {e}", self.provider_name))
            })?,
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

        let data: serde_json::Value = resp.json().await.map_err(|e| {
            ScourError::LlmProvider(format!("{}: parse error: {e}", self.provider_name))
        })?;
        parse_openai_response(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bases_for_known_providers() {
        assert!(default_base("google", "http://localhost:3000/api/v1").contains("googleapis.com"));
        assert!(default_base("mistral", "http://localhost:3000/api/v1").contains("mistral.ai"));
        assert_eq!(
            default_base("local", "http://localhost:3000/api/v1/"),
            "http://localhost:3000/api/v1"
        );
    }

    #[test]
    fn model_qualification() {
        let client = reqwest::Client::new();
        let b = UnifiedBackend::new(client.clone(), "together", None, Some("http://gw".into()), "");
        assert_eq!(b.qualified_model("llama-3"), "together/llama-3");
        assert_eq!(b.qualified_model("together/llama-3"), "together/llama-3");

        let b = UnifiedBackend::new(client, "google", None, None, "");
        assert_eq!(b.qualified_model("gemini-2.0-flash"), "gemini-2.0-flash");
    }
}
