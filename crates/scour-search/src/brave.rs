//! Response parser for the Brave Search JSON API. Brave reports errors both
//! via HTTP status and via in-body error objects, so parsing recognizes five
//! outcomes rather than trusting the status code alone.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BraveOutcome {
    Success,
    Error,
    RateLimit,
    AuthError,
    Unexpected,
}

impl BraveOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            BraveOutcome::Success => "success",
            BraveOutcome::Error => "error",
            BraveOutcome::RateLimit => "rate_limit",
            BraveOutcome::AuthError => "auth_error",
            BraveOutcome::Unexpected => "unexpected",
        }
    }
}

/// One normalized result row.
#[derive(Debug, Clone)]
pub struct BraveResult {
    pub url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug)]
pub struct BraveApiResult {
    pub outcome: BraveOutcome,
    pub results: Vec<BraveResult>,
    pub error_message: Option<String>,
}

/// Parse a Brave API response body together with its HTTP status.
pub fn parse_response(body: &Value, status_code: u16) -> BraveApiResult {
    if !(200..300).contains(&status_code) {
        return handle_http_error(body, status_code);
    }
    let Some(obj) = body.as_object() else {
        return BraveApiResult {
            outcome: BraveOutcome::Unexpected,
            results: vec![],
            error_message: Some("response body is not a JSON object".into()),
        };
    };

    // In-body error object despite a 2xx status.
    if let Some(err) = obj.get("error") {
        let code = err["code"].as_str().unwrap_or("");
        let detail = err["detail"].as_str().or(err["message"].as_str()).unwrap_or("");
        let outcome = if code.eq_ignore_ascii_case("rate_limited") || detail.contains("rate limit")
        {
            BraveOutcome::RateLimit
        } else if code.eq_ignore_ascii_case("subscription_token_invalid")
            || detail.contains("token")
        {
            BraveOutcome::AuthError
        } else {
            BraveOutcome::Error
        };
        return BraveApiResult {
            outcome,
            results: vec![],
            error_message: Some(format!("{code}: {detail}")),
        };
    }

    let mut results = Vec::new();
    for category in ["web", "news"] {
        if let Some(items) = obj
            .get(category)
            .and_then(|c| c.get("results"))
            .and_then(|r| r.as_array())
        {
            for item in items {
                results.push(normalize_result(item));
            }
        }
    }
    // "mixed" carries references into web/news; its presence alone still
    // means the call succeeded.
    if results.is_empty() && !obj.contains_key("web") && !obj.contains_key("news") && !obj.contains_key("mixed") {
        return BraveApiResult {
            outcome: BraveOutcome::Unexpected,
            results: vec![],
            error_message: Some("no recognizable result sections in response".into()),
        };
    }

    BraveApiResult {
        outcome: BraveOutcome::Success,
        results,
        error_message: None,
    }
}

fn handle_http_error(body: &Value, status_code: u16) -> BraveApiResult {
    let detail = body["error"]["detail"]
        .as_str()
        .or(body["message"].as_str())
        .unwrap_or("")
        .to_string();
    let (outcome, msg) = match status_code {
        429 => (BraveOutcome::RateLimit, format!("HTTP 429: {detail}")),
        401 | 403 => (BraveOutcome::AuthError, format!("HTTP {status_code}: {detail}")),
        _ => (BraveOutcome::Error, format!("HTTP {status_code}: {detail}")),
    };
    BraveApiResult {
        outcome,
        results: vec![],
        error_message: Some(msg),
    }
}

fn normalize_result(item: &Value) -> BraveResult {
    BraveResult {
        url: extract_url(item),
        title: item["title"].as_str().map(str::to_string),
        description: item["description"].as_str().map(str::to_string),
    }
}

/// Brave scatters the canonical URL across several shapes depending on the
/// result type. Fallback chain: `url` → `meta_url` (scheme+netloc+path) →
/// `data_providers[].url` → any nested `url` field → `profile.url`.
fn extract_url(item: &Value) -> Option<String> {
    if let Some(url) = item["url"].as_str() {
        if !url.is_empty() {
            return Some(url.to_string());
        }
    }

    if let Some(meta) = item["meta_url"].as_object() {
        let scheme = meta.get("scheme").and_then(|v| v.as_str()).unwrap_or("");
        let netloc = meta.get("netloc").and_then(|v| v.as_str()).unwrap_or("");
        let path = meta.get("path").and_then(|v| v.as_str()).unwrap_or("");
        if !scheme.is_empty() && !netloc.is_empty() {
            return Some(format!("{scheme}://{netloc}{path}"));
        }
    }

    if let Some(providers) = item["data_providers"].as_array() {
        for p in providers {
            if let Some(url) = p["url"].as_str() {
                if !url.is_empty() {
                    return Some(url.to_string());
                }
            }
        }
    }

    if let Some(url) = find_nested_url(item, 0) {
        return Some(url);
    }

    item["profile"]["url"].as_str().map(str::to_string)
}

fn find_nested_url(value: &Value, depth: usize) -> Option<String> {
    if depth > 3 {
        return None;
    }
    let obj = value.as_object()?;
    for (key, v) in obj {
        if key == "url" {
            if let Some(s) = v.as_str() {
                if s.starts_with("http") {
                    return Some(s.to_string());
                }
            }
        }
        if v.is_object() {
            if let Some(found) = find_nested_url(v, depth + 1) {
                return Some(found);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_with_web_results() {
        let body = json!({
            "web": {"results": [
                {"url": "https://a.example", "title": "A", "description": "da"},
                {"url": "https://b.example", "title": "B", "description": "db"}
            ]}
        });
        let parsed = parse_response(&body, 200);
        assert_eq!(parsed.outcome, BraveOutcome::Success);
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[0].url.as_deref(), Some("https://a.example"));
    }

    #[test]
    fn http_429_is_rate_limit() {
        let parsed = parse_response(&json!({}), 429);
        assert_eq!(parsed.outcome, BraveOutcome::RateLimit);
    }

    #[test]
    fn http_401_is_auth_error() {
        let parsed = parse_response(&json!({"error": {"detail": "bad token"}}), 401);
        assert_eq!(parsed.outcome, BraveOutcome::AuthError);
        assert!(parsed.error_message.unwrap().contains("bad token"));
    }

    #[test]
    fn in_body_error_with_200_status() {
        let body = json!({"error": {"code": "rate_limited", "detail": "slow down"}});
        let parsed = parse_response(&body, 200);
        assert_eq!(parsed.outcome, BraveOutcome::RateLimit);
    }

    #[test]
    fn garbage_body_is_unexpected() {
        let parsed = parse_response(&json!([1, 2, 3]), 200);
        assert_eq!(parsed.outcome, BraveOutcome::Unexpected);
        let parsed = parse_response(&json!({"unrelated": true}), 200);
        assert_eq!(parsed.outcome, BraveOutcome::Unexpected);
    }

    #[test]
    fn url_fallback_chain() {
        // meta_url fallback
        let item = json!({
            "meta_url": {"scheme": "https", "netloc": "x.example", "path": "/p"}
        });
        assert_eq!(extract_url(&item).as_deref(), Some("https://x.example/p"));

        // data_providers fallback
        let item = json!({"data_providers": [{"url": "https://dp.example"}]});
        assert_eq!(extract_url(&item).as_deref(), Some("https://dp.example"));

        // nested url fallback
        let item = json!({"thing": {"inner": {"url": "https://nested.example"}}});
        assert_eq!(extract_url(&item).as_deref(), Some("https://nested.example"));

        // profile fallback
        let item = json!({"profile": {"url": "profile-page"}});
        assert_eq!(extract_url(&item).as_deref(), Some("profile-page"));
    }
}
