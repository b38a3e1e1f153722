//! Page fetching through an isolated subprocess. The scraper runs out of
//! process so crashes, hangs, and memory growth in the fetch/parse stack
//! cannot take the service down; the parent enforces a wall-clock timeout,
//! terminates on cancellation, and validates the JSON contract on stdout.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use scour_core::ExtractedLink;
use scour_config::schema::ScrapeConfig;

/// Raw item emitted by the scrape subprocess: a JSON list with exactly one
/// of these per invocation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScrapedItem {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub links: Vec<Value>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// What the search/scrape subsystem hands back to the graph for one URL.
#[derive(Debug, Clone, Default)]
pub struct ScrapeOutput {
    pub content: Option<String>,
    pub links: Vec<ExtractedLink>,
    /// Source metadata merged from the search result and the subprocess;
    /// carries an `error` key when the fetch failed.
    pub source_info: HashMap<String, Value>,
    pub title: Option<String>,
}

impl ScrapeOutput {
    pub fn error(url: &str, source_info: HashMap<String, Value>, reason: impl Into<String>) -> Self {
        let mut info = source_info;
        info.insert("error".into(), Value::String(reason.into()));
        info.entry("url".into())
            .or_insert_with(|| Value::String(url.to_string()));
        Self {
            content: None,
            links: vec![],
            source_info: info,
            title: None,
        }
    }
}

pub struct ScrapeRunner {
    config: ScrapeConfig,
    client: reqwest::Client,
}

impl ScrapeRunner {
    pub fn new(config: ScrapeConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// Fetch and extract one URL. DOI resolver URLs are first resolved to
    /// their redirect target so the subprocess sees the real landing page.
    pub async fn scrape_url(
        &self,
        url: &str,
        source_info: HashMap<String, Value>,
        cancel: &CancellationToken,
    ) -> ScrapeOutput {
        let mut target = url.to_string();
        if crate::query::domain_from_url(url)
            .map(|d| d == "doi.org" || d.ends_with(".doi.org"))
            .unwrap_or(false)
        {
            if let Some(resolved) = self.resolve_redirect(url).await {
                debug!(from = url, to = %resolved, "resolved DOI target");
                target = resolved;
            }
        }

        let item = self.run_subprocess(&target, cancel).await;
        self.assemble_output(&target, item, source_info)
    }

    /// Follow redirects with a HEAD request and report the final URL.
    pub async fn resolve_redirect(&self, url: &str) -> Option<String> {
        let resp = self.client.head(url).send().await.ok()?;
        let final_url = resp.url().to_string();
        (final_url != url).then_some(final_url)
    }

    async fn run_subprocess(&self, target_url: &str, cancel: &CancellationToken) -> ScrapedItem {
        if cancel.is_cancelled() {
            return error_item(target_url, "Cancelled");
        }

        let mut cmd = Command::new(&self.config.command[0]);
        cmd.args(&self.config.command[1..])
            .arg(target_url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, command = ?self.config.command, "failed to spawn scrape subprocess");
                return error_item(target_url, format!("spawn failed: {e}"));
            }
        };

        let timeout = std::time::Duration::from_secs(self.config.subprocess_timeout_secs);
        let output = tokio::select! {
            result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => return error_item(target_url, format!("subprocess io error: {e}")),
                // Timeout: kill_on_drop reaps the child when the future drops.
                Err(_) => {
                    return error_item(
                        target_url,
                        format!("scrape subprocess timed out after {}s", self.config.subprocess_timeout_secs),
                    );
                }
            },
            _ = cancel.cancelled() => {
                return error_item(target_url, "Cancelled");
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !stderr.is_empty() && !is_harmless_scraper_stderr(&stderr) {
            warn!(url = target_url, stderr = %truncate(&stderr, 400), "scrape subprocess stderr");
        }

        if !output.status.success() {
            let detail = if stderr.is_empty() {
                "Unknown scrape subprocess error".to_string()
            } else {
                truncate(&stderr, 400)
            };
            return error_item(
                target_url,
                format!("scrape subprocess error (code {:?}): {detail}", output.status.code()),
            );
        }

        if stdout.is_empty() {
            return error_item(target_url, "scrape subprocess produced no stdout but exited cleanly");
        }

        match serde_json::from_str::<Vec<ScrapedItem>>(&stdout) {
            Ok(mut items) if !items.is_empty() => items.remove(0),
            Ok(_) => error_item(target_url, "scrape output was an empty list"),
            Err(e) => error_item(target_url, format!("JSON decode error: {e}")),
        }
    }

    fn assemble_output(
        &self,
        url: &str,
        item: ScrapedItem,
        source_info: HashMap<String, Value>,
    ) -> ScrapeOutput {
        let mut info = source_info;
        for (k, v) in item.metadata {
            info.insert(k, v);
        }
        info.entry("url".into())
            .or_insert_with(|| Value::String(url.to_string()));

        let links = item
            .links
            .into_iter()
            .filter_map(|raw| parse_link(raw, url))
            .collect();

        let title = info
            .get("title")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        ScrapeOutput {
            content: item.content.filter(|c| !c.trim().is_empty()),
            links,
            source_info: info,
            title,
        }
    }
}

fn error_item(url: &str, reason: impl Into<String>) -> ScrapedItem {
    let mut metadata = HashMap::new();
    metadata.insert("error".to_string(), Value::String(reason.into()));
    ScrapedItem {
        url: url.to_string(),
        content: None,
        links: vec![],
        metadata,
    }
}

/// Link records may arrive as objects or bare strings; relative URLs are
/// resolved against the page URL.
fn parse_link(raw: Value, base_url: &str) -> Option<ExtractedLink> {
    let (href, anchor_text, context) = match &raw {
        Value::String(s) => (s.clone(), None, None),
        Value::Object(obj) => (
            obj.get("url").and_then(|v| v.as_str())?.to_string(),
            obj.get("anchor_text")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            obj.get("context_around_link")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        ),
        _ => return None,
    };

    let absolute = match url::Url::parse(&href) {
        Ok(u) => u,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            url::Url::parse(base_url).ok()?.join(&href).ok()?
        }
        Err(_) => return None,
    };
    if absolute.scheme() != "http" && absolute.scheme() != "https" {
        return None;
    }
    Some(ExtractedLink {
        url: absolute.to_string(),
        anchor_text: anchor_text.filter(|t| !t.is_empty()),
        context_around_link: context,
    })
}

/// Scrapers of real-world blogs produce a constant drizzle of benign stderr;
/// only surface lines that do not match the known-harmless patterns.
pub fn is_harmless_scraper_stderr(stderr: &str) -> bool {
    const HARMLESS: [&str; 9] = [
        "JavaScript error",
        "Failed to load external resource",
        "SSL certificate verification failed",
        "Resource timeout",
        "CORS error",
        "[Config]",
        "DeprecationWarning:",
        "SyntaxWarning:",
        "UserWarning:",
    ];

    let lines: Vec<&str> = stderr.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.is_empty() {
        return true;
    }
    for line in lines {
        if HARMLESS.iter().any(|p| line.contains(p)) {
            continue;
        }
        let lower = line.to_lowercase();
        if lower.contains("scrapy")
            && !lower.contains("error")
            && !lower.contains("traceback")
            && !lower.contains("failed")
        {
            continue;
        }
        return false;
    }
    true
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harmless_stderr_patterns() {
        assert!(is_harmless_scraper_stderr(""));
        assert!(is_harmless_scraper_stderr("JavaScript error: undefined x\nCORS error on frame"));
        assert!(is_harmless_scraper_stderr("scrapy engine started"));
        assert!(!is_harmless_scraper_stderr("Traceback (most recent call last):"));
        assert!(!is_harmless_scraper_stderr("scrapy: spider error - failed"));
    }

    #[test]
    fn link_parsing_resolves_relative_urls() {
        let link = parse_link(
            serde_json::json!({"url": "/docs/page", "anchor_text": "Docs"}),
            "https://example.com/root",
        )
        .unwrap();
        assert_eq!(link.url, "https://example.com/docs/page");
        assert_eq!(link.anchor_text.as_deref(), Some("Docs"));

        let bare = parse_link(serde_json::json!("https://other.example/x"), "https://example.com").unwrap();
        assert_eq!(bare.url, "https://other.example/x");

        assert!(parse_link(serde_json::json!({"url": "mailto:x@y.z"}), "https://example.com").is_none());
        assert!(parse_link(serde_json::json!(42), "https://example.com").is_none());
    }

    #[tokio::test]
    async fn subprocess_contract_happy_path() {
        let config = ScrapeConfig {
            command: vec![
                "sh".into(),
                "-c".into(),
                r#"echo '[{"url": "https://example.com", "content": "hello world", "links": [], "metadata": {"title": "Example"}}]' # "#.into(),
            ],
            subprocess_timeout_secs: 10,
            ..Default::default()
        };
        let runner = ScrapeRunner::new(config, reqwest::Client::new());
        let out = runner
            .scrape_url("https://example.com", HashMap::new(), &CancellationToken::new())
            .await;
        assert_eq!(out.content.as_deref(), Some("hello world"));
        assert_eq!(out.title.as_deref(), Some("Example"));
        assert!(!out.source_info.contains_key("error"));
    }

    #[tokio::test]
    async fn subprocess_timeout_produces_error_item() {
        let config = ScrapeConfig {
            command: vec!["sleep".into(), "30".into()],
            subprocess_timeout_secs: 1,
            ..Default::default()
        };
        let runner = ScrapeRunner::new(config, reqwest::Client::new());
        let out = runner
            .scrape_url("https://slow.example", HashMap::new(), &CancellationToken::new())
            .await;
        assert!(out.content.is_none());
        let err = out.source_info["error"].as_str().unwrap();
        assert!(err.contains("timed out"), "got: {err}");
    }

    #[tokio::test]
    async fn subprocess_bad_json_produces_error_item() {
        let config = ScrapeConfig {
            command: vec!["sh".into(), "-c".into(), "echo 'not json' # ".into()],
            subprocess_timeout_secs: 10,
            ..Default::default()
        };
        let runner = ScrapeRunner::new(config, reqwest::Client::new());
        let out = runner
            .scrape_url("https://bad.example", HashMap::new(), &CancellationToken::new())
            .await;
        assert!(out.source_info["error"].as_str().unwrap().contains("JSON decode"));
    }

    #[tokio::test]
    async fn cancelled_before_start_is_reported() {
        let config = ScrapeConfig::default();
        let runner = ScrapeRunner::new(config, reqwest::Client::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = runner
            .scrape_url("https://example.com", HashMap::new(), &cancel)
            .await;
        assert_eq!(out.source_info["error"].as_str(), Some("Cancelled"));
    }
}
