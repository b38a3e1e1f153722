//! Multi-provider search dispatch. A search pass filters out rate-limited
//! providers, shuffles the rest, runs each with a bounded timeout under a
//! cancellation watcher, vets returned URLs through the domain trust store,
//! and aggregates per-provider errors without aborting the pass.

use rand::prelude::IndexedRandom;
use rand::seq::SliceRandom;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use scour_core::event::emit;
use scour_core::{ApiCredentials, EventQueue, SearchResultItem, TaskEvent};
use scour_config::schema::{ScrapeConfig, SearchConfig};

use crate::academic::AcademicSiteHandler;
use crate::brave::{self, BraveOutcome};
use crate::query;
use crate::ratelimit::RateLimitRegistry;
use crate::scrape::{ScrapeOutput, ScrapeRunner};
use crate::trust::DomainTrustStore;

const COMMON_USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
];

const GENERAL_WEB_PROVIDERS: [&str; 5] =
    ["duckduckgo", "google", "google_custom_search", "bing", "brave"];

/// Identifies itself politely on outbound requests.
const GENERIC_USER_AGENT: &str =
    "Mozilla/5.0 AppleWebKit/537.36 (KHTML, like Gecko; compatible; Scour-Research/1.0)";

/// One raw result before vetting.
#[derive(Debug, Clone, Default)]
struct RawResult {
    url: Option<String>,
    title: Option<String>,
    description: Option<String>,
}

/// How a provider failed, and for how long it should be ignored.
#[derive(Debug)]
struct ProviderFailure {
    message: String,
    /// Ignore-list duration; `None` leaves the provider available.
    mark_secs: Option<u64>,
}

impl ProviderFailure {
    fn transient(message: impl Into<String>, secs: u64) -> Self {
        Self { message: message.into(), mark_secs: Some(secs) }
    }
    fn unmarked(message: impl Into<String>) -> Self {
        Self { message: message.into(), mark_secs: None }
    }
}

type ProviderResult = Result<Vec<RawResult>, ProviderFailure>;

/// The search/scrape subsystem handed to each research task.
pub struct SearchScrape {
    search_config: SearchConfig,
    client: reqwest::Client,
    pub rate_limits: Arc<RateLimitRegistry>,
    trust: Arc<DomainTrustStore>,
    scraper: ScrapeRunner,
    academic: AcademicSiteHandler,
}

impl SearchScrape {
    pub fn new(
        search_config: SearchConfig,
        scrape_config: ScrapeConfig,
        rate_limits: Arc<RateLimitRegistry>,
        trust: Arc<DomainTrustStore>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(GENERIC_USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            search_config,
            scraper: ScrapeRunner::new(scrape_config, client.clone()),
            academic: AcademicSiteHandler::new(client.clone()),
            client,
            rate_limits,
            trust,
        }
    }

    /// Run one query against the given providers. Returns the vetted results
    /// and a map of per-provider error strings; provider failures never
    /// abort the pass.
    pub async fn execute_search_pass(
        &self,
        query_text: &str,
        search_providers: &[String],
        credentials: &ApiCredentials,
        max_results_per_query: usize,
        fact_check_mode: bool,
        progress: Option<&EventQueue>,
        cancel: &CancellationToken,
    ) -> (Vec<SearchResultItem>, HashMap<String, String>) {
        let mut results: Vec<SearchResultItem> = Vec::new();
        let mut errors: HashMap<String, String> = HashMap::new();

        if cancel.is_cancelled() {
            errors.insert("cancelled".into(), "Operation cancelled before starting search pass.".into());
            return (results, errors);
        }

        let requested: Vec<String> = if search_providers.is_empty() {
            self.search_config.providers_default.clone()
        } else {
            search_providers.to_vec()
        };
        if requested.is_empty() {
            errors.insert("internal_error".into(), "No search providers configured.".into());
            return (results, errors);
        }

        // Provider selection: fact-check passes only touch the general web;
        // CourtListener only sees queries classified as legal.
        let eligible: Vec<String> = if fact_check_mode {
            let general: Vec<String> = requested
                .iter()
                .filter(|p| GENERAL_WEB_PROVIDERS.contains(&p.to_lowercase().as_str()))
                .cloned()
                .collect();
            if general.is_empty() {
                let fallback: Vec<String> = self
                    .search_config
                    .providers_fallback
                    .iter()
                    .filter(|p| GENERAL_WEB_PROVIDERS.contains(&p.to_lowercase().as_str()))
                    .cloned()
                    .collect();
                if fallback.is_empty() {
                    errors.insert(
                        "fact_check_provider_unavailable".into(),
                        "No suitable general web search providers available.".into(),
                    );
                    return (results, errors);
                }
                fallback
            } else {
                general
            }
        } else if query::is_legal_query(query_text) {
            requested
        } else {
            requested.into_iter().filter(|p| p != "courtlistener").collect()
        };

        // Drop providers on the ignore list; fall back to the config list.
        let ignored = self.rate_limits.active_ignored().await;
        let mut active: Vec<String> = eligible
            .iter()
            .filter(|p| !ignored.contains_key(p.as_str()))
            .cloned()
            .collect();
        if active.is_empty() {
            active = self
                .search_config
                .providers_fallback
                .iter()
                .filter(|p| !ignored.contains_key(p.as_str()))
                .cloned()
                .collect();
            if active.is_empty() {
                errors.insert("error".into(), "All providers rate-limited.".into());
                return (results, errors);
            }
        }

        // Shuffle to avoid always-first-provider bias.
        active.shuffle(&mut rand::rng());

        for provider_key in active {
            if cancel.is_cancelled() {
                errors.insert("cancelled".into(), "Operation cancelled.".into());
                break;
            }

            // Term-oriented providers get a keyword-reduced query.
            let current_query = match provider_key.as_str() {
                "wikipedia" | "openalex" | "courtlistener" => {
                    let simplified = query::simplify_for_specialized_search(query_text, 3);
                    if simplified.is_empty() {
                        continue;
                    }
                    simplified
                }
                _ => query_text.to_string(),
            };

            if let Some(queue) = progress {
                let preview: String = current_query.chars().take(30).collect();
                emit(
                    queue,
                    TaskEvent::progress(
                        format!("web_search_{provider_key}"),
                        format!("Searching {provider_key}: '{preview}...'"),
                    ),
                )
                .await;
            }

            let call = self.dispatch(&provider_key, &current_query, max_results_per_query, credentials);
            let timeout = Duration::from_secs(self.search_config.provider_timeout_secs);
            let outcome = tokio::select! {
                r = tokio::time::timeout(timeout, call) => r,
                _ = cancel.cancelled() => {
                    errors.insert(provider_key.clone(), "Cancelled".into());
                    break;
                }
            };

            match outcome {
                Err(_) => {
                    errors.insert(provider_key.clone(), "Timeout".into());
                    self.rate_limits
                        .mark(&provider_key, Some(self.search_config.short_ignore_secs))
                        .await;
                }
                Ok(Err(failure)) => {
                    errors.insert(provider_key.clone(), failure.message.clone());
                    if let Some(secs) = failure.mark_secs {
                        self.rate_limits.mark(&provider_key, Some(secs)).await;
                    }
                }
                Ok(Ok(raw)) => {
                    let count = raw.len();
                    self.vet_and_append(raw, &provider_key, &current_query, &mut results).await;
                    debug!(provider = %provider_key, count, "provider pass complete");
                }
            }
        }

        (results, errors)
    }

    async fn vet_and_append(
        &self,
        raw: Vec<RawResult>,
        provider_key: &str,
        query_used: &str,
        results: &mut Vec<SearchResultItem>,
    ) {
        let display_name = title_case(provider_key);
        for (idx, item) in raw.into_iter().enumerate() {
            let Some(url) = item.url.filter(|u| !u.trim().is_empty()) else {
                continue;
            };
            let trust = match query::domain_from_url(&url) {
                Some(domain) => Some(self.trust.get_or_create(&domain, &url).await),
                None => None,
            };
            results.push(SearchResultItem {
                url,
                title: item.title,
                snippet: item.description,
                provider_name: display_name.clone(),
                query_phrase_used: query_used.to_string(),
                position: idx + 1,
                trust,
            });
        }
    }

    async fn dispatch(
        &self,
        provider_key: &str,
        query_text: &str,
        limit: usize,
        credentials: &ApiCredentials,
    ) -> ProviderResult {
        match provider_key {
            "duckduckgo" => self.search_duckduckgo(query_text, limit).await,
            "brave" => self.search_brave(query_text, limit, credentials).await,
            "google" | "google_custom_search" => {
                self.search_google(query_text, limit, credentials).await
            }
            "bing" => self.search_bing(query_text, limit, credentials).await,
            "wikipedia" => self.search_wikipedia(query_text).await,
            "openalex" => self.search_openalex(query_text, limit).await,
            "courtlistener" => self.search_courtlistener(query_text, limit, credentials).await,
            other => Err(ProviderFailure::unmarked(format!("Unknown provider: {other}"))),
        }
    }

    // ── DuckDuckGo ─────────────────────────────────────────────

    /// HTML endpoint with user-agent rotation. Transient failures earn a
    /// short ignore so the next query rotates to another provider.
    async fn search_duckduckgo(&self, query_text: &str, limit: usize) -> ProviderResult {
        let ua = *COMMON_USER_AGENTS.choose(&mut rand::rng()).unwrap_or(&COMMON_USER_AGENTS[0]);
        let resp = self
            .client
            .get("https://html.duckduckgo.com/html/")
            .header("User-Agent", ua)
            .query(&[("q", query_text), ("kl", "us-en")])
            .send()
            .await
            .map_err(|e| {
                ProviderFailure::transient(format!("request failed: {e}"), self.search_config.short_ignore_secs)
            })?;

        if !resp.status().is_success() {
            return Err(ProviderFailure::transient(
                format!("HTTP {}", resp.status()),
                self.search_config.short_ignore_secs,
            ));
        }
        let html = resp.text().await.map_err(|e| {
            ProviderFailure::transient(e.to_string(), self.search_config.short_ignore_secs)
        })?;
        Ok(parse_duckduckgo_html(&html, limit))
    }

    // ── Brave ──────────────────────────────────────────────────

    async fn search_brave(
        &self,
        query_text: &str,
        limit: usize,
        credentials: &ApiCredentials,
    ) -> ProviderResult {
        let Some(key) = credentials.brave_api_key.as_deref().filter(|k| !k.is_empty()) else {
            return Err(ProviderFailure::unmarked("Brave API key missing."));
        };

        let resp = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .header("Accept", "application/json")
            .header("Accept-Encoding", "gzip")
            .header("X-Subscription-Token", key)
            .query(&[
                ("q", query_text),
                ("count", &limit.to_string()),
                ("search_lang", "en"),
                ("country", "us"),
                ("safesearch", "moderate"),
                ("result_filter", "web,news"),
            ])
            .send()
            .await
            .map_err(|e| {
                ProviderFailure::transient(format!("request failed: {e}"), self.search_config.short_ignore_secs)
            })?;

        let status = resp.status().as_u16();
        let body: Value = resp.json().await.map_err(|e| {
            ProviderFailure::transient(format!("json decode error: {e}"), self.search_config.short_ignore_secs)
        })?;

        let parsed = brave::parse_response(&body, status);
        match parsed.outcome {
            BraveOutcome::Success => Ok(parsed
                .results
                .into_iter()
                .map(|r| RawResult { url: r.url, title: r.title, description: r.description })
                .collect()),
            BraveOutcome::RateLimit => Err(ProviderFailure::transient(
                format!("API Error: {}", parsed.error_message.unwrap_or_default()),
                self.search_config.default_ignore_secs,
            )),
            BraveOutcome::AuthError => Err(ProviderFailure::transient(
                format!("API Error: {}", parsed.error_message.unwrap_or_default()),
                self.search_config.fatal_ignore_secs,
            )),
            BraveOutcome::Error | BraveOutcome::Unexpected => Err(ProviderFailure::transient(
                format!("API Error: {}", parsed.error_message.unwrap_or_default()),
                self.search_config.default_ignore_secs,
            )),
        }
    }

    // ── Google Custom Search ───────────────────────────────────

    /// Any exception here is treated as fatal for the provider: consistent
    /// 4xx from Google means quota or key trouble, not a flaky network.
    async fn search_google(
        &self,
        query_text: &str,
        limit: usize,
        credentials: &ApiCredentials,
    ) -> ProviderResult {
        let (Some(key), Some(cx)) = (
            credentials.google_api_key.as_deref().filter(|k| !k.is_empty()),
            credentials.google_cx.as_deref().filter(|c| !c.is_empty()),
        ) else {
            return Ok(vec![]);
        };

        let fatal = |msg: String| {
            ProviderFailure::transient(
                format!("Fatal Error: Google Custom Search failed: {msg}"),
                self.search_config.fatal_ignore_secs,
            )
        };

        let resp = self
            .client
            .get("https://www.googleapis.com/customsearch/v1")
            .query(&[
                ("key", key),
                ("cx", cx),
                ("q", query_text),
                ("num", &limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| fatal(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(fatal(format!("HTTP {}", resp.status())));
        }
        let body: Value = resp.json().await.map_err(|e| fatal(e.to_string()))?;
        Ok(body["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|i| RawResult {
                        url: i["link"].as_str().map(str::to_string),
                        title: i["title"].as_str().map(str::to_string),
                        description: i["snippet"].as_str().map(str::to_string),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    // ── Bing ───────────────────────────────────────────────────

    async fn search_bing(
        &self,
        query_text: &str,
        limit: usize,
        credentials: &ApiCredentials,
    ) -> ProviderResult {
        let Some(key) = credentials.bing_api_key.as_deref().filter(|k| !k.is_empty()) else {
            return Ok(vec![]);
        };

        let fatal = |msg: String| {
            ProviderFailure::transient(
                format!("Fatal Error: Bing Search failed: {msg}"),
                self.search_config.fatal_ignore_secs,
            )
        };

        let resp = self
            .client
            .get("https://api.bing.microsoft.com/v7.0/search")
            .header("Ocp-Apim-Subscription-Key", key)
            .query(&[("q", query_text), ("count", &limit.to_string()), ("mkt", "en-US")])
            .send()
            .await
            .map_err(|e| fatal(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(fatal(format!("HTTP {}", resp.status())));
        }
        let body: Value = resp.json().await.map_err(|e| fatal(e.to_string()))?;
        Ok(body["webPages"]["value"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|i| RawResult {
                        url: i["url"].as_str().map(str::to_string),
                        title: i["name"].as_str().map(str::to_string),
                        description: i["snippet"].as_str().map(str::to_string),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    // ── Wikipedia ──────────────────────────────────────────────

    /// Title lookup against the English Wikipedia API with the
    /// keyword-reduced query; at most one result.
    async fn search_wikipedia(&self, keywords: &str) -> ProviderResult {
        let resp = self
            .client
            .get("https://en.wikipedia.org/w/api.php")
            .query(&[
                ("action", "query"),
                ("format", "json"),
                ("titles", keywords),
                ("prop", "extracts|info"),
                ("exintro", "1"),
                ("explaintext", "1"),
                ("redirects", "1"),
                ("inprop", "url"),
            ])
            .send()
            .await
            .map_err(|e| ProviderFailure::unmarked(e.to_string()))?;

        let body: Value = resp
            .json()
            .await
            .map_err(|e| ProviderFailure::unmarked(e.to_string()))?;

        let Some(pages) = body["query"]["pages"].as_object() else {
            return Ok(vec![]);
        };
        for (page_id, page) in pages {
            if page_id == "-1" {
                continue;
            }
            let extract = page["extract"].as_str().unwrap_or("");
            if extract.is_empty() {
                continue;
            }
            let summary: String = extract.chars().take(3000).collect();
            return Ok(vec![RawResult {
                url: page["fullurl"].as_str().map(str::to_string),
                title: page["title"].as_str().map(str::to_string),
                description: Some(summary),
            }]);
        }
        Ok(vec![])
    }

    // ── OpenAlex ───────────────────────────────────────────────

    async fn search_openalex(&self, keywords: &str, limit: usize) -> ProviderResult {
        if keywords.is_empty() {
            return Ok(vec![]);
        }
        let per_page = limit.clamp(1, 50);
        let resp = self
            .client
            .get("https://api.openalex.org/works")
            .query(&[
                ("search", keywords),
                ("per-page", &per_page.to_string()),
                ("page", "1"),
            ])
            .send()
            .await
            .map_err(|e| ProviderFailure::unmarked(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ProviderFailure::unmarked(format!("HTTP {}", resp.status())));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| ProviderFailure::unmarked(e.to_string()))?;

        let mut out = Vec::new();
        for work in body["results"].as_array().map(|a| a.as_slice()).unwrap_or(&[]) {
            if out.len() >= limit {
                break;
            }
            let abstract_text = work["abstract_inverted_index"]
                .as_object()
                .map(reconstruct_inverted_abstract);

            let primary = &work["primary_location"];
            let mut best_url = primary["landing_page_url"].as_str().map(str::to_string);
            if best_url.is_none() && primary["is_oa"].as_bool().unwrap_or(false) {
                best_url = primary["pdf_url"].as_str().map(str::to_string);
            }
            if best_url.is_none() {
                best_url = work["id"].as_str().map(str::to_string);
            }

            out.push(RawResult {
                url: best_url,
                title: work["title"].as_str().map(str::to_string),
                description: abstract_text,
            });
        }
        Ok(out)
    }

    // ── CourtListener ──────────────────────────────────────────

    async fn search_courtlistener(
        &self,
        keywords: &str,
        limit: usize,
        credentials: &ApiCredentials,
    ) -> ProviderResult {
        let Some(token) = credentials
            .courtlistener_api_key
            .as_deref()
            .filter(|k| !k.is_empty())
        else {
            return Ok(vec![]);
        };

        let resp = self
            .client
            .get("https://www.courtlistener.com/api/rest/v4/search/")
            .header("Authorization", format!("Token {token}"))
            .query(&[("q", keywords), ("type", "o"), ("count", &limit.to_string())])
            .send()
            .await
            .map_err(|e| ProviderFailure::unmarked(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ProviderFailure::unmarked(format!("HTTP {}", resp.status())));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| ProviderFailure::unmarked(e.to_string()))?;

        let mut out = Vec::new();
        for item in body["results"].as_array().map(|a| a.as_slice()).unwrap_or(&[]) {
            let url = item["absolute_url"].as_str().map(|u| {
                if u.starts_with("http://") || u.starts_with("https://") {
                    u.to_string()
                } else {
                    format!("https://www.courtlistener.com{u}")
                }
            });
            out.push(RawResult {
                url,
                title: item["caseName"].as_str().map(str::to_string),
                description: item["snippet"].as_str().map(str::to_string),
            });
        }
        Ok(out)
    }

    // ── Scraping with vetting ──────────────────────────────────

    /// Vet and fetch one URL: attach a trust profile, honour the domain
    /// blocklist, route academic sites through their strategy, everything
    /// else through the scrape subprocess.
    pub async fn scrape_url_with_vetting(
        &self,
        url: &str,
        original_source_info: HashMap<String, Value>,
        cancel: &CancellationToken,
    ) -> ScrapeOutput {
        let snippet = original_source_info
            .get("snippet")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let title = original_source_info
            .get("title")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let mut source_info = original_source_info;
        source_info
            .entry("url".into())
            .or_insert_with(|| Value::String(url.to_string()));
        source_info
            .entry("provider".into())
            .or_insert_with(|| Value::String("direct_scrape".into()));

        match query::domain_from_url(url) {
            Some(domain) => {
                if query::is_blocklisted(&domain, &self.search_config.domain_blocklist) {
                    info!(url, domain, "skipping blocklisted domain");
                    return ScrapeOutput::error(url, source_info, "domain blocklisted");
                }
                let trust = self.trust.get_or_create(&domain, url).await;
                merge_trust(&mut source_info, &trust);
            }
            None => {
                source_info
                    .entry("trust_score".into())
                    .or_insert_with(|| Value::from(0.3));
                source_info
                    .entry("source_trust_type".into())
                    .or_insert_with(|| Value::String("unparseable_domain".into()));
            }
        }

        if AcademicSiteHandler::is_academic_site(url) {
            return self
                .academic
                .handle(url, snippet.as_deref(), title.as_deref(), &self.scraper, source_info, cancel)
                .await;
        }
        self.scraper.scrape_url(url, source_info, cancel).await
    }
}

fn merge_trust(info: &mut HashMap<String, Value>, trust: &scour_core::TrustSignals) {
    info.insert("domain".into(), Value::String(trust.domain.clone()));
    info.insert("trust_score".into(), Value::from(trust.trust_score));
    info.insert("is_https".into(), Value::Bool(trust.is_https));
    if let Some(age) = trust.domain_age_days {
        info.insert("domain_age_days".into(), Value::from(age));
    }
    info.insert("reference_count".into(), Value::from(trust.reference_count));
    info.insert(
        "source_trust_type".into(),
        Value::String(trust.source_trust_type.clone()),
    );
}

/// "google_custom_search" → "Google Custom Search".
fn title_case(provider_key: &str) -> String {
    provider_key
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse the DuckDuckGo HTML results page. Result links point through a
/// redirect endpoint carrying the target in the `uddg` query parameter.
fn parse_duckduckgo_html(html: &str, limit: usize) -> Vec<RawResult> {
    use once_cell::sync::Lazy;
    use regex::Regex;

    static RESULT_LINK: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r#"(?is)<a[^>]+class="[^"]*result__a[^"]*"[^>]+href="([^"]+)"[^>]*>(.*?)</a>"#)
            .unwrap()
    });
    static SNIPPET: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r#"(?is)<a[^>]+class="[^"]*result__snippet[^"]*"[^>]*>(.*?)</a>"#).unwrap()
    });
    static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

    let snippets: Vec<String> = SNIPPET
        .captures_iter(html)
        .map(|c| TAG.replace_all(&c[1], " ").trim().to_string())
        .collect();

    let mut out = Vec::new();
    for (i, caps) in RESULT_LINK.captures_iter(html).enumerate() {
        if out.len() >= limit {
            break;
        }
        let href = &caps[1];
        let title = TAG.replace_all(&caps[2], " ").trim().to_string();
        let url = decode_ddg_redirect(href);
        if url.is_none() {
            continue;
        }
        out.push(RawResult {
            url,
            title: Some(title).filter(|t| !t.is_empty()),
            description: snippets.get(i).cloned(),
        });
    }
    out
}

fn decode_ddg_redirect(href: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        if !href.contains("uddg=") {
            return Some(href.to_string());
        }
    }
    // "//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com&rut=…"
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else if href.starts_with('/') {
        format!("https://duckduckgo.com{href}")
    } else {
        href.to_string()
    };
    let parsed = url::Url::parse(&absolute).ok()?;
    for (k, v) in parsed.query_pairs() {
        if k == "uddg" {
            return Some(v.into_owned());
        }
    }
    if parsed.scheme().starts_with("http") {
        Some(parsed.to_string())
    } else {
        None
    }
}

/// OpenAlex stores abstracts as `word → [positions]`; rebuild the prose by
/// sorting on the first position of each word.
fn reconstruct_inverted_abstract(index: &serde_json::Map<String, Value>) -> String {
    let mut positioned: Vec<(i64, &str)> = Vec::new();
    for (word, positions) in index {
        if let Some(arr) = positions.as_array() {
            for p in arr {
                if let Some(pos) = p.as_i64() {
                    positioned.push((pos, word.as_str()));
                }
            }
        }
    }
    positioned.sort_by_key(|(pos, _)| *pos);
    positioned
        .into_iter()
        .map(|(_, w)| w)
        .collect::<Vec<_>>()
        .join(" ")
}
