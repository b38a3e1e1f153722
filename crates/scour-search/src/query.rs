//! Query classification and reduction helpers shared by the provider
//! dispatch layer.

use once_cell::sync::Lazy;
use std::collections::HashSet;
use url::Url;

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any",
        "are", "as", "at", "be", "because", "been", "before", "being", "below", "between",
        "both", "but", "by", "can", "did", "do", "does", "doing", "down", "during", "each",
        "few", "for", "from", "further", "had", "has", "have", "having", "he", "her", "here",
        "hers", "herself", "him", "himself", "his", "how", "i", "if", "in", "into", "is", "it",
        "its", "itself", "just", "me", "more", "most", "my", "myself", "no", "nor", "not",
        "now", "of", "off", "on", "once", "only", "or", "other", "our", "ours", "ourselves",
        "out", "over", "own", "s", "same", "she", "should", "so", "some", "such", "t", "than",
        "that", "the", "their", "theirs", "them", "themselves", "then", "there", "these",
        "they", "this", "those", "through", "to", "too", "under", "until", "up", "very", "was",
        "we", "were", "what", "when", "where", "which", "while", "who", "whom", "why", "will",
        "with", "you", "your", "yours", "yourself", "yourselves",
    ]
    .into_iter()
    .collect()
});

const LEGAL_KEYWORDS: [&str; 24] = [
    "case", "court", "legal", "law", "statute", "plaintiff", "defendant", "litigation",
    "judgment", "opinion", "docket", "appeal", "hearing", "attorney", "counsel", "legislation",
    "regulation", "precedent", "suit", "act", "bill", "ordinance", "compliance", "subpoena",
];

const CRYPTO_KEYWORDS: [&str; 13] = [
    "bitcoin", "ethereum", "crypto", "cryptocurrency", "blockchain", "usdc", "xrp", "ripple",
    "stablecoin", "digital asset", "ledger", "coin", "token",
];

/// Reduce a natural-language query to at most `max_keywords` non-stop-word
/// keywords for providers that want terms rather than sentences.
pub fn simplify_for_specialized_search(query: &str, max_keywords: usize) -> String {
    if query.is_empty() {
        return String::new();
    }
    let clean: String = query
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    let words: Vec<&str> = clean.split_whitespace().collect();
    if words.is_empty() {
        return String::new();
    }
    let keywords: Vec<&str> = words
        .iter()
        .copied()
        .filter(|w| !STOP_WORDS.contains(w))
        .take(max_keywords)
        .collect();
    if keywords.is_empty() {
        words[..words.len().min(max_keywords)].join(" ")
    } else {
        keywords.join(" ")
    }
}

/// A query is legal when it carries legal keywords and is not clearly a
/// crypto query (crypto news mentions "token"/"case" constantly).
pub fn is_legal_query(query: &str) -> bool {
    if query.is_empty() {
        return false;
    }
    let lower = query.to_lowercase();
    let has_legal = LEGAL_KEYWORDS.iter().any(|k| lower.contains(k));
    let has_crypto = CRYPTO_KEYWORDS.iter().any(|k| lower.contains(k));
    has_legal && !has_crypto
}

/// Hostname of an http(s) URL with any `www.` prefix stripped. `None` for
/// anything unparseable or non-web.
pub fn domain_from_url(url_str: &str) -> Option<String> {
    if !url_str.starts_with("http://") && !url_str.starts_with("https://") {
        return None;
    }
    let parsed = Url::parse(url_str).ok()?;
    let host = parsed.host_str()?;
    Some(host.strip_prefix("www.").unwrap_or(host).to_string())
}

pub fn is_https(url_str: &str) -> bool {
    Url::parse(url_str)
        .map(|u| u.scheme() == "https")
        .unwrap_or(false)
}

/// True when the domain (or a parent domain) is on the blocklist.
pub fn is_blocklisted(domain: &str, blocklist: &[String]) -> bool {
    blocklist.iter().any(|blocked| {
        domain == blocked.as_str() || domain.ends_with(&format!(".{blocked}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simplify_drops_stop_words_and_caps_count() {
        assert_eq!(
            simplify_for_specialized_search("what is the history of quantum computing", 3),
            "history quantum computing"
        );
        assert_eq!(simplify_for_specialized_search("", 3), "");
        // All stop words → fall back to the raw head of the query.
        assert_eq!(simplify_for_specialized_search("the of and", 3), "the of and");
    }

    #[test]
    fn legal_query_classification() {
        assert!(is_legal_query("supreme court opinion on data privacy"));
        assert!(!is_legal_query("bitcoin court case over token sale"));
        assert!(!is_legal_query("weather in lisbon"));
        assert!(!is_legal_query(""));
    }

    #[test]
    fn domain_extraction() {
        assert_eq!(
            domain_from_url("https://www.example.com/a/b").as_deref(),
            Some("example.com")
        );
        assert_eq!(domain_from_url("ftp://example.com"), None);
        assert_eq!(domain_from_url("not a url"), None);
    }

    #[test]
    fn blocklist_matches_subdomains() {
        let blocklist = vec!["pinterest.com".to_string()];
        assert!(is_blocklisted("pinterest.com", &blocklist));
        assert!(is_blocklisted("br.pinterest.com", &blocklist));
        assert!(!is_blocklisted("notpinterest.com", &blocklist));
    }
}
