//! Citation rewriting for the final report. The synthesis model is
//! instructed to cite as `[ref: FULL_URL]`; finalization collapses those
//! markers to short identifiers `S1…Sn` assigned in order of first
//! appearance and builds the matching sources section.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static LLM_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[ref:\s*([^\]]+?)\]").unwrap());

/// Assign short identifiers to URLs, extending an existing map without
/// renumbering. New URLs continue the sequence (`S<n+1>`, …).
pub fn resolve_urls(
    urls: impl IntoIterator<Item = String>,
    existing: Option<&HashMap<String, String>>,
) -> HashMap<String, String> {
    let mut mapping: HashMap<String, String> = existing.cloned().unwrap_or_default();
    let mut seen: HashMap<String, String> = mapping
        .iter()
        .map(|(ident, url)| (url.clone(), ident.clone()))
        .collect();
    let mut next = mapping.len() + 1;

    for url in urls {
        if seen.contains_key(&url) {
            continue;
        }
        let ident = format!("S{next}");
        seen.insert(url.clone(), ident.clone());
        mapping.insert(ident, url);
        next += 1;
    }
    mapping
}

/// Find `[ref: URL]` markers in a draft, assign `S1…Sn` to the unique URLs
/// in order of first appearance, and replace each marker with `[Sk]`.
/// Returns the rewritten text and the `identifier → URL` map.
pub fn extract_and_map_llm_citations(draft: &str) -> (String, HashMap<String, String>) {
    if draft.is_empty() {
        return (String::new(), HashMap::new());
    }

    let found_urls: Vec<String> = LLM_MARKER
        .captures_iter(draft)
        .filter_map(|caps| {
            let url = caps.get(1)?.as_str().trim();
            (!url.is_empty()).then(|| url.to_string())
        })
        .collect();

    if found_urls.is_empty() {
        // The model produced no citations in the expected format; leave the
        // text untouched.
        return (draft.to_string(), HashMap::new());
    }

    let ident_to_url = resolve_urls(found_urls, None);
    let url_to_ident: HashMap<&str, &str> = ident_to_url
        .iter()
        .map(|(ident, url)| (url.as_str(), ident.as_str()))
        .collect();

    let rewritten = LLM_MARKER.replace_all(draft, |caps: &regex::Captures<'_>| {
        let url = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        match url_to_ident.get(url) {
            Some(ident) => format!("[{ident}]"),
            None => caps.get(0).unwrap().as_str().to_string(),
        }
    });

    (rewritten.into_owned(), ident_to_url)
}

/// Replace literal URL occurrences with their markers. Longer URLs are
/// replaced first so a URL that prefixes another never clobbers it.
pub fn insert_citation_markers(text: &str, url_map: &HashMap<String, String>) -> String {
    if text.is_empty() {
        return String::new();
    }
    let mut entries: Vec<(&String, &String)> = url_map.iter().collect();
    entries.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    let mut processed = text.to_string();
    for (ident, url) in entries {
        processed = processed.replace(url.as_str(), &format!("[{ident}]"));
    }
    processed
}

/// The subset of the map whose markers actually appear in the text.
pub fn used_citations(text: &str, url_map: &HashMap<String, String>) -> HashMap<String, String> {
    url_map
        .iter()
        .filter(|(ident, _)| text.contains(&format!("[{ident}]")))
        .map(|(ident, url)| (ident.clone(), url.clone()))
        .collect()
}

/// Order identifiers `S1, S2, …` numerically for the sources section.
pub fn marker_order(ident: &str) -> usize {
    ident
        .trim_start_matches('S')
        .parse::<usize>()
        .unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_are_numbered_by_first_appearance() {
        let draft = "Claim A [ref: https://b.example]. Claim B [ref: https://a.example]. \
                     Repeat [ref: https://b.example].";
        let (text, map) = extract_and_map_llm_citations(draft);
        assert_eq!(map.get("S1").unwrap(), "https://b.example");
        assert_eq!(map.get("S2").unwrap(), "https://a.example");
        assert_eq!(text, "Claim A [S1]. Claim B [S2]. Repeat [S1].");
    }

    #[test]
    fn marker_match_is_case_insensitive_and_trims() {
        let draft = "X [REF:  https://x.example ] done";
        let (text, map) = extract_and_map_llm_citations(draft);
        assert_eq!(map.get("S1").unwrap(), "https://x.example");
        assert_eq!(text, "X [S1] done");
    }

    #[test]
    fn draft_without_markers_is_untouched_with_empty_map() {
        let draft = "No citations here.";
        let (text, map) = extract_and_map_llm_citations(draft);
        assert_eq!(text, draft);
        assert!(map.is_empty());
    }

    #[test]
    fn resolve_urls_extends_existing_map() {
        let first = resolve_urls(vec!["https://a".to_string()], None);
        let second = resolve_urls(
            vec!["https://a".to_string(), "https://b".to_string()],
            Some(&first),
        );
        assert_eq!(second.get("S1").unwrap(), "https://a");
        assert_eq!(second.get("S2").unwrap(), "https://b");
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn insert_markers_roundtrip() {
        let urls = vec![
            "https://example.com/long/path".to_string(),
            "https://example.com".to_string(),
        ];
        let map = resolve_urls(urls, None);
        let text = "See https://example.com/long/path and https://example.com for details";
        let marked = insert_citation_markers(text, &map);
        // Each provided URL that appears literally in the text now shows as
        // its marker, with the longer URL replaced first.
        assert!(marked.contains("[S1]"));
        assert!(marked.contains("[S2]"));
        assert!(!marked.contains("https://example.com/long/path"));
    }

    #[test]
    fn used_citations_filters_unused_markers() {
        let map = HashMap::from([
            ("S1".to_string(), "https://a".to_string()),
            ("S2".to_string(), "https://b".to_string()),
        ]);
        let used = used_citations("only [S1] cited", &map);
        assert_eq!(used.len(), 1);
        assert!(used.contains_key("S1"));
    }

    #[test]
    fn marker_ordering_is_numeric() {
        assert!(marker_order("S2") < marker_order("S10"));
    }
}
