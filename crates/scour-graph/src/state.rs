use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use scour_core::{
    ApiCredentials, ContentChunk, ModelUsage, ReportSource, RequestParams, SearchResultItem,
};

/// The graph's working memory for one research task. Stages read the state
/// and return a [`StateDelta`]; the runner applies deltas between stages.
pub struct OverallState {
    pub task_id: String,
    pub user_id: String,
    pub original_query: String,
    pub request_params: RequestParams,
    pub credentials: ApiCredentials,
    pub start_time: Option<Instant>,
    pub aggregated_token_usage: Vec<ModelUsage>,
    /// Queries planned for the current hop.
    pub current_queries_for_hop: Vec<String>,
    /// Every query ever executed for this task.
    pub executed_search_queries: HashSet<String>,
    pub search_results_this_hop: Vec<SearchResultItem>,
    pub processed_chunks_this_hop: Vec<ContentChunk>,
    /// Task-wide chunk map; chunk ids are unique within a task.
    pub all_processed_chunks: HashMap<String, ContentChunk>,
    /// Monotonic — a URL is never visited twice.
    pub visited_urls: HashSet<String>,
    pub final_report_md: Option<String>,
    pub report_sources: Vec<ReportSource>,
    pub cancel: CancellationToken,
    pub task_date_context: Option<String>,
}

impl OverallState {
    pub fn new(
        task_id: String,
        user_id: String,
        request_params: RequestParams,
        credentials: ApiCredentials,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            user_id,
            original_query: request_params.initial_query.clone(),
            request_params,
            credentials,
            start_time: None,
            aggregated_token_usage: Vec::new(),
            current_queries_for_hop: Vec::new(),
            executed_search_queries: HashSet::new(),
            search_results_this_hop: Vec::new(),
            processed_chunks_this_hop: Vec::new(),
            all_processed_chunks: HashMap::new(),
            visited_urls: HashSet::new(),
            final_report_md: None,
            report_sources: Vec::new(),
            cancel,
            task_date_context: None,
        }
    }

    /// Apply a stage's delta. Set-valued fields merge; scalar fields
    /// replace.
    pub fn apply(&mut self, delta: StateDelta) {
        if let Some(v) = delta.start_time {
            self.start_time = Some(v);
        }
        if let Some(v) = delta.task_date_context {
            self.task_date_context = Some(v);
        }
        if let Some(v) = delta.current_queries_for_hop {
            self.current_queries_for_hop = v;
        }
        self.executed_search_queries.extend(delta.executed_search_queries);
        if let Some(v) = delta.search_results_this_hop {
            self.search_results_this_hop = v;
        }
        if let Some(v) = delta.processed_chunks_this_hop {
            self.processed_chunks_this_hop = v;
        }
        for (id, chunk) in delta.all_processed_chunks {
            self.all_processed_chunks.insert(id, chunk);
        }
        self.visited_urls.extend(delta.visited_urls);
        if let Some(v) = delta.final_report_md {
            self.final_report_md = Some(v);
        }
        if let Some(v) = delta.report_sources {
            self.report_sources = v;
        }
        self.aggregated_token_usage.extend(delta.token_usage);
    }
}

/// What one stage changed. Everything defaults to "no change".
#[derive(Default)]
pub struct StateDelta {
    pub start_time: Option<Instant>,
    pub task_date_context: Option<String>,
    pub current_queries_for_hop: Option<Vec<String>>,
    pub executed_search_queries: Vec<String>,
    pub search_results_this_hop: Option<Vec<SearchResultItem>>,
    pub processed_chunks_this_hop: Option<Vec<ContentChunk>>,
    pub all_processed_chunks: HashMap<String, ContentChunk>,
    pub visited_urls: Vec<String>,
    pub final_report_md: Option<String>,
    pub report_sources: Option<Vec<ReportSource>>,
    pub token_usage: Vec<ModelUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> OverallState {
        OverallState::new(
            "t1".into(),
            "u1".into(),
            RequestParams {
                initial_query: "q".into(),
                ..Default::default()
            },
            ApiCredentials::default(),
            CancellationToken::new(),
        )
    }

    #[test]
    fn visited_urls_merge_idempotently() {
        let mut s = state();
        s.apply(StateDelta {
            visited_urls: vec!["https://a".into(), "https://b".into()],
            ..Default::default()
        });
        s.apply(StateDelta {
            visited_urls: vec!["https://a".into()],
            ..Default::default()
        });
        assert_eq!(s.visited_urls.len(), 2);
    }

    #[test]
    fn scalar_fields_replace_and_sets_extend() {
        let mut s = state();
        s.apply(StateDelta {
            current_queries_for_hop: Some(vec!["q1".into()]),
            executed_search_queries: vec!["q0".into()],
            ..Default::default()
        });
        s.apply(StateDelta {
            current_queries_for_hop: Some(vec!["q2".into()]),
            executed_search_queries: vec!["q1".into()],
            ..Default::default()
        });
        assert_eq!(s.current_queries_for_hop, vec!["q2".to_string()]);
        assert_eq!(s.executed_search_queries.len(), 2);
    }
}
