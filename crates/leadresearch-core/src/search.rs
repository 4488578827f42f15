//! Concurrent search fan-out for one iteration.
//!
//! One request per query, all in flight together (bounded by a semaphore),
//! joined before anything is deduplicated. No task touches run state; results
//! come back to the caller as a value.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::{join_all, try_join_all};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::config::SearchTopic;
use crate::error::ResearchError;
use crate::metrics::record_search_request;
use crate::run_config::RunConfig;
use crate::sources::{SearchResult, SourceSet, dedupe};

/// Parameters for a single web search call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub max_results: usize,
    pub include_raw_content: bool,
    pub topic: SearchTopic,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Fails with `SearchUnavailable` when this query cannot be served.
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, ResearchError>;
}

/// How a batch reacts to individual query failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep what succeeded; fail only when every query failed.
    #[default]
    PartialSuccess,
    /// Any failed query fails the batch.
    FailFast,
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub topic: SearchTopic,
    pub max_concurrency: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            topic: SearchTopic::General,
            max_concurrency: 8,
            failure_policy: FailurePolicy::PartialSuccess,
        }
    }
}

/// Deduplicated sources plus the queries that degraded recall.
#[derive(Debug, Clone, Default)]
pub struct SearchBatch {
    pub sources: SourceSet,
    pub raw_hits: usize,
    pub failed_queries: Vec<String>,
}

pub struct SearchExecutor {
    settings: SearchSettings,
    semaphore: Arc<Semaphore>,
}

impl SearchExecutor {
    pub fn new(settings: SearchSettings) -> Self {
        let semaphore = Arc::new(Semaphore::new(settings.max_concurrency.max(1)));
        Self {
            settings,
            semaphore,
        }
    }

    #[instrument(name = "search.execute", skip_all, fields(queries = queries.len()))]
    pub async fn execute(
        &self,
        client: &dyn WebSearch,
        queries: &[String],
        config: &RunConfig,
    ) -> Result<SearchBatch, ResearchError> {
        let requests: Vec<SearchRequest> = queries
            .iter()
            .map(|query| SearchRequest {
                query: query.clone(),
                max_results: config.max_search_results,
                include_raw_content: true,
                topic: self.settings.topic,
            })
            .collect();

        let batches = match self.settings.failure_policy {
            FailurePolicy::FailFast => {
                let batches =
                    try_join_all(requests.iter().map(|request| self.search_one(client, request)))
                        .await?;
                let raw_hits = batches.iter().map(Vec::len).sum();
                return Ok(SearchBatch {
                    sources: dedupe(batches),
                    raw_hits,
                    failed_queries: Vec::new(),
                });
            }
            FailurePolicy::PartialSuccess => {
                join_all(requests.iter().map(|request| self.search_one(client, request))).await
            }
        };

        let mut succeeded = Vec::with_capacity(batches.len());
        let mut failed_queries = Vec::new();
        let mut reasons = Vec::new();
        for (request, outcome) in requests.iter().zip(batches) {
            match outcome {
                Ok(results) => succeeded.push(results),
                Err(err) => {
                    warn!(query = %request.query, error = %err, "search query failed; continuing with remaining results");
                    failed_queries.push(request.query.clone());
                    reasons.push(err.to_string());
                }
            }
        }

        if succeeded.is_empty() && !requests.is_empty() {
            return Err(ResearchError::AllSearchesFailed {
                attempted: requests.len(),
                reasons,
            });
        }

        let raw_hits = succeeded.iter().map(Vec::len).sum();
        let sources = dedupe(succeeded);
        info!(
            raw_hits,
            unique_sources = sources.len(),
            failed = failed_queries.len(),
            "search batch joined"
        );

        Ok(SearchBatch {
            sources,
            raw_hits,
            failed_queries,
        })
    }

    async fn search_one(
        &self,
        client: &dyn WebSearch,
        request: &SearchRequest,
    ) -> Result<Vec<SearchResult>, ResearchError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|err| ResearchError::Other(anyhow::anyhow!("search semaphore closed: {err}")))?;

        let started = Instant::now();
        let outcome = client.search(request).await.map(|mut results| {
            results.truncate(request.max_results);
            results
        });
        let duration_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(results) => {
                debug!(query = %request.query, hits = results.len(), duration_ms, "search query returned");
                record_search_request("ok", duration_ms);
            }
            Err(_) => record_search_request("error", duration_ms),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ScriptedSearch {
        responses: HashMap<String, Result<Vec<SearchResult>, String>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedSearch {
        fn new(entries: Vec<(&str, Result<Vec<SearchResult>, String>)>) -> Self {
            Self {
                responses: entries
                    .into_iter()
                    .map(|(query, response)| (query.to_string(), response))
                    .collect(),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl WebSearch for ScriptedSearch {
        async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, ResearchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match self.responses.get(&request.query) {
                Some(Ok(results)) => Ok(results.clone()),
                Some(Err(reason)) => Err(ResearchError::SearchUnavailable {
                    query: request.query.clone(),
                    reason: reason.clone(),
                }),
                None => Ok(Vec::new()),
            }
        }
    }

    fn hit(url: &str) -> SearchResult {
        SearchResult::new(url, url, "excerpt")
    }

    fn queries(items: &[&str]) -> Vec<String> {
        items.iter().map(|q| q.to_string()).collect()
    }

    #[tokio::test]
    async fn partial_failure_degrades_recall() {
        let client = ScriptedSearch::new(vec![
            ("a", Ok(vec![hit("https://1"), hit("https://2")])),
            ("b", Err("502".into())),
        ]);
        let executor = SearchExecutor::new(SearchSettings::default());
        let batch = executor
            .execute(&client, &queries(&["a", "b"]), &RunConfig::default())
            .await
            .unwrap();

        assert_eq!(batch.sources.len(), 2);
        assert_eq!(batch.failed_queries, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn all_failures_escalate() {
        let client = ScriptedSearch::new(vec![("a", Err("timeout".into())), ("b", Err("502".into()))]);
        let executor = SearchExecutor::new(SearchSettings::default());
        let err = executor
            .execute(&client, &queries(&["a", "b"]), &RunConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ResearchError::AllSearchesFailed { attempted: 2, .. }));
    }

    #[tokio::test]
    async fn fail_fast_policy_aborts_on_first_failure() {
        let client = ScriptedSearch::new(vec![("a", Ok(vec![hit("https://1")])), ("b", Err("502".into()))]);
        let executor = SearchExecutor::new(SearchSettings {
            failure_policy: FailurePolicy::FailFast,
            ..SearchSettings::default()
        });
        let err = executor
            .execute(&client, &queries(&["a", "b"]), &RunConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ResearchError::SearchUnavailable { .. }));
    }

    #[tokio::test]
    async fn caps_results_per_query_and_dedupes_across_queries() {
        let client = ScriptedSearch::new(vec![
            ("a", Ok(vec![hit("https://1"), hit("https://2"), hit("https://3")])),
            ("b", Ok(vec![hit("https://1"), hit("https://4")])),
        ]);
        let config = RunConfig {
            max_search_results: 2,
            ..RunConfig::default()
        };
        let executor = SearchExecutor::new(SearchSettings::default());
        let batch = executor
            .execute(&client, &queries(&["a", "b"]), &config)
            .await
            .unwrap();

        assert_eq!(batch.raw_hits, 4);
        assert_eq!(
            batch.sources.urls(),
            vec!["https://1", "https://2", "https://4"]
        );
    }

    #[tokio::test]
    async fn queries_run_concurrently_within_the_limit() {
        let client = ScriptedSearch::new(vec![]);
        let executor = SearchExecutor::new(SearchSettings {
            max_concurrency: 2,
            ..SearchSettings::default()
        });
        executor
            .execute(&client, &queries(&["a", "b", "c", "d"]), &RunConfig::default())
            .await
            .unwrap();

        assert_eq!(client.peak.load(Ordering::SeqCst), 2);
    }
}
