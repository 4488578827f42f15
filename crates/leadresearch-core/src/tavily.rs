use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::SearchConfig;
use crate::error::ResearchError;
use crate::search::{SearchRequest, WebSearch};
use crate::security::SecretValue;
use crate::sources::SearchResult;

/// Tavily API client for web search
pub struct TavilyClient {
    api_key: SecretValue,
    base_url: String,
    client: reqwest::Client,
}

/// Tavily search depth
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
enum SearchDepth {
    Basic,
    Advanced,
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: SearchDepth,
    max_results: usize,
    include_raw_content: bool,
    topic: &'a str,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    raw_content: Option<String>,
}

impl TavilyClient {
    pub fn new(config: &SearchConfig, api_key: SecretValue) -> Result<Self, ResearchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| ResearchError::Other(anyhow::anyhow!("failed to create HTTP client: {err}")))?;

        Ok(Self {
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl WebSearch for TavilyClient {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchResult>, ResearchError> {
        let unavailable = |reason: String| ResearchError::SearchUnavailable {
            query: request.query.clone(),
            reason,
        };

        let body = TavilyRequest {
            api_key: self.api_key.expose(),
            query: &request.query,
            search_depth: if request.include_raw_content {
                SearchDepth::Advanced
            } else {
                SearchDepth::Basic
            },
            max_results: request.max_results,
            include_raw_content: request.include_raw_content,
            topic: request.topic.as_str(),
        };

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|err| unavailable(format!("request failed: {err}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(unavailable(format!("Tavily API error {status}: {text}")));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|err| unavailable(format!("failed to parse Tavily response: {err}")))?;

        Ok(parsed
            .results
            .into_iter()
            .map(|r| SearchResult {
                url: r.url,
                title: r.title,
                content: r.content,
                raw_content: r.raw_content.filter(|raw| !raw.trim().is_empty()),
            })
            .collect())
    }
}
