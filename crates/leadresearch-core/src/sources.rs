//! Search hits, per-iteration deduplication, and prompt formatting.

use std::collections::HashSet;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

pub const TRUNCATION_MARKER: &str = "... (content truncated)";
pub const NO_CONTENT_PLACEHOLDER: &str = "No content available";

/// One web search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
}

impl SearchResult {
    pub fn new(url: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            content: content.into(),
            raw_content: None,
        }
    }

    pub fn with_raw_content(mut self, raw: impl Into<String>) -> Self {
        self.raw_content = Some(raw.into());
        self
    }
}

/// Deduplicated hits of a single iteration, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceSet {
    sources: Vec<SearchResult>,
}

impl SourceSet {
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SearchResult> {
        self.sources.iter()
    }

    pub fn urls(&self) -> Vec<&str> {
        self.sources.iter().map(|source| source.url.as_str()).collect()
    }

    pub fn into_inner(self) -> Vec<SearchResult> {
        self.sources
    }
}

/// Flatten per-query batches and keep the first hit for each URL.
///
/// Order is query order, then per-query result order.
pub fn dedupe<I>(batches: I) -> SourceSet
where
    I: IntoIterator<Item = Vec<SearchResult>>,
{
    let mut seen = HashSet::new();
    let sources = batches
        .into_iter()
        .flatten()
        .filter(|result| seen.insert(result.url.clone()))
        .collect();
    SourceSet { sources }
}

/// Render sources as one text blob for the note-taking prompt.
///
/// Content longer than `max_chars_per_source` characters is cut at that
/// boundary and suffixed with [`TRUNCATION_MARKER`].
pub fn format_sources(sources: &SourceSet, max_chars_per_source: usize, prefer_raw: bool) -> String {
    let mut output = String::new();
    for (idx, source) in sources.iter().enumerate() {
        let title = if source.title.trim().is_empty() {
            "Untitled"
        } else {
            source.title.as_str()
        };
        let _ = write!(
            output,
            "SOURCE {}: {}\nURL: {}\n\nCONTENT:\n",
            idx + 1,
            title,
            source.url
        );

        let content = match (&source.raw_content, prefer_raw) {
            (Some(raw), true) if !raw.is_empty() => raw.as_str(),
            _ if !source.content.is_empty() => source.content.as_str(),
            _ => NO_CONTENT_PLACEHOLDER,
        };
        let _ = writeln!(output, "{}\n", truncate_chars(content, max_chars_per_source));
    }
    output
}

fn truncate_chars(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &content[..cut], TRUNCATION_MARKER),
        None => content.to_string(),
    }
}
