//! Per-run step log: kept in memory, returned with the outcome or the
//! failure, optionally written to disk for diagnosis.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflow::Step;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub step: Step,
    /// Loop counter when the step started.
    pub iteration: u32,
    pub duration_ms: u64,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct TraceCollector {
    events: Vec<TraceEvent>,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step: Step, iteration: u32, duration_ms: u64, message: impl Into<String>) {
        self.events.push(TraceEvent {
            step,
            iteration,
            duration_ms,
            message: message.into(),
            recorded_at: Utc::now(),
        });
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    pub fn summary(&self) -> TraceSummary {
        TraceSummary::from_events(&self.events)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub index: usize,
    pub step: String,
    pub iteration: u32,
    pub duration_ms: u64,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSummary {
    /// Completed search steps.
    pub passes: u32,
    pub total_duration_ms: u64,
    pub steps: Vec<TraceStep>,
}

impl TraceSummary {
    pub fn from_events(events: &[TraceEvent]) -> Self {
        let steps: Vec<TraceStep> = events
            .iter()
            .enumerate()
            .map(|(idx, event)| TraceStep {
                index: idx + 1,
                step: event.step.as_str().to_string(),
                iteration: event.iteration,
                duration_ms: event.duration_ms,
                message: event.message.clone(),
            })
            .collect();
        Self {
            passes: events.iter().filter(|event| event.step == Step::Search).count() as u32,
            total_duration_ms: events.iter().map(|event| event.duration_ms).sum(),
            steps,
        }
    }

    /// Markdown listing with one heading per loop iteration.
    pub fn render_markdown(&self) -> String {
        if self.steps.is_empty() {
            return "No steps recorded.".to_string();
        }

        let mut output = format!(
            "### Research trace ({} passes, {} ms)\n",
            self.passes, self.total_duration_ms
        );
        let mut current = None;
        for step in &self.steps {
            if current != Some(step.iteration) {
                current = Some(step.iteration);
                let _ = writeln!(output, "\n#### Iteration {}", step.iteration);
            }
            let _ = writeln!(
                output,
                "{}. `{}` ({} ms): {}",
                step.index, step.step, step.duration_ms, step.message
            );
        }
        output
    }
}

/// Write `events` to `<dir>/<run_id>.json`, creating `dir` if needed.
pub fn persist_trace<P: AsRef<Path>>(dir: P, run_id: &str, events: &[TraceEvent]) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create trace directory {}", dir.display()))?;
    let path = dir.join(format!("{run_id}.json"));
    let payload = serde_json::to_vec_pretty(events).context("failed to serialise trace")?;
    fs::write(&path, payload)
        .with_context(|| format!("failed to write trace file {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> TraceCollector {
        let mut collector = TraceCollector::new();
        collector.record(Step::GenerateQueries, 0, 12, "2 queries");
        collector.record(Step::Search, 0, 40, "3 hits, 2 unique sources");
        collector.record(Step::Reflect, 0, 8, "unsatisfactory");
        collector.record(Step::Search, 1, 30, "1 hit, 1 unique source");
        collector
    }

    #[test]
    fn summary_counts_passes_and_time() {
        let summary = collector().summary();
        assert_eq!(summary.passes, 2);
        assert_eq!(summary.total_duration_ms, 90);
        assert_eq!(summary.steps[1].step, "search");
    }

    #[test]
    fn markdown_groups_steps_by_iteration() {
        let markdown = collector().summary().render_markdown();

        assert!(markdown.starts_with("### Research trace (2 passes, 90 ms)"));
        assert!(markdown.contains("#### Iteration 0\n1. `generate_queries` (12 ms): 2 queries"));
        assert!(markdown.contains("#### Iteration 1\n4. `search`"));
    }

    #[test]
    fn empty_trace_renders_placeholder() {
        assert_eq!(TraceSummary::default().render_markdown(), "No steps recorded.");
    }

    #[test]
    fn persists_events_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("traces");

        let path = persist_trace(&nested, "run-1", collector().events()).unwrap();
        let stored: Vec<TraceEvent> = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();

        assert_eq!(path.file_name().unwrap(), "run-1.json");
        assert_eq!(stored.len(), 4);
        assert_eq!(stored[3].step, Step::Search);
        assert_eq!(stored[3].iteration, 1);
    }
}
