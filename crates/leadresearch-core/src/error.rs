use std::{fmt, path::PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::schema::ExtractedRecord;
use crate::trace::TraceSummary;
use crate::workflow::Step;

/// Core error type for lead research runs.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed model output: {0}")]
    MalformedModelOutput(String),
    #[error("extracted record does not conform to schema: {}", violations.join("; "))]
    SchemaConformance { violations: Vec<String> },
    #[error("search unavailable for {query:?}: {reason}")]
    SearchUnavailable { query: String, reason: String },
    #[error("all {attempted} search queries failed: {}", reasons.join("; "))]
    AllSearchesFailed {
        attempted: usize,
        reasons: Vec<String>,
    },
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("run cancelled before {step}")]
    Cancelled { step: Step },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ResearchError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedModelOutput(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::MissingSecret(_) | Self::ConfigIo { .. } => ErrorKind::Config,
            Self::MalformedModelOutput(_) => ErrorKind::MalformedModelOutput,
            Self::SchemaConformance { .. } => ErrorKind::SchemaConformance,
            Self::SearchUnavailable { .. } | Self::AllSearchesFailed { .. } => {
                ErrorKind::SearchUnavailable
            }
            Self::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Transport failures that may succeed when the same call is repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ModelUnavailable(_))
    }

    /// Model output failures that a corrective instruction can fix.
    pub fn is_correctable(&self) -> bool {
        matches!(
            self,
            Self::MalformedModelOutput(_) | Self::SchemaConformance { .. }
        )
    }
}

/// Coarse classification reported with run failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    MalformedModelOutput,
    SchemaConformance,
    SearchUnavailable,
    ModelUnavailable,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::MalformedModelOutput => "malformed_model_output",
            ErrorKind::SchemaConformance => "schema_conformance",
            ErrorKind::SearchUnavailable => "search_unavailable",
            ErrorKind::ModelUnavailable => "model_unavailable",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline component that owned the failing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    QueryGenerator,
    SearchExecutor,
    NoteExtractor,
    ReflectionEvaluator,
    Orchestrator,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::QueryGenerator => "query_generator",
            Component::SearchExecutor => "search_executor",
            Component::NoteExtractor => "note_extractor",
            Component::ReflectionEvaluator => "reflection_evaluator",
            Component::Orchestrator => "orchestrator",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whatever the run had committed before it failed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PartialProgress {
    pub notes: Vec<String>,
    pub last_record: Option<ExtractedRecord>,
    pub pending_queries: Vec<String>,
    pub trace: TraceSummary,
}

/// Terminal failure of a research run.
#[derive(Debug, Error)]
#[error("{component} failed during {step} (iteration {iteration}, {kind}): {source}")]
pub struct RunFailure {
    pub run_id: String,
    pub component: Component,
    pub step: Step,
    pub iteration: u32,
    pub kind: ErrorKind,
    #[source]
    pub source: ResearchError,
    pub partial: PartialProgress,
}

impl RunFailure {
    /// JSON view for callers that surface the failure (the source error is rendered as text).
    pub fn to_report(&self) -> serde_json::Value {
        serde_json::json!({
            "run_id": self.run_id,
            "component": self.component,
            "step": self.step,
            "iteration": self.iteration,
            "kind": self.kind,
            "error": self.source.to_string(),
            "partial": self.partial,
        })
    }
}
