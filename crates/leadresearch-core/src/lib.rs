//! Schema-directed company research.
//!
//! Given a target company and an extraction schema, the research loop
//! generates web search queries, fans them out concurrently, summarizes the
//! deduplicated sources into notes, extracts a schema-conformant record from
//! every note so far, and reflects on completeness, looping back to search
//! until the record is satisfactory or the reflection budget is spent.

pub mod config;
mod error;
pub mod llm;
mod metrics;
pub mod notes;
mod prompts;
pub mod queries;
pub mod reflection;
mod run_config;
mod schema;
pub mod search;
mod security;
mod sources;
mod state;
pub mod tavily;
mod telemetry;
mod trace;
mod workflow;

pub use config::{
    ConfigLoader, LlmConfig, LoggingConfig, OrchestratorConfig, PipelineConfig, SearchConfig,
    SearchTopic, ServiceConfig,
};
pub use error::{Component, ErrorKind, PartialProgress, ResearchError, RunFailure};
pub use llm::{ChatMessage, OpenAiClient, OutputShape, Role, StructuredLlm, StructuredRequest};
pub use metrics::init_metrics_from_env;
pub use notes::NoteExtractor;
pub use queries::QueryGenerator;
pub use reflection::ReflectionEvaluator;
pub use run_config::{ConfigOverrides, RunConfig};
pub use schema::{ExtractedRecord, ExtractionSchema, FieldKind, FieldSpec};
pub use search::{FailurePolicy, SearchBatch, SearchExecutor, SearchRequest, SearchSettings, WebSearch};
pub use security::{SecretValue, require_env};
pub use sources::{SearchResult, SourceSet, dedupe, format_sources};
pub use state::{ReflectionVerdict, ResearchTask, RunState, StateDelta};
pub use tavily::TavilyClient;
pub use telemetry::{TelemetryOptions, init_telemetry};
pub use trace::{TraceCollector, TraceEvent, TraceStep, TraceSummary, persist_trace};
pub use workflow::{
    Condition, ResearchClients, ResearchOutcome, ResearchRunner, Step, next_step,
};
