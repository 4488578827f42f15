//! Research loop state machine.
//!
//! `GenerateQueries -> Search -> ExtractAndSummarize -> Reflect`, then either
//! `Done` or back to `Search` with the reflection's follow-up queries. Routing
//! lives in a static transition table; the driver applies each step's
//! [`StateDelta`] to the run state it owns and consults the table.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{OrchestratorConfig, PipelineConfig, ServiceConfig};
use crate::error::{Component, PartialProgress, ResearchError, RunFailure};
use crate::llm::{OpenAiClient, StructuredLlm};
use crate::metrics::{record_pass, record_run, record_step};
use crate::notes::NoteExtractor;
use crate::queries::QueryGenerator;
use crate::reflection::ReflectionEvaluator;
use crate::run_config::RunConfig;
use crate::schema::ExtractedRecord;
use crate::search::{SearchExecutor, SearchSettings, WebSearch};
use crate::sources::{SourceSet, format_sources};
use crate::state::{ResearchTask, RunState, StateDelta};
use crate::tavily::TavilyClient;
use crate::trace::{TraceCollector, TraceEvent, TraceSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    GenerateQueries,
    Search,
    ExtractAndSummarize,
    Reflect,
    Done,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::GenerateQueries => "generate_queries",
            Step::Search => "search",
            Step::ExtractAndSummarize => "extract_and_summarize",
            Step::Reflect => "reflect",
            Step::Done => "done",
        }
    }

    /// Component that owns the step's external calls.
    pub fn component(&self) -> Component {
        match self {
            Step::GenerateQueries => Component::QueryGenerator,
            Step::Search => Component::SearchExecutor,
            Step::ExtractAndSummarize => Component::NoteExtractor,
            Step::Reflect => Component::ReflectionEvaluator,
            Step::Done => Component::Orchestrator,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing input computed from the run state after a step's delta is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Proceed,
    Satisfied,
    BudgetExhausted,
    NeedsMoreResearch,
}

const TRANSITIONS: &[(Step, Condition, Step)] = &[
    (Step::GenerateQueries, Condition::Proceed, Step::Search),
    (Step::Search, Condition::Proceed, Step::ExtractAndSummarize),
    (Step::ExtractAndSummarize, Condition::Proceed, Step::Reflect),
    (Step::Reflect, Condition::Satisfied, Step::Done),
    (Step::Reflect, Condition::BudgetExhausted, Step::Done),
    (Step::Reflect, Condition::NeedsMoreResearch, Step::Search),
];

pub fn next_step(step: Step, condition: Condition) -> Option<Step> {
    TRANSITIONS
        .iter()
        .find(|(from, on, _)| *from == step && *on == condition)
        .map(|(_, _, to)| *to)
}

fn condition_after(step: Step, state: &RunState) -> Condition {
    match step {
        Step::Reflect if state.is_satisfactory() => Condition::Satisfied,
        Step::Reflect if state.within_reflection_budget() => Condition::NeedsMoreResearch,
        Step::Reflect => Condition::BudgetExhausted,
        _ => Condition::Proceed,
    }
}

/// Client handles for one run, passed by reference into every component.
#[derive(Clone)]
pub struct ResearchClients {
    pub llm: Arc<dyn StructuredLlm>,
    pub search: Arc<dyn WebSearch>,
}

impl ResearchClients {
    pub fn new(llm: Arc<dyn StructuredLlm>, search: Arc<dyn WebSearch>) -> Self {
        Self { llm, search }
    }

    /// Build the HTTP clients named by the service configuration.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ResearchError> {
        let llm = OpenAiClient::new(&config.llm, config.llm_api_key()?)?;
        let search = TavilyClient::new(&config.search, config.search_api_key()?)?;
        Ok(Self::new(Arc::new(llm), Arc::new(search)))
    }
}

/// Successful end of a research run.
#[derive(Debug, Clone, Serialize)]
pub struct ResearchOutcome {
    pub run_id: String,
    pub target: String,
    pub record: ExtractedRecord,
    pub is_satisfactory: bool,
    /// Unsatisfactory reflections, i.e. the final loop counter.
    pub iterations: u32,
    /// Search/extract/reflect passes executed.
    pub passes: u32,
    pub missing_fields: Vec<String>,
    pub reasoning: String,
    pub notes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_results: Option<Vec<SourceSet>>,
    pub trace: TraceSummary,
    #[serde(skip)]
    pub trace_events: Vec<TraceEvent>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Drives the research loop for one task at a time.
pub struct ResearchRunner {
    clients: ResearchClients,
    executor: SearchExecutor,
    pipeline: PipelineConfig,
    retry: OrchestratorConfig,
    cancel: CancellationToken,
}

impl ResearchRunner {
    pub fn new(config: &ServiceConfig, clients: ResearchClients) -> Self {
        let executor = SearchExecutor::new(SearchSettings {
            topic: config.search.topic,
            max_concurrency: config.search.max_concurrency,
            failure_policy: config.pipeline.failure_policy,
        });
        Self {
            clients,
            executor,
            pipeline: config.pipeline.clone(),
            retry: config.orchestrator.clone(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[instrument(name = "research.run", skip_all, fields(target = %task.target))]
    pub async fn run(
        &self,
        task: ResearchTask,
        config: RunConfig,
    ) -> Result<ResearchOutcome, RunFailure> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let deadline = self.retry.run_timeout().map(|timeout| Instant::now() + timeout);
        let mut state = RunState::new(task, config);
        let mut trace = TraceCollector::new();
        let mut passes = 0u32;
        let mut step = Step::GenerateQueries;

        info!(
            %run_id,
            max_search_queries = config.max_search_queries,
            max_search_results = config.max_search_results,
            max_reflection_steps = config.max_reflection_steps,
            "research run started"
        );

        while step != Step::Done {
            let iteration = state.iteration;
            let started = Instant::now();
            let (delta, message) = match self.execute(step, &state, deadline).await {
                Ok(result) => result,
                Err(err) => return Err(self.fail(run_id, step, &state, &trace, err)),
            };

            state.apply(delta);
            if step == Step::Search {
                passes += 1;
                record_pass();
            }
            let duration_ms = started.elapsed().as_millis() as u64;
            record_step(step.as_str(), duration_ms);
            trace.record(step, iteration, duration_ms, message);

            let condition = condition_after(step, &state);
            step = match next_step(step, condition) {
                Some(next) => next,
                None => {
                    let err: ResearchError =
                        anyhow!("no transition from {step} on {condition:?}").into();
                    return Err(self.fail(run_id, step, &state, &trace, err));
                }
            };
        }

        let Some(record) = state.record.clone() else {
            let err: ResearchError = anyhow!("run finished without an extracted record").into();
            return Err(self.fail(run_id, Step::Done, &state, &trace, err));
        };
        let verdict = state.verdict.clone().unwrap_or_default();

        info!(
            %run_id,
            satisfactory = verdict.is_satisfactory,
            iterations = state.iteration,
            passes,
            "research run finished"
        );
        record_run(if verdict.is_satisfactory {
            "satisfactory"
        } else {
            "budget_exhausted"
        });

        let include = state.config.include_search_results;
        Ok(ResearchOutcome {
            run_id,
            target: state.task.target,
            record,
            is_satisfactory: verdict.is_satisfactory,
            iterations: state.iteration,
            passes,
            missing_fields: verdict.missing_fields,
            reasoning: verdict.reasoning,
            notes: state.notes,
            search_results: include.then_some(state.source_history),
            trace: trace.summary(),
            trace_events: trace.into_events(),
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn execute(
        &self,
        step: Step,
        state: &RunState,
        deadline: Option<Instant>,
    ) -> Result<(StateDelta, String), ResearchError> {
        let llm = self.clients.llm.as_ref();
        let task = &state.task;
        let config = &state.config;

        match step {
            Step::GenerateQueries => {
                let queries = self
                    .call_with_retries(step, deadline, move |correction| async move {
                        QueryGenerator
                            .generate(llm, task, config, correction.as_deref())
                            .await
                    })
                    .await?;
                let message = format!("{} queries: {}", queries.len(), queries.join(" | "));
                Ok((StateDelta::Queries(queries), message))
            }
            Step::Search => {
                let search = self.clients.search.as_ref();
                let queries = state.queries.as_slice();
                let executor = &self.executor;
                let batch = self
                    .call_with_retries(step, deadline, move |_| async move {
                        executor.execute(search, queries, config).await
                    })
                    .await?;
                let message = format!(
                    "{} queries, {} hits, {} unique sources, {} failed",
                    queries.len(),
                    batch.raw_hits,
                    batch.sources.len(),
                    batch.failed_queries.len()
                );
                Ok((StateDelta::Sources(batch.sources), message))
            }
            Step::ExtractAndSummarize => {
                let formatted = format_sources(
                    &state.current_sources,
                    self.pipeline.max_chars_per_source,
                    self.pipeline.prefer_raw_content,
                );
                let formatted = formatted.as_str();
                let prior_notes = state.notes.as_slice();
                let note = self
                    .call_with_retries(step, deadline, move |correction| async move {
                        NoteExtractor
                            .summarize(llm, task, formatted, prior_notes, correction.as_deref())
                            .await
                    })
                    .await?;

                let mut all_notes = state.notes.clone();
                all_notes.push(note.clone());
                let all_notes = all_notes.as_slice();
                let record = self
                    .call_with_retries(step, deadline, move |correction| async move {
                        NoteExtractor
                            .extract(llm, task, all_notes, correction.as_deref())
                            .await
                    })
                    .await?;

                let unfilled = record.unfilled_required(&task.schema);
                let message = if unfilled.is_empty() {
                    format!("note {} recorded; required fields filled", all_notes.len())
                } else {
                    format!(
                        "note {} recorded; unfilled required: {}",
                        all_notes.len(),
                        unfilled.join(", ")
                    )
                };
                Ok((StateDelta::Extraction { note, record }, message))
            }
            Step::Reflect => {
                let record = state
                    .record
                    .as_ref()
                    .ok_or_else(|| anyhow!("reflection reached without an extracted record"))?;
                let source_count = state.current_sources.len();
                let verdict = self
                    .call_with_retries(step, deadline, move |correction| async move {
                        ReflectionEvaluator
                            .reflect(llm, task, record, source_count, config, correction.as_deref())
                            .await
                    })
                    .await?;
                let message = if verdict.is_satisfactory {
                    "satisfactory".to_string()
                } else {
                    format!(
                        "unsatisfactory; missing {}; next queries: {}",
                        verdict.missing_fields.join(", "),
                        verdict.follow_up_queries.join(" | ")
                    )
                };
                Ok((StateDelta::Reflection(verdict), message))
            }
            Step::Done => Err(anyhow!("terminal step has nothing to execute").into()),
        }
    }

    /// Run one external call under the retry policy.
    ///
    /// Correctable failures are retried with a corrective instruction,
    /// transport failures with exponential backoff. Cancellation and the run
    /// deadline are checked before every attempt.
    async fn call_with_retries<T, F, Fut>(
        &self,
        step: Step,
        deadline: Option<Instant>,
        mut call: F,
    ) -> Result<T, ResearchError>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Result<T, ResearchError>>,
    {
        let mut corrections = 0;
        let mut transport_retries = 0;
        let mut backoff_ms = self.retry.initial_backoff_ms;
        let mut correction: Option<String> = None;

        loop {
            self.checkpoint(step, deadline)?;
            match call(correction.take()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_correctable() && corrections < self.retry.max_corrective_retries => {
                    corrections += 1;
                    warn!(%step, error = %err, attempt = corrections, "retrying with corrective instruction");
                    correction = Some(err.to_string());
                }
                Err(err) if err.is_retryable() && transport_retries < self.retry.max_transport_retries => {
                    transport_retries += 1;
                    warn!(%step, error = %err, attempt = transport_retries, backoff_ms, "transport failure, retrying");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(ResearchError::Cancelled { step }),
                        _ = tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)) => {}
                    }
                    backoff_ms = next_backoff(backoff_ms, self.retry.max_backoff_ms);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn checkpoint(&self, step: Step, deadline: Option<Instant>) -> Result<(), ResearchError> {
        let expired = deadline.is_some_and(|deadline| Instant::now() >= deadline);
        if self.cancel.is_cancelled() || expired {
            return Err(ResearchError::Cancelled { step });
        }
        Ok(())
    }

    fn fail(
        &self,
        run_id: String,
        step: Step,
        state: &RunState,
        trace: &TraceCollector,
        source: ResearchError,
    ) -> RunFailure {
        let component = match source {
            ResearchError::Cancelled { .. } => Component::Orchestrator,
            _ => step.component(),
        };
        let kind = source.kind();
        error!(%run_id, %component, %step, iteration = state.iteration, %kind, error = %source, "research run failed");
        record_run("failed");

        RunFailure {
            run_id,
            component,
            step,
            iteration: state.iteration,
            kind,
            source,
            partial: PartialProgress {
                notes: state.notes.clone(),
                last_record: state.record.clone(),
                pending_queries: state.queries.clone(),
                trace: trace.summary(),
            },
        }
    }
}

/// Double the delay, capped at `max_ms`.
fn next_backoff(current_ms: u64, max_ms: u64) -> u64 {
    current_ms.saturating_mul(2).min(max_ms)
}
