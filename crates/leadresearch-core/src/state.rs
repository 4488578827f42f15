//! Run inputs and the mutable aggregate owned by the orchestrator.
//!
//! Components never mutate [`RunState`]; they return a [`StateDelta`] and the
//! orchestrator applies it between steps.

use serde::{Deserialize, Serialize};

use crate::run_config::RunConfig;
use crate::schema::{ExtractedRecord, ExtractionSchema};
use crate::sources::SourceSet;

/// Immutable inputs of one research run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchTask {
    pub target: String,
    pub schema: ExtractionSchema,
    #[serde(default)]
    pub user_notes: Vec<String>,
}

impl ResearchTask {
    pub fn new(target: impl Into<String>, schema: ExtractionSchema) -> Self {
        Self {
            target: target.into(),
            schema,
            user_notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.user_notes.push(note.into());
        self
    }

    pub fn formatted_user_notes(&self) -> String {
        if self.user_notes.is_empty() {
            "(none)".to_string()
        } else {
            self.user_notes.join("\n")
        }
    }
}

/// Completeness judgement on the current record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReflectionVerdict {
    pub is_satisfactory: bool,
    #[serde(default)]
    pub missing_fields: Vec<String>,
    #[serde(default)]
    pub follow_up_queries: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

/// Result of one step, applied atomically to [`RunState`].
#[derive(Debug, Clone)]
pub enum StateDelta {
    Queries(Vec<String>),
    Sources(SourceSet),
    Extraction { note: String, record: ExtractedRecord },
    Reflection(ReflectionVerdict),
}

#[derive(Debug, Clone)]
pub struct RunState {
    pub task: ResearchTask,
    pub config: RunConfig,
    pub queries: Vec<String>,
    pub notes: Vec<String>,
    pub record: Option<ExtractedRecord>,
    pub verdict: Option<ReflectionVerdict>,
    /// Unsatisfactory reflections so far.
    pub iteration: u32,
    /// Sources of the current iteration, consumed by extraction.
    pub current_sources: SourceSet,
    /// Every iteration's sources; only kept when `include_search_results` is set.
    pub source_history: Vec<SourceSet>,
}

impl RunState {
    pub fn new(task: ResearchTask, config: RunConfig) -> Self {
        Self {
            task,
            config,
            queries: Vec::new(),
            notes: Vec::new(),
            record: None,
            verdict: None,
            iteration: 0,
            current_sources: SourceSet::default(),
            source_history: Vec::new(),
        }
    }

    pub fn apply(&mut self, delta: StateDelta) {
        match delta {
            StateDelta::Queries(queries) => self.queries = queries,
            StateDelta::Sources(sources) => {
                if self.config.include_search_results {
                    self.source_history.push(sources.clone());
                }
                self.current_sources = sources;
            }
            StateDelta::Extraction { note, record } => {
                self.notes.push(note);
                self.record = Some(record);
            }
            StateDelta::Reflection(verdict) => {
                if !verdict.is_satisfactory {
                    self.iteration = self.iteration.saturating_add(1);
                    self.queries = verdict.follow_up_queries.clone();
                }
                self.verdict = Some(verdict);
            }
        }
    }

    pub fn is_satisfactory(&self) -> bool {
        self.verdict
            .as_ref()
            .is_some_and(|verdict| verdict.is_satisfactory)
    }

    /// The loop may run another pass while the counter stays within the bound.
    pub fn within_reflection_budget(&self) -> bool {
        self.iteration <= self.config.max_reflection_steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{SearchResult, dedupe};

    fn state(include: bool) -> RunState {
        let config = RunConfig {
            include_search_results: include,
            ..RunConfig::default()
        };
        RunState::new(
            ResearchTask::new("Acme Corp", ExtractionSchema::company_default()),
            config,
        )
    }

    fn unsatisfied(queries: &[&str]) -> ReflectionVerdict {
        ReflectionVerdict {
            is_satisfactory: false,
            missing_fields: vec!["founding_year".into()],
            follow_up_queries: queries.iter().map(|q| q.to_string()).collect(),
            reasoning: "year unknown".into(),
        }
    }

    #[test]
    fn unsatisfactory_reflection_replaces_queries_and_counts() {
        let mut state = state(false);
        state.apply(StateDelta::Queries(vec!["a".into(), "b".into()]));
        state.apply(StateDelta::Reflection(unsatisfied(&["c"])));

        assert_eq!(state.queries, vec!["c".to_string()]);
        assert_eq!(state.iteration, 1);
        assert!(!state.is_satisfactory());
    }

    #[test]
    fn satisfactory_reflection_keeps_counter() {
        let mut state = state(false);
        state.apply(StateDelta::Reflection(ReflectionVerdict {
            is_satisfactory: true,
            ..ReflectionVerdict::default()
        }));
        assert_eq!(state.iteration, 0);
        assert!(state.is_satisfactory());
    }

    #[test]
    fn notes_accumulate_and_record_is_replaced() {
        let mut state = state(false);
        let schema = state.task.schema.clone();
        let first = schema.validate(&serde_json::json!({"company_name": "Acme"})).unwrap();
        let second = schema
            .validate(&serde_json::json!({"company_name": "Acme Corp", "founding_year": 1949}))
            .unwrap();

        state.apply(StateDelta::Extraction { note: "n1".into(), record: first });
        state.apply(StateDelta::Extraction { note: "n2".into(), record: second.clone() });

        assert_eq!(state.notes, vec!["n1".to_string(), "n2".to_string()]);
        assert_eq!(state.record, Some(second));
    }

    #[test]
    fn source_history_only_kept_when_requested() {
        let sources = dedupe(vec![vec![SearchResult::new("https://a", "A", "x")]]);

        let mut without = state(false);
        without.apply(StateDelta::Sources(sources.clone()));
        assert!(without.source_history.is_empty());
        assert_eq!(without.current_sources.len(), 1);

        let mut with = state(true);
        with.apply(StateDelta::Sources(sources));
        assert_eq!(with.source_history.len(), 1);
    }

    #[test]
    fn budget_allows_max_plus_one_passes() {
        let mut state = state(false);
        state.config.max_reflection_steps = 1;
        state.apply(StateDelta::Reflection(unsatisfied(&["q"])));
        assert!(state.within_reflection_budget());
        state.apply(StateDelta::Reflection(unsatisfied(&["q"])));
        assert!(!state.within_reflection_budget());
    }
}
