//! Completeness judgement over the extracted record.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::error::ResearchError;
use crate::llm::{ChatMessage, OutputShape, StructuredLlm, StructuredRequest};
use crate::prompts;
use crate::run_config::RunConfig;
use crate::schema::ExtractedRecord;
use crate::state::{ReflectionVerdict, ResearchTask};

/// Upper bound on follow-up queries per reflection.
pub const MAX_FOLLOW_UP_QUERIES: usize = 3;

#[derive(Debug, Deserialize)]
struct VerdictPayload {
    is_satisfactory: bool,
    #[serde(default)]
    missing_fields: Vec<String>,
    #[serde(default)]
    follow_up_queries: Vec<Value>,
    #[serde(default)]
    reasoning: String,
}

fn verdict_shape() -> OutputShape {
    OutputShape::new(
        "ReflectionOutput",
        "Whether the extracted information is complete, and searches to fill the gaps",
        json!({
            "type": "object",
            "properties": {
                "is_satisfactory": {
                    "type": "boolean",
                    "description": "True if all required fields are well populated"
                },
                "missing_fields": {
                    "type": "array", "items": { "type": "string" },
                    "description": "Fields that are missing or incomplete"
                },
                "follow_up_queries": {
                    "type": "array", "items": { "type": "string" },
                    "description": "Search queries that would fill the gaps"
                },
                "reasoning": {
                    "type": "string",
                    "description": "Brief explanation of the assessment"
                }
            },
            "required": ["is_satisfactory", "missing_fields", "follow_up_queries", "reasoning"]
        }),
    )
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReflectionEvaluator;

impl ReflectionEvaluator {
    #[instrument(name = "reflection.reflect", skip_all, fields(target = %task.target, sources = source_count))]
    pub async fn reflect(
        &self,
        llm: &dyn StructuredLlm,
        task: &ResearchTask,
        record: &ExtractedRecord,
        source_count: usize,
        config: &RunConfig,
        correction: Option<&str>,
    ) -> Result<ReflectionVerdict, ResearchError> {
        let cap = MAX_FOLLOW_UP_QUERIES.min(config.max_search_queries);
        let unfilled = record.unfilled_required(&task.schema);
        let record_json = serde_json::to_string_pretty(&record.as_value())
            .map_err(|err| ResearchError::Other(err.into()))?;

        let request = StructuredRequest::new(verdict_shape())
            .message(ChatMessage::system(prompts::REFLECTION_SYSTEM))
            .message(ChatMessage::user(prompts::reflection(
                task,
                &task.schema.describe(),
                &record_json,
                &unfilled,
                source_count,
                cap,
            )))
            .with_correction(correction);

        let payload: VerdictPayload = serde_json::from_value(llm.complete(request).await?)
            .map_err(|err| ResearchError::malformed(format!("unreadable reflection verdict: {err}")))?;

        let gaps = record.completeness_gaps(&task.schema);
        let verdict = settle_verdict(payload, task, &gaps, cap)?;
        info!(
            satisfactory = verdict.is_satisfactory,
            missing = ?verdict.missing_fields,
            follow_ups = verdict.follow_up_queries.len(),
            "reflection verdict"
        );
        Ok(verdict)
    }
}

/// Enforce the verdict contract on a parsed model response.
///
/// A satisfactory verdict carries no queries. An unsatisfactory one carries
/// 1..=`cap` queries. Any completeness gap (an empty required field, or a
/// record with nothing filled) makes the verdict unsatisfactory; if the model
/// offered no queries for the gaps, one query per field is derived from its
/// description.
fn settle_verdict(
    payload: VerdictPayload,
    task: &ResearchTask,
    gaps: &[String],
    cap: usize,
) -> Result<ReflectionVerdict, ResearchError> {
    let mut queries = Vec::new();
    for item in payload.follow_up_queries {
        let Value::String(text) = item else {
            return Err(ResearchError::malformed("follow-up queries must be strings"));
        };
        let text = text.trim();
        if !text.is_empty() && queries.len() < cap {
            queries.push(text.to_string());
        }
    }

    let mut missing_fields = payload.missing_fields;
    let mut is_satisfactory = payload.is_satisfactory;
    let mut reasoning = payload.reasoning;

    if is_satisfactory && !gaps.is_empty() {
        warn!(fields = ?gaps, "model judged record satisfactory with empty fields");
        is_satisfactory = false;
        reasoning = format!("Fields are still empty: {}. {reasoning}", gaps.join(", "));
        if queries.is_empty() {
            queries = gaps
                .iter()
                .take(cap)
                .map(|name| {
                    let description = task
                        .schema
                        .field(name)
                        .map(|field| field.description.as_str())
                        .filter(|text| !text.is_empty())
                        .unwrap_or(name.as_str());
                    format!("{} {}", task.target, description)
                })
                .collect();
        }
    }

    if is_satisfactory {
        return Ok(ReflectionVerdict {
            is_satisfactory,
            missing_fields: Vec::new(),
            follow_up_queries: Vec::new(),
            reasoning,
        });
    }

    if queries.is_empty() {
        return Err(ResearchError::malformed(
            "unsatisfactory verdict must include at least one follow-up query",
        ));
    }
    for name in gaps {
        if !missing_fields.contains(name) {
            missing_fields.push(name.clone());
        }
    }

    Ok(ReflectionVerdict {
        is_satisfactory,
        missing_fields,
        follow_up_queries: queries,
        reasoning,
    })
}
