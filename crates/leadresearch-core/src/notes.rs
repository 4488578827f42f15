//! Note taking and schema extraction.
//!
//! `summarize` turns one iteration's sources into a note; `extract` rebuilds
//! the whole record from every note so far. Extraction never patches the
//! previous record.

use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

use crate::error::ResearchError;
use crate::llm::{ChatMessage, OutputShape, StructuredLlm, StructuredRequest};
use crate::prompts;
use crate::schema::ExtractedRecord;
use crate::state::ResearchTask;

#[derive(Debug, Deserialize)]
struct NotePayload {
    notes: String,
}

fn note_shape() -> OutputShape {
    OutputShape::new(
        "ResearchNotes",
        "Free-text research notes for one search pass",
        json!({
            "type": "object",
            "properties": {
                "notes": { "type": "string", "description": "Notes on the search results." }
            },
            "required": ["notes"]
        }),
    )
}

/// Join accumulated notes the way every prompt sees them.
pub fn format_notes(notes: &[String]) -> String {
    if notes.is_empty() {
        "(none)".to_string()
    } else {
        notes.join("\n\n")
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoteExtractor;

impl NoteExtractor {
    #[instrument(name = "notes.summarize", skip_all, fields(target = %task.target, prior = prior_notes.len()))]
    pub async fn summarize(
        &self,
        llm: &dyn StructuredLlm,
        task: &ResearchTask,
        formatted_sources: &str,
        prior_notes: &[String],
        correction: Option<&str>,
    ) -> Result<String, ResearchError> {
        let schema_json = serde_json::to_string_pretty(&task.schema.to_json_schema())
            .map_err(|err| ResearchError::Other(err.into()))?;
        let sources = if formatted_sources.trim().is_empty() {
            "(no sources were found in this pass)"
        } else {
            formatted_sources
        };

        let request = StructuredRequest::new(note_shape())
            .message(ChatMessage::system(prompts::NOTES_SYSTEM))
            .message(ChatMessage::user(prompts::notes(
                task,
                &schema_json,
                sources,
                &format_notes(prior_notes),
            )))
            .with_correction(correction);

        let payload: NotePayload = serde_json::from_value(llm.complete(request).await?)
            .map_err(|err| ResearchError::malformed(format!("expected `notes` text: {err}")))?;
        let note = payload.notes.trim().to_string();
        if note.is_empty() {
            return Err(ResearchError::malformed("model returned empty notes"));
        }

        info!(note_length = note.len(), "summarized search results");
        Ok(note)
    }

    #[instrument(name = "notes.extract", skip_all, fields(target = %task.target, notes = all_notes.len()))]
    pub async fn extract(
        &self,
        llm: &dyn StructuredLlm,
        task: &ResearchTask,
        all_notes: &[String],
        correction: Option<&str>,
    ) -> Result<ExtractedRecord, ResearchError> {
        let schema = &task.schema;
        let json_schema = schema.to_json_schema();
        let schema_json = serde_json::to_string_pretty(&json_schema)
            .map_err(|err| ResearchError::Other(err.into()))?;

        let request = StructuredRequest::new(OutputShape::new(
            schema.title.clone(),
            schema.description.clone(),
            json_schema,
        ))
        .message(ChatMessage::system(prompts::EXTRACTION_SYSTEM))
        .message(ChatMessage::user(prompts::extraction(
            task,
            &schema_json,
            &format_notes(all_notes),
        )))
        .with_correction(correction);

        let record = schema.validate(&llm.complete(request).await?)?;
        info!(
            unfilled_required = record.unfilled_required(schema).len(),
            "extracted schema record"
        );
        Ok(record)
    }
}
