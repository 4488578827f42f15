//! Prompt templates for the structured calls.

use crate::state::ResearchTask;

pub const QUERY_WRITER_SYSTEM: &str = "You are a search query generator tasked with creating \
targeted web search queries to gather specific information about a company.";

pub const NOTES_SYSTEM: &str = "You are a research analyst. You read raw web search results \
and write concise, factual notes about a company. Keep every fact traceable to a source URL.";

pub const EXTRACTION_SYSTEM: &str = "You extract structured information from research notes. \
Use only facts stated in the notes. Use null for any field the notes do not support.";

pub const REFLECTION_SYSTEM: &str = "You are a research quality reviewer. You decide whether \
extracted company information is complete and, if it is not, which searches would fill the gaps.";

pub fn query_writer(task: &ResearchTask, schema_json: &str, max_queries: usize) -> String {
    format!(
        "Company to research: {target}\n\n\
         Generate at most {max_queries} search queries that will help gather the information \
         described by this schema:\n\n{schema_json}\n\n\
         Notes already provided by the user:\n{user_notes}\n\n\
         Focus on fields that are not already answered by the user notes. Make each query \
         specific and self-contained. Respond with JSON: {{\"queries\": [\"...\"]}}.",
        target = task.target,
        user_notes = task.formatted_user_notes(),
    )
}

pub fn notes(task: &ResearchTask, schema_json: &str, sources: &str, prior_notes: &str) -> String {
    format!(
        "Company: {target}\n\n\
         Information to gather (schema):\n{schema_json}\n\n\
         Notes from the user:\n{user_notes}\n\n\
         Notes from earlier research passes:\n{prior_notes}\n\n\
         Search results from this pass:\n{sources}\n\n\
         Write notes covering every schema field these results shed light on. Record new facts \
         and corrections; do not repeat earlier notes. If the results contain nothing relevant, \
         say so explicitly. Respond with JSON: {{\"notes\": \"...\"}}.",
        target = task.target,
        user_notes = task.formatted_user_notes(),
    )
}

pub fn extraction(task: &ResearchTask, schema_json: &str, all_notes: &str) -> String {
    format!(
        "Company: {target}\n\n\
         Research notes (all passes, oldest first):\n{all_notes}\n\n\
         Fill in this schema from the notes. Return one JSON object with exactly the schema's \
         fields and no others:\n\n{schema_json}",
        target = task.target,
    )
}

pub fn reflection(
    task: &ResearchTask,
    schema_description: &str,
    record_json: &str,
    unfilled_required: &[String],
    source_count: usize,
    max_queries: usize,
) -> String {
    let unfilled = if unfilled_required.is_empty() {
        "(none)".to_string()
    } else {
        unfilled_required.join(", ")
    };
    format!(
        "Company: {target}\n\n\
         Schema fields:\n{schema_description}\n\n\
         Extracted information:\n{record_json}\n\n\
         Required fields that are still empty: {unfilled}\n\
         Unique sources found in the latest search pass: {source_count}\n\n\
         Decide whether the information is satisfactory: every required field is populated \
         with a specific, sourced value and optional fields are filled where the research \
         allows. A record backed by no sources is not satisfactory. If it is not satisfactory, \
         list the missing or weak fields and propose between 1 and {max_queries} new targeted \
         search queries. Respond with JSON: {{\"is_satisfactory\": bool, \"missing_fields\": \
         [\"...\"], \"follow_up_queries\": [\"...\"], \"reasoning\": \"...\"}}.",
        target = task.target,
    )
}
