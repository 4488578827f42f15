//! Initial search query generation.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use crate::error::ResearchError;
use crate::llm::{ChatMessage, OutputShape, StructuredLlm, StructuredRequest};
use crate::prompts;
use crate::run_config::RunConfig;
use crate::state::ResearchTask;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QueryPayload {
    Wrapped { queries: Vec<Value> },
    Bare(Vec<Value>),
}

fn query_shape() -> OutputShape {
    OutputShape::new(
        "Queries",
        "Web search queries targeting unresolved schema fields",
        json!({
            "type": "object",
            "properties": {
                "queries": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "List of search queries."
                }
            },
            "required": ["queries"]
        }),
    )
}

/// Coerce a model response into at most `cap` non-empty queries.
///
/// Order is kept; blanks are dropped before the cap is applied.
pub fn coerce_queries(value: Value, cap: usize) -> Result<Vec<String>, ResearchError> {
    let items = match serde_json::from_value::<QueryPayload>(value) {
        Ok(QueryPayload::Wrapped { queries }) | Ok(QueryPayload::Bare(queries)) => queries,
        Err(_) => {
            return Err(ResearchError::malformed(
                "expected an object with a `queries` list of strings",
            ));
        }
    };

    let mut queries = Vec::with_capacity(items.len().min(cap));
    for item in items {
        let Value::String(text) = item else {
            return Err(ResearchError::malformed("every query must be a string"));
        };
        let text = text.trim();
        if !text.is_empty() && queries.len() < cap {
            queries.push(text.to_string());
        }
    }

    if queries.is_empty() {
        return Err(ResearchError::malformed("model returned no usable queries"));
    }
    Ok(queries)
}

/// Produces the first iteration's search queries; runs once per run.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryGenerator;

impl QueryGenerator {
    #[instrument(name = "queries.generate", skip_all, fields(target = %task.target))]
    pub async fn generate(
        &self,
        llm: &dyn StructuredLlm,
        task: &ResearchTask,
        config: &RunConfig,
        correction: Option<&str>,
    ) -> Result<Vec<String>, ResearchError> {
        let schema_json = serde_json::to_string_pretty(&task.schema.to_json_schema())
            .map_err(|err| ResearchError::Other(err.into()))?;
        let request = StructuredRequest::new(query_shape())
            .message(ChatMessage::system(prompts::QUERY_WRITER_SYSTEM))
            .message(ChatMessage::user(prompts::query_writer(
                task,
                &schema_json,
                config.max_search_queries,
            )))
            .with_correction(correction);

        let response = llm.complete(request).await?;
        let queries = coerce_queries(response, config.max_search_queries)?;

        info!(count = queries.len(), "generated search queries");
        for (idx, query) in queries.iter().enumerate() {
            debug!(index = idx + 1, %query, "search query");
        }
        Ok(queries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_wrapped_and_bare_lists() {
        assert_eq!(
            coerce_queries(json!({"queries": ["a", "b"]}), 3).unwrap(),
            vec!["a", "b"]
        );
        assert_eq!(coerce_queries(json!(["a"]), 3).unwrap(), vec!["a"]);
    }

    #[test]
    fn caps_length_and_drops_blanks() {
        let queries = coerce_queries(json!({"queries": [" ", "a", "", "b", "c"]}), 2).unwrap();
        assert_eq!(queries, vec!["a", "b"]);
    }

    #[test]
    fn rejects_wrong_shapes() {
        assert!(coerce_queries(json!({"q": ["a"]}), 3).is_err());
        assert!(coerce_queries(json!({"queries": [1, 2]}), 3).is_err());
        assert!(coerce_queries(json!("acme"), 3).is_err());
        assert!(matches!(
            coerce_queries(json!({"queries": ["  "]}), 3),
            Err(ResearchError::MalformedModelOutput(_))
        ));
    }
}
