//! Structured LLM calls.
//!
//! Components describe the output shape they need; the client returns a JSON
//! value or fails with `MalformedModelOutput`. Deserialising into the
//! component's own type happens in the component.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::LlmConfig;
use crate::error::ResearchError;
use crate::security::SecretValue;

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("invalid fenced json regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Named target shape for a structured call.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputShape {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

impl OutputShape {
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StructuredRequest {
    pub messages: Vec<ChatMessage>,
    pub shape: OutputShape,
}

impl StructuredRequest {
    pub fn new(shape: OutputShape) -> Self {
        Self {
            messages: Vec::new(),
            shape,
        }
    }

    pub fn message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// Append a corrective instruction after a rejected response.
    pub fn with_correction(mut self, correction: Option<&str>) -> Self {
        if let Some(problem) = correction {
            self.messages.push(ChatMessage::user(format!(
                "Your previous response was rejected: {problem}\n\
                 Respond again with JSON that matches the `{}` shape exactly.",
                self.shape.name
            )));
        }
        self
    }

    pub fn user_prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
            .unwrap_or_default()
    }
}

#[async_trait]
pub trait StructuredLlm: Send + Sync {
    async fn complete(&self, request: StructuredRequest) -> Result<Value, ResearchError>;
}

/// Pull a JSON value out of model text: bare JSON, a fenced block, or the
/// outermost object embedded in prose.
pub fn parse_json_payload(text: &str) -> Result<Value, ResearchError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    if let Some(inner) = FENCED_JSON.captures(trimmed).and_then(|caps| caps.get(1)) {
        if let Ok(value) = serde_json::from_str(inner.as_str()) {
            return Ok(value);
        }
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if end > start {
                if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                    return Ok(value);
                }
            }
        }
    }

    let preview: String = trimmed.chars().take(200).collect();
    Err(ResearchError::malformed(format!(
        "response is not valid JSON: {preview}"
    )))
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    response_format: Value,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client with JSON-schema output.
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    api_key: SecretValue,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig, api_key: SecretValue) -> Result<Self, ResearchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| ResearchError::Other(anyhow::anyhow!("failed to create HTTP client: {err}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
        })
    }
}

#[async_trait]
impl StructuredLlm for OpenAiClient {
    async fn complete(&self, request: StructuredRequest) -> Result<Value, ResearchError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: self.temperature,
            response_format: json!({
                "type": "json_schema",
                "json_schema": {
                    "name": request.shape.name,
                    "description": request.shape.description,
                    "schema": request.shape.schema,
                    "strict": false,
                }
            }),
        };

        tracing::debug!(
            model = %self.model,
            shape = %request.shape.name,
            messages = request.messages.len(),
            "calling chat completions"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|err| ResearchError::ModelUnavailable(format!("request failed: {err}")))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            let text = response.text().await.unwrap_or_default();
            return Err(ResearchError::ModelUnavailable(format!("{status}: {text}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ResearchError::Other(anyhow::anyhow!(
                "chat completions rejected request ({status}): {text}"
            )));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| ResearchError::malformed(format!("unreadable completion body: {err}")))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ResearchError::malformed("completion has no message content"))?;

        tracing::debug!(
            shape = %request.shape.name,
            response_length = content.len(),
            "chat completion received"
        );

        parse_json_payload(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json() {
        assert_eq!(parse_json_payload(r#" {"a": 1} "#).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn parses_fenced_json() {
        let text = "Here you go:\n```json\n{\"queries\": [\"x\"]}\n```\nThanks";
        assert_eq!(parse_json_payload(text).unwrap(), json!({"queries": ["x"]}));
    }

    #[test]
    fn parses_object_embedded_in_prose() {
        let text = "Sure! {\"notes\": \"founded 1949\"} hope that helps";
        assert_eq!(
            parse_json_payload(text).unwrap(),
            json!({"notes": "founded 1949"})
        );
    }

    #[test]
    fn rejects_plain_prose() {
        let err = parse_json_payload("I could not find anything").unwrap_err();
        assert!(matches!(err, ResearchError::MalformedModelOutput(_)));
    }

    #[test]
    fn correction_is_appended_as_user_message() {
        let request = StructuredRequest::new(OutputShape::new("Queries", "", json!({})))
            .message(ChatMessage::system("sys"))
            .message(ChatMessage::user("go"))
            .with_correction(Some("missing `queries`"));

        assert_eq!(request.messages.len(), 3);
        assert!(request.user_prompt().contains("missing `queries`"));
        assert!(request.user_prompt().contains("`Queries` shape"));
    }
}
