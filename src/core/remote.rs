//! HTTP generation service
//!
//! Talks to an OpenAI-compatible chat-completions endpoint (OpenRouter by
//! default). Only non-streaming requests are made; the reply content is
//! expected to be SQL or schema JSON, optionally wrapped in a code fence.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::config::Config;
use crate::core::describe::describe;
use crate::core::generation::{GenerationError, SchemaGenerator, SqlGenerator};
use crate::core::schema::Schema;

const SQL_SYSTEM_PROMPT: &str = r#"You write PostgreSQL migration scripts for a visual schema editor.
Reply with SQL only, no prose and no Markdown.
Create every table with CREATE TABLE IF NOT EXISTS, then foreign keys, row level security and policies, then indexes."#;

const SCHEMA_SYSTEM_PROMPT: &str = r#"You edit database schemas for a visual schema editor.
Reply with a single JSON object and nothing else. It must have a "tables" array and a "relationships" array.
Tables: { "name", "fields": [{ "name", "type", "isPrimaryKey", "isUnique", "isNullable", "defaultValue", "references": { "table", "field" } }] }.
Relationships: { "source", "sourceField", "target", "targetField", "type" } where "type" is one of "one-to-one", "one-to-many", "many-to-many".
Use snake_case names. Keep existing tables unless asked to remove them. Tables and fields may be referred to by name."#;

/// Chat message for API requests
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Generator backed by a chat-completions endpoint
#[derive(Clone, Debug)]
pub struct HttpGenerator {
    client: reqwest::Client,
    api_base: String,
    api_token: String,
    model: String,
    temperature: f32,
}

impl HttpGenerator {
    pub fn new(
        api_base: impl Into<String>,
        api_token: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
            api_token: api_token.into(),
            model: model.into(),
            temperature: 0.2,
        }
    }

    /// Fails with [`GenerationError::NotConfigured`] when no token is set
    pub fn from_config(config: &Config) -> Result<Self, GenerationError> {
        let token = config
            .api_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(GenerationError::NotConfigured)?;
        Ok(Self::new(&config.api_base, token, &config.model))
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: String) -> Result<String, GenerationError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage::new("system", system), ChatMessage::new("user", user)],
            temperature: self.temperature,
            stream: false,
        };

        tracing::info!("Generation request: model={}", self.model);

        let response = self
            .client
            .post(&self.api_base)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_token))
            .header("X-Title", "schemaforge")
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        tracing::debug!("Generation response status: {}", status);

        if !status.is_success() {
            tracing::warn!("Generation service error response: {}", truncate(&body, 500));
            return Err(GenerationError::Transport(format!(
                "HTTP {}: {}",
                status,
                truncate(&body, 200)
            )));
        }
        parse_completion(&body)
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Extracts the first choice's content from a chat-completions body
pub fn parse_completion(body: &str) -> Result<String, GenerationError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| GenerationError::MalformedResponse(format!("completion body: {}", e)))?;
    let content = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| GenerationError::MalformedResponse("no choices".to_string()))?;
    Ok(strip_code_fence(&content).to_string())
}

/// Removes a surrounding Markdown code fence, with or without a language tag
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    // Drop the language tag line, e.g. ```sql
    match inner.split_once('\n') {
        Some((tag, rest)) if !tag.trim().contains(' ') => rest.trim(),
        _ => inner.trim(),
    }
}

impl SqlGenerator for HttpGenerator {
    async fn generate_sql(&self, schema: &Schema) -> Result<String, GenerationError> {
        self.complete(SQL_SYSTEM_PROMPT, describe(schema)).await
    }
}

impl SchemaGenerator for HttpGenerator {
    async fn generate_schema(
        &self,
        schema: &Schema,
        instruction: &str,
    ) -> Result<Value, GenerationError> {
        let current = serde_json::to_string(schema)
            .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;
        let prompt = format!(
            "Current schema:\n{}\n\nCurrent schema as JSON:\n{}\n\nInstruction: {}",
            describe(schema),
            current,
            instruction
        );
        let content = self.complete(SCHEMA_SYSTEM_PROMPT, prompt).await?;
        serde_json::from_str(&content)
            .map_err(|e| GenerationError::MalformedResponse(format!("schema JSON: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(content: &str) -> String {
        serde_json::json!({
            "id": "gen-1",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
        })
        .to_string()
    }

    #[test]
    fn test_parse_completion_plain() {
        let sql = parse_completion(&body("CREATE TABLE a (id INT);")).unwrap();
        assert_eq!(sql, "CREATE TABLE a (id INT);");
    }

    #[test]
    fn test_parse_completion_strips_fence() {
        let sql = parse_completion(&body("```sql\nCREATE TABLE a (id INT);\n```")).unwrap();
        assert_eq!(sql, "CREATE TABLE a (id INT);");

        let json = parse_completion(&body("```\n{\"tables\": []}\n```")).unwrap();
        assert_eq!(json, "{\"tables\": []}");
    }

    #[test]
    fn test_parse_completion_errors() {
        assert!(matches!(
            parse_completion("not json"),
            Err(GenerationError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_completion(r#"{"choices": []}"#),
            Err(GenerationError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn test_from_config_requires_token() {
        let mut config = Config {
            schema_name: "public".to_string(),
            generation_timeout_secs: 30,
            api_base: "http://localhost:1/v1/chat/completions".to_string(),
            api_token: None,
            model: "test-model".to_string(),
            store_dir: None,
        };
        assert!(matches!(
            HttpGenerator::from_config(&config),
            Err(GenerationError::NotConfigured)
        ));

        config.api_token = Some("sk-test".to_string());
        let generator = HttpGenerator::from_config(&config).unwrap();
        assert_eq!(generator.model(), "test-model");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let generator = HttpGenerator::new("http://127.0.0.1:9/v1/chat/completions", "sk", "m");
        let result = generator.generate_sql(&Schema::default()).await;
        assert!(matches!(result, Err(GenerationError::Transport(_))));
    }
}
