//! Language model client and output parsing for `/ask` and `/ask-llm`.

use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use super::error::{GatewayError, GatewayResult};
use crate::datasource::http::init_crypto;

/// Settings for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl LlmConfig {
    pub const DEFAULT_TEMPERATURE: f32 = 0.2;
    pub const DEFAULT_MAX_TOKENS: u32 = 600;

    pub fn new(api_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: None,
            model: model.into(),
            temperature: Self::DEFAULT_TEMPERATURE,
            max_tokens: Self::DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(60),
        }
    }

    fn completions_url(&self) -> String {
        let base = self.api_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{}/chat/completions", base)
        }
    }
}

/// Single-turn text completion.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> GatewayResult<String>;
}

pub struct HttpLanguageModel {
    config: LlmConfig,
    client: Client,
}

impl HttpLanguageModel {
    pub fn new(config: LlmConfig) -> GatewayResult<Self> {
        init_crypto();
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to build LLM client: {}", e)))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn complete(&self, prompt: &str) -> GatewayResult<String> {
        let body = json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });
        let mut request = self.client.post(self.config.completions_url()).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        debug!(model = %self.config.model, prompt_len = prompt.len(), "calling LLM");
        let response = request.send().await.map_err(|e| GatewayError::Llm(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Llm(format!("HTTP {}: {}", status.as_u16(), text)));
        }
        let payload: Value = response.json().await.map_err(|e| GatewayError::Llm(e.to_string()))?;
        completion_text(&payload)
            .map(str::to_string)
            .ok_or_else(|| GatewayError::Llm("response has no completion text".to_string()))
    }
}

/// `choices[0].message.content` of a chat completions response.
fn completion_text(payload: &Value) -> Option<&str> {
    payload
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
}

/// Pull the SQL statement out of model output: from the first `SELECT`
/// (any case) through the first `;` after it, or to the end of the text.
pub fn extract_sql(text: &str) -> Option<String> {
    let start = text.to_ascii_uppercase().find("SELECT")?;
    let rest = &text[start..];
    let sql = match rest.find(';') {
        Some(end) => &rest[..=end],
        None => rest.trim_end_matches("```"),
    };
    let sql = sql.trim();
    if sql.is_empty() { None } else { Some(sql.to_string()) }
}

/// Action chosen by the model for `/ask-llm`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LlmAction {
    CallTool {
        tool: String,
        #[serde(default)]
        args: Map<String, Value>,
    },
    ReadResource {
        uri: String,
    },
}

/// Parse the JSON action object out of model output. Code fences and
/// surrounding prose are ignored.
pub fn parse_action(text: &str) -> GatewayResult<LlmAction> {
    let start = text.find('{');
    let end = text.rfind('}');
    let candidate = match (start, end) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => {
            return Err(GatewayError::BadRequest(
                "LLM did not return a JSON action".to_string(),
            ));
        }
    };
    serde_json::from_str(candidate)
        .map_err(|e| GatewayError::BadRequest(format!("Unsupported or malformed LLM action: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_sql_through_semicolon() {
        let text = "Here you go:\nselect name from users where id = 1; -- done";
        assert_eq!(
            extract_sql(text).as_deref(),
            Some("select name from users where id = 1;")
        );
    }

    #[test]
    fn test_extract_sql_without_semicolon() {
        let text = "```sql\nSELECT * FROM orders LIMIT 5\n```";
        assert_eq!(extract_sql(text).as_deref(), Some("SELECT * FROM orders LIMIT 5"));
    }

    #[test]
    fn test_extract_sql_none() {
        assert_eq!(extract_sql("I cannot answer that."), None);
    }

    #[test]
    fn test_parse_call_tool_action() {
        let text = "```json\n{\"action\": \"call_tool\", \"tool\": \"query_db\", \"args\": {\"query\": \"SELECT 1\"}}\n```";
        let action = parse_action(text).unwrap();
        match action {
            LlmAction::CallTool { tool, args } => {
                assert_eq!(tool, "query_db");
                assert_eq!(args["query"], "SELECT 1");
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn test_parse_read_resource_action() {
        let action = parse_action(r#"{"action":"read_resource","uri":"db://schema"}"#).unwrap();
        assert_eq!(
            action,
            LlmAction::ReadResource {
                uri: "db://schema".into()
            }
        );
    }

    #[test]
    fn test_parse_action_rejects_garbage() {
        assert!(matches!(parse_action("no json here"), Err(GatewayError::BadRequest(_))));
        assert!(matches!(
            parse_action(r#"{"action":"delete_everything"}"#),
            Err(GatewayError::BadRequest(_))
        ));
    }

    #[test]
    fn test_completions_url() {
        let config = LlmConfig::new("https://llm.example/v1/", "m");
        assert_eq!(config.completions_url(), "https://llm.example/v1/chat/completions");
        let config = LlmConfig::new("https://llm.example/v1/chat/completions", "m");
        assert_eq!(config.completions_url(), "https://llm.example/v1/chat/completions");
    }

    #[test]
    fn test_completion_text() {
        let payload = json!({"choices": [{"message": {"role": "assistant", "content": "SELECT 1"}}]});
        assert_eq!(completion_text(&payload), Some("SELECT 1"));
        assert_eq!(completion_text(&json!({})), None);
    }
}
