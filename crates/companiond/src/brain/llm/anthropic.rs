//! Anthropic Messages API provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::config::ResolvedProvider;
use super::{GenerateResult, LlmMessage, LlmProvider, LlmRole, ToolCall, ToolSpec};
use crate::brain::error::{classify_provider_error, sanitize, BrainError, BrainResult};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct Request {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct Response {
    content: Vec<ContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: serde_json::Value },
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: String,
    available: AtomicBool,
}

impl AnthropicProvider {
    pub fn new(settings: &ResolvedProvider) -> BrainResult<Self> {
        let api_key = settings.api_key.clone().ok_or_else(|| BrainError::ConfigError("ANTHROPIC_API_KEY not set".into()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.min(30)))
            .build()
            .map_err(|e| BrainError::LlmError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            base_url: settings.base_url.clone(),
            available: AtomicBool::new(true),
        })
    }

    fn build_request(&self, messages: &[LlmMessage], system_prompt: &str, tools: &[ToolSpec]) -> Request {
        let anthropic_messages = messages
            .iter()
            .filter(|m| m.role != LlmRole::System)
            .map(|m| Message {
                role: match m.role {
                    LlmRole::User => "user".to_string(),
                    LlmRole::Assistant => "assistant".to_string(),
                    LlmRole::System => unreachable!(),
                },
                content: m.content.clone(),
            })
            .collect();

        let anthropic_tools = tools
            .iter()
            .map(|t| json!({"name": t.name, "description": t.description, "input_schema": t.input_schema}))
            .collect();

        Request {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: if system_prompt.is_empty() { None } else { Some(system_prompt.to_string()) },
            messages: anthropic_messages,
            tools: anthropic_tools,
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn generate(&self, system_prompt: &str, messages: &[LlmMessage], tools: &[ToolSpec]) -> BrainResult<GenerateResult> {
        let request = self.build_request(messages, system_prompt, tools);

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                self.available.store(false, Ordering::Relaxed);
                if e.is_timeout() { BrainError::LlmTimeout(30) } else { classify_provider_error(&e.to_string()) }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body).map(|e| e.error.message).unwrap_or(body);
            if status.as_u16() == 401 || status.as_u16() == 403 {
                self.available.store(false, Ordering::Relaxed);
            }
            return Err(classify_provider_error(&format!("{status} {}", sanitize(&message))));
        }

        self.available.store(true, Ordering::Relaxed);

        let parsed: Response = response.json().await.map_err(|e| BrainError::LlmError(format!("failed to parse response: {e}")))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block {
                ContentBlock::Text { text: t } => text.push_str(&t),
                ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall { id, name, arguments: input }),
            }
        }

        let is_tool_use = parsed.stop_reason.as_deref() == Some("tool_use");
        let tokens_used = parsed.usage.as_ref().map(|u| u.input_tokens + u.output_tokens).unwrap_or(0);

        Ok(GenerateResult {
            content: text,
            tokens_used,
            provider: "anthropic".to_string(),
            model: parsed.model,
            tool_calls,
            is_tool_use,
        })
    }

    fn name(&self) -> &str {
        "anthropic"
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }
}
