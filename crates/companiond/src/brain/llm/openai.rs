//! OpenAI-compatible chat-completions provider (also serves Groq and
//! Ollama Cloud's OpenAI-compatible endpoint).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::config::ResolvedProvider;
use super::{GenerateResult, LlmMessage, LlmProvider, LlmRole, ToolCall, ToolSpec};
use crate::brain::error::{classify_provider_error, BrainError, BrainResult};

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct Response {
    choices: Vec<Choice>,
    model: String,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAiToolCall>,
}

#[derive(Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: FunctionCall,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u32,
}

pub struct OpenAiProvider {
    client: Client,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    base_url: String,
    available: AtomicBool,
}

impl OpenAiProvider {
    pub fn new(settings: &ResolvedProvider) -> BrainResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.min(30)))
            .build()
            .map_err(|e| BrainError::LlmError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            base_url: settings.base_url.clone(),
            available: AtomicBool::new(true),
        })
    }

    /// `*ollama.com*` base URLs use `max_tokens`; every other OpenAI-compatible
    /// endpoint uses the newer `max_completion_tokens` field.
    fn max_tokens_field(&self) -> &'static str {
        if self.base_url.contains("ollama.com") {
            "max_tokens"
        } else {
            "max_completion_tokens"
        }
    }

    fn build_body(&self, system_prompt: &str, messages: &[LlmMessage], tools: &[ToolSpec]) -> serde_json::Value {
        let mut chat_messages = vec![Message { role: "system".to_string(), content: system_prompt.to_string() }];
        chat_messages.extend(messages.iter().map(|m| Message {
            role: match m.role {
                LlmRole::System => "system".to_string(),
                LlmRole::User => "user".to_string(),
                LlmRole::Assistant => "assistant".to_string(),
            },
            content: m.content.clone(),
        }));

        let mut body = json!({
            "model": self.model,
            "messages": chat_messages,
        });
        body[self.max_tokens_field()] = json!(self.max_tokens);

        if !tools.is_empty() {
            let openai_tools: Vec<_> = tools
                .iter()
                .map(|t| json!({"type": "function", "function": {"name": t.name, "description": t.description, "parameters": t.input_schema}}))
                .collect();
            body["tools"] = json!(openai_tools);
        }

        body
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn generate(&self, system_prompt: &str, messages: &[LlmMessage], tools: &[ToolSpec]) -> BrainResult<GenerateResult> {
        let api_key = self.api_key.as_deref().ok_or_else(|| BrainError::ConfigError("no API key configured".into()))?;
        let body = self.build_body(system_prompt, messages, tools);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                self.available.store(false, Ordering::Relaxed);
                if e.is_timeout() { BrainError::LlmTimeout(30) } else { classify_provider_error(&e.to_string()) }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                self.available.store(false, Ordering::Relaxed);
            }
            return Err(classify_provider_error(&format!("{status} {text}")));
        }

        self.available.store(true, Ordering::Relaxed);

        let parsed: Response = response.json().await.map_err(|e| BrainError::LlmError(format!("failed to parse response: {e}")))?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| BrainError::LlmError("empty choices array".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: serde_json::from_str(&tc.function.arguments).unwrap_or(serde_json::Value::Null),
            })
            .collect::<Vec<_>>();

        let is_tool_use = !tool_calls.is_empty();

        Ok(GenerateResult {
            content: choice.message.content.unwrap_or_default(),
            tokens_used: parsed.usage.map(|u| u.total_tokens).unwrap_or(0),
            provider: "openai_compat".to_string(),
            model: parsed.model,
            tool_calls,
            is_tool_use,
        })
    }

    fn name(&self) -> &str {
        "openai_compat"
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed) && self.api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(base_url: &str) -> ResolvedProvider {
        ResolvedProvider { api_key: Some("k".into()), model: "gpt-4o-mini".into(), base_url: base_url.into(), max_tokens: 512, timeout_secs: 30 }
    }

    #[test]
    fn ollama_cloud_base_url_uses_max_tokens() {
        let provider = OpenAiProvider::new(&settings("https://ollama.com/v1")).unwrap();
        assert_eq!(provider.max_tokens_field(), "max_tokens");
    }

    #[test]
    fn default_base_url_uses_max_completion_tokens() {
        let provider = OpenAiProvider::new(&settings("https://api.openai.com/v1")).unwrap();
        assert_eq!(provider.max_tokens_field(), "max_completion_tokens");
    }
}
