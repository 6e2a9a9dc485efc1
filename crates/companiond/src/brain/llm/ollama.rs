//! Ollama provider: local `ollama serve` when unauthenticated, Ollama Cloud
//! when an API key is configured (bearer auth, otherwise identical wire shape).

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
    message: ResponseMessage,
    model: String,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
    #[serde(default)]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Deserialize)]
struct OllamaToolCall {
    function: FunctionCall,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    arguments: serde_json::Value,
}

pub struct OllamaProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    max_tokens: u32,
    available: AtomicBool,
}

impl OllamaProvider {
    pub fn new(settings: &ResolvedProvider) -> BrainResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.min(30)))
            .build()
            .map_err(|e| BrainError::LlmError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            available: AtomicBool::new(true),
        })
    }

    pub async fn health_check(&self) -> bool {
        let url = format!("{}/api/version", self.base_url.trim_end_matches('/'));
        let ok = self.client.get(&url).send().await.map(|r| r.status().is_success()).unwrap_or(false);
        self.available.store(ok, Ordering::Relaxed);
        ok
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn generate(&self, system_prompt: &str, messages: &[LlmMessage], tools: &[ToolSpec]) -> BrainResult<GenerateResult> {
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
            "stream": false,
            "options": {"num_predict": self.max_tokens},
        });
        if !tools.is_empty() {
            let ollama_tools: Vec<_> = tools
                .iter()
                .map(|t| json!({"type": "function", "function": {"name": t.name, "description": t.description, "parameters": t.input_schema}}))
                .collect();
            body["tools"] = json!(ollama_tools);
        }

        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            self.available.store(false, Ordering::Relaxed);
            if e.is_timeout() {
                BrainError::LlmTimeout(30)
            } else if e.is_connect() {
                BrainError::LlmError("ollama is not reachable; is `ollama serve` running?".into())
            } else {
                classify_provider_error(&e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            self.available.store(false, Ordering::Relaxed);
            return Err(classify_provider_error(&format!("{status} {text}")));
        }

        self.available.store(true, Ordering::Relaxed);

        let parsed: Response = response.json().await.map_err(|e| BrainError::LlmError(format!("failed to parse response: {e}")))?;

        let tool_calls = parsed
            .message
            .tool_calls
            .into_iter()
            .enumerate()
            .map(|(i, tc)| ToolCall { id: format!("ollama_call_{i}"), name: tc.function.name, arguments: tc.function.arguments })
            .collect::<Vec<_>>();
        let is_tool_use = !tool_calls.is_empty();

        Ok(GenerateResult {
            content: parsed.message.content,
            tokens_used: parsed.prompt_eval_count + parsed.eval_count,
            provider: "ollama_cloud".to_string(),
            model: parsed.model,
            tool_calls,
            is_tool_use,
        })
    }

    fn name(&self) -> &str {
        "ollama_cloud"
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }
}
