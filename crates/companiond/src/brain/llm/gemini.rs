//! Google Gemini `generateContent` provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::config::ResolvedProvider;
use super::{GenerateResult, LlmMessage, LlmProvider, LlmRole, ToolCall, ToolSpec};
use crate::brain::error::{classify_provider_error, BrainError, BrainResult};

#[derive(Deserialize)]
struct Response {
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
    #[serde(rename = "functionCall")]
    function_call: Option<FunctionCall>,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    args: serde_json::Value,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "totalTokenCount")]
    total_token_count: u32,
}

pub struct GeminiProvider {
    client: Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    max_tokens: u32,
    available: AtomicBool,
}

impl GeminiProvider {
    pub fn new(settings: &ResolvedProvider) -> BrainResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.min(30)))
            .build()
            .map_err(|e| BrainError::LlmError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            base_url: settings.base_url.clone(),
            max_tokens: settings.max_tokens,
            available: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn generate(&self, system_prompt: &str, messages: &[LlmMessage], tools: &[ToolSpec]) -> BrainResult<GenerateResult> {
        let api_key = self.api_key.as_deref().ok_or_else(|| BrainError::ConfigError("no Gemini API key configured".into()))?;

        let contents: Vec<_> = messages
            .iter()
            .filter(|m| m.role != LlmRole::System)
            .map(|m| {
                let role = match m.role {
                    LlmRole::User => "user",
                    LlmRole::Assistant => "model",
                    LlmRole::System => unreachable!(),
                };
                json!({"role": role, "parts": [{"text": m.content}]})
            })
            .collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": {"maxOutputTokens": self.max_tokens},
        });
        if !system_prompt.is_empty() {
            body["systemInstruction"] = json!({"parts": [{"text": system_prompt}]});
        }
        if !tools.is_empty() {
            let function_decls: Vec<_> = tools
                .iter()
                .map(|t| json!({"name": t.name, "description": t.description, "parameters": t.input_schema}))
                .collect();
            body["tools"] = json!([{"functionDeclarations": function_decls}]);
        }

        let url = format!("{}/models/{}:generateContent?key={}", self.base_url, self.model, api_key);

        let response = self.client.post(&url).json(&body).send().await.map_err(|e| {
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
        let candidate = parsed.candidates.into_iter().next().ok_or_else(|| BrainError::LlmError("no candidates returned".into()))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for (i, part) in candidate.content.parts.into_iter().enumerate() {
            if let Some(t) = part.text {
                text.push_str(&t);
            }
            if let Some(fc) = part.function_call {
                tool_calls.push(ToolCall { id: format!("gemini_call_{i}"), name: fc.name, arguments: fc.args });
            }
        }

        let is_tool_use = !tool_calls.is_empty();

        Ok(GenerateResult {
            content: text,
            tokens_used: parsed.usage_metadata.map(|u| u.total_token_count).unwrap_or(0),
            provider: "gemini".to_string(),
            model: self.model.clone(),
            tool_calls,
            is_tool_use,
        })
    }

    fn name(&self) -> &str {
        "gemini"
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed) && self.api_key.is_some()
    }
}
