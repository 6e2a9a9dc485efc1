//! LLM provider abstraction: a closed set of variants sharing one capability,
//! not a class hierarchy (each variant keeps its own native client handle).

pub mod anthropic;
pub mod config;
pub mod gemini;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::brain::error::BrainResult;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: LlmRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: LlmRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: LlmRole::Assistant, content: content.into() }
    }
}

/// A tool/function description, translated by each provider into its native
/// tool schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Canonical provider response, shared across every backend.
#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub content: String,
    pub tokens_used: u32,
    pub provider: String,
    pub model: String,
    pub tool_calls: Vec<ToolCall>,
    pub is_tool_use: bool,
}

/// One LLM service back-end. Implementations translate the canonical
/// `messages`/`tools` into their native request shape.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        messages: &[LlmMessage],
        tools: &[ToolSpec],
    ) -> BrainResult<GenerateResult>;

    fn name(&self) -> &str;

    fn is_available(&self) -> bool;
}

/// Tries configured providers in a fixed order, retrying transient failures
/// within a provider and falling over to the next on terminal ones. The
/// retry/failover loop itself lives in [`crate::brain::Brain::think`]; this
/// type just holds the ordered provider list and exposes it.
#[derive(Clone, Default)]
pub struct ProviderChain {
    providers: Vec<std::sync::Arc<dyn LlmProvider>>,
}

impl ProviderChain {
    pub fn new() -> Self {
        Self { providers: Vec::new() }
    }

    pub fn add_provider(mut self, provider: std::sync::Arc<dyn LlmProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn providers(&self) -> &[std::sync::Arc<dyn LlmProvider>] {
        &self.providers
    }

    pub fn any_available(&self) -> bool {
        self.providers.iter().any(|p| p.is_available())
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}
