//! The companion's conversational core: picks a provider, drives the tool
//! loop, and keeps memory/transcript/budget state in sync with every turn.

pub mod error;
pub mod llm;
pub mod memory_context;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use companion_core::{ChatQuality, MemoryStore};

use error::{BrainError, BrainResult};
use llm::{GenerateResult, LlmMessage, ProviderChain, ToolCall, ToolSpec};

use crate::mcp::McpClientManager;

const FALLBACK_APOLOGY: &str = "Sorry, I drew a blank there. Could you say that again?";
const MAX_TRANSCRIPT_MESSAGES: usize = 100;
const CONTEXT_WINDOW_MESSAGES: usize = 10;
const TOOL_RESULT_TRUNCATE: usize = 500;

/// Status updates a front-end can surface while a tool round is in flight.
/// Exceptions from the callback are swallowed, never propagated out of `think`.
pub type StatusCallback<'a> = dyn Fn(&str, &str, &str) + Send + Sync + 'a;

#[derive(Debug, Clone)]
pub struct ThinkResult {
    pub content: String,
    pub tokens_used: u32,
    pub provider: String,
    pub model: String,
    pub chat_quality: Option<ChatQuality>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenBudget {
    tokens_used_today: u32,
    last_reset: i64,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self { tokens_used_today: 0, last_reset: chrono::Utc::now().timestamp() }
    }
}

impl TokenBudget {
    fn reset_if_needed(&mut self) {
        let now = chrono::Utc::now().timestamp();
        if now - self.last_reset > 86_400 {
            self.tokens_used_today = 0;
            self.last_reset = now;
        }
    }

    fn check(&mut self, requested: u32, daily_limit: u32) -> bool {
        self.reset_if_needed();
        self.tokens_used_today + requested <= daily_limit
    }

    fn record(&mut self, used: u32) {
        self.tokens_used_today += used;
    }
}

pub struct BrainConfig {
    pub daily_token_limit: u32,
    pub per_request_max: u32,
    pub memory_max_items: usize,
    pub memory_max_chars: usize,
    pub memory_max_new_per_turn: usize,
    pub state_dir: PathBuf,
}

impl BrainConfig {
    fn budget_path(&self) -> PathBuf {
        self.state_dir.join("token_budget.json")
    }

    fn transcript_path(&self) -> PathBuf {
        self.state_dir.join("transcript.json")
    }
}

pub struct Brain {
    providers: ProviderChain,
    mcp: Option<Arc<McpClientManager>>,
    memory: Arc<MemoryStore>,
    messages: Mutex<Vec<LlmMessage>>,
    budget: Mutex<TokenBudget>,
    config: BrainConfig,
}

impl Brain {
    pub fn new(providers: ProviderChain, memory: Arc<MemoryStore>, mcp: Option<Arc<McpClientManager>>, config: BrainConfig) -> Self {
        let budget = companion_core::persistence::load_json_or_default(&config.budget_path());
        let messages = companion_core::persistence::load_json_or_default(&config.transcript_path());
        Self { providers, mcp, memory, messages: Mutex::new(messages), budget: Mutex::new(budget), config }
    }

    /// Runs the full retry/failover loop across configured providers,
    /// driving tool-use rounds and persisting memory/transcript/budget state.
    pub async fn think(
        &self,
        user_message: &str,
        system_prompt: &str,
        max_retries: u32,
        use_tools: bool,
        max_tool_rounds: u32,
        status_callback: Option<&StatusCallback<'_>>,
    ) -> BrainResult<ThinkResult> {
        {
            let mut budget = self.budget.lock().await;
            if !budget.check(self.config.per_request_max, self.config.daily_token_limit) {
                return Err(BrainError::BudgetExhausted);
            }
        }

        let mut messages = self.messages.lock().await.clone();
        messages.push(LlmMessage::user(user_message));
        trim_messages(&mut messages);

        let memory_context = memory_context::build_memory_context(&self.memory, user_message, self.config.memory_max_items, self.config.memory_max_chars);
        let effective_prompt = if memory_context.is_empty() { system_prompt.to_string() } else { format!("{system_prompt}\n\n{memory_context}") };

        let mut tools = Vec::new();
        if use_tools {
            if let Some(mcp) = &self.mcp {
                if mcp.tool_count().await > 0 {
                    tools = mcp.get_tools_for_query(user_message).await;
                }
            }
        }

        for provider in self.providers.providers() {
            if !provider.is_available() {
                continue;
            }

            for attempt in 0..max_retries {
                let outcome = provider.generate(&effective_prompt, context_window(&messages), &tools).await;

                let mut result = match outcome {
                    Ok(result) => result,
                    Err(BrainError::RateLimit) => {
                        let backoff = Duration::from_secs_f64(2f64.powi(attempt as i32) + 0.1 * attempt as f64);
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    Err(BrainError::QuotaExceeded) => break,
                    Err(_other) => {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        continue;
                    }
                };

                let mut rounds = 0;
                while result.is_tool_use && rounds < max_tool_rounds {
                    rounds += 1;
                    result = self
                        .execute_tools_and_continue(provider.as_ref(), &effective_prompt, &mut messages, result, &tools, status_callback)
                        .await?;
                }

                let chat_quality = analyze_chat_quality(user_message, messages.len() as u32);
                let content = if result.content.trim().is_empty() { FALLBACK_APOLOGY.to_string() } else { result.content };

                {
                    let mut budget = self.budget.lock().await;
                    budget.record(result.tokens_used);
                    companion_core::persistence::save_json_atomic(&self.config.budget_path(), &*budget);
                }

                messages.push(LlmMessage::assistant(&content));
                trim_messages(&mut messages);
                *self.messages.lock().await = messages.clone();
                companion_core::persistence::save_json_atomic(&self.config.transcript_path(), &messages);

                memory_context::capture_memories(&self.memory, user_message, self.config.memory_max_new_per_turn);

                return Ok(ThinkResult { content, tokens_used: result.tokens_used, provider: result.provider, model: result.model, chat_quality: Some(chat_quality) });
            }
        }

        // Neither the user turn nor a response ever made it into the transcript.
        Err(BrainError::AllProvidersExhausted)
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_tools_and_continue(
        &self,
        provider: &dyn llm::LlmProvider,
        effective_prompt: &str,
        messages: &mut Vec<LlmMessage>,
        result: GenerateResult,
        tools: &[ToolSpec],
        status_callback: Option<&StatusCallback<'_>>,
    ) -> BrainResult<GenerateResult> {
        let mut lines = String::from("[Tool results]\n");
        for call in &result.tool_calls {
            notify_status(status_callback, "focused", &format!("using {}...", call.name), "running");
            let content = self.run_tool_call(call).await;
            notify_status(status_callback, "happy", &format!("done with {}", call.name), "done");
            let truncated: String = content.chars().take(TOOL_RESULT_TRUNCATE).collect();
            lines.push_str(&format!("Tool {}: {truncated}\n", call.id));
        }

        messages.push(LlmMessage::user(lines));
        provider.generate(effective_prompt, context_window(messages), tools).await
    }

    async fn run_tool_call(&self, call: &ToolCall) -> String {
        let Some(mcp) = &self.mcp else {
            return "no tool manager configured".to_string();
        };
        match mcp.call_tool(&call.name, call.arguments.clone()).await {
            Ok(content) => content,
            Err(e) => format!("error: {e}"),
        }
    }

    pub async fn save_messages(&self) {
        let messages = self.messages.lock().await;
        companion_core::persistence::save_json_atomic(&self.config.transcript_path(), &*messages);
    }

    pub async fn load_messages(&self) -> Vec<LlmMessage> {
        self.messages.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.messages.lock().await.clear();
        self.save_messages().await;
    }

    pub async fn get_stats(&self) -> (u32, u32) {
        let budget = self.budget.lock().await;
        (budget.tokens_used_today, self.config.daily_token_limit)
    }
}

fn trim_messages(messages: &mut Vec<LlmMessage>) {
    if messages.len() > MAX_TRANSCRIPT_MESSAGES {
        let excess = messages.len() - MAX_TRANSCRIPT_MESSAGES;
        messages.drain(0..excess);
    }
}

/// The sliding window actually sent to a provider: the last
/// [`CONTEXT_WINDOW_MESSAGES`], distinct from the larger on-disk transcript cap.
fn context_window(messages: &[LlmMessage]) -> &[LlmMessage] {
    let start = messages.len().saturating_sub(CONTEXT_WINDOW_MESSAGES);
    &messages[start..]
}

fn notify_status(callback: Option<&StatusCallback<'_>>, face: &str, text: &str, status: &str) {
    if let Some(callback) = callback {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(face, text, status)));
    }
}

fn analyze_chat_quality(user_message: &str, turn_count: u32) -> ChatQuality {
    ChatQuality { message_length: user_message.len(), turn_count, is_question: user_message.trim_end().ends_with('?') }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        calls: AtomicU32,
        fail_times: u32,
    }

    #[async_trait]
    impl llm::LlmProvider for FlakyProvider {
        async fn generate(&self, _system_prompt: &str, _messages: &[LlmMessage], _tools: &[ToolSpec]) -> BrainResult<GenerateResult> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                return Err(BrainError::RateLimit);
            }
            Ok(GenerateResult { content: "hello there".to_string(), tokens_used: 10, provider: "flaky".to_string(), model: "test".to_string(), tool_calls: vec![], is_tool_use: false })
        }

        fn name(&self) -> &str {
            "flaky"
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    fn test_config(dir: &std::path::Path) -> BrainConfig {
        BrainConfig { daily_token_limit: 10_000, per_request_max: 500, memory_max_items: 10, memory_max_chars: 500, memory_max_new_per_turn: 5, state_dir: dir.to_path_buf() }
    }

    #[tokio::test]
    async fn retries_past_rate_limit_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryStore::open(":memory:").unwrap());
        let provider = Arc::new(FlakyProvider { calls: AtomicU32::new(0), fail_times: 1 });
        let providers = ProviderChain::new().add_provider(provider);

        let brain = Brain::new(providers, memory, None, test_config(dir.path()));
        let result = brain.think("hi", "You are a helper.", 3, false, 0, None).await.unwrap();
        assert_eq!(result.content, "hello there");
    }

    #[tokio::test]
    async fn budget_exhausted_rejects_before_calling_provider() {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryStore::open(":memory:").unwrap());
        let provider = Arc::new(FlakyProvider { calls: AtomicU32::new(0), fail_times: 0 });
        let providers = ProviderChain::new().add_provider(provider);

        let mut config = test_config(dir.path());
        config.daily_token_limit = 0;
        let brain = Brain::new(providers, memory, None, config);

        let err = brain.think("hi", "sys", 1, false, 0, None).await.unwrap_err();
        assert!(matches!(err, BrainError::BudgetExhausted));
    }

    #[tokio::test]
    async fn empty_content_is_replaced_with_apology() {
        struct EmptyProvider;
        #[async_trait]
        impl llm::LlmProvider for EmptyProvider {
            async fn generate(&self, _: &str, _: &[LlmMessage], _: &[ToolSpec]) -> BrainResult<GenerateResult> {
                Ok(GenerateResult { content: "   ".to_string(), tokens_used: 1, provider: "empty".to_string(), model: "t".to_string(), tool_calls: vec![], is_tool_use: false })
            }
            fn name(&self) -> &str {
                "empty"
            }
            fn is_available(&self) -> bool {
                true
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryStore::open(":memory:").unwrap());
        let providers = ProviderChain::new().add_provider(Arc::new(EmptyProvider));
        let brain = Brain::new(providers, memory, None, test_config(dir.path()));

        let result = brain.think("hi", "sys", 1, false, 0, None).await.unwrap();
        assert_eq!(result.content, FALLBACK_APOLOGY);
    }

    #[tokio::test]
    async fn provider_only_sees_the_last_n_messages_not_the_whole_transcript() {
        struct RecordingProvider {
            seen_len: AtomicU32,
        }
        #[async_trait]
        impl llm::LlmProvider for RecordingProvider {
            async fn generate(&self, _: &str, messages: &[LlmMessage], _: &[ToolSpec]) -> BrainResult<GenerateResult> {
                self.seen_len.store(messages.len() as u32, Ordering::SeqCst);
                Ok(GenerateResult { content: "ok".to_string(), tokens_used: 1, provider: "rec".to_string(), model: "t".to_string(), tool_calls: vec![], is_tool_use: false })
            }
            fn name(&self) -> &str {
                "rec"
            }
            fn is_available(&self) -> bool {
                true
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryStore::open(":memory:").unwrap());
        let provider = Arc::new(RecordingProvider { seen_len: AtomicU32::new(0) });
        let providers = ProviderChain::new().add_provider(provider.clone());
        let brain = Brain::new(providers, memory, None, test_config(dir.path()));

        for i in 0..30 {
            brain.think(&format!("turn {i}"), "sys", 1, false, 0, None).await.unwrap();
        }

        assert_eq!(provider.seen_len.load(Ordering::SeqCst) as usize, CONTEXT_WINDOW_MESSAGES);
    }
}
