//! Wires every subsystem together in a fixed startup order and tears them
//! down in reverse: stores first, personality and scheduler next, MCP and
//! brain after that, heartbeat last so everything it touches already exists.

use std::path::PathBuf;
use std::sync::Arc;

use companion_core::{MemoryStore, Personality, RateLimiter, TaskStore};
use tokio::sync::Mutex;

use crate::brain::llm::{anthropic::AnthropicProvider, gemini::GeminiProvider, ollama::OllamaProvider, openai::OpenAiProvider, LlmProvider, ProviderChain};
use crate::brain::{Brain, BrainConfig};
use crate::config::Config;
use crate::display::DisplaySink;
use crate::heartbeat::{BatterySampler, Heartbeat};
use crate::mcp::McpClientManager;
use crate::scheduler::Scheduler;

pub struct Controller {
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
    pub memory: Arc<MemoryStore>,
    pub tasks: Arc<TaskStore>,
    pub personality: Arc<Mutex<Personality>>,
    pub scheduler: Arc<Scheduler>,
    pub mcp: Arc<McpClientManager>,
    pub brain: Arc<Brain>,
    pub heartbeat: Arc<Heartbeat>,
    config_path: PathBuf,
}

impl Controller {
    pub async fn start(config: Config, config_path: PathBuf, state_dir: PathBuf, display: Arc<dyn DisplaySink>, battery_sampler: Option<Box<BatterySampler>>) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&state_dir)?;

        let rate_limiter = Arc::new(Mutex::new(RateLimiter::load(&state_dir.join("rate_limits.json"))));
        let memory = Arc::new(MemoryStore::open(state_dir.join("memory.db").to_str().unwrap())?);
        let tasks = Arc::new(TaskStore::open(state_dir.join("tasks.db").to_str().unwrap())?);

        let mut personality = Personality::load(&state_dir.join("personality.json"));
        personality.save();
        let personality = Arc::new(Mutex::new(personality));

        let mut scheduler = Scheduler::new();
        register_builtin_actions(&mut scheduler, memory.clone(), tasks.clone());
        let scheduler = Arc::new(scheduler);
        scheduler.load_tasks(&config.scheduler.tasks).await;

        let mcp = if config.mcp.enabled {
            Arc::new(McpClientManager::start_all(&config.mcp).await)
        } else {
            Arc::new(McpClientManager::new(config.mcp.max_tools))
        };

        let providers = build_provider_chain(&config);
        let brain_config = BrainConfig {
            daily_token_limit: config.ai.budget.daily_tokens,
            per_request_max: config.ai.budget.per_request_max,
            memory_max_items: config.memory.prompt_context.max_items,
            memory_max_chars: config.memory.prompt_context.max_chars,
            memory_max_new_per_turn: config.memory.capture.max_new_per_turn,
            state_dir: state_dir.clone(),
        };
        let mcp_for_brain = if config.mcp.enabled { Some(mcp.clone()) } else { None };
        let brain = Arc::new(Brain::new(providers, memory.clone(), mcp_for_brain, brain_config));

        let heartbeat = Arc::new(Heartbeat::new(
            personality.clone(),
            if config.heartbeat.enabled { Some(brain.clone()) } else { None },
            Some(scheduler.clone()),
            Some(tasks.clone()),
            display,
            battery_sampler,
            config.heartbeat.clone(),
        ));

        Ok(Self { rate_limiter, memory, tasks, personality, scheduler, mcp, brain, heartbeat, config_path })
    }

    /// Spawns the heartbeat loop as a background task and returns its handle.
    /// Front-ends run independently and are not started here.
    pub fn spawn_heartbeat(&self) -> tokio::task::JoinHandle<()> {
        let heartbeat = self.heartbeat.clone();
        tokio::spawn(async move { heartbeat.run().await })
    }

    /// Enables or disables a scheduled task both in memory and on disk: the
    /// config file at `config_path` is rewritten so the state survives a
    /// restart. Returns `false` if no such task is loaded.
    pub async fn set_task_enabled(&self, name: &str, enabled: bool) -> bool {
        if !self.scheduler.set_enabled(name, enabled).await {
            return false;
        }
        let mut config = Config::load(&self.config_path);
        config.persist_task_enabled(&self.config_path, name, enabled);
        true
    }

    /// Reverse-order shutdown: stop the heartbeat loop, let in-flight
    /// `think` calls finish on their own, then close every MCP server.
    pub async fn shutdown(self) {
        self.heartbeat.stop();
        self.brain.save_messages().await;
        {
            let limiter = self.rate_limiter.lock().await;
            limiter.save();
        }
        match Arc::try_unwrap(self.mcp) {
            Ok(mcp) => mcp.shutdown().await,
            Err(_) => tracing::warn!("MCP manager still has outstanding references at shutdown"),
        }
    }
}

fn build_provider_chain(config: &Config) -> ProviderChain {
    let mut chain = ProviderChain::new();
    for name in config.ai.provider_order() {
        let provider: anyhow::Result<Arc<dyn LlmProvider>> = match name {
            "anthropic" => AnthropicProvider::new(&config.ai.resolve_anthropic()).map(|p| Arc::new(p) as Arc<dyn LlmProvider>).map_err(Into::into),
            "openai" => OpenAiProvider::new(&config.ai.resolve_openai()).map(|p| Arc::new(p) as Arc<dyn LlmProvider>).map_err(Into::into),
            "gemini" => GeminiProvider::new(&config.ai.resolve_gemini()).map(|p| Arc::new(p) as Arc<dyn LlmProvider>).map_err(Into::into),
            "ollama" => OllamaProvider::new(&config.ai.resolve_ollama()).map(|p| Arc::new(p) as Arc<dyn LlmProvider>).map_err(Into::into),
            other => {
                tracing::warn!("unknown provider '{other}' in configured order, skipping");
                continue;
            }
        };
        match provider {
            Ok(provider) => chain = chain.add_provider(provider),
            Err(e) => tracing::warn!("failed to construct provider '{name}': {e}"),
        }
    }
    chain
}

fn register_builtin_actions(scheduler: &mut Scheduler, memory: Arc<MemoryStore>, tasks: Arc<TaskStore>) {
    scheduler.register_action(
        "memory_maintenance",
        Box::new(move || memory.forget_old(90, 0.2).map(|_| None).map_err(|e| e.to_string())),
    );

    let tasks_for_summary = tasks.clone();
    scheduler.register_action(
        "daily_summary",
        Box::new(move || {
            let stats = tasks_for_summary.get_stats().map_err(|e| e.to_string())?;
            Ok(Some(format!("Daily summary: {} open task(s), {} completed.", stats.pending, stats.completed)))
        }),
    );

    scheduler.register_action(
        "health_check",
        Box::new(|| Ok(None)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::NullDisplay;

    #[tokio::test]
    async fn starts_and_shuts_down_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.mcp.enabled = false;
        config.heartbeat.enabled = false;

        let controller = Controller::start(config, dir.path().join("config.yml"), dir.path().to_path_buf(), Arc::new(NullDisplay), None).await.unwrap();
        assert_eq!(controller.tasks.get_stats().unwrap().pending, 0);
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn set_task_enabled_persists_to_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.yml");
        let mut config = Config::default();
        config.mcp.enabled = false;
        config.heartbeat.enabled = false;
        config.scheduler.tasks.push(crate::config::ScheduledTaskConfig {
            name: "health_check".to_string(),
            schedule: "every(1).hours".to_string(),
            action: "health_check".to_string(),
            enabled: true,
        });
        std::fs::write(&config_path, serde_yaml::to_string(&config).unwrap()).unwrap();

        let controller = Controller::start(config, config_path.clone(), dir.path().to_path_buf(), Arc::new(NullDisplay), None).await.unwrap();
        assert!(controller.set_task_enabled("health_check", false).await);

        let reloaded = Config::load(&config_path);
        assert!(!reloaded.scheduler.tasks.iter().find(|t| t.name == "health_check").unwrap().enabled);

        controller.shutdown().await;
    }
}
