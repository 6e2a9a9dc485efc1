//! Chat front-ends. Both the terminal and (optional) HTTP front-end are thin
//! shells around [`ChatContext`], which owns command dispatch and the one
//! path into the brain.

pub mod terminal;

#[cfg(feature = "http-frontend")]
pub mod http;

use std::sync::Arc;

use companion_core::{MemoryStore, Personality, Priority, TaskStore};
use tokio::sync::Mutex;

use crate::brain::Brain;
use crate::commands::{find_command, split_command};
use crate::mcp::McpClientManager;

/// Everything a front-end needs to answer one message: command dispatch plus
/// the brain/memory/task handles commands act on.
#[derive(Clone)]
pub struct ChatContext {
    pub brain: Arc<Brain>,
    pub personality: Arc<Mutex<Personality>>,
    pub memory: Arc<MemoryStore>,
    pub tasks: Arc<TaskStore>,
    pub mcp: Option<Arc<McpClientManager>>,
}

impl ChatContext {
    /// Dispatches `input`: a recognized `/command` is handled locally and
    /// never reaches the brain; anything else is a normal chat turn.
    pub async fn handle_message(&self, input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.starts_with('/') {
            if let Some(descriptor) = find_command(trimmed) {
                let (_, argument) = split_command(trimmed);
                return self.run_command(descriptor.name, argument).await;
            }
            return format!("Unknown command: {trimmed}. Try /help.");
        }

        let system_prompt = {
            let personality = self.personality.lock().await;
            personality.system_prompt_context()
        };

        match self.brain.think(trimmed, &system_prompt, 3, self.mcp.is_some(), 3, None).await {
            Ok(result) => {
                let mut personality = self.personality.lock().await;
                let quality = result.chat_quality;
                personality.on_interaction(true, Some(trimmed), quality);
                personality.save();
                result.content
            }
            Err(crate::brain::error::BrainError::BudgetExhausted) => {
                "I've used up my token budget for today — let's pick this back up tomorrow.".to_string()
            }
            Err(e) => crate::brain::error::sanitize(&e.to_string()),
        }
    }

    async fn run_command(&self, name: &str, argument: Option<&str>) -> String {
        match name {
            "help" => crate::commands::COMMANDS.iter().map(|c| format!("/{} - {}", c.name, c.description)).collect::<Vec<_>>().join("\n"),
            "status" => {
                let personality = self.personality.lock().await;
                format!(
                    "{} is {} (level {}, {} xp). {}",
                    personality.name,
                    personality.mood.current.description(),
                    personality.progression.display_level(),
                    personality.progression.xp,
                    personality.battery_hint.clone().unwrap_or_default(),
                )
            }
            "stats" => {
                let (used, limit) = self.brain.get_stats().await;
                format!("Used {used}/{limit} tokens today.")
            }
            "remember" => self.cmd_remember(argument).await,
            "recall" => self.cmd_recall().await,
            "forget" => match self.memory.clear_all() {
                Ok(()) => "Memory cleared.".to_string(),
                Err(e) => format!("Failed to clear memory: {e}"),
            },
            "tasks" => self.cmd_tasks().await,
            "addtask" => self.cmd_addtask(argument).await,
            "done" => self.cmd_done(argument).await,
            "clear" => {
                self.brain.clear_history().await;
                "Conversation history cleared.".to_string()
            }
            "tools" => self.cmd_tools().await,
            _ => "Unrecognized command.".to_string(),
        }
    }

    async fn cmd_remember(&self, argument: Option<&str>) -> String {
        let Some(argument) = argument else { return "Usage: /remember <category> <key> <value>".to_string() };
        let mut parts = argument.splitn(3, ' ');
        let (Some(category), Some(key), Some(value)) = (parts.next(), parts.next(), parts.next()) else {
            return "Usage: /remember <category> <key> <value>".to_string();
        };
        match self.memory.remember(category, key, value, 0.8) {
            Ok(()) => format!("Remembered {key} = {value}."),
            Err(e) => format!("Failed to remember: {e}"),
        }
    }

    async fn cmd_recall(&self) -> String {
        match self.memory.recall_recent(10) {
            Ok(memories) if memories.is_empty() => "I don't have any memories stored yet.".to_string(),
            Ok(memories) => memories.iter().map(|m| format!("- {}: {}", m.key, m.value)).collect::<Vec<_>>().join("\n"),
            Err(e) => format!("Failed to recall: {e}"),
        }
    }

    async fn cmd_tasks(&self) -> String {
        match self.tasks.list_tasks(None, None, Some(10)) {
            Ok(tasks) if tasks.is_empty() => "No tasks yet.".to_string(),
            Ok(tasks) => tasks.iter().map(|t| format!("- [{}] {} ({:?})", t.id, t.title, t.status)).collect::<Vec<_>>().join("\n"),
            Err(e) => format!("Failed to list tasks: {e}"),
        }
    }

    async fn cmd_addtask(&self, argument: Option<&str>) -> String {
        let Some(title) = argument else { return "Usage: /addtask <title>".to_string() };
        match self.tasks.create_task(title, None, Priority::Medium, None, None, Vec::new(), None) {
            Ok(task) => format!("Added task {} ({}).", task.title, task.id),
            Err(e) => format!("Failed to add task: {e}"),
        }
    }

    async fn cmd_done(&self, argument: Option<&str>) -> String {
        let Some(id_str) = argument else { return "Usage: /done <task-id>".to_string() };
        let Ok(id) = uuid::Uuid::parse_str(id_str.trim()) else { return format!("'{id_str}' isn't a valid task id.") };
        match self.tasks.complete_task(id) {
            Ok(Some(task)) => format!("Completed: {}", task.title),
            Ok(None) => "No task with that id.".to_string(),
            Err(e) => format!("Failed to complete task: {e}"),
        }
    }

    async fn cmd_tools(&self) -> String {
        let Some(mcp) = &self.mcp else { return "MCP is disabled.".to_string() };
        let names = mcp.server_names();
        if names.is_empty() {
            "No MCP servers are running.".to_string()
        } else {
            format!("MCP servers: {}", names.join(", "))
        }
    }
}
