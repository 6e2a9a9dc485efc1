//! MCP (Model Context Protocol) client manager: starts configured tool
//! servers, discovers their tools, and routes calls back to the right one.

mod transport;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::brain::llm::ToolSpec;
use transport::{HttpTransport, StdioTransport, Transport};

#[derive(Error, Debug)]
pub enum McpError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("server returned an error: {0}")]
    Rpc(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("unknown server: {0}")]
    UnknownServer(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type McpResult<T> = Result<T, McpError>;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum McpTransportKind {
    Stdio,
    Http,
}

/// One configured MCP server entry: how to reach it and whether it's on.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub transport: Option<McpTransportKind>,
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub servers: HashMap<String, McpServerConfig>,
    #[serde(default = "default_max_tools")]
    pub max_tools: usize,
}

fn default_max_tools() -> usize {
    20
}

impl Default for McpConfig {
    fn default() -> Self {
        Self { enabled: true, servers: HashMap::new(), max_tools: default_max_tools() }
    }
}

#[derive(Debug, Clone)]
struct DiscoveredTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
    server_name: String,
}

/// A server the manager knows how to keep open and to route `tools/call` to.
struct ServerHandle {
    transport: Transport,
}

/// Servers that are always included regardless of keyword matching — the
/// ones a companion would need on essentially every turn.
const CORE_SERVERS: &[&str] = &["tasks", "system"];

const ROUTING_KEYWORDS: &[&str] = &[
    "gmail", "email", "mail", "inbox", "calendar", "event", "meeting", "schedule", "sheet", "sheets",
    "spreadsheet", "notion", "note", "notes", "github", "git", "repo", "pr", "issue", "slack", "message",
    "chat", "drive", "file", "document", "doc",
];

/// Manages the whole set of configured MCP servers: process lifecycle, tool
/// discovery and query-aware tool selection for a given turn.
pub struct McpClientManager {
    servers: HashMap<String, ServerHandle>,
    tools: Mutex<HashMap<String, DiscoveredTool>>,
    max_tools: usize,
}

impl McpClientManager {
    pub fn new(max_tools: usize) -> Self {
        Self { servers: HashMap::new(), tools: Mutex::new(HashMap::new()), max_tools }
    }

    /// Starts every enabled server in `config`. A server that fails to start
    /// is logged and skipped — it never blocks the others or the caller.
    pub async fn start_all(config: &McpConfig) -> Self {
        let mut manager = Self::new(config.max_tools);

        for (name, server_config) in &config.servers {
            if !server_config.enabled {
                tracing::debug!("skipping disabled MCP server '{name}'");
                continue;
            }
            if let Err(e) = manager.start_server(name, server_config).await {
                tracing::warn!("failed to start MCP server '{name}': {e}");
            }
        }
        manager
    }

    async fn start_server(&mut self, name: &str, config: &McpServerConfig) -> McpResult<()> {
        let is_http = matches!(config.transport, Some(McpTransportKind::Http)) || config.url.is_some();

        let transport = if is_http {
            let url = config.url.clone().ok_or_else(|| McpError::Transport(format!("server '{name}' needs a url for http transport")))?;
            Transport::Http(HttpTransport::new(url, config.headers.clone()))
        } else {
            let command = config.command.as_ref().ok_or_else(|| McpError::Transport(format!("server '{name}' needs a command for stdio transport")))?;
            Transport::Stdio(StdioTransport::spawn(command, &config.args, &config.env).await?)
        };

        let init_result = transport
            .request(
                "initialize",
                serde_json::json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "companiond", "version": env!("CARGO_PKG_VERSION")},
                }),
            )
            .await?;
        transport.notify("notifications/initialized", serde_json::json!({})).await?;

        let server_name = init_result.get("serverInfo").and_then(|s| s.get("name")).and_then(|n| n.as_str()).unwrap_or(name);
        tracing::info!("MCP server '{name}' initialized ({server_name})");

        let tools_result = transport.request("tools/list", serde_json::json!({})).await?;
        let discovered = tools_result.get("tools").and_then(|t| t.as_array()).cloned().unwrap_or_default();

        let mut tools = self.tools.lock().await;
        for tool in &discovered {
            let Some(tool_name) = tool.get("name").and_then(|n| n.as_str()) else { continue };
            let full_name = format!("{name}__{tool_name}");
            tools.insert(
                full_name,
                DiscoveredTool {
                    name: tool_name.to_string(),
                    description: tool.get("description").and_then(|d| d.as_str()).unwrap_or_default().to_string(),
                    input_schema: tool.get("inputSchema").cloned().unwrap_or(serde_json::json!({})),
                    server_name: name.to_string(),
                },
            );
        }
        drop(tools);

        tracing::info!("MCP server '{name}' provides {} tools", discovered.len());
        self.servers.insert(name.to_string(), ServerHandle { transport });
        Ok(())
    }

    /// Invokes `full_name` (as returned by [`Self::get_tools_for_query`])
    /// and returns the tool's textual result.
    pub async fn call_tool(&self, full_name: &str, arguments: serde_json::Value) -> McpResult<String> {
        let tools = self.tools.lock().await;
        let tool = tools.get(full_name).ok_or_else(|| McpError::UnknownTool(full_name.to_string()))?;
        let (server_name, tool_name) = (tool.server_name.clone(), tool.name.clone());
        drop(tools);

        let server = self.servers.get(&server_name).ok_or_else(|| McpError::UnknownServer(server_name.clone()))?;
        let result = server.transport.request("tools/call", serde_json::json!({"name": tool_name, "arguments": arguments})).await?;

        if let Some(content) = result.get("content").and_then(|c| c.as_array()) {
            if let Some(first) = content.first() {
                if let Some(text) = first.get("text").and_then(|t| t.as_str()) {
                    return Ok(text.to_string());
                }
            }
        }
        Ok(result.to_string())
    }

    /// Query-aware tool selection: core servers always included,
    /// keyword-matched tools added with no limit, remaining slots filled up
    /// to the soft `max_tools` cap, then a hard cap of 100.
    pub async fn get_tools_for_query(&self, user_text: &str) -> Vec<ToolSpec> {
        let tools = self.tools.lock().await;
        let query_lower = user_text.to_lowercase();

        let mut core = Vec::new();
        let mut matched = Vec::new();
        let mut other = Vec::new();

        let matched_keywords: Vec<&&str> = ROUTING_KEYWORDS.iter().filter(|kw| query_lower.contains(**kw)).collect();

        for (full_name, tool) in tools.iter() {
            let spec = ToolSpec {
                name: full_name.clone(),
                description: format!("[{}] {}", tool.server_name, tool.description),
                input_schema: tool.input_schema.clone(),
            };

            if CORE_SERVERS.contains(&tool.server_name.as_str()) {
                core.push(spec);
            } else if !matched_keywords.is_empty()
                && matched_keywords.iter().any(|kw| full_name.to_lowercase().contains(**kw) || tool.description.to_lowercase().contains(**kw))
            {
                matched.push(spec);
            } else {
                other.push(spec);
            }
        }
        drop(tools);

        let remaining = self.max_tools.saturating_sub(core.len() + matched.len());
        let mut selected = core;
        selected.extend(matched);
        selected.extend(other.into_iter().take(remaining));

        let mut seen = std::collections::HashSet::new();
        selected.retain(|t| seen.insert(t.name.clone()));

        const HARD_CAP: usize = 100;
        if selected.len() > HARD_CAP {
            tracing::warn!("MCP tool selection hit the hard cap: {} -> {HARD_CAP}", selected.len());
            selected.truncate(HARD_CAP);
        }
        selected
    }

    pub async fn tool_count(&self) -> usize {
        self.tools.lock().await.len()
    }

    pub fn server_names(&self) -> Vec<&str> {
        self.servers.keys().map(|s| s.as_str()).collect()
    }

    /// Shuts every server down: stdio servers get their stdin closed and up
    /// to five seconds to exit before being killed outright.
    pub async fn shutdown(self) {
        for (name, handle) in self.servers {
            tracing::info!("stopping MCP server '{name}'");
            handle.transport.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(server: &str, name: &str) -> DiscoveredTool {
        DiscoveredTool { name: name.to_string(), description: format!("does {name}"), input_schema: serde_json::json!({}), server_name: server.to_string() }
    }

    #[tokio::test]
    async fn core_servers_always_included() {
        let manager = McpClientManager::new(5);
        manager.tools.lock().await.insert("tasks__list".to_string(), tool("tasks", "list"));
        manager.tools.lock().await.insert("weather__forecast".to_string(), tool("weather", "forecast"));

        let selected = manager.get_tools_for_query("").await;
        assert!(selected.iter().any(|t| t.name == "tasks__list"));
    }

    #[tokio::test]
    async fn keyword_match_is_not_capped_by_soft_limit() {
        let manager = McpClientManager::new(1);
        for i in 0..5 {
            manager.tools.lock().await.insert(format!("gsuite__gmail_{i}"), tool("gsuite", &format!("gmail_{i}")));
        }
        manager.tools.lock().await.insert("weather__forecast".to_string(), tool("weather", "forecast"));

        let selected = manager.get_tools_for_query("check my gmail inbox").await;
        let gmail_count = selected.iter().filter(|t| t.name.contains("gmail")).count();
        assert_eq!(gmail_count, 5);
    }
}
