//! Top-level configuration: loaded from `config.yml` with every key
//! optional and defaulted, missing-file-is-fine rather than demanding a
//! config file exist.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::brain::llm::config::AiConfig;
use crate::mcp::McpConfig;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemoryPromptContextConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for MemoryPromptContextConfig {
    fn default() -> Self {
        Self { enabled: true, max_items: default_max_items(), max_chars: default_max_chars() }
    }
}

fn default_max_items() -> usize {
    6
}
fn default_max_chars() -> usize {
    600
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemoryCaptureConfig {
    #[serde(default = "default_true")]
    pub rule_based: bool,
    #[serde(default)]
    pub llm_enabled: bool,
    #[serde(default = "default_max_new_per_turn")]
    pub max_new_per_turn: usize,
}

impl Default for MemoryCaptureConfig {
    fn default() -> Self {
        Self { rule_based: true, llm_enabled: false, max_new_per_turn: default_max_new_per_turn() }
    }
}

fn default_max_new_per_turn() -> usize {
    5
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub prompt_context: MemoryPromptContextConfig,
    #[serde(default)]
    pub capture: MemoryCaptureConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { enabled: true, prompt_context: MemoryPromptContextConfig::default(), capture: MemoryCaptureConfig::default() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tick_interval")]
    pub tick_interval: u64,
    #[serde(default = "default_true")]
    pub enable_mood_behaviors: bool,
    #[serde(default = "default_true")]
    pub enable_time_behaviors: bool,
    #[serde(default = "default_true")]
    pub enable_social_behaviors: bool,
    #[serde(default = "default_true")]
    pub enable_maintenance_behaviors: bool,
    #[serde(default = "default_true")]
    pub enable_battery_behaviors: bool,
    #[serde(default = "default_thought_min")]
    pub thought_interval_min_minutes: u64,
    #[serde(default = "default_thought_max")]
    pub thought_interval_max_minutes: u64,
    #[serde(default = "default_thought_surface_probability")]
    pub thought_surface_probability: f64,
    #[serde(default = "default_quiet_start")]
    pub quiet_hours_start: u32,
    #[serde(default = "default_quiet_end")]
    pub quiet_hours_end: u32,
    #[serde(default = "default_battery_low")]
    pub battery_low_threshold: u8,
    #[serde(default = "default_battery_critical")]
    pub battery_critical_threshold: u8,
    #[serde(default = "default_battery_full")]
    pub battery_full_threshold: u8,
}

fn default_tick_interval() -> u64 {
    60
}
fn default_thought_min() -> u64 {
    15
}
fn default_thought_max() -> u64 {
    30
}
fn default_thought_surface_probability() -> f64 {
    0.35
}
fn default_quiet_start() -> u32 {
    23
}
fn default_quiet_end() -> u32 {
    7
}
fn default_battery_low() -> u8 {
    20
}
fn default_battery_critical() -> u8 {
    10
}
fn default_battery_full() -> u8 {
    95
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval: default_tick_interval(),
            enable_mood_behaviors: true,
            enable_time_behaviors: true,
            enable_social_behaviors: true,
            enable_maintenance_behaviors: true,
            enable_battery_behaviors: true,
            thought_interval_min_minutes: default_thought_min(),
            thought_interval_max_minutes: default_thought_max(),
            thought_surface_probability: default_thought_surface_probability(),
            quiet_hours_start: default_quiet_start(),
            quiet_hours_end: default_quiet_end(),
            battery_low_threshold: default_battery_low(),
            battery_critical_threshold: default_battery_critical(),
            battery_full_threshold: default_battery_full(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduledTaskConfig {
    pub name: String,
    pub schedule: String,
    pub action: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub tasks: Vec<ScheduledTaskConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { enabled: true, tasks: Vec::new() }
    }
}

fn default_true() -> bool {
    true
}

/// The whole configuration tree, `serde_yaml`-deserialized from `config.yml`
/// with every field optional — a missing or absent file just means defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub state_dir: Option<String>,
}

impl Config {
    /// Reads `path`; a missing file or any load error yields
    /// [`Config::default`] rather than a hard failure.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => serde_yaml::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse config, using defaults");
                Config::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read config, using defaults");
                Config::default()
            }
        }
    }

    pub fn state_dir(&self) -> std::path::PathBuf {
        match &self.state_dir {
            Some(dir) => std::path::PathBuf::from(shellexpand_home(dir)),
            None => dirs_home().join(".companion"),
        }
    }

    /// Rewrites a scheduled task's `enabled` flag back into the config file
    /// at `path`, preserving every other key. A write failure is logged and
    /// the in-memory change still stands.
    pub fn persist_task_enabled(&mut self, path: &Path, task_name: &str, enabled: bool) {
        if let Some(task) = self.scheduler.tasks.iter_mut().find(|t| t.name == task_name) {
            task.enabled = enabled;
        }
        match serde_yaml::to_string(self) {
            Ok(text) => {
                if let Err(e) = std::fs::write(path, text) {
                    tracing::warn!(path = %path.display(), error = %e, "failed to persist config change");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize config"),
        }
    }
}

fn dirs_home() -> std::path::PathBuf {
    std::env::var_os("HOME").map(std::path::PathBuf::from).unwrap_or_else(|| std::path::PathBuf::from("."))
}

fn shellexpand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs_home().join(rest).to_string_lossy().into_owned()
    } else {
        path.to_string()
    }
}

pub type McpServerMap = HashMap<String, crate::mcp::McpServerConfig>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/path/config.yml"));
        assert!(config.ai.primary == "anthropic");
        assert!(config.heartbeat.enabled);
    }

    #[test]
    fn parses_minimal_yaml() {
        let yaml = "ai:\n  primary: ollama\nheartbeat:\n  tick_interval: 30\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.ai.primary, "ollama");
        assert_eq!(config.heartbeat.tick_interval, 30);
        assert!(config.memory.enabled);
    }
}
