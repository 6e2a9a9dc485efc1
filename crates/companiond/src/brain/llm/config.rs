//! LLM provider configuration: config-file values with environment-variable
//! fallback for secrets, never the reverse (API keys never live in source).

use serde::{Deserialize, Serialize};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub base_url: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self { api_key: None, model: None, max_tokens: None, base_url: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub daily_tokens: u32,
    pub per_request_max: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self { daily_tokens: 10_000, per_request_max: 500 }
    }
}

/// `ai:` section of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub primary: String,
    #[serde(default)]
    pub anthropic: ProviderSettings,
    #[serde(default)]
    pub openai: ProviderSettings,
    #[serde(default)]
    pub gemini: ProviderSettings,
    #[serde(default)]
    pub ollama: ProviderSettings,
    #[serde(default)]
    pub budget: BudgetConfig,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            primary: "anthropic".to_string(),
            anthropic: ProviderSettings::default(),
            openai: ProviderSettings::default(),
            gemini: ProviderSettings::default(),
            ollama: ProviderSettings::default(),
            budget: BudgetConfig::default(),
        }
    }
}

/// Resolved, ready-to-construct settings for one provider: config values with
/// env vars filled in for anything the config omitted.
#[derive(Debug, Clone)]
pub struct ResolvedProvider {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl AiConfig {
    /// Resolves provider order: primary first, the rest in the fixed
    /// fallback order `[anthropic, openai, gemini, ollama]` with the primary
    /// promoted to the front and not duplicated.
    pub fn provider_order(&self) -> Vec<&str> {
        let fixed = ["anthropic", "openai", "gemini", "ollama"];
        let mut order = vec![self.primary.as_str()];
        order.extend(fixed.iter().filter(|p| **p != self.primary));
        order
    }

    pub fn resolve_anthropic(&self) -> ResolvedProvider {
        ResolvedProvider {
            api_key: self.anthropic.api_key.clone().or_else(|| std::env::var("ANTHROPIC_API_KEY").ok()),
            model: self.anthropic.model.clone().unwrap_or_else(|| "claude-sonnet-4-5-20250929".to_string()),
            base_url: self.anthropic.base_url.clone().unwrap_or_else(|| "https://api.anthropic.com/v1/messages".to_string()),
            max_tokens: self.anthropic.max_tokens.unwrap_or(1024),
            timeout_secs: 30,
        }
    }

    pub fn resolve_openai(&self) -> ResolvedProvider {
        let base_url = self.openai.base_url.clone().unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let api_key = self.openai.api_key.clone().or_else(|| {
            if base_url.contains("api.groq.com") {
                std::env::var("GROQ_API_KEY").ok()
            } else if base_url.contains("ollama.com") {
                std::env::var("OLLAMA_API_KEY").ok()
            } else {
                std::env::var("OPENAI_API_KEY").ok()
            }
        });

        ResolvedProvider {
            api_key,
            model: self.openai.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string()),
            base_url,
            max_tokens: self.openai.max_tokens.unwrap_or(1024),
            timeout_secs: 30,
        }
    }

    pub fn resolve_gemini(&self) -> ResolvedProvider {
        ResolvedProvider {
            api_key: self.gemini.api_key.clone().or_else(|| {
                std::env::var("GOOGLE_API_KEY").ok().or_else(|| std::env::var("GEMINI_API_KEY").ok())
            }),
            model: self.gemini.model.clone().unwrap_or_else(|| "gemini-1.5-flash".to_string()),
            base_url: self.gemini.base_url.clone().unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            max_tokens: self.gemini.max_tokens.unwrap_or(1024),
            timeout_secs: 30,
        }
    }

    pub fn resolve_ollama(&self) -> ResolvedProvider {
        ResolvedProvider {
            api_key: self.ollama.api_key.clone(),
            model: self.ollama.model.clone().unwrap_or_else(|| env_or("COMPANION_OLLAMA_MODEL", "llama3.2")),
            base_url: self.ollama.base_url.clone().unwrap_or_else(|| env_or("COMPANION_OLLAMA_URL", "http://localhost:11434")),
            max_tokens: self.ollama.max_tokens.unwrap_or(1024),
            timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_order_promotes_primary() {
        let config = AiConfig { primary: "ollama".to_string(), ..AiConfig::default() };
        assert_eq!(config.provider_order(), vec!["ollama", "anthropic", "openai", "gemini"]);
    }
}
