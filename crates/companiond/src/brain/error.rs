//! Brain layer error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrainError {
    #[error("LLM provider error: {0}")]
    LlmError(String),

    #[error("LLM request timed out after {0}s")]
    LlmTimeout(u64),

    #[error("provider hit a rate limit")]
    RateLimit,

    #[error("provider quota exceeded")]
    QuotaExceeded,

    #[error("all configured providers are exhausted")]
    AllProvidersExhausted,

    #[error("token budget exhausted for today")]
    BudgetExhausted,

    #[error("MCP error: {0}")]
    Mcp(#[from] crate::mcp::McpError),

    #[error("memory store error: {0}")]
    Memory(#[from] companion_core::CoreError),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BrainResult<T> = Result<T, BrainError>;

/// Classifies a provider's raw error text, per the fixed substring table:
/// `rate`/`429` -> RateLimit, `quota`/`insufficient`/`resource`/`exhausted` ->
/// QuotaExceeded, otherwise a generic provider error.
pub fn classify_provider_error(raw: &str) -> BrainError {
    let lower = raw.to_lowercase();
    if lower.contains("rate") || lower.contains("429") {
        BrainError::RateLimit
    } else if lower.contains("quota")
        || lower.contains("insufficient")
        || lower.contains("resource")
        || lower.contains("exhausted")
    {
        BrainError::QuotaExceeded
    } else {
        BrainError::LlmError(sanitize(raw))
    }
}

/// Redacts API-key-shaped substrings before an error string reaches a user.
pub fn sanitize(text: &str) -> String {
    lazy_static_patterns().iter().fold(text.to_string(), |acc, re| re.replace_all(&acc, "[REDACTED]").to_string())
}

fn lazy_static_patterns() -> Vec<regex::Regex> {
    vec![
        regex::Regex::new(r"sk-ant-[A-Za-z0-9-]{10,}").unwrap(),
        regex::Regex::new(r"sk-[A-Za-z0-9-]{10,}").unwrap(),
        regex::Regex::new(r"(?i)key[=:\s]+\S{10,}").unwrap(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limit() {
        assert!(matches!(classify_provider_error("429 Too Many Requests"), BrainError::RateLimit));
    }

    #[test]
    fn classifies_quota() {
        assert!(matches!(classify_provider_error("insufficient_quota exceeded"), BrainError::QuotaExceeded));
    }

    #[test]
    fn sanitizes_anthropic_keys() {
        let redacted = sanitize("auth failed for sk-ant-abcdefghijklmno123");
        assert!(!redacted.contains("sk-ant-abcdefghijklmno123"));
        assert!(redacted.contains("[REDACTED]"));
    }
}
