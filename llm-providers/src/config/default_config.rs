//! Default per-provider configs loaded from environment variables.
//!
//! This module provides convenience constructors for [`LlmModelConfig`],
//! grouped by provider. Unlike strict config loaders, these are lenient:
//! a missing credential does not fail here — it is reported through the
//! factory's `ProviderState` so that `auto` resolution can skip the
//! provider instead of aborting the process.
//!
//! # Environment variables
//!
//! Common:
//! - `LLM_MAX_TOKENS` = optional max tokens (u32)
//! - `LLM_CALL_TIMEOUT_SECS` = optional per-call timeout override
//!
//! Ollama-specific:
//! - `OLLAMA_URL`   = endpoint (default `http://127.0.0.1:11434`)
//! - `OLLAMA_MODEL` = default model (default `qwen3:14b`)
//!
//! OpenAI-specific:
//! - `OPENAI_URL`     = endpoint base (default `https://api.openai.com`)
//! - `OPENAI_API_KEY` = credential (mandatory for the provider to be live)
//! - `OPENAI_MODEL`   = default model (default `gpt-4o-mini`)

use crate::config::{llm_model_config::LlmModelConfig, llm_provider::ProviderKind};

fn env(k: &str, dflt: &str) -> String {
    std::env::var(k)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| dflt.to_string())
}

fn env_opt_u32(k: &str) -> Option<u32> {
    std::env::var(k).ok().and_then(|v| v.parse().ok())
}

fn env_opt_u64(k: &str) -> Option<u64> {
    std::env::var(k).ok().and_then(|v| v.parse().ok())
}

/// Config for the local Ollama backend.
///
/// Credentials are never required; a local runtime is assumed reachable
/// until a liveness probe says otherwise.
pub fn config_ollama() -> LlmModelConfig {
    LlmModelConfig {
        provider: ProviderKind::Ollama,
        model: env("OLLAMA_MODEL", "qwen3:14b"),
        endpoint: env("OLLAMA_URL", "http://127.0.0.1:11434"),
        api_key: None,
        max_tokens: env_opt_u32("LLM_MAX_TOKENS"),
        temperature: Some(0.2),
        top_p: None,
        timeout_secs: env_opt_u64("LLM_CALL_TIMEOUT_SECS"),
    }
}

/// Config for the OpenAI backend.
///
/// `api_key` is `None` when `OPENAI_API_KEY` is unset; the factory then
/// marks the provider as lacking credentials.
pub fn config_openai() -> LlmModelConfig {
    LlmModelConfig {
        provider: ProviderKind::OpenAi,
        model: env("OPENAI_MODEL", "gpt-4o-mini"),
        endpoint: env("OPENAI_URL", "https://api.openai.com"),
        api_key: std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty()),
        max_tokens: env_opt_u32("LLM_MAX_TOKENS"),
        temperature: Some(0.2),
        top_p: None,
        timeout_secs: env_opt_u64("LLM_CALL_TIMEOUT_SECS"),
    }
}

/// Config for the deterministic mock backend (tests, dry runs).
pub fn config_mock() -> LlmModelConfig {
    LlmModelConfig {
        provider: ProviderKind::Mock,
        model: "mock".to_string(),
        endpoint: "mock://local".to_string(),
        api_key: None,
        max_tokens: None,
        temperature: Some(0.0),
        top_p: None,
        timeout_secs: None,
    }
}
