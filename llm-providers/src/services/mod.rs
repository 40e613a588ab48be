//! Thin provider clients with enum dispatch (no `async-trait`, no `Box<dyn>`).
//!
//! Each backend implements the same single capability — `generate(request)`
//! returning plain text plus token usage — and [`ProviderClient`] dispatches
//! over them. The factory decides which variant to construct; the pipeline
//! never sees a concrete client type.

pub mod mock_service;
pub mod ollama_service;
pub mod open_ai_service;

use serde::{Deserialize, Serialize};

use crate::error_handler::Result;
use mock_service::MockService;
use ollama_service::OllamaService;
use open_ai_service::OpenAiService;

/// A single non-streaming generation request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// User prompt (already fully assembled by the caller).
    pub prompt: String,
    /// Optional system instruction (applies to chat-style providers).
    pub system: Option<String>,
}

impl LlmRequest {
    /// Request with a prompt only.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
        }
    }

    /// Attach a system instruction.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Token accounting reported (or estimated) for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Rough 4-chars-per-token estimate for backends that report nothing.
    pub fn estimate(prompt: &str, completion: &str) -> Self {
        let p = (prompt.chars().count() / 4) as u64;
        let c = (completion.chars().count() / 4) as u64;
        Self {
            prompt_tokens: p,
            completion_tokens: c,
            total_tokens: p + c,
        }
    }

    /// Accumulate another call's usage into this one.
    pub fn merge(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Result of one generation call.
#[derive(Debug, Clone)]
pub struct LlmReply {
    /// Plain-text model output.
    pub text: String,
    /// Reported or estimated token usage.
    pub usage: TokenUsage,
    /// Model that served the call.
    pub model: String,
}

/// Enum-dispatched provider client.
#[derive(Debug)]
pub enum ProviderClient {
    Ollama(OllamaService),
    OpenAi(OpenAiService),
    Mock(MockService),
}

impl ProviderClient {
    /// Run one non-streaming generation call.
    pub async fn generate(&self, req: &LlmRequest) -> Result<LlmReply> {
        match self {
            ProviderClient::Ollama(c) => c.generate(req).await,
            ProviderClient::OpenAi(c) => c.generate(req).await,
            ProviderClient::Mock(c) => c.generate(req).await,
        }
    }

    /// Model identifier the client is bound to.
    pub fn model(&self) -> &str {
        match self {
            ProviderClient::Ollama(c) => c.model(),
            ProviderClient::OpenAi(c) => c.model(),
            ProviderClient::Mock(c) => c.model(),
        }
    }
}
