//! Provider identity used across the factory and the thin clients.

use serde::{Deserialize, Serialize};

/// Represents the provider (backend) used for large language model inference.
///
/// The factory keeps an ordered priority list of these; `auto` resolution
/// walks the list and picks the first live one. Adding more providers
/// (e.g., Anthropic Claude, Mistral API) means extending this enum and
/// registering a spec in the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Local Ollama runtime for on-device inference.
    Ollama,
    /// OpenAI chat-completions API.
    OpenAi,
    /// Deterministic in-process stub used by tests and dry runs.
    Mock,
}

impl ProviderKind {
    /// Stable lowercase name used in preference strings and state reports.
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Mock => "mock",
        }
    }

    /// Parses a provider name from a preference string segment.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Some(ProviderKind::Ollama),
            "openai" => Some(ProviderKind::OpenAi),
            "mock" => Some(ProviderKind::Mock),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
