//! Unified error handling for `llm-providers`.
//!
//! This module exposes a single top-level error type [`LlmProviderError`] for the
//! whole library, and groups domain-specific errors in nested enums
//! ([`FactoryError`], [`ClientError`]). The orchestrating caller uses
//! [`LlmProviderError::retryable`] to decide whether a failed call is worth
//! repeating before falling back to the next provider.
//!
//! All messages include the suffix `[llm-providers]` to simplify attribution in logs.

use thiserror::Error;

/* ------------------------------------------------------------------------- */
/* Public result alias                                                       */
/* ------------------------------------------------------------------------- */

/// Unified result alias for the entire crate.
pub type Result<T> = std::result::Result<T, LlmProviderError>;

/* ------------------------------------------------------------------------- */
/* Top-level error                                                           */
/* ------------------------------------------------------------------------- */

/// Top-level error for the `llm-providers` crate.
///
/// Variants wrap domain-specific enums (factory/client) and a few common cases
/// (HTTP transport, catalog persistence). Prefer adding new sub-enums for
/// distinct domains instead of growing this type indefinitely.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum LlmProviderError {
    /// Preference resolution / registry errors.
    #[error(transparent)]
    Factory(#[from] FactoryError),

    /// Per-client transport/protocol/decoding errors.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Underlying HTTP transport error (e.g., `reqwest::Error`).
    #[error("[llm-providers] transport error: {0}")]
    HttpTransport(#[from] reqwest::Error),

    /// Catalog file I/O failure.
    #[error("[llm-providers] catalog io error: {0}")]
    CatalogIo(#[from] std::io::Error),

    /// Catalog JSON (de)serialization failure.
    #[error("[llm-providers] catalog decode error: {0}")]
    CatalogDecode(#[from] serde_json::Error),
}

impl LlmProviderError {
    /// Whether the failure is transient enough to retry the same provider.
    ///
    /// Timeouts, rate limits, 5xx responses and status-less network failures
    /// are retryable. Registry and credential problems are not.
    pub fn retryable(&self) -> bool {
        match self {
            LlmProviderError::Client(ClientError::Timeout) => true,
            LlmProviderError::Client(ClientError::HttpStatus { status, .. }) => {
                *status == 429 || (500..=599).contains(status)
            }
            LlmProviderError::HttpTransport(e) => {
                e.is_timeout() || e.is_connect() || e.status().is_none_or(|s| s.is_server_error())
            }
            _ => false,
        }
    }
}

/* ------------------------------------------------------------------------- */
/* Factory errors                                                            */
/* ------------------------------------------------------------------------- */

/// Errors produced while resolving a model preference to a client.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum FactoryError {
    /// The preference names a provider that is not registered.
    #[error("[llm-providers] unknown provider: {0}")]
    UnknownProvider(String),

    /// `auto` resolution walked the whole priority list without a live provider.
    #[error("[llm-providers] no provider available")]
    NoProviderAvailable,

    /// The explicitly requested provider exists but cannot serve calls.
    #[error("[llm-providers] provider {name} unavailable: {reason}")]
    Unavailable {
        /// Registered provider name (e.g. `ollama`).
        name: String,
        /// Human-readable reason (missing credentials, failed probe, ...).
        reason: String,
    },
}

/* ------------------------------------------------------------------------- */
/* Client errors                                                             */
/* ------------------------------------------------------------------------- */

/// Errors produced by the thin provider clients.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ClientError {
    /// The endpoint is empty or does not start with http/https.
    #[error("[llm-providers] invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The provider requires an API key that was not configured.
    #[error("[llm-providers] missing api key for {0}")]
    MissingApiKey(&'static str),

    /// Upstream returned a non-successful HTTP status.
    #[error("[llm-providers] HTTP {status} from {url}: {snippet}")]
    HttpStatus {
        /// Numeric HTTP status code.
        status: u16,
        /// Request URL.
        url: String,
        /// Short snippet of the response body (trimmed).
        snippet: String,
    },

    /// The call exceeded the client-side timeout.
    #[error("[llm-providers] request timed out")]
    Timeout,

    /// Response payload could not be decoded as expected.
    #[error("[llm-providers] decode error: {0}")]
    Decode(String),

    /// Chat completion returned no choices.
    #[error("[llm-providers] empty choices in completion response")]
    EmptyChoices,
}

/// Trims a response body down to a log-friendly one-line snippet.
pub fn make_snippet(body: &str) -> String {
    let one_line = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if one_line.chars().count() <= 160 {
        return one_line;
    }
    one_line.chars().take(160).collect::<String>() + "…"
}
