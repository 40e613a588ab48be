//! Crate-wide error hierarchy for review-pipeline.
//!
//! Goals:
//! - Single root `Error` for all public functions.
//! - The §7-style taxonomy: configuration errors are fatal and never retried;
//!   provider errors go through the retry/fallback policy; stage errors follow
//!   the per-stage failure table; data-integrity errors skip the offending
//!   unit and keep the run alive.
//! - No dynamic dispatch, no async-trait, ergonomic `?` via `From` impls.

use thiserror::Error;

/// Convenient alias for crate-wide results.
pub type EngineResult<T> = Result<T, Error>;

/// Root error type for the review-pipeline crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad thresholds, unknown provider, malformed rule configuration.
    /// Fatal, surfaced immediately, never retried.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Provider-layer failure (timeout, rate-limit, auth). Retried per
    /// policy, then falls back or escalates to a stage failure.
    #[error(transparent)]
    Provider(#[from] llm_providers::LlmProviderError),

    /// A pipeline stage failed in a way its failure table does not absorb.
    #[error(transparent)]
    Stage(#[from] StageError),

    /// Malformed review unit or missing required fields; the offending unit
    /// is skipped with a warning.
    #[error(transparent)]
    Data(#[from] DataIntegrityError),

    /// Store I/O (conflict log, rule config, intent cache).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure in a persisted store.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    /// Whether the underlying failure is transient enough to retry.
    pub fn retryable(&self) -> bool {
        match self {
            Error::Provider(e) => e.retryable(),
            _ => false,
        }
    }
}

/// Configuration and setup errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Fusion thresholds must satisfy `0 <= low < medium < high <= 1`.
    #[error("invalid fusion thresholds: low={low}, medium={medium}, high={high}")]
    InvalidThresholds { low: f32, medium: f32, high: f32 },

    /// A numeric knob failed to parse or was out of range.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        reason: &'static str,
    },

    /// Rule configuration file could not be decoded.
    #[error("malformed rule configuration: {0}")]
    MalformedRules(String),
}

/// Per-stage failures that escape the degradation table.
#[derive(Debug, Error)]
pub enum StageError {
    /// The external unit source could not produce parse statistics or units.
    #[error("unit source unavailable: {0}")]
    UnitSource(String),

    /// All providers were exhausted for a call the stage cannot degrade.
    #[error("stage {stage} failed: {reason}")]
    Fatal { stage: &'static str, reason: String },

    /// The run was cancelled between events.
    #[error("run cancelled")]
    Cancelled,
}

/// Malformed input data; skippable per unit.
#[derive(Debug, Error)]
pub enum DataIntegrityError {
    #[error("review unit {unit_id} is malformed: {reason}")]
    MalformedUnit { unit_id: String, reason: &'static str },
}
