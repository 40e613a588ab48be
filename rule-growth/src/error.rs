//! Typed error for the rule-growth crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GrowthError {
    /// Errors from the underlying review-pipeline stores (conflict log,
    /// rule configuration).
    #[error("pipeline store error: {0}")]
    Store(#[from] review_pipeline::Error),

    /// JSON (de)serialization issues (should be rare).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic IO if needed by future extensions.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested rule id is not among the currently computed
    /// applicable rules.
    #[error("no applicable rule with id {0}")]
    UnknownRule(String),
}
