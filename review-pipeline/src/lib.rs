//! Public entry for the adaptive-context review pipeline.
//!
//! One high-level function to run the whole pipeline for a pending change.
//!
//! 1) **Parse & build** — the external unit source reports diff statistics
//!    and yields immutable review units (malformed units are skipped).
//! 2) **Rule layer** — the configuration-driven estimator suggests a context
//!    level per unit with a confidence score.
//! 3) **Intent & planning** — one model call summarizes the change intent
//!    (cached on disk); the planner proposes per-unit context levels as
//!    strict JSON, in batches.
//! 4) **Fusion** — rule and planner suggestions are reconciled per unit;
//!    disagreements are appended to the conflict log that feeds the
//!    rule-growth learner.
//! 5) **Context & review** — bounded-parallel review over assembled context
//!    bundles, streamed as ordered events, rendered into a markdown report.
//!
//! The pipeline uses `tracing` for debug logging and avoids `async-trait`
//! and heap trait objects (no `Box<dyn ...>`). It relies on plain `async fn`
//! and enum dispatch over thin provider clients and boundary capabilities.

pub mod config;
pub mod conflict_log;
pub mod errors;
pub mod events;
pub mod fusion;
pub mod model;
pub mod pipeline;
pub mod rules;
pub mod sources;

pub use config::{EngineConfig, LlmPolicy, ReviewKnobs, SharedConfig};
pub use conflict_log::ConflictLog;
pub use errors::{ConfigError, DataIntegrityError, EngineResult, Error, StageError};
pub use events::{FallbackCounter, FallbackSummary, ReviewEvent, Stage};
pub use fusion::{ConfidenceBand, FusionThresholds, decide};
pub use model::{
    Conflict, ConflictKind, ContextLevel, DecisionSource, FusionDecision, PlanSuggestion,
    ReviewUnit, RuleEstimate, UnitMetrics,
};
pub use pipeline::retry::CancelFlag;
pub use pipeline::{EngineDeps, ReviewRequest, ReviewRun, start_review};
pub use rules::{
    LearnedRule, PatternRule, RuleConfig, RuleEstimator, RuleProvenance, RuleStore,
};
pub use sources::{ContextSource, DiffStats, ScanFinding, Scanner, UnitSource};
