//! Runtime configuration loaded from environment variables.
//!
//! Everything has a default; `EngineConfig::from_env` never fails for missing
//! keys, only for values that fail validation (bad thresholds). The config is
//! shared behind [`SharedConfig`] and hot-reloadable: `reload_from_env`
//! replaces the snapshot without restarting the process, and every run reads
//! its knobs at start.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::errors::{ConfigError, EngineResult};
use crate::fusion::FusionThresholds;

fn parse<T: std::str::FromStr>(k: &str, dflt: T) -> T {
    std::env::var(k)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(dflt)
}

fn env_bool(k: &str, dflt: bool) -> bool {
    std::env::var(k)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(dflt)
}

/// Timeout/retry policy for model calls.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmPolicy {
    /// Per-call timeout for intent/reviewer calls (seconds).
    pub call_timeout_secs: u64,
    /// Per-call timeout for planner calls (seconds).
    pub planner_timeout_secs: u64,
    /// Retries after the first attempt, per provider.
    pub max_retries: u32,
    /// Fixed delay between retries (milliseconds).
    pub retry_delay_ms: u64,
}

impl LlmPolicy {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn planner_timeout(&self) -> Duration {
        Duration::from_secs(self.planner_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Review-shaping knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewKnobs {
    /// Units per planner batch; also bounds reviewer parallelism.
    pub max_units_per_batch: usize,
    /// Whether the intent summary is cached on disk.
    pub enable_intent_cache: bool,
    /// Cached intent entries older than this are ignored.
    pub intent_cache_ttl_days: i64,
    /// Upper bound on assembled context text per unit (characters).
    pub max_context_chars: usize,
}

/// Full configuration surface consumed by the pipeline core.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub llm: LlmPolicy,
    pub thresholds: FusionThresholds,
    pub review: ReviewKnobs,
}

impl EngineConfig {
    /// Build from environment variables with defaults, then validate.
    ///
    /// # Environment
    /// - `LLM_CALL_TIMEOUT_SECS` (default 120), `LLM_PLANNER_TIMEOUT_SECS` (60)
    /// - `LLM_MAX_RETRIES` (2), `LLM_RETRY_DELAY_MS` (500)
    /// - `FUSION_THRESHOLD_LOW|MEDIUM|HIGH` (0.3 / 0.5 / 0.8)
    /// - `REVIEW_MAX_UNITS_PER_BATCH` (4), `REVIEW_ENABLE_INTENT_CACHE` (true),
    ///   `REVIEW_INTENT_CACHE_TTL_DAYS` (7), `REVIEW_MAX_CTX_CHARS` (8000)
    pub fn from_env() -> EngineResult<Self> {
        let cfg = Self {
            llm: LlmPolicy {
                call_timeout_secs: parse("LLM_CALL_TIMEOUT_SECS", 120),
                planner_timeout_secs: parse("LLM_PLANNER_TIMEOUT_SECS", 60),
                max_retries: parse("LLM_MAX_RETRIES", 2u32),
                retry_delay_ms: parse("LLM_RETRY_DELAY_MS", 500),
            },
            thresholds: FusionThresholds {
                low: parse("FUSION_THRESHOLD_LOW", 0.3f32),
                medium: parse("FUSION_THRESHOLD_MEDIUM", 0.5f32),
                high: parse("FUSION_THRESHOLD_HIGH", 0.8f32),
            },
            review: ReviewKnobs {
                max_units_per_batch: parse("REVIEW_MAX_UNITS_PER_BATCH", 4usize).max(1),
                enable_intent_cache: env_bool("REVIEW_ENABLE_INTENT_CACHE", true),
                intent_cache_ttl_days: parse("REVIEW_INTENT_CACHE_TTL_DAYS", 7i64),
                max_context_chars: parse("REVIEW_MAX_CTX_CHARS", 8000usize),
            },
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;
        if self.review.intent_cache_ttl_days < 0 {
            return Err(ConfigError::InvalidValue {
                key: "REVIEW_INTENT_CACHE_TTL_DAYS",
                reason: "must be non-negative",
            });
        }
        Ok(())
    }
}

/// Cheaply clonable handle to the hot-reloadable config snapshot.
#[derive(Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<EngineConfig>>,
}

impl SharedConfig {
    pub fn new(cfg: EngineConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(cfg)),
        }
    }

    /// Environment-driven construction.
    pub fn from_env() -> EngineResult<Self> {
        Ok(Self::new(EngineConfig::from_env()?))
    }

    /// Current snapshot (cloned; reads never block writers for long).
    pub fn snapshot(&self) -> EngineConfig {
        self.inner
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Re-reads the environment and swaps the snapshot in place.
    ///
    /// Validation failures leave the previous snapshot untouched.
    pub fn reload_from_env(&self) -> EngineResult<()> {
        let fresh = EngineConfig::from_env()?;
        if let Ok(mut guard) = self.inner.write() {
            *guard = fresh;
        }
        Ok(())
    }
}
