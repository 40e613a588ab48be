//! Stream event envelope and the fallback counter.
//!
//! Events travel over a single ordered channel per run (producer stages push
//! typed values, one consumer serializes them to the transport), which is
//! what gives the stream its total order. `stage_start`/`stage_end` are
//! emitted only by the orchestrator; everything else belongs to the stage
//! currently running. `done` is always the last event of a run.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use llm_providers::TokenUsage;

/// Ordered pipeline stages.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    DiffParse,
    ReviewUnits,
    RuleLayer,
    IntentAnalysis,
    Planner,
    Fusion,
    ContextProvider,
    ContextBundle,
    Reviewer,
    FinalOutput,
}

impl Stage {
    /// Snake-case name matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::DiffParse => "diff_parse",
            Stage::ReviewUnits => "review_units",
            Stage::RuleLayer => "rule_layer",
            Stage::IntentAnalysis => "intent_analysis",
            Stage::Planner => "planner",
            Stage::Fusion => "fusion",
            Stage::ContextProvider => "context_provider",
            Stage::ContextBundle => "context_bundle",
            Stage::Reviewer => "reviewer",
            Stage::FinalOutput => "final_output",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event in the per-run stream. Serializes as an internally tagged JSON
/// object: `{"type": "...", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReviewEvent {
    StageStart {
        stage: Stage,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<serde_json::Value>,
    },
    StageEnd {
        stage: Stage,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<serde_json::Value>,
    },
    /// Reasoning fragment from a reasoning-capable model.
    Thought { content: String },
    /// Streamed output fragment (unit-sized).
    Chunk { content: String },
    /// Streamed output fragment (sub-unit delta).
    Delta { content: String },
    ToolCallStart {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
        call_index: usize,
    },
    ToolResult {
        tool_call_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        duration_ms: u64,
    },
    UsageSummary {
        usage_stage: String,
        usage: TokenUsage,
    },
    Warning {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        fallback_summary: Option<FallbackSummary>,
    },
    /// Fatal failure; terminates the run (followed only by `done`).
    Error { stage: Stage, message: String },
    /// The completed review report (markdown).
    Final { content: String },
    /// End-of-stream marker, always last.
    Done,
}

/* ------------------------------------------------------------------------- */
/* Fallback accounting                                                       */
/* ------------------------------------------------------------------------- */

/// Fallback keys recognized by the classifier. Unknown keys are accepted and
/// classified as low-priority / `other`.
pub mod fallback_keys {
    pub const LLM_TIMEOUT: &str = "llm_timeout";
    pub const LLM_TRANSIENT: &str = "llm_transient";
    pub const PROVIDER_UNAVAILABLE: &str = "provider_unavailable";
    pub const PLANNER_UNIT_FALLBACK: &str = "planner_unit_fallback";
    pub const INTENT_DEGRADED: &str = "intent_degraded";
    pub const CONTEXT_DEGRADED: &str = "context_degraded";
    pub const UNIT_SKIPPED_MALFORMED: &str = "unit_skipped_malformed";
    pub const REVIEWER_PARTIAL: &str = "reviewer_partial";
}

/// `(priority, category)` for a fallback key.
fn classify(key: &str) -> (&'static str, &'static str) {
    use fallback_keys::*;
    match key {
        LLM_TIMEOUT | PROVIDER_UNAVAILABLE => ("high", "provider"),
        LLM_TRANSIENT => ("medium", "provider"),
        PLANNER_UNIT_FALLBACK => ("medium", "stage"),
        REVIEWER_PARTIAL => ("high", "stage"),
        INTENT_DEGRADED | CONTEXT_DEGRADED => ("low", "stage"),
        UNIT_SKIPPED_MALFORMED => ("medium", "data"),
        _ => ("low", "other"),
    }
}

/// Aggregated fallback counts emitted once per run in the closing `warning`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackSummary {
    pub total: u64,
    pub by_key: BTreeMap<String, u64>,
    pub by_priority: BTreeMap<String, u64>,
    pub by_category: BTreeMap<String, u64>,
}

/// Shared counter keyed by failure reason. Clone-cheap; safe for the
/// concurrently reviewed units to record into.
#[derive(Debug, Clone, Default)]
pub struct FallbackCounter {
    by_key: Arc<Mutex<BTreeMap<String, u64>>>,
}

impl FallbackCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one fallback occurrence under `key`.
    pub fn record(&self, key: &str) {
        if let Ok(mut map) = self.by_key.lock() {
            *map.entry(key.to_string()).or_insert(0) += 1;
        }
    }

    /// Total recorded occurrences.
    pub fn total(&self) -> u64 {
        self.by_key
            .lock()
            .map(|m| m.values().sum())
            .unwrap_or(0)
    }

    /// Aggregated view, or `None` when nothing was recorded.
    pub fn summary(&self) -> Option<FallbackSummary> {
        let by_key = self.by_key.lock().ok()?.clone();
        if by_key.is_empty() {
            return None;
        }
        let mut by_priority: BTreeMap<String, u64> = BTreeMap::new();
        let mut by_category: BTreeMap<String, u64> = BTreeMap::new();
        for (key, count) in &by_key {
            let (priority, category) = classify(key);
            *by_priority.entry(priority.to_string()).or_insert(0) += count;
            *by_category.entry(category.to_string()).or_insert(0) += count;
        }
        Some(FallbackSummary {
            total: by_key.values().sum(),
            by_key,
            by_priority,
            by_category,
        })
    }
}
