//! Shared data model: review units, estimates, suggestions, decisions,
//! conflicts.
//!
//! Everything here is plain data. Units are produced once by the external
//! unit builder and immutable afterwards; conflicts are append-only records
//! whose only consumer is the rule-growth learner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DataIntegrityError;

/// How much surrounding code a reviewer model is given for a unit.
///
/// Ordered by increasing scope/cost; the ordinal drives "broader than"
/// comparisons in fusion.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ContextLevel {
    DiffOnly,
    Function,
    FileContext,
    ProjectContext,
}

impl ContextLevel {
    /// Stable ordinal used for distance checks.
    pub fn ordinal(self) -> u8 {
        match self {
            ContextLevel::DiffOnly => 0,
            ContextLevel::Function => 1,
            ContextLevel::FileContext => 2,
            ContextLevel::ProjectContext => 3,
        }
    }

    /// Snake-case name matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            ContextLevel::DiffOnly => "diff_only",
            ContextLevel::Function => "function",
            ContextLevel::FileContext => "file_context",
            ContextLevel::ProjectContext => "project_context",
        }
    }
}

impl std::fmt::Display for ContextLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reviewable slice of a change.
///
/// Created by the external unit builder; immutable thereafter. The unit
/// carries its own patch text so `diff_only` review needs no further I/O.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewUnit {
    /// Stable unit identifier within the change.
    pub id: String,
    /// Repo-relative file path.
    pub file_path: String,
    /// First changed line (1-based).
    pub start_line: u32,
    /// Last changed line (inclusive).
    pub end_line: u32,
    pub added_lines: u32,
    pub removed_lines: u32,
    /// Semantic tags from the unit builder (e.g. `complete_class`,
    /// `api_endpoint`).
    pub tags: Vec<String>,
    /// Detected language (lowercase, e.g. `rust`, `python`).
    pub language: String,
    /// The unit's own patch text.
    pub diff: String,
}

impl ReviewUnit {
    /// Checks the invariants the pipeline relies on.
    ///
    /// # Errors
    /// Returns [`DataIntegrityError::MalformedUnit`] naming the first broken
    /// field; the orchestrator skips such units with a warning.
    pub fn validate(&self) -> Result<(), DataIntegrityError> {
        let reason = if self.id.trim().is_empty() {
            Some("empty id")
        } else if self.file_path.trim().is_empty() {
            Some("empty file path")
        } else if self.diff.trim().is_empty() {
            Some("empty diff")
        } else if self.end_line < self.start_line {
            Some("end line before start line")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(DataIntegrityError::MalformedUnit {
                unit_id: self.id.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }

    /// Size metrics snapshot recorded into conflicts.
    pub fn metrics(&self) -> UnitMetrics {
        UnitMetrics {
            added_lines: self.added_lines,
            removed_lines: self.removed_lines,
            span_lines: self.end_line.saturating_sub(self.start_line) + 1,
        }
    }

    /// Tags sorted for stable grouping keys.
    pub fn sorted_tags(&self) -> Vec<String> {
        let mut tags = self.tags.clone();
        tags.sort();
        tags.dedup();
        tags
    }
}

/// Compact size metrics carried into conflict records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitMetrics {
    pub added_lines: u32,
    pub removed_lines: u32,
    pub span_lines: u32,
}

/// Rule-layer output for one unit. Read-only input to fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleEstimate {
    pub unit_id: String,
    pub context_level: ContextLevel,
    /// Confidence in `[0, 1]`; `0` means "no rule matched" and forces the
    /// LLM-trust path.
    pub confidence: f32,
    pub notes: Option<String>,
}

/// Planner output for one unit. Read-only input to fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSuggestion {
    pub unit_id: String,
    pub context_level: ContextLevel,
    pub reason: String,
    pub skip_review: bool,
}

/// Which side the final context level came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Rule,
    Llm,
    /// High rule confidence, but the model's broader level was honored.
    Merged,
}

/// The four recorded disagreement shapes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Rule layer was confident, model requested a strictly broader level.
    RuleHighLlmExpand,
    /// Rule layer was confident, model proposed skipping review.
    RuleHighLlmSkip,
    /// Rule layer had no confidence; the model's differing choice is mined
    /// for new rules.
    RuleLowLlmConsistent,
    /// Levels at least two ordinals apart, regardless of confidence band.
    ContextLevelMismatch,
}

impl ConflictKind {
    /// Snake-case name matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictKind::RuleHighLlmExpand => "rule_high_llm_expand",
            ConflictKind::RuleHighLlmSkip => "rule_high_llm_skip",
            ConflictKind::RuleLowLlmConsistent => "rule_low_llm_consistent",
            ConflictKind::ContextLevelMismatch => "context_level_mismatch",
        }
    }
}

/// One recorded disagreement between rule and model suggestions.
///
/// Append-only; persisted in the conflict log; never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub unit_id: String,
    pub language: String,
    /// Sorted unit tags (stable grouping key for the learner).
    pub tags: Vec<String>,
    pub conflict_type: ConflictKind,
    pub rule_context_level: ContextLevel,
    pub rule_confidence: f32,
    pub llm_context_level: ContextLevel,
    pub llm_reason: String,
    pub timestamp: DateTime<Utc>,
    pub file_path: String,
    pub metrics: UnitMetrics,
}

impl Conflict {
    /// Builds a conflict record from the fusion inputs.
    pub fn record(
        unit: &ReviewUnit,
        conflict_type: ConflictKind,
        rule: &RuleEstimate,
        plan: &PlanSuggestion,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            unit_id: unit.id.clone(),
            language: unit.language.clone(),
            tags: unit.sorted_tags(),
            conflict_type,
            rule_context_level: rule.context_level,
            rule_confidence: rule.confidence,
            llm_context_level: plan.context_level,
            llm_reason: plan.reason.clone(),
            timestamp,
            file_path: unit.file_path.clone(),
            metrics: unit.metrics(),
        }
    }
}

/// Authoritative output of the fusion engine for one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionDecision {
    pub unit_id: String,
    pub final_context_level: ContextLevel,
    pub source: DecisionSource,
    /// True only when the model's skip proposal was honored (never at high
    /// rule confidence).
    pub skip_review: bool,
    /// Conflicts recorded for this unit: at most one band-specific conflict
    /// plus at most one mismatch conflict.
    pub conflicts: Vec<Conflict>,
}

impl FusionDecision {
    /// The band-specific conflict, if one was recorded.
    pub fn conflict(&self) -> Option<&Conflict> {
        self.conflicts
            .iter()
            .find(|c| c.conflict_type != ConflictKind::ContextLevelMismatch)
    }
}
