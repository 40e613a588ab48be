//! Fusion engine: reconcile rule-layer and planner context suggestions.
//!
//! [`decide`] is a pure function over its inputs — no I/O, no clock reads
//! (the caller injects the timestamp stamped into conflict records). The
//! orchestrator appends the returned conflicts to the conflict log; that
//! write is the engine's only externally visible side effect and it happens
//! outside this module.
//!
//! Decision table, driven by the rule layer's confidence band:
//! - **high** (`confidence >= high`): trust the rule layer. A strictly
//!   broader model request is honored (`rule_high_llm_expand`); a model skip
//!   proposal is recorded (`rule_high_llm_skip`) but refused.
//! - **low** (`confidence <= low`): trust the model outright; a differing
//!   choice is recorded as `rule_low_llm_consistent` — the band mined for
//!   *new* rules.
//! - **medium**: the model's suggestion is taken as-is, no conflict.
//!
//! Independently of the band, levels two or more ordinals apart add a
//! `context_level_mismatch` conflict on top of any band-specific one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::model::{
    Conflict, ConflictKind, DecisionSource, FusionDecision, PlanSuggestion, ReviewUnit,
    RuleEstimate,
};

/// Confidence partition selected for a rule estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceBand {
    Low,
    Medium,
    High,
}

/// Three monotonically ordered floats partitioning rule confidence.
///
/// `low` and `high` are closed boundaries: `confidence == high` lands in the
/// high band and `confidence == low` in the low band, never in the middle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionThresholds {
    pub low: f32,
    pub medium: f32,
    pub high: f32,
}

impl Default for FusionThresholds {
    fn default() -> Self {
        Self {
            low: 0.3,
            medium: 0.5,
            high: 0.8,
        }
    }
}

impl FusionThresholds {
    /// Validates `0 <= low < medium < high <= 1`.
    ///
    /// # Errors
    /// [`ConfigError::InvalidThresholds`] — fatal, never retried.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ordered = self.low < self.medium && self.medium < self.high;
        let bounded = (0.0..=1.0).contains(&self.low) && (0.0..=1.0).contains(&self.high);
        if ordered && bounded {
            Ok(())
        } else {
            Err(ConfigError::InvalidThresholds {
                low: self.low,
                medium: self.medium,
                high: self.high,
            })
        }
    }

    /// Selects exactly one band for any confidence value.
    pub fn band(&self, confidence: f32) -> ConfidenceBand {
        if confidence >= self.high {
            ConfidenceBand::High
        } else if confidence <= self.low {
            ConfidenceBand::Low
        } else {
            ConfidenceBand::Medium
        }
    }
}

/// Resolve one unit's final context level from the rule estimate and the
/// planner suggestion.
///
/// Deterministic: identical inputs yield an identical decision and identical
/// conflicts (`timestamp` is the caller's clock reading, passed in so the
/// function stays pure).
pub fn decide(
    unit: &ReviewUnit,
    rule: &RuleEstimate,
    plan: &PlanSuggestion,
    thresholds: &FusionThresholds,
    timestamp: DateTime<Utc>,
) -> FusionDecision {
    let mut conflicts = Vec::new();

    let (final_level, source, skip_review) = match thresholds.band(rule.confidence) {
        ConfidenceBand::High => {
            if plan.skip_review {
                // Skip is not honored at high rule confidence; the proposal
                // itself is the signal worth recording.
                conflicts.push(Conflict::record(
                    unit,
                    ConflictKind::RuleHighLlmSkip,
                    rule,
                    plan,
                    timestamp,
                ));
                (rule.context_level, DecisionSource::Rule, false)
            } else if plan.context_level > rule.context_level {
                // The rule layer may under-provision but never blocks a
                // model-requested expansion.
                conflicts.push(Conflict::record(
                    unit,
                    ConflictKind::RuleHighLlmExpand,
                    rule,
                    plan,
                    timestamp,
                ));
                (plan.context_level, DecisionSource::Merged, false)
            } else {
                (rule.context_level, DecisionSource::Rule, false)
            }
        }
        ConfidenceBand::Low => {
            if plan.context_level != rule.context_level {
                conflicts.push(Conflict::record(
                    unit,
                    ConflictKind::RuleLowLlmConsistent,
                    rule,
                    plan,
                    timestamp,
                ));
            }
            (plan.context_level, DecisionSource::Llm, plan.skip_review)
        }
        ConfidenceBand::Medium => {
            // Rule layer is advisory only here.
            (plan.context_level, DecisionSource::Llm, plan.skip_review)
        }
    };

    let distance = rule
        .context_level
        .ordinal()
        .abs_diff(plan.context_level.ordinal());
    if distance >= 2 {
        conflicts.push(Conflict::record(
            unit,
            ConflictKind::ContextLevelMismatch,
            rule,
            plan,
            timestamp,
        ));
    }

    FusionDecision {
        unit_id: unit.id.clone(),
        final_context_level: final_level,
        source,
        skip_review,
        conflicts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContextLevel;
    use chrono::TimeZone;

    fn unit() -> ReviewUnit {
        ReviewUnit {
            id: "u1".into(),
            file_path: "src/handler.py".into(),
            start_line: 1,
            end_line: 30,
            added_lines: 25,
            removed_lines: 3,
            tags: vec!["api_endpoint".into()],
            language: "python".into(),
            diff: "+def handler(): ...".into(),
        }
    }

    fn rule(level: ContextLevel, confidence: f32) -> RuleEstimate {
        RuleEstimate {
            unit_id: "u1".into(),
            context_level: level,
            confidence,
            notes: None,
        }
    }

    fn plan(level: ContextLevel) -> PlanSuggestion {
        PlanSuggestion {
            unit_id: "u1".into(),
            context_level: level,
            reason: "touches shared state".into(),
            skip_review: false,
        }
    }

    fn ts() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap()
    }

    #[test]
    fn thresholds_validate_ordering() {
        assert!(FusionThresholds::default().validate().is_ok());
        let bad = FusionThresholds {
            low: 0.5,
            medium: 0.5,
            high: 0.8,
        };
        assert!(bad.validate().is_err());
        let unbounded = FusionThresholds {
            low: -0.1,
            medium: 0.5,
            high: 0.8,
        };
        assert!(unbounded.validate().is_err());
    }

    #[test]
    fn band_boundaries_are_closed() {
        let t = FusionThresholds::default();
        assert_eq!(t.band(0.8), ConfidenceBand::High);
        assert_eq!(t.band(0.3), ConfidenceBand::Low);
        assert_eq!(t.band(0.79), ConfidenceBand::Medium);
        assert_eq!(t.band(0.31), ConfidenceBand::Medium);
        assert_eq!(t.band(0.0), ConfidenceBand::Low);
        assert_eq!(t.band(1.0), ConfidenceBand::High);
    }

    #[test]
    fn every_confidence_selects_exactly_one_band() {
        let t = FusionThresholds::default();
        for i in 0..=100 {
            let c = i as f32 / 100.0;
            // `band` is a total function; this loop pins the partition shape.
            let _ = t.band(c);
        }
    }

    #[test]
    fn high_confidence_trusts_rule() {
        let d = decide(
            &unit(),
            &rule(ContextLevel::FileContext, 0.9),
            &plan(ContextLevel::FileContext),
            &FusionThresholds::default(),
            ts(),
        );
        assert_eq!(d.final_context_level, ContextLevel::FileContext);
        assert_eq!(d.source, DecisionSource::Rule);
        assert!(d.conflicts.is_empty());
    }

    #[test]
    fn high_confidence_never_blocks_expansion() {
        // Worked example: rule (file_context, 0.9), plan project_context.
        let d = decide(
            &unit(),
            &rule(ContextLevel::FileContext, 0.9),
            &plan(ContextLevel::ProjectContext),
            &FusionThresholds::default(),
            ts(),
        );
        assert_eq!(d.final_context_level, ContextLevel::ProjectContext);
        assert_eq!(d.source, DecisionSource::Merged);
        assert_eq!(d.conflicts.len(), 1);
        assert_eq!(
            d.conflicts[0].conflict_type,
            ConflictKind::RuleHighLlmExpand
        );
        // Ordinal distance is 1, so no mismatch conflict piggybacks.
    }

    #[test]
    fn expansion_with_wide_gap_records_both_conflicts() {
        let d = decide(
            &unit(),
            &rule(ContextLevel::Function, 0.9),
            &plan(ContextLevel::ProjectContext),
            &FusionThresholds::default(),
            ts(),
        );
        assert_eq!(d.final_context_level, ContextLevel::ProjectContext);
        let kinds: Vec<_> = d.conflicts.iter().map(|c| c.conflict_type).collect();
        assert_eq!(
            kinds,
            vec![
                ConflictKind::RuleHighLlmExpand,
                ConflictKind::ContextLevelMismatch
            ]
        );
        assert_eq!(d.conflict().unwrap().conflict_type, ConflictKind::RuleHighLlmExpand);
    }

    #[test]
    fn skip_is_refused_at_high_confidence() {
        let mut p = plan(ContextLevel::DiffOnly);
        p.skip_review = true;
        let d = decide(
            &unit(),
            &rule(ContextLevel::FileContext, 0.95),
            &p,
            &FusionThresholds::default(),
            ts(),
        );
        assert!(!d.skip_review);
        assert_eq!(d.final_context_level, ContextLevel::FileContext);
        assert_eq!(
            d.conflict().unwrap().conflict_type,
            ConflictKind::RuleHighLlmSkip
        );
    }

    #[test]
    fn skip_is_honored_below_high_band() {
        let mut p = plan(ContextLevel::DiffOnly);
        p.skip_review = true;
        let d = decide(
            &unit(),
            &rule(ContextLevel::DiffOnly, 0.4),
            &p,
            &FusionThresholds::default(),
            ts(),
        );
        assert!(d.skip_review);
        assert_eq!(d.source, DecisionSource::Llm);
    }

    #[test]
    fn low_confidence_trusts_llm_and_mines_conflict() {
        let d = decide(
            &unit(),
            &rule(ContextLevel::ProjectContext, 0.1),
            &plan(ContextLevel::Function),
            &FusionThresholds::default(),
            ts(),
        );
        assert_eq!(d.final_context_level, ContextLevel::Function);
        assert_eq!(d.source, DecisionSource::Llm);
        let kinds: Vec<_> = d.conflicts.iter().map(|c| c.conflict_type).collect();
        assert_eq!(
            kinds,
            vec![
                ConflictKind::RuleLowLlmConsistent,
                ConflictKind::ContextLevelMismatch
            ]
        );
    }

    #[test]
    fn medium_band_is_advisory_only() {
        let d = decide(
            &unit(),
            &rule(ContextLevel::FileContext, 0.5),
            &plan(ContextLevel::Function),
            &FusionThresholds::default(),
            ts(),
        );
        assert_eq!(d.final_context_level, ContextLevel::Function);
        assert_eq!(d.source, DecisionSource::Llm);
        assert!(d.conflicts.is_empty());
    }

    #[test]
    fn equal_levels_are_never_a_conflict() {
        for conf in [0.1, 0.5, 0.9] {
            let d = decide(
                &unit(),
                &rule(ContextLevel::Function, conf),
                &plan(ContextLevel::Function),
                &FusionThresholds::default(),
                ts(),
            );
            assert!(d.conflicts.is_empty(), "confidence {conf}");
        }
    }

    #[test]
    fn decide_is_deterministic() {
        let u = unit();
        let r = rule(ContextLevel::DiffOnly, 0.2);
        let p = plan(ContextLevel::FileContext);
        let t = FusionThresholds::default();
        let a = decide(&u, &r, &p, &t, ts());
        let b = decide(&u, &r, &p, &t, ts());
        assert_eq!(a, b);
    }

    #[test]
    fn conflicts_carry_unit_tags_and_metrics() {
        let d = decide(
            &unit(),
            &rule(ContextLevel::DiffOnly, 0.1),
            &plan(ContextLevel::FileContext),
            &FusionThresholds::default(),
            ts(),
        );
        let c = d.conflict().unwrap();
        assert_eq!(c.language, "python");
        assert_eq!(c.tags, vec!["api_endpoint".to_string()]);
        assert_eq!(c.metrics.added_lines, 25);
        assert_eq!(c.file_path, "src/handler.py");
    }
}
