//! Rule-growth learner: mine fusion disagreements into context rules.
//!
//! The learner consumes the append-only conflict log, groups it by
//! `(language, tags, conflict type)`, and produces two outputs:
//! automatically-applicable rule updates and human-reviewable reference
//! hints. Public API:
//!
//! - [`Learner::summarize`] — conflict statistics for operators;
//! - [`Learner::suggest`]   — applicable rules + reference hints;
//! - [`Learner::apply`]     — install a computed applicable rule (idempotent);
//! - [`Learner::promote`]   — install a hint bypassing the thresholds;
//! - [`Learner::cleanup`]   — prune conflicts older than a cutoff.
//!
//! Installed rules do not depend on the conflict log surviving: once a
//! `LearnedRule` lands in the rule configuration it stays until explicitly
//! removed, so cleanup prunes purely by age.

mod error;
pub mod group;
pub mod suggest;

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use review_pipeline::{ConflictLog, LearnedRule, RuleProvenance, RuleStore};

pub use error::GrowthError;
pub use group::{GroupKey, HintGroup, group_conflicts};
pub use suggest::{
    ApplicableRule, GrowthReport, GrowthThresholds, ReferenceHint, classify,
    learned_rule_from, rule_id_for,
};

/// Result alias for learner operations.
pub type GrowthResult<T> = Result<T, GrowthError>;

/// Conflict-log statistics returned by [`Learner::summarize`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictStats {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_language: BTreeMap<String, usize>,
    pub unique_files: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Counts reported by [`Learner::cleanup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub deleted: usize,
    pub remaining: usize,
}

/// The learner, wired to one project's conflict log and the shared rule
/// configuration store.
pub struct Learner {
    log: ConflictLog,
    rules: RuleStore,
    thresholds: GrowthThresholds,
}

impl Learner {
    pub fn new(log: ConflictLog, rules: RuleStore, thresholds: GrowthThresholds) -> Self {
        Self {
            log,
            rules,
            thresholds,
        }
    }

    /// Aggregate statistics over the whole conflict log.
    pub async fn summarize(&self) -> GrowthResult<ConflictStats> {
        let conflicts = self.log.read_all().await?;
        let mut stats = ConflictStats {
            total: conflicts.len(),
            ..ConflictStats::default()
        };
        let mut files = std::collections::BTreeSet::new();
        for c in &conflicts {
            *stats
                .by_type
                .entry(c.conflict_type.as_str().to_string())
                .or_insert(0) += 1;
            *stats.by_language.entry(c.language.clone()).or_insert(0) += 1;
            files.insert(c.file_path.clone());
            stats.oldest = Some(match stats.oldest {
                Some(t) if t <= c.timestamp => t,
                _ => c.timestamp,
            });
            stats.newest = Some(match stats.newest {
                Some(t) if t >= c.timestamp => t,
                _ => c.timestamp,
            });
        }
        stats.unique_files = files.len();
        Ok(stats)
    }

    /// Group, score and classify the current conflict log.
    pub async fn suggest(&self) -> GrowthResult<GrowthReport> {
        let conflicts = self.log.read_all().await?;
        let groups = group_conflicts(&conflicts);
        let report = classify(groups, &self.thresholds);
        debug!(
            "suggest: {} applicable, {} hints",
            report.applicable_rules.len(),
            report.reference_hints.len()
        );
        Ok(report)
    }

    /// Install a computed applicable rule into the persisted configuration.
    ///
    /// Idempotent: re-applying an already-installed rule is a no-op and
    /// returns `false`.
    ///
    /// # Errors
    /// [`GrowthError::UnknownRule`] when `rule_id` is not among the currently
    /// computed applicable rules.
    pub async fn apply(&self, rule_id: &str) -> GrowthResult<bool> {
        let report = self.suggest().await?;
        let applicable = report
            .applicable_rules
            .into_iter()
            .find(|r| r.rule_id == rule_id)
            .ok_or_else(|| GrowthError::UnknownRule(rule_id.to_string()))?;
        let rule = learned_rule_from(&applicable.group, RuleProvenance::Auto);
        let installed = self.rules.install(rule).await?;
        if installed {
            info!("apply: installed rule {rule_id}");
        }
        Ok(installed)
    }

    /// Install a reference hint as a rule, bypassing the thresholds.
    pub async fn promote(&self, hint: &ReferenceHint) -> GrowthResult<LearnedRule> {
        let rule = learned_rule_from(&hint.group, RuleProvenance::Promoted);
        self.rules.install(rule.clone()).await?;
        info!(
            "promote: installed rule {} (was short: {})",
            rule.rule_id, hint.reason
        );
        Ok(rule)
    }

    /// Delete conflicts older than `max_age_days`.
    ///
    /// Installed rules are independent of the log, so pruning needs no
    /// carve-outs for rule evidence.
    pub async fn cleanup(&self, max_age_days: i64) -> GrowthResult<CleanupReport> {
        let cutoff = Utc::now() - Duration::days(max_age_days);
        let conflicts = self.log.read_all().await?;
        let before = conflicts.len();
        let remaining: Vec<_> = conflicts
            .into_iter()
            .filter(|c| c.timestamp >= cutoff)
            .collect();
        let deleted = before - remaining.len();
        if deleted > 0 {
            self.log.replace_all(&remaining).await?;
        }
        info!("cleanup: deleted {deleted}, remaining {}", remaining.len());
        Ok(CleanupReport {
            deleted,
            remaining: remaining.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use review_pipeline::{
        Conflict, ConflictKind, ContextLevel, RuleEstimator, ReviewUnit, UnitMetrics,
    };

    fn conflict(file: &str, llm_level: ContextLevel, days_ago: i64) -> Conflict {
        Conflict {
            unit_id: "u".into(),
            language: "python".into(),
            tags: vec!["api_endpoint".into()],
            conflict_type: ConflictKind::RuleLowLlmConsistent,
            rule_context_level: ContextLevel::DiffOnly,
            rule_confidence: 0.1,
            llm_context_level: llm_level,
            llm_reason: "needs callers".into(),
            timestamp: Utc::now() - Duration::days(days_ago),
            file_path: file.into(),
            metrics: UnitMetrics {
                added_lines: 1,
                removed_lines: 0,
                span_lines: 1,
            },
        }
    }

    fn learner(dir: &tempfile::TempDir) -> Learner {
        Learner::new(
            ConflictLog::new(dir.path().join("log"), "proj"),
            RuleStore::new(dir.path().join("rules.json")),
            GrowthThresholds::default(),
        )
    }

    #[tokio::test]
    async fn summarize_counts_by_type_and_language() {
        let dir = tempfile::tempdir().unwrap();
        let l = learner(&dir);
        let log = ConflictLog::new(dir.path().join("log"), "proj");
        log.append(&[
            conflict("a.py", ContextLevel::Function, 0),
            conflict("b.py", ContextLevel::Function, 1),
        ])
        .await
        .unwrap();

        let stats = l.summarize().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_type["rule_low_llm_consistent"], 2);
        assert_eq!(stats.by_language["python"], 2);
        assert_eq!(stats.unique_files, 2);
        assert!(stats.oldest.unwrap() <= stats.newest.unwrap());
    }

    #[tokio::test]
    async fn suggest_then_apply_round_trips_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let l = learner(&dir);
        let log = ConflictLog::new(dir.path().join("log"), "proj");
        log.append(&[
            conflict("f0.py", ContextLevel::Function, 0),
            conflict("f1.py", ContextLevel::Function, 0),
            conflict("f2.py", ContextLevel::Function, 0),
            conflict("f3.py", ContextLevel::Function, 0),
            conflict("f3.py", ContextLevel::DiffOnly, 0),
        ])
        .await
        .unwrap();

        let report = l.suggest().await.unwrap();
        assert_eq!(report.applicable_rules.len(), 1);
        let rule_id = report.applicable_rules[0].rule_id.clone();
        assert_eq!(report.applicable_rules[0].group.consistency, 0.8);

        // First apply installs, second is a no-op.
        assert!(l.apply(&rule_id).await.unwrap());
        assert!(!l.apply(&rule_id).await.unwrap());

        // Exactly one learned rule landed in the configuration, and the
        // estimator now serves it with high confidence.
        let store = RuleStore::new(dir.path().join("rules.json"));
        let cfg = store.load().await.unwrap();
        assert_eq!(cfg.learned.len(), 1);
        assert_eq!(
            cfg.learned[&rule_id].provenance,
            RuleProvenance::Auto
        );

        let estimator = RuleEstimator::new(cfg);
        let unit = ReviewUnit {
            id: "u9".into(),
            file_path: "new.py".into(),
            start_line: 1,
            end_line: 3,
            added_lines: 2,
            removed_lines: 0,
            tags: vec!["api_endpoint".into()],
            language: "python".into(),
            diff: "+def f(): ...".into(),
        };
        let estimate = estimator.estimate(&unit);
        assert_eq!(estimate.context_level, ContextLevel::Function);
        assert!(estimate.confidence > 0.8);
    }

    #[tokio::test]
    async fn apply_unknown_rule_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let l = learner(&dir);
        let err = l.apply("auto-nope").await.unwrap_err();
        assert!(matches!(err, GrowthError::UnknownRule(_)));
    }

    #[tokio::test]
    async fn ineligible_group_becomes_hint_and_can_be_promoted() {
        let dir = tempfile::tempdir().unwrap();
        let l = learner(&dir);
        let log = ConflictLog::new(dir.path().join("log"), "proj");
        // Two samples on one file: fails samples and unique-files thresholds.
        log.append(&[
            conflict("only.py", ContextLevel::FileContext, 0),
            conflict("only.py", ContextLevel::FileContext, 0),
        ])
        .await
        .unwrap();

        let report = l.suggest().await.unwrap();
        assert!(report.applicable_rules.is_empty());
        assert_eq!(report.reference_hints.len(), 1);
        let hint = &report.reference_hints[0];
        assert!(hint.reason.contains("samples 2/5"));
        assert!(hint.reason.contains("unique files 1/3"));

        let rule = l.promote(hint).await.unwrap();
        assert_eq!(rule.provenance, RuleProvenance::Promoted);
        let cfg = RuleStore::new(dir.path().join("rules.json"))
            .load()
            .await
            .unwrap();
        assert!(cfg.learned.contains_key(&rule.rule_id));
    }

    #[tokio::test]
    async fn cleanup_prunes_by_age_and_reports_counts() {
        let dir = tempfile::tempdir().unwrap();
        let l = learner(&dir);
        let log = ConflictLog::new(dir.path().join("log"), "proj");
        log.append(&[
            conflict("old.py", ContextLevel::Function, 40),
            conflict("new.py", ContextLevel::Function, 1),
        ])
        .await
        .unwrap();

        let report = l.cleanup(30).await.unwrap();
        assert_eq!(report, CleanupReport {
            deleted: 1,
            remaining: 1
        });
        let left = log.read_all().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].file_path, "new.py");

        // A second pass deletes nothing.
        let report = l.cleanup(30).await.unwrap();
        assert_eq!(report.deleted, 0);
    }

    #[tokio::test]
    async fn installed_rules_survive_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let l = learner(&dir);
        let log = ConflictLog::new(dir.path().join("log"), "proj");
        log.append(&[
            conflict("f0.py", ContextLevel::Function, 0),
            conflict("f1.py", ContextLevel::Function, 0),
            conflict("f2.py", ContextLevel::Function, 0),
            conflict("f3.py", ContextLevel::Function, 0),
            conflict("f4.py", ContextLevel::Function, 0),
        ])
        .await
        .unwrap();
        let report = l.suggest().await.unwrap();
        let rule_id = report.applicable_rules[0].rule_id.clone();
        l.apply(&rule_id).await.unwrap();

        // Wipe the whole log; the installed rule must remain.
        let report = l.cleanup(0).await.unwrap();
        assert_eq!(report.remaining, 0);
        let cfg = RuleStore::new(dir.path().join("rules.json"))
            .load()
            .await
            .unwrap();
        assert!(cfg.learned.contains_key(&rule_id));
    }
}
