//! Conflict grouping: partition the log by `(language, tags, conflict type)`
//! and score each group.
//!
//! Groups are derived aggregates with no lifecycle of their own — they are
//! regenerated on every learner invocation from whatever the conflict log
//! currently holds. Ordering is deterministic (BTreeMap over the group key)
//! so repeated `suggest` calls list groups in the same order.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use review_pipeline::{Conflict, ConflictKind, ContextLevel};

/// Partition key: language, sorted tag set, conflict type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupKey {
    pub language: String,
    pub tags: Vec<String>,
    pub conflict_type: ConflictKind,
}

/// Derived aggregate over one conflict group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HintGroup {
    pub language: String,
    pub tags: Vec<String>,
    pub conflict_type: ConflictKind,
    pub sample_count: usize,
    pub unique_files: usize,
    /// LLM-side level with the most votes (ties broken toward the narrower
    /// level for predictability).
    pub majority_level: ContextLevel,
    /// Majority-vote share in `[0, 1]`; `1` iff every conflict in the group
    /// agrees on the same LLM-side level.
    pub consistency: f64,
    /// Vote tally per LLM-side level (serialized by level name).
    pub level_votes: BTreeMap<ContextLevel, usize>,
}

/// Group and score a batch of conflicts.
pub fn group_conflicts(conflicts: &[Conflict]) -> Vec<HintGroup> {
    let mut buckets: BTreeMap<GroupKey, Vec<&Conflict>> = BTreeMap::new();
    for c in conflicts {
        let mut tags = c.tags.clone();
        tags.sort();
        tags.dedup();
        buckets
            .entry(GroupKey {
                language: c.language.clone(),
                tags,
                conflict_type: c.conflict_type,
            })
            .or_default()
            .push(c);
    }

    buckets
        .into_iter()
        .map(|(key, members)| {
            let mut level_votes: BTreeMap<ContextLevel, usize> = BTreeMap::new();
            let mut files: BTreeSet<&str> = BTreeSet::new();
            for c in &members {
                *level_votes.entry(c.llm_context_level).or_insert(0) += 1;
                files.insert(c.file_path.as_str());
            }
            let sample_count = members.len();
            // BTreeMap iterates narrowest level first; strict `>` keeps the
            // narrower level on vote ties.
            let (majority_level, majority_votes) = level_votes
                .iter()
                .fold((ContextLevel::DiffOnly, 0usize), |acc, (level, votes)| {
                    if *votes > acc.1 { (*level, *votes) } else { acc }
                });
            HintGroup {
                language: key.language,
                tags: key.tags,
                conflict_type: key.conflict_type,
                sample_count,
                unique_files: files.len(),
                majority_level,
                consistency: majority_votes as f64 / sample_count as f64,
                level_votes,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use review_pipeline::UnitMetrics;

    fn conflict(
        language: &str,
        tags: &[&str],
        kind: ConflictKind,
        llm_level: ContextLevel,
        file: &str,
    ) -> Conflict {
        Conflict {
            unit_id: "u".into(),
            language: language.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            conflict_type: kind,
            rule_context_level: ContextLevel::DiffOnly,
            rule_confidence: 0.1,
            llm_context_level: llm_level,
            llm_reason: "r".into(),
            timestamp: Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap(),
            file_path: file.into(),
            metrics: UnitMetrics {
                added_lines: 1,
                removed_lines: 0,
                span_lines: 1,
            },
        }
    }

    #[test]
    fn groups_partition_by_language_tags_and_type() {
        let conflicts = vec![
            conflict(
                "rust",
                &["api_endpoint"],
                ConflictKind::RuleLowLlmConsistent,
                ContextLevel::Function,
                "a.rs",
            ),
            conflict(
                "rust",
                &["api_endpoint"],
                ConflictKind::RuleLowLlmConsistent,
                ContextLevel::Function,
                "b.rs",
            ),
            conflict(
                "python",
                &["api_endpoint"],
                ConflictKind::RuleLowLlmConsistent,
                ContextLevel::Function,
                "c.py",
            ),
        ];
        let groups = group_conflicts(&conflicts);
        assert_eq!(groups.len(), 2);
        let rust = groups.iter().find(|g| g.language == "rust").unwrap();
        assert_eq!(rust.sample_count, 2);
        assert_eq!(rust.unique_files, 2);
    }

    #[test]
    fn consistency_is_bounded_and_exact_on_agreement() {
        let conflicts: Vec<Conflict> = (0..4)
            .map(|i| {
                conflict(
                    "go",
                    &["helper"],
                    ConflictKind::RuleLowLlmConsistent,
                    ContextLevel::Function,
                    &format!("f{i}.go"),
                )
            })
            .collect();
        let groups = group_conflicts(&conflicts);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].consistency, 1.0);

        // A dissenting vote lowers the share but stays in bounds.
        let mut mixed = conflicts;
        mixed.push(conflict(
            "go",
            &["helper"],
            ConflictKind::RuleLowLlmConsistent,
            ContextLevel::ProjectContext,
            "f9.go",
        ));
        let groups = group_conflicts(&mixed);
        assert!(groups[0].consistency > 0.0 && groups[0].consistency < 1.0);
        assert_eq!(groups[0].consistency, 4.0 / 5.0);
        assert_eq!(groups[0].majority_level, ContextLevel::Function);
    }

    #[test]
    fn worked_example_four_of_five_votes() {
        // Five conflicts, LLM levels [function ×4, diff_only], four files.
        let mut conflicts: Vec<Conflict> = (0..4)
            .map(|i| {
                conflict(
                    "python",
                    &["api_endpoint"],
                    ConflictKind::RuleLowLlmConsistent,
                    ContextLevel::Function,
                    &format!("f{}.py", i % 3), // three distinct files here
                )
            })
            .collect();
        conflicts.push(conflict(
            "python",
            &["api_endpoint"],
            ConflictKind::RuleLowLlmConsistent,
            ContextLevel::DiffOnly,
            "g.py", // fourth distinct file
        ));
        let groups = group_conflicts(&conflicts);
        let g = &groups[0];
        assert_eq!(g.sample_count, 5);
        assert_eq!(g.unique_files, 4);
        assert_eq!(g.consistency, 0.8);
        assert_eq!(g.majority_level, ContextLevel::Function);
    }

    #[test]
    fn tag_order_does_not_split_groups() {
        let a = conflict(
            "rust",
            &["a", "b"],
            ConflictKind::ContextLevelMismatch,
            ContextLevel::FileContext,
            "x.rs",
        );
        let mut b = conflict(
            "rust",
            &["b", "a"],
            ConflictKind::ContextLevelMismatch,
            ContextLevel::FileContext,
            "y.rs",
        );
        b.tags = vec!["b".into(), "a".into()];
        let groups = group_conflicts(&[a, b]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].sample_count, 2);
    }
}
