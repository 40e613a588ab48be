//! Eligibility scoring: applicable rules vs reference hints.
//!
//! A group becomes an **applicable rule** only when all three thresholds
//! hold; anything else becomes a **reference hint** whose `reason` names the
//! unmet condition(s) and by how much, so a human can judge proximity to
//! auto-eligibility. Eligibility is monotone: raising `sample_count` or
//! `consistency` with everything else fixed never revokes it.

use serde::{Deserialize, Serialize};

use review_pipeline::{LearnedRule, RuleProvenance};

use crate::group::HintGroup;

/// Auto-apply thresholds (all configurable).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GrowthThresholds {
    pub min_samples: usize,
    pub min_consistency: f64,
    pub min_unique_files: usize,
}

impl Default for GrowthThresholds {
    fn default() -> Self {
        Self {
            min_samples: 5,
            min_consistency: 0.8,
            min_unique_files: 3,
        }
    }
}

/// A group that cleared every threshold; installable via `apply`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicableRule {
    /// Deterministic id derived from the group key, stable across
    /// invocations so `suggest` → `apply` round trips.
    pub rule_id: String,
    pub group: HintGroup,
}

/// A group that fell short, with the distance to eligibility spelled out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceHint {
    pub group: HintGroup,
    /// E.g. `"consistency 65%/80%; unique files 2/3"`.
    pub reason: String,
}

/// Output of `suggest`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrowthReport {
    pub applicable_rules: Vec<ApplicableRule>,
    pub reference_hints: Vec<ReferenceHint>,
}

fn slug(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' }
        })
        .collect()
}

/// Deterministic rule id for a group.
pub fn rule_id_for(group: &HintGroup) -> String {
    let tags = if group.tags.is_empty() {
        "untagged".to_string()
    } else {
        group.tags.iter().map(|t| slug(t)).collect::<Vec<_>>().join("+")
    };
    format!(
        "auto-{}-{}-{}",
        slug(&group.language),
        tags,
        group.conflict_type.as_str()
    )
}

/// Unmet conditions for a group, empty when eligible.
pub fn unmet_conditions(group: &HintGroup, thresholds: &GrowthThresholds) -> Vec<String> {
    let mut reasons = Vec::new();
    if group.sample_count < thresholds.min_samples {
        reasons.push(format!(
            "samples {}/{}",
            group.sample_count, thresholds.min_samples
        ));
    }
    if group.consistency < thresholds.min_consistency {
        reasons.push(format!(
            "consistency {:.0}%/{:.0}%",
            group.consistency * 100.0,
            thresholds.min_consistency * 100.0
        ));
    }
    if group.unique_files < thresholds.min_unique_files {
        reasons.push(format!(
            "unique files {}/{}",
            group.unique_files, thresholds.min_unique_files
        ));
    }
    reasons
}

/// Split scored groups into applicable rules and reference hints.
pub fn classify(groups: Vec<HintGroup>, thresholds: &GrowthThresholds) -> GrowthReport {
    let mut report = GrowthReport::default();
    for group in groups {
        let unmet = unmet_conditions(&group, thresholds);
        if unmet.is_empty() {
            report.applicable_rules.push(ApplicableRule {
                rule_id: rule_id_for(&group),
                group,
            });
        } else {
            report.reference_hints.push(ReferenceHint {
                group,
                reason: unmet.join("; "),
            });
        }
    }
    report
}

/// Materialize a learned rule from a group.
pub fn learned_rule_from(group: &HintGroup, provenance: RuleProvenance) -> LearnedRule {
    LearnedRule {
        rule_id: rule_id_for(group),
        language: group.language.clone(),
        required_tags: group.tags.clone(),
        suggested_context_level: group.majority_level,
        provenance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use review_pipeline::{ConflictKind, ContextLevel};
    use std::collections::BTreeMap;

    fn group(samples: usize, consistency: f64, files: usize) -> HintGroup {
        HintGroup {
            language: "python".into(),
            tags: vec!["api_endpoint".into()],
            conflict_type: ConflictKind::RuleLowLlmConsistent,
            sample_count: samples,
            unique_files: files,
            majority_level: ContextLevel::Function,
            consistency,
            level_votes: BTreeMap::new(),
        }
    }

    #[test]
    fn eligibility_at_exact_minimums() {
        // sample_count = 5, consistency = 0.8, unique_files = 3 (and 4).
        let t = GrowthThresholds::default();
        assert!(unmet_conditions(&group(5, 0.8, 4), &t).is_empty());
        assert!(unmet_conditions(&group(5, 0.8, 3), &t).is_empty());
    }

    #[test]
    fn hint_reason_names_every_unmet_condition() {
        let t = GrowthThresholds::default();
        let unmet = unmet_conditions(&group(3, 0.65, 2), &t);
        assert_eq!(unmet.len(), 3);
        let reason = unmet.join("; ");
        assert!(reason.contains("samples 3/5"));
        assert!(reason.contains("consistency 65%/80%"));
        assert!(reason.contains("unique files 2/3"));
    }

    #[test]
    fn eligibility_is_monotone_in_samples_and_consistency() {
        let t = GrowthThresholds::default();
        let mut g = group(4, 0.7, 3);
        assert!(!unmet_conditions(&g, &t).is_empty());

        // Raising each dimension never revokes eligibility.
        g.sample_count = 5;
        g.consistency = 0.8;
        assert!(unmet_conditions(&g, &t).is_empty());
        g.sample_count = 50;
        g.consistency = 0.95;
        assert!(unmet_conditions(&g, &t).is_empty());
    }

    #[test]
    fn rule_ids_are_deterministic_and_slugged() {
        let g = group(5, 0.9, 4);
        assert_eq!(
            rule_id_for(&g),
            "auto-python-api_endpoint-rule_low_llm_consistent"
        );
        assert_eq!(rule_id_for(&g), rule_id_for(&g.clone()));
    }

    #[test]
    fn classify_splits_by_thresholds() {
        let t = GrowthThresholds::default();
        let report = classify(vec![group(6, 0.9, 4), group(2, 0.5, 1)], &t);
        assert_eq!(report.applicable_rules.len(), 1);
        assert_eq!(report.reference_hints.len(), 1);
        assert!(!report.reference_hints[0].reason.is_empty());
    }

    #[test]
    fn learned_rule_carries_majority_level() {
        let rule = learned_rule_from(&group(5, 1.0, 3), RuleProvenance::Auto);
        assert_eq!(rule.language, "python");
        assert_eq!(rule.suggested_context_level, ContextLevel::Function);
        assert_eq!(rule.provenance, RuleProvenance::Auto);
    }
}
