//! Planner stage: ask the model how much context each unit needs.
//!
//! Units are planned in batches of `review.max_units_per_batch`. The prompt
//! demands STRICT JSON; the reply is fence/think-sanitized before parsing.
//! A unit missing from the parsed plan — or a whole failed batch — falls back
//! to the rule estimator's level with rule confidence forced to 0, which
//! routes it through the low-confidence fusion path without recording a
//! bogus conflict (equal levels are never a conflict).

use std::collections::{HashMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use llm_providers::{LlmRequest, ProviderFactory, TokenUsage};

use crate::events::{FallbackCounter, fallback_keys};
use crate::model::{ContextLevel, PlanSuggestion, ReviewUnit, RuleEstimate};
use crate::pipeline::retry::{CallPolicy, CancelFlag, call_model};

/// Planner outcome for the whole stage.
#[derive(Debug, Default)]
pub struct PlanOutcome {
    /// One suggestion per unit, in unit order.
    pub suggestions: Vec<PlanSuggestion>,
    /// Units whose suggestion is a rule-level fallback (confidence forced to 0).
    pub fallback_unit_ids: HashSet<String>,
    /// Aggregated token usage across all planner batches.
    pub usage: TokenUsage,
}

lazy_static! {
    /// Reasoning models may wrap deliberation in think tags; drop it all.
    static ref THINK_BLOCK: Regex =
        Regex::new(r"(?s)<think>.*?</think>").expect("static regex");
}

/// Remove markdown fences, BOMs and think blocks; extract the first JSON
/// object. Deliberately tolerant: we accept `{...}` anywhere in the string.
pub fn sanitize_json_block(s: &str) -> String {
    let no_think = THINK_BLOCK.replace_all(s, "");
    let no_fence = no_think
        .replace("```json", "")
        .replace("```", "")
        .replace('\u{feff}', "")
        .trim()
        .to_string();

    if let (Some(start), Some(end)) = (no_fence.find('{'), no_fence.rfind('}')) {
        if start < end {
            let candidate = &no_fence[start..=end];
            if candidate.contains(':') {
                return candidate.to_string();
            }
        }
    }
    no_fence
}

/// Drop think blocks, keeping only the visible reply body.
pub fn strip_thoughts(s: &str) -> String {
    THINK_BLOCK.replace_all(s, "").trim().to_string()
}

/// Extract the text of think blocks (surfaced as `thought` events).
pub fn extract_thoughts(s: &str) -> Vec<String> {
    THINK_BLOCK
        .find_iter(s)
        .map(|m| {
            m.as_str()
                .trim_start_matches("<think>")
                .trim_end_matches("</think>")
                .trim()
                .to_string()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

/// Strict JSON shape the planner model must return.
#[derive(Debug, Deserialize)]
struct PlanDoc {
    #[serde(default)]
    plans: Vec<PlanRow>,
}

#[derive(Debug, Deserialize)]
struct PlanRow {
    unit_id: String,
    context_level: ContextLevel,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    skip_review: bool,
}

fn truncate(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        return s.to_string();
    }
    s.chars().take(n).collect::<String>() + "…"
}

/// Build the strict-JSON planner prompt for one batch.
pub fn build_plan_prompt(units: &[&ReviewUnit], intent: &str) -> String {
    let mut out = String::new();
    out.push_str(
        "You are planning a code review. For each unit decide how much \
         surrounding context a reviewer needs.\n\
         Levels, narrowest first: diff_only, function, file_context, project_context.\n\
         Set skip_review=true only for trivial, risk-free changes.\n",
    );
    if !intent.is_empty() {
        out.push_str("\nChange intent:\n");
        out.push_str(&truncate(intent, 600));
        out.push('\n');
    }
    out.push_str("\nUnits:\n");
    for u in units {
        out.push_str(&format!(
            "- id={} path={} lang={} lines={}..{} +{}/-{} tags=[{}]\n",
            u.id,
            u.file_path,
            u.language,
            u.start_line,
            u.end_line,
            u.added_lines,
            u.removed_lines,
            u.tags.join(",")
        ));
        out.push_str(&format!("  diff: {}\n", truncate(&u.diff, 400)));
    }
    out.push_str(
        "\nAnswer with STRICT JSON only, no prose, no markdown fences:\n\
         {\"plans\":[{\"unit_id\":\"...\",\"context_level\":\"diff_only|function|file_context|project_context\",\"reason\":\"...\",\"skip_review\":false}]}\n",
    );
    out
}

/// Fallback suggestion mirroring the rule estimate (fusion sees equal levels,
/// so no conflict is minted for synthetic plans).
fn fallback_suggestion(estimate: &RuleEstimate) -> PlanSuggestion {
    PlanSuggestion {
        unit_id: estimate.unit_id.clone(),
        context_level: estimate.context_level,
        reason: "planner unavailable; rule level".to_string(),
        skip_review: false,
    }
}

/// Run the planner over all units in batches.
///
/// Never fails the run: every error path degrades to per-unit fallbacks and
/// records into the fallback counter.
pub async fn plan_units(
    factory: &ProviderFactory,
    preference: &str,
    units: &[ReviewUnit],
    estimates: &[RuleEstimate],
    intent: &str,
    batch_size: usize,
    policy: &CallPolicy,
    counter: &FallbackCounter,
    cancel: &CancelFlag,
) -> PlanOutcome {
    let by_unit: HashMap<&str, &RuleEstimate> = estimates
        .iter()
        .map(|e| (e.unit_id.as_str(), e))
        .collect();

    let mut outcome = PlanOutcome::default();

    for batch in units.chunks(batch_size.max(1)) {
        let refs: Vec<&ReviewUnit> = batch.iter().collect();
        let prompt = build_plan_prompt(&refs, intent);
        let req = LlmRequest::new(prompt)
            .with_system("You output strict JSON review plans and nothing else.");

        let parsed: Option<HashMap<String, PlanRow>> =
            match call_model(factory, preference, &req, policy, counter, cancel).await {
                Ok((reply, provider)) => {
                    outcome.usage.merge(&reply.usage);
                    let sanitized = sanitize_json_block(&reply.text);
                    match serde_json::from_str::<PlanDoc>(&sanitized) {
                        Ok(doc) => {
                            debug!(
                                "planner: batch of {} planned by {provider} ({} rows)",
                                batch.len(),
                                doc.plans.len()
                            );
                            Some(doc.plans.into_iter().map(|p| (p.unit_id.clone(), p)).collect())
                        }
                        Err(e) => {
                            warn!("planner: strict JSON parse failed: {e}");
                            None
                        }
                    }
                }
                Err(e) => {
                    warn!("planner: batch call failed: {e}");
                    None
                }
            };

        for unit in batch {
            let estimate = by_unit.get(unit.id.as_str());
            let row = parsed.as_ref().and_then(|m| m.get(unit.id.as_str()));
            match (row, estimate) {
                (Some(p), _) => outcome.suggestions.push(PlanSuggestion {
                    unit_id: unit.id.clone(),
                    context_level: p.context_level,
                    reason: p.reason.clone(),
                    skip_review: p.skip_review,
                }),
                (None, Some(estimate)) => {
                    counter.record(fallback_keys::PLANNER_UNIT_FALLBACK);
                    outcome.fallback_unit_ids.insert(unit.id.clone());
                    outcome.suggestions.push(fallback_suggestion(estimate));
                }
                (None, None) => {
                    // No rule estimate either; plan the narrowest level.
                    counter.record(fallback_keys::PLANNER_UNIT_FALLBACK);
                    outcome.fallback_unit_ids.insert(unit.id.clone());
                    outcome.suggestions.push(PlanSuggestion {
                        unit_id: unit.id.clone(),
                        context_level: ContextLevel::DiffOnly,
                        reason: "planner unavailable; no rule estimate".to_string(),
                        skip_review: false,
                    });
                }
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_fences_and_think_blocks() {
        let raw = "<think>hmm, the diff is small</think>\n```json\n{\"plans\": []}\n```";
        assert_eq!(sanitize_json_block(raw), "{\"plans\": []}");
    }

    #[test]
    fn sanitize_extracts_embedded_object() {
        let raw = "Here is the plan: {\"plans\":[{\"unit_id\":\"u1\",\"context_level\":\"function\"}]} done";
        let s = sanitize_json_block(raw);
        assert!(s.starts_with('{') && s.ends_with('}'));
        let doc: PlanDoc = serde_json::from_str(&s).unwrap();
        assert_eq!(doc.plans.len(), 1);
        assert_eq!(doc.plans[0].context_level, ContextLevel::Function);
    }

    #[test]
    fn thoughts_are_extracted() {
        let raw = "<think>first</think>text<think>second</think>";
        assert_eq!(extract_thoughts(raw), vec!["first", "second"]);
        assert_eq!(strip_thoughts(raw), "text");
    }

    #[test]
    fn prompt_lists_every_unit() {
        let u1 = ReviewUnit {
            id: "u1".into(),
            file_path: "a.rs".into(),
            start_line: 1,
            end_line: 2,
            added_lines: 1,
            removed_lines: 0,
            tags: vec!["helper".into()],
            language: "rust".into(),
            diff: "+fn a() {}".into(),
        };
        let u2 = ReviewUnit {
            id: "u2".into(),
            file_path: "b.rs".into(),
            ..u1.clone()
        };
        let prompt = build_plan_prompt(&[&u1, &u2], "tighten error handling");
        assert!(prompt.contains("id=u1"));
        assert!(prompt.contains("id=u2"));
        assert!(prompt.contains("tighten error handling"));
        assert!(prompt.contains("STRICT JSON"));
    }

    #[tokio::test]
    async fn failed_batch_falls_back_to_rule_levels() {
        // The default mock echoes non-JSON, so parsing fails and every unit
        // degrades to its rule estimate.
        let dir = tempfile::tempdir().unwrap();
        let factory = ProviderFactory::from_env(dir.path().join("catalog.json"));
        let unit = ReviewUnit {
            id: "u1".into(),
            file_path: "a.rs".into(),
            start_line: 1,
            end_line: 2,
            added_lines: 1,
            removed_lines: 0,
            tags: vec![],
            language: "rust".into(),
            diff: "+x".into(),
        };
        let estimate = RuleEstimate {
            unit_id: "u1".into(),
            context_level: ContextLevel::FileContext,
            confidence: 0.9,
            notes: None,
        };
        let counter = FallbackCounter::new();
        let outcome = plan_units(
            &factory,
            "mock",
            &[unit],
            &[estimate],
            "",
            4,
            &CallPolicy {
                timeout: std::time::Duration::from_secs(1),
                max_retries: 0,
                retry_delay: std::time::Duration::from_millis(1),
            },
            &counter,
            &CancelFlag::new(),
        )
        .await;

        assert_eq!(outcome.suggestions.len(), 1);
        assert_eq!(
            outcome.suggestions[0].context_level,
            ContextLevel::FileContext
        );
        assert!(outcome.fallback_unit_ids.contains("u1"));
        assert_eq!(counter.total(), 1);
    }
}
