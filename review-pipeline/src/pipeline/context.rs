//! Context assembly: pick a source per decided level, then build the text
//! bundle handed to the reviewer.
//!
//! Two stages share this module. `context_provider` maps every non-skipped
//! fusion decision to the source the store can actually serve (degrading to
//! the unit's own diff when the store has nothing broader); `context_bundle`
//! materializes the bounded text.

use tracing::debug;

use crate::config::ReviewKnobs;
use crate::events::{FallbackCounter, fallback_keys};
use crate::model::{ContextLevel, FusionDecision, ReviewUnit};
use crate::sources::ContextSource;

/// Selection made by the context_provider stage for one unit.
#[derive(Debug, Clone)]
pub struct SelectedContext {
    pub unit_id: String,
    /// Level fusion decided on.
    pub requested: ContextLevel,
    /// Text the store could actually serve (None → diff only).
    pub resolved: Option<String>,
    /// True when a broader-than-diff request could not be served.
    pub degraded: bool,
}

/// Final text bundle for one unit.
#[derive(Debug, Clone)]
pub struct ContextBundle {
    pub unit_id: String,
    pub level: ContextLevel,
    pub text: String,
    pub truncated: bool,
}

/// context_provider: resolve each decision against the store.
pub fn select_sources(
    decisions: &[FusionDecision],
    units: &[ReviewUnit],
    source: &ContextSource,
    counter: &FallbackCounter,
) -> Vec<SelectedContext> {
    decisions
        .iter()
        .filter(|d| !d.skip_review)
        .filter_map(|d| {
            let unit = units.iter().find(|u| u.id == d.unit_id)?;
            let resolved = source.fetch(&unit.file_path, d.final_context_level);
            let degraded =
                d.final_context_level > ContextLevel::DiffOnly && resolved.is_none();
            if degraded {
                counter.record(fallback_keys::CONTEXT_DEGRADED);
                debug!(
                    "context: {} degraded to diff_only ({} unavailable)",
                    d.unit_id, d.final_context_level
                );
            }
            Some(SelectedContext {
                unit_id: d.unit_id.clone(),
                requested: d.final_context_level,
                resolved,
                degraded,
            })
        })
        .collect()
}

/// context_bundle: materialize the bounded prompt text per unit.
pub fn build_bundles(
    selections: &[SelectedContext],
    units: &[ReviewUnit],
    knobs: &ReviewKnobs,
) -> Vec<ContextBundle> {
    selections
        .iter()
        .filter_map(|sel| {
            let unit = units.iter().find(|u| u.id == sel.unit_id)?;
            let mut text = String::new();
            text.push_str(&format!(
                "File: {} (lines {}..{})\n",
                unit.file_path, unit.start_line, unit.end_line
            ));
            text.push_str("--- diff ---\n");
            text.push_str(&unit.diff);
            if let Some(extra) = &sel.resolved {
                text.push_str("\n--- surrounding context ---\n");
                text.push_str(extra);
            }

            let mut truncated = false;
            if text.chars().count() > knobs.max_context_chars {
                text = text.chars().take(knobs.max_context_chars).collect();
                text.push_str("\n[context truncated]");
                truncated = true;
            }

            Some(ContextBundle {
                unit_id: sel.unit_id.clone(),
                level: if sel.degraded {
                    ContextLevel::DiffOnly
                } else {
                    sel.requested
                },
                text,
                truncated,
            })
        })
        .collect()
}
