//! Pipeline orchestrator: sequence the stages, emit the event stream,
//! enforce the per-stage failure table.
//!
//! Stage order:
//!   `diff_parse → review_units → rule_layer → intent_analysis → planner →
//!    fusion → context_provider → context_bundle → reviewer → final_output`
//!
//! Failure semantics per stage:
//! - `diff_parse` / `review_units` / `rule_layer`: fatal — the run terminates
//!   with an `error` event and no `final`;
//! - `intent_analysis`: degrades to an empty summary plus a `warning`;
//! - `planner` / `fusion`: per-unit fallback to the rule level (confidence
//!   forced to 0), warnings aggregated;
//! - `reviewer`: accumulated content so far becomes the final result if the
//!   stage fails after producing anything; a fully dry failure is fatal.
//!
//! The orchestrator is the only component emitting `stage_start`/`stage_end`;
//! everything else (thoughts, chunks, tool events) is emitted by the stage
//! currently running. All events of one run travel through a single mpsc
//! channel, which serializes them into the total order clients observe.
//! `done` is always the last event, after `final` or `error`.

pub mod context;
pub mod intent;
pub mod planner;
pub mod report;
pub mod retry;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use llm_providers::{LlmRequest, ProviderFactory, TokenUsage};

use crate::config::SharedConfig;
use crate::conflict_log::ConflictLog;
use crate::errors::{Error, StageError};
use crate::events::{FallbackCounter, ReviewEvent, Stage, fallback_keys};
use crate::fusion;
use crate::model::{FusionDecision, ReviewUnit, RuleEstimate};
use crate::pipeline::context::ContextBundle;
use crate::pipeline::report::{RunStats, UnitReview};
use crate::pipeline::retry::{CallPolicy, CancelFlag, call_model};
use crate::rules::RuleEstimator;
use crate::sources::{ContextSource, Scanner, UnitSource};

/// External collaborators wired into one run.
pub struct EngineDeps {
    pub factory: Arc<ProviderFactory>,
    pub estimator: RuleEstimator,
    pub conflict_log: ConflictLog,
    pub units: UnitSource,
    pub context: ContextSource,
    pub scanner: Scanner,
}

/// One review request.
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub project: String,
    pub change_id: String,
    /// Preference string for the provider factory (`auto`, `mock`, ...).
    pub model_preference: String,
}

/// Handle to a running review: the ordered event stream plus cancellation.
pub struct ReviewRun {
    pub events: mpsc::UnboundedReceiver<ReviewEvent>,
    pub cancel: CancelFlag,
    pub handle: JoinHandle<()>,
}

/// Spawns a review run and returns its handle immediately.
///
/// The returned receiver yields the run's events in total order; the stream
/// always terminates with `done`.
pub fn start_review(cfg: SharedConfig, deps: EngineDeps, req: ReviewRequest) -> ReviewRun {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancelFlag::new();
    let cancel_for_task = cancel.clone();
    let handle = tokio::spawn(async move {
        run(cfg, deps, req, tx, cancel_for_task).await;
    });
    ReviewRun {
        events: rx,
        cancel,
        handle,
    }
}

/// Thin sender wrapper; dropping the receiver just ends emission quietly.
#[derive(Clone)]
struct Emitter {
    tx: mpsc::UnboundedSender<ReviewEvent>,
}

impl Emitter {
    fn send(&self, event: ReviewEvent) {
        let _ = self.tx.send(event);
    }

    fn stage_start(&self, stage: Stage) {
        self.send(ReviewEvent::StageStart {
            stage,
            summary: None,
        });
    }

    fn stage_end(&self, stage: Stage, summary: serde_json::Value) {
        self.send(ReviewEvent::StageEnd {
            stage,
            summary: Some(summary),
        });
    }

    fn warning(&self, message: impl Into<String>) {
        self.send(ReviewEvent::Warning {
            message: message.into(),
            fallback_summary: None,
        });
    }
}

/// Drives one run to completion; every outcome ends with `done`.
async fn run(
    cfg: SharedConfig,
    deps: EngineDeps,
    req: ReviewRequest,
    tx: mpsc::UnboundedSender<ReviewEvent>,
    cancel: CancelFlag,
) {
    let emit = Emitter { tx };
    if let Err((stage, e)) = run_inner(&cfg, &deps, &req, &emit, &cancel).await {
        emit.send(ReviewEvent::Error {
            stage,
            message: e.to_string(),
        });
    }
    emit.send(ReviewEvent::Done);
}

fn live(cancel: &CancelFlag, stage: Stage) -> Result<(), (Stage, Error)> {
    if cancel.is_cancelled() {
        Err((stage, StageError::Cancelled.into()))
    } else {
        Ok(())
    }
}

async fn run_inner(
    cfg: &SharedConfig,
    deps: &EngineDeps,
    req: &ReviewRequest,
    emit: &Emitter,
    cancel: &CancelFlag,
) -> Result<(), (Stage, Error)> {
    let cfg = cfg.snapshot();
    if let Err(e) = cfg.validate() {
        return Err((Stage::DiffParse, e.into()));
    }

    let counter = FallbackCounter::new();
    let t_run = Instant::now();
    let preference = req.model_preference.as_str();

    let call_policy = CallPolicy {
        timeout: cfg.llm.call_timeout(),
        max_retries: cfg.llm.max_retries,
        retry_delay: cfg.llm.retry_delay(),
    };
    let planner_policy = CallPolicy {
        timeout: cfg.llm.planner_timeout(),
        ..call_policy
    };

    /* ------------------------------ diff_parse ------------------------------ */
    live(cancel, Stage::DiffParse)?;
    emit.stage_start(Stage::DiffParse);
    let t0 = Instant::now();
    let stats = deps
        .units
        .diff_stats()
        .map_err(|e| (Stage::DiffParse, e))?;
    debug!(
        "diff_parse: {} files, +{}/-{} ({} ms)",
        stats.files,
        stats.added_lines,
        stats.removed_lines,
        t0.elapsed().as_millis()
    );
    emit.stage_end(
        Stage::DiffParse,
        json!({
            "files": stats.files,
            "added_lines": stats.added_lines,
            "removed_lines": stats.removed_lines,
        }),
    );

    /* ----------------------------- review_units ---------------------------- */
    live(cancel, Stage::ReviewUnits)?;
    emit.stage_start(Stage::ReviewUnits);
    let raw_units = deps
        .units
        .build_units()
        .map_err(|e| (Stage::ReviewUnits, e))?;
    let mut units: Vec<ReviewUnit> = Vec::with_capacity(raw_units.len());
    for u in raw_units {
        match u.validate() {
            Ok(()) => units.push(u),
            Err(e) => {
                counter.record(fallback_keys::UNIT_SKIPPED_MALFORMED);
                emit.warning(format!("skipping unit: {e}"));
            }
        }
    }
    debug!("review_units: {} unit(s) accepted", units.len());
    emit.stage_end(Stage::ReviewUnits, json!({ "units": units.len() }));

    /* ------------------------------ rule_layer ------------------------------ */
    live(cancel, Stage::RuleLayer)?;
    emit.stage_start(Stage::RuleLayer);
    let t1 = Instant::now();
    let estimates: Vec<RuleEstimate> =
        units.iter().map(|u| deps.estimator.estimate(u)).collect();
    let matched = estimates.iter().filter(|e| e.confidence > 0.0).count();
    debug!(
        "rule_layer: {} estimate(s), {} matched ({} ms)",
        estimates.len(),
        matched,
        t1.elapsed().as_millis()
    );
    emit.stage_end(
        Stage::RuleLayer,
        json!({ "estimates": estimates.len(), "matched": matched }),
    );

    /* ---------------------------- intent_analysis -------------------------- */
    live(cancel, Stage::IntentAnalysis)?;
    emit.stage_start(Stage::IntentAnalysis);
    let intent_before = counter.total();
    let intent = intent::analyze_intent(
        &deps.factory,
        preference,
        &req.project,
        &req.change_id,
        &units,
        cfg.review.enable_intent_cache,
        cfg.review.intent_cache_ttl_days,
        &call_policy,
        &counter,
        cancel,
    )
    .await;
    if intent.summary.is_empty() && counter.total() > intent_before {
        emit.warning("intent analysis degraded; continuing with empty summary");
    }
    emit.stage_end(
        Stage::IntentAnalysis,
        json!({
            "summary_chars": intent.summary.chars().count(),
            "cache_hit": intent.cache_hit,
        }),
    );

    /* -------------------------------- planner ------------------------------ */
    live(cancel, Stage::Planner)?;
    emit.stage_start(Stage::Planner);
    let plan = planner::plan_units(
        &deps.factory,
        preference,
        &units,
        &estimates,
        &intent.summary,
        cfg.review.max_units_per_batch,
        &planner_policy,
        &counter,
        cancel,
    )
    .await;
    if !plan.fallback_unit_ids.is_empty() {
        emit.warning(format!(
            "planner fell back to rule levels for {} unit(s)",
            plan.fallback_unit_ids.len()
        ));
    }
    emit.stage_end(
        Stage::Planner,
        json!({
            "planned": plan.suggestions.len(),
            "fallbacks": plan.fallback_unit_ids.len(),
        }),
    );

    /* -------------------------------- fusion ------------------------------- */
    live(cancel, Stage::Fusion)?;
    emit.stage_start(Stage::Fusion);
    let suggestions: HashMap<&str, _> = plan
        .suggestions
        .iter()
        .map(|s| (s.unit_id.as_str(), s))
        .collect();
    let now = Utc::now();
    let mut decisions: Vec<FusionDecision> = Vec::with_capacity(units.len());
    let mut all_conflicts = Vec::new();
    for (unit, estimate) in units.iter().zip(estimates.iter()) {
        let Some(suggestion) = suggestions.get(unit.id.as_str()) else {
            continue;
        };
        // A planner fallback mirrors the rule level; forcing confidence to 0
        // routes it through the LLM-trust path without minting a conflict.
        let effective = if plan.fallback_unit_ids.contains(&unit.id) {
            RuleEstimate {
                confidence: 0.0,
                ..estimate.clone()
            }
        } else {
            estimate.clone()
        };
        let decision = fusion::decide(unit, &effective, suggestion, &cfg.thresholds, now);
        all_conflicts.extend(decision.conflicts.iter().cloned());
        decisions.push(decision);
    }
    if let Err(e) = deps.conflict_log.append(&all_conflicts).await {
        // The log is observability for the learner, not review correctness.
        warn!("fusion: conflict log append failed: {e}");
        emit.warning(format!("conflict log unavailable: {e}"));
    }
    let skipped = decisions.iter().filter(|d| d.skip_review).count();
    debug!(
        "fusion: {} decision(s), {} conflict(s), {} skip(s)",
        decisions.len(),
        all_conflicts.len(),
        skipped
    );
    emit.stage_end(
        Stage::Fusion,
        json!({
            "decisions": decisions.len(),
            "conflicts": all_conflicts.len(),
            "skipped": skipped,
        }),
    );

    /* ---------------------------- context stages --------------------------- */
    live(cancel, Stage::ContextProvider)?;
    emit.stage_start(Stage::ContextProvider);
    let selections = context::select_sources(&decisions, &units, &deps.context, &counter);
    let degraded = selections.iter().filter(|s| s.degraded).count();
    emit.stage_end(
        Stage::ContextProvider,
        json!({ "selected": selections.len(), "degraded": degraded }),
    );

    live(cancel, Stage::ContextBundle)?;
    emit.stage_start(Stage::ContextBundle);
    let bundles = context::build_bundles(&selections, &units, &cfg.review);
    let truncated = bundles.iter().filter(|b| b.truncated).count();
    emit.stage_end(
        Stage::ContextBundle,
        json!({ "bundles": bundles.len(), "truncated": truncated }),
    );

    /* ------------------------------- reviewer ------------------------------ */
    live(cancel, Stage::Reviewer)?;
    emit.stage_start(Stage::Reviewer);
    let t_rev = Instant::now();
    let review_results = review_bundles(
        deps,
        preference,
        &bundles,
        &units,
        &intent.summary,
        cfg.review.max_units_per_batch,
        &call_policy,
        &counter,
        cancel,
        emit,
    )
    .await;

    let produced = review_results.values().filter(|r| r.is_some()).count();
    let failed = review_results.len() - produced;
    if failed > 0 {
        if produced == 0 && !bundles.is_empty() {
            return Err((
                Stage::Reviewer,
                StageError::Fatal {
                    stage: "reviewer",
                    reason: "no unit produced any review content".to_string(),
                }
                .into(),
            ));
        }
        // Partial output is promoted to the final result.
        emit.warning(format!(
            "reviewer produced partial output: {failed} unit(s) failed"
        ));
    }
    emit.stage_end(
        Stage::Reviewer,
        json!({
            "reviewed": produced,
            "failed": failed,
            "elapsed_ms": t_rev.elapsed().as_millis() as u64,
        }),
    );

    /* ----------------------------- final_output ---------------------------- */
    live(cancel, Stage::FinalOutput)?;
    emit.stage_start(Stage::FinalOutput);

    let mut reviewer_usage = TokenUsage::default();
    let mut reviews: Vec<UnitReview> = Vec::new();
    for (unit, decision) in units.iter().zip(decisions.iter()) {
        let body = review_results
            .get(unit.id.as_str())
            .and_then(|r| r.as_ref())
            .map(|(text, usage)| {
                reviewer_usage.merge(usage);
                text.clone()
            });
        reviews.push(UnitReview {
            unit_id: unit.id.clone(),
            file_path: unit.file_path.clone(),
            start_line: unit.start_line,
            end_line: unit.end_line,
            level: decision.final_context_level,
            source: decision.source,
            body,
            skipped: decision.skip_review,
        });
    }

    let run_stats = RunStats {
        total_units: units.len(),
        reviewed: produced,
        skipped,
        failed,
        conflicts_recorded: all_conflicts.len(),
    };
    let content = report::render(
        &req.project,
        &req.change_id,
        &intent.summary,
        &stats,
        &reviews,
        &run_stats,
    );

    for (stage, usage) in [
        ("intent_analysis", intent.usage),
        ("planner", plan.usage),
        ("reviewer", reviewer_usage),
    ] {
        if usage.total_tokens > 0 {
            emit.send(ReviewEvent::UsageSummary {
                usage_stage: stage.to_string(),
                usage,
            });
        }
    }

    if let Some(summary) = counter.summary() {
        emit.send(ReviewEvent::Warning {
            message: format!("run completed with {} fallback(s)", summary.total),
            fallback_summary: Some(summary),
        });
    }

    emit.send(ReviewEvent::Final { content });
    emit.stage_end(
        Stage::FinalOutput,
        json!({ "elapsed_ms": t_run.elapsed().as_millis() as u64 }),
    );

    info!(
        "review done: project={} change={} units={} reviewed={} skipped={} in {} ms",
        req.project,
        req.change_id,
        units.len(),
        produced,
        skipped,
        t_run.elapsed().as_millis()
    );
    Ok(())
}

/// Review every bundle with bounded parallelism (batch-sized worker fan-out).
///
/// Events from concurrently reviewed units may interleave, but each unit's
/// own tool call precedes its chunk; the shared channel keeps the stream
/// total-ordered.
#[allow(clippy::too_many_arguments)]
async fn review_bundles(
    deps: &EngineDeps,
    preference: &str,
    bundles: &[ContextBundle],
    units: &[ReviewUnit],
    intent: &str,
    batch_size: usize,
    policy: &CallPolicy,
    counter: &FallbackCounter,
    cancel: &CancelFlag,
    emit: &Emitter,
) -> HashMap<String, Option<(String, TokenUsage)>> {
    let call_index = AtomicUsize::new(0);
    let mut results: HashMap<String, Option<(String, TokenUsage)>> = HashMap::new();

    for batch in bundles.chunks(batch_size.max(1)) {
        let tasks = batch.iter().map(|bundle| {
            let factory = Arc::clone(&deps.factory);
            let call_index = &call_index;
            async move {
                let outcome = review_one(
                    &factory,
                    deps,
                    preference,
                    bundle,
                    units,
                    intent,
                    policy,
                    counter,
                    cancel,
                    emit,
                    call_index,
                )
                .await;
                (bundle.unit_id.clone(), outcome)
            }
        });
        for (unit_id, outcome) in futures::future::join_all(tasks).await {
            results.insert(unit_id, outcome);
        }
    }
    results
}

#[allow(clippy::too_many_arguments)]
async fn review_one(
    factory: &ProviderFactory,
    deps: &EngineDeps,
    preference: &str,
    bundle: &ContextBundle,
    units: &[ReviewUnit],
    intent: &str,
    policy: &CallPolicy,
    counter: &FallbackCounter,
    cancel: &CancelFlag,
    emit: &Emitter,
    call_index: &AtomicUsize,
) -> Option<(String, TokenUsage)> {
    let unit = units.iter().find(|u| u.id == bundle.unit_id)?;

    // Static-analysis side channel surfaces through tool events.
    let mut scan_notes = String::new();
    if deps.scanner.is_enabled() {
        let idx = call_index.fetch_add(1, Ordering::SeqCst);
        let tool_call_id = format!("scan-{}", unit.id);
        emit.send(ReviewEvent::ToolCallStart {
            tool_call_id: tool_call_id.clone(),
            tool_name: "static_scan".to_string(),
            arguments: json!({ "file_path": unit.file_path }),
            call_index: idx,
        });
        let t = Instant::now();
        let findings = deps.scanner.findings_for(&unit.file_path);
        scan_notes = findings
            .iter()
            .map(|f| f.message.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        emit.send(ReviewEvent::ToolResult {
            tool_call_id,
            content: Some(if scan_notes.is_empty() {
                "no findings".to_string()
            } else {
                scan_notes.clone()
            }),
            error: None,
            duration_ms: t.elapsed().as_millis() as u64,
        });
    }

    let mut prompt = format!(
        "Review this change unit. Point out real problems (correctness, \
         concurrency, security); do not restate the diff.\n\n{}",
        bundle.text
    );
    if !intent.is_empty() {
        prompt.push_str(&format!("\n\nChange intent: {intent}"));
    }
    if !scan_notes.is_empty() {
        prompt.push_str(&format!("\n\nStatic analysis findings:\n{scan_notes}"));
    }

    let req = LlmRequest::new(prompt);
    match call_model(factory, preference, &req, policy, counter, cancel).await {
        Ok((reply, provider)) => {
            debug!("reviewer: unit {} served by {provider}", unit.id);
            for thought in planner::extract_thoughts(&reply.text) {
                emit.send(ReviewEvent::Thought { content: thought });
            }
            let body = planner::strip_thoughts(&reply.text);
            emit.send(ReviewEvent::Chunk {
                content: format!("### {}\n\n{}\n", unit.file_path, body),
            });
            Some((body, reply.usage))
        }
        Err(e) => {
            warn!("reviewer: unit {} failed: {e}", unit.id);
            counter.record(fallback_keys::REVIEWER_PARTIAL);
            None
        }
    }
}
