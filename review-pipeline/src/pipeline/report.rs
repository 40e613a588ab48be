//! Final report rendering (markdown).

use crate::model::{ContextLevel, DecisionSource};
use crate::sources::DiffStats;

/// One reviewed unit's contribution to the report.
#[derive(Debug, Clone)]
pub struct UnitReview {
    pub unit_id: String,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub level: ContextLevel,
    pub source: DecisionSource,
    /// Review body; `None` when the unit's review call failed.
    pub body: Option<String>,
    pub skipped: bool,
}

/// Run-level numbers for the report footer.
#[derive(Debug, Clone, Copy)]
pub struct RunStats {
    pub total_units: usize,
    pub reviewed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub conflicts_recorded: usize,
}

fn source_label(source: DecisionSource) -> &'static str {
    match source {
        DecisionSource::Rule => "rule",
        DecisionSource::Llm => "llm",
        DecisionSource::Merged => "merged",
    }
}

/// Compose the full markdown report emitted as the `final` event.
pub fn render(
    project: &str,
    change_id: &str,
    intent: &str,
    stats: &DiffStats,
    reviews: &[UnitReview],
    run: &RunStats,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Review: {project} — {change_id}\n\n"));
    out.push_str(&format!(
        "{} file(s), +{}/-{} lines, {} review unit(s)\n\n",
        stats.files, stats.added_lines, stats.removed_lines, run.total_units
    ));

    if !intent.is_empty() {
        out.push_str("## Intent\n\n");
        out.push_str(intent.trim());
        out.push_str("\n\n");
    }

    out.push_str("## Findings\n\n");
    for r in reviews.iter().filter(|r| !r.skipped) {
        out.push_str(&format!(
            "### {}:{}-{}\n\n",
            r.file_path, r.start_line, r.end_line
        ));
        out.push_str(&format!(
            "_context: {} (decided by {})_\n\n",
            r.level,
            source_label(r.source)
        ));
        match &r.body {
            Some(body) => {
                out.push_str(body.trim());
                out.push_str("\n\n");
            }
            None => out.push_str("_review unavailable for this unit_\n\n"),
        }
    }

    let skipped: Vec<&UnitReview> = reviews.iter().filter(|r| r.skipped).collect();
    if !skipped.is_empty() {
        out.push_str("## Skipped\n\n");
        for r in &skipped {
            out.push_str(&format!(
                "- {}:{}-{} (planner proposed skip)\n",
                r.file_path, r.start_line, r.end_line
            ));
        }
        out.push('\n');
    }

    out.push_str("---\n");
    out.push_str(&format!(
        "reviewed {} · skipped {} · failed {} · conflicts recorded {}\n",
        run.reviewed, run.skipped, run.failed, run.conflicts_recorded
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_contains_sections_and_footer() {
        let reviews = vec![
            UnitReview {
                unit_id: "u1".into(),
                file_path: "src/a.rs".into(),
                start_line: 3,
                end_line: 9,
                level: ContextLevel::FileContext,
                source: DecisionSource::Merged,
                body: Some("Looks off: the lock is held across await.".into()),
                skipped: false,
            },
            UnitReview {
                unit_id: "u2".into(),
                file_path: "src/b.rs".into(),
                start_line: 1,
                end_line: 1,
                level: ContextLevel::DiffOnly,
                source: DecisionSource::Llm,
                body: None,
                skipped: true,
            },
        ];
        let out = render(
            "org/repo",
            "mr-42",
            "tighten error handling",
            &DiffStats {
                files: 2,
                added_lines: 10,
                removed_lines: 2,
            },
            &reviews,
            &RunStats {
                total_units: 2,
                reviewed: 1,
                skipped: 1,
                failed: 0,
                conflicts_recorded: 1,
            },
        );
        assert!(out.contains("# Review: org/repo — mr-42"));
        assert!(out.contains("## Intent"));
        assert!(out.contains("### src/a.rs:3-9"));
        assert!(out.contains("decided by merged"));
        assert!(out.contains("## Skipped"));
        assert!(out.contains("conflicts recorded 1"));
    }

    #[test]
    fn empty_intent_omits_section() {
        let out = render(
            "p",
            "c",
            "",
            &DiffStats {
                files: 0,
                added_lines: 0,
                removed_lines: 0,
            },
            &[],
            &RunStats {
                total_units: 0,
                reviewed: 0,
                skipped: 0,
                failed: 0,
                conflicts_recorded: 0,
            },
        );
        assert!(!out.contains("## Intent"));
    }
}
