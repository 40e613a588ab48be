//! External collaborator boundaries: unit builder, context store, scanner.
//!
//! These services are pluggable; the pipeline only sees the small contracts
//! below, dispatched over enums (no trait objects). The `Prepared` variants
//! wrap data produced out-of-band (an upstream parser service, a test
//! fixture); `Unavailable` models a dead parser so the fatal-stage semantics
//! stay testable.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::{EngineResult, StageError};
use crate::model::{ContextLevel, ReviewUnit};

/// Aggregate numbers reported by the diff parse stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DiffStats {
    pub files: usize,
    pub added_lines: u64,
    pub removed_lines: u64,
}

/// The diff/unit parser boundary.
#[derive(Debug, Clone)]
pub enum UnitSource {
    /// Units already built by the external unit builder.
    Prepared(Vec<ReviewUnit>),
    /// The parser service could not be reached; both parse stages fail fatally.
    Unavailable(String),
}

impl UnitSource {
    /// Statistics over the pending change (diff_parse stage).
    pub fn diff_stats(&self) -> EngineResult<DiffStats> {
        match self {
            UnitSource::Prepared(units) => {
                let mut files: Vec<&str> = units.iter().map(|u| u.file_path.as_str()).collect();
                files.sort();
                files.dedup();
                Ok(DiffStats {
                    files: files.len(),
                    added_lines: units.iter().map(|u| u.added_lines as u64).sum(),
                    removed_lines: units.iter().map(|u| u.removed_lines as u64).sum(),
                })
            }
            UnitSource::Unavailable(reason) => {
                Err(StageError::UnitSource(reason.clone()).into())
            }
        }
    }

    /// The built review units (review_units stage).
    pub fn build_units(&self) -> EngineResult<Vec<ReviewUnit>> {
        match self {
            UnitSource::Prepared(units) => Ok(units.clone()),
            UnitSource::Unavailable(reason) => {
                Err(StageError::UnitSource(reason.clone()).into())
            }
        }
    }
}

/// Per-file surrounding code at the three non-trivial levels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileContextEntry {
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
}

/// The context store boundary consumed by context assembly.
#[derive(Debug, Clone, Default)]
pub enum ContextSource {
    /// No store connected; every level degrades to the unit's own diff.
    #[default]
    Inline,
    /// In-memory map keyed by file path.
    Prepared(HashMap<String, FileContextEntry>),
}

impl ContextSource {
    /// Surrounding code for `path` at `level`, if the store has it.
    ///
    /// `diff_only` never needs the store; broader levels fall back to the
    /// nearest narrower text the store can produce.
    pub fn fetch(&self, path: &str, level: ContextLevel) -> Option<String> {
        let entry = match self {
            ContextSource::Inline => return None,
            ContextSource::Prepared(map) => map.get(path)?,
        };
        match level {
            ContextLevel::DiffOnly => None,
            ContextLevel::Function => entry.function.clone(),
            ContextLevel::FileContext => entry.file.clone().or_else(|| entry.function.clone()),
            ContextLevel::ProjectContext => entry
                .project
                .clone()
                .or_else(|| entry.file.clone())
                .or_else(|| entry.function.clone()),
        }
    }
}

/// One static-analysis finding surfaced through the tool side channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanFinding {
    pub file_path: String,
    pub message: String,
}

/// The static-analysis scanner boundary (tool side channel).
#[derive(Debug, Clone, Default)]
pub enum Scanner {
    /// No scanner wired in; no tool events are emitted.
    #[default]
    Disabled,
    /// Precomputed findings keyed by file path.
    Prepared(HashMap<String, Vec<ScanFinding>>),
}

impl Scanner {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Scanner::Disabled)
    }

    /// Findings for one file (empty when none or disabled).
    pub fn findings_for(&self, path: &str) -> Vec<ScanFinding> {
        match self {
            Scanner::Disabled => Vec::new(),
            Scanner::Prepared(map) => map.get(path).cloned().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(id: &str, path: &str) -> ReviewUnit {
        ReviewUnit {
            id: id.into(),
            file_path: path.into(),
            start_line: 1,
            end_line: 2,
            added_lines: 2,
            removed_lines: 1,
            tags: vec![],
            language: "rust".into(),
            diff: "+x".into(),
        }
    }

    #[test]
    fn diff_stats_count_distinct_files() {
        let src = UnitSource::Prepared(vec![
            unit("u1", "a.rs"),
            unit("u2", "a.rs"),
            unit("u3", "b.rs"),
        ]);
        let stats = src.diff_stats().unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.added_lines, 6);
        assert_eq!(stats.removed_lines, 3);
    }

    #[test]
    fn unavailable_source_is_fatal() {
        let src = UnitSource::Unavailable("parser down".into());
        assert!(src.diff_stats().is_err());
        assert!(src.build_units().is_err());
    }

    #[test]
    fn context_levels_fall_back_to_narrower_text() {
        let mut map = HashMap::new();
        map.insert(
            "a.rs".to_string(),
            FileContextEntry {
                function: Some("fn body".into()),
                file: None,
                project: None,
            },
        );
        let src = ContextSource::Prepared(map);
        assert_eq!(
            src.fetch("a.rs", ContextLevel::ProjectContext).as_deref(),
            Some("fn body")
        );
        assert_eq!(src.fetch("a.rs", ContextLevel::DiffOnly), None);
        assert_eq!(src.fetch("missing.rs", ContextLevel::FileContext), None);
    }
}
