//! Append-only conflict log (JSON Lines on disk).
//!
//! One entry per recorded [`Conflict`], partitioned by project:
//! `<root>/<project_sanitized>/conflicts.jsonl`. Appends open the file in
//! append mode so concurrent runs writing their own entries do not clobber
//! each other; entries are never mutated after creation. The learner is the
//! only reader; malformed lines are skipped with a warning rather than
//! failing the whole read.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::errors::EngineResult;
use crate::model::Conflict;

/// Filesystem-safe replacement for project path (slashes → underscores).
fn sanitize(s: &str) -> String {
    s.replace('/', "_")
}

/// Handle to one project's conflict partition.
#[derive(Debug, Clone)]
pub struct ConflictLog {
    root: PathBuf,
    project: String,
}

impl ConflictLog {
    /// Log rooted at `root` for the given project.
    pub fn new(root: impl AsRef<Path>, project: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            project: project.into(),
        }
    }

    /// Log rooted at the env-overridable default directory.
    ///
    /// Default root: `code_data/conflict_log` (co-located with other
    /// project artifacts); override with `REVIEW_CONFLICT_LOG_DIR`.
    pub fn from_env(project: impl Into<String>) -> Self {
        let root = std::env::var("REVIEW_CONFLICT_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("code_data/conflict_log"));
        Self::new(root, project)
    }

    fn path(&self) -> PathBuf {
        self.root
            .join(sanitize(&self.project))
            .join("conflicts.jsonl")
    }

    /// Appends a batch of conflicts (one JSON line each).
    pub async fn append(&self, conflicts: &[Conflict]) -> EngineResult<()> {
        if conflicts.is_empty() {
            return Ok(());
        }
        let path = self.path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let mut buf = Vec::new();
        for c in conflicts {
            buf.extend_from_slice(&serde_json::to_vec(c)?);
            buf.push(b'\n');
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;
        debug!(
            "conflict_log: appended {} entries for {}",
            conflicts.len(),
            self.project
        );
        Ok(())
    }

    /// Reads the whole partition; malformed lines are skipped with a warning.
    pub async fn read_all(&self) -> EngineResult<Vec<Conflict>> {
        let path = self.path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&path).await?;
        let mut out = Vec::new();
        for (idx, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Conflict>(line) {
                Ok(c) => out.push(c),
                Err(e) => warn!(
                    "conflict_log: skipping malformed line {} in {}: {e}",
                    idx + 1,
                    path.display()
                ),
            }
        }
        Ok(out)
    }

    /// Rewrites the partition with the surviving entries (used by cleanup).
    pub async fn replace_all(&self, conflicts: &[Conflict]) -> EngineResult<()> {
        let path = self.path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let mut buf = Vec::new();
        for c in conflicts {
            buf.extend_from_slice(&serde_json::to_vec(c)?);
            buf.push(b'\n');
        }
        fs::write(&path, buf).await?;
        Ok(())
    }
}
