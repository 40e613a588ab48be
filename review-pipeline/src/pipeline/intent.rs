//! Intent analysis stage: one model call summarizing what the change is
//! trying to do, fed into planner and reviewer prompts.
//!
//! Failures degrade gracefully — the pipeline proceeds with an empty summary
//! and a warning. The summary is optionally cached on disk (JSON keyed by a
//! SHA-256 fingerprint of the change) and reused within the configured TTL.
//!
//! Why cache?
//! - Re-running the pipeline on the same pending change is common (retries,
//!   threshold tweaks) and the intent rarely shifts between runs.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use llm_providers::{LlmRequest, ProviderFactory, TokenUsage};

use crate::events::{FallbackCounter, fallback_keys};
use crate::model::ReviewUnit;
use crate::pipeline::retry::{CallPolicy, CancelFlag, call_model};

/// Returns the root directory for the intent cache (env-overridable).
fn cache_root() -> PathBuf {
    std::env::var("REVIEW_INTENT_CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("code_data/intent_cache"))
}

/// Stable fingerprint over the change: project, change id, unit ids + paths.
fn cache_key(project: &str, change_id: &str, units: &[ReviewUnit]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project);
    hasher.update(":");
    hasher.update(change_id);
    for u in units {
        hasher.update(":");
        hasher.update(&u.id);
        hasher.update("@");
        hasher.update(&u.file_path);
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..24].to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedIntent {
    summary: String,
    created_at: DateTime<Utc>,
}

async fn load_cached(key: &str, ttl_days: i64) -> Option<String> {
    let path = cache_root().join(format!("{key}.json"));
    let data = fs::read(&path).await.ok()?;
    let entry: CachedIntent = serde_json::from_slice(&data).ok()?;
    let age = Utc::now().signed_duration_since(entry.created_at);
    if age.num_days() >= ttl_days {
        debug!("intent: cache entry {key} expired ({} days)", age.num_days());
        return None;
    }
    debug!("intent: cache hit {key}");
    Some(entry.summary)
}

async fn store_cached(key: &str, summary: &str) {
    let path = cache_root().join(format!("{key}.json"));
    let entry = CachedIntent {
        summary: summary.to_string(),
        created_at: Utc::now(),
    };
    // Cache failures are soft; the summary is already in hand.
    let write = async {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        fs::write(&path, serde_json::to_vec(&entry)?).await?;
        Ok::<(), crate::errors::Error>(())
    };
    if let Err(e) = write.await {
        debug!("intent: cache store failed for {key}: {e}");
    }
}

/// Outcome of the intent stage.
#[derive(Debug, Default)]
pub struct IntentOutcome {
    /// Empty when the stage degraded.
    pub summary: String,
    pub usage: TokenUsage,
    pub cache_hit: bool,
}

fn build_intent_prompt(units: &[ReviewUnit]) -> String {
    let mut out = String::from(
        "Summarize the intent of this pending change in 2-4 sentences. \
         Focus on what the author is trying to achieve, not line-by-line detail.\n\nFiles:\n",
    );
    for u in units.iter().take(40) {
        out.push_str(&format!(
            "- {} ({} +{}/-{} [{}])\n",
            u.file_path,
            u.language,
            u.added_lines,
            u.removed_lines,
            u.tags.join(",")
        ));
    }
    out
}

/// Run intent analysis with cache and graceful degradation.
#[allow(clippy::too_many_arguments)]
pub async fn analyze_intent(
    factory: &ProviderFactory,
    preference: &str,
    project: &str,
    change_id: &str,
    units: &[ReviewUnit],
    enable_cache: bool,
    ttl_days: i64,
    policy: &CallPolicy,
    counter: &FallbackCounter,
    cancel: &CancelFlag,
) -> IntentOutcome {
    let key = cache_key(project, change_id, units);

    if enable_cache {
        if let Some(summary) = load_cached(&key, ttl_days).await {
            return IntentOutcome {
                summary,
                usage: TokenUsage::default(),
                cache_hit: true,
            };
        }
    }

    let req = LlmRequest::new(build_intent_prompt(units));
    match call_model(factory, preference, &req, policy, counter, cancel).await {
        Ok((reply, provider)) => {
            debug!("intent: summarized by {provider}");
            let summary = reply.text.trim().to_string();
            if enable_cache && !summary.is_empty() {
                store_cached(&key, &summary).await;
            }
            IntentOutcome {
                summary,
                usage: reply.usage,
                cache_hit: false,
            }
        }
        Err(e) => {
            warn!("intent: degraded to empty summary: {e}");
            counter.record(fallback_keys::INTENT_DEGRADED);
            IntentOutcome::default()
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
            added_lines: 1,
            removed_lines: 0,
            tags: vec![],
            language: "rust".into(),
            diff: "+x".into(),
        }
    }

    #[test]
    fn cache_key_depends_on_units() {
        let a = cache_key("p", "c", &[unit("u1", "a.rs")]);
        let b = cache_key("p", "c", &[unit("u1", "b.rs")]);
        let c = cache_key("p", "c", &[unit("u1", "a.rs")]);
        assert_ne!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.len(), 24);
    }

    #[tokio::test]
    async fn summary_is_cached_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        // Point the cache at a private directory for this test.
        unsafe { std::env::set_var("REVIEW_INTENT_CACHE_DIR", dir.path()) };

        let catalog = dir.path().join("catalog.json");
        let factory = ProviderFactory::from_env(&catalog);
        let policy = CallPolicy {
            timeout: std::time::Duration::from_secs(1),
            max_retries: 0,
            retry_delay: std::time::Duration::from_millis(1),
        };
        let units = vec![unit("u1", "a.rs")];

        let first = analyze_intent(
            &factory,
            "mock",
            "p",
            "c1",
            &units,
            true,
            7,
            &policy,
            &FallbackCounter::new(),
            &CancelFlag::new(),
        )
        .await;
        assert!(!first.cache_hit);
        assert!(!first.summary.is_empty());

        let second = analyze_intent(
            &factory,
            "mock",
            "p",
            "c1",
            &units,
            true,
            7,
            &policy,
            &FallbackCounter::new(),
            &CancelFlag::new(),
        )
        .await;
        assert!(second.cache_hit);
        assert_eq!(second.summary, first.summary);

        unsafe { std::env::remove_var("REVIEW_INTENT_CACHE_DIR") };
    }
}
