//! Rule configuration as runtime data, plus the estimator consuming it.
//!
//! The rule layer is pattern matching over unit tags/paths expressed as an
//! explicit configuration (pattern → suggestion) rather than scattered
//! conditionals, so fusion stays a pure function over its inputs. Two rule
//! families live in one persisted JSON document:
//! - hand-written **pattern rules** carrying their own confidence;
//! - **learned rules** installed by the rule-growth learner (auto or
//!   promoted), always high-confidence.
//!
//! Concurrency: many readers (the estimator clones a snapshot behind an
//! `RwLock`), single writer at a time (install/remove serialize on the
//! store's async mutex and re-read the file before editing).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::{ConfigError, EngineResult};
use crate::model::{ContextLevel, ReviewUnit, RuleEstimate};

/// Confidence attached to estimates backed by an installed learned rule.
pub const LEARNED_RULE_CONFIDENCE: f32 = 0.85;

/// How a learned rule was installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleProvenance {
    /// Cleared the auto-apply thresholds.
    Auto,
    /// Installed by a human via promotion, bypassing thresholds.
    Promoted,
}

/// Hand-written pattern rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRule {
    pub id: String,
    /// `None` matches any language.
    #[serde(default)]
    pub language: Option<String>,
    /// All listed tags must be present on the unit.
    #[serde(default)]
    pub required_tags: Vec<String>,
    /// Optional substring the unit's file path must contain.
    #[serde(default)]
    pub path_contains: Option<String>,
    pub context_level: ContextLevel,
    pub confidence: f32,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Rule mined from fusion conflicts and installed into the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedRule {
    pub rule_id: String,
    pub language: String,
    pub required_tags: Vec<String>,
    pub suggested_context_level: ContextLevel,
    pub provenance: RuleProvenance,
}

/// The persisted rule configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub patterns: Vec<PatternRule>,
    #[serde(default)]
    pub learned: BTreeMap<String, LearnedRule>,
}

impl RuleConfig {
    fn matches_pattern(rule: &PatternRule, unit: &ReviewUnit) -> bool {
        if let Some(lang) = &rule.language {
            if lang != &unit.language {
                return false;
            }
        }
        if let Some(needle) = &rule.path_contains {
            if !unit.file_path.contains(needle.as_str()) {
                return false;
            }
        }
        rule.required_tags
            .iter()
            .all(|t| unit.tags.iter().any(|ut| ut == t))
    }

    fn matches_learned(rule: &LearnedRule, unit: &ReviewUnit) -> bool {
        rule.language == unit.language
            && rule
                .required_tags
                .iter()
                .all(|t| unit.tags.iter().any(|ut| ut == t))
    }
}

/* ------------------------------------------------------------------------- */
/* Persisted store                                                           */
/* ------------------------------------------------------------------------- */

/// File-backed rule configuration store (pretty JSON).
///
/// Writers serialize on an async mutex; each mutation re-reads the file, so
/// concurrent learner instances see each other's installs.
pub struct RuleStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl RuleStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Loads the configuration, treating a missing file as empty.
    ///
    /// # Errors
    /// A present-but-malformed file is a [`ConfigError::MalformedRules`] —
    /// fatal, never silently ignored.
    pub async fn load(&self) -> EngineResult<RuleConfig> {
        if !self.path.exists() {
            return Ok(RuleConfig::default());
        }
        let data = fs::read(&self.path).await?;
        let cfg = serde_json::from_slice(&data)
            .map_err(|e| ConfigError::MalformedRules(e.to_string()))?;
        Ok(cfg)
    }

    async fn save(&self, cfg: &RuleConfig) -> EngineResult<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let json = serde_json::to_vec_pretty(cfg)?;
        fs::write(&self.path, json).await?;
        Ok(())
    }

    /// Installs a learned rule. Returns `false` when the rule id was already
    /// present (idempotent re-apply).
    pub async fn install(&self, rule: LearnedRule) -> EngineResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut cfg = self.load().await?;
        if cfg.learned.contains_key(&rule.rule_id) {
            debug!("rules: install {} — already installed", rule.rule_id);
            return Ok(false);
        }
        debug!(
            "rules: install {} ({} {:?} → {})",
            rule.rule_id, rule.language, rule.required_tags, rule.suggested_context_level
        );
        cfg.learned.insert(rule.rule_id.clone(), rule);
        self.save(&cfg).await?;
        Ok(true)
    }

    /// Removes a learned rule by id. Returns `false` when absent.
    pub async fn remove(&self, rule_id: &str) -> EngineResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut cfg = self.load().await?;
        if cfg.learned.remove(rule_id).is_none() {
            return Ok(false);
        }
        self.save(&cfg).await?;
        Ok(true)
    }
}

/* ------------------------------------------------------------------------- */
/* Estimator                                                                 */
/* ------------------------------------------------------------------------- */

/// Deterministic context-level estimator over the rule configuration.
///
/// Consumed by fusion as a capability: given a unit's language/tags it
/// returns a level and a confidence. When nothing matches (or the
/// configuration was unavailable at construction) the estimate is
/// `(diff_only, confidence 0)`, which forces the LLM-trust path downstream.
#[derive(Clone)]
pub struct RuleEstimator {
    config: Arc<RwLock<RuleConfig>>,
}

impl RuleEstimator {
    pub fn new(config: RuleConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
        }
    }

    /// Estimator over an empty configuration (the unavailability default).
    pub fn unavailable() -> Self {
        warn!("rules: estimator running without configuration — confidence pinned to 0");
        Self::new(RuleConfig::default())
    }

    /// Loads the configuration from a store.
    pub async fn from_store(store: &RuleStore) -> EngineResult<Self> {
        Ok(Self::new(store.load().await?))
    }

    /// Replaces the configuration snapshot (hot reload after apply/promote).
    pub fn reload(&self, config: RuleConfig) {
        if let Ok(mut guard) = self.config.write() {
            *guard = config;
        }
    }

    /// Deterministic estimate for one unit.
    ///
    /// Learned rules win over pattern rules; among candidates of the same
    /// family the one with the most required tags (most specific) wins, ties
    /// broken by id for stability.
    pub fn estimate(&self, unit: &ReviewUnit) -> RuleEstimate {
        let cfg = match self.config.read() {
            Ok(c) => c,
            Err(_) => {
                return RuleEstimate {
                    unit_id: unit.id.clone(),
                    context_level: ContextLevel::DiffOnly,
                    confidence: 0.0,
                    notes: None,
                };
            }
        };

        let learned = cfg
            .learned
            .values()
            .filter(|r| RuleConfig::matches_learned(r, unit))
            .max_by_key(|r| (r.required_tags.len(), std::cmp::Reverse(r.rule_id.clone())));
        if let Some(rule) = learned {
            return RuleEstimate {
                unit_id: unit.id.clone(),
                context_level: rule.suggested_context_level,
                confidence: LEARNED_RULE_CONFIDENCE,
                notes: Some(format!("learned:{}", rule.rule_id)),
            };
        }

        let pattern = cfg
            .patterns
            .iter()
            .filter(|r| RuleConfig::matches_pattern(r, unit))
            .max_by_key(|r| (r.required_tags.len(), std::cmp::Reverse(r.id.clone())));
        if let Some(rule) = pattern {
            return RuleEstimate {
                unit_id: unit.id.clone(),
                context_level: rule.context_level,
                confidence: rule.confidence.clamp(0.0, 1.0),
                notes: rule.notes.clone().or_else(|| Some(rule.id.clone())),
            };
        }

        RuleEstimate {
            unit_id: unit.id.clone(),
            context_level: ContextLevel::DiffOnly,
            confidence: 0.0,
            notes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(language: &str, tags: &[&str], path: &str) -> ReviewUnit {
        ReviewUnit {
            id: "u1".into(),
            file_path: path.into(),
            start_line: 1,
            end_line: 5,
            added_lines: 4,
            removed_lines: 0,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            language: language.into(),
            diff: "+x".into(),
        }
    }

    fn pattern(id: &str, tags: &[&str], level: ContextLevel, confidence: f32) -> PatternRule {
        PatternRule {
            id: id.into(),
            language: None,
            required_tags: tags.iter().map(|t| t.to_string()).collect(),
            path_contains: None,
            context_level: level,
            confidence,
            notes: None,
        }
    }

    #[test]
    fn no_match_forces_llm_trust_path() {
        let est = RuleEstimator::new(RuleConfig::default());
        let e = est.estimate(&unit("rust", &["api_endpoint"], "src/a.rs"));
        assert_eq!(e.confidence, 0.0);
        assert_eq!(e.context_level, ContextLevel::DiffOnly);
    }

    #[test]
    fn most_specific_pattern_wins() {
        let cfg = RuleConfig {
            patterns: vec![
                pattern("broad", &[], ContextLevel::DiffOnly, 0.5),
                pattern(
                    "narrow",
                    &["complete_class"],
                    ContextLevel::FileContext,
                    0.9,
                ),
            ],
            learned: BTreeMap::new(),
        };
        let est = RuleEstimator::new(cfg);
        let e = est.estimate(&unit("rust", &["complete_class"], "src/a.rs"));
        assert_eq!(e.context_level, ContextLevel::FileContext);
        assert_eq!(e.confidence, 0.9);
    }

    #[test]
    fn learned_rules_shadow_patterns() {
        let mut learned = BTreeMap::new();
        learned.insert(
            "auto-rust".to_string(),
            LearnedRule {
                rule_id: "auto-rust".into(),
                language: "rust".into(),
                required_tags: vec!["api_endpoint".into()],
                suggested_context_level: ContextLevel::ProjectContext,
                provenance: RuleProvenance::Auto,
            },
        );
        let cfg = RuleConfig {
            patterns: vec![pattern("p", &["api_endpoint"], ContextLevel::DiffOnly, 0.4)],
            learned,
        };
        let est = RuleEstimator::new(cfg);
        let e = est.estimate(&unit("rust", &["api_endpoint"], "src/a.rs"));
        assert_eq!(e.context_level, ContextLevel::ProjectContext);
        assert_eq!(e.confidence, LEARNED_RULE_CONFIDENCE);
        assert_eq!(e.notes.as_deref(), Some("learned:auto-rust"));
    }

    #[test]
    fn language_gates_learned_rules() {
        let mut learned = BTreeMap::new();
        learned.insert(
            "auto-py".to_string(),
            LearnedRule {
                rule_id: "auto-py".into(),
                language: "python".into(),
                required_tags: vec![],
                suggested_context_level: ContextLevel::Function,
                provenance: RuleProvenance::Promoted,
            },
        );
        let est = RuleEstimator::new(RuleConfig {
            patterns: vec![],
            learned,
        });
        let e = est.estimate(&unit("rust", &[], "src/a.rs"));
        assert_eq!(e.confidence, 0.0);
    }

    #[tokio::test]
    async fn install_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuleStore::new(dir.path().join("rules.json"));
        let rule = LearnedRule {
            rule_id: "auto-x".into(),
            language: "go".into(),
            required_tags: vec!["api_endpoint".into()],
            suggested_context_level: ContextLevel::FileContext,
            provenance: RuleProvenance::Auto,
        };
        assert!(store.install(rule.clone()).await.unwrap());
        assert!(!store.install(rule).await.unwrap());
        let cfg = store.load().await.unwrap();
        assert_eq!(cfg.learned.len(), 1);
    }

    #[tokio::test]
    async fn remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuleStore::new(dir.path().join("rules.json"));
        let rule = LearnedRule {
            rule_id: "auto-y".into(),
            language: "go".into(),
            required_tags: vec![],
            suggested_context_level: ContextLevel::Function,
            provenance: RuleProvenance::Promoted,
        };
        store.install(rule).await.unwrap();
        assert!(store.remove("auto-y").await.unwrap());
        assert!(!store.remove("auto-y").await.unwrap());
    }
}
