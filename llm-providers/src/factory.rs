//! Provider factory: preference resolution, fallback ordering, liveness.
//!
//! The factory owns an ordered priority list of registered providers and a
//! per-provider [`ProviderState`] cache. `resolve` is a linear scan over that
//! list — no inheritance, no network:
//!
//! - `"auto"`  → first provider whose cached state says `available`;
//! - `"mock"`  → deterministic stub, bypassing availability checks;
//! - `"<provider>"` / `"<provider>:<model>"` → that provider, bound to the
//!   given model or its default.
//!
//! States are recomputed from credentials at construction and refreshed with
//! real liveness probes only on an explicit [`ProviderFactory::refresh`].
//! The orchestrator marks a provider dead via [`ProviderFactory::mark_unavailable`]
//! after exhausting retries, which steers subsequent `auto` resolutions to the
//! next provider in line.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::catalog::CatalogStore;
use crate::config::default_config::{config_ollama, config_openai};
use crate::config::llm_model_config::LlmModelConfig;
use crate::config::llm_provider::ProviderKind;
use crate::error_handler::{FactoryError, Result};
use crate::services::mock_service::MockService;
use crate::services::ollama_service::OllamaService;
use crate::services::open_ai_service::OpenAiService;
use crate::services::ProviderClient;

/// Per-provider liveness snapshot. Never persisted; recomputed at process
/// start and on explicit refresh.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderState {
    /// Registered provider name (e.g. `ollama`).
    pub name: String,
    /// Whether required credentials were found at construction.
    pub credentials_present: bool,
    /// Whether the provider is currently considered callable.
    pub available: bool,
    /// Last failure observed for this provider, if any.
    pub last_error: Option<String>,
}

/// One registered provider: identity plus its base model config.
#[derive(Debug, Clone)]
struct ProviderSpec {
    kind: ProviderKind,
    cfg: LlmModelConfig,
}

impl ProviderSpec {
    fn credentials_present(&self) -> bool {
        match self.kind {
            // A local runtime needs no credentials.
            ProviderKind::Ollama => true,
            ProviderKind::OpenAi => self.cfg.api_key.is_some(),
            ProviderKind::Mock => true,
        }
    }
}

/// Factory resolving a model preference string to a working client.
pub struct ProviderFactory {
    /// Priority order for `auto` resolution.
    providers: Vec<ProviderSpec>,
    states: RwLock<BTreeMap<String, ProviderState>>,
    catalog: CatalogStore,
}

impl ProviderFactory {
    /// Builds the factory from environment-driven provider configs.
    ///
    /// Priority order is fixed: local Ollama first, then OpenAI. The mock
    /// provider is reachable only by explicit preference, never via `auto`.
    pub fn from_env(catalog_path: impl AsRef<Path>) -> Self {
        let providers = vec![
            ProviderSpec {
                kind: ProviderKind::Ollama,
                cfg: config_ollama(),
            },
            ProviderSpec {
                kind: ProviderKind::OpenAi,
                cfg: config_openai(),
            },
        ];

        let states = providers
            .iter()
            .map(|spec| {
                let creds = spec.credentials_present();
                (
                    spec.kind.as_str().to_string(),
                    ProviderState {
                        name: spec.kind.as_str().to_string(),
                        credentials_present: creds,
                        available: creds,
                        last_error: if creds {
                            None
                        } else {
                            Some("credentials missing".to_string())
                        },
                    },
                )
            })
            .collect();

        Self {
            providers,
            states: RwLock::new(states),
            catalog: CatalogStore::new(catalog_path),
        }
    }

    /// Resolves a preference string to `(client, provider_name)`.
    ///
    /// # Errors
    /// - [`FactoryError::NoProviderAvailable`] when `auto` exhausts the list
    /// - [`FactoryError::UnknownProvider`] for an unregistered name
    /// - [`FactoryError::Unavailable`] when an explicit provider lacks credentials
    pub fn resolve(&self, preference: &str) -> Result<(ProviderClient, String)> {
        let pref = preference.trim();

        if pref.is_empty() || pref.eq_ignore_ascii_case("auto") {
            return self.resolve_auto();
        }

        if pref.eq_ignore_ascii_case("mock") {
            return Ok((
                ProviderClient::Mock(MockService::new()),
                ProviderKind::Mock.as_str().to_string(),
            ));
        }

        let (name, model) = match pref.split_once(':') {
            Some((n, m)) => (n, Some(m)),
            None => (pref, None),
        };

        let kind = ProviderKind::parse(name)
            .ok_or_else(|| FactoryError::UnknownProvider(name.to_string()))?;
        let spec = self
            .providers
            .iter()
            .find(|s| s.kind == kind)
            .ok_or_else(|| FactoryError::UnknownProvider(name.to_string()))?;

        if !spec.credentials_present() {
            return Err(FactoryError::Unavailable {
                name: kind.as_str().to_string(),
                reason: "credentials missing".to_string(),
            }
            .into());
        }

        let mut cfg = spec.cfg.clone();
        if let Some(m) = model.filter(|m| !m.trim().is_empty()) {
            cfg.model = m.trim().to_string();
        }
        let client = build_client(spec.kind, cfg)?;
        Ok((client, kind.as_str().to_string()))
    }

    fn resolve_auto(&self) -> Result<(ProviderClient, String)> {
        for spec in &self.providers {
            let name = spec.kind.as_str();
            let live = self
                .states
                .read()
                .ok()
                .and_then(|s| s.get(name).map(|st| st.available))
                .unwrap_or(false);
            if !live {
                debug!("factory: skip {name} (unavailable)");
                continue;
            }
            match build_client(spec.kind, spec.cfg.clone()) {
                Ok(client) => return Ok((client, name.to_string())),
                Err(e) => {
                    // A client that cannot even be constructed is as dead as
                    // a failed call; record and move on.
                    warn!("factory: {name} client construction failed: {e}");
                    self.mark_unavailable(name, &e.to_string());
                }
            }
        }
        Err(FactoryError::NoProviderAvailable.into())
    }

    /// Marks a provider dead after the caller exhausted its retry budget.
    pub fn mark_unavailable(&self, name: &str, reason: &str) {
        if let Ok(mut states) = self.states.write() {
            if let Some(st) = states.get_mut(name) {
                st.available = false;
                st.last_error = Some(reason.to_string());
            }
        }
    }

    /// Snapshot of all provider states in priority order.
    pub fn states(&self) -> Vec<ProviderState> {
        let states = match self.states.read() {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        self.providers
            .iter()
            .filter_map(|spec| states.get(spec.kind.as_str()).cloned())
            .collect()
    }

    /// Probes every registered provider and rewrites the state cache.
    ///
    /// Probe targets:
    /// - Ollama: `GET {endpoint}/api/tags`
    /// - OpenAI: `GET {endpoint}/v1/models` with Bearer auth
    ///
    /// Probe failures mark the provider unavailable but never fail the
    /// refresh itself.
    pub async fn refresh(&self) {
        for spec in &self.providers {
            let name = spec.kind.as_str();
            let creds = spec.credentials_present();
            let (available, last_error) = if !creds {
                (false, Some("credentials missing".to_string()))
            } else {
                match probe(spec).await {
                    Ok(()) => (true, None),
                    Err(msg) => {
                        warn!("factory: {name} probe failed: {msg}");
                        (false, Some(msg))
                    }
                }
            };
            if let Ok(mut states) = self.states.write() {
                states.insert(
                    name.to_string(),
                    ProviderState {
                        name: name.to_string(),
                        credentials_present: creds,
                        available,
                        last_error,
                    },
                );
            }
        }
    }

    /// Adds a model to the persisted catalog; duplicate adds are no-ops.
    ///
    /// Returns `true` when the catalog changed.
    pub async fn add_model(&self, provider: &str, model: &str) -> Result<bool> {
        self.catalog.add(provider, model).await
    }

    /// Removes a model from the persisted catalog.
    ///
    /// Returns `true` when an entry was removed. In-flight calls bound to the
    /// removed model are unaffected — the catalog only gates future resolution.
    pub async fn remove_model(&self, provider: &str, model: &str) -> Result<bool> {
        self.catalog.remove(provider, model).await
    }
}

fn build_client(kind: ProviderKind, cfg: LlmModelConfig) -> Result<ProviderClient> {
    Ok(match kind {
        ProviderKind::Ollama => ProviderClient::Ollama(OllamaService::new(cfg)?),
        ProviderKind::OpenAi => ProviderClient::OpenAi(OpenAiService::new(cfg)?),
        ProviderKind::Mock => ProviderClient::Mock(MockService::new()),
    })
}

/// Best-effort liveness probe; returns a reason string on failure.
async fn probe(spec: &ProviderSpec) -> std::result::Result<(), String> {
    let url = match spec.kind {
        ProviderKind::Ollama => {
            format!("{}/api/tags", spec.cfg.endpoint.trim_end_matches('/'))
        }
        ProviderKind::OpenAi => {
            format!("{}/v1/models", spec.cfg.endpoint.trim_end_matches('/'))
        }
        ProviderKind::Mock => return Ok(()),
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| e.to_string())?;

    let mut req = client.get(&url);
    if let Some(key) = spec.cfg.api_key.as_deref() {
        req = req.bearer_auth(key);
    }

    match req.send().await {
        Ok(resp) if resp.status().is_success() => Ok(()),
        Ok(resp) => Err(format!("probe {url} returned HTTP {}", resp.status().as_u16())),
        Err(e) => Err(format!("probe {url} failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handler::LlmProviderError;

    fn factory_in(dir: &tempfile::TempDir) -> ProviderFactory {
        ProviderFactory::from_env(dir.path().join("catalog.json"))
    }

    #[test]
    fn mock_preference_bypasses_availability() {
        let dir = tempfile::tempdir().unwrap();
        let f = factory_in(&dir);
        for spec in &f.providers {
            f.mark_unavailable(spec.kind.as_str(), "down");
        }
        let (client, name) = f.resolve("mock").unwrap();
        assert_eq!(name, "mock");
        assert_eq!(client.model(), "mock");
    }

    #[test]
    fn auto_exhaustion_raises_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let f = factory_in(&dir);
        for spec in &f.providers {
            f.mark_unavailable(spec.kind.as_str(), "down");
        }
        let err = f.resolve("auto").unwrap_err();
        assert!(matches!(
            err,
            LlmProviderError::Factory(FactoryError::NoProviderAvailable)
        ));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let f = factory_in(&dir);
        let err = f.resolve("frobnicator").unwrap_err();
        assert!(matches!(
            err,
            LlmProviderError::Factory(FactoryError::UnknownProvider(_))
        ));
    }

    #[test]
    fn explicit_preference_binds_model() {
        let dir = tempfile::tempdir().unwrap();
        let f = factory_in(&dir);
        let (client, name) = f.resolve("ollama:qwen3:32b").unwrap();
        assert_eq!(name, "ollama");
        // Everything after the first ':' is the model id.
        assert_eq!(client.model(), "qwen3:32b");
    }

    #[test]
    fn marking_unavailable_steers_auto() {
        let dir = tempfile::tempdir().unwrap();
        let f = factory_in(&dir);
        f.mark_unavailable("ollama", "timeout");
        let states = f.states();
        let ollama = states.iter().find(|s| s.name == "ollama").unwrap();
        assert!(!ollama.available);
        assert_eq!(ollama.last_error.as_deref(), Some("timeout"));
    }
}
