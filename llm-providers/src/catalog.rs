//! Persisted model catalog (JSON on disk).
//!
//! The catalog is an in-memory list of `(provider, model)` pairs backed by a
//! JSON file. Mutations load the file, edit the list and write it back under
//! a single async mutex, so concurrent add/remove calls serialize. Duplicate
//! additions and missing removals are idempotent no-ops. Removing a model
//! does not touch clients already bound to it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error_handler::Result;

/// One catalog row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Registered provider name (e.g. `ollama`).
    pub provider: String,
    /// Model identifier as the provider understands it.
    pub model: String,
}

/// Serialized catalog shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub models: Vec<CatalogEntry>,
}

/// File-backed catalog store with serialized writes.
pub struct CatalogStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CatalogStore {
    /// Store rooted at `path`; the file is created lazily on first write.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Loads the catalog, treating a missing file as empty.
    pub async fn load(&self) -> Result<ModelCatalog> {
        if !self.path.exists() {
            return Ok(ModelCatalog::default());
        }
        let data = fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    async fn save(&self, catalog: &ModelCatalog) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let json = serde_json::to_vec_pretty(catalog)?;
        fs::write(&self.path, json).await?;
        Ok(())
    }

    /// Appends an entry if absent. Returns `true` when the catalog changed.
    pub async fn add(&self, provider: &str, model: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut catalog = self.load().await?;
        let entry = CatalogEntry {
            provider: provider.to_string(),
            model: model.to_string(),
        };
        if catalog.models.contains(&entry) {
            debug!("catalog: add {provider}:{model} — already present");
            return Ok(false);
        }
        catalog.models.push(entry);
        self.save(&catalog).await?;
        debug!("catalog: added {provider}:{model}");
        Ok(true)
    }

    /// Removes an entry if present. Returns `true` when the catalog changed.
    pub async fn remove(&self, provider: &str, model: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut catalog = self.load().await?;
        let before = catalog.models.len();
        catalog
            .models
            .retain(|e| !(e.provider == provider && e.model == model));
        if catalog.models.len() == before {
            debug!("catalog: remove {provider}:{model} — not present");
            return Ok(false);
        }
        self.save(&catalog).await?;
        debug!("catalog: removed {provider}:{model}");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::new(dir.path().join("catalog.json"));

        assert!(store.add("ollama", "qwen3:14b").await.unwrap());
        assert!(!store.add("ollama", "qwen3:14b").await.unwrap());

        let catalog = store.load().await.unwrap();
        assert_eq!(catalog.models.len(), 1);
    }

    #[tokio::test]
    async fn remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::new(dir.path().join("catalog.json"));

        store.add("openai", "gpt-4o-mini").await.unwrap();
        assert!(store.remove("openai", "gpt-4o-mini").await.unwrap());
        assert!(!store.remove("openai", "gpt-4o-mini").await.unwrap());
        assert!(store.load().await.unwrap().models.is_empty());
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::new(dir.path().join("nope.json"));
        assert!(store.load().await.unwrap().models.is_empty());
    }
}
