//! Serializes config mutations so `load → mutate → save → syncCollections
//! → syncContexts → refresh` is linearizable, the same `tokio::sync::Mutex`
//! idiom [`crate::jobs::JobTracker`] uses for its single write slot.
//!
//! A mutation closure receives the freshest on-disk config loaded inside
//! the critical section and returns either a new config or a typed
//! [`EngineError`]. If the save step succeeds but a later step (store
//! sync) fails, the on-disk file is already authoritative; the caller
//! gets the error back and a subsequent `sync_collections`/`sync_contexts`
//! at next startup reconciles the store.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::config::{self, Config};
use crate::errors::EngineError;
use crate::store::StoreEngine;

pub struct ConfigMutex {
    path: PathBuf,
    guard: Mutex<()>,
    current: Mutex<Arc<Config>>,
}

impl ConfigMutex {
    pub fn new(path: PathBuf, initial: Config) -> Self {
        Self {
            path,
            guard: Mutex::new(()),
            current: Mutex::new(Arc::new(initial)),
        }
    }

    /// Snapshot of the in-memory config as last refreshed.
    pub async fn current(&self) -> Arc<Config> {
        Arc::clone(&*self.current.lock().await)
    }

    /// Run `mutate` inside the write critical section: reload from disk,
    /// apply `mutate`, validate-and-save, push to the store, then refresh
    /// the in-memory snapshot. Only one mutation runs at a time process-wide.
    pub async fn mutate<F>(&self, store: &StoreEngine, mutate: F) -> Result<Arc<Config>, EngineError>
    where
        F: FnOnce(Config) -> Result<Config, EngineError>,
    {
        let _lock = self.guard.lock().await;

        let fresh = config::load_config(&self.path)?;
        let updated = mutate(fresh)?;

        config::save_config(&self.path, &updated)?;

        if let Err(e) = store.sync_collections(&updated.collections).await {
            warn!(error = %e, "config saved but store sync_collections failed; will reconcile on next sync");
            return Err(e);
        }
        let contexts: Vec<crate::models::Context> =
            updated.contexts.iter().cloned().map(Into::into).collect();
        if let Err(e) = store.sync_contexts(&contexts).await {
            warn!(error = %e, "config saved but store sync_contexts failed; will reconcile on next sync");
            return Err(e);
        }

        let snapshot = Arc::new(updated);
        *self.current.lock().await = Arc::clone(&snapshot);
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DbConfig, FtsTokenizer};
    use sqlx::sqlite::SqlitePoolOptions;

    fn base_config(data_dir: PathBuf) -> Config {
        Config {
            version: "1.0".into(),
            db: DbConfig {
                data_dir,
                index_name: "default".into(),
                busy_timeout_ms: 5000,
            },
            fts_tokenizer: FtsTokenizer::Unicode61,
            chunking: Default::default(),
            retrieval: Default::default(),
            embedding: Default::default(),
            server: Default::default(),
            collections: vec![],
            contexts: vec![],
            models: None,
        }
    }

    async fn test_store() -> StoreEngine {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        StoreEngine::open(pool, FtsTokenizer::Unicode61).await.unwrap()
    }

    #[tokio::test]
    async fn mutate_persists_and_refreshes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("gno.toml");
        let cfg = base_config(dir.path().to_path_buf());
        config::save_config(&config_path, &cfg).unwrap();

        let mutex = ConfigMutex::new(config_path.clone(), cfg);
        let store = test_store().await;

        let result = mutex
            .mutate(&store, |mut c| {
                c.retrieval.hybrid_alpha = 0.9;
                Ok(c)
            })
            .await
            .unwrap();

        assert_eq!(result.retrieval.hybrid_alpha, 0.9);
        assert_eq!(mutex.current().await.retrieval.hybrid_alpha, 0.9);

        let reloaded = config::load_config(&config_path).unwrap();
        assert_eq!(reloaded.retrieval.hybrid_alpha, 0.9);
    }

    #[tokio::test]
    async fn mutation_error_leaves_disk_config_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("gno.toml");
        let cfg = base_config(dir.path().to_path_buf());
        config::save_config(&config_path, &cfg).unwrap();

        let mutex = ConfigMutex::new(config_path.clone(), cfg);
        let store = test_store().await;

        let err = mutex
            .mutate(&store, |_c| {
                Err(EngineError::Validation("rejected by caller".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let reloaded = config::load_config(&config_path).unwrap();
        assert_eq!(reloaded.retrieval.hybrid_alpha, 0.6);
    }
}
