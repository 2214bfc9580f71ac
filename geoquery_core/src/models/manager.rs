use super::{ModelCatalog, ModelConfig};
use crate::cache::{resource_matches, ArtifactStorage, ALL_CACHES, MODEL_CACHE};
use crate::error::{LifecycleError, StorageError};
use crate::inference::{InferenceBackend, InferenceEngine, ProgressListener};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheState {
    NotCached,
    Downloading,
    Cached,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub config: ModelConfig,
    pub state: CacheState,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvictionSummary {
    pub succeeded: usize,
    pub failed: usize,
}

struct ActiveModel {
    model_id: String,
    engine: Arc<dyn InferenceEngine>,
}

/// Owns the active engine and the on-disk artifacts of every configured model.
///
/// Activations go through `activation`, so a second request waits for the
/// first to settle. The active slot is swapped only after a load succeeds.
pub struct ModelManager {
    catalog: ModelCatalog,
    backend: Arc<dyn InferenceBackend>,
    storage: Arc<dyn ArtifactStorage>,
    activation: Mutex<()>,
    active: RwLock<Option<ActiveModel>>,
    downloading: Mutex<HashSet<String>>,
    progress: Option<ProgressListener>,
}

impl ModelManager {
    pub fn new(
        catalog: ModelCatalog,
        backend: Arc<dyn InferenceBackend>,
        storage: Arc<dyn ArtifactStorage>,
    ) -> Self {
        Self {
            catalog,
            backend,
            storage,
            activation: Mutex::new(()),
            active: RwLock::new(None),
            downloading: Mutex::new(HashSet::new()),
            progress: None,
        }
    }

    pub fn with_progress_listener(mut self, listener: ProgressListener) -> Self {
        self.progress = Some(listener);
        self
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn list_configs(&self) -> &[ModelConfig] {
        self.catalog.configs()
    }

    /// True when the model cache holds a resource whose name contains `model_id`
    /// (case-insensitive). Unavailable storage reads as not cached.
    pub async fn check_cache_status(&self, model_id: &str) -> bool {
        match self.storage.resource_names(MODEL_CACHE).await {
            Ok(names) => names.iter().any(|name| resource_matches(name, model_id)),
            Err(StorageError::Unavailable) => {
                debug!("Storage unavailable, treating {} as not cached", model_id);
                false
            }
            Err(e) => {
                warn!("Error checking cache status for {}: {}", model_id, e);
                false
            }
        }
    }

    pub async fn model_state(&self, model_id: &str) -> CacheState {
        if self.downloading.lock().await.contains(model_id) {
            CacheState::Downloading
        } else if self.check_cache_status(model_id).await {
            CacheState::Cached
        } else {
            CacheState::NotCached
        }
    }

    pub async fn list_models(&self) -> Vec<ModelStatus> {
        let active = self.active_model().await;
        let mut statuses = Vec::with_capacity(self.catalog.configs().len());
        for config in self.catalog.configs() {
            statuses.push(ModelStatus {
                state: self.model_state(&config.model_id).await,
                active: active.as_deref() == Some(config.model_id.as_str()),
                config: config.clone(),
            });
        }
        statuses
    }

    pub async fn active_model(&self) -> Option<String> {
        self.active
            .read()
            .await
            .as_ref()
            .map(|active| active.model_id.clone())
    }

    /// Handle to the active engine, if any.
    pub async fn engine(&self) -> Option<Arc<dyn InferenceEngine>> {
        self.active
            .read()
            .await
            .as_ref()
            .map(|active| active.engine.clone())
    }

    pub async fn activate(&self, model_id: &str) -> Result<(), LifecycleError> {
        let config = self
            .catalog
            .get(model_id)
            .cloned()
            .ok_or_else(|| LifecycleError::ActivationFailed {
                model_id: model_id.to_string(),
                reason: "unknown model".to_string(),
            })?;

        let _guard = self.activation.lock().await;

        if self.active_model().await.as_deref() == Some(model_id) {
            debug!("Model {} already active", model_id);
            return Ok(());
        }

        info!("Loading model {} (~{} MB)", model_id, config.size_mb);
        self.downloading.lock().await.insert(model_id.to_string());
        let loaded = self
            .backend
            .create_engine(&config, self.progress.clone())
            .await;
        self.downloading.lock().await.remove(model_id);

        let engine = loaded.map_err(|e| {
            warn!("Activation of {} failed: {:#}", model_id, e);
            LifecycleError::ActivationFailed {
                model_id: model_id.to_string(),
                reason: format!("{:#}", e),
            }
        })?;

        let previous = self.active.write().await.replace(ActiveModel {
            model_id: model_id.to_string(),
            engine,
        });

        if let Some(previous) = previous {
            debug!("Releasing {}", previous.model_id);
            previous.engine.unload().await;
        }

        info!("Model {} is active", model_id);
        Ok(())
    }

    /// Deletes a model's artifacts. Failures are logged and reported as `false`.
    ///
    /// The active model and a model still loading are refused. No activation
    /// can start while the artifacts are being removed.
    pub async fn evict(&self, model_id: &str) -> Result<bool, LifecycleError> {
        if self.downloading.lock().await.contains(model_id) {
            return Err(LifecycleError::ModelInUse(model_id.to_string()));
        }

        let _guard = self.activation.lock().await;
        if self.active_model().await.as_deref() == Some(model_id) {
            return Err(LifecycleError::ModelInUse(model_id.to_string()));
        }

        let mut success = true;

        if let Err(e) = self.backend.delete_model_cache(model_id).await {
            warn!("Backend could not delete cache for {}: {:#}", model_id, e);
            success = false;
        }

        for cache_name in ALL_CACHES {
            match self.storage.delete_matching(cache_name, model_id).await {
                Ok(removed) => {
                    if removed > 0 {
                        debug!("Deleted {} entries from {}", removed, cache_name);
                    }
                }
                Err(StorageError::Unavailable) => {
                    debug!("Storage unavailable, skipping {}", cache_name);
                }
                Err(e) => {
                    warn!("Could not clear {} for {}: {}", cache_name, model_id, e);
                    success = false;
                }
            }
        }

        if success {
            info!("Evicted model {}", model_id);
        }
        Ok(success)
    }

    /// Evicts every cached model one after another. The active model counts
    /// as a failure.
    pub async fn evict_all(&self) -> EvictionSummary {
        let mut summary = EvictionSummary::default();

        for config in self.catalog.configs() {
            if !self.check_cache_status(&config.model_id).await {
                continue;
            }
            match self.evict(&config.model_id).await {
                Ok(true) => summary.succeeded += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    debug!("Skipping eviction: {}", e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Evicted {} models ({} failed)",
            summary.succeeded, summary.failed
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FsArtifactStore;
    use crate::inference::{ChatCompletion, CompletionRequest, LoadProgress};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    const LLAMA_1B: &str = "Llama-3.2-1B-Instruct-q4f16_1-MLC";
    const LLAMA_3B: &str = "Llama-3.2-3B-Instruct-q4f16_1-MLC";
    const QWEN: &str = "Qwen2.5-1.5B-Instruct-q4f16_1-MLC";

    struct MockEngine {
        model_id: String,
        stats: Arc<MockStats>,
    }

    #[async_trait]
    impl InferenceEngine for MockEngine {
        fn model_id(&self) -> &str {
            &self.model_id
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<ChatCompletion> {
            Ok(ChatCompletion::from_text("SELECT name FROM countries"))
        }

        async fn unload(&self) {
            self.stats.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct MockStats {
        loading: AtomicUsize,
        max_loading: AtomicUsize,
        live: AtomicUsize,
        created: AtomicUsize,
    }

    /// Loads take a little while; ids listed in `broken` always fail.
    /// With a `gate`, each load also waits for one notification.
    struct MockBackend {
        stats: Arc<MockStats>,
        storage: Arc<dyn ArtifactStorage>,
        broken: Vec<String>,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl InferenceBackend for MockBackend {
        async fn create_engine(
            &self,
            model: &ModelConfig,
            progress: Option<ProgressListener>,
        ) -> Result<Arc<dyn InferenceEngine>> {
            let now = self.stats.loading.fetch_add(1, Ordering::SeqCst) + 1;
            self.stats.max_loading.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.stats.loading.fetch_sub(1, Ordering::SeqCst);

            if self.broken.contains(&model.model_id) {
                bail!("out of memory");
            }
            if let Some(listener) = progress {
                listener(LoadProgress {
                    progress: 1.0,
                    text: "done".to_string(),
                });
            }
            self.storage
                .put(MODEL_CACHE, &format!("https://hf.co/mlc-ai/{}/params.bin", model.model_id), 1)
                .await?;

            self.stats.live.fetch_add(1, Ordering::SeqCst);
            self.stats.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockEngine {
                model_id: model.model_id.clone(),
                stats: self.stats.clone(),
            }))
        }

        async fn delete_model_cache(&self, _model_id: &str) -> Result<()> {
            Ok(())
        }

        async fn has_model_in_cache(&self, model_id: &str) -> Result<bool> {
            let names = self.storage.resource_names(MODEL_CACHE).await?;
            Ok(names.iter().any(|n| resource_matches(n, model_id)))
        }
    }

    struct Fixture {
        manager: Arc<ModelManager>,
        storage: Arc<dyn ArtifactStorage>,
        stats: Arc<MockStats>,
        _dir: TempDir,
    }

    fn fixture(broken: &[&str]) -> Fixture {
        let dir = TempDir::new().unwrap();
        let storage: Arc<dyn ArtifactStorage> = Arc::new(FsArtifactStore::new(dir.path()).unwrap());
        let stats = Arc::new(MockStats::default());
        let backend = Arc::new(MockBackend {
            stats: stats.clone(),
            storage: storage.clone(),
            broken: broken.iter().map(|s| s.to_string()).collect(),
            gate: None,
        });
        let manager = ModelManager::new(ModelCatalog::builtin(), backend, storage.clone());
        Fixture {
            manager: Arc::new(manager),
            storage,
            stats,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_activate_replaces_and_releases_previous() {
        let fx = fixture(&[]);
        assert_eq!(fx.manager.active_model().await, None);

        fx.manager.activate(LLAMA_1B).await.unwrap();
        fx.manager.activate(QWEN).await.unwrap();

        assert_eq!(fx.manager.active_model().await.as_deref(), Some(QWEN));
        assert_eq!(fx.manager.engine().await.unwrap().model_id(), QWEN);
        assert_eq!(fx.stats.live.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_activation_keeps_previous() {
        let fx = fixture(&[LLAMA_3B]);
        fx.manager.activate(LLAMA_1B).await.unwrap();

        let err = fx.manager.activate(LLAMA_3B).await.unwrap_err();
        match err {
            LifecycleError::ActivationFailed { model_id, reason } => {
                assert_eq!(model_id, LLAMA_3B);
                assert!(reason.contains("out of memory"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(fx.manager.active_model().await.as_deref(), Some(LLAMA_1B));
        assert_eq!(fx.manager.model_state(LLAMA_3B).await, CacheState::NotCached);
    }

    #[tokio::test]
    async fn test_unknown_model_fails_activation() {
        let fx = fixture(&[]);
        assert!(matches!(
            fx.manager.activate("gpt-4").await,
            Err(LifecycleError::ActivationFailed { .. })
        ));
        assert_eq!(fx.stats.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_activations_are_serialized() {
        let fx = fixture(&[]);

        let mut handles = Vec::new();
        for id in [LLAMA_1B, QWEN, LLAMA_3B, LLAMA_1B, QWEN] {
            let manager = fx.manager.clone();
            handles.push(tokio::spawn(async move { manager.activate(id).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(fx.stats.max_loading.load(Ordering::SeqCst), 1);
        assert_eq!(fx.stats.live.load(Ordering::SeqCst), 1);
        assert!(fx.manager.active_model().await.is_some());
    }

    #[tokio::test]
    async fn test_cache_status_and_progress() {
        let fx = fixture(&[]);
        let reports = Arc::new(AtomicUsize::new(0));
        let counter = reports.clone();

        let dir = TempDir::new().unwrap();
        let storage: Arc<dyn ArtifactStorage> = Arc::new(FsArtifactStore::new(dir.path()).unwrap());
        let backend = Arc::new(MockBackend {
            stats: fx.stats.clone(),
            storage: storage.clone(),
            broken: Vec::new(),
            gate: None,
        });
        let manager = ModelManager::new(ModelCatalog::builtin(), backend, storage.clone())
            .with_progress_listener(Arc::new(move |_: LoadProgress| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));

        assert!(!manager.check_cache_status(QWEN).await);
        manager.activate(QWEN).await.unwrap();
        assert_eq!(reports.load(Ordering::SeqCst), 1);

        assert!(manager.check_cache_status(QWEN).await);
        assert!(manager.check_cache_status(&QWEN.to_lowercase()).await);
        assert_eq!(manager.model_state(QWEN).await, CacheState::Cached);
        assert_eq!(manager.model_state(LLAMA_3B).await, CacheState::NotCached);

        let statuses = manager.list_models().await;
        let qwen = statuses.iter().find(|s| s.config.model_id == QWEN).unwrap();
        assert!(qwen.active);
    }

    #[tokio::test]
    async fn test_cache_status_without_storage() {
        let stats = Arc::new(MockStats::default());
        let storage: Arc<dyn ArtifactStorage> = Arc::new(FsArtifactStore::disabled());
        let backend = Arc::new(MockBackend {
            stats,
            storage: storage.clone(),
            broken: Vec::new(),
            gate: None,
        });
        let manager = ModelManager::new(ModelCatalog::builtin(), backend, storage);
        assert!(!manager.check_cache_status(LLAMA_1B).await);
        assert!(manager.evict(LLAMA_1B).await.unwrap());
    }

    #[tokio::test]
    async fn test_evict_refuses_active_model() {
        let fx = fixture(&[]);
        fx.manager.activate(LLAMA_1B).await.unwrap();

        assert!(matches!(
            fx.manager.evict(LLAMA_1B).await,
            Err(LifecycleError::ModelInUse(_))
        ));
        assert!(fx.manager.check_cache_status(LLAMA_1B).await);
    }

    #[tokio::test]
    async fn test_evict_refuses_model_still_loading() {
        let dir = TempDir::new().unwrap();
        let storage: Arc<dyn ArtifactStorage> = Arc::new(FsArtifactStore::new(dir.path()).unwrap());
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(MockBackend {
            stats: Arc::new(MockStats::default()),
            storage: storage.clone(),
            broken: Vec::new(),
            gate: Some(gate.clone()),
        });
        let manager = Arc::new(ModelManager::new(ModelCatalog::builtin(), backend, storage));

        let loading = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.activate(QWEN).await })
        };
        while manager.model_state(QWEN).await != CacheState::Downloading {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            manager.evict(QWEN).await,
            Err(LifecycleError::ModelInUse(_))
        ));

        gate.notify_one();
        loading.await.unwrap().unwrap();
        assert_eq!(manager.active_model().await.as_deref(), Some(QWEN));
        assert!(manager.check_cache_status(QWEN).await);
    }

    #[tokio::test]
    async fn test_evict_all_counts() {
        let fx = fixture(&[]);
        fx.manager.activate(QWEN).await.unwrap();
        fx.manager.activate(LLAMA_3B).await.unwrap();
        fx.manager.activate(LLAMA_1B).await.unwrap();
        // A leftover file from another tool
        fx.storage
            .put(crate::cache::WASM_CACHE, "https://hf.co/mlc-ai/Qwen2.5-1.5B-Instruct-q4f16_1-MLC/lib.wasm", 1)
            .await
            .unwrap();

        let summary = fx.manager.evict_all().await;
        assert_eq!(summary, EvictionSummary { succeeded: 2, failed: 1 });

        assert!(!fx.manager.check_cache_status(QWEN).await);
        assert!(!fx.manager.check_cache_status(LLAMA_3B).await);
        assert!(fx.manager.check_cache_status(LLAMA_1B).await);
        assert!(fx
            .storage
            .resource_names(crate::cache::WASM_CACHE)
            .await
            .unwrap()
            .is_empty());
    }
}
