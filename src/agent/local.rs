//! In-process model backend and the process-wide cache of loaded models.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};

use crate::agent::t5::T5Loader;
use crate::agent::Backend;
use crate::config::LocalConfig;
use crate::errors::{AppError, GenerationError};
use crate::models::{ConversationHistory, DecodingConfig, GenerationRequest};

/// A loaded model that can turn a prompt into text. Calls are blocking and
/// must not mutate shared state: the same instance serves every request.
pub trait LocalGenerator: Send + Sync {
    fn generate(&self, prompt: &str, decoding: &DecodingConfig) -> Result<String, AppError>;
}

/// Loads model weights for a model identifier. Blocking and expensive.
pub trait ModelLoader: Send + Sync {
    fn load(&self, model_id: &str, model_dir: &Path) -> Result<Arc<dyn LocalGenerator>, AppError>;
}

type ModelSlot = Arc<OnceCell<Arc<dyn LocalGenerator>>>;

static GLOBAL_CACHE: LazyLock<Arc<ModelCache>> =
    LazyLock::new(|| Arc::new(ModelCache::new(Arc::new(T5Loader))));

/// Registry that ensures each model is loaded once and then shared.
///
/// Concurrent first-use callers for the same model id wait on one load. A
/// load that fails leaves the slot empty, so a later request retries it.
/// Loaded models live until process exit.
pub struct ModelCache {
    loader: Arc<dyn ModelLoader>,
    slots: RwLock<HashMap<String, ModelSlot>>,
}

impl ModelCache {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self { loader, slots: RwLock::new(HashMap::new()) }
    }

    /// The cache shared by the whole process.
    pub fn global() -> Arc<ModelCache> {
        GLOBAL_CACHE.clone()
    }

    pub async fn get_or_load(
        &self,
        model_id: &str,
        model_dir: &Path,
    ) -> Result<Arc<dyn LocalGenerator>, AppError> {
        let slot = {
            let mut guard = self.slots.write().await;
            guard
                .entry(model_id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let model = slot
            .get_or_try_init({
                let loader = self.loader.clone();
                let model_id = model_id.to_string();
                let model_dir = model_dir.to_path_buf();
                move || async move {
                    info!("Loading local model {model_id} from {model_dir:?}");
                    let id = model_id.clone();
                    tokio::task::spawn_blocking(move || loader.load(&model_id, &model_dir))
                        .await
                        .map_err(|e| AppError::model_load(id, e))?
                }
            })
            .await?;

        Ok(model.clone())
    }

    pub async fn is_loaded(&self, model_id: &str) -> bool {
        self.slots
            .read()
            .await
            .get(model_id)
            .is_some_and(|slot| slot.initialized())
    }
}

/// Sequence-to-sequence model running inside this process.
pub struct LocalModelBackend {
    id: String,
    model_id: String,
    model_dir: PathBuf,
    decoding: DecodingConfig,
    cache: Arc<ModelCache>,
}

impl LocalModelBackend {
    pub fn new(config: LocalConfig, cache: Arc<ModelCache>) -> Self {
        Self {
            id: format!("local:{}", config.model_id),
            model_id: config.model_id,
            model_dir: config.model_dir,
            decoding: config.decoding,
            cache,
        }
    }
}

#[async_trait]
impl Backend for LocalModelBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        _history: &ConversationHistory,
    ) -> Result<String, GenerationError> {
        let model = self.cache.get_or_load(&self.model_id, &self.model_dir).await?;

        let decoding = DecodingConfig {
            max_new_tokens: request.max_tokens,
            temperature: request.temperature,
            ..self.decoding.clone()
        };
        let prompt = request.prompt.clone();
        debug!(model = %self.model_id, ?decoding, "Running local generation");

        let text = tokio::task::spawn_blocking(move || model.generate(&prompt, &decoding))
            .await
            .map_err(AppError::inference)??;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    struct Echo;

    impl LocalGenerator for Echo {
        fn generate(&self, prompt: &str, decoding: &DecodingConfig) -> Result<String, AppError> {
            Ok(format!("{prompt} ({} tokens)", decoding.max_new_tokens))
        }
    }

    /// Counts loads and sleeps long enough for callers to overlap.
    struct CountingLoader {
        loads: AtomicUsize,
        fail_first: bool,
    }

    impl ModelLoader for CountingLoader {
        fn load(&self, model_id: &str, _dir: &Path) -> Result<Arc<dyn LocalGenerator>, AppError> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            if self.fail_first && n == 0 {
                return Err(AppError::model_load(model_id, "weights missing"));
            }
            Ok(Arc::new(Echo))
        }
    }

    fn cache(fail_first: bool) -> (Arc<CountingLoader>, Arc<ModelCache>) {
        let loader = Arc::new(CountingLoader { loads: AtomicUsize::new(0), fail_first });
        let cache = Arc::new(ModelCache::new(loader.clone()));
        (loader, cache)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_use_loads_once() {
        let (loader, cache) = cache(false);

        let a = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get_or_load("flan", Path::new("/models/flan")).await }
        });
        let b = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get_or_load("flan", Path::new("/models/flan")).await }
        });

        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(cache.is_loaded("flan").await);

        cache.get_or_load("flan", Path::new("/models/flan")).await.unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_model_ids_load_separately() {
        let (loader, cache) = cache(false);
        cache.get_or_load("small", Path::new("/m/small")).await.unwrap();
        cache.get_or_load("base", Path::new("/m/base")).await.unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_load_is_retried() {
        let (loader, cache) = cache(true);
        assert!(cache.get_or_load("flan", Path::new("/m")).await.is_err());
        assert!(!cache.is_loaded("flan").await);
        assert!(cache.get_or_load("flan", Path::new("/m")).await.is_ok());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn backend_generates_through_the_cache() {
        let (_, cache) = cache(false);
        let backend = LocalModelBackend::new(
            LocalConfig {
                model_id: "flan".to_string(),
                model_dir: PathBuf::from("/m"),
                decoding: DecodingConfig::default(),
            },
            cache,
        );
        let request = GenerationRequest::new("hello", 16, 0.0, vec![]);
        let text = backend.generate(&request, &ConversationHistory::new()).await.unwrap();
        assert_eq!(text, "hello (16 tokens)");
        assert_eq!(backend.id(), "local:flan");
        assert!(backend.timeout().is_none());
    }

    #[tokio::test]
    async fn load_failure_surfaces_as_generation_error() {
        let (_, cache) = cache(true);
        let backend = LocalModelBackend::new(
            LocalConfig {
                model_id: "flan".to_string(),
                model_dir: PathBuf::from("/m"),
                decoding: DecodingConfig::default(),
            },
            cache,
        );
        let request = GenerationRequest::new("hello", 16, 0.0, vec![]);
        let err = backend.generate(&request, &ConversationHistory::new()).await.unwrap_err();
        assert!(err.to_string().contains("weights missing"));
    }
}
