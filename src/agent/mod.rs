pub mod decoding;
pub mod hosted;
pub mod local;
pub mod remote;
pub mod t5;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{AppConfig, BackendKind};
use crate::errors::GenerationError;
use crate::models::{ConversationHistory, GenerationRequest};

use self::hosted::HostedChatBackend;
use self::local::{LocalModelBackend, ModelCache};
use self::remote::RemoteInferenceBackend;

/// A text-generation capability that the fallback chain can try.
///
/// Implementations must be independently invocable: the only state shared
/// between attempts is read-only (credentials, cached model weights).
#[async_trait]
pub trait Backend: Send + Sync {
    /// Stable identifier used in error records and logs.
    fn id(&self) -> &str;

    /// Upper bound for one `generate` call. `None` for in-process backends.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        history: &ConversationHistory,
    ) -> Result<String, GenerationError>;
}

pub type BackendHandle = Arc<dyn Backend>;

/// Builds the ordered backend chain from configuration. Backends whose
/// required settings are missing are skipped, so the result may be empty.
pub fn build_backend_chain(config: &AppConfig, cache: Arc<ModelCache>) -> Vec<BackendHandle> {
    let mut chain: Vec<BackendHandle> = Vec::new();

    for kind in &config.backend_order {
        match kind {
            BackendKind::Remote => match &config.remote {
                Some(remote) => chain.push(Arc::new(RemoteInferenceBackend::new(remote.clone()))),
                None => warn!("Remote inference backend skipped: REMOTE_INFERENCE_URL or token not set"),
            },
            BackendKind::Hosted => match &config.hosted {
                Some(hosted) => match HostedChatBackend::new(hosted.clone()) {
                    Ok(backend) => chain.push(Arc::new(backend)),
                    Err(e) => warn!("Hosted chat backend skipped: {e}"),
                },
                None => warn!("Hosted chat backend skipped: HOSTED_CHAT_PROVIDER not configured"),
            },
            BackendKind::Local => match &config.local {
                Some(local) => chain.push(Arc::new(LocalModelBackend::new(local.clone(), cache.clone()))),
                None => warn!("Local model backend skipped: LOCAL_MODEL_DIR not set or missing"),
            },
        }
    }

    let ids: Vec<&str> = chain.iter().map(|b| b.id()).collect();
    info!(backends = ?ids, "Backend chain assembled");
    chain
}
