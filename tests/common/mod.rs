#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use response_resolver::agent::{Backend, BackendHandle};
use response_resolver::errors::GenerationError;
use response_resolver::models::{ConversationHistory, GenerationRequest};

pub enum Behavior {
    Reply(&'static str),
    Fail(&'static str),
    Hang,
    /// Replies with the number of turns it was shown.
    CountHistory,
}

/// Scripted backend that records how often it was called.
pub struct MockBackend {
    id: String,
    behavior: Behavior,
    timeout: Option<Duration>,
    calls: AtomicUsize,
}

impl MockBackend {
    pub fn new(id: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self { id: id.to_string(), behavior, timeout: None, calls: AtomicUsize::new(0) })
    }

    pub fn with_timeout(id: &str, behavior: Behavior, timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            behavior,
            timeout: Some(timeout),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn generate(
        &self,
        _request: &GenerationRequest,
        history: &ConversationHistory,
    ) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Reply(text) => Ok(text.to_string()),
            Behavior::Fail(message) => Err(GenerationError::Transport(message.to_string())),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok("too late".to_string())
            }
            Behavior::CountHistory => Ok(format!("saw {} turns", history.len())),
        }
    }
}

pub fn chain(backends: &[&Arc<MockBackend>]) -> Vec<BackendHandle> {
    backends.iter().map(|b| (*b).clone() as BackendHandle).collect()
}
