use tracing::{debug, info, warn};

use crate::errors::{BackendError, GenerationError};
use crate::models::{ConversationHistory, GenerationRequest};

const ERROR_PREFIX: &str = "⚠️ Error: ";
const ERROR_SEPARATOR: &str = " | ";

/// Outcome of running the fallback chain for one user turn.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Generated text; empty when every backend failed.
    pub text: String,
    /// Failures in the order the backends were tried.
    pub errors: Vec<BackendError>,
}

impl Resolution {
    pub fn is_success(&self) -> bool {
        !self.text.is_empty()
    }

    /// Human-readable message listing why each backend failed.
    pub fn error_summary(&self) -> String {
        let joined = self
            .errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(ERROR_SEPARATOR);
        if joined.is_empty() {
            format!("{ERROR_PREFIX}no backend produced a response")
        } else {
            format!("{ERROR_PREFIX}{joined}")
        }
    }
}

/// Tries each backend of `request.backend_chain` in order and stops at the
/// first non-empty answer. Backends are never raced: at most one successful
/// call is made per turn. Failures are collected, never propagated.
pub async fn resolve(request: &GenerationRequest, history: &ConversationHistory) -> Resolution {
    let mut errors = Vec::new();

    for backend in &request.backend_chain {
        debug!(backend = backend.id(), "Trying backend");

        let attempt = backend.generate(request, history);
        let outcome = match backend.timeout() {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .unwrap_or(Err(GenerationError::Timeout(limit))),
            None => attempt.await,
        };

        let failure = match outcome {
            Ok(text) if !text.trim().is_empty() => {
                info!(backend = backend.id(), failed_before = errors.len(), "Backend answered");
                return Resolution { text, errors };
            }
            Ok(_) => GenerationError::EmptyResult,
            Err(e) => e,
        };

        warn!(backend = backend.id(), error = %failure, "Backend failed, falling back");
        errors.push(BackendError::new(backend.id(), &failure));
    }

    Resolution { text: String::new(), errors }
}
