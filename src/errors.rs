use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Top-level application error.
/// All variants carry a human-readable message for display/logging.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    #[error("Field '{field_name}' exceeds max length of {max_length} (actual: {actual_length})")]
    FieldTooLong { field_name: String, max_length: usize, actual_length: usize },

    // ── Session errors ───────────────────────────────────────────────────────
    #[error("Session '{id}' not found")]
    SessionNotFound { id: String },

    // ── Configuration errors ─────────────────────────────────────────────────
    #[error("No generation backend is configured or reachable")]
    NoBackendConfigured,

    #[error("Invalid value '{value}' for {key}")]
    InvalidConfig { key: String, value: String },

    // ── Local model errors ───────────────────────────────────────────────────
    #[error("Failed to load model '{model_id}': {message}")]
    ModelLoad { model_id: String, message: String },

    #[error("Inference error: {message}")]
    InferenceError { message: String },

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn model_load(model_id: impl Into<String>, message: impl fmt::Display) -> Self {
        AppError::ModelLoad { model_id: model_id.into(), message: message.to_string() }
    }

    pub fn inference(message: impl fmt::Display) -> Self {
        AppError::InferenceError { message: message.to_string() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::SessionNotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, AppError::EmptyField { .. } | AppError::FieldTooLong { .. })
    }

    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, AppError::NoBackendConfigured)
    }
}

impl From<candle_core::Error> for AppError {
    fn from(e: candle_core::Error) -> Self {
        AppError::inference(e)
    }
}

/// Why a single backend attempt did not produce usable text.
///
/// None of these is fatal on its own: the fallback chain records the failure
/// and moves on to the next backend.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("backend refused: {0}")]
    Refusal(String),

    #[error("backend returned an empty result")]
    EmptyResult,

    #[error("{0}")]
    Inference(#[from] AppError),
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        GenerationError::Transport(e.to_string())
    }
}

/// A recorded failure of one backend in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendError {
    pub backend_id: String,
    pub message: String,
}

impl BackendError {
    pub fn new(backend_id: impl Into<String>, error: &GenerationError) -> Self {
        Self { backend_id: backend_id.into(), message: error.to_string() }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.backend_id, self.message)
    }
}
