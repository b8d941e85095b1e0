use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::BackendHandle;
use crate::errors::{AppError, BackendError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
    System,
}

/// One message in a conversation. Fields are private so a turn cannot be
/// edited after it has been appended to a history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationTurn {
    role: Speaker,
    text: String,
    /// Set on assistant turns that report backend failures instead of an answer.
    failed: bool,
    created_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: Speaker, text: impl Into<String>) -> Result<Self, AppError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(AppError::EmptyField { field_name: "text".to_string() });
        }
        Ok(Self { role, text, failed: false, created_at: Utc::now() })
    }

    /// Assistant turn carrying an error report rather than generated text.
    pub fn failure(text: impl Into<String>) -> Result<Self, AppError> {
        Ok(Self { failed: true, ..Self::new(Speaker::Assistant, text)? })
    }

    pub fn role(&self) -> Speaker {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_failure(&self) -> bool {
        self.failed
    }
}

/// Ordered transcript of a session. Append-only until cleared wholesale.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// Decoding policy for in-process generation. Defaults favour beam search
/// with repetition controls, which keeps small seq2seq models from looping.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodingConfig {
    pub max_new_tokens: usize,
    pub do_sample: bool,
    pub num_beams: usize,
    pub no_repeat_ngram_size: usize,
    pub repetition_penalty: f32,
    pub temperature: f64,
    pub seed: u64,
}

impl Default for DecodingConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 128,
            do_sample: false,
            num_beams: 4,
            no_repeat_ngram_size: 3,
            repetition_penalty: 1.2,
            temperature: 1.0,
            seed: 299_792_458,
        }
    }
}

/// Everything needed to produce one assistant reply. Built fresh for each
/// user turn and dropped afterwards.
#[derive(Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: usize,
    pub temperature: f64,
    pub backend_chain: Vec<BackendHandle>,
}

impl GenerationRequest {
    pub fn new(
        prompt: impl Into<String>,
        max_tokens: usize,
        temperature: f64,
        backend_chain: Vec<BackendHandle>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens,
            temperature: temperature.clamp(0.0, 1.0),
            backend_chain,
        }
    }
}

impl fmt::Debug for GenerationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&str> = self.backend_chain.iter().map(|b| b.id()).collect();
        f.debug_struct("GenerationRequest")
            .field("prompt", &self.prompt)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("backend_chain", &ids)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub reply: ConversationTurn,
    pub errors: Vec<BackendError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub turn_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
