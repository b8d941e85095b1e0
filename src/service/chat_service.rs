use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::BackendHandle;
use crate::errors::AppError;
use crate::models::{
    ChatRequest, ChatResponse, ConversationTurn, GenerationRequest, SessionSummary, Speaker,
};
use crate::service::fallback;
use crate::service::sanitizer::sanitize;
use crate::store::session_store::{SessionHandle, SessionStore};

#[derive(Debug, Clone)]
pub struct GenerationDefaults {
    pub max_tokens: usize,
    pub temperature: f64,
    pub max_message_length: usize,
}

#[derive(Clone)]
pub struct ChatService {
    sessions: SessionStore,
    chain: Vec<BackendHandle>,
    defaults: GenerationDefaults,
}

impl ChatService {
    pub fn new(sessions: SessionStore, chain: Vec<BackendHandle>, defaults: GenerationDefaults) -> Self {
        Self { sessions, chain, defaults }
    }

    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        self.sessions.summaries().await
    }

    pub async fn get_turns(&self, session_id: &str) -> Result<Vec<ConversationTurn>, AppError> {
        Ok(self.session(session_id).await?.turns().await)
    }

    /// Discards the session's history. Multi-turn backends replay that
    /// history on every call, so this also resets their conversation.
    /// A submission already in flight still records its turns afterwards.
    pub async fn clear(&self, session_id: &str) -> Result<(), AppError> {
        self.session(session_id).await?.clear().await;
        info!("Cleared session {session_id}");
        Ok(())
    }

    /// Runs one user turn: exactly one assistant turn is appended, holding
    /// either the sanitized answer or the combined backend errors.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, AppError> {
        // ── Validation ────────────────────────────────────────────────────────
        if request.message.trim().is_empty() {
            return Err(AppError::EmptyField { field_name: "message".to_string() });
        }
        if request.message.len() > self.defaults.max_message_length {
            return Err(AppError::FieldTooLong {
                field_name: "message".to_string(),
                max_length: self.defaults.max_message_length,
                actual_length: request.message.len(),
            });
        }
        if self.chain.is_empty() {
            return Err(AppError::NoBackendConfigured);
        }

        // ── Resolve or create session ─────────────────────────────────────────
        let session_id = request
            .session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let (session, _turn) = self.sessions.begin_turn(&session_id).await;
        let history = session.history().await;

        let user_turn = ConversationTurn::new(Speaker::User, request.message.clone())?;

        // ── Run the fallback chain (history excludes the new user turn) ───────
        let generation = GenerationRequest::new(
            request.message,
            self.defaults.max_tokens,
            self.defaults.temperature,
            self.chain.clone(),
        );
        let resolution = fallback::resolve(&generation, &history).await;

        let reply = if resolution.is_success() {
            ConversationTurn::new(Speaker::Assistant, sanitize(&resolution.text))?
        } else {
            warn!("All backends failed for session {session_id}");
            ConversationTurn::failure(resolution.error_summary())?
        };

        // ── Record both turns ─────────────────────────────────────────────────
        session.record([user_turn, reply.clone()]).await;

        Ok(ChatResponse { session_id, reply, errors: resolution.errors })
    }

    async fn session(&self, session_id: &str) -> Result<SessionHandle, AppError> {
        self.sessions
            .get(session_id)
            .await
            .ok_or_else(|| AppError::SessionNotFound { id: session_id.to_string() })
    }
}
