use std::time::Duration;

use async_trait::async_trait;
use rig::client::Nothing;
use rig::completion::Chat;
use rig::message::Message as RigMessage;
use rig::prelude::CompletionClient;
use rig::providers::{ollama, openai};
use tracing::error;

use crate::agent::Backend;
use crate::config::{HostedConfig, HostedProvider};
use crate::errors::{AppError, GenerationError};
use crate::models::{ConversationHistory, ConversationTurn, GenerationRequest, Speaker};

/// Builds a rig [`RigMessage`] history list from the conversation transcript.
/// System turns are dropped: the system instruction is set via the preamble.
/// Error reports recorded in place of an answer are dropped too.
fn to_rig_history(turns: &[ConversationTurn]) -> Vec<RigMessage> {
    turns
        .iter()
        .filter(|t| !t.is_failure())
        .filter_map(|t| match t.role() {
            Speaker::User => Some(RigMessage::user(t.text())),
            Speaker::Assistant => Some(RigMessage::assistant(t.text())),
            Speaker::System => None,
        })
        .collect()
}

#[derive(Clone)]
enum HostedClient {
    OpenAi(openai::Client),
    Ollama(ollama::Client),
}

/// Multi-turn chat API reached through rig. An agent is built per request and
/// the whole history is replayed, so the backend keeps no session object of
/// its own: clearing the history resets it.
#[derive(Clone)]
pub struct HostedChatBackend {
    id: String,
    client: HostedClient,
    model: String,
    system_prompt: String,
    timeout: Duration,
}

impl HostedChatBackend {
    pub fn new(config: HostedConfig) -> Result<Self, AppError> {
        let client = match config.provider {
            HostedProvider::OpenAi => {
                let api_key = config.api_key.as_deref().unwrap_or_default();
                let builder = openai::Client::builder().api_key(api_key);
                let builder = match config.base_url.as_deref() {
                    Some(url) => builder.base_url(url),
                    None => builder,
                };
                HostedClient::OpenAi(
                    builder
                        .build()
                        .map_err(|e| AppError::Unexpected(format!("OpenAI client: {e}")))?,
                )
            }
            HostedProvider::Ollama => {
                let base_url = config.base_url.as_deref().unwrap_or("http://localhost:11434");
                HostedClient::Ollama(
                    ollama::Client::builder()
                        .api_key(Nothing)
                        .base_url(base_url)
                        .build()
                        .map_err(|e| AppError::Unexpected(format!("Ollama client: {e}")))?,
                )
            }
        };

        let id = match config.provider {
            HostedProvider::OpenAi => format!("hosted-openai:{}", config.model),
            HostedProvider::Ollama => format!("hosted-ollama:{}", config.model),
        };

        Ok(Self {
            id,
            client,
            model: config.model,
            system_prompt: config.system_prompt,
            timeout: config.timeout,
        })
    }
}

#[async_trait]
impl Backend for HostedChatBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        history: &ConversationHistory,
    ) -> Result<String, GenerationError> {
        let rig_history = to_rig_history(history.turns());
        let max_tokens = request.max_tokens as u64;

        let reply = match &self.client {
            HostedClient::OpenAi(client) => {
                client
                    .agent(&self.model)
                    .preamble(&self.system_prompt)
                    .temperature(request.temperature)
                    .max_tokens(max_tokens)
                    .build()
                    .chat(request.prompt.as_str(), rig_history)
                    .await
            }
            HostedClient::Ollama(client) => {
                client
                    .agent(&self.model)
                    .preamble(&self.system_prompt)
                    .temperature(request.temperature)
                    .max_tokens(max_tokens)
                    .build()
                    .chat(request.prompt.as_str(), rig_history)
                    .await
            }
        };

        reply.map_err(|e| {
            error!("Hosted chat call to {} failed: {e}", self.id);
            let msg = e.to_string();
            if msg.contains("Connection refused") || msg.contains("connect") {
                GenerationError::Transport(msg)
            } else {
                GenerationError::Refusal(msg)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_replay_skips_system_turns() {
        let mut history = ConversationHistory::new();
        history.push(ConversationTurn::new(Speaker::System, "be brief").unwrap());
        history.push(ConversationTurn::new(Speaker::User, "hi").unwrap());
        history.push(ConversationTurn::new(Speaker::Assistant, "hello").unwrap());

        assert_eq!(to_rig_history(history.turns()).len(), 2);
    }

    #[test]
    fn history_replay_skips_error_reports() {
        let mut history = ConversationHistory::new();
        history.push(ConversationTurn::new(Speaker::User, "hi").unwrap());
        history.push(ConversationTurn::failure("⚠️ Error: [remote] down").unwrap());
        history.push(ConversationTurn::new(Speaker::User, "hi again").unwrap());
        history.push(ConversationTurn::new(Speaker::Assistant, "hello").unwrap());

        let replay = to_rig_history(history.turns());
        assert_eq!(replay.len(), 3);
        assert_eq!(replay[1], RigMessage::user("hi again"));
    }

    #[test]
    fn backend_id_names_provider_and_model() {
        let backend = HostedChatBackend::new(HostedConfig {
            provider: HostedProvider::Ollama,
            model: "llama3.2".to_string(),
            api_key: None,
            base_url: None,
            system_prompt: "sys".to_string(),
            timeout: Duration::from_secs(3),
        })
        .unwrap();
        assert_eq!(backend.id(), "hosted-ollama:llama3.2");
        assert_eq!(backend.timeout(), Some(Duration::from_secs(3)));
    }
}
