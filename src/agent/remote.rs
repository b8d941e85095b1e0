use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::agent::Backend;
use crate::config::RemoteConfig;
use crate::errors::GenerationError;
use crate::models::{ConversationHistory, GenerationRequest};

const BACKEND_ID: &str = "remote-inference";
/// Characters of an unexpected error body kept in the failure message.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Text-generation endpoint reached over HTTPS with a bearer token, in the
/// `{inputs, parameters, options}` request shape used by hosted inference APIs.
pub struct RemoteInferenceBackend {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    timeout: Duration,
}

impl RemoteInferenceBackend {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: config.endpoint,
            token: config.token,
            timeout: config.timeout,
        }
    }

    fn build_body(request: &GenerationRequest) -> Value {
        json!({
            "inputs": request.prompt,
            "parameters": {
                "max_new_tokens": request.max_tokens,
                "temperature": request.temperature,
                "return_full_text": false,
            },
            "options": { "wait_for_model": true },
        })
    }
}

#[async_trait]
impl Backend for RemoteInferenceBackend {
    fn id(&self) -> &str {
        BACKEND_ID
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        _history: &ConversationHistory,
    ) -> Result<String, GenerationError> {
        if self.token.trim().is_empty() {
            return Err(GenerationError::Refusal("missing API token".to_string()));
        }

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .timeout(self.timeout)
            .json(&Self::build_body(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout(self.timeout)
                } else {
                    GenerationError::from(e)
                }
            })?;

        let status = resp.status();
        let body = resp.text().await?;
        debug!(status = status.as_u16(), bytes = body.len(), "Remote inference responded");

        let payload: Value = serde_json::from_str(&body).unwrap_or(Value::String(body.clone()));

        if !status.is_success() {
            return Err(match error_field(&payload) {
                Some(message) => GenerationError::Refusal(message),
                None => GenerationError::HttpStatus {
                    status: status.as_u16(),
                    body: truncate_body(&body),
                },
            });
        }

        extract_generated_text(&payload)
    }
}

fn truncate_body(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((cut, _)) => format!("{}…", &body[..cut]),
        None => body.to_string(),
    }
}

fn error_field(payload: &Value) -> Option<String> {
    let err = payload.as_object()?.get("error")?;
    Some(match err {
        Value::String(s) => s.clone(),
        Value::Object(o) => o
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string()),
        other => other.to_string(),
    })
}

/// Normalizes the many response shapes inference endpoints return.
///
/// A list is reduced to its first element. Objects are searched for
/// `generated_text`, then `text`; anything else present is rendered as a
/// string rather than rejected. Only an `error` field or an empty list fails.
pub fn extract_generated_text(payload: &Value) -> Result<String, GenerationError> {
    if let Some(message) = error_field(payload) {
        return Err(GenerationError::Refusal(message));
    }

    let first = match payload {
        Value::Array(items) => items.first().ok_or(GenerationError::EmptyResult)?,
        other => other,
    };

    Ok(match first {
        Value::String(s) => s.clone(),
        Value::Object(o) => ["generated_text", "text"]
            .iter()
            .find_map(|key| o.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| first.to_string()),
        other => other.to_string(),
    })
}
