use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::AppError;
use crate::models::DecodingConfig;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_TOKENS: usize = 128;
const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_MESSAGE_LENGTH: usize = 8000;
const DEFAULT_SESSION_IDLE_SECS: u64 = 3600;
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_LOCAL_MODEL_ID: &str = "google/flan-t5-base";
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. \
                                     Be concise, accurate, and friendly. \
                                     If you don't know something, say so.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Remote,
    Hosted,
    Local,
}

impl FromStr for BackendKind {
    type Err = AppError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "remote" => Ok(BackendKind::Remote),
            "hosted" => Ok(BackendKind::Hosted),
            "local" => Ok(BackendKind::Local),
            other => Err(AppError::InvalidConfig {
                key: "BACKEND_ORDER".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostedProvider {
    OpenAi,
    Ollama,
}

impl FromStr for HostedProvider {
    type Err = AppError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(HostedProvider::OpenAi),
            "ollama" => Ok(HostedProvider::Ollama),
            other => Err(AppError::InvalidConfig {
                key: "HOSTED_CHAT_PROVIDER".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub token: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct HostedConfig {
    pub provider: HostedProvider,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub system_prompt: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LocalConfig {
    pub model_id: String,
    pub model_dir: PathBuf,
    pub decoding: DecodingConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub max_tokens: usize,
    pub temperature: f64,
    pub max_message_length: usize,
    /// Sessions untouched for this long are dropped.
    pub session_idle_timeout: Duration,
    pub backend_order: Vec<BackendKind>,
    pub remote: Option<RemoteConfig>,
    pub hosted: Option<HostedConfig>,
    pub local: Option<LocalConfig>,
}

impl AppConfig {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`, which returns the raw value of a
    /// variable if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let backend_order = match var("BACKEND_ORDER") {
            Some(raw) => raw.split(',').map(str::parse).collect::<Result<Vec<_>, _>>()?,
            None => vec![BackendKind::Remote, BackendKind::Hosted, BackendKind::Local],
        };

        // ── Remote inference endpoint (needs both URL and credential) ─────────
        let remote = match (var("REMOTE_INFERENCE_URL"), var("REMOTE_INFERENCE_TOKEN")) {
            (Some(endpoint), Some(token)) => Some(RemoteConfig {
                endpoint,
                token,
                timeout: Duration::from_secs(parse_or(
                    &var,
                    "REMOTE_TIMEOUT_SECS",
                    DEFAULT_TIMEOUT_SECS,
                )?),
            }),
            _ => None,
        };

        // ── Hosted chat API ───────────────────────────────────────────────────
        let hosted = match var("HOSTED_CHAT_PROVIDER") {
            Some(raw) => {
                let provider: HostedProvider = raw.parse()?;
                let api_key = var("HOSTED_CHAT_API_KEY");
                if provider == HostedProvider::OpenAi && api_key.is_none() {
                    None
                } else {
                    let default_model = match provider {
                        HostedProvider::OpenAi => "gpt-4o-mini",
                        HostedProvider::Ollama => "llama3.2",
                    };
                    let base_url = var("HOSTED_CHAT_BASE_URL").or_else(|| match provider {
                        HostedProvider::Ollama => Some(DEFAULT_OLLAMA_URL.to_string()),
                        HostedProvider::OpenAi => None,
                    });
                    Some(HostedConfig {
                        provider,
                        model: var("HOSTED_CHAT_MODEL").unwrap_or_else(|| default_model.to_string()),
                        api_key,
                        base_url,
                        system_prompt: var("SYSTEM_PROMPT")
                            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
                        timeout: Duration::from_secs(parse_or(
                            &var,
                            "HOSTED_TIMEOUT_SECS",
                            DEFAULT_TIMEOUT_SECS,
                        )?),
                    })
                }
            }
            None => None,
        };

        // ── Local in-process model ────────────────────────────────────────────
        let max_tokens = parse_or(&var, "GEN_MAX_TOKENS", DEFAULT_MAX_TOKENS)?;
        let local = match var("LOCAL_MODEL_DIR").map(PathBuf::from) {
            Some(model_dir) if model_dir.is_dir() => {
                let defaults = DecodingConfig::default();
                Some(LocalConfig {
                    model_id: var("LOCAL_MODEL_ID").unwrap_or_else(|| DEFAULT_LOCAL_MODEL_ID.to_string()),
                    model_dir,
                    decoding: DecodingConfig {
                        max_new_tokens: max_tokens,
                        do_sample: parse_or(&var, "LOCAL_DO_SAMPLE", defaults.do_sample)?,
                        num_beams: parse_or(&var, "LOCAL_NUM_BEAMS", defaults.num_beams)?.max(1),
                        no_repeat_ngram_size: parse_or(
                            &var,
                            "LOCAL_NO_REPEAT_NGRAM_SIZE",
                            defaults.no_repeat_ngram_size,
                        )?,
                        repetition_penalty: parse_or(
                            &var,
                            "LOCAL_REPETITION_PENALTY",
                            defaults.repetition_penalty,
                        )?,
                        ..defaults
                    },
                })
            }
            _ => None,
        };

        Ok(Self {
            port: parse_or(&var, "PORT", DEFAULT_PORT)?,
            max_tokens,
            temperature: parse_or(&var, "GEN_TEMPERATURE", DEFAULT_TEMPERATURE)?,
            max_message_length: parse_or(&var, "MAX_MESSAGE_LENGTH", DEFAULT_MAX_MESSAGE_LENGTH)?,
            session_idle_timeout: Duration::from_secs(
                parse_or(&var, "SESSION_IDLE_SECS", DEFAULT_SESSION_IDLE_SECS)?.max(1),
            ),
            backend_order,
            remote,
            hosted,
            local,
        })
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw.parse().map_err(|_| AppError::InvalidConfig {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, AppError> {
        let env: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_leave_every_backend_unconfigured() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_tokens, 128);
        assert_eq!(config.session_idle_timeout, Duration::from_secs(3600));
        assert_eq!(
            config.backend_order,
            vec![BackendKind::Remote, BackendKind::Hosted, BackendKind::Local]
        );
        assert!(config.remote.is_none());
        assert!(config.hosted.is_none());
        assert!(config.local.is_none());
    }

    #[test]
    fn remote_requires_a_credential() {
        let config = config_from(&[("REMOTE_INFERENCE_URL", "https://example.test/models/x")]).unwrap();
        assert!(config.remote.is_none());

        let config = config_from(&[
            ("REMOTE_INFERENCE_URL", "https://example.test/models/x"),
            ("REMOTE_INFERENCE_TOKEN", "secret"),
            ("REMOTE_TIMEOUT_SECS", "5"),
        ])
        .unwrap();
        let remote = config.remote.unwrap();
        assert_eq!(remote.timeout, Duration::from_secs(5));
    }

    #[test]
    fn openai_without_key_is_skipped_but_ollama_is_not() {
        let config = config_from(&[("HOSTED_CHAT_PROVIDER", "openai")]).unwrap();
        assert!(config.hosted.is_none());

        let config = config_from(&[("HOSTED_CHAT_PROVIDER", "ollama")]).unwrap();
        let hosted = config.hosted.unwrap();
        assert_eq!(hosted.base_url.as_deref(), Some(DEFAULT_OLLAMA_URL));
        assert_eq!(hosted.model, "llama3.2");
    }

    #[test]
    fn custom_backend_order_is_parsed() {
        let config = config_from(&[("BACKEND_ORDER", "local, remote")]).unwrap();
        assert_eq!(config.backend_order, vec![BackendKind::Local, BackendKind::Remote]);
    }

    #[test]
    fn invalid_values_are_reported_with_their_key() {
        let err = config_from(&[("PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, AppError::InvalidConfig { ref key, .. } if key == "PORT"));

        let err = config_from(&[("BACKEND_ORDER", "remote,carrier-pigeon")]).unwrap_err();
        assert!(matches!(err, AppError::InvalidConfig { ref key, .. } if key == "BACKEND_ORDER"));
    }
}
