use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const TOKEN_ENV: &str = "HUGGINGFACE_API_KEY";
pub const API_BASE_ENV: &str = "PIXELFORGE_API_BASE";
pub const TEXT_MODEL_ENV: &str = "PIXELFORGE_TEXT_MODEL";
pub const TIMEOUT_ENV: &str = "PIXELFORGE_TIMEOUT_SECS";
pub const HISTORY_FILE_ENV: &str = "PIXELFORGE_HISTORY_FILE";

pub const DEFAULT_API_BASE: &str = "https://router.huggingface.co/hf-inference/models";
pub const DEFAULT_TEXT_MODEL: &str = "black-forest-labs/FLUX.1-schnell";
pub const DEFAULT_HISTORY_FILE: &str = "generation_history.json";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const TOKEN_PREFIX: &str = "hf_";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("API key not found: set HUGGINGFACE_API_KEY in the environment or a .env file (tokens start with 'hf_')")]
    MissingToken,
    #[error("invalid API key format: Hugging Face tokens start with 'hf_' (got {preview})")]
    MalformedToken { preview: String },
}

/// Credential passed through to the inference API as a bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if !trimmed.starts_with(TOKEN_PREFIX) {
            return Err(ConfigError::MalformedToken {
                preview: preview_secret(trimmed),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiToken({})", preview_secret(&self.0))
    }
}

impl fmt::Display for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&preview_secret(&self.0))
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub token: ApiToken,
    pub api_base: String,
    pub text_model: String,
    pub timeout: Duration,
    pub history_file: PathBuf,
}

impl SessionConfig {
    /// Loads `.env` when present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = ApiToken::parse(&lookup(TOKEN_ENV).unwrap_or_default())?;
        let config = Self {
            token,
            api_base: non_empty(lookup(API_BASE_ENV))
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            text_model: non_empty(lookup(TEXT_MODEL_ENV))
                .unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string()),
            timeout: Duration::from_secs(
                non_empty(lookup(TIMEOUT_ENV))
                    .and_then(|value| value.parse::<u64>().ok())
                    .unwrap_or(DEFAULT_TIMEOUT_SECS)
                    .clamp(10, 600),
            ),
            history_file: history_file_from_lookup(&lookup),
        };
        config.log_redacted();
        Ok(config)
    }

    fn log_redacted(&self) {
        tracing::info!(
            token = %self.token,
            api_base = %self.api_base,
            model = %self.text_model,
            timeout_s = self.timeout.as_secs(),
            history = %self.history_file.display(),
            "session config loaded"
        );
    }
}

/// History location without requiring a credential; read-only commands use it.
pub fn history_file_from_env() -> PathBuf {
    dotenvy::dotenv().ok();
    history_file_from_lookup(&|key: &str| std::env::var(key).ok())
}

fn history_file_from_lookup<F>(lookup: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup(HISTORY_FILE_ENV))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_HISTORY_FILE))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn preview_secret(value: &str) -> String {
    let shown: String = value.chars().take(5).collect();
    format!("{shown}...({} chars)", value.chars().count())
}
