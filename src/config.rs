//! Service configuration and credentials
//!
//! Defaults are embedded from `config.toml`. A user file in the
//! application config directory overrides any section it names.
//! Credentials come from the environment (optionally a `.env` file) and are
//! passed explicitly into the service clients.

use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use zeroize::Zeroize;

const DEFAULT_CONFIG_TOML: &str = include_str!("../config.toml");

/// Environment variable holding the chat service API key
pub(crate) const CHAT_API_KEY_VAR: &str = "GROQ_API_KEY";

/// Environment variable holding the OCR/caption service token
pub(crate) const VISION_API_TOKEN_VAR: &str = "HF_API_TOKEN";

/// Full application configuration
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Config {
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub caption: CaptionConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

/// OCR/vision service settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct OcrConfig {
    pub endpoint: String,
    pub instruction: String,
    /// Per-attempt timeout
    pub timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api-inference.huggingface.co/models/microsoft/Florence-2-large"
                .to_string(),
            instruction: "Extract all of the readable text on this page. Return only the text."
                .to_string(),
            timeout_secs: 60,
            retry: RetryConfig::default(),
        }
    }
}

impl OcrConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retry settings for the OCR service as they appear on disk
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_secs: u64,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_secs: 10,
            retryable_statuses: vec![503],
        }
    }
}

/// Retry policy for the extraction service
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait before retrying after a retryable status or transport error
    pub backoff: Duration,
    pub retryable_statuses: Vec<u16>,
}

impl RetryPolicy {
    /// Whether a status is the "warming up, try again" signal
    pub fn is_retryable(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            // Zero attempts would never issue a request
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_secs(config.backoff_secs),
            retryable_statuses: config.retryable_statuses.clone(),
        }
    }
}

/// Scene caption service settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct CaptionConfig {
    pub endpoint: String,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            endpoint:
                "https://api-inference.huggingface.co/models/Salesforce/blip-image-captioning-base"
                    .to_string(),
        }
    }
}

/// Chat completion service settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct ChatConfig {
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            model: "llama-3.1-8b-instant".to_string(),
            temperature: 0.7,
            max_tokens: 1000,
        }
    }
}

/// Get the user override file path
fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("Pagetalk").join("config.toml"))
}

/// Parse a configuration document and validate its endpoints
pub(crate) fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(contents)?;
    for endpoint in [
        &config.ocr.endpoint,
        &config.caption.endpoint,
        &config.chat.endpoint,
    ] {
        url::Url::parse(endpoint).map_err(|e| ConfigError::InvalidEndpoint {
            endpoint: endpoint.clone(),
            reason: e.to_string(),
        })?;
    }
    Ok(config)
}

/// Load the configuration
///
/// Uses the user override file if present, otherwise the embedded defaults.
pub(crate) fn load_config() -> Result<Config, ConfigError> {
    if let Some(path) = user_config_path().filter(|p| p.exists()) {
        let contents = fs::read_to_string(&path).map_err(|e| ConfigError::Read {
            path: path.clone(),
            source: e,
        })?;
        info!("Loaded configuration from {:?}", path);
        return parse_config(&contents);
    }
    parse_config(DEFAULT_CONFIG_TOML)
}

/// API credentials for the remote services
///
/// Held for the lifetime of the process and cleared from memory on drop.
#[derive(Clone, Default)]
pub(crate) struct Credentials {
    pub chat_api_key: Option<String>,
    pub vision_api_token: Option<String>,
}

impl Credentials {
    /// Read credentials from the environment, loading `.env` first if present
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!("Failed to load .env file: {}", e);
            }
        }
        Self {
            chat_api_key: non_empty_var(CHAT_API_KEY_VAR),
            vision_api_token: non_empty_var(VISION_API_TOKEN_VAR),
        }
    }

    pub fn chat_api_key(&self) -> Option<&str> {
        self.chat_api_key.as_deref()
    }

    pub fn vision_api_token(&self) -> Option<&str> {
        self.vision_api_token.as_deref()
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Credentials")
            .field("chat_api_key", &redact(&self.chat_api_key))
            .field("vision_api_token", &redact(&self.vision_api_token))
            .finish()
    }
}

impl Drop for Credentials {
    fn drop(&mut self) {
        if let Some(key) = self.chat_api_key.as_mut() {
            key.zeroize();
        }
        if let Some(token) = self.vision_api_token.as_mut() {
            token.zeroize();
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}
