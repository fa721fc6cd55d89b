//! Configuration loading, validation, and management for ChatRelay.
//!
//! Loads configuration from `~/.chatrelay/config.toml` with environment
//! variable overrides. Validates all settings at startup.
//!
//! Per-request generation settings live in [`generation`]: the file only
//! supplies defaults, and every chat request resolves its own
//! [`GenerationConfig`] from them.

pub mod generation;

pub use generation::{ChatSettings, GenerationConfig, GenerationDefaults};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.chatrelay/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Inference backend connection
    #[serde(default)]
    pub backend: BackendConfig,

    /// HTTP gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// History and knowledge directories
    #[serde(default)]
    pub storage: StorageConfig,

    /// Defaults for per-request generation settings
    #[serde(default)]
    pub generation: GenerationDefaults,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which wire protocol the inference backend speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Ollama's native `/api/chat` NDJSON stream
    #[default]
    Ollama,
    /// Any `/v1/chat/completions` server streaming SSE
    #[serde(rename = "openai_compat")]
    OpenAiCompat,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    /// Base URL; defaults depend on `kind`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Bearer token for OpenAI-compatible servers that require one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Whole-request timeout for non-streaming calls
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    120
}

impl BackendConfig {
    /// The configured base URL, or the well-known local default for `kind`.
    pub fn resolved_base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.clone(),
            None => match self.kind {
                BackendKind::Ollama => "http://localhost:11434".into(),
                BackendKind::OpenAiCompat => "http://localhost:8000/v1".into(),
            },
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            base_url: None,
            api_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Longest wait for the next upstream chunk before a session fails
    #[serde(default = "default_chunk_timeout")]
    pub chunk_timeout_secs: u64,

    /// Origins allowed by CORS. Empty = same-origin only.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_port() -> u16 {
    91
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_chunk_timeout() -> u64 {
    300
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            chunk_timeout_secs: default_chunk_timeout(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one `<YYYYMMDD>.txt` history log per day
    #[serde(default = "default_history_dir")]
    pub history_dir: PathBuf,

    /// Directory scanned for `.txt` knowledge files
    #[serde(default = "default_knowledge_dir")]
    pub knowledge_dir: PathBuf,
}

fn default_history_dir() -> PathBuf {
    PathBuf::from("chatlist")
}
fn default_knowledge_dir() -> PathBuf {
    PathBuf::from("listku").join("processed_listku")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            history_dir: default_history_dir(),
            knowledge_dir: default_knowledge_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs (without ANSI colours) to this file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.chatrelay/config.toml),
    /// then apply environment overrides:
    /// - `CHATRELAY_MODEL`
    /// - `CHATRELAY_BACKEND_URL`
    /// - `CHATRELAY_HISTORY_DIR`
    /// - `CHATRELAY_KNOWLEDGE_DIR`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Overlay the `CHATRELAY_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(model) = std::env::var("CHATRELAY_MODEL") {
            self.generation.model_name = model;
        }
        if let Ok(url) = std::env::var("CHATRELAY_BACKEND_URL") {
            self.backend.base_url = Some(url);
        }
        if let Ok(dir) = std::env::var("CHATRELAY_HISTORY_DIR") {
            self.storage.history_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("CHATRELAY_KNOWLEDGE_DIR") {
            self.storage.knowledge_dir = PathBuf::from(dir);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chatrelay")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation.model_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "generation.model_name must not be empty".into(),
            ));
        }

        if self.gateway.chunk_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "gateway.chunk_timeout_secs must be > 0".into(),
            ));
        }

        if self.backend.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "backend.request_timeout_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Serialize the effective configuration as TOML.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        Self::default().to_toml()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
