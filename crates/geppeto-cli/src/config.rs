//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use geppeto_ai::models::DEFAULT_MODEL_ID;
use geppeto_ai::providers::openai::{API_KEY_ENV, DEFAULT_BASE_URL};

/// Environment variable overriding the API root
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";

/// Configuration for geppeto
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default model to use
    pub model: Option<String>,
    /// Maximum tokens of a reply
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Replaces the built-in system message
    pub system_message: Option<String>,
    /// API key (alternative to OPENAI_API_KEY)
    pub api_key: Option<String>,
    /// API root of an OpenAI-compatible server
    pub base_url: Option<String>,
    /// Where conversations, personas and knowledge are stored
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub sync: SyncSettings,
}

/// Remote store settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub enabled: bool,
    pub url: Option<String>,
    pub token: Option<String>,
}

/// Effective settings after applying flags, the file, the environment and
/// built-in defaults, in that order
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub system_message: Option<String>,
    pub api_key: Option<String>,
    pub base_url: String,
    pub data_dir: PathBuf,
    pub sync: SyncSettings,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("geppeto")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("GEPPETO_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Default data directory
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("geppeto")
    }

    /// Load config from file. A missing or broken file yields the defaults.
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            model: Some(DEFAULT_MODEL_ID.to_string()),
            ..Default::default()
        };

        default_config.save()?;
        Ok(path)
    }

    /// Resolve against the process environment
    pub fn resolve(&self, cli_model: Option<String>) -> Settings {
        self.resolve_with(cli_model, |name| std::env::var(name).ok())
    }

    pub fn resolve_with(
        &self,
        cli_model: Option<String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Settings {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        Settings {
            model: cli_model
                .or_else(|| self.model.clone())
                .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system_message: self.system_message.clone(),
            api_key: non_empty(self.api_key.clone()).or_else(|| non_empty(env(API_KEY_ENV))),
            base_url: non_empty(self.base_url.clone())
                .or_else(|| non_empty(env(BASE_URL_ENV)))
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            data_dir: self
                .data_dir
                .clone()
                .unwrap_or_else(Self::default_data_dir),
            sync: self.sync.clone(),
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# geppeto configuration file
# Place at ~/.config/geppeto/config.toml (Linux) or set GEPPETO_CONFIG_PATH

# Default model to use
model = "gpt-3.5-turbo"

# Reply length limit and sampling temperature (optional)
# max_tokens = 1000
# temperature = 0.7

# Replace the built-in system message (optional)
# system_message = "You are a helpful assistant."

# API key (optional - OPENAI_API_KEY is used otherwise)
# api_key = "sk-..."

# OpenAI-compatible API root (optional - OPENAI_BASE_URL is used otherwise)
# base_url = "http://localhost:11434/v1"

# Where conversations are stored (optional)
# data_dir = "~/.local/share/geppeto"

# Mirror conversations to a remote store
[sync]
enabled = false
# url = "https://sync.example.com/api"
# token = "..."
"#
}
