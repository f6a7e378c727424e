//! Configuration loading and management for pagelens.
//!
//! Loads settings from `pagelens.toml` with environment variable overrides for
//! sensitive data (API keys come from the environment or a `.env` file).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::normalize::CleaningLevel;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Remote scraping service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    /// Base URL of the scraping service API
    #[serde(default = "default_scrape_base_url")]
    pub base_url: String,
    /// Overall client-side request timeout in seconds
    #[serde(default = "default_scrape_timeout_secs")]
    pub timeout_secs: u64,
}

/// Generative model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    /// Model identifier (e.g., "gemini-2.0-flash")
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum tokens the model may emit
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// How aggressively markdown structure is stripped before summarisation
    #[serde(default)]
    pub cleaning: CleaningLevel,
}

/// API keys configuration (loaded from environment)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApiConfig {
    #[serde(default)]
    pub firecrawl_key: Option<String>,
    #[serde(default)]
    pub gemini_key: Option<String>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the API server
    #[serde(default = "default_bind")]
    pub bind: String,
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub scrape: ScrapeConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from the default location (pagelens.toml in cwd or home),
    /// falling back to defaults when no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::find_config_file() {
            Some(path) => Self::read_from(&path)?,
            None => Config::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self, ConfigError> {
        let mut config = Self::read_from(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn read_from(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Override settings from environment variables
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("FIRECRAWL_API_KEY") {
            self.api.firecrawl_key = Some(key);
        }
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            self.api.gemini_key = Some(key);
        }
        if let Ok(bind) = std::env::var("PAGELENS_BIND") {
            self.server.bind = bind;
        }
    }

    /// Find the config file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        // Check current directory first
        let local_config = PathBuf::from("pagelens.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        // Check home directory
        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".config").join("pagelens").join("pagelens.toml");
            if home_config.exists() {
                return Some(home_config);
            }
        }

        None
    }

    /// Whether the remote scraping service can be used
    pub fn scrape_service_configured(&self) -> bool {
        self.api.firecrawl_key.is_some()
    }
}

fn default_scrape_base_url() -> String {
    "https://api.firecrawl.dev/v1".to_string()
}

fn default_scrape_timeout_secs() -> u64 {
    90
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_max_output_tokens() -> u32 {
    1000
}

fn default_bind() -> String {
    "127.0.0.1:5001".to_string()
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            base_url: default_scrape_base_url(),
            timeout_secs: default_scrape_timeout_secs(),
        }
    }
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_output_tokens: default_max_output_tokens(),
            cleaning: CleaningLevel::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_the_hosted_service() {
        let config = Config::default();
        assert_eq!(config.scrape.base_url, "https://api.firecrawl.dev/v1");
        assert_eq!(config.scrape.timeout_secs, 90);
        assert_eq!(config.summarizer.model, "gemini-2.0-flash");
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            [summarizer]
            model = "gemini-2.5-pro"
            "#,
        )
        .expect("valid config");
        assert_eq!(config.summarizer.model, "gemini-2.5-pro");
        assert_eq!(config.server.bind, "127.0.0.1:5001");
    }

    #[test]
    fn service_configuration_reflects_key_presence() {
        let mut config = Config::default();
        assert!(!config.scrape_service_configured());
        config.api.firecrawl_key = Some("fc-123".to_string());
        assert!(config.scrape_service_configured());
    }
}
