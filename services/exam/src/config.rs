//! Service configuration.
//!
//! Loads everything from environment variables (with `.env` support for
//! local development) into a single struct handed to the rest of the
//! binary.

use std::env;
use tracing::Level;

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub log_level: Level,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `OPENROUTER_API_KEY`: Your secret key for the OpenRouter API. Required.
    // *   `OPENROUTER_BASE_URL`: (Optional) API base URL. Defaults to "https://openrouter.ai/api/v1".
    // *   `LLM_MODEL`: (Optional) The chat model driving the examiner. Defaults to "openai/gpt-4o".
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. Ignored if not present.
        dotenvy::dotenv().ok();

        let api_key = env::var("OPENROUTER_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENROUTER_API_KEY".to_string()))?;

        let base_url = env::var("OPENROUTER_BASE_URL")
            .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string());

        let model = env::var("LLM_MODEL").unwrap_or_else(|_| "openai/gpt-4o".to_string());

        let log_level_str = env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            api_key,
            base_url,
            model,
            log_level,
        })
    }
}
