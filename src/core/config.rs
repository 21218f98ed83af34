//! Application configuration from environment variables.
//!
//! Load configuration using `Config::from_env()` after calling `dotenvy::dotenv()`.

use std::path::PathBuf;
use std::time::Duration;

use crate::core::emitter::DEFAULT_SCHEMA_NAME;
use crate::core::generation::DEFAULT_GENERATION_TIMEOUT;

/// Default chat-completions endpoint (OpenRouter compatible)
pub const DEFAULT_API_BASE: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model used by the generation service
pub const DEFAULT_MODEL: &str = "google/gemini-2.5-flash-lite";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres schema the emitted SQL creates tables in
    pub schema_name: String,

    /// Upper bound for a single generation call, in seconds
    pub generation_timeout_secs: u64,

    /// Chat-completions endpoint of the generation service
    pub api_base: String,

    /// Bearer token for the generation service
    pub api_token: Option<String>,

    /// Model identifier (e.g., "openai/gpt-4o")
    pub model: String,

    /// Directory for the file-backed schema store
    pub store_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Call `dotenvy::dotenv()` before this to load from `.env` file.
    pub fn from_env() -> Self {
        Self {
            schema_name: std::env::var("SCHEMA_NAME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SCHEMA_NAME.to_string()),
            generation_timeout_secs: std::env::var("GENERATION_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_GENERATION_TIMEOUT.as_secs()),
            api_base: std::env::var("OPENAPI_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            api_token: std::env::var("OPENAPI_TOKEN").ok(),
            model: std::env::var("DEFAULT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            store_dir: std::env::var("SCHEMA_STORE_DIR").ok().map(PathBuf::from),
        }
    }

    /// Check if a generation service can be called
    pub fn has_generation(&self) -> bool {
        self.api_token.as_ref().is_some_and(|t| !t.is_empty())
    }

    /// Check if a file store directory is configured
    pub fn has_store(&self) -> bool {
        self.store_dir.is_some()
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // Config Struct Tests (no env var dependencies - thread safe)
    // ========================================================================

    fn config() -> Config {
        Config {
            schema_name: "public".to_string(),
            generation_timeout_secs: 30,
            api_base: DEFAULT_API_BASE.to_string(),
            api_token: None,
            model: DEFAULT_MODEL.to_string(),
            store_dir: None,
        }
    }

    #[test]
    fn test_has_generation() {
        let config_with = Config {
            api_token: Some("sk-test".to_string()),
            ..config()
        };
        let config_empty = Config {
            api_token: Some(String::new()),
            ..config()
        };

        assert!(config_with.has_generation());
        assert!(!config_empty.has_generation());
        assert!(!config().has_generation());
    }

    #[test]
    fn test_has_store() {
        let config_with = Config {
            store_dir: Some(PathBuf::from("/tmp/schemas")),
            ..config()
        };

        assert!(config_with.has_store());
        assert!(!config().has_store());
    }

    #[test]
    fn test_generation_timeout() {
        let config = Config {
            generation_timeout_secs: 5,
            ..config()
        };

        assert_eq!(config.generation_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_config_from_env_returns_config() {
        // Actual values depend on environment, so we don't assert specific values
        let config = Config::from_env();

        assert!(!config.schema_name.is_empty());
        assert!(!config.api_base.is_empty());
        let _ = config.has_generation();
    }

    #[test]
    fn test_config_debug() {
        let config = Config {
            store_dir: Some(PathBuf::from("/var/lib/schemas")),
            ..config()
        };

        let debug_str = format!("{:?}", config);

        assert!(debug_str.contains("Config"));
        assert!(debug_str.contains("schema_name"));
        assert!(debug_str.contains("/var/lib/schemas"));
    }
}
