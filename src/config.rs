use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use directories::ProjectDirs;
use anyhow::Result;

use crate::context::{DEFAULT_CONTEXT_PAIRS, DEFAULT_MAX_PAGE_CHARS};
use crate::error::PopupError;
use crate::history::DEFAULT_MAX_HISTORY;

/// Upper bound for `max_history`; history is persisted as one settings value.
pub const MAX_HISTORY_LIMIT: usize = 1000;

pub const DEFAULT_MODEL_ID: &str = "models/gemini-1.5-flash-latest";

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Number of turns kept in history before the oldest is evicted.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Prior turns replayed with every new prompt.
    #[serde(default = "default_context_pairs")]
    pub context_pairs: usize,
    /// Characters of page text included before truncation.
    #[serde(default = "default_max_page_content_length")]
    pub max_page_content_length: usize,
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,
    #[serde(default = "default_model_id")]
    pub default_model_id: String,
    #[serde(default = "default_status_dismiss_ms")]
    pub status_dismiss_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_api_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY
}

fn default_context_pairs() -> usize {
    DEFAULT_CONTEXT_PAIRS
}

fn default_max_page_content_length() -> usize {
    DEFAULT_MAX_PAGE_CHARS
}

fn default_temperature() -> f32 {
    0.7
}

fn default_model_id() -> String {
    DEFAULT_MODEL_ID.to_string()
}

fn default_status_dismiss_ms() -> u64 {
    4000
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_base_url: default_api_base_url(),
            max_history: default_max_history(),
            context_pairs: default_context_pairs(),
            max_page_content_length: default_max_page_content_length(),
            default_temperature: default_temperature(),
            default_model_id: default_model_id(),
            status_dismiss_ms: default_status_dismiss_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Per-user configuration directory, e.g. `~/.config/promptpad` on Linux.
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "promptpad", "promptpad").map(|dirs| dirs.config_dir().to_path_buf())
}

impl Config {
    pub fn load() -> Result<Self> {
        if let Some(config_dir) = config_dir() {
            let config_path = config_dir.join("config.toml");

            if config_path.exists() {
                return Self::load_from(&config_path);
            }
        }

        // Return default if file doesn't exist or directories fails
        Ok(Config::default())
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Reject sizes the popup cannot honour.
    pub fn validate(&self) -> std::result::Result<(), PopupError> {
        if self.max_history == 0 || self.max_history > MAX_HISTORY_LIMIT {
            return Err(PopupError::Config(format!(
                "max_history must be between 1 and {}, got {}",
                MAX_HISTORY_LIMIT, self.max_history
            )));
        }
        if self.context_pairs > self.max_history {
            return Err(PopupError::Config(format!(
                "context_pairs ({}) cannot exceed max_history ({})",
                self.context_pairs, self.max_history
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str("max_history = 4\ncontext_pairs = 2\n").unwrap();
        assert_eq!(config.max_history, 4);
        assert_eq!(config.context_pairs, 2);
        assert_eq!(config.max_page_content_length, 5000);
        assert_eq!(config.default_model_id, DEFAULT_MODEL_ID);
    }

    #[test]
    fn test_oversized_values_are_rejected() {
        let config: Config = toml::from_str("max_history = 9223372036854775807").unwrap();
        assert!(matches!(config.validate(), Err(PopupError::Config(_))));

        let config: Config = toml::from_str("context_pairs = 9223372036854775807").unwrap();
        assert!(matches!(config.validate(), Err(PopupError::Config(_))));

        let config: Config = toml::from_str("max_history = 0").unwrap();
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_empty_file_is_default() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }
}
