//! Configuration module for dropstream
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.
//!
//! # Example
//!
//! ```yaml
//! api:
//!   token: "${DROPBOX_ACCESS_TOKEN}"
//!   timeout_seconds: 300
//! upload:
//!   chunk_size: 125000000
//! logging:
//!   level: "info"
//!   json: false
//! ```

use crate::upload::{UploadLimits, DEFAULT_CHUNK_SIZE, MAX_REQUEST_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with a letter or underscore and contain only
/// uppercase letters, digits, and underscores.
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("MY_VAR", "value");
/// let result = expand_env_vars("prefix-${MY_VAR}-suffix");
/// assert_eq!(result, "prefix-value-suffix");
///
/// let result = expand_env_vars("${MISSING:-default}");
/// assert_eq!(result, "default");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    // Regex to capture ${VAR} or ${VAR:-default}
    let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        // Append the text before the match
        result.push_str(&s[last_match..full_match.start()]);

        // Get value from env, or use default from regex
        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    // Append the rest of the string after the last match
    result.push_str(&s[last_match..]);

    result
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Configuration with defaults everywhere except the access token
    pub fn from_token(token: impl Into<String>) -> Self {
        Self {
            api: ApiConfig::with_token(token),
            upload: UploadConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let token = self.api.token.trim();
        if token.is_empty() {
            return Err(ConfigError::ValidationError(
                "API access token must not be empty".into(),
            ));
        }
        if token.contains("${") {
            return Err(ConfigError::ValidationError(format!(
                "API access token references an unset environment variable: {}",
                token
            )));
        }

        for (name, url) in [
            ("api_url", &self.api.api_url),
            ("content_url", &self.api.content_url),
        ] {
            if !is_valid_http_url(url) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid {} '{}': must start with http:// or https://",
                    name, url
                )));
            }
        }

        if self.api.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.upload.max_request_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_request_size must be greater than zero".into(),
            ));
        }
        if self.upload.chunk_size == 0 || self.upload.chunk_size > self.upload.max_request_size {
            return Err(ConfigError::ValidationError(format!(
                "Invalid chunk_size {}: must be between 1 and max_request_size ({})",
                self.upload.chunk_size, self.upload.max_request_size
            )));
        }
        if self.upload.pipe_buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "pipe_buffer_size must be greater than zero".into(),
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level '{}': must be one of trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        Ok(())
    }
}

/// Remote API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// OAuth2 bearer token. Supports ${VAR} and ${VAR:-default} expansion.
    pub token: String,

    /// Base URL of the RPC endpoints. Default: "https://api.dropboxapi.com"
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Base URL of the content (upload/download) endpoints.
    /// Default: "https://content.dropboxapi.com"
    #[serde(default = "default_content_url")]
    pub content_url: String,

    /// Per-request timeout in seconds. Default: 300
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl ApiConfig {
    /// Default endpoints and timeout with the given token
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_url: default_api_url(),
            content_url: default_content_url(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.dropboxapi.com".to_string()
}

fn default_content_url() -> String {
    "https://content.dropboxapi.com".to_string()
}

fn default_timeout_seconds() -> u64 {
    300
}

/// Upload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Bytes per session request. Default: 125000000
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Largest request the API accepts. Default: 150000000
    #[serde(default = "default_max_request_size")]
    pub max_request_size: u64,

    /// Buffer between a streaming writer and its upload task. Default: 1MB
    #[serde(default = "default_pipe_buffer_size")]
    pub pipe_buffer_size: usize,
}

impl UploadConfig {
    /// Limits handed to the upload strategy selector
    pub fn limits(&self) -> UploadLimits {
        UploadLimits {
            default_chunk_size: self.chunk_size,
            max_request_size: self.max_request_size,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_request_size: default_max_request_size(),
            pipe_buffer_size: default_pipe_buffer_size(),
        }
    }
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_request_size() -> u64 {
    MAX_REQUEST_SIZE
}

fn default_pipe_buffer_size() -> usize {
    1048576 // 1MB
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). Default: "info"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output. Default: false
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
