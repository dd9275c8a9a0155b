use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_path: PathBuf,

    // Text engine
    pub text_engine_url: String,
    pub ai_retry_attempts: u32,
    pub ai_retry_delay: Duration,

    // CMS clients
    pub http_timeout: Duration,

    // Schedulers
    pub publish_enabled: bool,
    pub comment_enabled: bool,
    pub intro_length: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_path: PathBuf::from(env_or_default(
                "DATABASE_PATH",
                "./data/distributor.sqlite",
            )),

            text_engine_url: required_env("TEXT_ENGINE_URL")?,
            ai_retry_attempts: parse_env_u32("AI_RETRY_ATTEMPTS", 3)?,
            ai_retry_delay: Duration::from_secs(parse_env_u64("AI_RETRY_DELAY_SECS", 5)?),

            http_timeout: Duration::from_secs(parse_env_u64("HTTP_TIMEOUT_SECS", 30)?),

            publish_enabled: parse_env_bool("PUBLISH_ENABLED", true)?,
            comment_enabled: parse_env_bool("COMMENT_ENABLED", true)?,
            intro_length: parse_env_usize("INTRO_LENGTH", 200)?,
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.text_engine_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "TEXT_ENGINE_URL".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if url::Url::parse(&self.text_engine_url).is_err() {
            return Err(ConfigError::InvalidValue {
                name: "TEXT_ENGINE_URL".to_string(),
                message: format!("not a valid URL: '{}'", self.text_engine_url),
            });
        }
        if self.ai_retry_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "AI_RETRY_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.intro_length == 0 {
            return Err(ConfigError::InvalidValue {
                name: "INTRO_LENGTH".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Configuration with harmless defaults for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            database_path: PathBuf::from(":memory:"),
            text_engine_url: "http://127.0.0.1:9/".to_string(),
            ai_retry_attempts: 1,
            ai_retry_delay: Duration::from_millis(1),
            http_timeout: Duration::from_secs(5),
            publish_enabled: true,
            comment_enabled: true,
            intro_length: 200,
        }
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}
