//! Process configuration read from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use ezbooks_observability::LogFormat;

use crate::ai::SuggestionRunner;
use crate::command_dispatcher::RetryPolicy;

const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl ToString) -> Self {
        ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub dispatch_max_attempts: u32,
    pub dispatch_base_backoff: Duration,
    pub suggestion_max_retries: u32,
    pub suggestion_base_backoff: Duration,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source. Unset or blank keys take their
    /// defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = match get("BIND_ADDR") {
            Some(v) => v
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid("BIND_ADDR", &v, e))?,
            None => SocketAddr::from(([0, 0, 0, 0], 8080)),
        };

        let jwt_secret = get("JWT_SECRET").unwrap_or_else(|| {
            warn!("JWT_SECRET not set; using insecure dev default");
            DEV_JWT_SECRET.to_string()
        });

        let dispatch_max_attempts = parse_u32(get("DISPATCH_MAX_ATTEMPTS"), "DISPATCH_MAX_ATTEMPTS", 3)?;
        if dispatch_max_attempts == 0 {
            return Err(ConfigError::invalid("DISPATCH_MAX_ATTEMPTS", "0", "must be at least 1"));
        }

        let log_format = match get("LOG_FORMAT") {
            Some(v) => v.parse().map_err(|e| ConfigError::invalid("LOG_FORMAT", &v, e))?,
            None => LogFormat::default(),
        };

        Ok(Self {
            bind_addr,
            jwt_secret,
            dispatch_max_attempts,
            dispatch_base_backoff: parse_millis(get("DISPATCH_BASE_BACKOFF_MS"), "DISPATCH_BASE_BACKOFF_MS", 25)?,
            suggestion_max_retries: parse_u32(get("SUGGESTION_MAX_RETRIES"), "SUGGESTION_MAX_RETRIES", 3)?,
            suggestion_base_backoff: parse_millis(
                get("SUGGESTION_BASE_BACKOFF_MS"),
                "SUGGESTION_BASE_BACKOFF_MS",
                100,
            )?,
            log_format,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.dispatch_max_attempts,
            base_backoff: self.dispatch_base_backoff,
        }
    }

    pub fn suggestion_runner(&self) -> SuggestionRunner {
        SuggestionRunner {
            max_retries: self.suggestion_max_retries,
            base_backoff: self.suggestion_base_backoff,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            dispatch_max_attempts: 3,
            dispatch_base_backoff: Duration::from_millis(25),
            suggestion_max_retries: 3,
            suggestion_base_backoff: Duration::from_millis(100),
            log_format: LogFormat::default(),
        }
    }
}

fn parse_u32(value: Option<String>, key: &'static str, default: u32) -> Result<u32, ConfigError> {
    match value {
        Some(v) => v.trim().parse().map_err(|e| ConfigError::invalid(key, &v, e)),
        None => Ok(default),
    }
}

fn parse_millis(value: Option<String>, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
    let ms = match value {
        Some(v) => v.trim().parse().map_err(|e| ConfigError::invalid(key, &v, e))?,
        None => default,
    };
    Ok(Duration::from_millis(ms))
}
