use std::time::Duration;

use crate::dispatch::HOST_INFO;
use crate::idle::{DEFAULT_TICK, IdleConfig};
use crate::session::SESSION_STORAGE_KEY;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_API_PREFIX: &str = "/api";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub const ENV_BASE_URL: &str = "HOSTDESK_BASE_URL";
pub const ENV_POLL_INTERVAL_MS: &str = "HOSTDESK_POLL_INTERVAL_MS";
pub const ENV_IDLE_SECS: &str = "HOSTDESK_IDLE_SECS";
pub const ENV_IDLE_WARNING_SECS: &str = "HOSTDESK_IDLE_WARNING_SECS";
pub const ENV_KEEPALIVE_SECS: &str = "HOSTDESK_KEEPALIVE_SECS";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("base url must not be empty")]
    EmptyBaseUrl,
    #[error("base url must use http:// or https:// and include a host")]
    InvalidBaseUrl,
    #[error("`{key}` must be a positive integer, got `{value}`")]
    InvalidNumber { key: &'static str, value: String },
    #[error("keepalive interval must be shorter than the idle timeout")]
    KeepaliveNotShorterThanIdle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Empty for same-origin requests from the browser.
    pub base_url: String,
    pub api_prefix: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub idle: IdleConfig,
    pub idle_tick: Duration,
    pub session_storage_key: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            idle: IdleConfig::default(),
            idle_tick: DEFAULT_TICK,
            session_storage_key: SESSION_STORAGE_KEY.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            ..Self::default()
        })
    }

    /// Requests go to `/api/...` on whatever origin served the page.
    pub fn same_origin() -> Self {
        Self {
            base_url: String::new(),
            ..Self::default()
        }
    }

    /// Reads overrides from `HOSTDESK_*` variables and returns where the base
    /// URL came from.
    pub fn from_env() -> Result<(Self, &'static str), ConfigError> {
        let (base_url, source) = match env_non_empty(ENV_BASE_URL) {
            Some(raw) => (normalize_base_url(&raw)?, ENV_BASE_URL),
            None => (DEFAULT_BASE_URL.to_string(), "default_local"),
        };
        let mut config = Self {
            base_url,
            ..Self::default()
        };
        if let Some(ms) = env_positive(ENV_POLL_INTERVAL_MS)? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env_positive(ENV_IDLE_SECS)? {
            config.idle.idle_after = Duration::from_secs(secs);
        }
        if let Some(secs) = env_positive(ENV_IDLE_WARNING_SECS)? {
            config.idle.warning_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_positive(ENV_KEEPALIVE_SECS)? {
            config.idle.keepalive_interval = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok((config, source))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle.keepalive_interval >= self.idle.idle_after {
            return Err(ConfigError::KeepaliveNotShorterThanIdle);
        }
        Ok(())
    }

    pub fn endpoint(&self, operation: &str) -> String {
        format!(
            "{}{}/{}",
            self.base_url,
            self.api_prefix,
            operation.trim_start_matches('/')
        )
    }

    pub fn host_info_endpoint(&self) -> String {
        self.endpoint(HOST_INFO)
    }
}

pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyBaseUrl);
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ConfigError::InvalidBaseUrl);
    }
    let Some((_, remainder)) = trimmed.split_once("://") else {
        return Err(ConfigError::InvalidBaseUrl);
    };
    if remainder.trim().is_empty() || remainder.starts_with('/') {
        return Err(ConfigError::InvalidBaseUrl);
    }
    Ok(trimmed.to_string())
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_positive(key: &'static str) -> Result<Option<u64>, ConfigError> {
    let Some(value) = env_non_empty(key) else {
        return Ok(None);
    };
    match value.parse::<u64>() {
        Ok(parsed) if parsed > 0 => Ok(Some(parsed)),
        _ => Err(ConfigError::InvalidNumber { key, value }),
    }
}
