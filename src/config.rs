//! Runtime configuration.
//!
//! Values come from the environment (`.env` is loaded by the binary first)
//! and can be overridden per field by CLI flags.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default backend base URL.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub poll: PollConfig,
    /// Delay between the init acknowledgement and the first log fetch.
    pub init_delay: Duration,
    /// Where the session fields are persisted.
    pub state_path: PathBuf,
}

/// Backend connection settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL without trailing slash, e.g. `http://localhost:8000`.
    pub base_url: String,
    /// Per-request timeout. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            request_timeout: None,
        }
    }
}

impl ApiConfig {
    /// Set the base URL, dropping any trailing slashes.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// Poll chain settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Fixed delay before every status check.
    pub interval: Duration,
    /// Maximum status checks in one chain.
    pub max_retries: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5000),
            max_retries: 10,
        }
    }
}

impl PollConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

impl Config {
    /// Build a config from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut api = ApiConfig::default();
        if let Some(url) = non_empty(lookup("QUEST_API_URL")) {
            api = api.with_base_url(url);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "QUEST_REQUEST_TIMEOUT_SECS")? {
            api = api.with_timeout(Duration::from_secs(secs));
        }

        let mut poll = PollConfig::default();
        if let Some(ms) = parse_var::<u64>(&lookup, "QUEST_POLL_INTERVAL_MS")? {
            poll = poll.with_interval(Duration::from_millis(ms));
        }
        if let Some(n) = parse_var::<u32>(&lookup, "QUEST_POLL_MAX_RETRIES")? {
            poll = poll.with_max_retries(n);
        }

        let init_delay = parse_var::<u64>(&lookup, "QUEST_INIT_DELAY_MS")?
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(5000));

        let state_path = match non_empty(lookup("QUEST_STATE_PATH")) {
            Some(path) => PathBuf::from(path),
            None => default_state_path()?,
        };

        Ok(Self {
            api,
            poll,
            init_delay,
            state_path,
        })
    }
}

/// `<data_dir>/questline/session.json`.
pub fn default_state_path() -> Result<PathBuf, ConfigError> {
    dirs::data_dir()
        .map(|dir| dir.join("questline").join("session.json"))
        .ok_or(ConfigError::MissingDataDir)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty(lookup(key)) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{}': {}", raw, e),
            }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_reference_timings() {
        let config = Config::from_lookup(lookup_from(&[("QUEST_STATE_PATH", "/tmp/s.json")]))
            .unwrap();

        assert_eq!(config.api.base_url, "http://localhost:8000");
        assert_eq!(config.api.request_timeout, None);
        assert_eq!(config.poll.interval, Duration::from_secs(5));
        assert_eq!(config.poll.max_retries, 10);
        assert_eq!(config.init_delay, Duration::from_secs(5));
        assert_eq!(config.state_path, PathBuf::from("/tmp/s.json"));
    }

    #[test]
    fn test_overrides_from_environment() {
        let config = Config::from_lookup(lookup_from(&[
            ("QUEST_API_URL", "http://game.local:9000/"),
            ("QUEST_POLL_INTERVAL_MS", "250"),
            ("QUEST_POLL_MAX_RETRIES", "3"),
            ("QUEST_INIT_DELAY_MS", "10"),
            ("QUEST_REQUEST_TIMEOUT_SECS", "30"),
            ("QUEST_STATE_PATH", "state.json"),
        ]))
        .unwrap();

        assert_eq!(config.api.base_url, "http://game.local:9000");
        assert_eq!(config.api.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.poll.interval, Duration::from_millis(250));
        assert_eq!(config.poll.max_retries, 3);
        assert_eq!(config.init_delay, Duration::from_millis(10));
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("QUEST_POLL_MAX_RETRIES", "lots"),
            ("QUEST_STATE_PATH", "state.json"),
        ]))
        .unwrap_err();

        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "QUEST_POLL_MAX_RETRIES"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = Config::from_lookup(lookup_from(&[
            ("QUEST_API_URL", "   "),
            ("QUEST_POLL_INTERVAL_MS", ""),
            ("QUEST_STATE_PATH", "state.json"),
        ]))
        .unwrap();

        assert_eq!(config.api.base_url, DEFAULT_API_URL);
        assert_eq!(config.poll.interval, Duration::from_secs(5));
    }
}
