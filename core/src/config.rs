//! Client configuration.
//!
//! Loaded from JSON, from `RESTWIRE_*` environment variables, or built in
//! code. Every field has a default, so an empty JSON object is valid.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL every request path is appended to.
    pub endpoint: String,
    /// Applied when neither the method nor the API declares a timeout.
    /// Zero disables it.
    pub default_timeout_ms: u64,
    pub worker_threads: usize,
    /// Upper bound on concurrently dispatched invocations.
    pub max_in_flight: usize,
    pub strip_expect_header: bool,
    /// Overrides the version declared on each API.
    pub api_version: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3000".to_string(),
            default_timeout_ms: 60_000,
            worker_threads: 4,
            max_in_flight: 64,
            strip_expect_header: false,
            api_version: None,
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        (self.default_timeout_ms > 0).then(|| Duration::from_millis(self.default_timeout_ms))
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `RESTWIRE_ENDPOINT`, `RESTWIRE_TIMEOUT_MS`,
    /// `RESTWIRE_WORKER_THREADS`, `RESTWIRE_MAX_IN_FLIGHT` and
    /// `RESTWIRE_API_VERSION`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(endpoint) = lookup("RESTWIRE_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Some(value) = lookup("RESTWIRE_TIMEOUT_MS") {
            config.default_timeout_ms = parse_var("RESTWIRE_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("RESTWIRE_WORKER_THREADS") {
            config.worker_threads = parse_var("RESTWIRE_WORKER_THREADS", &value)?;
        }
        if let Some(value) = lookup("RESTWIRE_MAX_IN_FLIGHT") {
            config.max_in_flight = parse_var("RESTWIRE_MAX_IN_FLIGHT", &value)?;
        }
        if let Some(version) = lookup("RESTWIRE_API_VERSION") {
            config.api_version = Some(version);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.is_empty() {
            return Err(invalid("endpoint", ""));
        }
        if self.worker_threads == 0 {
            return Err(invalid("worker_threads", "0"));
        }
        if self.max_in_flight == 0 {
            return Err(invalid("max_in_flight", "0"));
        }
        Ok(())
    }
}

fn invalid(var: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        var: var.to_string(),
        value: value.to_string(),
    }
}

fn parse_var<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(var, value))
}
