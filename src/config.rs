//! Config loading and env overrides.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Transience;
use crate::paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub call: CallConfig,
    pub stream: StreamConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            call: CallConfig::default(),
            stream: StreamConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Forwarded-call timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Ceiling on the reply wait. Generous on purpose: remote operations can
    /// legitimately take a long time, and expiry is a hard failure.
    pub timeout_ms: u64,
    /// Window for the endpoint socket to become connectable.
    pub connect_timeout_ms: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 120_000,
            connect_timeout_ms: 5_000,
        }
    }
}

impl CallConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Event-stream polling cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub poll_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 20,
        }
    }
}

impl StreamConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub stderr: bool,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stderr: true,
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

/// Load the config file (if any) and apply env overrides.
pub fn load() -> Result<Config, ConfigError> {
    let path = paths::config_path();
    let mut config = if path.exists() {
        load_from(&path)?
    } else {
        Config::default()
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// `TETHER_*` env vars win over file contents.
pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(v) = std::env::var("TETHER_CALL_TIMEOUT_MS")
        && let Ok(ms) = v.parse()
    {
        config.call.timeout_ms = ms;
    }
    if let Ok(v) = std::env::var("TETHER_CONNECT_TIMEOUT_MS")
        && let Ok(ms) = v.parse()
    {
        config.call.connect_timeout_ms = ms;
    }
    if let Ok(v) = std::env::var("TETHER_POLL_INTERVAL_MS")
        && let Ok(ms) = v.parse()
    {
        config.stream.poll_interval_ms = ms;
    }
    if let Ok(v) = std::env::var("TETHER_LOG_FORMAT") {
        match v.as_str() {
            "compact" => config.logging.format = LogFormat::Compact,
            "pretty" => config.logging.format = LogFormat::Pretty,
            "json" => config.logging.format = LogFormat::Json,
            _ => {}
        }
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Io(_) => "io_error",
            ConfigError::Parse(_) => "parse_error",
        }
    }

    pub fn transience(&self) -> Transience {
        match self {
            ConfigError::Io(_) => Transience::Retryable,
            ConfigError::Parse(_) => Transience::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_roundtrip_through_json() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.call.timeout_ms, 120_000);
        assert_eq!(parsed.stream.poll_interval_ms, 20);
        assert_eq!(parsed.logging.format, LogFormat::Compact);
    }

    #[test]
    fn load_from_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"stream": {"poll_interval_ms": 5}}"#).unwrap();
        let config = load_from(&path).unwrap();
        assert_eq!(config.stream.poll_interval_ms, 5);
        assert_eq!(config.call.timeout_ms, 120_000);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_from(&path).unwrap_err();
        assert_eq!(err.code(), "parse_error");
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let parsed: Config = serde_json::from_str(r#"{"call": {"timeout_ms": 5000}}"#).unwrap();
        assert_eq!(parsed.call.timeout_ms, 5_000);
        assert_eq!(parsed.call.connect_timeout_ms, 5_000);
        assert_eq!(parsed.stream.poll_interval_ms, 20);
    }
}
