//! Application settings

use super::ConfigError;
use crate::core::logger::LogFormat;
use crate::core::session::SessionOptions;
use crate::core::transport::{TelnetConfig, DEFAULT_PORT};
use crate::core::wait::WaitOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where and how to connect
    pub connection: ConnectionConfig,
    /// Session limits
    pub session: SessionConfig,
    /// Prompt wait policy
    pub wait: WaitConfig,
    /// Logging settings
    pub logging: LoggingConfig,
    /// Pattern source
    pub patterns: PatternsConfig,
}

impl AppConfig {
    /// Load from the default location; a missing file yields defaults
    pub fn load() -> Result<Self, ConfigError> {
        match super::config_dir() {
            Some(dir) => Self::load_from(&dir.join(super::CONFIG_FILE)),
            None => Ok(Self::default()),
        }
    }

    /// Load from `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Write to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Telnet settings for `host`, falling back to the configured host
    pub fn telnet_config(&self, host: Option<&str>, port: Option<u16>) -> Option<TelnetConfig> {
        let host = host.or(self.connection.host.as_deref())?;
        let c = &self.connection;
        Some(
            TelnetConfig::new(host)
                .port(port.unwrap_or(c.port))
                .size(c.cols, c.rows)
                .terminal_type(&c.terminal_type)
                .connect_timeout(Duration::from_secs(c.connect_timeout_secs)),
        )
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            buffer_capacity: self.session.buffer_capacity,
            read_max_bytes: self.session.read_max_bytes,
            idle_threshold: Duration::from_secs_f64(self.wait.idle_threshold_secs.max(0.0)),
            detect_prompts: true,
        }
    }

    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions::default()
            .timeout(Duration::from_millis(self.wait.timeout_ms))
            .idle_grace_ratio(self.wait.idle_grace_ratio)
            .idle_threshold(Duration::from_secs_f64(self.wait.idle_threshold_secs.max(0.0)))
            .poll_interval(Duration::from_millis(self.wait.poll_interval_ms))
    }
}

/// Connection defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub port: u16,
    pub cols: u16,
    pub rows: u16,
    pub terminal_type: String,
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            cols: 80,
            rows: 24,
            terminal_type: "ANSI".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

/// Session limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_sessions: usize,
    pub reuse_connections: bool,
    pub read_max_bytes: usize,
    pub buffer_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: crate::core::manager::DEFAULT_MAX_SESSIONS,
            reuse_connections: false,
            read_max_bytes: crate::core::session::DEFAULT_READ_MAX_BYTES,
            buffer_capacity: crate::core::buffer::DEFAULT_CAPACITY,
        }
    }
}

/// Prompt wait policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    pub timeout_ms: u64,
    pub idle_grace_ratio: f64,
    pub idle_threshold_secs: f64,
    pub poll_interval_ms: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            idle_grace_ratio: 0.8,
            idle_threshold_secs: 2.0,
            poll_interval_ms: 250,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `bbsbot_core=debug`
    pub level: String,
    /// Also write a daily rolling log file
    pub file: bool,
    /// Log directory; defaults to the data directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    /// Record session transcripts
    pub transcript: bool,
    /// Transcript line format
    pub transcript_format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: false,
            directory: None,
            transcript: false,
            transcript_format: LogFormat::Text,
        }
    }
}

impl LoggingConfig {
    /// Effective log directory
    pub fn directory(&self) -> Option<PathBuf> {
        self.directory.clone().or_else(super::log_dir)
    }
}

/// Pattern source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternsConfig {
    /// YAML or TOML pattern file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.connection.port, 23);
        assert_eq!((config.connection.cols, config.connection.rows), (80, 24));
        assert_eq!(config.session.max_sessions, 10);
        assert_eq!(config.session.read_max_bytes, 4096);
        assert_eq!(config.session.buffer_capacity, 50);

        let wait = config.wait_options();
        assert_eq!(wait.timeout, Duration::from_secs(10));
        assert_eq!(wait.poll_interval, Duration::from_millis(250));
        assert!((wait.idle_grace_ratio - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
[connection]
host = "bbs.example"
port = 2323

[wait]
timeout_ms = 3000

[logging]
transcript_format = "json_lines"
"#,
        )
        .unwrap();
        assert_eq!(config.connection.host.as_deref(), Some("bbs.example"));
        assert_eq!(config.connection.terminal_type, "ANSI");
        assert_eq!(config.wait.timeout_ms, 3000);
        assert!((config.wait.idle_threshold_secs - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.logging.transcript_format, LogFormat::JsonLines);

        let telnet = config.telnet_config(None, None).unwrap();
        assert_eq!(telnet.address(), "bbs.example:2323");
        let telnet = config.telnet_config(Some("other"), Some(23)).unwrap();
        assert_eq!(telnet.address(), "other:23");
    }

    #[test]
    fn test_missing_host() {
        assert!(AppConfig::default().telnet_config(None, None).is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = AppConfig::default();
        config.connection.host = Some("bbs.example".into());
        config.session.reuse_connections = true;
        config.save_to(&path).unwrap();

        assert_eq!(AppConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_invalid_toml() {
        let err = AppConfig::from_toml_str("[connection]\nport = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
