//! Configuration module
//!
//! Handles application settings and their on-disk locations

mod settings;

pub use settings::{
    AppConfig, ConnectionConfig, LoggingConfig, PatternsConfig, SessionConfig, WaitConfig,
};

use directories::ProjectDirs;
use std::path::PathBuf;
use thiserror::Error;

/// Config file name inside the config directory
pub const CONFIG_FILE: &str = "config.toml";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "bbsbot", "bbsbot")
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the application data directory
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

/// Get the log directory
pub fn log_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("logs"))
}

/// Default config file path
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(CONFIG_FILE))
}
