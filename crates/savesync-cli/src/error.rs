use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] savesync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Player ID cannot be empty")]
    EmptyPlayerId,
    #[error("Invalid simulation options: {0}")]
    InvalidOptions(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("No submission endpoint configured. Set SAVESYNC_SUBMISSION_ENDPOINT to an http(s) URL.")]
    EndpointNotConfigured,
}

impl From<savesync_core::config::ConfigError> for CliError {
    fn from(error: savesync_core::config::ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}
