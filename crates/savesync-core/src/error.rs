//! Error types for savesync-core

use thiserror::Error;

/// Result type alias using savesync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in savesync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Operation on a finalized batch or an already-populated save record
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Tracked batch or stored record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A submission could not be handed to the network layer
    #[error("Delivery failed: {0}")]
    DeliveryFailure(String),

    /// No confirmation arrived within the configured window
    #[error("Confirmation timed out for submission {0}")]
    ConfirmationTimeout(u64),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn delivery_failure(message: impl Into<String>) -> Self {
        Self::DeliveryFailure(message.into())
    }
}

