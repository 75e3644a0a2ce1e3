//! Common error types for tandem players

use thiserror::Error;

/// Common result type for tandem operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across tandem crates
#[derive(Error, Debug)]
pub enum Error {
    /// A leg rejected an operation (prepare/play/pause/stop/seek)
    #[error("Leg '{leg}' failed: {message}")]
    Leg { leg: String, message: String },

    /// Operation issued against a player that has already been destroyed
    #[error("Player has been destroyed")]
    Destroyed,

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML parse error (wraps toml::de::Error)
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a leg failure from the leg's name and any displayable cause
    pub fn leg(leg: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Leg {
            leg: leg.into(),
            message: message.to_string(),
        }
    }
}
