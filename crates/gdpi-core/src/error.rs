//! Error types for gdpi-core
//!
//! Centralized error handling using `thiserror` for ergonomic error definitions.
//! Apply failures are not errors: they are reported through
//! [`ApplyOutcome`](crate::outcome::ApplyOutcome). This type covers contract
//! violations, configuration and persistence.

use thiserror::Error;

/// Main error type for gdpi-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Caller passed something that can never be applied
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A strategy parameter could not be interpreted
    #[error("Invalid parameter '{key}' for strategy '{strategy}': {message}")]
    InvalidParameter {
        /// Strategy the parameter belongs to
        strategy: String,
        /// Parameter key
        key: String,
        /// Error message
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        /// Path to the missing config file
        path: String,
    },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    ConfigValue {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    /// Noise pattern could not be compiled
    #[error("Invalid noise host pattern '{pattern}': {message}")]
    NoisePattern {
        /// The offending wildcard pattern
        pattern: String,
        /// Error message
        message: String,
    },

    /// Persisted state could not be read or written
    #[error("Persistence error for '{path}': {message}")]
    Persistence {
        /// File involved
        path: String,
        /// Error message
        message: String,
    },

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a config value error
    pub fn config_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValue {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a persistence error
    pub fn persistence(path: impl Into<String>, message: impl ToString) -> Self {
        Self::Persistence {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
