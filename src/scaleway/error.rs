//! Error types for the Scaleway directory.

use crate::config::ConfigError;
use thiserror::Error;

/// Errors raised while listing Scaleway Redis clusters.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScalewayDirectoryError {
    /// Raised when the configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when the API cannot be reached.
    #[error("request to {zone} failed: {message}")]
    Request {
        /// Zone being listed.
        zone: String,
        /// Transport error message.
        message: String,
    },
    /// Raised when the API answers with a non-success status.
    #[error("listing clusters in {zone} returned HTTP {status}: {message}")]
    Status {
        /// Zone being listed.
        zone: String,
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },
    /// Raised when the response body is not the expected JSON.
    #[error("malformed cluster list from {zone}: {message}")]
    Decode {
        /// Zone being listed.
        zone: String,
        /// Parser error message.
        message: String,
    },
}

impl From<ConfigError> for ScalewayDirectoryError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
