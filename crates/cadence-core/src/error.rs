//! Error types for the core crate.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A configuration value is out of its supported range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
