//! Domain-specific error types following panic-free policy.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML or has wrong field types
    #[error("Failed to parse config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    /// A field parsed but holds an unusable value
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidFieldValue {
        field: String,
        value: String,
        expected: String,
    },
}

/// Errors that can occur reading or writing the trunk file.
#[derive(Error, Debug)]
pub enum TrunkError {
    #[error("Trunk file I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Trunk file {path} has no '{column}' column")]
    MissingColumn { path: PathBuf, column: String },

    #[error("Trunk file {path} has no system row")]
    MissingRow { path: PathBuf },
}

/// Result type for config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
