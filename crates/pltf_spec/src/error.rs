//! Error types for the spec module.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for spec operations.
pub type SpecResult<T> = Result<T, SpecError>;

/// Errors that can occur while loading or validating specs.
#[derive(Error, Debug)]
pub enum SpecError {
    #[error("Spec file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid spec format in file {path}: {message}")]
    InvalidFormat { path: PathBuf, message: String },

    #[error("Unsupported spec kind {kind:?} in file {path} (expected Environment or Service)")]
    UnknownKind { path: PathBuf, kind: String },

    #[error("Spec validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid module metadata: {0}")]
    InvalidMetadata(String),

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
