//! Error types for document loading.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Errors raised while reading, rendering or normalizing an environment
/// document.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The document file could not be read.
    #[error("cannot read environment description {path}: {source}")]
    Read {
        /// The file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid YAML, or does not match the schema.
    #[error("invalid environment description: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A `${VAR}` reference has no value in the render inputs.
    #[error("undefined template variable {0:?}")]
    UndefinedVariable(String),

    /// An unterminated `${` in the document text.
    #[error("unterminated variable reference near {0:?}")]
    UnterminatedVariable(String),

    /// An env file entry could not be parsed.
    #[error("invalid env file {path} (line {line}): {reason}")]
    EnvFile {
        /// The env file path.
        path: PathBuf,
        /// The offending line number (1-based).
        line: usize,
        /// Why the line was rejected.
        reason: String,
    },

    /// The document failed entity validation.
    #[error(transparent)]
    Config(#[from] armada_core::ConfigError),
}
