//! Error types for the init workflow.

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::provision::ProvisionError;

/// Errors raised while preparing a project for its first VM.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum InitError {
    /// Raised when the configuration file cannot be written or loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Raised when the storage directory cannot be created.
    #[error("failed to create storage directory {path}: {message}")]
    Storage {
        /// Storage directory.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the base image or seed cannot be prepared.
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}
