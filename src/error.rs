//! Error types for the gateway supervisor.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the supervisor.
///
/// None of these terminate the supervisor on their own: callers log them and
/// degrade to skipping the offending item.
#[derive(Error, Debug)]
pub enum Error {
    /// Services file is present but not a JSON array of descriptors
    #[error("Invalid services file: {path}: {reason}")]
    InvalidDescriptorFile { path: PathBuf, reason: String },

    /// Process spawn error
    #[error("Failed to spawn process for {name}: {reason}")]
    ProcessSpawnFailed { name: String, reason: String },

    /// Signal handler installation error
    #[error("Signal error: {0}")]
    SignalError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Nix error
    #[error("System error: {0}")]
    Nix(#[from] nix::Error),
}
