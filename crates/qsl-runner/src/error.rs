//! Runner error types.

use std::path::PathBuf;

use thiserror::Error;

use qsl_core::{ConfigError, QslError};

/// Errors that stop a scenario run.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// A scenario or report file could not be read or written.
    #[error("{path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The scenario file is not valid YAML for a scenario.
    #[error("invalid scenario: {0}")]
    Scenario(#[from] serde_yaml::Error),

    /// The report could not be serialized.
    #[error("report serialization failed: {0}")]
    Report(#[from] serde_json::Error),

    /// Timing configuration rejected.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The connection refused to start.
    #[error("connection error: {0}")]
    Connection(#[from] QslError),

    /// The publish plan is unusable.
    #[error("invalid publish plan: {0}")]
    Plan(String),

    /// The device thread could not be started.
    #[error("failed to spawn device thread: {0}")]
    Spawn(std::io::Error),
}
