//! Error handling for the experiment runner

use std::path::PathBuf;

use manet_core::ExperimentError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Experiment(#[from] ExperimentError),

    #[error("Failed to render configuration: {0}")]
    ConfigRender(#[from] toml::ser::Error),

    #[error("Failed to write report to {path}: {source}")]
    ReportWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Report serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Experiment(e) => e.exit_code(),
            CliError::ConfigRender(_) => 2,
            CliError::ReportWrite { .. } | CliError::Serialization(_) => 4,
        }
    }
}

/// Result type for runner operations
pub type Result<T> = std::result::Result<T, CliError>;
