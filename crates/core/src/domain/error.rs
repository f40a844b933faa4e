// Domain Error Types

use thiserror::Error;

/// Configuration errors, surfaced before any process is spawned
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Parameter is required: command (stage: {stage}, entry: {index})")]
    MissingCommand { stage: String, index: usize },

    #[error("Unknown output level: {0}")]
    UnknownLevel(String),

    #[error("Unknown output level '{level}' for {field} (stage: {stage}, entry: {index})")]
    UnknownEntryLevel {
        stage: String,
        index: usize,
        field: &'static str,
        level: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
