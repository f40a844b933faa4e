// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
///
/// Escalated task failures are NOT errors: they travel as
/// [`crate::domain::Outcome::AbortRun`] so the host can still tear down.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::domain::ConfigError),

    #[error("Execution error: {0}")]
    Execution(#[from] crate::port::SupervisorError),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
