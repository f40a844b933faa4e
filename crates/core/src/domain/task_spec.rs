// Task Specification (validated config entry)

use std::fmt;
use std::str::FromStr;

use super::error::ConfigError;
use crate::application::constants::{DEFAULT_ERR_LEVEL, DEFAULT_OUT_LEVEL};

/// Severity at which an output sink forwards process output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl OutputLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputLevel::Trace => "trace",
            OutputLevel::Debug => "debug",
            OutputLevel::Info => "info",
            OutputLevel::Warn => "warn",
            OutputLevel::Error => "error",
        }
    }
}

impl fmt::Display for OutputLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(OutputLevel::Trace),
            "debug" => Ok(OutputLevel::Debug),
            "info" => Ok(OutputLevel::Info),
            "warn" | "warning" => Ok(OutputLevel::Warn),
            "error" => Ok(OutputLevel::Error),
            _ => Err(ConfigError::UnknownLevel(s.to_string())),
        }
    }
}

/// One shell command and its execution policy
///
/// `command` is interpreted by a shell, so pipes and redirections in the
/// text are honored. Never build it from untrusted input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    command: String,
    background: bool,
    ignore_failure: bool,
    out_level: OutputLevel,
    err_level: OutputLevel,
}

impl TaskSpec {
    /// Create a foreground, failure-tolerant task with default output levels
    ///
    /// # Errors
    /// - ConfigError::Invalid if the command is empty or whitespace
    pub fn new(command: impl Into<String>) -> Result<Self, ConfigError> {
        let command = command.into();
        if command.trim().is_empty() {
            return Err(ConfigError::Invalid("command must not be empty".to_string()));
        }

        Ok(Self {
            command,
            background: false,
            ignore_failure: true,
            out_level: DEFAULT_OUT_LEVEL,
            err_level: DEFAULT_ERR_LEVEL,
        })
    }

    pub fn with_background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    pub fn with_ignore_failure(mut self, ignore_failure: bool) -> Self {
        self.ignore_failure = ignore_failure;
        self
    }

    pub fn with_out_level(mut self, level: OutputLevel) -> Self {
        self.out_level = level;
        self
    }

    pub fn with_err_level(mut self, level: OutputLevel) -> Self {
        self.err_level = level;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn is_background(&self) -> bool {
        self.background
    }

    pub fn ignore_failure(&self) -> bool {
        self.ignore_failure
    }

    pub fn out_level(&self) -> OutputLevel {
        self.out_level
    }

    pub fn err_level(&self) -> OutputLevel {
        self.err_level
    }
}

impl fmt::Display for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command)
    }
}
