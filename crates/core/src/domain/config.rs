// Stage Configuration Schema
// Accepts the loose shapes users write and normalizes them into TaskSpecs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::error::ConfigError;
use super::task_spec::{OutputLevel, TaskSpec};
use crate::application::constants::DEFAULT_SHUTDOWN_GRACE;

/// Lifecycle stage at which tasks fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Prepare,
    Startup,
    Check,
    Shutdown,
    PostProcess,
}

impl Stage {
    /// All stages in load order
    pub const ALL: [Stage; 5] = [
        Stage::Prepare,
        Stage::Startup,
        Stage::Check,
        Stage::Shutdown,
        Stage::PostProcess,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Prepare => "prepare",
            Stage::Startup => "startup",
            Stage::Check => "check",
            Stage::Shutdown => "shutdown",
            Stage::PostProcess => "post-process",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Either a single value or an ordered list of values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => std::slice::from_ref(item),
        }
    }
}

/// A task entry: a bare command string or a full table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskEntry {
    Command(String),
    Table(TaskEntryTable),
}

/// Full task entry as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TaskEntryTable {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub background: bool,
    #[serde(default = "default_ignore_failure")]
    pub ignore_failure: bool,
    /// Severity name for stdout, parsed when the entry is validated
    #[serde(default)]
    pub out: Option<String>,
    #[serde(default)]
    pub err: Option<String>,
}

fn default_ignore_failure() -> bool {
    true
}

impl TaskEntry {
    /// Validate the entry into a TaskSpec
    ///
    /// # Errors
    /// - ConfigError::MissingCommand if `command` is absent or blank
    /// - ConfigError::UnknownEntryLevel if `out` or `err` names no severity
    pub fn to_spec(&self, stage: Stage, index: usize) -> Result<TaskSpec, ConfigError> {
        let missing = || ConfigError::MissingCommand {
            stage: stage.to_string(),
            index,
        };

        match self {
            TaskEntry::Command(command) => TaskSpec::new(command.clone()).map_err(|_| missing()),
            TaskEntry::Table(table) => {
                let command = table.command.as_deref().ok_or_else(missing)?;
                let mut spec = TaskSpec::new(command)
                    .map_err(|_| missing())?
                    .with_background(table.background)
                    .with_ignore_failure(table.ignore_failure);
                if let Some(level) = &table.out {
                    spec = spec.with_out_level(parse_level(stage, index, "out", level)?);
                }
                if let Some(level) = &table.err {
                    spec = spec.with_err_level(parse_level(stage, index, "err", level)?);
                }
                Ok(spec)
            }
        }
    }
}

fn parse_level(
    stage: Stage,
    index: usize,
    field: &'static str,
    level: &str,
) -> Result<OutputLevel, ConfigError> {
    level
        .parse()
        .map_err(|_| ConfigError::UnknownEntryLevel {
            stage: stage.to_string(),
            index,
            field,
            level: level.to_string(),
        })
}

/// Top-level shell executor configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ShellExecConfig {
    #[serde(default)]
    pub prepare: OneOrMany<TaskEntry>,
    #[serde(default)]
    pub startup: OneOrMany<TaskEntry>,
    #[serde(default)]
    pub check: OneOrMany<TaskEntry>,
    #[serde(default)]
    pub shutdown: OneOrMany<TaskEntry>,
    #[serde(default)]
    pub post_process: OneOrMany<TaskEntry>,
    /// Time between SIGTERM and SIGKILL when stopping a background task
    #[serde(default)]
    pub shutdown_grace_ms: Option<u64>,
}

impl ShellExecConfig {
    pub fn entries(&self, stage: Stage) -> &[TaskEntry] {
        match stage {
            Stage::Prepare => self.prepare.as_slice(),
            Stage::Startup => self.startup.as_slice(),
            Stage::Check => self.check.as_slice(),
            Stage::Shutdown => self.shutdown.as_slice(),
            Stage::PostProcess => self.post_process.as_slice(),
        }
    }

    /// Validate and normalize all entries of one stage
    pub fn task_specs(&self, stage: Stage) -> Result<Vec<TaskSpec>, ConfigError> {
        self.entries(stage)
            .iter()
            .enumerate()
            .map(|(index, entry)| entry.to_spec(stage, index))
            .collect()
    }

    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SHUTDOWN_GRACE)
    }
}
