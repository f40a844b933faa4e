// Domain Layer - Task specs, stage config schema, run outcomes

pub mod config;
pub mod error;
pub mod outcome;
pub mod task_spec;

// Re-exports
pub use config::{OneOrMany, ShellExecConfig, Stage, TaskEntry, TaskEntryTable};
pub use error::ConfigError;
pub use outcome::{Escalation, Outcome, Progress};
pub use task_spec::{OutputLevel, TaskSpec};
