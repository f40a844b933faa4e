// Shellexec Infrastructure - System Adapters
// Implements: ProcessSupervisor

pub mod shell_supervisor;

pub use shell_supervisor::{ShellProcess, ShellProcessSupervisor};
