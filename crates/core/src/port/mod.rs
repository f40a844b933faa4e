// Port Layer - Interfaces for external dependencies

pub mod output_sink;
pub mod process_supervisor;

// Re-exports
pub use output_sink::OutputSink;
pub use process_supervisor::{
    Isolation, ProcessHandle, ProcessSupervisor, SpawnRequest, SupervisorError,
};
