// Application Layer - Task lifecycle and stage orchestration

pub mod constants;
pub mod log_sink;
pub mod stage_runner;
pub mod task;

// Re-exports
pub use log_sink::LogSink;
pub use stage_runner::StageRunner;
pub use task::Task;
