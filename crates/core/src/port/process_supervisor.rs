// Process Supervisor Port
// Abstraction over OS process spawn / poll / forced termination

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::OutputSink;

/// How far forced termination reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    /// Child leads its own process group; termination signals the whole group
    ProcessGroup,
    /// Only the immediate child is signalled (best effort for descendants)
    SingleProcess,
}

impl Isolation {
    /// Strongest isolation the target platform supports
    pub const PLATFORM_DEFAULT: Isolation = if cfg!(unix) {
        Isolation::ProcessGroup
    } else {
        Isolation::SingleProcess
    };
}

impl Default for Isolation {
    fn default() -> Self {
        Isolation::PLATFORM_DEFAULT
    }
}

/// Everything a supervisor needs to launch one shell command
#[derive(Clone)]
pub struct SpawnRequest {
    /// Shell-interpreted command text
    pub command: String,
    pub working_dir: PathBuf,
    pub stdout: Arc<dyn OutputSink>,
    pub stderr: Arc<dyn OutputSink>,
    pub isolation: Isolation,
    /// Span of the owning task; drained output is recorded inside it
    pub span: tracing::Span,
}

impl fmt::Debug for SpawnRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnRequest")
            .field("command", &self.command)
            .field("working_dir", &self.working_dir)
            .field("isolation", &self.isolation)
            .finish_non_exhaustive()
    }
}

/// Supervisor errors
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Poll failed: {0}")]
    PollFailed(String),

    #[error("Terminate failed: {0}")]
    TerminateFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Process Supervisor trait
///
/// Implementations:
/// - ShellProcessSupervisor (infra-system): `sh -c` children with process groups
/// - MockProcessSupervisor: scripted exits for state machine tests
pub trait ProcessSupervisor: Send + Sync {
    /// Launch the command and start draining its output into the sinks
    ///
    /// # Errors
    /// - SupervisorError::SpawnFailed if the shell cannot be started
    fn spawn(&self, request: SpawnRequest) -> Result<Box<dyn ProcessHandle>, SupervisorError>;
}

/// Exclusively owned handle to one live child process
#[async_trait]
pub trait ProcessHandle: Send {
    fn pid(&self) -> Option<u32>;

    /// Non-blocking: `Some(exit_code)` once the process has exited
    fn poll(&mut self) -> Result<Option<i32>, SupervisorError>;

    /// Block until the process exits and its output has been flushed
    async fn wait(&mut self) -> Result<i32, SupervisorError>;

    /// Wait for output still in flight after the process exited
    ///
    /// Bounded by the implementation's flush timeout; output that outlives it
    /// keeps being forwarded in the background.
    async fn flush(&mut self);

    /// Graceful stop, then kill after `grace`, then reap
    ///
    /// A process that already exited is not an error. Returns the reaped
    /// exit code when one could be observed.
    async fn terminate(&mut self, grace: Duration) -> Result<Option<i32>, SupervisorError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Scripted behavior for every process the mock spawns
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Exit with `code` on the `polls`-th poll (or immediately on wait)
        Exit { code: i32, polls: usize },
        /// Run until terminated
        NeverExits,
        /// Fail every spawn with message
        SpawnFails(String),
        /// Ignore termination and report an error
        Unkillable,
    }

    #[derive(Debug, Default, Clone, PartialEq, Eq)]
    pub struct MockCounters {
        pub spawns: usize,
        pub polls: usize,
        pub waits: usize,
        pub terminates: usize,
        pub flushes: usize,
    }

    /// Mock Process Supervisor for testing
    pub struct MockProcessSupervisor {
        behavior: MockBehavior,
        counters: Arc<Mutex<MockCounters>>,
        last_request: Mutex<Option<SpawnRequest>>,
    }

    impl MockProcessSupervisor {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior,
                counters: Arc::new(Mutex::new(MockCounters::default())),
                last_request: Mutex::new(None),
            }
        }

        pub fn exiting(code: i32) -> Self {
            Self::new(MockBehavior::Exit { code, polls: 1 })
        }

        pub fn exiting_after(code: i32, polls: usize) -> Self {
            Self::new(MockBehavior::Exit { code, polls })
        }

        pub fn never_exiting() -> Self {
            Self::new(MockBehavior::NeverExits)
        }

        pub fn counters(&self) -> MockCounters {
            self.counters.lock().unwrap().clone()
        }

        pub fn last_request(&self) -> Option<SpawnRequest> {
            self.last_request.lock().unwrap().clone()
        }
    }

    impl ProcessSupervisor for MockProcessSupervisor {
        fn spawn(&self, request: SpawnRequest) -> Result<Box<dyn ProcessHandle>, SupervisorError> {
            let behavior = self.behavior.clone();
            if let MockBehavior::SpawnFails(msg) = behavior {
                return Err(SupervisorError::SpawnFailed(msg));
            }

            let pid = {
                let mut counters = self.counters.lock().unwrap();
                counters.spawns += 1;
                40_000 + counters.spawns as u32
            };
            *self.last_request.lock().unwrap() = Some(request);

            Ok(Box::new(MockProcessHandle {
                pid,
                behavior,
                polls_seen: 0,
                exit_code: None,
                counters: Arc::clone(&self.counters),
            }))
        }
    }

    struct MockProcessHandle {
        pid: u32,
        behavior: MockBehavior,
        polls_seen: usize,
        exit_code: Option<i32>,
        counters: Arc<Mutex<MockCounters>>,
    }

    #[async_trait]
    impl ProcessHandle for MockProcessHandle {
        fn pid(&self) -> Option<u32> {
            Some(self.pid)
        }

        fn poll(&mut self) -> Result<Option<i32>, SupervisorError> {
            self.counters.lock().unwrap().polls += 1;
            if self.exit_code.is_some() {
                return Ok(self.exit_code);
            }

            self.polls_seen += 1;
            if let MockBehavior::Exit { code, polls } = self.behavior {
                if self.polls_seen >= polls {
                    self.exit_code = Some(code);
                }
            }
            Ok(self.exit_code)
        }

        async fn wait(&mut self) -> Result<i32, SupervisorError> {
            self.counters.lock().unwrap().waits += 1;
            match self.behavior {
                MockBehavior::Exit { code, .. } => {
                    self.exit_code = Some(code);
                    Ok(code)
                }
                _ => Err(SupervisorError::PollFailed(
                    "mock process never exits".to_string(),
                )),
            }
        }

        async fn flush(&mut self) {
            self.counters.lock().unwrap().flushes += 1;
        }

        async fn terminate(&mut self, _grace: Duration) -> Result<Option<i32>, SupervisorError> {
            self.counters.lock().unwrap().terminates += 1;
            if let MockBehavior::Unkillable = self.behavior {
                return Err(SupervisorError::TerminateFailed(
                    "mock process ignores signals".to_string(),
                ));
            }
            if self.exit_code.is_none() {
                self.exit_code = Some(-15);
            }
            Ok(self.exit_code)
        }
    }
}
