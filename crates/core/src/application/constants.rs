// Task constants (No magic values)
use std::time::Duration;

use crate::domain::OutputLevel;

/// Default severity for a task's standard output
pub const DEFAULT_OUT_LEVEL: OutputLevel = OutputLevel::Info;

/// Default severity for a task's standard error
/// Note: less severe than stdout; override per task with `err:`
pub const DEFAULT_ERR_LEVEL: OutputLevel = OutputLevel::Debug;

/// Graceful process shutdown timeout before SIGKILL (5 seconds)
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Interval between liveness checks while waiting out the grace period (100ms)
pub const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on waiting for output drains after a process exits (2s)
/// Drains that outlive it keep logging in the background
pub const OUTPUT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Default cadence of the host's check loop (1s)
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(1);
