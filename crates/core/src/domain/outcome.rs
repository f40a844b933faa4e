// Run Outcomes
// Escalation travels as a value so the host keeps control of teardown

use thiserror::Error;

/// A task failed while its ignore-failure policy was off
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("task `{command}` exited with code {exit_code} and ignore-failure is disabled")]
pub struct Escalation {
    pub command: String,
    pub exit_code: i32,
}

/// Result of `start` and `shutdown`
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Keep going with the run
    Continue,
    /// Stop the run in an orderly fashion
    AbortRun(Escalation),
}

impl Outcome {
    pub fn is_abort(&self) -> bool {
        matches!(self, Outcome::AbortRun(_))
    }
}

/// Result of `check`
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Running,
    Finished,
    AbortRun(Escalation),
}

impl Progress {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Progress::Running)
    }
}

impl From<Progress> for Outcome {
    fn from(progress: Progress) -> Self {
        match progress {
            Progress::AbortRun(escalation) => Outcome::AbortRun(escalation),
            Progress::Running | Progress::Finished => Outcome::Continue,
        }
    }
}
