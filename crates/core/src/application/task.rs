// Task - lifecycle of one shell command
// start / check / shutdown, with the ignore-failure policy enforced on every path

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument, Span};

use super::constants::DEFAULT_SHUTDOWN_GRACE;
use super::log_sink::LogSink;
use crate::domain::{Escalation, Outcome, Progress, TaskSpec};
use crate::error::Result;
use crate::port::{Isolation, OutputSink, ProcessHandle, ProcessSupervisor, SpawnRequest};

/// Process-control state
///
/// The handle and the exit code live in different variants, so a task can
/// never be both "being polled" and "known finished".
enum TaskState {
    NotStarted,
    Running(Box<dyn ProcessHandle>),
    /// `unflushed` keeps an exited background handle until its output is drained
    Finished {
        exit_code: i32,
        unflushed: Option<Box<dyn ProcessHandle>>,
    },
    /// Stopped by shutdown before it exited on its own
    Terminated,
}

/// One configured shell command
///
/// Tasks are driven from a single thread: every operation takes `&mut self`
/// and nothing is shared between tasks.
pub struct Task {
    spec: TaskSpec,
    working_dir: PathBuf,
    supervisor: Arc<dyn ProcessSupervisor>,
    stdout: Arc<dyn OutputSink>,
    stderr: Arc<dyn OutputSink>,
    isolation: Isolation,
    shutdown_grace: Duration,
    span: Span,
    state: TaskState,
    shut_down: bool,
}

impl Task {
    /// Create a task whose output goes to log sinks at the spec's levels
    ///
    /// # Arguments
    /// * `spec` - Validated command and policy
    /// * `working_dir` - Directory the command runs in
    /// * `supervisor` - Process backend
    /// * `span` - Logger identity of this task; all task and output records nest under it
    pub fn new(
        spec: TaskSpec,
        working_dir: impl Into<PathBuf>,
        supervisor: Arc<dyn ProcessSupervisor>,
        span: Span,
    ) -> Self {
        let stdout: Arc<dyn OutputSink> =
            Arc::new(LogSink::new(spec.out_level(), "stdout", span.clone()));
        let stderr: Arc<dyn OutputSink> =
            Arc::new(LogSink::new(spec.err_level(), "stderr", span.clone()));

        Self {
            spec,
            working_dir: working_dir.into(),
            supervisor,
            stdout,
            stderr,
            isolation: Isolation::PLATFORM_DEFAULT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            span,
            state: TaskState::NotStarted,
            shut_down: false,
        }
    }

    /// Replace the output destinations
    pub fn with_sinks(mut self, stdout: Arc<dyn OutputSink>, stderr: Arc<dyn OutputSink>) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Exit code, once the process has been observed to exit on its own
    pub fn exit_code(&self) -> Option<i32> {
        match self.state {
            TaskState::Finished { exit_code, .. } => Some(exit_code),
            _ => None,
        }
    }

    /// True while a background process handle is held
    pub fn is_running(&self) -> bool {
        matches!(self.state, TaskState::Running(_))
    }

    pub fn pid(&self) -> Option<u32> {
        match &self.state {
            TaskState::Running(handle) => handle.pid(),
            _ => None,
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Start the command
    ///
    /// Background tasks return right after spawn. Foreground tasks block until
    /// exit; with ignore-failure off, a non-zero exit yields `AbortRun`.
    /// Calling `start` while the background process is alive only re-checks it.
    ///
    /// # Errors
    /// - AppError::Execution if the shell cannot be spawned or waited on
    pub async fn start(&mut self) -> Result<Outcome> {
        let span = self.span.clone();
        self.start_inner().instrument(span).await
    }

    async fn start_inner(&mut self) -> Result<Outcome> {
        match self.state {
            TaskState::Running(_) => {
                let progress = self.check()?;
                if self.is_running() {
                    info!(pid = ?self.pid(), "Process still running");
                } else {
                    self.flush_exited_output().await;
                }
                return Ok(progress.into());
            }
            TaskState::Finished { .. } | TaskState::Terminated => {
                debug!("Task already completed, not starting again");
                return Ok(Outcome::Continue);
            }
            TaskState::NotStarted if self.shut_down => {
                debug!("Task was shut down before it started, not starting");
                return Ok(Outcome::Continue);
            }
            TaskState::NotStarted => {}
        }

        debug!(
            background = self.spec.is_background(),
            ignore_failure = self.spec.ignore_failure(),
            "Starting task"
        );
        let mut handle = self.supervisor.spawn(self.spawn_request())?;

        if self.spec.is_background() {
            debug!(pid = ?handle.pid(), "Task started");
            self.state = TaskState::Running(handle);
            return Ok(Outcome::Continue);
        }

        let exit_code = handle.wait().await?;
        self.state = TaskState::Finished {
            exit_code,
            unflushed: None,
        };
        debug!(exit_code, "Command finished");

        Ok(match self.escalation(exit_code) {
            Some(escalation) => {
                error!(exit_code, "Command failed with ignore-failure disabled");
                Outcome::AbortRun(escalation)
            }
            None => Outcome::Continue,
        })
    }

    /// Poll a background task without blocking
    ///
    /// Foreground, finished and never-started tasks report `Finished` without
    /// touching the OS.
    ///
    /// # Errors
    /// - AppError::Execution if the process status cannot be read
    pub fn check(&mut self) -> Result<Progress> {
        let span = self.span.clone();
        let _entered = span.enter();

        if !self.spec.is_background() {
            return Ok(Progress::Finished);
        }
        let TaskState::Running(handle) = &mut self.state else {
            return Ok(Progress::Finished);
        };

        match handle.poll()? {
            None => {
                debug!("Task is not finished yet");
                Ok(Progress::Running)
            }
            Some(exit_code) => {
                if let TaskState::Running(handle) =
                    std::mem::replace(&mut self.state, TaskState::NotStarted)
                {
                    self.state = TaskState::Finished {
                        exit_code,
                        unflushed: Some(handle),
                    };
                }
                debug!(exit_code, "Task finished");
                Ok(match self.escalation(exit_code) {
                    Some(escalation) => {
                        error!(exit_code, "Background task failed with ignore-failure disabled");
                        Progress::AbortRun(escalation)
                    }
                    None => Progress::Finished,
                })
            }
        }
    }

    /// Make sure the task is not left running
    ///
    /// A live process is stopped regardless of ignore-failure. The handle is
    /// released in every case. Only the first call does anything; it yields
    /// `AbortRun` iff the observed exit code is non-zero and ignore-failure is off.
    ///
    /// # Errors
    /// Termination problems are logged, never returned.
    pub async fn shutdown(&mut self) -> Result<Outcome> {
        let span = self.span.clone();
        self.shutdown_inner().instrument(span).await
    }

    async fn shutdown_inner(&mut self) -> Result<Outcome> {
        if self.shut_down {
            return Ok(Outcome::Continue);
        }
        self.shut_down = true;

        if let Err(e) = self.check() {
            warn!(error = %e, "Failed to poll task before shutdown");
        }
        self.flush_exited_output().await;

        if self.is_running() {
            if let TaskState::Running(mut handle) =
                std::mem::replace(&mut self.state, TaskState::Terminated)
            {
                info!(pid = ?handle.pid(), "Background task was not completed, shutting it down");
                match handle.terminate(self.shutdown_grace).await {
                    Ok(code) => debug!(exit_code = ?code, "Task terminated"),
                    Err(e) => warn!(error = %e, "Could not confirm task termination"),
                }
            }
        }

        if let Some(escalation) = self.exit_code().and_then(|code| self.escalation(code)) {
            error!(
                exit_code = escalation.exit_code,
                "Task failed with ignore-failure disabled, terminating run"
            );
            return Ok(Outcome::AbortRun(escalation));
        }
        Ok(Outcome::Continue)
    }

    /// Drain output of a background process that `check` saw exit
    async fn flush_exited_output(&mut self) {
        if let TaskState::Finished { unflushed, .. } = &mut self.state {
            if let Some(mut handle) = unflushed.take() {
                debug!(pid = ?handle.pid(), "Flushing output of exited task");
                handle.flush().await;
            }
        }
    }

    fn escalation(&self, exit_code: i32) -> Option<Escalation> {
        (exit_code != 0 && !self.spec.ignore_failure()).then(|| Escalation {
            command: self.spec.command().to_string(),
            exit_code,
        })
    }

    fn spawn_request(&self) -> SpawnRequest {
        SpawnRequest {
            command: self.spec.command().to_string(),
            working_dir: self.working_dir.clone(),
            stdout: Arc::clone(&self.stdout),
            stderr: Arc::clone(&self.stderr),
            isolation: self.isolation,
            span: self.span.clone(),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.spec.command())
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("command", &self.spec.command())
            .field("background", &self.spec.is_background())
            .field("exit_code", &self.exit_code())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::output_sink::mocks::RecordingSink;
    use crate::port::process_supervisor::mocks::{MockBehavior, MockProcessSupervisor};
    use crate::AppError;
    use tokio_test::assert_ok;

    fn task(spec: TaskSpec, supervisor: &Arc<MockProcessSupervisor>) -> Task {
        let supervisor: Arc<dyn ProcessSupervisor> = supervisor.clone();
        Task::new(spec, "/tmp", supervisor, Span::none())
    }

    fn foreground(command: &str, ignore_failure: bool) -> TaskSpec {
        TaskSpec::new(command)
            .unwrap()
            .with_ignore_failure(ignore_failure)
    }

    fn background(command: &str, ignore_failure: bool) -> TaskSpec {
        foreground(command, ignore_failure).with_background(true)
    }

    #[tokio::test]
    async fn test_foreground_tolerated_failure_records_exit_code() {
        let supervisor = Arc::new(MockProcessSupervisor::exiting(7));
        let mut task = task(foreground("exit 7", true), &supervisor);

        let outcome = assert_ok!(task.start().await);

        assert_eq!(outcome, Outcome::Continue);
        assert_eq!(task.exit_code(), Some(7));
        assert!(!task.is_running());
        assert_eq!(supervisor.counters().waits, 1);
    }

    #[tokio::test]
    async fn test_foreground_strict_success_continues() {
        let supervisor = Arc::new(MockProcessSupervisor::exiting(0));
        let mut task = task(foreground("exit 0", false), &supervisor);

        assert_eq!(task.start().await.unwrap(), Outcome::Continue);
        assert_eq!(task.exit_code(), Some(0));
    }

    #[tokio::test]
    async fn test_foreground_strict_failure_aborts_run() {
        let supervisor = Arc::new(MockProcessSupervisor::exiting(7));
        let mut task = task(foreground("exit 7", false), &supervisor);

        let outcome = task.start().await.unwrap();

        assert_eq!(
            outcome,
            Outcome::AbortRun(Escalation {
                command: "exit 7".to_string(),
                exit_code: 7
            })
        );
    }

    #[tokio::test]
    async fn test_spawn_failure_is_an_error() {
        let supervisor = Arc::new(MockProcessSupervisor::new(MockBehavior::SpawnFails(
            "no shell".to_string(),
        )));
        let mut task = task(foreground("true", true), &supervisor);

        let result = task.start().await;

        assert!(matches!(result, Err(AppError::Execution(_))));
        assert_eq!(task.exit_code(), None);
    }

    #[tokio::test]
    async fn test_spawn_request_carries_task_settings() {
        let supervisor = Arc::new(MockProcessSupervisor::exiting(0));
        let stdout = Arc::new(RecordingSink::new());
        let stderr = Arc::new(RecordingSink::new());
        let mut task = task(foreground("echo hi | cat", true), &supervisor)
            .with_sinks(stdout.clone(), stderr.clone())
            .with_isolation(Isolation::SingleProcess);

        let _ = task.start().await.unwrap();

        let request = supervisor.last_request().unwrap();
        assert_eq!(request.command, "echo hi | cat");
        assert_eq!(request.working_dir, PathBuf::from("/tmp"));
        assert_eq!(request.isolation, Isolation::SingleProcess);
        request.stdout.write_text("out");
        request.stderr.write_text("err");
        assert_eq!(stdout.lines(), vec!["out".to_string()]);
        assert_eq!(stderr.lines(), vec!["err".to_string()]);
    }

    #[tokio::test]
    async fn test_background_start_does_not_block() {
        let supervisor = Arc::new(MockProcessSupervisor::never_exiting());
        let mut task = task(background("sleep 100", true), &supervisor);

        assert_eq!(task.start().await.unwrap(), Outcome::Continue);

        assert!(task.is_running());
        assert!(task.pid().is_some());
        assert_eq!(task.exit_code(), None);
        assert_eq!(supervisor.counters().waits, 0);
    }

    #[tokio::test]
    async fn test_second_start_does_not_spawn_again() {
        let supervisor = Arc::new(MockProcessSupervisor::never_exiting());
        let mut task = task(background("sleep 100", true), &supervisor);

        let _ = task.start().await.unwrap();
        let pid = task.pid();
        let _ = task.start().await.unwrap();

        assert_eq!(supervisor.counters().spawns, 1);
        assert_eq!(supervisor.counters().polls, 1);
        assert_eq!(task.pid(), pid);
    }

    #[tokio::test]
    async fn test_second_start_reports_failure_found_by_check() {
        let supervisor = Arc::new(MockProcessSupervisor::exiting(3));
        let mut task = task(background("exit 3", false), &supervisor);

        let _ = task.start().await.unwrap();
        let outcome = task.start().await.unwrap();

        assert!(outcome.is_abort());
        assert_eq!(supervisor.counters().spawns, 1);
    }

    #[tokio::test]
    async fn test_finished_task_is_not_restarted() {
        let supervisor = Arc::new(MockProcessSupervisor::exiting(0));
        let mut task = task(foreground("true", true), &supervisor);

        let _ = task.start().await.unwrap();
        let _ = task.start().await.unwrap();

        assert_eq!(supervisor.counters().spawns, 1);
    }

    #[tokio::test]
    async fn test_check_polls_until_exit_then_stops_polling() {
        let supervisor = Arc::new(MockProcessSupervisor::exiting_after(0, 3));
        let mut task = task(background("sleep 1", true), &supervisor);
        let _ = task.start().await.unwrap();

        assert_eq!(task.check().unwrap(), Progress::Running);
        assert_eq!(task.check().unwrap(), Progress::Running);
        assert_eq!(task.check().unwrap(), Progress::Finished);
        assert_eq!(task.exit_code(), Some(0));
        assert!(!task.is_running());

        assert_eq!(task.check().unwrap(), Progress::Finished);
        assert_eq!(task.check().unwrap(), Progress::Finished);
        assert_eq!(supervisor.counters().polls, 3);
    }

    #[tokio::test]
    async fn test_check_escalates_strict_background_failure_once() {
        let supervisor = Arc::new(MockProcessSupervisor::exiting(2));
        let mut task = task(background("exit 2", false), &supervisor);
        let _ = task.start().await.unwrap();

        assert!(matches!(task.check().unwrap(), Progress::AbortRun(_)));
        assert_eq!(task.check().unwrap(), Progress::Finished);
    }

    #[tokio::test]
    async fn test_check_on_foreground_task_never_polls() {
        let supervisor = Arc::new(MockProcessSupervisor::exiting(0));
        let mut task = task(foreground("true", true), &supervisor);

        assert_eq!(task.check().unwrap(), Progress::Finished);
        let _ = task.start().await.unwrap();
        assert_eq!(task.check().unwrap(), Progress::Finished);

        assert_eq!(supervisor.counters().polls, 0);
    }

    #[tokio::test]
    async fn test_shutdown_terminates_live_process_and_clears_handle() {
        let supervisor = Arc::new(MockProcessSupervisor::never_exiting());
        let mut task = task(background("sleep 100", false), &supervisor);
        let _ = task.start().await.unwrap();
        assert_eq!(task.check().unwrap(), Progress::Running);

        let outcome = task.shutdown().await.unwrap();

        assert_eq!(outcome, Outcome::Continue);
        assert_eq!(supervisor.counters().terminates, 1);
        assert!(!task.is_running());
        assert!(task.is_shut_down());
        assert_eq!(task.exit_code(), None);
    }

    #[tokio::test]
    async fn test_shutdown_of_exited_process_does_not_terminate() {
        let supervisor = Arc::new(MockProcessSupervisor::exiting(0));
        let mut task = task(background("true", true), &supervisor);
        let _ = task.start().await.unwrap();

        assert_eq!(task.shutdown().await.unwrap(), Outcome::Continue);

        assert_eq!(supervisor.counters().terminates, 0);
        assert_eq!(task.exit_code(), Some(0));
    }

    #[tokio::test]
    async fn test_shutdown_flushes_output_of_task_that_exited_during_check() {
        let supervisor = Arc::new(MockProcessSupervisor::exiting(0));
        let mut task = task(background("seq 1 3000", true), &supervisor);
        let _ = task.start().await.unwrap();

        assert_eq!(task.check().unwrap(), Progress::Finished);
        assert_eq!(supervisor.counters().flushes, 0);

        assert_eq!(task.shutdown().await.unwrap(), Outcome::Continue);
        assert_eq!(supervisor.counters().flushes, 1);
        assert_eq!(supervisor.counters().terminates, 0);

        let _ = task.shutdown().await.unwrap();
        assert_eq!(supervisor.counters().flushes, 1);
    }

    #[tokio::test]
    async fn test_second_start_flushes_once_exit_is_seen() {
        let supervisor = Arc::new(MockProcessSupervisor::exiting(0));
        let mut task = task(background("true", true), &supervisor);

        let _ = task.start().await.unwrap();
        let _ = task.start().await.unwrap();

        assert_eq!(task.exit_code(), Some(0));
        assert_eq!(supervisor.counters().flushes, 1);
    }

    #[tokio::test]
    async fn test_shutdown_escalates_failure_first_seen_during_shutdown() {
        let supervisor = Arc::new(MockProcessSupervisor::exiting(5));
        let mut task = task(background("exit 5", false), &supervisor);
        let _ = task.start().await.unwrap();

        let outcome = task.shutdown().await.unwrap();

        assert_eq!(
            outcome,
            Outcome::AbortRun(Escalation {
                command: "exit 5".to_string(),
                exit_code: 5
            })
        );
    }

    #[tokio::test]
    async fn test_shutdown_escalates_only_once() {
        let supervisor = Arc::new(MockProcessSupervisor::exiting(5));
        let mut task = task(background("exit 5", false), &supervisor);
        let _ = task.start().await.unwrap();

        assert!(task.shutdown().await.unwrap().is_abort());
        assert_eq!(task.shutdown().await.unwrap(), Outcome::Continue);
    }

    #[tokio::test]
    async fn test_shutdown_tolerates_failure_when_ignored() {
        let supervisor = Arc::new(MockProcessSupervisor::exiting(5));
        let mut task = task(background("exit 5", true), &supervisor);
        let _ = task.start().await.unwrap();

        assert_eq!(task.shutdown().await.unwrap(), Outcome::Continue);
        assert_eq!(task.exit_code(), Some(5));
    }

    #[tokio::test]
    async fn test_failed_termination_still_clears_handle() {
        let supervisor = Arc::new(MockProcessSupervisor::new(MockBehavior::Unkillable));
        let mut task = task(background("trap '' TERM; sleep 100", false), &supervisor);
        let _ = task.start().await.unwrap();

        let outcome = task.shutdown().await.unwrap();

        assert_eq!(outcome, Outcome::Continue);
        assert!(!task.is_running());
        assert_eq!(supervisor.counters().terminates, 1);
    }

    #[tokio::test]
    async fn test_start_after_shutdown_is_inert() {
        let supervisor = Arc::new(MockProcessSupervisor::exiting(0));
        let mut task = task(background("true", true), &supervisor);

        let _ = task.shutdown().await.unwrap();
        let _ = task.start().await.unwrap();

        assert_eq!(supervisor.counters().spawns, 0);
    }

    #[test]
    fn test_display_is_command() {
        let supervisor = Arc::new(MockProcessSupervisor::exiting(0));
        let task = task(foreground("echo hi", true), &supervisor);

        assert_eq!(task.to_string(), "echo hi");
    }
}
