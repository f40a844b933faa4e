// Shell process supervisor
// reason: tokio for non-blocking child handling and output draining, nix for group signals
use async_trait::async_trait;
use std::ffi::OsString;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn, Instrument, Span};

use shellexec_core::application::constants::{OUTPUT_FLUSH_TIMEOUT, TERMINATE_POLL_INTERVAL};
use shellexec_core::port::{
    Isolation, OutputSink, ProcessHandle, ProcessSupervisor, SpawnRequest, SupervisorError,
};

#[cfg(unix)]
const DEFAULT_SHELL: (&str, &str) = ("sh", "-c");
#[cfg(not(unix))]
const DEFAULT_SHELL: (&str, &str) = ("cmd", "/C");

/// Shell process supervisor
///
/// The command text is handed to a shell (`sh -c` / `cmd /C`) verbatim, so
/// pipes, redirection and variable expansion work, and so does everything else
/// a shell can do. Commands must come from trusted configuration.
///
/// Children get a null stdin and piped stdout/stderr that are drained line by
/// line into the request's sinks. Rust opens every descriptor close-on-exec, so
/// nothing else leaks into the child.
pub struct ShellProcessSupervisor {
    shell: OsString,
    shell_flag: OsString,
    flush_timeout: Duration,
}

impl ShellProcessSupervisor {
    /// Create a supervisor using the platform shell
    ///
    /// # Example
    /// ```ignore
    /// let supervisor = ShellProcessSupervisor::new();
    /// let handle = supervisor.spawn(request)?;
    /// ```
    pub fn new() -> Self {
        Self {
            shell: DEFAULT_SHELL.0.into(),
            shell_flag: DEFAULT_SHELL.1.into(),
            flush_timeout: OUTPUT_FLUSH_TIMEOUT,
        }
    }

    /// How long `wait`/`terminate` wait for output drains after exit
    pub fn with_flush_timeout(mut self, flush_timeout: Duration) -> Self {
        self.flush_timeout = flush_timeout;
        self
    }

    fn build_command(&self, request: &SpawnRequest) -> Command {
        let mut command = Command::new(&self.shell);
        command
            .arg(&self.shell_flag)
            .arg(&request.command)
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        #[cfg(unix)]
        {
            if request.isolation == Isolation::ProcessGroup {
                // New group led by the child: pgid == pid
                command.process_group(0);
            }
        }

        command
    }
}

impl Default for ShellProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor for ShellProcessSupervisor {
    fn spawn(&self, request: SpawnRequest) -> Result<Box<dyn ProcessHandle>, SupervisorError> {
        let mut child = self.build_command(&request).spawn().map_err(|e| {
            SupervisorError::SpawnFailed(format!(
                "`{}` in {}: {}",
                request.command,
                request.working_dir.display(),
                e
            ))
        })?;
        let pid = child.id();

        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(drain(stdout, Arc::clone(&request.stdout), request.span.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(drain(stderr, Arc::clone(&request.stderr), request.span.clone()));
        }

        debug!(
            pid = ?pid,
            isolation = ?request.isolation,
            working_dir = %request.working_dir.display(),
            "Spawned shell process"
        );

        Ok(Box::new(ShellProcess {
            child,
            pid,
            isolation: request.isolation,
            drains,
            flush_timeout: self.flush_timeout,
            exit_code: None,
        }))
    }
}

/// Forward everything a stream produces into a sink, one record per line
///
/// Invalid UTF-8 is replaced, never dropped. The drain ends at EOF, which can
/// come after the child exits if a descendant still holds the pipe.
fn drain<R>(reader: R, sink: Arc<dyn OutputSink>, span: Span) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(
        async move {
            let mut reader = BufReader::new(reader);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line);
                        sink.write_text(text.trim_end_matches(&['\r', '\n'][..]));
                    }
                    Err(e) => {
                        warn!(error = %e, "Output drain failed");
                        break;
                    }
                }
            }
        }
        .instrument(span),
    )
}

/// Map an exit status to a code: normal exits keep theirs, death by signal N is -N
fn exit_code_of(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    status.code().unwrap_or(-1)
}

/// One spawned shell and its output drains
pub struct ShellProcess {
    child: Child,
    pid: Option<u32>,
    isolation: Isolation,
    drains: Vec<JoinHandle<()>>,
    flush_timeout: Duration,
    exit_code: Option<i32>,
}

impl ShellProcess {
    /// Wait for the drains to reach EOF, bounded by the flush timeout
    async fn flush_output(&mut self) {
        let deadline = Instant::now() + self.flush_timeout;
        for handle in self.drains.drain(..) {
            if timeout_at(deadline, handle).await.is_err() {
                debug!(
                    pid = ?self.pid,
                    "Output still open after exit, draining in background"
                );
            }
        }
    }

    fn record(&mut self, status: ExitStatus) -> i32 {
        let code = exit_code_of(status);
        self.exit_code = Some(code);
        code
    }

    /// Deliver a signal to the child (or its whole group); a vanished target is fine
    #[cfg(unix)]
    fn signal(&self, pid: u32, signal: nix::sys::signal::Signal) -> Result<(), SupervisorError> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, killpg};
        use nix::unistd::Pid;

        let target = Pid::from_raw(pid as i32);
        let result = match self.isolation {
            Isolation::ProcessGroup => killpg(target, signal),
            Isolation::SingleProcess => kill(target, signal),
        };
        match result {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(SupervisorError::TerminateFailed(format!(
                "{:?} to {} failed: {}",
                signal, pid, e
            ))),
        }
    }

    /// SIGTERM, poll until `grace` runs out, then SIGKILL and reap
    ///
    /// `None` when the exit status could not be observed; the kill is still sent.
    #[cfg(unix)]
    async fn terminate_unix(
        &mut self,
        pid: u32,
        grace: Duration,
    ) -> Result<Option<i32>, SupervisorError> {
        use nix::sys::signal::Signal;

        info!(pid = %pid, isolation = ?self.isolation, "Sending SIGTERM");
        self.signal(pid, Signal::SIGTERM)?;

        let deadline = Instant::now() + grace;
        let code = loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    info!(pid = %pid, "Process exited after SIGTERM");
                    break Some(self.record(status));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        pid = %pid,
                        error = %e,
                        "Lost track of process status, sending SIGKILL"
                    );
                    self.signal(pid, Signal::SIGKILL)?;
                    break None;
                }
            }
            if Instant::now() >= deadline {
                warn!(pid = %pid, "Process did not exit after SIGTERM, sending SIGKILL");
                self.signal(pid, Signal::SIGKILL)?;
                let status = self.child.wait().await?;
                break Some(self.record(status));
            }
            sleep(TERMINATE_POLL_INTERVAL).await;
        };

        if self.isolation == Isolation::ProcessGroup {
            // The leader is gone; make sure nothing it started lingers
            self.signal(pid, Signal::SIGKILL)?;
        }
        Ok(code)
    }
}

#[async_trait]
impl ProcessHandle for ShellProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn poll(&mut self) -> Result<Option<i32>, SupervisorError> {
        if self.exit_code.is_some() {
            return Ok(self.exit_code);
        }
        match self.child.try_wait() {
            Ok(Some(status)) => Ok(Some(self.record(status))),
            Ok(None) => Ok(None),
            Err(e) => Err(SupervisorError::PollFailed(e.to_string())),
        }
    }

    async fn wait(&mut self) -> Result<i32, SupervisorError> {
        let code = match self.exit_code {
            Some(code) => code,
            None => {
                let status = self.child.wait().await?;
                self.record(status)
            }
        };
        self.flush_output().await;
        Ok(code)
    }

    async fn flush(&mut self) {
        self.flush_output().await;
    }

    async fn terminate(&mut self, grace: Duration) -> Result<Option<i32>, SupervisorError> {
        match self.poll() {
            Ok(Some(code)) => {
                debug!(
                    pid = ?self.pid,
                    exit_code = code,
                    "Process already exited, nothing to terminate"
                );
                self.flush_output().await;
                return Ok(Some(code));
            }
            Ok(None) => {}
            // Status unknown: signal anyway, a gone target is tolerated
            Err(e) => warn!(
                pid = ?self.pid,
                error = %e,
                "Could not poll process before terminating"
            ),
        }
        let Some(pid) = self.pid else {
            return Ok(self.exit_code);
        };

        #[cfg(unix)]
        let code = self.terminate_unix(pid, grace).await?;

        #[cfg(not(unix))]
        let code = {
            // No process groups: best-effort kill of the shell itself
            let _ = grace;
            info!(pid = %pid, "Killing process");
            self.child
                .kill()
                .await
                .map_err(|e| SupervisorError::TerminateFailed(e.to_string()))?;
            let status = self.child.wait().await?;
            Some(self.record(status))
        };

        self.flush_output().await;
        Ok(code)
    }
}
