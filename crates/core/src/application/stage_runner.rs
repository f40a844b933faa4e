// Stage Runner - drives configured tasks from the host engine's lifecycle hooks

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, info_span, Span};

use super::task::Task;
use crate::domain::{Outcome, Progress, ShellExecConfig, Stage};
use crate::error::{AppError, Result};
use crate::port::ProcessSupervisor;

/// Five ordered task lists, one per stage
///
/// Hooks are expected in host order: prepare, startup, check (repeatedly),
/// shutdown, post_process. A start-side escalation stops the hook at once;
/// teardown hooks stop every task first and then report the first escalation.
pub struct StageRunner {
    config: ShellExecConfig,
    working_dir: PathBuf,
    supervisor: Arc<dyn ProcessSupervisor>,
    span: Span,
    prepare_tasks: Vec<Task>,
    startup_tasks: Vec<Task>,
    check_tasks: Vec<Task>,
    shutdown_tasks: Vec<Task>,
    postprocess_tasks: Vec<Task>,
    loaded: bool,
}

impl StageRunner {
    /// Create a runner
    ///
    /// # Arguments
    /// * `config` - Stage lists as read from configuration
    /// * `working_dir` - Artifacts directory every command runs in
    /// * `supervisor` - Process backend shared by all tasks
    pub fn new(
        config: ShellExecConfig,
        working_dir: impl Into<PathBuf>,
        supervisor: Arc<dyn ProcessSupervisor>,
    ) -> Self {
        Self {
            config,
            working_dir: working_dir.into(),
            supervisor,
            span: info_span!("shellexec"),
            prepare_tasks: Vec::new(),
            startup_tasks: Vec::new(),
            check_tasks: Vec::new(),
            shutdown_tasks: Vec::new(),
            postprocess_tasks: Vec::new(),
            loaded: false,
        }
    }

    /// Parent span for all task spans
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn tasks(&self, stage: Stage) -> &[Task] {
        match stage {
            Stage::Prepare => &self.prepare_tasks,
            Stage::Startup => &self.startup_tasks,
            Stage::Check => &self.check_tasks,
            Stage::Shutdown => &self.shutdown_tasks,
            Stage::PostProcess => &self.postprocess_tasks,
        }
    }

    fn tasks_mut(&mut self, stage: Stage) -> &mut Vec<Task> {
        match stage {
            Stage::Prepare => &mut self.prepare_tasks,
            Stage::Startup => &mut self.startup_tasks,
            Stage::Check => &mut self.check_tasks,
            Stage::Shutdown => &mut self.shutdown_tasks,
            Stage::PostProcess => &mut self.postprocess_tasks,
        }
    }

    /// Load every stage list, then start the prepare tasks
    ///
    /// # Errors
    /// - AppError::Config if any entry lacks a command; nothing is spawned then
    /// - AppError::Execution if a prepare task cannot be spawned
    pub async fn prepare(&mut self) -> Result<Outcome> {
        self.load_tasks()?;
        self.start_stage(Stage::Prepare).await
    }

    /// Start the startup tasks
    pub async fn startup(&mut self) -> Result<Outcome> {
        self.ensure_loaded()?;
        self.start_stage(Stage::Startup).await
    }

    /// Start the check tasks, then poll prepare, startup and check tasks
    ///
    /// Returns `Finished` only when every polled task has finished. The host
    /// merges this with its own readiness.
    pub async fn check(&mut self) -> Result<Progress> {
        self.ensure_loaded()?;
        if let Outcome::AbortRun(escalation) = self.start_stage(Stage::Check).await? {
            return Ok(Progress::AbortRun(escalation));
        }

        let mut all_finished = true;
        for stage in [Stage::Prepare, Stage::Startup, Stage::Check] {
            for task in self.tasks_mut(stage).iter_mut() {
                match task.check()? {
                    Progress::Running => all_finished = false,
                    Progress::Finished => {}
                    abort @ Progress::AbortRun(_) => return Ok(abort),
                }
            }
        }

        Ok(if all_finished {
            Progress::Finished
        } else {
            Progress::Running
        })
    }

    /// Stop check and startup tasks, then start the shutdown tasks
    pub async fn shutdown(&mut self) -> Result<Outcome> {
        let stopped = self.shutdown_stages(&[Stage::Check, Stage::Startup]).await?;
        if stopped.is_abort() {
            return Ok(stopped);
        }
        self.start_stage(Stage::Shutdown).await
    }

    /// Stop everything still alive, run the post-process tasks, drop all tasks
    pub async fn post_process(&mut self) -> Result<Outcome> {
        let mut outcome = self
            .shutdown_stages(&[
                Stage::Shutdown,
                Stage::Check,
                Stage::Startup,
                Stage::Prepare,
            ])
            .await?;

        for task in self.postprocess_tasks.iter_mut() {
            if outcome.is_abort() {
                // never started, only marked inert
                let _ = task.shutdown().await?;
                continue;
            }
            let started = task.start().await?;
            let stopped = task.shutdown().await?;
            if started.is_abort() {
                outcome = started;
            } else if stopped.is_abort() {
                outcome = stopped;
            }
        }

        for stage in Stage::ALL {
            self.tasks_mut(stage).clear();
        }
        debug!("All stage tasks discarded");
        Ok(outcome)
    }

    fn load_tasks(&mut self) -> Result<()> {
        // Validate everything before building anything
        let mut loaded = Vec::with_capacity(Stage::ALL.len());
        for stage in Stage::ALL {
            loaded.push((stage, self.config.task_specs(stage)?));
        }

        let grace = self.config.shutdown_grace();
        for (stage, specs) in loaded {
            let tasks: Vec<Task> = specs
                .into_iter()
                .map(|spec| {
                    let span = info_span!(
                        parent: &self.span,
                        "task",
                        stage = %stage,
                        command = %spec.command()
                    );
                    debug!(task = %spec, stage = %stage, "Added task");
                    Task::new(spec, self.working_dir.clone(), Arc::clone(&self.supervisor), span)
                        .with_shutdown_grace(grace)
                })
                .collect();
            *self.tasks_mut(stage) = tasks;
        }

        self.loaded = true;
        info!(
            prepare = self.prepare_tasks.len(),
            startup = self.startup_tasks.len(),
            check = self.check_tasks.len(),
            shutdown = self.shutdown_tasks.len(),
            post_process = self.postprocess_tasks.len(),
            "Stage tasks loaded"
        );
        Ok(())
    }

    fn ensure_loaded(&self) -> Result<()> {
        if self.loaded {
            Ok(())
        } else {
            Err(AppError::InvalidState(
                "stage tasks are not loaded, call prepare first".to_string(),
            ))
        }
    }

    async fn start_stage(&mut self, stage: Stage) -> Result<Outcome> {
        for task in self.tasks_mut(stage).iter_mut() {
            let outcome = task.start().await?;
            if outcome.is_abort() {
                return Ok(outcome);
            }
        }
        Ok(Outcome::Continue)
    }

    async fn shutdown_stages(&mut self, stages: &[Stage]) -> Result<Outcome> {
        let mut first_abort = Outcome::Continue;
        for &stage in stages {
            for task in self.tasks_mut(stage).iter_mut() {
                let outcome = task.shutdown().await?;
                if !first_abort.is_abort() {
                    first_abort = outcome;
                }
            }
        }
        Ok(first_abort)
    }
}
