//! Shellexec - Main Entry Point
//! Drives the configured stages the way a test host would:
//! prepare -> startup -> check (until ready) -> shutdown -> post-process

mod logging;
mod settings;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{error, info, info_span, warn};

use shellexec_core::application::StageRunner;
use shellexec_core::domain::{Escalation, Outcome, Progress};
use shellexec_core::VERSION;
use shellexec_infra_system::ShellProcessSupervisor;

#[derive(Parser, Debug)]
#[command(name = "shellexec")]
#[command(about = "Run shell commands around a test session", long_about = None)]
#[command(version)]
struct Cli {
    /// Stage configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "SHELLEXEC_CONFIG")]
    config: PathBuf,

    /// Working directory for every command (`~` is expanded)
    #[arg(long, env = "SHELLEXEC_ARTIFACTS_DIR", default_value = ".")]
    artifacts_dir: String,

    /// Delay between check rounds
    #[arg(long, default_value_t = 1000)]
    check_interval_ms: u64,

    /// Keep checking for this long instead of stopping once all tasks finish
    #[arg(long)]
    hold_for_secs: Option<u64>,

    /// Also write logs to `shellexec.log` in the artifacts directory
    #[arg(long)]
    log_file: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Resolve artifacts directory
    let artifacts_dir = PathBuf::from(shellexpand::tilde(&cli.artifacts_dir).into_owned());
    std::fs::create_dir_all(&artifacts_dir).with_context(|| {
        format!(
            "Failed to create artifacts directory {}",
            artifacts_dir.display()
        )
    })?;

    // 2. Initialize logging
    let _log_guard = logging::init(cli.log_file.then_some(artifacts_dir.as_path()))?;

    info!("Shellexec v{} starting...", VERSION);

    // 3. Load configuration
    info!(config = %cli.config.display(), "Loading stage configuration...");
    let config = settings::load(&cli.config)?;

    // 4. Setup dependencies (DI wiring)
    let supervisor = Arc::new(ShellProcessSupervisor::new());
    let mut runner = StageRunner::new(config, &artifacts_dir, supervisor).with_span(info_span!(
        "shellexec",
        config = %cli.config.display()
    ));

    let host = HostLoop {
        check_interval: Duration::from_millis(cli.check_interval_ms),
        hold_for: cli.hold_for_secs.map(Duration::from_secs),
    };

    // 5. Run stages, then always tear down
    let run = host.run(&mut runner).await;
    let teardown = teardown(&mut runner).await;

    let escalation = match (run, teardown) {
        (Err(e), teardown) => {
            if let Err(te) = teardown {
                error!(error = %te, "Teardown failed");
            }
            return Err(e);
        }
        (Ok(run_escalation), teardown) => run_escalation.or(teardown?),
    };

    if let Some(escalation) = escalation {
        error!(
            command = %escalation.command,
            exit_code = escalation.exit_code,
            "Run aborted"
        );
        anyhow::bail!("Run aborted: {}", escalation);
    }

    info!("Shutdown complete.");

    Ok(())
}

/// Readiness policy of the host driving the stages
struct HostLoop {
    check_interval: Duration,
    hold_for: Option<Duration>,
}

impl HostLoop {
    /// Run prepare, startup and the check loop
    ///
    /// Returns the escalation that stopped the run early, if any. Ctrl+C ends
    /// the check loop like readiness does.
    async fn run(&self, runner: &mut StageRunner) -> Result<Option<Escalation>> {
        info!("Running prepare stage...");
        if let Outcome::AbortRun(escalation) = runner.prepare().await? {
            return Ok(Some(escalation));
        }

        info!("Running startup stage...");
        if let Outcome::AbortRun(escalation) = runner.startup().await? {
            return Ok(Some(escalation));
        }

        info!("Checking tasks...");
        let started = Instant::now();

        loop {
            let progress = runner.check().await?;
            if let Progress::AbortRun(escalation) = progress {
                return Ok(Some(escalation));
            }

            if self.is_ready(&progress, started.elapsed()) {
                info!("Host ready");
                return Ok(None);
            }

            tokio::select! {
                _ = sleep(self.check_interval) => {}
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        warn!(error = %e, "Failed to listen for Ctrl+C");
                    }
                    info!("Shutdown signal received");
                    return Ok(None);
                }
            }
        }
    }

    fn is_ready(&self, progress: &Progress, elapsed: Duration) -> bool {
        match self.hold_for {
            Some(hold_for) => elapsed >= hold_for,
            None => progress.is_finished(),
        }
    }
}

/// Shutdown then post-process; both always run
///
/// Returns the first escalation either stage reported.
async fn teardown(runner: &mut StageRunner) -> Result<Option<Escalation>> {
    info!("Running shutdown stage...");
    let shutdown = runner.shutdown().await;

    info!("Running post-process stage...");
    let post_process = runner.post_process().await?;

    let mut escalation = match shutdown? {
        Outcome::AbortRun(escalation) => Some(escalation),
        Outcome::Continue => None,
    };
    if let Outcome::AbortRun(late) = post_process {
        escalation.get_or_insert(late);
    }

    Ok(escalation)
}
