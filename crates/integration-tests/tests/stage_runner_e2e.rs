//! StageRunner end-to-end against real shell processes
//!
//! Each test gets its own artifacts directory; commands record the order they
//! ran in by appending to `order.log` there.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use shellexec_core::application::StageRunner;
use shellexec_core::domain::{Outcome, Progress, ShellExecConfig, Stage};
use shellexec_core::AppError;
use shellexec_infra_system::ShellProcessSupervisor;

fn artifacts_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("shellexec_e2e_{}", name));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn runner(dir: &Path, config: serde_json::Value) -> StageRunner {
    let config: ShellExecConfig = serde_json::from_value(config).unwrap();
    StageRunner::new(config, dir, Arc::new(ShellProcessSupervisor::new()))
}

fn order(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("order.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_full_session_runs_stages_in_order() {
    let dir = artifacts_dir("full_session");
    let mut runner = runner(
        &dir,
        serde_json::json!({
            "prepare": "echo prepare >> order.log",
            "startup": [
                {"command": "sleep 100", "background": true},
                "echo startup >> order.log"
            ],
            "check": {"command": "test -f order.log", "ignore-failure": false},
            "shutdown": "echo shutdown >> order.log",
            "post-process": ["echo post >> order.log"],
            "shutdown-grace-ms": 1000
        }),
    );

    assert!(matches!(runner.prepare().await.unwrap(), Outcome::Continue));
    assert!(matches!(runner.startup().await.unwrap(), Outcome::Continue));

    // The background server keeps the session from finishing
    assert!(matches!(runner.check().await.unwrap(), Progress::Running));
    let server_pid = runner.tasks(Stage::Startup)[0].pid().unwrap();

    assert!(matches!(runner.shutdown().await.unwrap(), Outcome::Continue));
    assert!(matches!(
        runner.post_process().await.unwrap(),
        Outcome::Continue
    ));

    assert_eq!(order(&dir), vec!["prepare", "startup", "shutdown", "post"]);
    assert!(runner.tasks(Stage::Startup).is_empty());

    let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(server_pid as i32), None);
    assert_eq!(alive, Err(nix::errno::Errno::ESRCH));
}

#[tokio::test]
async fn test_check_finishes_when_everything_exits() {
    let dir = artifacts_dir("check_finishes");
    let mut runner = runner(
        &dir,
        serde_json::json!({
            "startup": {"command": "sleep 0.1", "background": true}
        }),
    );

    assert!(matches!(runner.prepare().await.unwrap(), Outcome::Continue));
    assert!(matches!(runner.startup().await.unwrap(), Outcome::Continue));

    let mut finished = false;
    for _ in 0..100 {
        if runner.check().await.unwrap().is_finished() {
            finished = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert!(finished);
    assert!(matches!(runner.shutdown().await.unwrap(), Outcome::Continue));
    assert!(matches!(
        runner.post_process().await.unwrap(),
        Outcome::Continue
    ));
}

#[tokio::test]
async fn test_strict_startup_failure_aborts_and_still_tears_down() {
    let dir = artifacts_dir("strict_startup");
    let mut runner = runner(
        &dir,
        serde_json::json!({
            "prepare": {"command": "sleep 100", "background": true},
            "startup": [
                {"command": "exit 9", "ignore-failure": false},
                "echo never >> order.log"
            ],
            "post-process": "echo post >> order.log"
        }),
    );

    assert!(matches!(runner.prepare().await.unwrap(), Outcome::Continue));
    let prepare_pid = runner.tasks(Stage::Prepare)[0].pid().unwrap();

    match runner.startup().await.unwrap() {
        Outcome::AbortRun(escalation) => {
            assert_eq!(escalation.command, "exit 9");
            assert_eq!(escalation.exit_code, 9);
        }
        Outcome::Continue => panic!("expected escalation"),
    }

    // Teardown still reaches the stray background task
    assert!(runner.shutdown().await.unwrap().is_abort());
    assert!(matches!(runner.post_process().await.unwrap(), Outcome::Continue));

    // Skipped startup entry never ran; post-process still did
    assert_eq!(order(&dir), vec!["post"]);
    let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(prepare_pid as i32), None);
    assert_eq!(alive, Err(nix::errno::Errno::ESRCH));
}

#[tokio::test]
async fn test_ignored_failures_do_not_abort() {
    let dir = artifacts_dir("ignored_failures");
    let mut runner = runner(
        &dir,
        serde_json::json!({
            "prepare": "exit 7",
            "startup": "false",
            "post-process": "echo post >> order.log"
        }),
    );

    assert!(matches!(runner.prepare().await.unwrap(), Outcome::Continue));
    assert!(matches!(runner.startup().await.unwrap(), Outcome::Continue));
    assert!(runner.check().await.unwrap().is_finished());
    assert!(matches!(runner.shutdown().await.unwrap(), Outcome::Continue));
    assert!(matches!(
        runner.post_process().await.unwrap(),
        Outcome::Continue
    ));

    assert_eq!(order(&dir), vec!["post"]);
}

#[tokio::test]
async fn test_missing_command_rejected_before_spawning() {
    let dir = artifacts_dir("missing_command");
    let mut runner = runner(
        &dir,
        serde_json::json!({
            "prepare": "echo prepare >> order.log",
            "shutdown": [{"background": true}]
        }),
    );

    let result = runner.prepare().await;

    assert!(matches!(result, Err(AppError::Config(_))));
    assert!(order(&dir).is_empty());
}
