/*!
 * Integration tests for supervised child processes
 */

#![cfg(unix)]

use std::path::Path;
use std::time::{Duration, Instant};

use videoscribe::cancel::CancellationToken;
use videoscribe::errors::ProcessError;
use videoscribe::process_runner::{self, OutputStream, ProcessSpec};

use crate::common;

fn shell(script: &str) -> ProcessSpec {
    ProcessSpec::new("sh").arg("-c").arg(script)
}

/// Whether a pid is still a live (non-zombie) process
fn is_running(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/status", pid)) {
        Ok(status) => !status
            .lines()
            .any(|l| l.starts_with("State:") && (l.contains('Z') || l.contains('X'))),
        Err(_) => false,
    }
}

async fn wait_for_pid_file(path: &Path) -> u32 {
    for _ in 0..100 {
        if let Ok(content) = std::fs::read_to_string(path) {
            if let Ok(pid) = content.trim().parse() {
                return pid;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("pid file {:?} never appeared", path);
}

#[tokio::test]
async fn test_run_shouldStreamBothPipes() {
    let mut seen = Vec::new();
    let outcome = process_runner::run(
        &shell("echo out; echo err 1>&2; echo done"),
        |stream, line| seen.push((stream, line.to_string())),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(outcome.status.success());
    assert!(seen.contains(&(OutputStream::Stdout, "out".to_string())));
    assert!(seen.contains(&(OutputStream::Stderr, "err".to_string())));
    assert_eq!(outcome.tail.len(), 3);
}

#[tokio::test]
async fn test_run_withNonzeroExit_shouldCarryTail() {
    let result = process_runner::run(
        &shell("echo 'model missing' 1>&2; exit 3"),
        |_, _| {},
        &CancellationToken::new(),
    )
    .await;

    match result {
        Err(ProcessError::NonzeroExit { code, tail, .. }) => {
            assert_eq!(code, Some(3));
            assert_eq!(tail, vec!["model missing".to_string()]);
        }
        other => panic!("expected nonzero exit, got {:?}", other),
    }
}

#[tokio::test]
async fn test_run_withTimeout_shouldKillAndReport() {
    let started = Instant::now();
    let result = process_runner::run(
        &shell("echo starting; sleep 30").timeout(Duration::from_millis(300)),
        |_, _| {},
        &CancellationToken::new(),
    )
    .await;

    assert!(started.elapsed() < Duration::from_secs(10));
    match result {
        Err(ProcessError::Timeout { tail, .. }) => assert_eq!(tail, vec!["starting".to_string()]),
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_run_withCancel_shouldKillGrandchildren() {
    common::init_logger();
    let dir = common::create_temp_dir().unwrap();
    let pid_file = dir.path().join("child.pid");
    let script = format!("sleep 30 & echo $! > '{}'; wait", pid_file.display());

    let cancel = CancellationToken::new();
    let runner_cancel = cancel.clone();
    let handle = tokio::spawn(async move { process_runner::run(&shell(&script), |_, _| {}, &runner_cancel).await });

    let grandchild = wait_for_pid_file(&pid_file).await;
    assert!(is_running(grandchild));
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("runner should stop promptly")
        .unwrap();
    assert!(matches!(result, Err(ProcessError::Cancelled { .. })));

    let mut alive = true;
    for _ in 0..100 {
        alive = is_running(grandchild);
        if !alive {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!alive, "grandchild {} survived cancellation", grandchild);
}

#[tokio::test]
async fn test_run_withCancelledToken_shouldNotSpawn() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = process_runner::run(&shell("exit 0"), |_, _| {}, &cancel).await;
    assert!(matches!(result, Err(ProcessError::Cancelled { .. })));
}

#[tokio::test]
async fn test_run_withMissingProgram_shouldBeSpawnFailure() {
    let result = process_runner::run(
        &ProcessSpec::new("definitely-not-a-real-tool-xyz"),
        |_, _| {},
        &CancellationToken::new(),
    )
    .await;
    assert!(matches!(result, Err(ProcessError::SpawnFailure { .. })));
}

#[tokio::test]
async fn test_runCapture_shouldCollectStdoutOnly() {
    let out = process_runner::run_capture(&shell("echo audio; echo noise 1>&2"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(out, "audio\n");
}
