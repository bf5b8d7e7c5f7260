//! Integration tests for the process runner against real child processes.
//!
//! - Hard timeout kills and reaps the child
//! - Cancel mid-run kills the whole process group
//! - Progress and both output streams reach the line callback

#![cfg(unix)]

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use omniflash::{OutputLine, ProcessRunner, StreamKind, ToolHandle, ToolKind};
use std::ffi::OsString;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::watch;

fn sh(script: &str) -> Vec<OsString> {
    vec![OsString::from("-c"), OsString::from(script)]
}

fn assert_reaped(pid: Option<u32>) {
    let pid = pid.expect("child pid recorded");
    assert_eq!(kill(Pid::from_raw(pid as i32), None), Err(Errno::ESRCH));
}

#[tokio::test]
async fn test_timeout_kills_and_reaps_child() {
    let runner = ProcessRunner::new();
    let (_tx, rx) = watch::channel(false);
    let started = Instant::now();

    let outcome = runner
        .run_command(
            Path::new("sleep"),
            &[OsString::from("10")],
            Path::new("."),
            Duration::from_millis(100),
            rx,
            |_| {},
        )
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_millis(500), "took {:?}", started.elapsed());
    assert!(outcome.timed_out);
    assert!(!outcome.cancelled);
    assert_eq!(outcome.exit_code, None);
    assert_reaped(outcome.pid);
}

#[tokio::test]
async fn test_timeout_kills_grandchildren_holding_pipes() {
    let runner = ProcessRunner::new();
    let (_tx, rx) = watch::channel(false);
    let started = Instant::now();

    let outcome = runner
        .run_command(
            Path::new("sh"),
            &sh("sleep 10 & echo spawned; sleep 10"),
            Path::new("."),
            Duration::from_millis(300),
            rx,
            |_| {},
        )
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    assert!(outcome.timed_out);
    assert!(outcome.exit_text.contains("spawned"));
}

#[tokio::test]
async fn test_cancel_mid_run() {
    let runner = ProcessRunner::new();
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = tx.send(true);
    });

    let mut lines = Vec::new();
    let outcome = runner
        .run_command(
            Path::new("sh"),
            &sh("echo 'Writing 10%'; sleep 10; echo never"),
            Path::new("."),
            Duration::from_secs(30),
            rx,
            |line: &OutputLine| lines.push(line.text.clone()),
        )
        .await
        .unwrap();

    assert!(outcome.cancelled);
    assert!(!outcome.timed_out);
    assert_eq!(outcome.exit_code, None);
    assert_eq!(outcome.last_progress_percent, Some(10));
    assert_eq!(lines, vec!["Writing 10%"]);
    assert_reaped(outcome.pid);
}

#[tokio::test]
async fn test_cancel_after_exit_keeps_exit_code() {
    // The background sleep holds the pipes open past the tool's own exit.
    let runner = ProcessRunner::new().with_drain_grace(Duration::from_secs(3));
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        let _ = tx.send(true);
    });

    let outcome = runner
        .run_command(
            Path::new("sh"),
            &sh("sleep 5 & echo 'Writing 100%'; exit 0"),
            Path::new("."),
            Duration::from_secs(30),
            rx,
            |_| {},
        )
        .await
        .unwrap();

    assert!(!outcome.cancelled);
    assert!(!outcome.timed_out);
    assert_eq!(outcome.exit_code, Some(0));
    assert_eq!(outcome.last_progress_percent, Some(100));
}

#[tokio::test]
async fn test_progress_and_streams_through_tool_handle() {
    let temp = tempfile::TempDir::new().unwrap();
    let script = temp.path().join("fake-tool");
    std::fs::write(
        &script,
        "printf 'Uploading 10%%\\rUploading 55%%\\r'\necho 'warn: slow link' >&2\necho \"args: $*\"\necho 'Upload 100% done'\n",
    )
    .unwrap();
    let mut handle = ToolHandle::executable(ToolKind::Heimdall, &script);
    handle.interpreter = Some("/bin/sh".into());

    let runner = ProcessRunner::new();
    let (_tx, rx) = watch::channel(false);
    let mut seen: Vec<(String, StreamKind, Option<u8>)> = Vec::new();
    let outcome = runner
        .run(
            &handle,
            &["flash".to_string(), "--BOOT".to_string()],
            Duration::from_secs(10),
            rx,
            |line: &OutputLine| seen.push((line.text.clone(), line.stream, line.progress)),
        )
        .await
        .unwrap();

    assert_eq!(outcome.exit_code, Some(0));
    assert_eq!(outcome.last_progress_percent, Some(100));
    assert!(seen.contains(&("Uploading 55%".to_string(), StreamKind::Stdout, Some(55))));
    assert!(seen.contains(&("warn: slow link".to_string(), StreamKind::Stderr, None)));
    assert!(outcome.exit_text.contains("args: flash --BOOT"));
}
