//! Supervised execution of external vendor tools.
//!
//! One `run()` call owns one child process: it streams both pipes line by
//! line (splitting on `\n` and `\r`, since progress bars redraw with carriage
//! returns), pulls `NN%` progress out of free text, enforces a hard deadline
//! and honors a cancel signal. Timeout and cancel always SIGKILL the child's
//! whole process group and reap it before returning, so no zombie or orphan
//! outlives the call.

use std::ffi::OsString;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::ProcessError;
use crate::models::{OutputLine, ProcessOutcome, StreamKind, ToolHandle};

static PROGRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,3})\s*%").expect("valid progress regex"));

/// How long pipes may stay open after the child exits (held by grandchildren).
const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8192;

/// Extract the last `NN%` in a line, clamped to 100.
pub fn parse_progress(line: &str) -> Option<u8> {
    PROGRESS
        .captures_iter(line)
        .filter_map(|caps| caps[1].parse::<u32>().ok())
        .last()
        .map(|value| value.min(100) as u8)
}

/// Splits a byte stream into lines on `\n` or `\r`.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Feed bytes, returning every completed non-empty line.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' || byte == b'\r' {
                if !self.pending.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                    self.pending.clear();
                }
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Flush a trailing line that had no terminator.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }
}

/// Accumulates output and progress for one invocation.
struct Collector<'a, F: FnMut(&OutputLine)> {
    outcome: &'a mut ProcessOutcome,
    on_line: F,
}

impl<'a, F: FnMut(&OutputLine)> Collector<'a, F> {
    fn emit(&mut self, text: String, stream: StreamKind) {
        let progress = parse_progress(&text);
        if progress.is_some() {
            self.outcome.last_progress_percent = progress;
        }
        self.outcome.exit_text.push_str(&text);
        self.outcome.exit_text.push('\n');
        log::debug!("[Runner] {}", text);
        let line = OutputLine {
            text,
            stream,
            progress,
        };
        (self.on_line)(&line);
    }
}

/// Launches and supervises vendor tool processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    drain_grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        ProcessRunner {
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Run a resolved tool from its working directory.
    ///
    /// Every output line reaches `on_line` in arrival order. A non-zero exit
    /// code or stderr output is not an error here; callers judge success from
    /// `exit_text`.
    pub async fn run<F>(
        &self,
        handle: &ToolHandle,
        args: &[String],
        timeout: Duration,
        cancel_rx: watch::Receiver<bool>,
        on_line: F,
    ) -> Result<ProcessOutcome, ProcessError>
    where
        F: FnMut(&OutputLine),
    {
        let (program, argv) = handle.command_line(args);
        self.run_command(&program, &argv, &handle.working_dir, timeout, cancel_rx, on_line)
            .await
    }

    /// Run an arbitrary program under the same supervision rules.
    pub async fn run_command<F>(
        &self,
        program: &Path,
        args: &[OsString],
        working_dir: &Path,
        timeout: Duration,
        mut cancel_rx: watch::Receiver<bool>,
        on_line: F,
    ) -> Result<ProcessOutcome, ProcessError>
    where
        F: FnMut(&OutputLine),
    {
        let started = Instant::now();
        let mut outcome = ProcessOutcome::default();

        if *cancel_rx.borrow() {
            log::info!("[Runner] Cancelled before launch: {}", program.display());
            outcome.cancelled = true;
            return Ok(outcome);
        }

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        log::info!(
            "[Runner] Launching {} {} (cwd {}, timeout {:?})",
            program.display(),
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" "),
            working_dir.display(),
            timeout
        );

        let mut child = command.spawn().map_err(|e| ProcessError::Spawn {
            program: program.display().to_string(),
            reason: e.to_string(),
        })?;
        outcome.pid = child.id();

        let mut stdout = child.stdout.take().ok_or_else(|| ProcessError::Spawn {
            program: program.display().to_string(),
            reason: "stdout not captured".to_string(),
        })?;
        let mut stderr = child.stderr.take().ok_or_else(|| ProcessError::Spawn {
            program: program.display().to_string(),
            reason: "stderr not captured".to_string(),
        })?;

        let mut collector = Collector {
            outcome: &mut outcome,
            on_line,
        };
        let mut out_split = LineSplitter::default();
        let mut err_split = LineSplitter::default();
        let mut out_buf = vec![0u8; READ_CHUNK];
        let mut err_buf = vec![0u8; READ_CHUNK];
        let mut stdout_closed = false;
        let mut stderr_closed = false;
        let mut cancel_closed = false;
        let mut status: Option<ExitStatus> = None;
        let mut kill_reason: Option<KillReason> = None;

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            if stdout_closed && stderr_closed && status.is_some() {
                break;
            }

            tokio::select! {
                read = stdout.read(&mut out_buf), if !stdout_closed => match read {
                    Ok(0) | Err(_) => stdout_closed = true,
                    Ok(n) => {
                        for line in out_split.push(&out_buf[..n]) {
                            collector.emit(line, StreamKind::Stdout);
                        }
                    }
                },
                read = stderr.read(&mut err_buf), if !stderr_closed => match read {
                    Ok(0) | Err(_) => stderr_closed = true,
                    Ok(n) => {
                        for line in err_split.push(&err_buf[..n]) {
                            collector.emit(line, StreamKind::Stderr);
                        }
                    }
                },
                exited = child.wait(), if status.is_none() => {
                    status = Some(exited?);
                    let drain_until = Instant::now() + self.drain_grace;
                    if drain_until < deadline.deadline() {
                        deadline.as_mut().reset(drain_until);
                    }
                },
                _ = &mut deadline => {
                    if status.is_none() {
                        kill_reason = Some(KillReason::Timeout);
                    } else {
                        log::debug!("[Runner] Pipes still open after exit, closing");
                    }
                    break;
                },
                changed = cancel_rx.changed(), if !cancel_closed => match changed {
                    Ok(()) if *cancel_rx.borrow() => {
                        if status.is_none() {
                            kill_reason = Some(KillReason::Cancel);
                        } else {
                            log::debug!("[Runner] Cancel after exit, keeping exit status");
                        }
                        break;
                    }
                    Ok(()) => {}
                    Err(_) => cancel_closed = true,
                },
            }
        }

        if let Some(line) = out_split.finish() {
            collector.emit(line, StreamKind::Stdout);
        }
        if let Some(line) = err_split.finish() {
            collector.emit(line, StreamKind::Stderr);
        }
        drop(collector);

        if let Some(reason) = kill_reason {
            match reason {
                KillReason::Timeout => {
                    log::warn!("[Runner] Timed out after {:?}, killing {}", timeout, program.display());
                    outcome.timed_out = true;
                }
                KillReason::Cancel => {
                    log::warn!("[Runner] Cancel requested, killing {}", program.display());
                    outcome.cancelled = true;
                }
            }
        }

        // Tear down anything still alive in the group, then reap.
        kill_process_group(&mut child);
        let status = match status {
            Some(status) => status,
            None => child.wait().await?,
        };
        if outcome.interrupted() {
            outcome.exit_code = None;
        } else {
            outcome.exit_code = status.code();
        }
        outcome.elapsed = started.elapsed();

        log::info!(
            "[Runner] {} finished in {:.1}s (exit {:?}, timed_out={}, cancelled={})",
            program.display(),
            outcome.elapsed.as_secs_f64(),
            outcome.exit_code,
            outcome.timed_out,
            outcome.cancelled
        );
        Ok(outcome)
    }
}

#[derive(Debug, Clone, Copy)]
enum KillReason {
    Timeout,
    Cancel,
}

/// SIGKILL the child's process group (it was spawned as group leader).
fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                if e != nix::errno::Errno::ESRCH {
                    log::debug!("[Runner] killpg({}) failed: {}", pid, e);
                }
            }
        }
    }
    if let Err(e) = child.start_kill() {
        log::debug!("[Runner] start_kill: {}", e);
    }
}
