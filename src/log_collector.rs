//! Decoupled logging pipeline for flash sessions.
//!
//! ```text
//! log::info!() / tool output
//!     |
//! [LogCollector] (log::Log, never blocks the caller)
//!     | (crossbeam unbounded channel)
//! +---+---+
//! |       |
//! v       v
//! [disk persister thread]      [observer channel]
//! logs/full/<session>.log      bounded tokio mpsc, try_send
//! logs/parsed/<session>.log
//! ```
//!
//! Disk persistence never depends on the observer: a full or closed observer
//! channel only drops the observer copy.

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

enum LogMessage {
    Line(LogLine),
    /// Flush marker; the persister answers once everything before it is on disk
    Flush(std::sync::mpsc::Sender<()>),
}

/// Session file paths plus a generation counter so the persister notices a
/// session switch and reopens its handles.
#[derive(Clone, Debug, Default)]
struct SessionState {
    full: Option<PathBuf>,
    parsed: Option<PathBuf>,
    generation: u64,
}

/// Default log directory: `<data_dir>/omniflash/logs`, else `./logs`.
pub fn default_logs_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("omniflash").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// A log line with metadata
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    pub message: String,
    /// Milestone line, also written to the parsed log
    pub parsed: bool,
    pub timestamp: String,
}

impl LogLine {
    pub fn new(message: String) -> Self {
        LogLine {
            message,
            parsed: false,
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
        }
    }

    pub fn parsed(message: String) -> Self {
        LogLine {
            parsed: true,
            ..LogLine::new(message)
        }
    }

    fn formatted(&self) -> String {
        format!("[{}] {}\n", self.timestamp, self.message)
    }
}

/// Global logger that persists to disk and feeds an optional observer.
#[derive(Clone)]
pub struct LogCollector {
    tx: Sender<LogMessage>,
    log_dir: PathBuf,
    observer: Option<tokio::sync::mpsc::Sender<LogLine>>,
    session_state: Arc<Mutex<SessionState>>,
    max_level: LevelFilter,
    /// Also echo lines to stderr (CLI use)
    echo: bool,
}

impl LogCollector {
    /// Create the `full/` and `parsed/` directories and start the persister thread.
    pub fn new(log_dir: PathBuf, observer: Option<tokio::sync::mpsc::Sender<LogLine>>) -> io::Result<Self> {
        let full_dir = log_dir.join("full");
        let parsed_dir = log_dir.join("parsed");
        std::fs::create_dir_all(&full_dir)?;
        std::fs::create_dir_all(&parsed_dir)?;

        let (tx, rx) = unbounded::<LogMessage>();
        let session_state = Arc::new(Mutex::new(SessionState::default()));
        let state = Arc::clone(&session_state);
        let thread_observer = observer.clone();

        // OS thread rather than a tokio task: lines from any runtime reach disk.
        std::thread::Builder::new()
            .name("omniflash-log".to_string())
            .spawn(move || {
                let mut handles: HashMap<&'static str, File> = HashMap::new();
                let mut generation = 0u64;

                while let Ok(msg) = rx.recv() {
                    match msg {
                        LogMessage::Line(line) => {
                            let session = state
                                .lock()
                                .map(|s| s.clone())
                                .unwrap_or_else(|poisoned| poisoned.into_inner().clone());
                            if session.generation != generation {
                                handles.clear();
                                generation = session.generation;
                            }

                            let full = session
                                .full
                                .clone()
                                .unwrap_or_else(|| default_log_file(&full_dir, "full"));
                            write_line(&mut handles, "full", &full, &line);
                            if line.parsed {
                                let parsed = session
                                    .parsed
                                    .clone()
                                    .unwrap_or_else(|| default_log_file(&parsed_dir, "parsed"));
                                write_line(&mut handles, "parsed", &parsed, &line);
                            }

                            if let Some(observer) = &thread_observer {
                                let _ = observer.try_send(line);
                            }
                        }
                        LogMessage::Flush(done) => {
                            for file in handles.values_mut() {
                                let _ = file.flush();
                                let _ = file.sync_data();
                            }
                            let _ = done.send(());
                        }
                    }
                }
            })?;

        Ok(LogCollector {
            tx,
            log_dir,
            observer,
            session_state,
            max_level: LevelFilter::Info,
            echo: false,
        })
    }

    pub fn with_max_level(mut self, level: LevelFilter) -> Self {
        self.max_level = level;
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn max_level(&self) -> LevelFilter {
        self.max_level
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Route all following lines to dedicated files for this flash session.
    pub fn start_session(&self, session_id: Uuid) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let name = format!("{}_{}.log", stamp, session_id.simple());
        let full = self.log_dir.join("full").join(&name);
        let parsed = self.log_dir.join("parsed").join(&name);

        let mut session = self
            .session_state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        session.full = Some(full.clone());
        session.parsed = Some(parsed);
        session.generation = session.generation.wrapping_add(1);
        full
    }

    /// Full log file of the current session, if one was started.
    pub fn session_log_path(&self) -> Option<PathBuf> {
        self.session_state.lock().ok().and_then(|s| s.full.clone())
    }

    /// Queue a line; never blocks.
    pub fn log_line(&self, line: LogLine) {
        if self.echo {
            eprint!("{}", line.formatted());
        }
        let _ = self.tx.send(LogMessage::Line(line));
    }

    pub fn log_str(&self, message: impl Into<String>) {
        self.log_line(LogLine::new(message.into()));
    }

    pub fn log_parsed(&self, message: impl Into<String>) {
        self.log_line(LogLine::parsed(message.into()));
    }

    /// Wait until every line queued before this call is on disk.
    ///
    /// Call before reporting a session result so the final lines survive an
    /// immediate exit.
    pub async fn wait_for_empty(&self) -> io::Result<()> {
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(done_tx))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "log persister stopped"))?;
        tokio::task::spawn_blocking(move || done_rx.recv_timeout(FLUSH_TIMEOUT))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "log flush did not complete"))
    }
}

fn default_log_file(dir: &Path, kind: &str) -> PathBuf {
    dir.join(format!("{}_{}.log", Local::now().format("%Y%m%d"), kind))
}

fn write_line(handles: &mut HashMap<&'static str, File>, key: &'static str, path: &Path, line: &LogLine) {
    if !handles.contains_key(key) {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                handles.insert(key, file);
            }
            Err(e) => {
                eprintln!("[Log] Cannot open {}: {}", path.display(), e);
                return;
            }
        }
    }
    if let Some(file) = handles.get_mut(key) {
        let _ = file.write_all(line.formatted().as_bytes());
    }
}

/// Wires `log::info!()` and friends into the collector. `target: "parsed"`
/// marks milestone lines.
impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        if metadata.level() > self.max_level {
            return false;
        }
        // Dependency chatter (hyper, reqwest, ...) only at warn and above.
        metadata.level() <= Level::Warn
            || metadata.target() == "parsed"
            || metadata.target().starts_with("omniflash")
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = format!("[{}] {}", record.level(), record.args());
        if record.target() == "parsed" {
            self.log_parsed(message);
        } else {
            self.log_str(message);
        }
    }

    fn flush(&self) {}
}
