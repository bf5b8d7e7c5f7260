//! Unified error type hierarchy for Omniflash
//!
//! Provides structured error handling with ParseError, ToolError, ProcessError,
//! ExtractError, PlanError, ConfigError and SessionError.
//!
//! Per-line parser drift and per-partition flash failures are NOT errors: parsers
//! degrade to partial results and the orchestrator records partition verdicts in
//! the session report. The types here cover conditions a caller must act on.

use std::io;
use thiserror::Error;

/// Partition table parsing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("No partitions found in {vendor} partition table output")]
    PartitionTableEmpty { vendor: String },
}

/// Vendor tool resolution and installation errors.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool '{0}' is not installed")]
    NotInstalled(String),

    #[error("Installing tool '{tool}' failed: {reason}")]
    InstallFailed { tool: String, reason: String },

    #[error("Download from {url} failed: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("Downloaded artifact from {url} is only {size} bytes (minimum {min})")]
    ArtifactTooSmall { url: String, size: u64, min: u64 },

    #[error("No working interpreter found for '{0}'")]
    InterpreterNotFound(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error during tool operations: {0}")]
    IoError(#[from] io::Error),
}

/// External process supervision errors.
///
/// Timeout and cancellation are reported through `ProcessOutcome`, not here.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("Failed to supervise process: {0}")]
    Io(#[from] io::Error),
}

/// Firmware container extraction errors.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Firmware container not found: {0}")]
    NotFound(String),

    #[error("Unsupported firmware container: {0}")]
    Unsupported(String),

    #[error("Invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Archive entry escapes destination: {0}")]
    UnsafePath(String),

    #[error("Could not decompress {file}: {reason}")]
    Decompress { file: String, reason: String },

    #[error("IO error during extraction: {0}")]
    IoError(#[from] io::Error),
}

/// Flash plan invariant violations. These abort a session before any device I/O.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("Partition '{0}' appears more than once in the flash plan")]
    DuplicatePartition(String),

    #[error("Flash plan contains both CSC and HOME_CSC images")]
    ConflictingCscRoles,

    #[error("Flash plan is empty: no image could be bound to a partition")]
    Empty,
}

/// Settings file parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Settings file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON in settings: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Settings validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error during settings operations: {0}")]
    IoError(#[from] io::Error),
}

/// Flash session management errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Device '{0}' already has a flash session in progress")]
    DeviceBusy(String),

    #[error("Unknown flash session: {0}")]
    UnknownSession(String),
}

/// Fatal conditions that end a flash session before or instead of per-partition work.
#[derive(Error, Debug)]
pub enum FlashError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Invalid phase transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

impl FlashError {
    /// Get a user-facing error message suitable for operator display
    pub fn user_message(&self) -> String {
        match self {
            FlashError::Tool(ToolError::NotInstalled(tool)) => {
                format!("The vendor tool '{}' is not installed and could not be located", tool)
            }
            FlashError::Tool(e) => format!("Vendor tool problem: {}", e),
            FlashError::Extract(e) => format!("Could not unpack firmware: {}", e),
            FlashError::Plan(e) => format!("Refusing to flash, plan is inconsistent: {}", e),
            FlashError::Parse(e) => format!("Could not read the partition table: {}", e),
            FlashError::Process(e) => format!("Could not run the vendor tool: {}", e),
            FlashError::InvalidTransition { from, to } => {
                format!("Internal state error ({} -> {})", from, to)
            }
        }
    }
}

/// Top-level result type for operations that may fail.
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::PartitionTableEmpty {
            vendor: "Samsung".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "No partitions found in Samsung partition table output"
        );
    }

    #[test]
    fn test_plan_error_display() {
        let err = PlanError::DuplicatePartition("BOOT".to_string());
        assert_eq!(
            err.to_string(),
            "Partition 'BOOT' appears more than once in the flash plan"
        );
    }

    #[test]
    fn test_flash_error_wraps_tool_error() {
        let err: FlashError = ToolError::NotInstalled("heimdall".to_string()).into();
        assert!(err.user_message().contains("heimdall"));
    }

    #[test]
    fn test_result_type_err() {
        let result: Result<i32> = Err("test error".into());
        assert!(result.is_err());
    }
}
