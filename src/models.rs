//! Core data types for Omniflash.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::vendor::Vendor;

/// Opaque vendor-specific attributes attached to a partition entry.
///
/// Holds data the vendor-neutral model does not interpret, e.g. Samsung
/// `flash_filename` or MediaTek `is_download` / `region`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorTag(BTreeMap<String, String>);

impl VendorTag {
    pub fn new() -> Self {
        VendorTag(BTreeMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for VendorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{}", parts.join(";"))
    }
}

/// Vendor-neutral description of one flashable region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionEntry {
    /// Partition name as the vendor spells it (used on the tool command line)
    pub name: String,
    /// Start offset in bytes
    pub start_offset: u64,
    /// Size in bytes
    pub size_bytes: u64,
    /// Firmware image bound to this entry, if any
    pub source_image_path: Option<PathBuf>,
    /// Vendor-specific attributes
    pub vendor_tag: VendorTag,
}

impl PartitionEntry {
    pub fn new(name: impl Into<String>, start_offset: u64, size_bytes: u64) -> Self {
        PartitionEntry {
            name: name.into(),
            start_offset,
            size_bytes,
            source_image_path: None,
            vendor_tag: VendorTag::new(),
        }
    }

    /// Upper-cased name used for every cross-table lookup.
    pub fn key(&self) -> String {
        normalize_partition_name(&self.name)
    }

    /// File name the vendor table associates with this partition, if any.
    pub fn flash_file_name(&self) -> Option<&str> {
        self.vendor_tag
            .get("flash_filename")
            .or_else(|| self.vendor_tag.get("file_name"))
    }

    /// Bind a firmware image to this entry.
    pub fn bind_image(&mut self, path: impl Into<PathBuf>) {
        self.source_image_path = Some(path.into());
    }
}

/// Case-normalize a partition name for lookups.
pub fn normalize_partition_name(name: &str) -> String {
    name.trim().to_uppercase()
}

/// Samsung firmware component roles, in flashing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FirmwareRole {
    Bl,
    Ap,
    Cp,
    Csc,
    HomeCsc,
}

impl FirmwareRole {
    /// All roles, in the order components are flashed.
    pub const ALL: [FirmwareRole; 5] = [
        FirmwareRole::Bl,
        FirmwareRole::Ap,
        FirmwareRole::Cp,
        FirmwareRole::Csc,
        FirmwareRole::HomeCsc,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            FirmwareRole::Bl => "BL",
            FirmwareRole::Ap => "AP",
            FirmwareRole::Cp => "CP",
            FirmwareRole::Csc => "CSC",
            FirmwareRole::HomeCsc => "HOME_CSC",
        }
    }
}

impl fmt::Display for FirmwareRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for FirmwareRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BL" => Ok(FirmwareRole::Bl),
            "AP" => Ok(FirmwareRole::Ap),
            "CP" => Ok(FirmwareRole::Cp),
            "CSC" => Ok(FirmwareRole::Csc),
            "HOME_CSC" => Ok(FirmwareRole::HomeCsc),
            other => Err(format!("unknown firmware role: {}", other)),
        }
    }
}

/// One image file produced by the firmware extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedImage {
    /// Partition name suggested by the file name (base name without extensions)
    pub partition_hint: String,
    /// Location of the image on disk
    pub path: PathBuf,
    /// Role of the firmware component the image came from
    pub role: Option<FirmwareRole>,
}

impl ExtractedImage {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Vendor tools the resolver knows how to locate and install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ToolKind {
    Heimdall,
    Edl,
    MtkClient,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Heimdall => "heimdall",
            ToolKind::Edl => "edl",
            ToolKind::MtkClient => "mtkclient",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "heimdall" => Ok(ToolKind::Heimdall),
            "edl" => Ok(ToolKind::Edl),
            "mtk" | "mtkclient" => Ok(ToolKind::MtkClient),
            other => Err(format!("unknown tool: {}", other)),
        }
    }
}

/// Resolved location of a vendor tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolHandle {
    pub kind: ToolKind,
    /// Executable, or script when `interpreter` is set
    pub program: PathBuf,
    /// Language runtime that runs `program`
    pub interpreter: Option<PathBuf>,
    /// Directory every invocation runs from
    pub working_dir: PathBuf,
}

impl ToolHandle {
    /// Handle for a directly executable binary, run from its own directory.
    pub fn executable(kind: ToolKind, program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let working_dir = program
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        ToolHandle {
            kind,
            program,
            interpreter: None,
            working_dir,
        }
    }

    pub fn requires_interpreter(&self) -> bool {
        self.interpreter.is_some()
    }

    /// Program to launch and the argument vector to pass it.
    pub fn command_line(&self, args: &[String]) -> (PathBuf, Vec<OsString>) {
        match &self.interpreter {
            Some(interpreter) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(self.program.clone().into_os_string());
                full.extend(args.iter().map(OsString::from));
                (interpreter.clone(), full)
            }
            None => (
                self.program.clone(),
                args.iter().map(OsString::from).collect(),
            ),
        }
    }
}

/// Which pipe an output line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// One line of tool output, with any progress found in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub text: String,
    pub stream: StreamKind,
    pub progress: Option<u8>,
}

/// Result of one supervised tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Combined stdout + stderr, in arrival order
    pub exit_text: String,
    /// Exit code, if the process exited on its own
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub cancelled: bool,
    /// Last progress percentage seen (0-100)
    pub last_progress_percent: Option<u8>,
    /// OS process id of the child
    pub pid: Option<u32>,
    pub elapsed: Duration,
}

impl ProcessOutcome {
    /// True if the process was killed rather than exiting.
    pub fn interrupted(&self) -> bool {
        self.timed_out || self.cancelled
    }
}

/// Target device of a flash session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandle {
    /// Transport identifier: USB serial, COM port, or bus path
    pub id: String,
    pub vendor: Vendor,
    /// Chipset name used to select loaders (e.g. "sdm845", "MT6765")
    pub chipset: Option<String>,
}

impl DeviceHandle {
    pub fn new(id: impl Into<String>, vendor: Vendor) -> Self {
        DeviceHandle {
            id: id.into(),
            vendor,
            chipset: None,
        }
    }

    pub fn with_chipset(mut self, chipset: impl Into<String>) -> Self {
        self.chipset = Some(chipset.into());
        self
    }

    /// Key identifying the physical transport for exclusivity checks.
    pub fn transport_key(&self) -> String {
        self.id.trim().to_lowercase()
    }
}

/// Verdict for one partition of a flash plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionStatus {
    Succeeded,
    Failed(String),
    TimedOut,
    Cancelled,
    NotAttempted,
}

impl PartitionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, PartitionStatus::Succeeded)
    }

    /// True for verdicts that count as a failed flash attempt.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            PartitionStatus::Failed(_) | PartitionStatus::TimedOut | PartitionStatus::Cancelled
        )
    }
}

impl fmt::Display for PartitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionStatus::Succeeded => write!(f, "ok"),
            PartitionStatus::Failed(reason) => write!(f, "FAILED ({})", reason),
            PartitionStatus::TimedOut => write!(f, "TIMED OUT"),
            PartitionStatus::Cancelled => write!(f, "cancelled"),
            PartitionStatus::NotAttempted => write!(f, "not attempted"),
        }
    }
}

/// Per-partition entry of a session report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionResult {
    pub partition: String,
    pub image: PathBuf,
    pub critical: bool,
    pub status: PartitionStatus,
    pub last_progress: Option<u8>,
}

/// Overall outcome of a flash session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Done,
    Failed,
    Cancelled,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Done => write!(f, "Done"),
            SessionStatus::Failed => write!(f, "Failed"),
            SessionStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Final report of a flash session, always produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub partitions: Vec<PartitionResult>,
    /// Extracted images that matched no partition and were not flashed
    pub unbound_images: Vec<PathBuf>,
    /// Containers or nested archives that could not be unpacked
    #[serde(default)]
    pub extraction_errors: Vec<String>,
    /// None when no reboot was attempted
    pub rebooted: Option<bool>,
    /// Fatal error that ended the session early
    pub error: Option<String>,
}

impl SessionReport {
    pub fn new(session_id: Uuid) -> Self {
        SessionReport {
            session_id,
            status: SessionStatus::Failed,
            partitions: Vec::new(),
            unbound_images: Vec::new(),
            extraction_errors: Vec::new(),
            rebooted: None,
            error: None,
        }
    }

    pub fn failed_partitions(&self) -> Vec<&PartitionResult> {
        self.partitions
            .iter()
            .filter(|p| p.status.is_failure())
            .collect()
    }

    pub fn succeeded_partitions(&self) -> Vec<&PartitionResult> {
        self.partitions
            .iter()
            .filter(|p| p.status.is_success())
            .collect()
    }

    pub fn result_for(&self, partition: &str) -> Option<&PartitionResult> {
        let key = normalize_partition_name(partition);
        self.partitions
            .iter()
            .find(|p| normalize_partition_name(&p.partition) == key)
    }

    /// Human-readable per-partition breakdown.
    pub fn summary(&self) -> String {
        let mut out = format!("Session {}: {}\n", self.session_id, self.status);
        for result in &self.partitions {
            out.push_str(&format!(
                "  {:<20} {}{}\n",
                result.partition,
                result.status,
                if result.critical { " [critical]" } else { "" }
            ));
        }
        for image in &self.unbound_images {
            out.push_str(&format!("  (unbound) {}\n", image.display()));
        }
        for error in &self.extraction_errors {
            out.push_str(&format!("  (not extracted) {}\n", error));
        }
        match self.rebooted {
            Some(true) => out.push_str("  Device reboot requested\n"),
            Some(false) => out.push_str("  Device reboot FAILED, reboot manually\n"),
            None => {}
        }
        if let Some(ref error) = self.error {
            out.push_str(&format!("  Error: {}\n", error));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_key_is_upper_case() {
        let entry = PartitionEntry::new("boot_a", 0, 4096);
        assert_eq!(entry.key(), "BOOT_A");
        assert_eq!(entry.name, "boot_a");
    }

    #[test]
    fn test_flash_file_name_prefers_samsung_tag() {
        let mut entry = PartitionEntry::new("BOOT", 0, 0);
        entry.vendor_tag.insert("flash_filename", "boot.img");
        assert_eq!(entry.flash_file_name(), Some("boot.img"));
    }

    #[test]
    fn test_firmware_role_order() {
        let mut roles = vec![FirmwareRole::Csc, FirmwareRole::Ap, FirmwareRole::Bl];
        roles.sort();
        assert_eq!(roles, vec![FirmwareRole::Bl, FirmwareRole::Ap, FirmwareRole::Csc]);
        assert_eq!("home_csc".parse::<FirmwareRole>(), Ok(FirmwareRole::HomeCsc));
    }

    #[test]
    fn test_tool_handle_command_line_with_interpreter() {
        let handle = ToolHandle {
            kind: ToolKind::Edl,
            program: PathBuf::from("/opt/edl/edl"),
            interpreter: Some(PathBuf::from("/usr/bin/python3")),
            working_dir: PathBuf::from("/opt/edl"),
        };
        let (program, args) = handle.command_line(&["printgpt".to_string()]);
        assert_eq!(program, PathBuf::from("/usr/bin/python3"));
        assert_eq!(args, vec![OsString::from("/opt/edl/edl"), OsString::from("printgpt")]);
    }

    #[test]
    fn test_tool_handle_executable_working_dir() {
        let handle = ToolHandle::executable(ToolKind::Heimdall, "/usr/bin/heimdall");
        assert_eq!(handle.working_dir, PathBuf::from("/usr/bin"));
        assert!(!handle.requires_interpreter());
    }

    #[test]
    fn test_vendor_tag_display() {
        let mut tag = VendorTag::new();
        tag.insert("region", "EMMC_USER");
        tag.insert("is_download", "true");
        assert_eq!(tag.to_string(), "is_download=true;region=EMMC_USER");
    }

    #[test]
    fn test_report_result_lookup_is_case_insensitive() {
        let mut report = SessionReport::new(Uuid::new_v4());
        report.partitions.push(PartitionResult {
            partition: "modem".to_string(),
            image: PathBuf::from("modem.img"),
            critical: false,
            status: PartitionStatus::Failed("FAILED".to_string()),
            last_progress: None,
        });
        assert!(report.result_for("MODEM").is_some());
        assert_eq!(report.failed_partitions().len(), 1);
    }
}
