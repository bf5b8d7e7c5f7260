//! omniflash: vendor-agnostic firmware flashing orchestrator.
//!
//! Drives the vendor command-line tools (heimdall, edl, mtkclient) to write
//! firmware images onto Samsung, Qualcomm and MediaTek devices.
//!
//! The system is organized into functional modules:
//! - **error**: Error type hierarchy, one enum per layer
//! - **models**: Core data structures shared by every layer
//! - **vendor**: Per-vendor command templates, output markers and table parser choice
//! - **partition**: PIT, GPT and scatter partition table parsers
//! - **config**: JSON settings with defaults
//! - **tools**: Tool resolution, download/install and loader selection
//! - **process**: Supervised child processes with progress, timeout and cancel
//! - **firmware**: Firmware container extraction and role classification
//! - **orchestrator**: Flash session state machine, plans and the session service
//! - **log_collector**: Disk-backed global logger

// Core foundational modules
pub mod error;
pub mod models;
pub mod vendor;

pub mod partition;

pub mod config;

pub mod firmware;
pub mod process;
pub mod tools;

pub mod orchestrator;

// Robust, decoupled logging system
pub mod log_collector;

// Re-export the log crate for macro usage
pub use log;

pub use log_collector::{LogCollector, LogLine};

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

pub use error::{
    ConfigError, ExtractError, FlashError, ParseError, PlanError, ProcessError, Result,
    SessionError, ToolError,
};

pub use models::{
    DeviceHandle, ExtractedImage, FirmwareRole, OutputLine, PartitionEntry, PartitionResult,
    PartitionStatus, ProcessOutcome, SessionReport, SessionStatus, StreamKind, ToolHandle,
    ToolKind, VendorTag,
};

pub use vendor::{classify_output, Operation, OutputVerdict, TemplateVars, Vendor};

pub use partition::parse_table;

pub use config::{load_settings, save_settings, Settings};

pub use firmware::{FirmwareExtractor, FirmwarePackage, ScratchDir};
pub use process::ProcessRunner;
pub use tools::{ToolInstaller, ToolResolver, ToolSpec};

pub use orchestrator::{
    build_plan, CriticalSet, FlashEvent, FlashEventKind, FlashOrchestrator, FlashPhase,
    FlashPlan, FlashRequest, FlashService, FlashSource, PlanEntry, SessionHandle,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constant() {
        assert_eq!(VERSION, "0.1.0");
    }

    #[test]
    fn test_error_reexport() {
        let _: Result<i32> = Ok(42);
        let e = FlashError::from(PlanError::Empty);
        assert!(e.user_message().contains("plan"));
    }

    #[test]
    fn test_vendor_tool_mapping() {
        assert_eq!(Vendor::Samsung.tool_kind(), ToolKind::Heimdall);
        assert_eq!(Vendor::Qualcomm.tool_kind(), ToolKind::Edl);
        assert_eq!(Vendor::MediaTek.tool_kind(), ToolKind::MtkClient);
    }
}
