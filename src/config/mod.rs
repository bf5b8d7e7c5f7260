//! Configuration module for flashing sessions.
//!
//! `Settings` carries the filesystem layout (managed tools directory, managed
//! loaders directory, scratch root), process timeouts, the download policy used
//! by the tool installer and per-vendor defaults. It is persisted as JSON at
//! `~/.config/omniflash/settings.json`; a missing file means defaults.
//!
//! # Module Structure
//!
//! - `loader`: Loading, saving and validating the settings file

pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::ToolKind;
use crate::vendor::Vendor;

pub use loader::{
    default_settings_path, load_settings, load_settings_or_default, save_settings,
    validate_settings_path,
};

/// HTTP policy for tool and loader downloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Client identifier sent with every request
    pub user_agent: String,
    /// Artifacts smaller than this are error pages, not packages
    pub min_artifact_bytes: u64,
    pub request_timeout_secs: u64,
    pub max_redirects: usize,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        DownloadSettings {
            user_agent: format!("omniflash/{}", crate::VERSION),
            min_artifact_bytes: 1000,
            request_timeout_secs: 300,
            max_redirects: 10,
        }
    }
}

/// Replacement download locations for a tool.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSourceOverride {
    pub primary_url: Option<String>,
    pub fallback_urls: Vec<String>,
}

/// Application settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Managed directory for vendor binaries and scripts
    pub tools_dir: PathBuf,
    /// Managed directory for loaders, programmers and scatter payloads
    pub loaders_dir: PathBuf,
    /// Parent of the per-session scratch extraction directories
    pub scratch_root: PathBuf,
    pub flash_timeout_secs: u64,
    pub table_timeout_secs: u64,
    pub reboot_timeout_secs: u64,
    /// Timeout for interpreter version probes
    pub probe_timeout_secs: u64,
    pub download: DownloadSettings,
    pub tool_sources: BTreeMap<ToolKind, ToolSourceOverride>,
    /// Interpreter names or paths probed, in order, for script-based tools
    pub interpreter_candidates: Vec<String>,
    /// Partitions treated as critical when a request does not name its own
    pub critical_partitions: BTreeMap<String, Vec<String>>,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("omniflash");
        Settings {
            tools_dir: data_dir.join("tools"),
            loaders_dir: data_dir.join("loaders"),
            scratch_root: std::env::temp_dir(),
            flash_timeout_secs: 20 * 60,
            table_timeout_secs: 120,
            reboot_timeout_secs: 60,
            probe_timeout_secs: 10,
            download: DownloadSettings::default(),
            tool_sources: BTreeMap::new(),
            interpreter_candidates: vec![
                "python3".to_string(),
                "python".to_string(),
                "/usr/bin/python3".to_string(),
                "/usr/local/bin/python3".to_string(),
                "/opt/homebrew/bin/python3".to_string(),
                "py".to_string(),
            ],
            critical_partitions: BTreeMap::new(),
        }
    }
}

impl Settings {
    pub fn flash_timeout(&self) -> Duration {
        Duration::from_secs(self.flash_timeout_secs)
    }

    pub fn table_timeout(&self) -> Duration {
        Duration::from_secs(self.table_timeout_secs)
    }

    pub fn reboot_timeout(&self) -> Duration {
        Duration::from_secs(self.reboot_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Default critical partitions configured for a vendor.
    pub fn critical_partitions_for(&self, vendor: Vendor) -> Vec<String> {
        self.critical_partitions
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(vendor.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.download.min_artifact_bytes, 1000);
        assert_eq!(settings.flash_timeout(), Duration::from_secs(1200));
        assert!(settings.tools_dir.ends_with("omniflash/tools"));
        assert_eq!(settings.interpreter_candidates[0], "python3");
    }

    #[test]
    fn test_critical_partitions_lookup_is_case_insensitive() {
        let mut settings = Settings::default();
        settings
            .critical_partitions
            .insert("samsung".to_string(), vec!["BOOTLOADER".to_string()]);
        assert_eq!(
            settings.critical_partitions_for(Vendor::Samsung),
            vec!["BOOTLOADER".to_string()]
        );
        assert!(settings.critical_partitions_for(Vendor::MediaTek).is_empty());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"flash_timeout_secs": 30}"#).expect("parse");
        assert_eq!(settings.flash_timeout_secs, 30);
        assert_eq!(settings.reboot_timeout_secs, 60);
    }
}
