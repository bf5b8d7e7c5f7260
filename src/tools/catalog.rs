//! Static knowledge about each vendor tool: file names, install locations and
//! download sources.

use crate::config::Settings;
use crate::models::ToolKind;

/// Where to find and how to install one vendor tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub kind: ToolKind,
    /// File names accepted as the tool entry point, in preference order
    pub executable_names: &'static [&'static str],
    /// Conventional install locations outside the managed directory
    pub system_dirs: &'static [&'static str],
    /// The entry point is a script run through a language runtime
    pub script: bool,
    pub primary_url: String,
    pub fallback_urls: Vec<String>,
}

impl ToolSpec {
    /// Built-in spec with download sources overridden from settings.
    pub fn for_kind(kind: ToolKind, settings: &Settings) -> Self {
        let mut spec = builtin(kind);
        if let Some(source) = settings.tool_sources.get(&kind) {
            if let Some(ref primary) = source.primary_url {
                spec.primary_url = primary.clone();
                spec.fallback_urls = source.fallback_urls.clone();
            } else if !source.fallback_urls.is_empty() {
                spec.fallback_urls = source.fallback_urls.clone();
            }
        }
        spec
    }

    /// Primary URL followed by fallbacks, in the order they are tried.
    pub fn download_urls(&self) -> Vec<String> {
        std::iter::once(self.primary_url.clone())
            .chain(self.fallback_urls.iter().cloned())
            .filter(|url| !url.is_empty())
            .collect()
    }

    pub fn matches_name(&self, file_name: &str) -> bool {
        self.executable_names
            .iter()
            .any(|name| name.eq_ignore_ascii_case(file_name))
    }
}

fn builtin(kind: ToolKind) -> ToolSpec {
    match kind {
        ToolKind::Heimdall => ToolSpec {
            kind,
            executable_names: &["heimdall", "heimdall.exe"],
            system_dirs: &[
                "/usr/bin",
                "/usr/local/bin",
                "/opt/homebrew/bin",
                "/opt/heimdall/bin",
            ],
            script: false,
            primary_url:
                "https://github.com/Benjamin-Dobell/Heimdall/releases/download/v1.4.0/heimdall-suite-1.4.0-linux.zip"
                    .to_string(),
            fallback_urls: vec![
                "https://bitbucket.org/benjamin_dobell/heimdall/downloads/heimdall-suite-1.4.0-linux.zip"
                    .to_string(),
            ],
        },
        ToolKind::Edl => ToolSpec {
            kind,
            executable_names: &["edl", "edl.py"],
            system_dirs: &["/opt/edl", "/usr/local/share/edl", "/usr/share/edl"],
            script: true,
            primary_url: "https://github.com/bkerler/edl/archive/refs/heads/master.zip".to_string(),
            fallback_urls: vec![
                "https://codeload.github.com/bkerler/edl/zip/refs/heads/master".to_string(),
            ],
        },
        ToolKind::MtkClient => ToolSpec {
            kind,
            executable_names: &["mtk", "mtk.py"],
            system_dirs: &["/opt/mtkclient", "/usr/local/share/mtkclient", "/usr/share/mtkclient"],
            script: true,
            primary_url: "https://github.com/bkerler/mtkclient/archive/refs/heads/main.zip"
                .to_string(),
            fallback_urls: vec![
                "https://codeload.github.com/bkerler/mtkclient/zip/refs/heads/main".to_string(),
            ],
        },
    }
}
