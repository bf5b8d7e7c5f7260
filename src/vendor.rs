//! Vendor dispatch: one tagged variant per silicon vendor carrying its
//! command-template table, tool kind, output markers and table parser.
//!
//! The templates are the wire contract with the external tools. A change in a
//! vendor tool's CLI syntax is an edit here, never in the orchestrator.
//!
//! Placeholders:
//! - `{partition}`: partition name as the vendor spells it
//! - `{image}`: image file path
//! - `{loader}`: loader/programmer path (token dropped when no loader is known)
//! - `{resume}`: expands to `--resume` for every invocation after the first in
//!   a session (token dropped otherwise)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::models::{PartitionEntry, ToolKind};
use crate::partition;

/// Fixed argument templates for one vendor tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTemplates {
    pub flash: &'static [&'static str],
    pub print_table: &'static [&'static str],
    pub reboot: &'static [&'static str],
}

/// Operations the orchestrator asks a vendor tool to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Flash,
    PrintTable,
    Reboot,
}

const SAMSUNG_TEMPLATES: CommandTemplates = CommandTemplates {
    flash: &["flash", "--{partition}", "{image}", "--no-reboot", "{resume}"],
    print_table: &["print-pit", "--no-reboot", "{resume}"],
    reboot: &["print-pit", "--resume"],
};

const QUALCOMM_TEMPLATES: CommandTemplates = CommandTemplates {
    flash: &["w", "{partition}", "{image}", "--loader={loader}"],
    print_table: &["printgpt", "--loader={loader}"],
    reboot: &["reset", "--loader={loader}"],
};

const MEDIATEK_TEMPLATES: CommandTemplates = CommandTemplates {
    flash: &["w", "{partition}", "{image}"],
    print_table: &["printgpt"],
    reboot: &["reset"],
};

const SUCCESS_MARKERS: &[&str] = &["OKAY", "Done", "successful", "Wrote"];
const FAILURE_MARKERS: &[&str] = &["failed", "error"];

/// Silicon vendor of the target device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Vendor {
    Samsung,
    Qualcomm,
    MediaTek,
}

impl Vendor {
    pub const ALL: [Vendor; 3] = [Vendor::Samsung, Vendor::Qualcomm, Vendor::MediaTek];

    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Samsung => "Samsung",
            Vendor::Qualcomm => "Qualcomm",
            Vendor::MediaTek => "MediaTek",
        }
    }

    pub fn templates(&self) -> &'static CommandTemplates {
        match self {
            Vendor::Samsung => &SAMSUNG_TEMPLATES,
            Vendor::Qualcomm => &QUALCOMM_TEMPLATES,
            Vendor::MediaTek => &MEDIATEK_TEMPLATES,
        }
    }

    pub fn tool_kind(&self) -> ToolKind {
        match self {
            Vendor::Samsung => ToolKind::Heimdall,
            Vendor::Qualcomm => ToolKind::Edl,
            Vendor::MediaTek => ToolKind::MtkClient,
        }
    }

    /// Whether the partition table is read from the device (rather than from the package).
    pub fn reads_table_from_device(&self) -> bool {
        matches!(self, Vendor::Samsung | Vendor::Qualcomm)
    }

    pub fn success_markers(&self) -> &'static [&'static str] {
        SUCCESS_MARKERS
    }

    pub fn failure_markers(&self) -> &'static [&'static str] {
        FAILURE_MARKERS
    }

    /// Parse this vendor's partition table encoding.
    pub fn parse_table(&self, raw: &str) -> Vec<PartitionEntry> {
        match self {
            Vendor::Samsung => partition::pit::parse(raw),
            Vendor::Qualcomm => partition::gpt::parse(raw),
            Vendor::MediaTek => partition::scatter::parse(raw),
        }
    }

    /// Build the argument vector for an operation.
    pub fn arguments(&self, operation: Operation, vars: &TemplateVars<'_>) -> Vec<String> {
        let templates = self.templates();
        let template = match operation {
            Operation::Flash => templates.flash,
            Operation::PrintTable => templates.print_table,
            Operation::Reboot => templates.reboot,
        };
        render(template, vars)
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vendor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "samsung" | "sec" => Ok(Vendor::Samsung),
            "qualcomm" | "qcom" | "qc" => Ok(Vendor::Qualcomm),
            "mediatek" | "mtk" => Ok(Vendor::MediaTek),
            other => Err(format!("unknown vendor: {}", other)),
        }
    }
}

/// Values substituted into a command template.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateVars<'a> {
    pub partition: Option<&'a str>,
    pub image: Option<&'a Path>,
    pub loader: Option<&'a Path>,
    pub resume: bool,
}

fn placeholder_value(name: &str, vars: &TemplateVars<'_>) -> Option<String> {
    match name {
        "partition" => vars.partition.map(str::to_string),
        "image" => vars.image.map(|p| p.to_string_lossy().to_string()),
        "loader" => vars.loader.map(|p| p.to_string_lossy().to_string()),
        "resume" => vars.resume.then(|| "--resume".to_string()),
        _ => None,
    }
}

/// Render a template. A token whose placeholder has no value is dropped.
pub fn render(template: &[&str], vars: &TemplateVars<'_>) -> Vec<String> {
    let mut args = Vec::with_capacity(template.len());
    'tokens: for token in template {
        let mut rendered = String::with_capacity(token.len());
        let mut rest: &str = token;
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}') else {
                break;
            };
            let name = &rest[open + 1..open + close];
            match placeholder_value(name, vars) {
                Some(value) => {
                    rendered.push_str(&rest[..open]);
                    rendered.push_str(&value);
                }
                None => continue 'tokens,
            }
            rest = &rest[open + close + 1..];
        }
        rendered.push_str(rest);
        args.push(rendered);
    }
    args
}

/// Verdict of a tool invocation judged from its output text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputVerdict {
    Success,
    Failure(String),
}

/// Classify tool output. Exit codes from these tools are unreliable, so any
/// failure marker wins, then any success marker, then the exit code.
pub fn classify_output(vendor: Vendor, text: &str, exit_code: Option<i32>) -> OutputVerdict {
    let lower = text.to_lowercase();
    for marker in vendor.failure_markers() {
        if lower.contains(&marker.to_lowercase()) {
            let line = text
                .lines()
                .find(|l| l.to_lowercase().contains(&marker.to_lowercase()))
                .unwrap_or(marker)
                .trim()
                .to_string();
            return OutputVerdict::Failure(line);
        }
    }
    if vendor.success_markers().iter().any(|m| text.contains(m)) {
        return OutputVerdict::Success;
    }
    match exit_code {
        Some(0) => OutputVerdict::Success,
        Some(code) => OutputVerdict::Failure(format!("exit code {}", code)),
        None => OutputVerdict::Failure("terminated without exit code".to_string()),
    }
}
