//! MediaTek scatter file parser.
//!
//! A scatter file is a YAML-like list. Partition blocks start with a
//! `partition_index` key; the indented keys that follow belong to that block:
//!
//! ```text
//! - partition_index: SYS0
//!   partition_name: preloader
//!   file_name: preloader_k62v1.bin
//!   is_download: true
//!   type: SV5_BL_BIN
//!   linear_start_addr: 0x0
//!   partition_size: 0x40000
//!   region: EMMC_BOOT1_BOOT2
//! ```
//!
//! Header blocks (`- general: MTK_PLATFORM_CFG`, `info:`) carry no
//! `partition_index` and are ignored.

use crate::models::PartitionEntry;

use super::parse_number;

/// Keys copied verbatim into the entry's vendor tag.
const TAG_KEYS: &[&str] = &["is_download", "type", "region", "operation_type", "storage"];

#[derive(Default)]
struct ScatterBlock {
    index: String,
    name: Option<String>,
    file_name: Option<String>,
    start: u64,
    size: u64,
    tags: Vec<(String, String)>,
}

impl ScatterBlock {
    fn into_entry(self) -> Option<PartitionEntry> {
        let name = self.name.filter(|n| !n.is_empty())?;
        let mut entry = PartitionEntry::new(name, self.start, self.size);
        entry.vendor_tag.insert("partition_index", self.index);
        if let Some(file) = self
            .file_name
            .filter(|f| !f.is_empty() && !f.eq_ignore_ascii_case("NONE"))
        {
            entry.vendor_tag.insert("file_name", file);
        }
        for (key, value) in self.tags {
            entry.vendor_tag.insert(key, value);
        }
        Some(entry)
    }
}

fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let line = line.trim().trim_start_matches('-').trim();
    let (key, value) = line.split_once(':')?;
    Some((key.trim(), value.trim()))
}

/// Parse a scatter file into partition entries.
///
/// The final block is flushed even though no marker follows it.
///
/// # Examples
///
/// ```
/// use omniflash::partition::scatter::parse;
///
/// let raw = "- partition_index: SYS0\n  partition_name: preloader\n  partition_size: 0x40000\n";
/// let entries = parse(raw);
/// assert_eq!(entries.len(), 1);
/// assert_eq!(entries[0].size_bytes, 0x40000);
/// ```
pub fn parse(raw: &str) -> Vec<PartitionEntry> {
    let mut entries = Vec::new();
    let mut current: Option<ScatterBlock> = None;

    for line in raw.lines() {
        let Some((key, value)) = split_key_value(line) else {
            continue;
        };

        if key == "partition_index" {
            if let Some(block) = current.take() {
                entries.extend(block.into_entry());
            }
            current = Some(ScatterBlock {
                index: value.to_string(),
                ..Default::default()
            });
            continue;
        }

        let Some(block) = current.as_mut() else {
            continue;
        };
        match key {
            "partition_name" => block.name = Some(value.to_string()),
            "file_name" => block.file_name = Some(value.to_string()),
            "linear_start_addr" => block.start = parse_number(value).unwrap_or(0),
            "partition_size" => block.size = parse_number(value).unwrap_or(0),
            k if TAG_KEYS.contains(&k) => block.tags.push((k.to_string(), value.to_string())),
            _ => {}
        }
    }

    if let Some(block) = current.take() {
        entries.extend(block.into_entry());
    }

    entries
}

/// Whether the scatter entry is marked for download.
pub fn is_download(entry: &PartitionEntry) -> bool {
    entry
        .vendor_tag
        .get("is_download")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(true)
}
