//! Samsung PIT parser for `heimdall print-pit` output.
//!
//! Output is a sequence of blocks introduced by `--- Entry #N ---`. Each block
//! carries labelled fields; only a handful matter here:
//!
//! ```text
//! --- Entry #3 ---
//! Device Type: 2 (MMC)
//! Partition Block Size/Offset: 8192
//! Partition Block Count: 16384
//! Partition Name: BOOT
//! Flash Filename: boot.img
//! ```
//!
//! Block units are normalized to bytes: 4096-byte blocks on UFS storage,
//! 512-byte sectors otherwise.

use crate::models::PartitionEntry;

use super::parse_number;

/// Literal marker that starts every entry block.
pub const ENTRY_MARKER: &str = "--- Entry #";

const MMC_BLOCK_SIZE: u64 = 512;
const UFS_BLOCK_SIZE: u64 = 4096;

#[derive(Default)]
struct PitBlock {
    name: Option<String>,
    flash_filename: Option<String>,
    block_offset: u64,
    block_count: u64,
    device_type: Option<String>,
    binary_type: Option<String>,
    identifier: Option<String>,
}

impl PitBlock {
    fn into_entry(self) -> Option<PartitionEntry> {
        let name = self.name.filter(|n| !n.is_empty())?;
        let block_size = match self.device_type.as_deref() {
            Some(t) if t.to_uppercase().contains("UFS") => UFS_BLOCK_SIZE,
            _ => MMC_BLOCK_SIZE,
        };

        let mut entry = PartitionEntry::new(
            name,
            self.block_offset.saturating_mul(block_size),
            self.block_count.saturating_mul(block_size),
        );
        if let Some(file) = self.flash_filename.filter(|f| !f.is_empty() && f != "-") {
            entry.vendor_tag.insert("flash_filename", file);
        }
        if let Some(device_type) = self.device_type {
            entry.vendor_tag.insert("device_type", device_type);
        }
        if let Some(binary_type) = self.binary_type {
            entry.vendor_tag.insert("binary_type", binary_type);
        }
        if let Some(identifier) = self.identifier {
            entry.vendor_tag.insert("identifier", identifier);
        }
        Some(entry)
    }
}

/// Leading number of a field value such as `2 (MMC)` or `0x22`.
fn leading_number(value: &str) -> Option<u64> {
    let token = value.split_whitespace().next()?;
    parse_number(token)
}

fn field_value<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let idx = line.find(label)?;
    Some(line[idx + label.len()..].trim())
}

fn parse_block(block: &str) -> Option<PartitionEntry> {
    let mut pit = PitBlock::default();

    for line in block.lines() {
        let line = line.trim();
        if let Some(v) = field_value(line, "Partition Name:") {
            pit.name = Some(v.to_string());
        } else if let Some(v) = field_value(line, "Flash Filename:") {
            pit.flash_filename = Some(v.to_string());
        } else if let Some(v) = field_value(line, "Block Size/Offset:") {
            pit.block_offset = leading_number(v).unwrap_or(0);
        } else if let Some(v) = field_value(line, "Block Count:") {
            pit.block_count = leading_number(v).unwrap_or(0);
        } else if let Some(v) = field_value(line, "Device Type:") {
            pit.device_type = Some(v.to_string());
        } else if let Some(v) = field_value(line, "Binary Type:") {
            pit.binary_type = Some(v.to_string());
        } else if let Some(v) = field_value(line, "Identifier:") {
            pit.identifier = Some(v.to_string());
        }
    }

    pit.into_entry()
}

/// Parse `heimdall print-pit` output into partition entries.
///
/// Blocks without a partition name are discarded; unknown lines are ignored.
///
/// # Examples
///
/// ```
/// use omniflash::partition::pit::parse;
///
/// let raw = "--- Entry #0 ---\nPartition Block Size/Offset: 34\nPartition Block Count: 8192\nPartition Name: BOTA0\nFlash Filename: -\n";
/// let entries = parse(raw);
/// assert_eq!(entries.len(), 1);
/// assert_eq!(entries[0].name, "BOTA0");
/// assert_eq!(entries[0].size_bytes, 8192 * 512);
/// ```
pub fn parse(raw: &str) -> Vec<PartitionEntry> {
    raw.split(ENTRY_MARKER)
        .skip(1)
        .filter_map(parse_block)
        .collect()
}
