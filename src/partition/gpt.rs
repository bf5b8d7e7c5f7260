//! Qualcomm GPT dump parser.
//!
//! Accepts the tabular form `name  start-sector  sector-count  human-size`
//! (one partition per line, whitespace or comma separated) and the EDL
//! `printgpt` form `name: Offset 0x..., Length 0x..., ...`. Lines matching
//! neither are skipped.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::PartitionEntry;

use super::parse_number;

/// Sector size of the tabular dump.
pub const SECTOR_SIZE: u64 = 512;

static TABLE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*([A-Za-z0-9_.\-]+)\s*[,:]?\s+(\d+)\s*,?\s+(\d+)\s*,?\s+(\d+(?:\.\d+)?\s*[KMGT]?i?B)\s*$",
    )
    .expect("valid GPT table regex")
});

static EDL_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*([A-Za-z0-9_.\-]+):\s+Offset\s+(0x[0-9a-f]+|\d+),\s*Length\s+(0x[0-9a-f]+|\d+)")
        .expect("valid EDL printgpt regex")
});

fn parse_line(line: &str) -> Option<PartitionEntry> {
    if let Some(caps) = TABLE_LINE.captures(line) {
        let start: u64 = caps[2].parse().ok()?;
        let count: u64 = caps[3].parse().ok()?;
        let mut entry = PartitionEntry::new(
            &caps[1],
            start.saturating_mul(SECTOR_SIZE),
            count.saturating_mul(SECTOR_SIZE),
        );
        entry.vendor_tag.insert("size", caps[4].trim());
        return Some(entry);
    }

    let caps = EDL_LINE.captures(line)?;
    let offset = parse_number(&caps[2])?;
    let length = parse_number(&caps[3])?;
    Some(PartitionEntry::new(&caps[1], offset, length))
}

/// Parse a Qualcomm GPT dump into partition entries.
///
/// # Examples
///
/// ```
/// use omniflash::partition::gpt::parse;
///
/// let entries = parse("boot_a  8192  131072  64.0 MB\n");
/// assert_eq!(entries[0].size_bytes, 131072 * 512);
/// ```
pub fn parse(raw: &str) -> Vec<PartitionEntry> {
    raw.lines().filter_map(parse_line).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_table_lines() {
        let raw = "\
Name        Start      Count     Size
xbl_a       6          7168      3.5 MB
boot_a      8192       131072    64.0 MB
userdata,   1000000,   2000000,  976.6 MiB
";
        let entries = parse(raw);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, "xbl_a");
        assert_eq!(entries[0].start_offset, 6 * 512);
        assert_eq!(entries[1].size_bytes, 131072 * 512);
        assert_eq!(entries[1].vendor_tag.get("size"), Some("64.0 MB"));
        assert_eq!(entries[2].name, "userdata");
    }

    #[test]
    fn test_parse_edl_printgpt_lines() {
        let raw = "\
Parsing Lun 0:
ssd:                 Offset 0x0000000000006000, Length 0x0000000000002000, Flags 0x00000000, UUID 2c86e742, Type 0x2c86e742
persist:             Offset 0x0000000000008000, Length 0x0000000002000000, Flags 0x00000000, UUID 6c95e238, Type 0x6c95e238
";
        let entries = parse(raw);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "ssd");
        assert_eq!(entries[0].start_offset, 0x6000);
        assert_eq!(entries[1].size_bytes, 0x2000000);
    }

    #[test]
    fn test_non_matching_lines_skipped() {
        let raw = "edl.py - Qualcomm Sahara / Firehose Client\nDevice detected :)\nboot 10 20\n";
        assert!(parse(raw).is_empty());
    }
}
