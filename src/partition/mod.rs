//! Partition table parsers: Samsung PIT, Qualcomm GPT dump, MediaTek scatter.
//!
//! Every parser is a pure text-to-model transform. Malformed lines are skipped,
//! never reported, because vendor tool output drifts between versions.

pub mod gpt;
pub mod pit;
pub mod scatter;

use crate::error::ParseError;
use crate::models::PartitionEntry;
use crate::vendor::Vendor;

/// Parse `raw` with the vendor's parser, signalling an empty result.
pub fn parse_table(vendor: Vendor, raw: &str) -> Result<Vec<PartitionEntry>, ParseError> {
    let entries = vendor.parse_table(raw);
    if entries.is_empty() {
        log::warn!("[Partition] {} parser found no partitions", vendor);
        return Err(ParseError::PartitionTableEmpty {
            vendor: vendor.to_string(),
        });
    }
    log::debug!("[Partition] {} parser found {} partitions", vendor, entries.len());
    Ok(entries)
}

/// Parse an unsigned number written either as `0x...` hex or decimal.
pub(crate) fn parse_number(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Some(hex) = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).ok()
    } else {
        value.parse::<u64>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number_hex_and_decimal() {
        assert_eq!(parse_number("0x40000"), Some(0x40000));
        assert_eq!(parse_number("0X1F"), Some(31));
        assert_eq!(parse_number(" 8192 "), Some(8192));
        assert_eq!(parse_number("0xZZ"), None);
        assert_eq!(parse_number("abc"), None);
    }

    #[test]
    fn test_parse_table_empty_signals_condition() {
        let result = parse_table(Vendor::Qualcomm, "nothing useful here\n");
        assert_eq!(
            result,
            Err(ParseError::PartitionTableEmpty {
                vendor: "Qualcomm".to_string()
            })
        );
    }
}
