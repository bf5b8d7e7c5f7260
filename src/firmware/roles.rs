//! Firmware component role detection from file names.

use std::path::Path;

use crate::models::FirmwareRole;

/// Extensions of files that can be written to a partition.
const IMAGE_EXTENSIONS: &[&str] = &[
    "img", "bin", "mbn", "elf", "melf", "lz4", "ext4", "raw", "dtbo", "hcd", "signed",
];

/// Extensions of nested archives inside a firmware zip.
const ARCHIVE_SUFFIXES: &[&str] = &[".tar.md5", ".tar.gz", ".tgz", ".tar"];

fn token_at(upper: &str, token: &str) -> bool {
    upper.match_indices(token).any(|(idx, _)| {
        let before_ok = upper[..idx]
            .chars()
            .last()
            .map_or(true, |c| !c.is_ascii_alphanumeric());
        let after_ok = upper[idx + token.len()..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_ascii_alphanumeric());
        before_ok && after_ok
    })
}

/// Role of a Samsung component file, e.g. `HOME_CSC_OXM_G991B.tar.md5`.
///
/// `HOME_CSC` is checked first since its name contains the `CSC` token.
pub fn classify(file_name: &str) -> Option<FirmwareRole> {
    let upper = file_name.to_uppercase();
    if token_at(&upper, FirmwareRole::HomeCsc.token()) {
        return Some(FirmwareRole::HomeCsc);
    }
    [FirmwareRole::Bl, FirmwareRole::Ap, FirmwareRole::Cp, FirmwareRole::Csc]
        .into_iter()
        .find(|role| token_at(&upper, role.token()))
}

/// Whether a file looks like a flashable partition image.
pub fn is_image_file(path: &Path) -> bool {
    let name = match path.file_name() {
        Some(n) => n.to_string_lossy().to_lowercase(),
        None => return false,
    };
    name.split('.')
        .skip(1)
        .any(|ext| IMAGE_EXTENSIONS.contains(&ext))
}

/// Whether a file is a nested tar-family archive.
pub fn is_nested_archive(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    ARCHIVE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Whether a file is a MediaTek scatter description.
pub fn is_scatter_file(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.contains("scatter") && name.ends_with(".txt")
}

/// Partition name suggested by an image file: base name with every extension removed.
pub fn partition_hint(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    match name.split_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name,
    }
}
