//! Loader selection from the managed loaders directory.
//!
//! Qualcomm EDL needs a Firehose programmer matched to the SoC; MediaTek may
//! need a download agent. Files are matched by a case-insensitive chipset
//! substring in the file name.

use std::fs;
use std::path::{Path, PathBuf};

use crate::vendor::Vendor;

const MAX_DEPTH: usize = 4;

fn loader_extensions(vendor: Vendor) -> &'static [&'static str] {
    match vendor {
        Vendor::Qualcomm => &["elf", "mbn", "melf", "bin"],
        Vendor::MediaTek => &["bin"],
        Vendor::Samsung => &[],
    }
}

fn preferred_markers(vendor: Vendor) -> &'static [&'static str] {
    match vendor {
        Vendor::Qualcomm => &["firehose", "prog"],
        Vendor::MediaTek => &["da"],
        Vendor::Samsung => &[],
    }
}

pub(crate) fn collect_files(dir: &Path, depth: usize, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let mut entries: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    entries.sort();
    for path in entries {
        if path.is_dir() {
            if depth < MAX_DEPTH {
                collect_files(&path, depth + 1, out);
            }
        } else {
            out.push(path);
        }
    }
}

/// Pick the loader for a chipset, preferring programmer/DA files when several match.
pub fn select_loader(loaders_dir: &Path, vendor: Vendor, chipset: &str) -> Option<PathBuf> {
    let extensions = loader_extensions(vendor);
    let chipset = chipset.trim().to_lowercase();
    if extensions.is_empty() || chipset.is_empty() {
        return None;
    }

    let mut files = Vec::new();
    collect_files(loaders_dir, 0, &mut files);

    let mut candidates: Vec<(usize, PathBuf)> = files
        .into_iter()
        .filter_map(|path| {
            let name = path.file_name()?.to_string_lossy().to_lowercase();
            let ext = path.extension()?.to_string_lossy().to_lowercase();
            if !extensions.contains(&ext.as_str()) || !name.contains(&chipset) {
                return None;
            }
            let rank = preferred_markers(vendor)
                .iter()
                .position(|marker| name.contains(marker))
                .unwrap_or(usize::MAX);
            Some((rank, path))
        })
        .collect();

    candidates.sort();
    let selected = candidates.into_iter().next().map(|(_, path)| path);
    match &selected {
        Some(path) => log::info!("[Resolver] Loader for {} {}: {}", vendor, chipset, path.display()),
        None => log::warn!(
            "[Resolver] No loader for {} {} in {}",
            vendor,
            chipset,
            loaders_dir.display()
        ),
    }
    selected
}
