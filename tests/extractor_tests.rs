//! Firmware extraction of a Samsung-style package and plan binding.
//!
//! The package is a zip of `.tar.md5` role archives built in-test, carrying
//! both CSC and HOME_CSC so the preservation policy can be checked end to end.

use omniflash::orchestrator::build_plan;
use omniflash::{FirmwareExtractor, FirmwareRole, PartitionEntry, PlanError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn tar_md5(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, *data).unwrap();
    }
    let mut bytes = builder.into_inner().unwrap();
    // Odin packages append the md5 line after the tar end blocks.
    bytes.extend_from_slice(b"0123456789abcdef0123456789abcdef  package.tar\n");
    bytes
}

fn lz4(data: &[u8]) -> Vec<u8> {
    let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn samsung_package(dir: &Path) -> PathBuf {
    let path = dir.join("SM-G960F_FULL.zip");
    let file = fs::File::create(&path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default();

    let system = lz4(b"system");
    let archives: [(&str, Vec<u8>); 4] = [
        ("HOME_CSC_OXM_G960F.tar.md5", tar_md5(&[("cache.img", &b"home-cache"[..]), ("optics.img", &b"home-optics"[..])])),
        ("AP_G960FXXU.tar.md5", tar_md5(&[("boot.img", &b"boot"[..]), ("system.img.lz4", system.as_slice())])),
        ("CSC_OXM_G960F.tar.md5", tar_md5(&[("cache.img", &b"csc-cache"[..]), ("optics.img", &b"csc-optics"[..])])),
        ("BL_G960FXXU.tar.md5", tar_md5(&[("sboot.bin", &b"sboot"[..])])),
    ];
    for (name, bytes) in archives.iter() {
        zip.start_file(*name, options).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.start_file("release-notes.txt", options).unwrap();
    zip.write_all(b"not an image").unwrap();
    zip.finish().unwrap();
    path
}

fn pit_entry(name: &str, file: &str) -> PartitionEntry {
    let mut entry = PartitionEntry::new(name, 0, 0);
    entry.vendor_tag.insert("flash_filename", file);
    entry
}

#[test]
fn test_nested_role_archives_in_flash_order() {
    let temp = TempDir::new().unwrap();
    let package = samsung_package(temp.path());
    let out = temp.path().join("out");

    let extracted = FirmwareExtractor::new()
        .extract_package(&[package], &out)
        .unwrap();

    let roles: Vec<Option<FirmwareRole>> = extracted.images.iter().map(|i| i.role).collect();
    assert_eq!(
        roles,
        vec![
            Some(FirmwareRole::Bl),
            Some(FirmwareRole::Ap),
            Some(FirmwareRole::Ap),
            Some(FirmwareRole::Csc),
            Some(FirmwareRole::Csc),
            Some(FirmwareRole::HomeCsc),
            Some(FirmwareRole::HomeCsc),
        ]
    );
    assert!(extracted.images.iter().all(|i| i.path.starts_with(&out) && i.path.is_file()));
    assert!(extracted.scatter_table.is_none());

    // Nested archives are consumed once unpacked.
    let mut leftovers = Vec::new();
    let mut stack = vec![out.clone()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(dir).unwrap().flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.to_string_lossy().ends_with(".tar.md5") {
                leftovers.push(path);
            }
        }
    }
    assert!(leftovers.is_empty(), "{:?}", leftovers);

    // Compressed images are inflated; non-image members are kept aside.
    let system = extracted
        .images
        .iter()
        .find(|i| i.partition_hint == "system")
        .unwrap();
    assert!(system.path.ends_with("system.img"));
    assert_eq!(fs::read(&system.path).unwrap(), b"system");
    assert_eq!(extracted.other_files, vec![out.join("00-SM-G960F_FULL").join("release-notes.txt")]);
    assert!(extracted.other_files[0].is_file());
    assert!(extracted.errors.is_empty());
}

#[test]
fn test_corrupt_and_missing_containers_are_skipped() {
    let temp = TempDir::new().unwrap();
    let boot = temp.path().join("boot.img");
    fs::write(&boot, b"ANDROID!").unwrap();

    let mut corrupt = tar_md5(&[("system.img", &b"system"[..])]);
    corrupt[148..156].copy_from_slice(b"garbage!");
    let corrupt_path = temp.path().join("AP_CORRUPT.tar");
    fs::write(&corrupt_path, corrupt).unwrap();
    let missing = temp.path().join("missing.tar");

    let package = FirmwareExtractor::new()
        .extract_package(&[boot.clone(), corrupt_path, missing], &temp.path().join("out"))
        .unwrap();

    assert_eq!(package.images.len(), 1);
    assert_eq!(package.images[0].path, boot);
    assert_eq!(package.errors.len(), 2);
    assert!(package.errors[0].contains("AP_CORRUPT.tar"));
    assert!(package.errors[1].contains("missing.tar"));
}

#[test]
fn test_preserve_keeps_home_csc_images() {
    let temp = TempDir::new().unwrap();
    let package = samsung_package(temp.path());
    let images = FirmwareExtractor::new()
        .extract_package(&[package], &temp.path().join("out"))
        .unwrap()
        .images;

    let table = vec![
        pit_entry("BOOTLOADER", "sboot.bin"),
        pit_entry("BOOT", "boot.img"),
        pit_entry("SYSTEM", "system.img"),
        pit_entry("CACHE", "cache.img"),
        pit_entry("OMR", "optics.img"),
    ];
    let build = build_plan(Some(table.as_slice()), images, true).unwrap();
    let plan = build.plan;

    assert_eq!(plan.partition_names(), vec!["BOOTLOADER", "BOOT", "SYSTEM", "CACHE", "OMR"]);
    assert!(plan.contains_role(FirmwareRole::HomeCsc));
    assert!(!plan.contains_role(FirmwareRole::Csc));
    let cache = &plan.entries()[3];
    assert_eq!(fs::read(&cache.image).unwrap(), b"home-cache");
    assert_eq!(cache.partition.source_image_path.as_ref(), Some(&cache.image));
    assert!(build.unbound.is_empty());
}

#[test]
fn test_wipe_uses_csc_images() {
    let temp = TempDir::new().unwrap();
    let package = samsung_package(temp.path());
    let images = FirmwareExtractor::new()
        .extract_package(&[package], &temp.path().join("out"))
        .unwrap()
        .images;

    let build = build_plan(None, images, false).unwrap();
    assert!(build.plan.contains_role(FirmwareRole::Csc));
    assert!(!build.plan.contains_role(FirmwareRole::HomeCsc));
    let cache = build
        .plan
        .entries()
        .iter()
        .find(|e| e.partition.key() == "CACHE")
        .unwrap();
    assert_eq!(fs::read(&cache.image).unwrap(), b"csc-cache");
}

#[test]
fn test_unmatched_images_left_unbound() {
    let temp = TempDir::new().unwrap();
    let package = samsung_package(temp.path());
    let images = FirmwareExtractor::new()
        .extract_package(&[package], &temp.path().join("out"))
        .unwrap()
        .images;

    let table = vec![pit_entry("BOOT", "boot.img")];
    let build = build_plan(Some(table.as_slice()), images, true).unwrap();
    assert_eq!(build.plan.partition_names(), vec!["BOOT"]);
    assert_eq!(build.unbound.len(), 4);

    let nothing = build_plan(Some(&[pit_entry("EFS", "efs.img")][..]), Vec::new(), true);
    assert_eq!(nothing.unwrap_err(), PlanError::Empty);
}
