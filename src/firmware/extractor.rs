//! Firmware container extraction.
//!
//! Supported containers:
//! - zip packages holding Samsung `BL_/AP_/CP_/CSC_/HOME_CSC_` tar archives,
//!   loose images or a MediaTek scatter file
//! - single `.tar`, `.tar.md5` and `.tar.gz` archives (one role, many images)
//! - a MediaTek scatter `.txt`, whose `file_name` entries are resolved next to it
//! - a raw partition image, used in place

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ExtractError;
use crate::models::{ExtractedImage, FirmwareRole, PartitionEntry};
use crate::partition::scatter;

use super::archive::{self, ArchiveKind};
use super::roles;

/// Everything recovered from a set of firmware containers.
///
/// Extraction is best-effort: a container or nested archive that cannot be
/// unpacked is recorded in `errors` and the rest of the package is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirmwarePackage {
    pub images: Vec<ExtractedImage>,
    /// Partition table from a scatter file found in the package
    pub scatter_table: Option<Vec<PartitionEntry>>,
    /// Unpacked files that are neither images nor archives (release notes, PIT files)
    pub other_files: Vec<PathBuf>,
    /// One line per container or nested archive that failed to unpack
    pub errors: Vec<String>,
}

impl FirmwarePackage {
    fn merge(&mut self, other: FirmwarePackage) {
        self.images.extend(other.images);
        if self.scatter_table.is_none() {
            self.scatter_table = other.scatter_table;
        }
        self.other_files.extend(other.other_files);
        self.errors.extend(other.errors);
    }

    fn record_error(&mut self, source: &Path, error: &ExtractError) {
        log::warn!("[Extract] Skipping {}: {}", source.display(), error);
        self.errors.push(format!("{}: {}", source.display(), error));
    }
}

/// Unpacks vendor firmware containers into role-tagged image files.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirmwareExtractor;

impl FirmwareExtractor {
    pub fn new() -> Self {
        FirmwareExtractor
    }

    /// Extract one container into `dest`, returning the images it yields.
    ///
    /// Unlike `extract_package`, a container that cannot be opened at all is
    /// an error here.
    pub fn extract(&self, container: &Path, dest: &Path) -> Result<Vec<ExtractedImage>, ExtractError> {
        Ok(self.extract_container(container, dest)?.images)
    }

    /// Extract several containers in declaration order into `dest`.
    ///
    /// Each container gets its own subdirectory so identically named images
    /// from different components never overwrite each other. Only failing to
    /// create `dest` itself is fatal.
    pub fn extract_package(
        &self,
        containers: &[PathBuf],
        dest: &Path,
    ) -> Result<FirmwarePackage, ExtractError> {
        fs::create_dir_all(dest)?;
        let mut package = FirmwarePackage::default();
        for (index, container) in containers.iter().enumerate() {
            let sub = dest.join(format!("{:02}-{}", index, container_label(container)));
            match self.extract_container(container, &sub) {
                Ok(part) => package.merge(part),
                Err(e) => package.record_error(container, &e),
            }
        }
        log::info!(
            "[Extract] {} image(s) from {} container(s), {} other file(s), {} error(s)",
            package.images.len(),
            containers.len(),
            package.other_files.len(),
            package.errors.len()
        );
        Ok(package)
    }

    fn extract_container(&self, container: &Path, dest: &Path) -> Result<FirmwarePackage, ExtractError> {
        if !container.is_file() {
            return Err(ExtractError::NotFound(container.display().to_string()));
        }
        let role = file_name(container).as_deref().and_then(roles::classify);

        let mut package = if roles::is_scatter_file(container) {
            self.bind_scatter(container)?
        } else {
            match archive::sniff(container)? {
                Some(ArchiveKind::Zip) => {
                    log::info!("[Extract] Unpacking zip {}", container.display());
                    let files = archive::unpack_zip(container, dest)?;
                    self.classify_zip_contents(files, dest)
                }
                Some(_) => {
                    log::info!(
                        "[Extract] Unpacking {} archive {}",
                        role.map(|r| r.token()).unwrap_or("unclassified"),
                        container.display()
                    );
                    let files = archive::unpack(container, dest)?;
                    let (images, other_files) = split_images(files, role);
                    FirmwarePackage {
                        images,
                        other_files,
                        ..FirmwarePackage::default()
                    }
                }
                None if roles::is_image_file(container) => FirmwarePackage {
                    images: vec![ExtractedImage {
                        partition_hint: roles::partition_hint(container),
                        path: container.to_path_buf(),
                        role,
                    }],
                    ..FirmwarePackage::default()
                },
                None => return Err(ExtractError::Unsupported(container.display().to_string())),
            }
        };

        inflate_compressed(&mut package, dest);
        Ok(package)
    }

    /// Sort zip contents into nested role archives, loose images, a scatter
    /// file and everything else.
    fn classify_zip_contents(&self, files: Vec<PathBuf>, dest: &Path) -> FirmwarePackage {
        let mut package = FirmwarePackage::default();
        let mut nested: Vec<(Option<FirmwareRole>, PathBuf)> = Vec::new();

        for file in files {
            let name = file_name(&file).unwrap_or_default();
            let role = roles::classify(&name);
            if roles::is_nested_archive(&file) {
                nested.push((role, file));
            } else if roles::is_scatter_file(&file) {
                if package.scatter_table.is_some() {
                    package.other_files.push(file);
                    continue;
                }
                match self.bind_scatter(&file) {
                    Ok(bound) => package.merge(bound),
                    Err(e) => package.record_error(&file, &e),
                }
            } else if roles::is_image_file(&file) {
                package.images.push(ExtractedImage {
                    partition_hint: roles::partition_hint(&file),
                    path: file,
                    role,
                });
            } else {
                package.other_files.push(file);
            }
        }

        // BL before AP before CP before CSC; unclassified archives last.
        nested.sort_by_key(|(role, _)| (role.is_none(), *role));
        for (role, archive_path) in nested {
            let sub = dest.join(format!(
                "{}.d",
                file_name(&archive_path).unwrap_or_else(|| "nested".to_string())
            ));
            match archive::unpack(&archive_path, &sub) {
                Ok(files) => {
                    log::debug!(
                        "[Extract] {} -> {} file(s)",
                        archive_path.display(),
                        files.len()
                    );
                    let (images, other_files) = split_images(files, role);
                    package.images.extend(images);
                    package.other_files.extend(other_files);
                }
                Err(e) => package.record_error(&archive_path, &e),
            }
            if let Err(e) = fs::remove_file(&archive_path) {
                log::warn!("[Extract] Could not remove {}: {}", archive_path.display(), e);
            }
        }

        package
    }

/// Resolve the images a scatter file references, relative to its directory.
    fn bind_scatter(&self, scatter_path: &Path) -> Result<FirmwarePackage, ExtractError> {
        let raw = fs::read_to_string(scatter_path)?;
        let table = scatter::parse(&raw);
        let base = scatter_path.parent().unwrap_or_else(|| Path::new("."));

        let mut images = Vec::new();
        for entry in &table {
            if !scatter::is_download(entry) {
                continue;
            }
            let Some(file) = entry.flash_file_name() else {
                continue;
            };
            let path = base.join(file);
            if path.is_file() {
                images.push(ExtractedImage {
                    partition_hint: entry.name.clone(),
                    path,
                    role: None,
                });
            } else {
                log::warn!(
                    "[Extract] Scatter entry {} references missing file {}",
                    entry.name,
                    path.display()
                );
            }
        }

        log::info!(
            "[Extract] Scatter {} lists {} partition(s), {} image(s) present",
            scatter_path.display(),
            table.len(),
            images.len()
        );
        Ok(FirmwarePackage {
            images,
            scatter_table: Some(table),
            ..FirmwarePackage::default()
        })
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_string())
}

fn container_label(path: &Path) -> String {
    roles::partition_hint(path)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .take(48)
        .collect()
}

fn split_images(files: Vec<PathBuf>, role: Option<FirmwareRole>) -> (Vec<ExtractedImage>, Vec<PathBuf>) {
    let (images, others): (Vec<PathBuf>, Vec<PathBuf>) =
        files.into_iter().partition(|f| roles::is_image_file(f));
    let images = images
        .into_iter()
        .map(|path| ExtractedImage {
            partition_hint: roles::partition_hint(&path),
            path,
            role,
        })
        .collect();
    (images, others)
}

/// Replace LZ4-compressed images with their inflated form.
///
/// Files already under `dest` are inflated next to themselves; anything else
/// (a raw image passed in place) is inflated into `dest`. An image that fails
/// to inflate is dropped and recorded, never flashed compressed.
fn inflate_compressed(package: &mut FirmwarePackage, dest: &Path) {
    let images = std::mem::take(&mut package.images);
    for mut image in images {
        if !archive::is_lz4(&image.path) {
            package.images.push(image);
            continue;
        }
        let target_dir = match image.path.parent() {
            Some(parent) if image.path.starts_with(dest) => parent.to_path_buf(),
            _ => dest.to_path_buf(),
        };
        match archive::decompress_lz4(&image.path, &target_dir) {
            Ok(plain) => {
                log::debug!("[Extract] Inflated {}", plain.display());
                image.path = plain;
                package.images.push(image);
            }
            Err(e) => package.record_error(&image.path, &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_raw_image_used_in_place() {
        let temp = TempDir::new().unwrap();
        let image = temp.path().join("boot.img");
        fs::write(&image, b"ANDROID!").unwrap();

        let images = FirmwareExtractor::new()
            .extract(&image, &temp.path().join("out"))
            .unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].partition_hint, "boot");
        assert_eq!(images[0].path, image);
    }

    #[test]
    fn test_corrupt_nested_archive_is_recorded() {
        use std::io::Write;

        let mut good = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(4);
        header.set_mode(0o644);
        good.append_data(&mut header, "boot.img", &b"boot"[..]).unwrap();
        let good = good.into_inner().unwrap();
        let mut bad = good.clone();
        bad[148..156].copy_from_slice(b"garbage!");

        let temp = TempDir::new().unwrap();
        let zip_path = temp.path().join("firmware.zip");
        let mut zip = zip::ZipWriter::new(fs::File::create(&zip_path).unwrap());
        let options = zip::write::FileOptions::default();
        zip.start_file("AP_GOOD.tar", options).unwrap();
        zip.write_all(&good).unwrap();
        zip.start_file("CSC_BAD.tar", options).unwrap();
        zip.write_all(&bad).unwrap();
        zip.finish().unwrap();

        let package = FirmwareExtractor::new()
            .extract_package(&[zip_path], &temp.path().join("out"))
            .unwrap();
        assert_eq!(package.images.len(), 1);
        assert_eq!(package.images[0].role, Some(FirmwareRole::Ap));
        assert_eq!(package.errors.len(), 1);
        assert!(package.errors[0].contains("CSC_BAD.tar"));
    }

    #[test]
    fn test_missing_container() {
        let temp = TempDir::new().unwrap();
        let result = FirmwareExtractor::new().extract(&temp.path().join("nope.zip"), temp.path());
        assert!(matches!(result, Err(ExtractError::NotFound(_))));
    }

    #[test]
    fn test_scatter_binds_downloadable_images() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("preloader.bin"), b"pl").unwrap();
        fs::write(temp.path().join("boot.img"), b"boot").unwrap();
        let scatter_path = temp.path().join("MT6765_Android_scatter.txt");
        fs::write(
            &scatter_path,
            "- partition_index: SYS0\n  partition_name: preloader\n  file_name: preloader.bin\n  is_download: true\n\
             - partition_index: SYS1\n  partition_name: pgpt\n  file_name: NONE\n  is_download: false\n\
             - partition_index: SYS2\n  partition_name: boot\n  file_name: boot.img\n  is_download: true\n\
             - partition_index: SYS3\n  partition_name: userdata\n  file_name: userdata.img\n  is_download: true\n",
        )
        .unwrap();

        let package = FirmwareExtractor::new()
            .extract_package(&[scatter_path], &temp.path().join("out"))
            .unwrap();
        let hints: Vec<&str> = package.images.iter().map(|i| i.partition_hint.as_str()).collect();
        assert_eq!(hints, vec!["preloader", "boot"]);
        assert_eq!(package.scatter_table.map(|t| t.len()), Some(4));
    }
}
