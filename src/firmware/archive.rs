//! Archive unpacking shared by the firmware extractor and the tool installer.
//!
//! Every unpacked path is checked against the destination so a crafted entry
//! (`../../etc/passwd`) cannot write outside it.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::error::ExtractError;

/// Container formats recognized by content sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const USTAR_OFFSET: usize = 257;

/// Detect the archive format from the file header; `None` for anything else.
pub fn sniff(path: &Path) -> io::Result<Option<ArchiveKind>> {
    let mut header = [0u8; 512];
    let mut file = File::open(path)?;
    let mut read = 0;
    while read < header.len() {
        let n = file.read(&mut header[read..])?;
        if n == 0 {
            break;
        }
        read += n;
    }
    let header = &header[..read];

    if header.starts_with(ZIP_MAGIC) {
        return Ok(Some(ArchiveKind::Zip));
    }
    if header.starts_with(GZIP_MAGIC) {
        return Ok(Some(ArchiveKind::TarGz));
    }
    if header.len() >= USTAR_OFFSET + 5 && &header[USTAR_OFFSET..USTAR_OFFSET + 5] == b"ustar" {
        return Ok(Some(ArchiveKind::Tar));
    }
    Ok(None)
}

/// Unpack any supported archive into `dest`, returning the files written.
pub fn unpack(path: &Path, dest: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    match sniff(path)? {
        Some(ArchiveKind::Zip) => unpack_zip(path, dest),
        Some(ArchiveKind::Tar) => unpack_tar(File::open(path)?, dest),
        Some(ArchiveKind::TarGz) => unpack_tar(GzDecoder::new(File::open(path)?), dest),
        None => Err(ExtractError::Unsupported(path.display().to_string())),
    }
}

/// Extract every entry of a zip archive into `dest`.
pub fn unpack_zip(path: &Path, dest: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut written = Vec::new();
    fs::create_dir_all(dest)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| ExtractError::UnsafePath(entry.name().to_string()))?;
        let out_path = dest.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o777))?;
            }
        }

        written.push(out_path);
    }

    Ok(written)
}

/// Extract every regular file of a tar stream into `dest`.
///
/// Trailing bytes after the end-of-archive blocks (the checksum Samsung
/// appends to `.tar.md5`) are ignored.
pub fn unpack_tar<R: Read>(reader: R, dest: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let mut archive = tar::Archive::new(reader);
    let mut written = Vec::new();
    fs::create_dir_all(dest)?;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let relative = entry.path()?.to_path_buf();
        let is_file = entry.header().entry_type().is_file();

        if !entry.unpack_in(dest)? {
            return Err(ExtractError::UnsafePath(relative.display().to_string()));
        }
        if is_file {
            written.push(dest.join(relative));
        }
    }

    Ok(written)
}

/// Whether a file is an LZ4 frame by name (`boot.img.lz4`).
pub fn is_lz4(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("lz4"))
        .unwrap_or(false)
}

/// Decompress an LZ4 frame file into `dest_dir`, dropping the `.lz4` suffix.
///
/// Samsung ships most AP images LZ4-compressed and the flash tools write
/// their input verbatim, so images must be inflated before flashing. The
/// compressed file is removed only when it already lives in `dest_dir`.
pub fn decompress_lz4(path: &Path, dest_dir: &Path) -> Result<PathBuf, ExtractError> {
    let plain_name = path
        .file_stem()
        .ok_or_else(|| ExtractError::Unsupported(path.display().to_string()))?;
    fs::create_dir_all(dest_dir)?;
    let out_path = dest_dir.join(plain_name);

    let mut decoder = lz4_flex::frame::FrameDecoder::new(BufReader::new(File::open(path)?));
    let mut out = File::create(&out_path)?;
    if let Err(e) = io::copy(&mut decoder, &mut out) {
        drop(out);
        let _ = fs::remove_file(&out_path);
        return Err(ExtractError::Decompress {
            file: path.display().to_string(),
            reason: e.to_string(),
        });
    }

    if path.parent() == Some(dest_dir) {
        fs::remove_file(path)?;
    }
    Ok(out_path)
}
