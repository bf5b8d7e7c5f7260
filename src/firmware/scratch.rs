//! Per-session scratch directories.

use std::fs;
use std::io;
use std::path::Path;

use tempfile::TempDir;

const SCRATCH_PREFIX: &str = "omniflash-";

/// Disposable extraction directory with a random name under the scratch root.
///
/// Removed when dropped, so a session that fails or panics still cleans up.
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub fn new(root: &Path) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(root)?;
        log::debug!("[Extract] Scratch directory {}", dir.path().display());
        Ok(ScratchDir { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Delete the directory now, reporting any failure.
    pub fn close(self) -> io::Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        log::debug!("[Extract] Removed scratch directory {}", path.display());
        Ok(())
    }
}
