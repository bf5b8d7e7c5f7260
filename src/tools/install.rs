//! Tool download and installation into the managed tools directory.
//!
//! Sources are tried strictly in order: the primary URL, then each fallback.
//! Any non-success status, transport error or suspiciously small body moves
//! on to the next source. The installed tree is staged next to its final
//! location and renamed into place, so an interrupted install is never
//! mistaken for a complete one.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use uuid::Uuid;

use crate::config::DownloadSettings;
use crate::error::ToolError;
use crate::firmware::archive;

use super::catalog::ToolSpec;

/// Downloads artifacts over HTTPS with the configured client policy.
#[derive(Debug, Clone)]
pub struct ToolInstaller {
    client: reqwest::Client,
    min_artifact_bytes: u64,
}

impl ToolInstaller {
    pub fn new(download: &DownloadSettings) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .user_agent(download.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(download.max_redirects))
            .timeout(Duration::from_secs(download.request_timeout_secs))
            .build()?;
        Ok(ToolInstaller {
            client,
            min_artifact_bytes: download.min_artifact_bytes,
        })
    }

    /// Fetch one URL into `dest`, returning the number of bytes written.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<u64, ToolError> {
        log::info!("[Resolver] Downloading {}", url);
        let mut response = self.client.get(url).send().await.map_err(|e| ToolError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::DownloadFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", status),
            });
        }

        let mut file = File::create(dest)?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(|e| ToolError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })? {
            file.write_all(&chunk)?;
            written += chunk.len() as u64;
        }
        file.flush()?;

        if written < self.min_artifact_bytes {
            return Err(ToolError::ArtifactTooSmall {
                url: url.to_string(),
                size: written,
                min: self.min_artifact_bytes,
            });
        }

        log::info!("[Resolver] Downloaded {} bytes from {}", written, url);
        Ok(written)
    }

    /// Try each URL in order until one yields a valid artifact.
    ///
    /// Returns the URL that succeeded.
    pub async fn download_first(&self, urls: &[String], dest: &Path) -> Result<String, ToolError> {
        let mut last_error: Option<ToolError> = None;
        for url in urls {
            match self.download(url, dest).await {
                Ok(_) => return Ok(url.clone()),
                Err(e) => {
                    log::warn!("[Resolver] Source rejected: {}", e);
                    let _ = fs::remove_file(dest);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ToolError::DownloadFailed {
            url: String::new(),
            reason: "no download sources configured".to_string(),
        }))
    }

    /// Download and install a tool into `install_dir`, replacing any previous copy.
    pub async fn install(&self, spec: &ToolSpec, install_dir: &Path) -> Result<PathBuf, ToolError> {
        let tool = spec.kind.as_str().to_string();
        let parent = install_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent)?;

        let token = Uuid::new_v4().simple().to_string();
        let artifact = parent.join(format!(".download-{}-{}", tool, token));
        let staging = parent.join(format!(".staging-{}-{}", tool, token));

        let result = self
            .install_staged(spec, &artifact, &staging, install_dir)
            .await;

        let _ = fs::remove_file(&artifact);
        if staging.exists() {
            let _ = fs::remove_dir_all(&staging);
        }

        result.map_err(|e| match e {
            ToolError::InstallFailed { .. } => e,
            other => ToolError::InstallFailed {
                tool: tool.clone(),
                reason: other.to_string(),
            },
        })
    }

    async fn install_staged(
        &self,
        spec: &ToolSpec,
        artifact: &Path,
        staging: &Path,
        install_dir: &Path,
    ) -> Result<PathBuf, ToolError> {
        let urls = spec.download_urls();
        let url = self.download_first(&urls, artifact).await?;

        fs::create_dir_all(staging)?;
        match archive::sniff(artifact)? {
            Some(_) => {
                let files = archive::unpack(artifact, staging).map_err(|e| ToolError::InstallFailed {
                    tool: spec.kind.as_str().to_string(),
                    reason: format!("could not unpack {}: {}", url, e),
                })?;
                log::info!("[Resolver] Unpacked {} file(s) from {}", files.len(), url);
                for file in files {
                    let is_entry_point = file
                        .file_name()
                        .map(|n| spec.matches_name(&n.to_string_lossy()))
                        .unwrap_or(false);
                    if is_entry_point {
                        make_executable(&file)?;
                    }
                }
            }
            None => {
                let target = staging.join(spec.executable_names[0]);
                fs::copy(artifact, &target)?;
                make_executable(&target)?;
                log::info!("[Resolver] Installed single executable from {}", url);
            }
        }

        if install_dir.exists() {
            fs::remove_dir_all(install_dir)?;
        }
        fs::rename(staging, install_dir)?;
        Ok(install_dir.to_path_buf())
    }
}

/// Set the executable bits on unix; no-op elsewhere.
pub fn make_executable(path: &Path) -> Result<(), ToolError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(perms.mode() | 0o755);
        fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
