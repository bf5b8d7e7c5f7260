//! Tool resolution: managed directory, system install paths, then `PATH`,
//! falling back to a download-and-install flow.
//!
//! Resolved handles are cached for the lifetime of the resolver. After an
//! install the managed directory is searched again, so a second `resolve()`
//! finds the tool locally and never touches the network.

use std::collections::HashMap;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;

use crate::config::Settings;
use crate::error::ToolError;
use crate::models::{ToolHandle, ToolKind};
use crate::process::ProcessRunner;

use super::catalog::ToolSpec;
use super::install::ToolInstaller;
use super::loaders::collect_files;

/// Where a tool was found; script tools on `PATH` are launchable wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Managed,
    System,
    SearchPath,
}

/// Locates vendor tools and their interpreters, installing tools on demand.
pub struct ToolResolver {
    settings: Settings,
    installer: ToolInstaller,
    runner: ProcessRunner,
    /// Replaces system dirs and `PATH` when set
    search_dirs: Option<Vec<PathBuf>>,
    cache: Mutex<HashMap<ToolKind, ToolHandle>>,
    interpreter: Mutex<Option<PathBuf>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn path_dirs() -> Vec<PathBuf> {
    env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).collect())
        .unwrap_or_default()
}

fn find_in_dirs(dirs: &[PathBuf], names: &[&str]) -> Option<PathBuf> {
    for dir in dirs {
        for name in names {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

impl ToolResolver {
    pub fn new(settings: Settings) -> Result<Self, ToolError> {
        let installer = ToolInstaller::new(&settings.download)?;
        Ok(ToolResolver {
            settings,
            installer,
            runner: ProcessRunner::new(),
            search_dirs: None,
            cache: Mutex::new(HashMap::new()),
            interpreter: Mutex::new(None),
        })
    }

    /// Restrict lookups outside the managed directory to `dirs`.
    pub fn with_search_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.search_dirs = Some(dirs);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn spec(&self, kind: ToolKind) -> ToolSpec {
        ToolSpec::for_kind(kind, &self.settings)
    }

    /// Managed install directory of one tool.
    pub fn managed_dir(&self, kind: ToolKind) -> PathBuf {
        self.settings.tools_dir.join(kind.as_str())
    }

    /// Return a usable handle, installing the tool if it cannot be found.
    pub async fn resolve(&self, kind: ToolKind) -> Result<ToolHandle, ToolError> {
        match self.locate(kind).await {
            Ok(handle) => return Ok(handle),
            Err(ToolError::NotInstalled(_)) => {}
            Err(e) => return Err(e),
        }

        let spec = self.spec(kind);
        log::info!(
            target: "parsed",
            "[Resolver] {} not found, installing into {}",
            kind,
            self.managed_dir(kind).display()
        );
        self.installer.install(&spec, &self.managed_dir(kind)).await?;
        self.invalidate(kind);

        let Some(program) = self.find_managed(&spec) else {
            return Err(ToolError::InstallFailed {
                tool: kind.as_str().to_string(),
                reason: format!(
                    "installed package contains none of: {}",
                    spec.executable_names.join(", ")
                ),
            });
        };
        let handle = self.build_handle(&spec, program, Origin::Managed).await?;
        log::info!(target: "parsed", "[Resolver] {} installed at {}", kind, handle.program.display());
        self.register(handle.clone());
        Ok(handle)
    }

    /// Find an installed tool without downloading anything.
    pub async fn locate(&self, kind: ToolKind) -> Result<ToolHandle, ToolError> {
        let cached = lock(&self.cache).get(&kind).cloned();
        if let Some(handle) = cached {
            if handle.program.is_file() {
                return Ok(handle);
            }
            log::warn!("[Resolver] Cached {} vanished, searching again", kind);
        }
        self.invalidate(kind);

        let spec = self.spec(kind);
        let found = self
            .find_managed(&spec)
            .map(|p| (p, Origin::Managed))
            .or_else(|| self.find_system(&spec).map(|p| (p, Origin::System)))
            .or_else(|| self.find_on_search_path(&spec).map(|p| (p, Origin::SearchPath)));

        let Some((program, origin)) = found else {
            log::debug!("[Resolver] {} not found in any location", kind);
            return Err(ToolError::NotInstalled(kind.as_str().to_string()));
        };

        let handle = self.build_handle(&spec, program, origin).await?;
        log::info!("[Resolver] {} resolved to {} ({:?})", kind, handle.program.display(), origin);
        self.register(handle.clone());
        Ok(handle)
    }

    /// Cache a handle, e.g. one supplied explicitly by the operator.
    pub fn register(&self, handle: ToolHandle) {
        lock(&self.cache).insert(handle.kind, handle);
    }

    /// Forget a cached handle (after reinstalling the tool).
    pub fn invalidate(&self, kind: ToolKind) {
        lock(&self.cache).remove(&kind);
    }

    async fn build_handle(
        &self,
        spec: &ToolSpec,
        program: PathBuf,
        origin: Origin,
    ) -> Result<ToolHandle, ToolError> {
        let mut handle = ToolHandle::executable(spec.kind, program);
        let is_py = handle
            .program
            .extension()
            .map(|e| e.eq_ignore_ascii_case("py"))
            .unwrap_or(false);
        if spec.script && (is_py || origin != Origin::SearchPath) {
            handle.interpreter = Some(self.locate_interpreter(spec.kind).await?);
        }
        Ok(handle)
    }

    fn find_managed(&self, spec: &ToolSpec) -> Option<PathBuf> {
        let mut files = Vec::new();
        collect_files(&self.managed_dir(spec.kind), 0, &mut files);
        spec.executable_names.iter().find_map(|name| {
            files
                .iter()
                .find(|f| {
                    f.file_name()
                        .map(|n| n.to_string_lossy().eq_ignore_ascii_case(name))
                        .unwrap_or(false)
                })
                .cloned()
        })
    }

    fn find_system(&self, spec: &ToolSpec) -> Option<PathBuf> {
        if self.search_dirs.is_some() {
            return None;
        }
        let dirs: Vec<PathBuf> = spec.system_dirs.iter().map(PathBuf::from).collect();
        find_in_dirs(&dirs, spec.executable_names)
    }

    fn find_on_search_path(&self, spec: &ToolSpec) -> Option<PathBuf> {
        let dirs = self.search_dirs.clone().unwrap_or_else(path_dirs);
        find_in_dirs(&dirs, spec.executable_names)
    }

    /// First interpreter candidate that answers `--version` with exit code 0.
    pub async fn locate_interpreter(&self, kind: ToolKind) -> Result<PathBuf, ToolError> {
        let known = lock(&self.interpreter).clone();
        if let Some(found) = known {
            return Ok(found);
        }

        let (_cancel_tx, cancel_rx) = watch::channel(false);
        for candidate in &self.settings.interpreter_candidates {
            let Some(program) = self.interpreter_path(candidate) else {
                continue;
            };
            let probe = self
                .runner
                .run_command(
                    &program,
                    &[OsString::from("--version")],
                    Path::new("."),
                    self.settings.probe_timeout(),
                    cancel_rx.clone(),
                    |_| {},
                )
                .await;
            match probe {
                Ok(outcome) if outcome.exit_code == Some(0) => {
                    log::info!(
                        "[Resolver] Interpreter {} ({})",
                        program.display(),
                        outcome.exit_text.trim()
                    );
                    *lock(&self.interpreter) = Some(program.clone());
                    return Ok(program);
                }
                Ok(outcome) => log::debug!(
                    "[Resolver] Interpreter candidate {} rejected (exit {:?})",
                    program.display(),
                    outcome.exit_code
                ),
                Err(e) => log::debug!("[Resolver] Interpreter candidate {}: {}", candidate, e),
            }
        }

        Err(ToolError::InterpreterNotFound(kind.as_str().to_string()))
    }

    fn interpreter_path(&self, candidate: &str) -> Option<PathBuf> {
        let path = Path::new(candidate);
        if path.components().count() > 1 {
            return path.is_file().then(|| path.to_path_buf());
        }
        find_in_dirs(&path_dirs(), &[candidate])
    }
}
