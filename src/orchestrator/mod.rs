//! Flash Orchestration: ToolResolving -> Extracting -> Flashing(1..N) -> Rebooting.
//!
//! One `FlashOrchestrator::run` call drives a whole session and always ends
//! with a `SessionReport`. Fatal problems before the first partition (tool,
//! extraction, plan) end the session as `Failed`; per-partition failures are
//! recorded and only halt the session when the partition is critical.

pub mod plan;
pub mod progress;
pub mod session;
pub mod state;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use uuid::Uuid;

pub use plan::{build_plan, manual_entry, CriticalSet, FlashPlan, PlanBuild, PlanEntry};
pub use progress::ProgressAggregator;
pub use session::{FlashService, SessionHandle};
pub use state::{FlashPhase, PhaseTracker};

use crate::config::Settings;
use crate::error::{ExtractError, FlashError};
use crate::firmware::{FirmwareExtractor, ScratchDir};
use crate::models::{
    DeviceHandle, OutputLine, PartitionEntry, PartitionResult, PartitionStatus, ProcessOutcome,
    SessionReport, ToolHandle,
};
use crate::partition;
use crate::process::ProcessRunner;
use crate::tools::{select_loader, ToolResolver};
use crate::vendor::{classify_output, Operation, OutputVerdict, TemplateVars, Vendor};

/// Where the images of a session come from.
#[derive(Debug, Clone)]
pub enum FlashSource {
    /// Firmware containers to unpack and bind against a partition table
    Firmware {
        containers: Vec<PathBuf>,
        /// Table supplied by the caller; read from the device when absent
        partition_table: Option<Vec<PartitionEntry>>,
    },
    /// A plan built ahead of time (e.g. manual `partition=image` pairs)
    Plan(FlashPlan),
}

/// Everything needed to run one flash session.
#[derive(Debug, Clone)]
pub struct FlashRequest {
    pub device: DeviceHandle,
    pub source: FlashSource,
    pub preserve_user_data: bool,
    pub critical: CriticalSet,
    /// Explicit tool; resolved from the device vendor when absent
    pub tool: Option<ToolHandle>,
    /// Explicit chipset loader (Qualcomm/MediaTek)
    pub loader: Option<PathBuf>,
    pub reboot: bool,
}

impl FlashRequest {
    /// Flash firmware containers. User data is preserved unless told otherwise.
    pub fn firmware(device: DeviceHandle, containers: Vec<PathBuf>) -> Self {
        FlashRequest {
            device,
            source: FlashSource::Firmware {
                containers,
                partition_table: None,
            },
            preserve_user_data: true,
            critical: CriticalSet::new(),
            tool: None,
            loader: None,
            reboot: true,
        }
    }

    pub fn plan(device: DeviceHandle, plan: FlashPlan) -> Self {
        let preserve_user_data = plan.preserve_user_data;
        FlashRequest {
            device,
            source: FlashSource::Plan(plan),
            preserve_user_data,
            critical: CriticalSet::new(),
            tool: None,
            loader: None,
            reboot: true,
        }
    }

    pub fn with_partition_table(mut self, table: Vec<PartitionEntry>) -> Self {
        if let FlashSource::Firmware { partition_table, .. } = &mut self.source {
            *partition_table = Some(table);
        }
        self
    }

    pub fn preserve_user_data(mut self, preserve: bool) -> Self {
        self.preserve_user_data = preserve;
        self
    }

    pub fn with_critical(mut self, critical: CriticalSet) -> Self {
        self.critical = critical;
        self
    }

    pub fn with_tool(mut self, tool: ToolHandle) -> Self {
        self.tool = Some(tool);
        self
    }

    pub fn with_loader(mut self, loader: impl Into<PathBuf>) -> Self {
        self.loader = Some(loader.into());
        self
    }

    pub fn without_reboot(mut self) -> Self {
        self.reboot = false;
        self
    }
}

/// Session event streamed to observers.
#[derive(Debug, Clone)]
pub struct FlashEvent {
    pub session: Uuid,
    pub kind: FlashEventKind,
}

#[derive(Debug, Clone)]
pub enum FlashEventKind {
    Phase(FlashPhase),
    /// Overall session progress (0-100, monotonic)
    Progress(u8),
    /// One line of tool output
    Log(String),
    PartitionFinished(PartitionResult),
    Finished(SessionReport),
}

/// Mutable state of one running session.
struct SessionContext {
    id: Uuid,
    events: mpsc::UnboundedSender<FlashEvent>,
    tracker: PhaseTracker,
    report: SessionReport,
    scratch: Option<ScratchDir>,
    /// Tool invocations so far; Samsung needs `--resume` after the first
    invocations: usize,
}

impl SessionContext {
    fn new(id: Uuid, events: mpsc::UnboundedSender<FlashEvent>) -> Self {
        SessionContext {
            id,
            events,
            tracker: PhaseTracker::new(),
            report: SessionReport::new(id),
            scratch: None,
            invocations: 0,
        }
    }

    fn emit(&self, kind: FlashEventKind) {
        // Observers may have gone away; the session still runs to completion.
        let _ = self.events.send(FlashEvent { session: self.id, kind });
    }

    fn enter(&mut self, phase: FlashPhase) -> Result<(), FlashError> {
        self.tracker.transition(phase)?;
        log::info!(target: "parsed", "[Flash] Session {} -> {}", self.id.simple(), phase);
        self.emit(FlashEventKind::Phase(phase));
        Ok(())
    }

    fn record(&mut self, result: PartitionResult) {
        log::info!(
            target: "parsed",
            "[Flash] {} <- {}: {}{}",
            result.partition,
            result.image.display(),
            result.status,
            if result.critical { " (critical)" } else { "" }
        );
        self.emit(FlashEventKind::PartitionFinished(result.clone()));
        self.report.partitions.push(result);
    }
}

/// Drives flash sessions: resolve tool, unpack, plan, flash, reboot.
pub struct FlashOrchestrator {
    settings: Settings,
    resolver: Arc<ToolResolver>,
    runner: ProcessRunner,
    extractor: FirmwareExtractor,
}

impl FlashOrchestrator {
    pub fn new(settings: Settings, resolver: Arc<ToolResolver>) -> Self {
        FlashOrchestrator {
            settings,
            resolver,
            runner: ProcessRunner::new(),
            extractor: FirmwareExtractor::new(),
        }
    }

    pub fn with_runner(mut self, runner: ProcessRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn resolver(&self) -> &Arc<ToolResolver> {
        &self.resolver
    }

    /// Run one session to a terminal phase.
    ///
    /// Never returns an error: every failure is folded into the report, which
    /// is also sent as the final `Finished` event.
    pub async fn run(
        &self,
        session_id: Uuid,
        request: FlashRequest,
        cancel_rx: watch::Receiver<bool>,
        events: mpsc::UnboundedSender<FlashEvent>,
    ) -> SessionReport {
        let mut ctx = SessionContext::new(session_id, events);
        log::info!(
            target: "parsed",
            "[Flash] Session {} started for {} device {}",
            session_id.simple(),
            request.device.vendor,
            request.device.id
        );

        let final_phase = match self.drive(&mut ctx, request, cancel_rx).await {
            Ok(phase) => phase,
            Err(e) => {
                log::error!(target: "parsed", "[Flash] Session {} failed: {}", session_id.simple(), e);
                ctx.report.error = Some(e.user_message());
                if !ctx.tracker.current().is_terminal() {
                    let _ = ctx.enter(FlashPhase::Failed);
                }
                FlashPhase::Failed
            }
        };
        if let Some(status) = final_phase.session_status() {
            ctx.report.status = status;
        }

        if let Some(scratch) = ctx.scratch.take() {
            let path = scratch.path().to_path_buf();
            if let Err(e) = scratch.close() {
                log::warn!("[Flash] Could not remove scratch dir {}: {}", path.display(), e);
            }
        }

        log::info!(target: "parsed", "[Flash] {}", ctx.report.summary());
        let report = ctx.report.clone();
        ctx.emit(FlashEventKind::Finished(report.clone()));
        report
    }

    async fn drive(
        &self,
        ctx: &mut SessionContext,
        request: FlashRequest,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<FlashPhase, FlashError> {
        let vendor = request.device.vendor;

        ctx.enter(FlashPhase::ToolResolving)?;
        if *cancel_rx.borrow() {
            return cancelled(ctx);
        }
        let tool = match &request.tool {
            Some(tool) => tool.clone(),
            None => self.resolver.resolve(vendor.tool_kind()).await?,
        };
        let loader = self.loader_for(&request);
        if let Some(loader) = &loader {
            log::info!("[Flash] Using loader {}", loader.display());
        }

        ctx.enter(FlashPhase::Extracting)?;
        if *cancel_rx.borrow() {
            return cancelled(ctx);
        }
        let plan = match request.source {
            FlashSource::Plan(plan) => plan.with_preservation(request.preserve_user_data)?,
            FlashSource::Firmware {
                containers,
                partition_table,
            } => {
                let scratch = ScratchDir::new(&self.settings.scratch_root).map_err(ExtractError::from)?;
                let dest = scratch.path().to_path_buf();
                ctx.scratch = Some(scratch);

                let extractor = self.extractor;
                let package = tokio::task::spawn_blocking(move || extractor.extract_package(&containers, &dest))
                    .await
                    .map_err(|e| ExtractError::from(io::Error::new(io::ErrorKind::Other, e.to_string())))??;
                ctx.report.extraction_errors = package.errors.clone();
                if !package.other_files.is_empty() {
                    log::info!(
                        "[Flash] {} non-image file(s) in the package are not flashed",
                        package.other_files.len()
                    );
                }

                let table = match partition_table.or(package.scatter_table) {
                    Some(table) => Some(table),
                    None if vendor.reads_table_from_device() => {
                        match self.read_table(ctx, &tool, vendor, loader.as_deref(), &cancel_rx).await? {
                            TableRead::Entries(entries) => Some(entries),
                            TableRead::Unavailable => None,
                            TableRead::Cancelled => return cancelled(ctx),
                        }
                    }
                    None => None,
                };
                if table.is_none() {
                    log::warn!("[Flash] No partition table available, binding images by file name");
                }

                let PlanBuild { plan, unbound } =
                    build_plan(table.as_deref(), package.images, request.preserve_user_data)?;
                ctx.report.unbound_images = unbound;
                plan
            }
        };
        log::debug!("[Flash] Flashing order: {}", plan.partition_names().join(" -> "));

        let halted = self
            .flash_partitions(ctx, &plan, &request.critical, &tool, vendor, loader.as_deref(), &cancel_rx)
            .await?;
        match halted {
            Some(FlashPhase::Cancelled) => return cancelled(ctx),
            Some(_) => {
                ctx.enter(FlashPhase::Failed)?;
                return Ok(FlashPhase::Failed);
            }
            None => {}
        }

        if request.reboot {
            ctx.enter(FlashPhase::Rebooting)?;
            let rebooted = self.reboot(ctx, &tool, vendor, loader.as_deref(), &cancel_rx).await;
            ctx.report.rebooted = Some(rebooted);
        }
        ctx.enter(FlashPhase::Done)?;
        Ok(FlashPhase::Done)
    }

    /// Flash every plan entry in order. Returns the halting phase, if any.
    #[allow(clippy::too_many_arguments)]
    async fn flash_partitions(
        &self,
        ctx: &mut SessionContext,
        plan: &FlashPlan,
        critical: &CriticalSet,
        tool: &ToolHandle,
        vendor: Vendor,
        loader: Option<&std::path::Path>,
        cancel_rx: &watch::Receiver<bool>,
    ) -> Result<Option<FlashPhase>, FlashError> {
        let total = plan.len();
        let mut progress = ProgressAggregator::new(total);
        let mut halted: Option<FlashPhase> = None;

        for (i, entry) in plan.entries().iter().enumerate() {
            let is_critical = critical.is_critical(entry);
            if halted.is_none() && *cancel_rx.borrow() {
                log::warn!("[Flash] Cancel requested before {}", entry.partition.name);
                halted = Some(FlashPhase::Cancelled);
            }
            if halted.is_some() {
                ctx.report.partitions.push(PartitionResult {
                    partition: entry.partition.name.clone(),
                    image: entry.image.clone(),
                    critical: is_critical,
                    status: PartitionStatus::NotAttempted,
                    last_progress: None,
                });
                continue;
            }

            ctx.enter(FlashPhase::Flashing { index: i + 1, total })?;
            let args = vendor.arguments(
                Operation::Flash,
                &TemplateVars {
                    partition: Some(entry.partition.name.as_str()),
                    image: Some(entry.image.as_path()),
                    loader,
                    resume: ctx.invocations > 0,
                },
            );

            let events = ctx.events.clone();
            let id = ctx.id;
            let partition = entry.partition.name.clone();
            let outcome = self
                .runner
                .run(tool, &args, self.settings.flash_timeout(), cancel_rx.clone(), |line: &OutputLine| {
                    log::info!("[Flash] [{}] {}", partition, line.text);
                    let _ = events.send(FlashEvent {
                        session: id,
                        kind: FlashEventKind::Log(line.text.clone()),
                    });
                    if let Some(sub) = line.progress {
                        let before = progress.overall();
                        let overall = progress.update(sub);
                        if overall != before {
                            let _ = events.send(FlashEvent {
                                session: id,
                                kind: FlashEventKind::Progress(overall),
                            });
                        }
                    }
                })
                .await;
            ctx.invocations += 1;

            let status = partition_status(vendor, &outcome);
            let last_progress = outcome.as_ref().ok().and_then(|o| o.last_progress_percent);
            let before = progress.overall();
            let overall = progress.partition_finished();
            if overall != before {
                ctx.emit(FlashEventKind::Progress(overall));
            }

            if status == PartitionStatus::Cancelled {
                halted = Some(FlashPhase::Cancelled);
            } else if status.is_failure() && is_critical {
                log::error!(
                    target: "parsed",
                    "[Flash] Critical partition {} failed, halting session",
                    entry.partition.name
                );
                ctx.report.error = Some(format!("Critical partition {} failed: {}", entry.partition.name, status));
                halted = Some(FlashPhase::Failed);
            } else if status.is_failure() {
                log::warn!("[Flash] {} failed, continuing with remaining partitions", entry.partition.name);
            }

            ctx.record(PartitionResult {
                partition: entry.partition.name.clone(),
                image: entry.image.clone(),
                critical: is_critical,
                status,
                last_progress,
            });
        }

        Ok(halted)
    }

    async fn read_table(
        &self,
        ctx: &mut SessionContext,
        tool: &ToolHandle,
        vendor: Vendor,
        loader: Option<&std::path::Path>,
        cancel_rx: &watch::Receiver<bool>,
    ) -> Result<TableRead, FlashError> {
        let args = vendor.arguments(
            Operation::PrintTable,
            &TemplateVars {
                loader,
                resume: ctx.invocations > 0,
                ..TemplateVars::default()
            },
        );
        log::info!("[Flash] Reading partition table from device");
        let outcome = self
            .runner
            .run(tool, &args, self.settings.table_timeout(), cancel_rx.clone(), |line: &OutputLine| {
                log::debug!("[Flash] [table] {}", line.text);
            })
            .await?;
        ctx.invocations += 1;

        if outcome.cancelled {
            return Ok(TableRead::Cancelled);
        }
        if outcome.timed_out {
            log::warn!("[Flash] Partition table read timed out");
            return Ok(TableRead::Unavailable);
        }
        match partition::parse_table(vendor, &outcome.exit_text) {
            Ok(entries) => {
                log::info!(target: "parsed", "[Flash] Device reports {} partitions", entries.len());
                Ok(TableRead::Entries(entries))
            }
            Err(e) => {
                log::warn!("[Flash] {}", e);
                Ok(TableRead::Unavailable)
            }
        }
    }

    /// Best-effort reboot; the session outcome does not depend on it.
    async fn reboot(
        &self,
        ctx: &mut SessionContext,
        tool: &ToolHandle,
        vendor: Vendor,
        loader: Option<&std::path::Path>,
        cancel_rx: &watch::Receiver<bool>,
    ) -> bool {
        let args = vendor.arguments(
            Operation::Reboot,
            &TemplateVars {
                loader,
                resume: ctx.invocations > 0,
                ..TemplateVars::default()
            },
        );
        let outcome = self
            .runner
            .run(tool, &args, self.settings.reboot_timeout(), cancel_rx.clone(), |line: &OutputLine| {
                log::info!("[Flash] [reboot] {}", line.text);
            })
            .await;
        ctx.invocations += 1;

        match outcome {
            Ok(o) if !o.interrupted() && o.exit_code == Some(0) => true,
            Ok(o) => {
                log::warn!("[Flash] Reboot did not complete (exit {:?})", o.exit_code);
                false
            }
            Err(e) => {
                log::warn!("[Flash] Reboot failed: {}", e);
                false
            }
        }
    }

    fn loader_for(&self, request: &FlashRequest) -> Option<PathBuf> {
        if request.loader.is_some() {
            return request.loader.clone();
        }
        let chipset = request.device.chipset.as_deref()?;
        select_loader(&self.settings.loaders_dir, request.device.vendor, chipset)
    }
}

enum TableRead {
    Entries(Vec<PartitionEntry>),
    Unavailable,
    Cancelled,
}

fn cancelled(ctx: &mut SessionContext) -> Result<FlashPhase, FlashError> {
    log::warn!(
        target: "parsed",
        "[Flash] Session {} cancelled; partitions already written stay written and the device may not boot",
        ctx.id.simple()
    );
    ctx.enter(FlashPhase::Cancelled)?;
    Ok(FlashPhase::Cancelled)
}

/// Verdict for one tool invocation. Interruption wins over output markers.
fn partition_status(
    vendor: Vendor,
    outcome: &Result<ProcessOutcome, crate::error::ProcessError>,
) -> PartitionStatus {
    match outcome {
        Ok(o) if o.cancelled => PartitionStatus::Cancelled,
        Ok(o) if o.timed_out => PartitionStatus::TimedOut,
        Ok(o) => match classify_output(vendor, &o.exit_text, o.exit_code) {
            OutputVerdict::Success => PartitionStatus::Succeeded,
            OutputVerdict::Failure(reason) => PartitionStatus::Failed(reason),
        },
        Err(e) => PartitionStatus::Failed(e.to_string()),
    }
}
