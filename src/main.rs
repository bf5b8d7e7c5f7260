use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};

use omniflash::config::{default_settings_path, load_settings_or_default};
use omniflash::log_collector::default_logs_path;
use omniflash::orchestrator::{manual_entry, FlashEventKind};
use omniflash::{
    parse_table, CriticalSet, DeviceHandle, FirmwareExtractor, FirmwareRole, FlashOrchestrator,
    FlashPlan, FlashRequest, FlashService, LogCollector, SessionStatus, Settings, ToolHandle,
    ToolKind, ToolResolver, Vendor,
};

#[derive(Parser)]
#[command(name = "omniflash")]
#[command(about = "Vendor-agnostic firmware flashing for Samsung, Qualcomm and MediaTek devices", version)]
struct Cli {
    /// Settings file (JSON); defaults apply when it does not exist
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Directory for full and parsed session logs
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Log debug lines, including every line of tool output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a partition table dump (PIT print, GPT print or scatter file)
    Parse {
        #[arg(long)]
        vendor: Vendor,
        file: PathBuf,
    },
    /// Locate a vendor tool, downloading and installing it if missing
    Resolve {
        /// heimdall, edl or mtk
        tool: ToolKind,
    },
    /// Unpack firmware containers and show the images with their roles
    Extract {
        #[arg(short, long)]
        out: PathBuf,
        #[arg(required = true)]
        containers: Vec<PathBuf>,
    },
    /// Flash firmware onto a device
    Flash {
        #[arg(long)]
        vendor: Vendor,

        /// Device identifier (USB path or serial)
        #[arg(long)]
        device: String,

        /// Chipset name used to pick a loader
        #[arg(long)]
        chipset: Option<String>,

        /// Partition table dump to bind against instead of reading the device
        #[arg(long)]
        table: Option<PathBuf>,

        /// Factory reset: flash CSC instead of HOME_CSC
        #[arg(long)]
        wipe: bool,

        /// Partition whose failure halts the session (repeatable)
        #[arg(long = "critical")]
        critical: Vec<String>,

        /// Firmware role whose failure halts the session (repeatable)
        #[arg(long = "critical-role")]
        critical_roles: Vec<FirmwareRole>,

        /// Use this tool executable instead of resolving one
        #[arg(long)]
        tool: Option<PathBuf>,

        /// Chipset loader (firehose programmer or download agent)
        #[arg(long)]
        loader: Option<PathBuf>,

        #[arg(long)]
        no_reboot: bool,

        /// Explicit PARTITION=IMAGE pairs, flashed in order (repeatable)
        #[arg(long = "image", value_parser = parse_image_pair)]
        images: Vec<(String, PathBuf)>,

        /// Firmware containers (zip, tar, tar.md5, scatter file, raw images)
        containers: Vec<PathBuf>,
    },
}

fn parse_image_pair(s: &str) -> std::result::Result<(String, PathBuf), String> {
    let (partition, image) = s
        .split_once('=')
        .ok_or_else(|| format!("expected PARTITION=IMAGE, got '{}'", s))?;
    if partition.trim().is_empty() || image.trim().is_empty() {
        return Err(format!("expected PARTITION=IMAGE, got '{}'", s));
    }
    Ok((partition.trim().to_string(), PathBuf::from(image.trim())))
}

fn init_logging(log_dir: Option<PathBuf>, verbose: bool) -> Result<LogCollector> {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let collector = LogCollector::new(log_dir.unwrap_or_else(default_logs_path), None)
        .context("Failed to initialize log collector")?
        .with_max_level(level)
        .with_echo(true);

    log::set_boxed_logger(Box::new(collector.clone()))
        .map(|()| log::set_max_level(level))
        .map_err(|e| anyhow!("Failed to register logger: {}", e))?;
    Ok(collector)
}

fn load_settings(path: Option<PathBuf>) -> Result<Settings> {
    let path = match path {
        Some(path) => path,
        None => default_settings_path()?,
    };
    let settings = load_settings_or_default(&path)?;
    log::debug!("Settings from {}", path.display());
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let collector = init_logging(cli.log_dir, cli.verbose)?;
    let settings = load_settings(cli.settings)?;

    let code = match cli.command {
        Commands::Parse { vendor, file } => cmd_parse(vendor, &file)?,
        Commands::Resolve { tool } => cmd_resolve(settings, tool).await?,
        Commands::Extract { out, containers } => cmd_extract(&containers, &out).await?,
        Commands::Flash {
            vendor,
            device,
            chipset,
            table,
            wipe,
            critical,
            critical_roles,
            tool,
            loader,
            no_reboot,
            images,
            containers,
        } => {
            let mut device = DeviceHandle::new(device, vendor);
            if let Some(chipset) = chipset {
                device = device.with_chipset(chipset);
            }

            let preserve = !wipe;
            let mut request = if images.is_empty() {
                if containers.is_empty() {
                    bail!("Nothing to flash: pass firmware containers or --image PARTITION=IMAGE");
                }
                FlashRequest::firmware(device, containers).preserve_user_data(preserve)
            } else {
                let entries = images.iter().map(|(p, i)| manual_entry(p, i)).collect();
                FlashRequest::plan(device, FlashPlan::new(entries, preserve)?)
            };

            if let Some(table) = table {
                let raw = std::fs::read_to_string(&table)
                    .with_context(|| format!("Cannot read {}", table.display()))?;
                request = request.with_partition_table(parse_table(vendor, &raw)?);
            }

            let names = if critical.is_empty() {
                settings.critical_partitions_for(vendor)
            } else {
                critical
            };
            let critical_set = critical_roles
                .into_iter()
                .fold(CriticalSet::from_partitions(names), CriticalSet::with_role);
            request = request.with_critical(critical_set);

            if let Some(tool) = tool {
                request = request.with_tool(ToolHandle::executable(vendor.tool_kind(), tool));
            }
            if let Some(loader) = loader {
                request = request.with_loader(loader);
            }
            if no_reboot {
                request = request.without_reboot();
            }

            cmd_flash(settings, request, &collector).await?
        }
    };

    if let Err(e) = collector.wait_for_empty().await {
        eprintln!("[Log] {}", e);
    }
    Ok(code)
}

fn cmd_parse(vendor: Vendor, file: &Path) -> Result<ExitCode> {
    let raw = std::fs::read_to_string(file).with_context(|| format!("Cannot read {}", file.display()))?;
    let entries = parse_table(vendor, &raw)?;
    println!("{:<24} {:>14} {:>14}  {}", "PARTITION", "OFFSET", "SIZE", "DETAILS");
    for entry in &entries {
        println!(
            "{:<24} {:>#14x} {:>14}  {}",
            entry.name, entry.start_offset, entry.size_bytes, entry.vendor_tag
        );
    }
    println!("{} partition(s)", entries.len());
    Ok(ExitCode::SUCCESS)
}

async fn cmd_resolve(settings: Settings, kind: ToolKind) -> Result<ExitCode> {
    let resolver = ToolResolver::new(settings)?;
    let handle = resolver.resolve(kind).await?;
    println!("{}: {}", kind, handle.program.display());
    if let Some(interpreter) = &handle.interpreter {
        println!("  interpreter: {}", interpreter.display());
    }
    println!("  working dir: {}", handle.working_dir.display());
    Ok(ExitCode::SUCCESS)
}

async fn cmd_extract(containers: &[PathBuf], out: &Path) -> Result<ExitCode> {
    let containers = containers.to_vec();
    let dest = out.to_path_buf();
    let package = tokio::task::spawn_blocking(move || FirmwareExtractor::new().extract_package(&containers, &dest))
        .await??;
    for image in &package.images {
        let role = image.role.map(|r| r.token()).unwrap_or("-");
        println!("{:<10} {:<20} {}", role, image.partition_hint, image.path.display());
    }
    for file in &package.other_files {
        println!("{:<10} {:<20} {}", "-", "(not an image)", file.display());
    }
    if let Some(table) = &package.scatter_table {
        println!("scatter table: {} partition(s)", table.len());
    }
    for error in &package.errors {
        eprintln!("not extracted: {}", error);
    }
    Ok(if package.errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

async fn cmd_flash(settings: Settings, request: FlashRequest, collector: &LogCollector) -> Result<ExitCode> {
    let resolver = Arc::new(ToolResolver::new(settings.clone())?);
    let service = FlashService::new(FlashOrchestrator::new(settings, resolver));

    let mut handle = service.start_flash(request)?;
    let log_path = collector.start_session(handle.id);
    log::info!("Session {} logging to {}", handle.id.simple(), log_path.display());

    if let Some(mut events) = handle.take_events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event.kind {
                    FlashEventKind::Phase(phase) => println!("==> {}", phase),
                    FlashEventKind::Progress(percent) => println!("    {:>3}%", percent),
                    FlashEventKind::PartitionFinished(result) => {
                        println!("    {}: {}", result.partition, result.status)
                    }
                    FlashEventKind::Log(_) | FlashEventKind::Finished(_) => {}
                }
            }
        });
    }

    let ctrl_c_service = service.clone();
    let id = handle.id;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling session, the running tool will be killed");
            let _ = ctrl_c_service.cancel(id);
        }
    });

    let report = handle.wait().await;
    println!();
    print!("{}", report.summary());
    if report.status != SessionStatus::Done || !report.failed_partitions().is_empty() {
        println!("No rollback is performed: partitions already written stay written.");
    }

    let degraded = !report.failed_partitions().is_empty() || !report.extraction_errors.is_empty();
    Ok(match report.status {
        SessionStatus::Done if !degraded => ExitCode::SUCCESS,
        SessionStatus::Done => ExitCode::from(2),
        SessionStatus::Failed | SessionStatus::Cancelled => ExitCode::FAILURE,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_parse_image_pair() {
        assert_eq!(
            parse_image_pair("boot=out/boot.img").unwrap(),
            ("boot".to_string(), PathBuf::from("out/boot.img"))
        );
        assert!(parse_image_pair("boot").is_err());
        assert!(parse_image_pair("=boot.img").is_err());
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }
}
