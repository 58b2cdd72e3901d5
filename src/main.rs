//! sysinstall - main entry point
//!
//! Thin front end over the provisioning engine. Every command except
//! `provision` is read-only; `plan` replays the probed disks into the
//! in-memory backend and provisions there.

use std::path::Path;
use std::sync::mpsc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use sysinstall::backend::{DeviceBackend, FakeBackend, SystemBackend};
use sysinstall::cli::{Cli, Commands};
use sysinstall::config::PolicyConfig;
use sysinstall::engine::inventory::{BlockDeviceInventory, MIN_DISK_SIZE};
use sysinstall::engine::provision::PartitionProvisioner;
use sysinstall::engine::raid::{self, RaidSpec};
use sysinstall::engine::size::{SizePolicy, display_size, gb_to_bytes, swap_file_size};
use sysinstall::fstab;
use sysinstall::hardware::{self, FirmwareMode, HostInfo};
use sysinstall::pipeline::{
    self, ConfigStep, HostnameStep, InstallStage, Progress, StageTracker, SwapFileStep,
};
use sysinstall::process_guard;
use sysinstall::settings::InstallSettings;
use sysinstall::types::RaidLevel;

/// Initialize tracing: RUST_LOG wins, otherwise info (debug with --verbose)
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);
    info!("sysinstall starting up");

    // Children (parted, mkfs, mdadm) are killed on SIGINT/SIGTERM/SIGHUP
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    debug!("Signal handlers initialized");

    let policy_path = cli.policy.as_deref();
    match cli.command {
        Commands::Probe => run_probe(),
        Commands::Plan { settings, ram } => run_plan(policy_path, &settings, ram),
        Commands::Provision { settings, yes } => run_provision(policy_path, &settings, yes),
        Commands::Configure {
            settings,
            target,
            hostname,
            no_mkswap,
        } => run_configure(policy_path, &settings, &target, &hostname, no_mkswap),
        Commands::MinRootSize { ram, no_swap } => run_min_root_size(policy_path, ram, no_swap),
        Commands::CheckRaid { level, disks } => run_check_raid(level, disks),
    }
}

fn load_policy(path: Option<&Path>, firmware: FirmwareMode) -> Result<PolicyConfig> {
    match path {
        Some(path) => PolicyConfig::load(path, firmware),
        None => Ok(PolicyConfig::defaults(firmware)),
    }
}

fn load_settings(path: &Path) -> Result<InstallSettings> {
    let settings = InstallSettings::load_from_file(path)?;
    settings
        .validate()
        .with_context(|| format!("Invalid settings in {:?}", path))?;
    Ok(settings)
}

fn run_probe() -> Result<()> {
    let host = HostInfo::detect()?;
    println!("{}", host);
    if let Err(e) = hardware::check_minimum_ram(host.ram_bytes) {
        println!("✗ {}", e);
    }

    let snapshot = SystemBackend::new()
        .list_block_devices()
        .context("Failed to list block devices")?;
    let eligible: Vec<_> = snapshot
        .eligible_disks(MIN_DISK_SIZE)
        .map(|d| d.path.clone())
        .collect();

    for disk in &snapshot.disks {
        let marker = if eligible.contains(&disk.path) { "✓" } else { " " };
        println!(
            "{} {} {} ({:?})",
            marker,
            disk.path.display(),
            display_size(disk.size),
            disk.kind
        );
        for part in &disk.partitions {
            println!(
                "    {} {} {}",
                part.path.display(),
                display_size(part.size),
                part.fstype.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

fn run_plan(policy_path: Option<&Path>, settings_path: &Path, ram_gb: Option<f64>) -> Result<()> {
    let settings = load_settings(settings_path)?;
    if !settings.auto_part {
        anyhow::bail!("AUTO_PART is off; nothing to plan");
    }
    let firmware = hardware::detect_firmware_mode();
    let ram = match ram_gb {
        Some(gb) => gb_to_bytes(gb),
        None => hardware::detect_total_ram()?,
    };
    let mut policy = load_policy(policy_path, firmware)?;
    policy.settle_delay = std::time::Duration::ZERO;

    let snapshot = SystemBackend::new()
        .list_block_devices()
        .context("Failed to list block devices")?;
    let simulated = FakeBackend::from_snapshot(&snapshot);
    let request = settings.to_request(firmware);

    let result = PartitionProvisioner::new(&simulated, &policy, ram)
        .plan_and_provision(&request)
        .context("Simulated provisioning failed")?;

    println!("{}", result.summary());
    println!();
    println!("fstab preview:");
    let entries = fstab::entries_for(&result, &simulated, &policy, &request.swap);
    print!("{}", fstab::render(&entries));
    Ok(())
}

fn run_provision(policy_path: Option<&Path>, settings_path: &Path, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!("provision wipes the selected disks; re-run with --yes to confirm");
    }

    let host = HostInfo::detect()?;
    hardware::check_minimum_ram(host.ram_bytes)?;
    let policy = load_policy(policy_path, host.firmware)?;
    let mut settings = load_settings(settings_path)?;
    let backend = SystemBackend::new();

    if !settings.auto_part {
        let snapshot = BlockDeviceInventory::new(&backend, policy.settle_delay).probe()?;
        let size = SizePolicy::new(&policy).check_manual_root(
            &snapshot,
            Path::new(settings.root.trim()),
            settings.swap_policy().is_file(),
            host.ram_bytes,
        )?;
        println!("✓ ROOT {} ({}) is large enough", settings.root, display_size(size));
        return Ok(());
    }

    let mut tracker = StageTracker::new();
    tracker.confirm_destructive_operations();
    tracker.transition_to(InstallStage::Partitioning)?;

    let request = settings.to_request(host.firmware);
    let result = match PartitionProvisioner::new(&backend, &policy, host.ram_bytes)
        .plan_and_provision(&request)
    {
        Ok(result) => result,
        Err(e) => {
            let _ = tracker.fail();
            return Err(e).context("Provisioning failed; reboot and retry");
        }
    };

    settings.apply_result(&result);
    settings.save_to_file(settings_path)?;
    println!("{}", result.summary());
    println!("✓ Settings updated: {:?}", settings_path);
    Ok(())
}

fn run_configure(
    policy_path: Option<&Path>,
    settings_path: &Path,
    target: &Path,
    hostname: &str,
    no_mkswap: bool,
) -> Result<()> {
    let host = HostInfo::detect()?;
    let policy = load_policy(policy_path, host.firmware)?;
    let settings = load_settings(settings_path)?;
    let swap = settings.swap_policy();

    // Mounting and root extraction happen outside this tool
    let mut tracker = StageTracker::resume_at(InstallStage::ExtractingRoot)?;
    let (tx, rx) = mpsc::channel();
    let progress = Progress::with_events(tx);

    tracker.transition_to(InstallStage::GeneratingFstab)?;
    progress.report(tracker.progress_percent(), "generating fstab");
    let entries =
        fstab::entries_for_mounts(&settings.mount_paths(), &SystemBackend::new(), &policy, &swap);
    fstab::write_fstab(target, &entries)?;

    tracker.transition_to(InstallStage::Configuring)?;
    progress.report(tracker.progress_percent(), "configuring");

    let mut steps: Vec<Box<dyn ConfigStep>> = vec![Box::new(HostnameStep::new(hostname)?)];
    if swap.is_file() {
        let step = SwapFileStep::new(swap_file_size(host.ram_bytes));
        steps.push(Box::new(if no_mkswap { step.without_mkswap() } else { step }));
    }

    let reports = pipeline::run_concurrent(
        &steps,
        target,
        &progress,
        InstallStage::Configuring.progress_percent(),
        InstallStage::Bootloader.progress_percent(),
    );
    drop(progress);
    for event in rx.iter() {
        println!("[{:>3}%] {}", event.percent, event.message);
    }

    let failed: Vec<String> = reports
        .iter()
        .filter_map(|r| r.outcome.as_ref().err().map(|e| format!("{}: {}", r.name, e)))
        .collect();
    if !failed.is_empty() {
        let _ = tracker.fail();
        anyhow::bail!("Configuration steps failed: {}", failed.join("; "));
    }
    println!("✓ Target configured: {:?}", target);
    Ok(())
}

fn run_min_root_size(policy_path: Option<&Path>, ram_gb: Option<f64>, no_swap: bool) -> Result<()> {
    let ram = match ram_gb {
        Some(gb) => gb_to_bytes(gb),
        None => hardware::detect_total_ram()?,
    };
    let policy = load_policy(policy_path, hardware::detect_firmware_mode())?;
    let size = SizePolicy::new(&policy).minimum_root_size(!no_swap, ram);
    println!("{} ({} bytes)", display_size(size), size);
    Ok(())
}

fn run_check_raid(level: u8, disks: Vec<std::path::PathBuf>) -> Result<()> {
    let level = RaidLevel::try_from(level).map_err(anyhow::Error::msg)?;
    let spec = RaidSpec::new(level, disks);
    let snapshot = SystemBackend::new()
        .list_block_devices()
        .context("Failed to list block devices")?;
    raid::validate(&spec, &snapshot).context("RAID selection rejected")?;
    println!("✓ {} with {} disk(s) is valid", level, spec.disks.len());
    Ok(())
}
