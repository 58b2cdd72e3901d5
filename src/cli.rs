use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// sysinstall - automatic partition provisioning for the OS installer
#[derive(Parser)]
#[command(name = "sysinstall")]
#[command(about = "Plan and provision installer partition layouts")]
#[command(version)]
pub struct Cli {
    /// Policy document (JSON, one section per firmware mode)
    #[arg(long, global = true)]
    pub policy: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show host facts and the disks the installer would offer
    Probe,
    /// Simulate provisioning for a settings file without touching any disk
    Plan {
        /// Installer settings (JSON)
        #[arg(short, long)]
        settings: PathBuf,
        /// Pretend the host has this much RAM, in GB
        #[arg(long)]
        ram: Option<f64>,
    },
    /// Partition and format according to a settings file (DESTRUCTIVE)
    Provision {
        /// Installer settings (JSON); produced paths are written back
        #[arg(short, long)]
        settings: PathBuf,
        /// Confirm that the target disks may be wiped
        #[arg(long)]
        yes: bool,
    },
    /// Write fstab and run configuration steps on a mounted target
    Configure {
        /// Installer settings with produced paths
        #[arg(short, long)]
        settings: PathBuf,
        /// Mount point of the new ROOT
        #[arg(short, long, default_value = "/mnt")]
        target: PathBuf,
        #[arg(long)]
        hostname: String,
        /// Create the swap file without running mkswap
        #[arg(long)]
        no_mkswap: bool,
    },
    /// Print the minimum ROOT size for a RAM amount
    MinRootSize {
        /// RAM in GB (defaults to the host's)
        #[arg(long)]
        ram: Option<f64>,
        /// Swap lives on a partition, not in a file on ROOT
        #[arg(long)]
        no_swap: bool,
    },
    /// Check a RAID selection against the current disks
    CheckRaid {
        /// RAID level: 0, 1, 5, 6 or 10
        #[arg(short, long)]
        level: u8,
        /// Member disks
        #[arg(short, long, num_args = 1.., required = true)]
        disks: Vec<PathBuf>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
