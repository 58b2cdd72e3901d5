//! Host environment detection
//!
//! Detects firmware mode (UEFI vs BIOS) and installed RAM, the two host facts
//! the partition planner depends on.
//!
//! # Design
//!
//! - **Read-only**: Detection only reads sysfs and procfs
//! - **Safe default**: Firmware detection cannot fail; absence of the EFI
//!   directory means BIOS
//! - **Testable parsing**: `/proc/meminfo` parsing is a pure function over text

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};

/// Hosts with less RAM than this are refused before the wizard starts.
pub const MIN_RAM_BYTES: u64 = 1024 * 1024 * 1024;

/// Detected firmware mode of the system.
///
/// Determined by checking for the existence of `/sys/firmware/efi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirmwareMode {
    /// UEFI firmware: an EFI System Partition is required
    Uefi,
    /// Legacy BIOS firmware: ROOT carries the legacy boot flag
    Bios,
}

impl FirmwareMode {
    /// Returns true if the system booted in UEFI mode.
    pub fn is_uefi(self) -> bool {
        matches!(self, Self::Uefi)
    }

    /// Returns true if the system booted in legacy BIOS mode.
    pub fn is_bios(self) -> bool {
        matches!(self, Self::Bios)
    }
}

impl fmt::Display for FirmwareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uefi => write!(f, "UEFI"),
            Self::Bios => write!(f, "BIOS"),
        }
    }
}

/// Host facts consumed by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostInfo {
    pub firmware: FirmwareMode,
    /// Total installed RAM in bytes
    pub ram_bytes: u64,
}

impl HostInfo {
    /// Detect firmware mode and total RAM.
    pub fn detect() -> Result<Self> {
        let firmware = detect_firmware_mode();
        let ram_bytes = detect_total_ram()?;

        tracing::info!(
            "Host detection: firmware={}, ram={} bytes",
            firmware,
            ram_bytes
        );

        Ok(Self {
            firmware,
            ram_bytes,
        })
    }
}

impl fmt::Display for HostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Firmware: {}, RAM: {:.1} GiB",
            self.firmware,
            self.ram_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
        )
    }
}

// ============================================================================
// Detection Functions
// ============================================================================

/// Detect firmware mode by checking for the EFI sysfs directory.
///
/// The Linux kernel exposes `/sys/firmware/efi` only when booted in UEFI mode.
pub fn detect_firmware_mode() -> FirmwareMode {
    firmware_mode_at(Path::new("/sys/firmware/efi"))
}

/// Firmware mode given the location of the EFI sysfs directory.
pub fn firmware_mode_at(efi_path: &Path) -> FirmwareMode {
    if efi_path.exists() {
        tracing::info!("UEFI firmware detected ({} exists)", efi_path.display());
        FirmwareMode::Uefi
    } else {
        tracing::info!("BIOS firmware detected ({} not found)", efi_path.display());
        FirmwareMode::Bios
    }
}

/// Read total RAM from `/proc/meminfo`.
pub fn detect_total_ram() -> Result<u64> {
    let text = std::fs::read_to_string("/proc/meminfo")?;
    parse_meminfo(&text)
        .ok_or_else(|| ProvisionError::probe("MemTotal not found in /proc/meminfo"))
}

/// Extract `MemTotal` from meminfo text, converted from kB to bytes.
pub fn parse_meminfo(text: &str) -> Option<u64> {
    text.lines().find_map(|line| {
        let rest = line.strip_prefix("MemTotal:")?;
        let mut fields = rest.split_whitespace();
        let value: u64 = fields.next()?.parse().ok()?;
        match fields.next() {
            Some("kB") | None => Some(value * 1024),
            Some(_) => None,
        }
    })
}

/// Refuse hosts below [`MIN_RAM_BYTES`].
pub fn check_minimum_ram(ram_bytes: u64) -> Result<()> {
    if ram_bytes < MIN_RAM_BYTES {
        return Err(ProvisionError::invalid_request(format!(
            "At least 1 GB of RAM is required, found {} MiB",
            ram_bytes / (1024 * 1024)
        )));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
