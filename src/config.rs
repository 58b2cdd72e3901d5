//! Partitioning policy configuration.
//!
//! The policy document is JSON with one optional section per firmware mode:
//!
//! ```json
//! {
//!   "uefi": { "efi_size": "200M", "root_split": 35, "limiter_gb": 32 },
//!   "bios": { "root_filesystem": "ext4" }
//! }
//! ```
//!
//! The section for the detected firmware is merged over the built-in
//! defaults into a [`PolicyConfig`], validated once, and passed by reference
//! to the planner. Missing keys keep their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::size::{Bound, GB, MB, MIB};
use crate::hardware::FirmwareMode;
use crate::types::Filesystem;

/// Smallest EFI System Partition mkfs.fat will build as FAT32.
pub const MIN_EFI_SIZE: u64 = 32 * MIB;

/// Policy configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid size '{value}': {reason}")]
    InvalidBound { value: String, reason: String },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to parse policy document: {0}")]
    Parse(String),
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Validated partitioning policy for one firmware mode.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyConfig {
    pub firmware: FirmwareMode,
    /// Offset of the first partition on a clobbered disk
    pub efi_start: Bound,
    pub efi_size: Bound,
    /// Percentage of a large disk given to ROOT
    pub root_split: f64,
    /// ROOT floor before swap headroom, in bytes
    pub min_root_floor: u64,
    /// Disks at or above this size use `root_split`
    pub mdswh_threshold: u64,
    /// Disks at or below this size get ROOT only
    pub limiter: u64,
    /// Below this, a carved HOME is dropped
    pub min_home_size: Bound,
    pub root_filesystem: Filesystem,
    pub home_filesystem: Filesystem,
    pub raid_device: PathBuf,
    /// Wait after every partition-table change
    pub settle_delay: Duration,
}

impl PolicyConfig {
    /// Built-in defaults.
    pub fn defaults(firmware: FirmwareMode) -> Self {
        Self {
            firmware,
            efi_start: Bound::Bytes(MIB),
            efi_size: Bound::Bytes(200 * MB),
            root_split: 35.0,
            min_root_floor: 23_000 * MB,
            mdswh_threshold: 128 * GB,
            limiter: 32 * GB,
            min_home_size: Bound::Bytes(GB),
            root_filesystem: Filesystem::Btrfs,
            home_filesystem: Filesystem::Btrfs,
            raid_device: PathBuf::from("/dev/md0"),
            settle_delay: Duration::from_millis(100),
        }
    }

    /// Merge a section over the defaults and validate the result.
    pub fn from_overrides(
        firmware: FirmwareMode,
        overrides: &PolicyOverrides,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::defaults(firmware);

        if let Some(v) = overrides.efi_start {
            config.efi_start = v;
        }
        if let Some(v) = overrides.efi_size {
            config.efi_size = v;
        }
        if let Some(v) = overrides.root_split {
            config.root_split = v;
        }
        if let Some(v) = overrides.min_root_size_mb {
            config.min_root_floor = v.saturating_mul(MB);
        }
        if let Some(v) = overrides.mdswh_gb {
            config.mdswh_threshold = v.saturating_mul(GB);
        }
        if let Some(v) = overrides.limiter_gb {
            config.limiter = v.saturating_mul(GB);
        }
        if let Some(v) = overrides.min_home_size {
            config.min_home_size = v;
        }
        if let Some(v) = overrides.root_filesystem {
            config.root_filesystem = v;
        }
        if let Some(v) = overrides.home_filesystem {
            config.home_filesystem = v;
        }
        if let Some(v) = &overrides.raid_device {
            config.raid_device = v.clone();
        }
        if let Some(v) = overrides.settle_delay_ms {
            config.settle_delay = Duration::from_millis(v);
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a policy document and pick the section for `firmware`.
    pub fn from_json_str(text: &str, firmware: FirmwareMode) -> Result<Self, ConfigError> {
        let file: PolicyFile =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let section = match firmware {
            FirmwareMode::Uefi => file.uefi,
            FirmwareMode::Bios => file.bios,
        };
        Self::from_overrides(firmware, &section.unwrap_or_default())
    }

    /// Load a policy document from disk.
    pub fn load<P: AsRef<Path>>(path: P, firmware: FirmwareMode) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read policy from {:?}", path))?;
        let config = Self::from_json_str(&text, firmware)
            .with_context(|| format!("Invalid policy in {:?}", path))?;
        tracing::info!("Loaded {} partitioning policy from {:?}", firmware, path);
        Ok(config)
    }

    /// Eagerly check the invariants the planner relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.root_split > 0.0 && self.root_split < 100.0) {
            return Err(ConfigError::invalid(
                "root_split",
                format!("{} is not strictly between 0 and 100", self.root_split),
            ));
        }
        if self.limiter >= self.mdswh_threshold {
            return Err(ConfigError::invalid(
                "limiter_gb",
                "must be smaller than mdswh_gb",
            ));
        }
        if self.min_root_floor == 0 {
            return Err(ConfigError::invalid(
                "min_root_size_mb",
                "must be positive",
            ));
        }
        match self.efi_size {
            Bound::Bytes(bytes) if bytes < MIN_EFI_SIZE => {
                return Err(ConfigError::invalid(
                    "efi_size",
                    format!("{} bytes is below the 32 MiB FAT32 minimum", bytes),
                ));
            }
            Bound::Percent(pct) if pct <= 0.0 => {
                return Err(ConfigError::invalid("efi_size", "must be positive"));
            }
            _ => {}
        }
        if self.efi_start.is_percent() {
            return Err(ConfigError::invalid(
                "efi_start",
                "must be an absolute offset",
            ));
        }
        if let Bound::Percent(pct) = self.min_home_size {
            if pct <= 0.0 {
                return Err(ConfigError::invalid("min_home_size", "must be positive"));
            }
        }
        Ok(())
    }
}

/// One firmware section of the policy document. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub efi_start: Option<Bound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub efi_size: Option<Bound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_split: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_root_size_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mdswh_gb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limiter_gb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_home_size: Option<Bound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_filesystem: Option<Filesystem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_filesystem: Option<Filesystem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raid_device: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settle_delay_ms: Option<u64>,
}

/// Whole policy document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyFile {
    #[serde(default)]
    pub uefi: Option<PolicyOverrides>,
    #[serde(default)]
    pub bios: Option<PolicyOverrides>,
}
