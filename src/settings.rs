//! Settings record exchanged with the installer UI.
//!
//! The UI writes a JSON object with upper-case keys (`AUTO_PART`, `ROOT`,
//! `EFI`, `HOME`, `SWAP`, `RAID`) plus whatever else the later install steps
//! need. This module only interprets the partitioning keys; everything else
//! is carried through untouched in [`InstallSettings::extra`].
//!
//! # Design
//!
//! - **Wire format only**: The engine never sees this type. [`InstallSettings::to_request`]
//!   turns it into a typed [`ProvisioningRequest`]
//! - **Round-trip safe**: Unknown keys survive load, apply, save
//! - **Sentinels**: `"NULL"`, `null` and `""` mean absent, `"MAKE"` means create
//!   (both case-insensitive)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::raid::{self, RaidSpec};
use crate::engine::request::{HomePolicy, ProvisioningRequest, SwapPolicy};
use crate::engine::storage::ProvisioningResult;
use crate::hardware::FirmwareMode;
use crate::types::{PartitionRole, RaidLevel};

/// Marker for an absent partition.
pub const NULL: &str = "NULL";
/// Marker for "create a new home partition".
pub const MAKE: &str = "MAKE";
/// Marker for "swap lives in a file on ROOT".
pub const SWAP_FILE: &str = "FILE";

fn default_swap() -> String {
    SWAP_FILE.to_string()
}

/// RAID home as selected in the UI: a level and up to four numbered slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidDescriptor {
    pub raid_type: RaidLevel,
    /// Slot number → disk path; `null` slots are ignored
    #[serde(default)]
    pub disks: BTreeMap<String, Option<String>>,
}

impl RaidDescriptor {
    /// Filled slots in slot order.
    pub fn disk_paths(&self) -> Vec<PathBuf> {
        self.disks
            .values()
            .flatten()
            .filter(|d| !is_null(d))
            .map(PathBuf::from)
            .collect()
    }
}

/// Installer settings record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct InstallSettings {
    /// Let the engine partition `ROOT` (a whole drive) automatically
    #[serde(default)]
    pub auto_part: bool,
    /// Drive when `AUTO_PART` is set, partition otherwise
    #[serde(default)]
    pub root: String,
    #[serde(default)]
    pub efi: Option<String>,
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default = "default_swap")]
    pub swap: String,
    #[serde(default)]
    pub raid: Option<RaidDescriptor>,
    /// Keys consumed by later install steps
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_null(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.eq_ignore_ascii_case(NULL)
}

fn is_make(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case(MAKE)
}

impl InstallSettings {
    /// Load settings from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {:?}", path.as_ref()))?;

        let settings: Self =
            serde_json::from_str(&content).context("Failed to parse settings JSON")?;

        Ok(settings)
    }

    /// Save settings to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize settings to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write settings to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Validate the partitioning fields
    pub fn validate(&self) -> Result<()> {
        if is_null(&self.root) {
            anyhow::bail!("ROOT must be specified");
        }
        if !self.root.starts_with("/dev/") {
            anyhow::bail!("ROOT must be a device path, got {:?}", self.root);
        }
        if let Some(home) = &self.home {
            if !is_null(home) && !is_make(home) && !home.starts_with("/dev/") {
                anyhow::bail!("HOME must be NULL, MAKE or a device path, got {:?}", home);
            }
            if is_make(home) && !self.auto_part {
                anyhow::bail!("HOME=MAKE requires AUTO_PART");
            }
        }
        if self.swap != SWAP_FILE && !self.swap.starts_with("/dev/") {
            anyhow::bail!("SWAP must be FILE or a device path, got {:?}", self.swap);
        }
        // Counted the way the engine counts: the root drive is never a member
        if let Some(spec) = self.raid_spec() {
            let members = spec.without(Path::new(self.root.trim()));
            raid::validate_disk_count(members.level, members.disks.len())
                .context("Invalid RAID selection")?;
        }
        Ok(())
    }

    pub fn home_policy(&self) -> HomePolicy {
        match self.home.as_deref() {
            None => HomePolicy::Absent,
            Some(home) if is_null(home) => HomePolicy::Absent,
            Some(home) if is_make(home) => HomePolicy::MakeNew,
            Some(path) => HomePolicy::ExistingPath(PathBuf::from(path)),
        }
    }

    pub fn swap_policy(&self) -> SwapPolicy {
        if self.swap == SWAP_FILE {
            SwapPolicy::File
        } else {
            SwapPolicy::Partition(PathBuf::from(&self.swap))
        }
    }

    pub fn raid_spec(&self) -> Option<RaidSpec> {
        self.raid
            .as_ref()
            .map(|d| RaidSpec::new(d.raid_type, d.disk_paths()))
    }

    /// Typed request for the engine. EFI follows the firmware, not the
    /// `EFI` field, which only matters for manual partitioning.
    pub fn to_request(&self, firmware: FirmwareMode) -> ProvisioningRequest {
        let mut request =
            ProvisioningRequest::new(self.root.trim(), firmware.is_uefi(), self.home_policy())
                .with_swap(self.swap_policy());
        if let Some(spec) = self.raid_spec() {
            request = request.with_raid(spec);
        }
        request
    }

    /// Devices to mount, ROOT first. Absent entries are skipped.
    pub fn mount_paths(&self) -> Vec<(PartitionRole, PathBuf)> {
        let mut mounts = vec![(PartitionRole::Root, PathBuf::from(self.root.trim()))];
        for (role, value) in [(PartitionRole::Efi, &self.efi), (PartitionRole::Home, &self.home)] {
            if let Some(value) = value.as_deref().filter(|v| !is_null(v) && !is_make(v)) {
                mounts.push((role, PathBuf::from(value)));
            }
        }
        mounts
    }

    /// Write the produced paths back into the record.
    pub fn apply_result(&mut self, result: &ProvisioningResult) {
        let show = |p: &Option<PathBuf>| {
            p.as_ref()
                .map_or_else(|| NULL.to_string(), |p| p.display().to_string())
        };
        self.root = result.root.display().to_string();
        self.efi = Some(show(&result.efi));
        self.home = Some(show(&result.home));
    }
}
