//! Size arithmetic and device-path helpers.
//!
//! Everything here is pure: unit conversion, bound resolution, alignment, the
//! minimum-root-size heuristic, and mapping between partition paths and the
//! disks they live on.
//!
//! # Units
//!
//! `GB` is 10^9 bytes, matching parted's SI units. Alignment uses binary
//! units: partition starts on 1 MiB, ends on 512-byte sectors.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, PolicyConfig};
use crate::engine::inventory::Snapshot;
use crate::error::{ProvisionError, Result};

pub const SECTOR_SIZE: u64 = 512;
pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const MB: u64 = 1_000_000;
pub const GB: u64 = 1_000_000_000;

// ============================================================================
// Unit conversion and alignment
// ============================================================================

pub fn gb_to_bytes(gb: f64) -> u64 {
    (gb * GB as f64).max(0.0) as u64
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / GB as f64
}

/// Round `value` down to a multiple of `align`.
pub fn align_down(value: u64, align: u64) -> u64 {
    value - value % align
}

/// Round `value` up to a multiple of `align`, saturating at the largest
/// aligned `u64`.
pub fn align_up(value: u64, align: u64) -> u64 {
    match value % align {
        0 => value,
        rem => value
            .checked_add(align - rem)
            .unwrap_or_else(|| align_down(u64::MAX, align)),
    }
}

/// Human-readable size for logs, e.g. `33.83 GB`.
pub fn display_size(bytes: u64) -> String {
    if bytes >= GB {
        format!("{:.2} GB", bytes_to_gb(bytes))
    } else {
        format!("{:.0} MB", bytes as f64 / MB as f64)
    }
}

// ============================================================================
// Bounds
// ============================================================================

/// A size or offset as written in the policy document: an absolute byte
/// count or a percentage of the disk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BoundRepr", into = "String")]
pub enum Bound {
    Bytes(u64),
    Percent(f64),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoundRepr {
    Number(u64),
    Text(String),
}

impl TryFrom<BoundRepr> for Bound {
    type Error = ConfigError;

    fn try_from(repr: BoundRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            BoundRepr::Number(bytes) => Ok(Self::Bytes(bytes)),
            BoundRepr::Text(text) => text.parse(),
        }
    }
}

impl From<Bound> for String {
    fn from(bound: Bound) -> Self {
        bound.to_string()
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => write!(f, "{}B", bytes),
            Self::Percent(pct) => write!(f, "{}%", pct),
        }
    }
}

impl FromStr for Bound {
    type Err = ConfigError;

    /// Accepts `"40%"`, `"200M"`, `"16G"`, `"512MiB"`, `"1.5TB"` or a plain
    /// byte count. Decimal suffixes are SI, `*iB` suffixes binary.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let text = s.trim();
        let invalid = |reason: &str| ConfigError::InvalidBound {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        if let Some(pct) = text.strip_suffix('%') {
            let pct: f64 = pct.trim().parse().map_err(|_| invalid("not a number"))?;
            if !(0.0..=100.0).contains(&pct) {
                return Err(invalid("percentage must be between 0 and 100"));
            }
            return Ok(Self::Percent(pct));
        }

        let split = text
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(text.len());
        let (number, suffix) = text.split_at(split);
        if number.is_empty() {
            return Err(invalid("missing number"));
        }
        let number: f64 = number.parse().map_err(|_| invalid("not a number"))?;

        let multiplier = match suffix.trim().to_ascii_uppercase().as_str() {
            "" | "B" => 1,
            "K" | "KB" => 1_000,
            "KIB" => KIB,
            "M" | "MB" => MB,
            "MIB" => MIB,
            "G" | "GB" => GB,
            "GIB" => GIB,
            "T" | "TB" => 1_000 * GB,
            "TIB" => 1024 * GIB,
            _ => return Err(invalid("unknown unit")),
        };

        Ok(Self::Bytes((number * multiplier as f64) as u64))
    }
}

impl Bound {
    /// Resolve against a disk: absolute values are clamped to the disk,
    /// percentages taken of it. The result is rounded down to a sector.
    pub fn resolve(self, disk_size: u64) -> u64 {
        let bytes = match self {
            Self::Bytes(bytes) => bytes.min(disk_size),
            Self::Percent(pct) => ((disk_size as f64) * pct / 100.0) as u64,
        };
        align_down(bytes.min(disk_size), SECTOR_SIZE)
    }

    pub fn is_percent(self) -> bool {
        matches!(self, Self::Percent(_))
    }
}

/// Parse `value` and resolve it against `disk_size`.
pub fn resolve_bound(value: &str, disk_size: u64) -> Result<u64> {
    let bound: Bound = value.parse()?;
    Ok(bound.resolve(disk_size))
}

// ============================================================================
// Root sizing
// ============================================================================

/// Extra root space reserved for a swap file: `ram + sqrt(ram in GB) GB`.
pub fn swap_headroom(ram_bytes: u64) -> u64 {
    let ram_gb = bytes_to_gb(ram_bytes);
    ram_bytes.saturating_add(gb_to_bytes(ram_gb.sqrt()))
}

/// Size of the swap file created in the new root.
pub fn swap_file_size(ram_bytes: u64) -> u64 {
    align_up(swap_headroom(ram_bytes), MIB)
}

/// Sizing rules that depend on the policy.
#[derive(Debug, Clone, Copy)]
pub struct SizePolicy<'a> {
    config: &'a PolicyConfig,
}

impl<'a> SizePolicy<'a> {
    pub fn new(config: &'a PolicyConfig) -> Self {
        Self { config }
    }

    /// Smallest acceptable root partition. With a swap file the root also
    /// has to hold it.
    pub fn minimum_root_size(&self, include_swap_headroom: bool, ram_bytes: u64) -> u64 {
        let floor = self.config.min_root_floor;
        if include_swap_headroom {
            floor.saturating_add(swap_headroom(ram_bytes))
        } else {
            floor
        }
    }

    /// Reject a manually chosen root partition that is too small.
    /// Returns the partition size on success.
    pub fn check_manual_root(
        &self,
        snapshot: &Snapshot,
        root: &Path,
        swap_is_file: bool,
        ram_bytes: u64,
    ) -> Result<u64> {
        let size = size_of_partition(snapshot, root).ok_or_else(|| {
            ProvisionError::invalid_request(format!("{} does not exist", root.display()))
        })?;
        let minimum = self.minimum_root_size(swap_is_file, ram_bytes);
        if size < minimum {
            return Err(ProvisionError::invalid_request(format!(
                "{} is {}, ROOT needs at least {}",
                root.display(),
                display_size(size),
                display_size(minimum)
            )));
        }
        Ok(size)
    }
}

/// Size of a partition (or whole device) in a snapshot.
pub fn size_of_partition(snapshot: &Snapshot, path: &Path) -> Option<u64> {
    snapshot
        .find_partition(path)
        .map(|p| p.size)
        .or_else(|| snapshot.find_disk(path).map(|d| d.size))
}

// ============================================================================
// Device paths
// ============================================================================

/// Whole-disk names that legitimately end in a digit.
const DIGIT_DISK_PREFIXES: &[&str] = &["nvme", "mmcblk", "loop", "md", "nbd"];

/// Disk a partition lives on.
///
/// `/dev/nvme0n1p2` → `/dev/nvme0n1`, `/dev/sda3` → `/dev/sda`,
/// `/dev/mmcblk0p1` → `/dev/mmcblk0`. Whole disks and `md` arrays map to
/// themselves.
pub fn drive_of(partition: &Path) -> PathBuf {
    let text = partition.to_string_lossy();
    let name_start = text.rfind('/').map_or(0, |i| i + 1);
    let name = &text[name_start..];

    let base = name.trim_end_matches(|c: char| c.is_ascii_digit());
    if base.len() == name.len() || base.is_empty() {
        return partition.to_path_buf();
    }

    // `<disk ending in a digit>p<N>`
    if let Some(disk) = base.strip_suffix('p') {
        if disk.ends_with(|c: char| c.is_ascii_digit()) {
            return PathBuf::from(format!("{}{}", &text[..name_start], disk));
        }
    }

    if DIGIT_DISK_PREFIXES.iter().any(|p| name.starts_with(p)) {
        return partition.to_path_buf();
    }

    PathBuf::from(format!("{}{}", &text[..name_start], base))
}

/// Partition number encoded in a partition path, if any.
pub fn partition_number(partition: &Path) -> Option<u32> {
    let disk = drive_of(partition);
    if disk == partition {
        return None;
    }
    let text = partition.to_string_lossy();
    let suffix = text.get(disk.to_string_lossy().len()..)?;
    suffix.trim_start_matches('p').parse().ok()
}

/// Path of partition `number` on `disk`. Disks whose name ends in a digit
/// use a `p` separator.
pub fn partition_path(disk: &Path, number: u32) -> PathBuf {
    let disk_str = disk.display().to_string();
    if disk_str.ends_with(|c: char| c.is_ascii_digit()) {
        PathBuf::from(format!("{}p{}", disk_str, number))
    } else {
        PathBuf::from(format!("{}{}", disk_str, number))
    }
}

// ============================================================================
// Tests
// ============================================================================
