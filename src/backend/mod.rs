//! Device capability boundary.
//!
//! The planner never shells out directly. Every read and write of disk state
//! goes through [`DeviceBackend`], implemented by [`SystemBackend`] for real
//! hardware and [`FakeBackend`] for tests and simulated runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::engine::free_space::FreeRegion;
use crate::engine::geometry::Region;
use crate::engine::inventory::Snapshot;
use crate::error::Result;
use crate::types::{Filesystem, PartitionFlag, RaidLevel};

pub mod fake;
pub mod system;

pub use fake::FakeBackend;
pub use system::SystemBackend;

/// Identifiers reported by `blkid -o export`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockIds {
    pub uuid: Option<String>,
    pub partuuid: Option<String>,
    pub fstype: Option<String>,
}

impl BlockIds {
    /// Parse `KEY=value` lines.
    pub fn parse_export(text: &str) -> Self {
        let values: BTreeMap<&str, &str> = text
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.trim(), v.trim()))
            .collect();
        Self {
            uuid: values.get("UUID").map(|v| v.to_string()),
            partuuid: values.get("PARTUUID").map(|v| v.to_string()),
            fstype: values.get("TYPE").map(|v| v.to_string()),
        }
    }
}

/// Operations the provisioning engine needs from the operating system.
///
/// Mutating calls are synchronous and complete before returning; callers
/// rescan through the inventory afterwards.
pub trait DeviceBackend {
    /// Enumerate disks and partitions.
    fn list_block_devices(&self) -> Result<Snapshot>;

    /// Ask the kernel to re-read the partition table of `disk`.
    fn reread_partition_table(&self, disk: &Path) -> Result<()>;

    /// Replace whatever is on `disk` with an empty GPT.
    fn create_partition_table(&self, disk: &Path) -> Result<()>;

    /// Unallocated regions of `disk`, including tiny alignment gaps.
    fn free_regions(&self, disk: &Path) -> Result<Vec<FreeRegion>>;

    /// Create a partition over `region`; returns its device path.
    fn create_partition(&self, disk: &Path, region: &Region, fs: Filesystem) -> Result<PathBuf>;

    fn delete_partition(&self, partition: &Path) -> Result<()>;

    fn set_flag(&self, partition: &Path, flag: PartitionFlag) -> Result<()>;

    /// Create a filesystem on `device`.
    fn format(&self, device: &Path, fs: Filesystem, label: &str) -> Result<()>;

    fn create_raid(
        &self,
        array: &Path,
        level: RaidLevel,
        members: &[PathBuf],
        force: bool,
    ) -> Result<()>;

    fn block_ids(&self, device: &Path) -> Result<BlockIds>;
}
