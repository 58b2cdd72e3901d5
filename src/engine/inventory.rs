//! Block-device inventory.
//!
//! A [`Snapshot`] is the engine's view of the disks at one point in time. It
//! is taken fresh before provisioning and re-taken after every destructive
//! step; nothing caches it across table changes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::backend::DeviceBackend;
use crate::engine::size::{GB, SECTOR_SIZE};
use crate::error::{ProvisionError, Result};
use crate::types::PartitionRole;

/// Disks smaller than this are not offered as install targets.
pub const MIN_DISK_SIZE: u64 = 16 * GB;

/// Kind of a top-level block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Disk,
    Loop,
    Raid,
    Other,
}

impl DeviceKind {
    /// Map an lsblk TYPE column value.
    pub fn from_lsblk(kind: &str) -> Self {
        match kind {
            "disk" => Self::Disk,
            "loop" => Self::Loop,
            k if k.starts_with("raid") => Self::Raid,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub path: PathBuf,
    pub size: u64,
    /// Byte offset on the parent disk, when the probe reports it
    pub start: Option<u64>,
    pub fstype: Option<String>,
    pub role: Option<PartitionRole>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Disk {
    pub path: PathBuf,
    pub size: u64,
    pub kind: DeviceKind,
    pub partitions: Vec<Partition>,
}

impl Disk {
    pub fn is_loop(&self) -> bool {
        self.kind == DeviceKind::Loop
    }
}

/// Disks and partitions at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub disks: Vec<Disk>,
}

impl Snapshot {
    pub fn find_disk(&self, path: &Path) -> Option<&Disk> {
        self.disks.iter().find(|d| d.path == path)
    }

    pub fn find_partition(&self, path: &Path) -> Option<&Partition> {
        self.disks
            .iter()
            .flat_map(|d| d.partitions.iter())
            .find(|p| p.path == path)
    }

    /// Whether `path` names any known disk or partition.
    pub fn contains(&self, path: &Path) -> bool {
        self.find_disk(path).is_some() || self.find_partition(path).is_some()
    }

    /// Plain disks large enough to install to.
    pub fn eligible_disks(&self, min_size: u64) -> impl Iterator<Item = &Disk> {
        self.disks
            .iter()
            .filter(move |d| d.kind == DeviceKind::Disk && d.size >= min_size)
    }

    fn without_loops(mut self) -> Self {
        self.disks.retain(|d| !d.is_loop());
        self
    }
}

// ============================================================================
// lsblk JSON
// ============================================================================

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default, deserialize_with = "number_or_string")]
    size: Option<u64>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    fstype: Option<String>,
    /// In 512-byte sectors
    #[serde(default, deserialize_with = "number_or_string")]
    start: Option<u64>,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

/// Older lsblk releases print numeric columns as strings.
fn number_or_string<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Parse `lsblk --json --paths --bytes` output.
///
/// Partitions become children of their disk. RAID arrays, which lsblk nests
/// under every member, are lifted to top-level devices once each.
pub fn parse_lsblk(json: &str) -> Result<Snapshot> {
    let output: LsblkOutput = serde_json::from_str(json)
        .map_err(|e| ProvisionError::probe(format!("Malformed lsblk output: {}", e)))?;

    let mut snapshot = Snapshot::default();
    let mut arrays: Vec<Disk> = Vec::new();
    for device in output.blockdevices {
        let mut disk = Disk {
            path: PathBuf::from(&device.name),
            size: device.size.unwrap_or(0),
            kind: DeviceKind::from_lsblk(&device.kind),
            partitions: Vec::new(),
        };
        collect_children(&device.children, &mut disk, &mut arrays);
        snapshot.disks.push(disk);
    }
    for array in arrays {
        if snapshot.find_disk(&array.path).is_none() {
            snapshot.disks.push(array);
        }
    }

    Ok(snapshot)
}

fn collect_children(children: &[LsblkDevice], disk: &mut Disk, arrays: &mut Vec<Disk>) {
    for child in children {
        let path = PathBuf::from(&child.name);
        match DeviceKind::from_lsblk(&child.kind) {
            DeviceKind::Raid => {
                if !arrays.iter().any(|a| a.path == path) {
                    arrays.push(Disk {
                        path,
                        size: child.size.unwrap_or(0),
                        kind: DeviceKind::Raid,
                        partitions: Vec::new(),
                    });
                }
            }
            _ if child.kind == "part" => disk.partitions.push(Partition {
                path,
                size: child.size.unwrap_or(0),
                start: child.start.map(|sectors| sectors * SECTOR_SIZE),
                fstype: child.fstype.clone(),
                role: None,
            }),
            _ => {}
        }
        // Arrays built on partitions sit one level deeper
        collect_children(&child.children, disk, arrays);
    }
}

// ============================================================================
// Probe
// ============================================================================

/// Probes block devices through a backend.
pub struct BlockDeviceInventory<'a> {
    backend: &'a dyn DeviceBackend,
    settle_delay: Duration,
}

impl<'a> BlockDeviceInventory<'a> {
    pub fn new(backend: &'a dyn DeviceBackend, settle_delay: Duration) -> Self {
        Self {
            backend,
            settle_delay,
        }
    }

    pub fn backend(&self) -> &'a dyn DeviceBackend {
        self.backend
    }

    /// Current disks and partitions, loop devices excluded.
    pub fn probe(&self) -> Result<Snapshot> {
        let snapshot = self
            .backend
            .list_block_devices()
            .map_err(|e| match e {
                ProvisionError::Probe(_) => e,
                other => ProvisionError::probe(other.to_string()),
            })?
            .without_loops();
        tracing::debug!("Probed {} block device(s)", snapshot.disks.len());
        Ok(snapshot)
    }

    /// Make the kernel re-read `disk` and wait for it to settle.
    pub fn rescan(&self, disk: &Path) -> Result<()> {
        self.backend.reread_partition_table(disk)?;
        if !self.settle_delay.is_zero() {
            std::thread::sleep(self.settle_delay);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LSBLK: &str = r#"{
       "blockdevices": [
          {"name": "/dev/loop0", "size": 912261120, "type": "loop", "fstype": "squashfs", "start": null},
          {"name": "/dev/sda", "size": 64023257088, "type": "disk", "fstype": null, "start": null,
             "children": [
                {"name": "/dev/sda1", "size": 209715200, "type": "part", "fstype": "vfat", "start": 2048},
                {"name": "/dev/sda2", "size": "63811600384", "type": "part", "fstype": "btrfs", "start": "411648"}
             ]
          },
          {"name": "/dev/sdb", "size": 500107862016, "type": "disk", "fstype": "linux_raid_member", "start": null,
             "children": [
                {"name": "/dev/md0", "size": 500106813440, "type": "raid1", "fstype": "btrfs", "start": null}
             ]
          },
          {"name": "/dev/sdc", "size": 500107862016, "type": "disk", "fstype": "linux_raid_member", "start": null,
             "children": [
                {"name": "/dev/md0", "size": 500106813440, "type": "raid1", "fstype": "btrfs", "start": null}
             ]
          },
          {"name": "/dev/nvme0n1", "size": 8000000000, "type": "disk", "fstype": null, "start": null}
       ]
    }"#;

    fn snapshot() -> Snapshot {
        parse_lsblk(LSBLK).expect("fixture parses") // test: known-good input
    }

    #[test]
    fn test_parse_disks_and_partitions() {
        let snap = snapshot();
        let sda = snap.find_disk(Path::new("/dev/sda")).expect("sda"); // test: known-good input
        assert_eq!(sda.kind, DeviceKind::Disk);
        assert_eq!(sda.partitions.len(), 2);
        assert_eq!(sda.partitions[0].start, Some(2048 * 512));
        assert_eq!(sda.partitions[1].size, 63_811_600_384);
        assert_eq!(sda.partitions[0].fstype.as_deref(), Some("vfat"));
    }

    #[test]
    fn test_arrays_are_lifted_once() {
        let snap = snapshot();
        let arrays: Vec<_> = snap.disks.iter().filter(|d| d.kind == DeviceKind::Raid).collect();
        assert_eq!(arrays.len(), 1);
        assert_eq!(arrays[0].path, PathBuf::from("/dev/md0"));
        assert!(snap.find_disk(Path::new("/dev/sdb")).is_some_and(|d| d.partitions.is_empty()));
    }

    #[test]
    fn test_eligible_disks_skip_small_and_loops() {
        let snap = snapshot().without_loops();
        let eligible: Vec<_> = snap
            .eligible_disks(MIN_DISK_SIZE)
            .map(|d| d.path.display().to_string())
            .collect();
        assert_eq!(eligible, vec!["/dev/sda", "/dev/sdb", "/dev/sdc"]);
        assert!(snap.find_disk(Path::new("/dev/loop0")).is_none());
    }

    #[test]
    fn test_malformed_output_is_probe_error() {
        let err = parse_lsblk("{\"blockdevices\": 5}").unwrap_err();
        assert!(matches!(err, ProvisionError::Probe(_)));
        assert!(parse_lsblk("").is_err());
    }

    #[test]
    fn test_contains_checks_partitions_and_disks() {
        let snap = snapshot();
        assert!(snap.contains(Path::new("/dev/sda2")));
        assert!(snap.contains(Path::new("/dev/md0")));
        assert!(!snap.contains(Path::new("/dev/sdz")));
    }
}
