//! In-memory disk model.
//!
//! [`FakeBackend`] behaves like a GPT-only parted/mkfs/mdadm stack over
//! simulated disks. It backs every planner test and the read-only `plan`
//! command, which replays a real probe into it and provisions there.
//!
//! Failures can be injected per device (`fail_format`) or per attempt
//! (`fail_raid_attempts`).

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::{BlockIds, DeviceBackend};
use crate::engine::free_space::FreeRegion;
use crate::engine::geometry::{GPT_BACKUP_SECTORS, Region};
use crate::engine::inventory::{DeviceKind, Disk, Partition, Snapshot};
use crate::engine::size::{MIB, SECTOR_SIZE, align_up, drive_of, partition_number, partition_path};
use crate::error::{ProvisionError, Result};
use crate::types::{Filesystem, PartitionFlag, RaidLevel};

/// Sectors before the first usable byte: protective MBR, GPT header, entries.
const GPT_HEAD_SECTORS: u64 = 34;

#[derive(Debug, Clone)]
struct FakePartition {
    number: u32,
    start: u64,
    end: u64,
    fstype: Option<String>,
    flags: Vec<PartitionFlag>,
}

#[derive(Debug, Clone)]
struct FakeDisk {
    path: PathBuf,
    size: u64,
    kind: DeviceKind,
    has_table: bool,
    partitions: Vec<FakePartition>,
}

impl FakeDisk {
    fn usable(&self) -> (u64, u64) {
        (
            GPT_HEAD_SECTORS * SECTOR_SIZE,
            self.size.saturating_sub(GPT_BACKUP_SECTORS * SECTOR_SIZE),
        )
    }
}

#[derive(Debug, Clone)]
struct FakeArray {
    path: PathBuf,
    size: u64,
}

#[derive(Debug, Default)]
struct FakeState {
    disks: Vec<FakeDisk>,
    arrays: Vec<FakeArray>,
    formatted: BTreeMap<PathBuf, (Filesystem, String)>,
    clobbers: BTreeMap<PathBuf, usize>,
    touched: BTreeSet<PathBuf>,
    calls: Vec<String>,
    failing_formats: BTreeSet<PathBuf>,
    raid_failures_remaining: usize,
    rereads: usize,
}

impl FakeState {
    fn disk_mut(&mut self, path: &Path) -> Result<&mut FakeDisk> {
        self.disks
            .iter_mut()
            .find(|d| d.path == path)
            .ok_or_else(|| ProvisionError::backend(format!("{}: no such device", path.display())))
    }

    fn partition_mut(&mut self, partition: &Path) -> Result<&mut FakePartition> {
        let number = partition_number(partition);
        let disk = self.disk_mut(&drive_of(partition))?;
        disk.partitions
            .iter_mut()
            .find(|p| Some(p.number) == number)
            .ok_or_else(|| {
                ProvisionError::backend(format!("{}: no such partition", partition.display()))
            })
    }

    fn device_exists(&self, device: &Path) -> bool {
        if self.arrays.iter().any(|a| a.path == device) {
            return true;
        }
        let number = partition_number(device);
        let disk_path = drive_of(device);
        self.disks.iter().any(|d| {
            d.path == disk_path
                && (number.is_none() || d.partitions.iter().any(|p| Some(p.number) == number))
        })
    }
}

/// Simulated storage stack.
#[derive(Debug, Default)]
pub struct FakeBackend {
    state: RefCell<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an empty disk with a blank GPT.
    pub fn with_disk(self, path: &str, size: u64) -> Self {
        self.state.borrow_mut().disks.push(FakeDisk {
            path: PathBuf::from(path),
            size,
            kind: DeviceKind::Disk,
            has_table: true,
            partitions: Vec::new(),
        });
        self
    }

    /// Add a disk with no partition table at all.
    pub fn with_blank_disk(self, path: &str, size: u64) -> Self {
        let this = self.with_disk(path, size);
        if let Some(disk) = this.state.borrow_mut().disks.last_mut() {
            disk.has_table = false;
        }
        this
    }

    pub fn with_loop(self, path: &str, size: u64) -> Self {
        self.state.borrow_mut().disks.push(FakeDisk {
            path: PathBuf::from(path),
            size,
            kind: DeviceKind::Loop,
            has_table: false,
            partitions: Vec::new(),
        });
        self
    }

    /// Add a partition `[start, end)` with the next free number.
    pub fn with_partition(self, disk: &str, start: u64, end: u64, fstype: Option<&str>) -> Self {
        {
            let mut state = self.state.borrow_mut();
            if let Some(d) = state.disks.iter_mut().find(|d| d.path == Path::new(disk)) {
                let number = next_number(&d.partitions);
                d.partitions.push(FakePartition {
                    number,
                    start,
                    end,
                    fstype: fstype.map(String::from),
                    flags: Vec::new(),
                });
            }
        }
        self
    }

    /// Make `mkfs` fail on `device`.
    pub fn fail_format(self, device: &str) -> Self {
        self.state
            .borrow_mut()
            .failing_formats
            .insert(PathBuf::from(device));
        self
    }

    /// Make the next `count` array creations fail.
    pub fn fail_raid_attempts(self, count: usize) -> Self {
        self.state.borrow_mut().raid_failures_remaining = count;
        self
    }

    /// Replay a probed snapshot. Partitions without a reported start are
    /// laid out back to back from 1 MiB.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let backend = Self::new();
        {
            let mut state = backend.state.borrow_mut();
            for disk in &snapshot.disks {
                if disk.kind == DeviceKind::Raid {
                    state.arrays.push(FakeArray {
                        path: disk.path.clone(),
                        size: disk.size,
                    });
                    continue;
                }
                let mut cursor = MIB;
                let mut partitions = Vec::new();
                for (index, part) in disk.partitions.iter().enumerate() {
                    let start = part.start.unwrap_or(cursor);
                    let end = start + part.size;
                    cursor = align_up(end, MIB);
                    partitions.push(FakePartition {
                        number: partition_number(&part.path).unwrap_or(index as u32 + 1),
                        start,
                        end,
                        fstype: part.fstype.clone(),
                        flags: Vec::new(),
                    });
                }
                state.disks.push(FakeDisk {
                    path: disk.path.clone(),
                    size: disk.size,
                    kind: disk.kind,
                    has_table: true,
                    partitions,
                });
            }
        }
        backend
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Times `disk` received a fresh partition table.
    pub fn clobber_count(&self, disk: &str) -> usize {
        self.state
            .borrow()
            .clobbers
            .get(Path::new(disk))
            .copied()
            .unwrap_or(0)
    }

    /// Whether any mutating operation targeted `disk` or its partitions.
    pub fn was_modified(&self, disk: &str) -> bool {
        self.state.borrow().touched.contains(Path::new(disk))
    }

    /// Partitions of `disk` as `(path, start, end)`, ordered by start.
    pub fn partitions(&self, disk: &str) -> Vec<(PathBuf, u64, u64)> {
        let state = self.state.borrow();
        let Some(d) = state.disks.iter().find(|d| d.path == Path::new(disk)) else {
            return Vec::new();
        };
        let mut parts: Vec<_> = d
            .partitions
            .iter()
            .map(|p| (partition_path(&d.path, p.number), p.start, p.end))
            .collect();
        parts.sort_by_key(|&(_, start, _)| start);
        parts
    }

    pub fn flags(&self, partition: &str) -> Vec<PartitionFlag> {
        self.state
            .borrow_mut()
            .partition_mut(Path::new(partition))
            .map(|p| p.flags.clone())
            .unwrap_or_default()
    }

    /// Filesystem and label written to `device`, if formatted.
    pub fn formatted(&self, device: &str) -> Option<(Filesystem, String)> {
        self.state.borrow().formatted.get(Path::new(device)).cloned()
    }

    pub fn arrays(&self) -> Vec<PathBuf> {
        self.state.borrow().arrays.iter().map(|a| a.path.clone()).collect()
    }

    /// Every operation in the order it was issued.
    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub fn reread_count(&self) -> usize {
        self.state.borrow().rereads
    }
}

fn next_number(partitions: &[FakePartition]) -> u32 {
    (1..)
        .find(|n| partitions.iter().all(|p| p.number != *n))
        .unwrap_or(1)
}

fn raid_capacity(level: RaidLevel, members: u64, smallest: u64) -> u64 {
    let data_disks = match level {
        RaidLevel::Raid0 => members,
        RaidLevel::Raid1 => 1,
        RaidLevel::Raid5 => members.saturating_sub(1),
        RaidLevel::Raid6 => members.saturating_sub(2),
        RaidLevel::Raid10 => members / 2,
    };
    data_disks * smallest
}

impl DeviceBackend for FakeBackend {
    fn list_block_devices(&self) -> Result<Snapshot> {
        let state = self.state.borrow();
        let mut disks: Vec<Disk> = state
            .disks
            .iter()
            .map(|d| {
                let mut partitions: Vec<Partition> = d
                    .partitions
                    .iter()
                    .map(|p| {
                        let path = partition_path(&d.path, p.number);
                        let fstype = state
                            .formatted
                            .get(&path)
                            .map(|(fs, _)| fs.kernel_name().to_string())
                            .or_else(|| p.fstype.clone());
                        Partition {
                            path,
                            size: p.end - p.start,
                            start: Some(p.start),
                            fstype,
                            role: None,
                        }
                    })
                    .collect();
                partitions.sort_by_key(|p| p.start);
                Disk {
                    path: d.path.clone(),
                    size: d.size,
                    kind: d.kind,
                    partitions,
                }
            })
            .collect();
        disks.extend(state.arrays.iter().map(|a| Disk {
            path: a.path.clone(),
            size: a.size,
            kind: DeviceKind::Raid,
            partitions: Vec::new(),
        }));
        Ok(Snapshot { disks })
    }

    fn reread_partition_table(&self, disk: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.rereads += 1;
        state.calls.push(format!("partprobe {}", disk.display()));
        Ok(())
    }

    fn create_partition_table(&self, disk: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let target = state.disk_mut(disk)?;
        if target.kind != DeviceKind::Disk {
            return Err(ProvisionError::backend(format!(
                "{}: refusing to label a non-disk device",
                disk.display()
            )));
        }
        let removed: Vec<PathBuf> = target
            .partitions
            .iter()
            .map(|p| partition_path(disk, p.number))
            .collect();
        target.partitions.clear();
        target.has_table = true;
        for path in removed {
            state.formatted.remove(&path);
        }
        *state.clobbers.entry(disk.to_path_buf()).or_default() += 1;
        state.touched.insert(disk.to_path_buf());
        state.calls.push(format!("mklabel gpt {}", disk.display()));
        Ok(())
    }

    fn free_regions(&self, disk: &Path) -> Result<Vec<FreeRegion>> {
        let mut state = self.state.borrow_mut();
        let target = state.disk_mut(disk)?;
        if !target.has_table {
            return Err(ProvisionError::backend(format!(
                "{}: unrecognised disk label",
                disk.display()
            )));
        }
        let (first, last) = target.usable();
        let mut used: Vec<(u64, u64)> = target.partitions.iter().map(|p| (p.start, p.end)).collect();
        used.sort_unstable();

        let mut regions = Vec::new();
        let mut cursor = first;
        for (start, end) in used {
            if start > cursor {
                regions.push(FreeRegion::new(cursor, start));
            }
            cursor = cursor.max(end);
        }
        if last > cursor {
            regions.push(FreeRegion::new(cursor, last));
        }
        Ok(regions)
    }

    fn create_partition(&self, disk: &Path, region: &Region, _fs: Filesystem) -> Result<PathBuf> {
        let mut state = self.state.borrow_mut();
        let target = state.disk_mut(disk)?;
        let (first, last) = target.usable();
        if region.start < first || region.end > last || region.size() == 0 {
            return Err(ProvisionError::backend(format!(
                "{}: {}..{} is outside the usable area",
                disk.display(),
                region.start,
                region.end
            )));
        }
        if target
            .partitions
            .iter()
            .any(|p| region.overlaps(p.start, p.end))
        {
            return Err(ProvisionError::backend(format!(
                "{}: {}..{} overlaps an existing partition",
                disk.display(),
                region.start,
                region.end
            )));
        }
        let number = next_number(&target.partitions);
        target.partitions.push(FakePartition {
            number,
            start: region.start,
            end: region.end,
            fstype: None,
            flags: Vec::new(),
        });
        let path = partition_path(disk, number);
        state.touched.insert(disk.to_path_buf());
        state.calls.push(format!(
            "mkpart {} {}..{}",
            disk.display(),
            region.start,
            region.end
        ));
        Ok(path)
    }

    fn delete_partition(&self, partition: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let number = partition_number(partition);
        let disk = drive_of(partition);
        let target = state.disk_mut(&disk)?;
        let before = target.partitions.len();
        target.partitions.retain(|p| Some(p.number) != number);
        if target.partitions.len() == before {
            return Err(ProvisionError::backend(format!(
                "{}: no such partition",
                partition.display()
            )));
        }
        state.formatted.remove(partition);
        state.touched.insert(disk);
        state.calls.push(format!("rm {}", partition.display()));
        Ok(())
    }

    fn set_flag(&self, partition: &Path, flag: PartitionFlag) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let target = state.partition_mut(partition)?;
        if !target.flags.contains(&flag) {
            target.flags.push(flag);
        }
        state.touched.insert(drive_of(partition));
        state.calls.push(format!("set {} {}", partition.display(), flag));
        Ok(())
    }

    fn format(&self, device: &Path, fs: Filesystem, label: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(format!("mkfs.{} {}", fs.kernel_name(), device.display()));
        if state.failing_formats.contains(device) {
            return Err(ProvisionError::format(device, "simulated mkfs failure"));
        }
        if !state.device_exists(device) {
            return Err(ProvisionError::format(device, "no such device"));
        }
        state
            .formatted
            .insert(device.to_path_buf(), (fs, label.to_string()));
        state.touched.insert(drive_of(device));
        Ok(())
    }

    fn create_raid(
        &self,
        array: &Path,
        level: RaidLevel,
        members: &[PathBuf],
        force: bool,
    ) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(format!(
            "mdadm --create {} level={} members={}{}",
            array.display(),
            level.number(),
            members.len(),
            if force { " --force" } else { "" }
        ));
        if state.raid_failures_remaining > 0 {
            state.raid_failures_remaining -= 1;
            return Err(ProvisionError::raid_creation("simulated mdadm failure"));
        }
        let mut smallest = u64::MAX;
        for member in members {
            let size = state
                .disks
                .iter()
                .find(|d| &d.path == member)
                .map(|d| d.size)
                .ok_or_else(|| {
                    ProvisionError::raid_creation(format!("{}: no such device", member.display()))
                })?;
            smallest = smallest.min(size);
        }
        for member in members {
            state.touched.insert(member.clone());
        }
        state.arrays.retain(|a| a.path != array);
        state.arrays.push(FakeArray {
            path: array.to_path_buf(),
            size: raid_capacity(level, members.len() as u64, smallest),
        });
        Ok(())
    }

    fn block_ids(&self, device: &Path) -> Result<BlockIds> {
        let state = self.state.borrow();
        if !state.device_exists(device) {
            return Err(ProvisionError::backend(format!(
                "{}: no such device",
                device.display()
            )));
        }
        let name = device
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let fstype = state
            .formatted
            .get(device)
            .map(|(fs, _)| fs.kernel_name().to_string());
        Ok(BlockIds {
            uuid: fstype.as_ref().map(|_| format!("fake-uuid-{}", name)),
            partuuid: partition_number(device).map(|_| format!("fake-partuuid-{}", name)),
            fstype,
        })
    }
}
