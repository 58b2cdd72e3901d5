//! Software RAID validation and assembly for the HOME role.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::backend::DeviceBackend;
use crate::engine::inventory::Snapshot;
use crate::types::RaidLevel;

/// Why a RAID spec was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RaidError {
    #[error("{level} needs at least {required} disks, {given} given")]
    TooFewDisks {
        level: RaidLevel,
        required: usize,
        given: usize,
    },

    #[error("{level} supports at most {allowed} disks, {given} given")]
    TooManyDisks {
        level: RaidLevel,
        allowed: usize,
        given: usize,
    },

    #[error("{} does not exist", .0.display())]
    MissingDisk(PathBuf),

    #[error("{} is listed more than once", .0.display())]
    DuplicateDisk(PathBuf),
}

/// Requested array: level plus ordered member disks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaidSpec {
    pub level: RaidLevel,
    pub disks: Vec<PathBuf>,
}

impl RaidSpec {
    pub fn new(level: RaidLevel, disks: Vec<PathBuf>) -> Self {
        Self { level, disks }
    }

    /// The same spec without `disk` (the root drive is never an array member).
    pub fn without(&self, disk: &Path) -> Self {
        Self {
            level: self.level,
            disks: self.disks.iter().filter(|d| *d != disk).cloned().collect(),
        }
    }
}

/// Check the member count for `level` without looking at any device.
pub fn validate_disk_count(level: RaidLevel, count: usize) -> Result<(), RaidError> {
    if count < level.min_disks() {
        return Err(RaidError::TooFewDisks {
            level,
            required: level.min_disks(),
            given: count,
        });
    }
    if let Some(allowed) = level.max_disks() {
        if count > allowed {
            return Err(RaidError::TooManyDisks {
                level,
                allowed,
                given: count,
            });
        }
    }
    Ok(())
}

/// Full validation: count, no duplicates, every disk present in `snapshot`.
pub fn validate(spec: &RaidSpec, snapshot: &Snapshot) -> Result<(), RaidError> {
    validate_disk_count(spec.level, spec.disks.len())?;
    for (i, disk) in spec.disks.iter().enumerate() {
        if spec.disks[..i].contains(disk) {
            return Err(RaidError::DuplicateDisk(disk.clone()));
        }
        if snapshot.find_disk(disk).is_none() {
            return Err(RaidError::MissingDisk(disk.clone()));
        }
    }
    Ok(())
}

/// Builds arrays through a backend.
pub struct RaidAssembler<'a> {
    backend: &'a dyn DeviceBackend,
    array: PathBuf,
}

impl<'a> RaidAssembler<'a> {
    pub fn new(backend: &'a dyn DeviceBackend, array: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            array: array.into(),
        }
    }

    /// One `mdadm --create` attempt. Returns whether it succeeded.
    pub fn create(&self, spec: &RaidSpec, force: bool) -> bool {
        match self
            .backend
            .create_raid(&self.array, spec.level, &spec.disks, force)
        {
            Ok(()) => {
                tracing::info!(
                    "Created {} array {} from {} disk(s)",
                    spec.level,
                    self.array.display(),
                    spec.disks.len()
                );
                true
            }
            Err(e) => {
                tracing::warn!("{} creation failed (force={}): {}", spec.level, force, e);
                false
            }
        }
    }

    /// Create the array, retrying once with force. `None` means both
    /// attempts failed and the install continues without a home array.
    pub fn assemble(&self, spec: &RaidSpec) -> Option<PathBuf> {
        if self.create(spec, false) || self.create(spec, true) {
            Some(self.array.clone())
        } else {
            tracing::warn!(
                "Could not build {} on {:?}; continuing without a separate home",
                spec.level,
                spec.disks
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FakeBackend;
    use crate::engine::size::GB;

    fn disks(n: usize) -> Vec<PathBuf> {
        (0..n)
            .map(|i| PathBuf::from(format!("/dev/sd{}", (b'b' + i as u8) as char)))
            .collect()
    }

    #[test]
    fn test_disk_count_rules() {
        assert!(validate_disk_count(RaidLevel::Raid0, 1).is_err());
        assert!(validate_disk_count(RaidLevel::Raid0, 2).is_ok());
        assert!(validate_disk_count(RaidLevel::Raid10, 4).is_ok());
        assert!(validate_disk_count(RaidLevel::Raid10, 3).is_err());
        assert!(validate_disk_count(RaidLevel::Raid5, 3).is_ok());
        assert!(validate_disk_count(RaidLevel::Raid5, 16).is_ok());
        assert_eq!(
            validate_disk_count(RaidLevel::Raid5, 17),
            Err(RaidError::TooManyDisks {
                level: RaidLevel::Raid5,
                allowed: 16,
                given: 17
            })
        );
    }

    #[test]
    fn test_validate_against_inventory() {
        let fake = FakeBackend::new()
            .with_disk("/dev/sdb", 100 * GB)
            .with_disk("/dev/sdc", 100 * GB);
        let snapshot = fake.list_block_devices().expect("list"); // test: known-good input

        let ok = RaidSpec::new(RaidLevel::Raid1, disks(2));
        assert!(validate(&ok, &snapshot).is_ok());

        let missing = RaidSpec::new(RaidLevel::Raid1, disks(3));
        assert_eq!(
            validate(&RaidSpec::new(RaidLevel::Raid5, missing.disks), &snapshot),
            Err(RaidError::MissingDisk(PathBuf::from("/dev/sdd")))
        );

        let dup = RaidSpec::new(
            RaidLevel::Raid1,
            vec![PathBuf::from("/dev/sdb"), PathBuf::from("/dev/sdb")],
        );
        assert_eq!(
            validate(&dup, &snapshot),
            Err(RaidError::DuplicateDisk(PathBuf::from("/dev/sdb")))
        );
    }

    #[test]
    fn test_assemble_retries_with_force() {
        let fake = FakeBackend::new()
            .with_disk("/dev/sdb", 100 * GB)
            .with_disk("/dev/sdc", 100 * GB)
            .fail_raid_attempts(1);
        let assembler = RaidAssembler::new(&fake, "/dev/md0");
        let spec = RaidSpec::new(RaidLevel::Raid1, disks(2));

        assert_eq!(assembler.assemble(&spec), Some(PathBuf::from("/dev/md0")));
        let calls = fake.calls();
        assert_eq!(calls.len(), 2);
        assert!(!calls[0].ends_with("--force"));
        assert!(calls[1].ends_with("--force"));
    }

    #[test]
    fn test_assemble_gives_up_after_two_failures() {
        let fake = FakeBackend::new()
            .with_disk("/dev/sdb", 100 * GB)
            .with_disk("/dev/sdc", 100 * GB)
            .fail_raid_attempts(2);
        let assembler = RaidAssembler::new(&fake, "/dev/md0");
        assert_eq!(assembler.assemble(&RaidSpec::new(RaidLevel::Raid0, disks(2))), None);
        assert!(fake.arrays().is_empty());
    }

    #[test]
    fn test_without_filters_root_drive() {
        let spec = RaidSpec::new(RaidLevel::Raid1, disks(3));
        let filtered = spec.without(Path::new("/dev/sdb"));
        assert_eq!(filtered.disks, vec![PathBuf::from("/dev/sdc"), PathBuf::from("/dev/sdd")]);
    }
}
