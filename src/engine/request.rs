//! Provisioning request: what the caller wants, before any disk is touched.

use std::path::{Path, PathBuf};

use crate::engine::inventory::{DeviceKind, MIN_DISK_SIZE, Snapshot};
use crate::engine::size::display_size;
use crate::engine::raid::{self, RaidSpec};
use crate::error::{ProvisionError, Result};

/// Where HOME comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HomePolicy {
    /// No separate home partition
    Absent,
    /// Carve a new home partition next to ROOT if the disk allows it
    MakeNew,
    /// Reuse an existing partition (or array) unchanged
    ExistingPath(PathBuf),
}

/// Where swap lives in the installed system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapPolicy {
    /// Swap file inside ROOT; ROOT must hold it
    File,
    /// Dedicated swap partition, not managed by the planner
    Partition(PathBuf),
}

impl SwapPolicy {
    pub fn is_file(&self) -> bool {
        matches!(self, Self::File)
    }
}

/// Input of [`PartitionProvisioner::plan_and_provision`](crate::engine::provision::PartitionProvisioner::plan_and_provision).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningRequest {
    pub root_drive: PathBuf,
    /// True iff the firmware is UEFI
    pub efi_requested: bool,
    pub home: HomePolicy,
    pub raid: Option<RaidSpec>,
    pub swap: SwapPolicy,
}

impl ProvisioningRequest {
    /// Request for a single disk with no RAID and a swap file.
    pub fn new(root_drive: impl Into<PathBuf>, efi_requested: bool, home: HomePolicy) -> Self {
        Self {
            root_drive: root_drive.into(),
            efi_requested,
            home,
            raid: None,
            swap: SwapPolicy::File,
        }
    }

    pub fn with_raid(mut self, spec: RaidSpec) -> Self {
        self.raid = Some(spec);
        self
    }

    pub fn with_swap(mut self, swap: SwapPolicy) -> Self {
        self.swap = swap;
        self
    }

    /// Reject requests that cannot be satisfied on `snapshot`.
    ///
    /// A root drive below [`MIN_DISK_SIZE`] is an allocation failure: no
    /// layout fits on it, so nothing is wiped.
    ///
    /// RAID specs are checked with the root drive filtered out, since the
    /// root drive is never an array member.
    pub fn validate(&self, snapshot: &Snapshot) -> Result<()> {
        let root = snapshot.find_disk(&self.root_drive).ok_or_else(|| {
            ProvisionError::invalid_request(format!(
                "root drive {} does not exist",
                self.root_drive.display()
            ))
        })?;
        if root.kind != DeviceKind::Disk {
            return Err(ProvisionError::invalid_request(format!(
                "root drive {} is not a plain disk",
                self.root_drive.display()
            )));
        }
        if root.size < MIN_DISK_SIZE {
            return Err(ProvisionError::allocation(format!(
                "root drive {} is {}, at least {} is required",
                self.root_drive.display(),
                display_size(root.size),
                display_size(MIN_DISK_SIZE)
            )));
        }

        if let HomePolicy::ExistingPath(home) = &self.home {
            if !snapshot.contains(home) {
                return Err(ProvisionError::invalid_request(format!(
                    "home partition {} does not exist",
                    home.display()
                )));
            }
            if home == &self.root_drive {
                return Err(ProvisionError::invalid_request(
                    "home cannot be the whole root drive",
                ));
            }
        }

        if let SwapPolicy::Partition(swap) = &self.swap {
            if !snapshot.contains(swap) {
                return Err(ProvisionError::invalid_request(format!(
                    "swap partition {} does not exist",
                    swap.display()
                )));
            }
        }

        if let Some(spec) = &self.raid {
            raid::validate(&self.array_members(spec), snapshot)?;
        }

        Ok(())
    }

    /// Array members for `spec`, root drive excluded.
    pub fn array_members(&self, spec: &RaidSpec) -> RaidSpec {
        spec.without(&self.root_drive)
    }

    pub fn home_path(&self) -> Option<&Path> {
        match &self.home {
            HomePolicy::ExistingPath(path) => Some(path),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DeviceBackend, FakeBackend};
    use crate::engine::raid::RaidError;
    use crate::engine::size::{GB, MIB};
    use crate::types::RaidLevel;

    fn snapshot() -> Snapshot {
        FakeBackend::new()
            .with_disk("/dev/sda", 64 * GB)
            .with_disk("/dev/sdb", 500 * GB)
            .with_partition("/dev/sdb", MIB, 400 * GB, Some("ext4"))
            .with_disk("/dev/sdc", 500 * GB)
            .with_disk("/dev/sdd", 8 * GB)
            .with_loop("/dev/loop0", GB)
            .list_block_devices()
            .expect("list") // test: known-good input
    }

    #[test]
    fn test_valid_request() {
        let req = ProvisioningRequest::new("/dev/sda", true, HomePolicy::ExistingPath("/dev/sdb1".into()));
        assert!(req.validate(&snapshot()).is_ok());
    }

    #[test]
    fn test_missing_root_drive() {
        let req = ProvisioningRequest::new("/dev/sdz", false, HomePolicy::Absent);
        assert!(matches!(
            req.validate(&snapshot()),
            Err(ProvisionError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_loop_root_drive_is_rejected() {
        let req = ProvisioningRequest::new("/dev/loop0", false, HomePolicy::Absent);
        assert!(req.validate(&snapshot()).is_err());
    }

    #[test]
    fn test_undersized_root_drive_is_allocation_error() {
        let req = ProvisioningRequest::new("/dev/sdd", true, HomePolicy::MakeNew);
        assert!(matches!(
            req.validate(&snapshot()),
            Err(ProvisionError::Allocation(_))
        ));
    }

    #[test]
    fn test_missing_home_is_rejected() {
        let req = ProvisioningRequest::new("/dev/sda", false, HomePolicy::ExistingPath("/dev/sdb7".into()));
        assert!(matches!(
            req.validate(&snapshot()),
            Err(ProvisionError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_raid_excludes_root_drive_before_counting() {
        // Root drive listed as a member leaves a single real member
        let spec = RaidSpec::new(RaidLevel::Raid1, vec!["/dev/sda".into(), "/dev/sdb".into()]);
        let req = ProvisioningRequest::new("/dev/sda", true, HomePolicy::Absent).with_raid(spec);
        match req.validate(&snapshot()) {
            Err(ProvisionError::RaidValidation(RaidError::TooFewDisks { given, .. })) => {
                assert_eq!(given, 1)
            }
            other => panic!("expected TooFewDisks, got {:?}", other),
        }
    }
}
