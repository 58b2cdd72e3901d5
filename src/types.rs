//! Type-safe vocabulary shared by the provisioning engine.
//!
//! Filesystems, partition roles, RAID levels and partition flags are enums
//! rather than strings so that every `match` over them is exhaustive.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Filesystem type for partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Filesystem {
    /// Copy-on-write default for ROOT and HOME
    #[default]
    #[strum(serialize = "btrfs")]
    Btrfs,
    #[strum(serialize = "ext4")]
    Ext4,
    #[strum(serialize = "xfs")]
    Xfs,
    #[strum(serialize = "f2fs")]
    F2fs,
    /// FAT32 filesystem for EFI System Partition
    #[strum(to_string = "fat32", serialize = "vfat")]
    Fat32,
}

impl Filesystem {
    /// Filesystem name as understood by `parted mkpart`.
    pub fn parted_name(self) -> &'static str {
        match self {
            Self::Btrfs => "btrfs",
            Self::Ext4 => "ext4",
            Self::Xfs => "xfs",
            Self::F2fs => "f2fs",
            Self::Fat32 => "fat32",
        }
    }

    /// Filesystem name as reported by `lsblk`/`blkid` and written to fstab.
    pub fn kernel_name(self) -> &'static str {
        match self {
            Self::Fat32 => "vfat",
            other => other.parted_name(),
        }
    }

    /// Map an `lsblk` FSTYPE value back to a known filesystem.
    pub fn from_probe(fstype: &str) -> Option<Self> {
        fstype.parse().ok()
    }
}

/// Role a managed partition plays in the installed system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "UPPERCASE")]
pub enum PartitionRole {
    Efi,
    Root,
    Home,
}

impl PartitionRole {
    /// Where the role is mounted inside the target root.
    pub fn mountpoint(self) -> &'static str {
        match self {
            Self::Efi => "/boot/efi",
            Self::Root => "/",
            Self::Home => "/home",
        }
    }

    /// Filesystem label written when the partition is formatted.
    pub fn label(self) -> &'static str {
        match self {
            Self::Efi => "EFI",
            Self::Root => "ROOT",
            Self::Home => "HOME",
        }
    }
}

/// Supported software RAID levels for the HOME role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumIter)]
#[serde(try_from = "u8", into = "u8")]
pub enum RaidLevel {
    #[strum(to_string = "RAID0")]
    Raid0,
    #[strum(to_string = "RAID1")]
    Raid1,
    #[strum(to_string = "RAID5")]
    Raid5,
    #[strum(to_string = "RAID6")]
    Raid6,
    #[strum(to_string = "RAID10")]
    Raid10,
}

impl RaidLevel {
    /// Minimum number of member disks the level can be built from.
    pub const fn min_disks(self) -> usize {
        match self {
            Self::Raid0 | Self::Raid1 => 2,
            Self::Raid5 => 3,
            Self::Raid6 | Self::Raid10 => 4,
        }
    }

    /// Maximum number of member disks, if the level is capped.
    pub const fn max_disks(self) -> Option<usize> {
        match self {
            Self::Raid5 => Some(16),
            _ => None,
        }
    }

    /// Numeric level as used by `mdadm --level`.
    pub const fn number(self) -> u8 {
        match self {
            Self::Raid0 => 0,
            Self::Raid1 => 1,
            Self::Raid5 => 5,
            Self::Raid6 => 6,
            Self::Raid10 => 10,
        }
    }
}

impl TryFrom<u8> for RaidLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Raid0),
            1 => Ok(Self::Raid1),
            5 => Ok(Self::Raid5),
            6 => Ok(Self::Raid6),
            10 => Ok(Self::Raid10),
            other => Err(format!(
                "Unsupported RAID type {}. Valid: 0, 1, 5, 6, 10",
                other
            )),
        }
    }
}

impl From<RaidLevel> for u8 {
    fn from(level: RaidLevel) -> Self {
        level.number()
    }
}

/// Partition flags the engine sets. Both mark a partition bootable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionFlag {
    /// GPT `boot` flag, which parted maps to the EFI System Partition type
    Boot,
    /// GPT legacy BIOS bootable attribute, set on ROOT when booting via BIOS
    LegacyBoot,
}

impl PartitionFlag {
    /// Flag name as understood by `parted set`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Boot => "boot",
            Self::LegacyBoot => "legacy_boot",
        }
    }
}

impl std::fmt::Display for PartitionFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
