//! Provisioning outcome and operation log.
//!
//! Every backend call that changes disk state is recorded as a [`StorageOp`]
//! in issue order. The log ends up in the [`ProvisioningResult`], which the
//! `plan` command prints after a simulated run.
//!
//! # Scenarios
//!
//! | Scenario         | Clobbers root drive | HOME                      |
//! |------------------|---------------------|---------------------------|
//! | `RaidHome`       | yes                 | new array on other disks  |
//! | `FreshDisk`      | yes                 | carved next to ROOT or none |
//! | `ForeignHome`    | yes                 | existing, other disk      |
//! | `SharedDiskHome` | no                  | existing, same disk       |

use std::fmt;
use std::path::{Path, PathBuf};

use crate::engine::geometry::Region;
use crate::engine::size::display_size;
use crate::types::{Filesystem, PartitionFlag, PartitionRole, RaidLevel};

// ============================================================================
// Storage Operation Types
// ============================================================================

/// One atomic storage operation issued to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    /// Replace the partition table with an empty GPT
    ClobberDisk { disk: PathBuf },

    CreatePartition {
        disk: PathBuf,
        role: PartitionRole,
        region: Region,
        partition: PathBuf,
    },

    SetFlag {
        partition: PathBuf,
        flag: PartitionFlag,
    },

    /// Roll back a partition created earlier in the same run
    DeletePartition { partition: PathBuf },

    CreateRaid {
        array: PathBuf,
        level: RaidLevel,
        members: Vec<PathBuf>,
    },

    FormatFs {
        device: PathBuf,
        filesystem: Filesystem,
        label: String,
    },
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClobberDisk { disk } => write!(f, "ClobberDisk({})", disk.display()),
            Self::CreatePartition {
                disk,
                role,
                region,
                partition,
            } => write!(
                f,
                "CreatePartition({} on {}, {}..{}, {}) -> {}",
                role,
                disk.display(),
                region.start,
                region.end,
                display_size(region.size()),
                partition.display()
            ),
            Self::SetFlag { partition, flag } => {
                write!(f, "SetFlag({}, {})", partition.display(), flag)
            }
            Self::DeletePartition { partition } => {
                write!(f, "DeletePartition({})", partition.display())
            }
            Self::CreateRaid {
                array,
                level,
                members,
            } => write!(
                f,
                "CreateRaid({} {}, members={:?})",
                level,
                array.display(),
                members
            ),
            Self::FormatFs {
                device,
                filesystem,
                label,
            } => write!(
                f,
                "FormatFs({}, fs={}, label={})",
                device.display(),
                filesystem,
                label
            ),
        }
    }
}

impl StorageOp {
    /// Whether the op destroys data that existed before the run.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            Self::ClobberDisk { .. } | Self::CreateRaid { .. } | Self::FormatFs { .. }
        )
    }
}

/// Layout decision taken by the provisioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    RaidHome,
    FreshDisk,
    ForeignHome,
    SharedDiskHome,
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RaidHome => write!(f, "RAID home"),
            Self::FreshDisk => write!(f, "fresh disk"),
            Self::ForeignHome => write!(f, "existing home on another disk"),
            Self::SharedDiskHome => write!(f, "existing home on the root disk"),
        }
    }
}

/// Final partition paths plus how they were produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningResult {
    pub root: PathBuf,
    pub efi: Option<PathBuf>,
    pub home: Option<PathBuf>,
    pub scenario: Scenario,
    pub ops: Vec<StorageOp>,
}

impl ProvisioningResult {
    pub fn is_destructive(&self) -> bool {
        self.ops.iter().any(StorageOp::is_destructive)
    }

    /// Path for a role, if the layout has one.
    pub fn path_for(&self, role: PartitionRole) -> Option<&Path> {
        match role {
            PartitionRole::Root => Some(&self.root),
            PartitionRole::Efi => self.efi.as_deref(),
            PartitionRole::Home => self.home.as_deref(),
        }
    }

    /// Multi-line summary for logs and the `plan` command.
    pub fn summary(&self) -> String {
        let show = |p: &Option<PathBuf>| {
            p.as_ref()
                .map_or_else(|| "none".to_string(), |p| p.display().to_string())
        };
        let mut lines = vec![
            format!("Provisioning: {}", self.scenario),
            format!("  ROOT: {}", self.root.display()),
            format!("  EFI:  {}", show(&self.efi)),
            format!("  HOME: {}", show(&self.home)),
            format!("  Operations ({}):", self.ops.len()),
        ];
        for (i, op) in self.ops.iter().enumerate() {
            lines.push(format!("    {}. {}", i + 1, op));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> ProvisioningResult {
        ProvisioningResult {
            root: PathBuf::from("/dev/sda2"),
            efi: Some(PathBuf::from("/dev/sda1")),
            home: None,
            scenario: Scenario::FreshDisk,
            ops: vec![
                StorageOp::ClobberDisk {
                    disk: PathBuf::from("/dev/sda"),
                },
                StorageOp::SetFlag {
                    partition: PathBuf::from("/dev/sda1"),
                    flag: PartitionFlag::Boot,
                },
            ],
        }
    }

    #[test]
    fn test_summary_lists_paths_and_ops() {
        let summary = result().summary();
        assert!(summary.starts_with("Provisioning: fresh disk"));
        assert!(summary.contains("ROOT: /dev/sda2"));
        assert!(summary.contains("HOME: none"));
        assert!(summary.contains("1. ClobberDisk(/dev/sda)"));
        assert!(summary.contains("2. SetFlag(/dev/sda1, boot)"));
    }

    #[test]
    fn test_destructive_detection() {
        assert!(result().is_destructive());
        let mut passive = result();
        passive.ops.retain(|op| !op.is_destructive());
        assert!(!passive.is_destructive());
    }

    #[test]
    fn test_path_for_role() {
        let r = result();
        assert_eq!(r.path_for(PartitionRole::Root), Some(Path::new("/dev/sda2")));
        assert_eq!(r.path_for(PartitionRole::Home), None);
    }
}
