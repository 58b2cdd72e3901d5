//! Backend that drives the real Linux storage tools.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{BlockIds, DeviceBackend};
use crate::engine::free_space::FreeRegion;
use crate::engine::geometry::Region;
use crate::engine::inventory::{Snapshot, parse_lsblk};
use crate::engine::size::{drive_of, partition_number, partition_path};
use crate::error::{ProvisionError, Result};
use crate::tool_runner::run_tool;
use crate::tools::mdadm::MdadmCreateArgs;
use crate::tools::mkfs::MkfsArgs;
use crate::tools::parted::{PartedArgs, PartedCommand};
use crate::tools::probe::{BlkidArgs, LsblkArgs, PartprobeArgs};
use crate::types::{Filesystem, PartitionFlag, RaidLevel};

/// Shells out to `lsblk`, `parted`, `partprobe`, `mkfs.*`, `mdadm`, `blkid`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBackend;

impl SystemBackend {
    pub fn new() -> Self {
        Self
    }

    fn parted(&self, device: &Path, command: PartedCommand, context: &str) -> Result<String> {
        let output = run_tool(&PartedArgs::new(device, command))?.ensure_success(context)?;
        Ok(output.stdout)
    }

    fn parted_table(&self, disk: &Path, command: PartedCommand) -> Result<PartedDisk> {
        let stdout = self.parted(disk, command, "Reading partition table")?;
        parse_parted(&stdout)
    }

    fn number_of(&self, partition: &Path) -> Result<u32> {
        partition_number(partition).ok_or_else(|| {
            ProvisionError::invalid_request(format!(
                "{} is not a partition path",
                partition.display()
            ))
        })
    }
}

impl DeviceBackend for SystemBackend {
    fn list_block_devices(&self) -> Result<Snapshot> {
        let output = run_tool(&LsblkArgs)
            .map_err(|e| ProvisionError::probe(e.to_string()))?
            .ensure_success("Listing block devices")
            .map_err(|e| ProvisionError::probe(e.to_string()))?;
        parse_lsblk(&output.stdout)
    }

    fn reread_partition_table(&self, disk: &Path) -> Result<()> {
        run_tool(&PartprobeArgs {
            disk: disk.to_path_buf(),
        })?
        .ensure_success("Re-reading partition table")?;
        Ok(())
    }

    fn create_partition_table(&self, disk: &Path) -> Result<()> {
        self.parted(disk, PartedCommand::MkLabelGpt, "Creating GPT")?;
        Ok(())
    }

    fn free_regions(&self, disk: &Path) -> Result<Vec<FreeRegion>> {
        let table = self.parted_table(disk, PartedCommand::PrintFree)?;
        table
            .partitions
            .iter()
            .filter(|p| p.partition_type == "free")
            .map(|p| -> Result<FreeRegion> {
                // parted ends are inclusive
                Ok(FreeRegion::new(parse_bytes(&p.start)?, parse_bytes(&p.end)? + 1))
            })
            .collect()
    }

    fn create_partition(&self, disk: &Path, region: &Region, fs: Filesystem) -> Result<PathBuf> {
        self.parted(
            disk,
            PartedCommand::MkPart {
                fs,
                start: region.start,
                end: region.end,
            },
            "Creating partition",
        )?;

        // Parted picks the number; find the entry that starts where we asked
        let table = self.parted_table(disk, PartedCommand::Print)?;
        let created = table
            .partitions
            .iter()
            .filter(|p| p.partition_type != "free")
            .find_map(|p| {
                let start = parse_bytes(&p.start).ok()?;
                (start == region.start).then_some(p.number)
            })
            .ok_or_else(|| {
                ProvisionError::backend(format!(
                    "partition at byte {} not found on {} after mkpart",
                    region.start,
                    disk.display()
                ))
            })?;
        let number = u32::try_from(created)
            .map_err(|_| ProvisionError::backend(format!("bad partition number {}", created)))?;
        Ok(partition_path(disk, number))
    }

    fn delete_partition(&self, partition: &Path) -> Result<()> {
        let number = self.number_of(partition)?;
        self.parted(
            &drive_of(partition),
            PartedCommand::Rm { number },
            "Deleting partition",
        )?;
        Ok(())
    }

    fn set_flag(&self, partition: &Path, flag: PartitionFlag) -> Result<()> {
        let number = self.number_of(partition)?;
        self.parted(
            &drive_of(partition),
            PartedCommand::Set { number, flag },
            "Setting partition flag",
        )?;
        Ok(())
    }

    fn format(&self, device: &Path, fs: Filesystem, label: &str) -> Result<()> {
        let args = MkfsArgs {
            device: device.to_path_buf(),
            filesystem: fs,
            label: Some(label.to_string()),
        };
        run_tool(&args)
            .and_then(|out| out.ensure_success("Creating filesystem"))
            .map_err(|e| ProvisionError::format(device, e.to_string()))?;
        Ok(())
    }

    fn create_raid(
        &self,
        array: &Path,
        level: RaidLevel,
        members: &[PathBuf],
        force: bool,
    ) -> Result<()> {
        let args = MdadmCreateArgs {
            array: array.to_path_buf(),
            level,
            members: members.to_vec(),
            force,
        };
        run_tool(&args)?
            .ensure_success("Creating RAID array")
            .map_err(|e| ProvisionError::raid_creation(e.to_string()))?;
        Ok(())
    }

    fn block_ids(&self, device: &Path) -> Result<BlockIds> {
        let output = run_tool(&BlkidArgs {
            device: device.to_path_buf(),
        })?
        .ensure_success("Reading block identifiers")?;
        Ok(BlockIds::parse_export(&output.stdout))
    }
}

// ============================================================================
// parted JSON
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
struct PartedOutput {
    disk: PartedDisk,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct PartedDisk {
    #[serde(default)]
    partitions: Vec<PartedPartition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct PartedPartition {
    #[serde(default)]
    number: i64,
    start: String,
    end: String,
    #[serde(rename = "type", default)]
    partition_type: String,
}

fn parse_parted(json: &str) -> Result<PartedDisk> {
    let output: PartedOutput = serde_json::from_str(json)
        .map_err(|e| ProvisionError::backend(format!("Malformed parted output: {}", e)))?;
    Ok(output.disk)
}

/// Parse a parted `unit B` value such as `"1048576B"`.
fn parse_bytes(value: &str) -> Result<u64> {
    value
        .trim()
        .trim_end_matches('B')
        .parse()
        .map_err(|_| ProvisionError::backend(format!("Unexpected parted size '{}'", value)))
}
