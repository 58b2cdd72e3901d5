//! Role resolution and partition provisioning.
//!
//! [`PartitionProvisioner::plan_and_provision`] is the engine's entry point.
//! It validates the request against a fresh probe, picks one [`Scenario`],
//! materializes EFI/ROOT/HOME through the backend, formats everything it
//! created, and returns the final paths with the operation log.
//!
//! # Decision order
//!
//! 1. RAID home requested → clobber root drive, EFI + ROOT at 100%, array on
//!    the other disks (one forced retry, then no home).
//! 2. Home absent or make-new → clobber root drive, size ROOT by disk class.
//! 3. Existing home on another disk → clobber root drive, pass home through.
//! 4. Existing home on the root disk → no clobber, EFI and ROOT go into free
//!    space, largest region first.
//!
//! # Failure model
//!
//! Validation happens before the first destructive call. After that, errors
//! propagate without rollback, except that an EFI partition created in the
//! shared-disk scenario is removed again when ROOT cannot be placed.

use std::path::{Path, PathBuf};

use crate::backend::DeviceBackend;
use crate::config::PolicyConfig;
use crate::engine::free_space::{FreeSpaceScanner, select_largest_first};
use crate::engine::geometry::{GeometryPlanner, Region};
use crate::engine::inventory::BlockDeviceInventory;
use crate::engine::raid::RaidAssembler;
use crate::engine::request::{HomePolicy, ProvisioningRequest};
use crate::engine::size::{
    Bound, MIB, SECTOR_SIZE, SizePolicy, align_down, align_up, display_size, drive_of,
};
use crate::engine::storage::{ProvisioningResult, Scenario, StorageOp};
use crate::error::{ProvisionError, Result};
use crate::types::{Filesystem, PartitionFlag, PartitionRole};

// ============================================================================
// Pure decisions
// ============================================================================

/// Pick the layout scenario for a validated request.
pub fn resolve_scenario(request: &ProvisioningRequest) -> Scenario {
    if request.raid.is_some() {
        return Scenario::RaidHome;
    }
    match &request.home {
        HomePolicy::Absent | HomePolicy::MakeNew => Scenario::FreshDisk,
        HomePolicy::ExistingPath(home) if drive_of(home) == request.root_drive => {
            Scenario::SharedDiskHome
        }
        HomePolicy::ExistingPath(_) => Scenario::ForeignHome,
    }
}

/// How ROOT is sized on a freshly clobbered disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootSizing {
    /// ROOT takes all usable space, no HOME
    WholeDisk,
    /// ROOT gets `root_size` bytes, HOME the remainder
    Split { root_size: u64 },
}

/// Size ROOT on a fresh disk of `disk_size` bytes whose ROOT starts at
/// `root_start`.
pub fn plan_fresh_sizing(
    policy: &PolicyConfig,
    request: &ProvisioningRequest,
    ram_bytes: u64,
    disk_size: u64,
    root_start: u64,
) -> RootSizing {
    if request.home == HomePolicy::Absent {
        return RootSizing::WholeDisk;
    }
    if disk_size <= policy.limiter {
        tracing::warn!(
            "Disk is {} (limit {}); installing without a separate home",
            display_size(disk_size),
            display_size(policy.limiter)
        );
        return RootSizing::WholeDisk;
    }

    let root_size = if disk_size >= policy.mdswh_threshold {
        Bound::Percent(policy.root_split).resolve(disk_size)
    } else {
        SizePolicy::new(policy).minimum_root_size(request.swap.is_file(), ram_bytes)
    };
    let root_size = align_up(root_size, MIB);

    let usable_end = GeometryPlanner::new(disk_size).usable_range().max;
    let home_size = usable_end.saturating_sub(align_up(root_start, MIB) + root_size);
    let min_home = policy.min_home_size.resolve(disk_size);
    if home_size < min_home {
        tracing::warn!(
            "Only {} would remain for home (minimum {}); installing without a separate home",
            display_size(home_size),
            display_size(min_home)
        );
        return RootSizing::WholeDisk;
    }

    RootSizing::Split { root_size }
}

// ============================================================================
// Provisioner
// ============================================================================

/// Drives the backend to materialize a layout.
pub struct PartitionProvisioner<'a> {
    inventory: BlockDeviceInventory<'a>,
    policy: &'a PolicyConfig,
    ram_bytes: u64,
    ops: Vec<StorageOp>,
    created: Vec<(PartitionRole, PathBuf)>,
}

struct Layout {
    root: PathBuf,
    efi: Option<PathBuf>,
    home: Option<PathBuf>,
}

impl<'a> PartitionProvisioner<'a> {
    pub fn new(backend: &'a dyn DeviceBackend, policy: &'a PolicyConfig, ram_bytes: u64) -> Self {
        Self {
            inventory: BlockDeviceInventory::new(backend, policy.settle_delay),
            policy,
            ram_bytes,
            ops: Vec::new(),
            created: Vec::new(),
        }
    }

    fn backend(&self) -> &'a dyn DeviceBackend {
        self.inventory.backend()
    }

    /// Validate, choose a scenario, partition, and format.
    ///
    /// Running this twice with `MakeNew` clobbers the disk twice; callers
    /// confirm with the user before calling it.
    pub fn plan_and_provision(
        &mut self,
        request: &ProvisioningRequest,
    ) -> Result<ProvisioningResult> {
        self.ops.clear();
        self.created.clear();

        let snapshot = self.inventory.probe()?;
        request.validate(&snapshot)?;

        let disk_size = snapshot
            .find_disk(&request.root_drive)
            .map(|d| d.size)
            .ok_or_else(|| {
                ProvisionError::invalid_request(format!(
                    "root drive {} vanished",
                    request.root_drive.display()
                ))
            })?;

        let scenario = resolve_scenario(request);
        tracing::info!(
            "Provisioning {} ({}, {}): {}",
            request.root_drive.display(),
            display_size(disk_size),
            if request.efi_requested { "UEFI" } else { "BIOS" },
            scenario
        );

        let layout = match scenario {
            Scenario::RaidHome => self.layout_raid_home(request, disk_size)?,
            Scenario::FreshDisk => self.layout_fresh(request, disk_size)?,
            Scenario::ForeignHome => {
                let (efi, root) = self.layout_whole_disk(request, disk_size)?;
                Layout {
                    root,
                    efi,
                    home: request.home_path().map(Path::to_path_buf),
                }
            }
            Scenario::SharedDiskHome => self.layout_shared(request, disk_size)?,
        };

        self.format_created()?;

        let result = ProvisioningResult {
            root: layout.root,
            efi: layout.efi,
            home: layout.home,
            scenario,
            ops: std::mem::take(&mut self.ops),
        };
        tracing::info!("{}", result.summary());
        Ok(result)
    }

    // ------------------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------------------

    fn layout_raid_home(
        &mut self,
        request: &ProvisioningRequest,
        disk_size: u64,
    ) -> Result<Layout> {
        let (efi, root) = self.layout_whole_disk(request, disk_size)?;

        let mut home = None;
        if let Some(spec) = &request.raid {
            let members = request.array_members(spec);
            let assembler = RaidAssembler::new(self.backend(), self.policy.raid_device.clone());
            if let Some(array) = assembler.assemble(&members) {
                self.ops.push(StorageOp::CreateRaid {
                    array: array.clone(),
                    level: members.level,
                    members: members.disks.clone(),
                });
                self.created.push((PartitionRole::Home, array.clone()));
                home = Some(array);
            }
        }

        Ok(Layout { root, efi, home })
    }

    fn layout_fresh(&mut self, request: &ProvisioningRequest, disk_size: u64) -> Result<Layout> {
        let disk = request.root_drive.as_path();
        self.clobber(disk)?;
        let efi = self.create_efi_if_requested(request, disk, disk_size)?;
        let root_start = self.next_start(&efi, disk_size);

        match plan_fresh_sizing(self.policy, request, self.ram_bytes, disk_size, root_start) {
            RootSizing::WholeDisk => {
                let (root, _) =
                    self.create_role(request, disk, disk_size, PartitionRole::Root, root_start, None)?;
                Ok(Layout {
                    root,
                    efi: efi.map(|(p, _)| p),
                    home: None,
                })
            }
            RootSizing::Split { root_size } => {
                tracing::info!("ROOT gets {}, HOME the rest", display_size(root_size));
                let (root, root_region) = self.create_role(
                    request,
                    disk,
                    disk_size,
                    PartitionRole::Root,
                    root_start,
                    Some(root_size),
                )?;
                let (home, _) = self.create_role(
                    request,
                    disk,
                    disk_size,
                    PartitionRole::Home,
                    root_region.end,
                    None,
                )?;
                Ok(Layout {
                    root,
                    efi: efi.map(|(p, _)| p),
                    home: Some(home),
                })
            }
        }
    }

    /// Clobber, then EFI (UEFI only) and ROOT over the rest of the disk.
    fn layout_whole_disk(
        &mut self,
        request: &ProvisioningRequest,
        disk_size: u64,
    ) -> Result<(Option<PathBuf>, PathBuf)> {
        let disk = request.root_drive.as_path();
        self.clobber(disk)?;
        let efi = self.create_efi_if_requested(request, disk, disk_size)?;
        let root_start = self.next_start(&efi, disk_size);
        let (root, _) =
            self.create_role(request, disk, disk_size, PartitionRole::Root, root_start, None)?;
        Ok((efi.map(|(p, _)| p), root))
    }

    fn layout_shared(&mut self, request: &ProvisioningRequest, disk_size: u64) -> Result<Layout> {
        let disk = request.root_drive.as_path();
        tracing::info!(
            "Keeping existing partitions on {}; using free space only",
            disk.display()
        );

        let efi = if request.efi_requested {
            let needed = self.policy.efi_size.resolve(disk_size);
            Some(self.create_in_free_space(request, disk, PartitionRole::Efi, needed, false)?)
        } else {
            None
        };

        let minimum = SizePolicy::new(self.policy)
            .minimum_root_size(request.swap.is_file(), self.ram_bytes);
        let root = match self.create_in_free_space(request, disk, PartitionRole::Root, minimum, true)
        {
            Ok(root) => root,
            Err(e) => {
                if let Some(efi) = &efi {
                    self.remove_created(disk, efi)?;
                }
                return Err(e);
            }
        };

        Ok(Layout {
            root,
            efi,
            home: request.home_path().map(Path::to_path_buf),
        })
    }

    // ------------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------------

    fn clobber(&mut self, disk: &Path) -> Result<()> {
        tracing::info!("Creating new GPT on {}", disk.display());
        self.backend().create_partition_table(disk)?;
        self.ops.push(StorageOp::ClobberDisk {
            disk: disk.to_path_buf(),
        });
        self.inventory.rescan(disk)
    }

    fn create_efi_if_requested(
        &mut self,
        request: &ProvisioningRequest,
        disk: &Path,
        disk_size: u64,
    ) -> Result<Option<(PathBuf, Region)>> {
        if !request.efi_requested {
            return Ok(None);
        }
        let start = self.policy.efi_start.resolve(disk_size);
        let size = self.policy.efi_size.resolve(disk_size);
        self.create_role(request, disk, disk_size, PartitionRole::Efi, start, Some(size))
            .map(Some)
    }

    /// First byte after the EFI partition, or the configured start.
    fn next_start(&self, efi: &Option<(PathBuf, Region)>, disk_size: u64) -> u64 {
        efi.as_ref()
            .map_or_else(|| self.policy.efi_start.resolve(disk_size), |(_, r)| r.end)
    }

    /// Create `role` at `start` with `size` bytes (to the end of the disk when
    /// `None`) using tolerant geometry, falling back to largest-first free
    /// space when the tolerant request does not fit.
    fn create_role(
        &mut self,
        request: &ProvisioningRequest,
        disk: &Path,
        disk_size: u64,
        role: PartitionRole,
        start: u64,
        size: Option<u64>,
    ) -> Result<(PathBuf, Region)> {
        let start = align_up(start, MIB);
        let end = size.map_or(disk_size, |s| start.saturating_add(align_up(s, MIB)));
        let wanted = GeometryPlanner::new(disk_size).plan_region(start, end)?;
        let free = FreeSpaceScanner::new(self.backend()).scan(disk)?;

        let region = match wanted.resolve(&free) {
            Some(region) => region,
            None => {
                tracing::warn!(
                    "{} does not fit at {}..{} on {}; falling back to the largest free region",
                    role,
                    wanted.desired.start,
                    wanted.desired.end,
                    disk.display()
                );
                let chosen = select_largest_first(&free, wanted.min_size)?;
                carve(chosen.start, chosen.end, wanted.desired.size(), wanted.min_size)?
            }
        };

        let path = self.create_partition_at(request, disk, role, region)?;
        Ok((path, region))
    }

    /// Largest-first placement inside existing free space. With
    /// `take_whole`, the partition fills the chosen region.
    fn create_in_free_space(
        &mut self,
        request: &ProvisioningRequest,
        disk: &Path,
        role: PartitionRole,
        needed: u64,
        take_whole: bool,
    ) -> Result<PathBuf> {
        let free = FreeSpaceScanner::new(self.backend()).scan(disk)?;
        let chosen = select_largest_first(&free, needed).map_err(|e| {
            ProvisionError::allocation(format!("{} on {}: {}", role, disk.display(), e))
        })?;
        let want = if take_whole { chosen.size } else { align_up(needed, MIB) };
        let region = carve(chosen.start, chosen.end, want, needed).map_err(|e| {
            ProvisionError::allocation(format!("{} on {}: {}", role, disk.display(), e))
        })?;
        self.create_partition_at(request, disk, role, region)
    }

    fn create_partition_at(
        &mut self,
        request: &ProvisioningRequest,
        disk: &Path,
        role: PartitionRole,
        region: Region,
    ) -> Result<PathBuf> {
        let fs = self.filesystem_for(role);
        let path = self.backend().create_partition(disk, &region, fs)?;
        tracing::info!(
            "Created {} partition {} ({})",
            role,
            path.display(),
            display_size(region.size())
        );
        self.ops.push(StorageOp::CreatePartition {
            disk: disk.to_path_buf(),
            role,
            region,
            partition: path.clone(),
        });
        self.inventory.rescan(disk)?;

        let flag = match role {
            PartitionRole::Efi => Some(PartitionFlag::Boot),
            PartitionRole::Root if !request.efi_requested => Some(PartitionFlag::LegacyBoot),
            _ => None,
        };
        if let Some(flag) = flag {
            self.backend().set_flag(&path, flag)?;
            self.ops.push(StorageOp::SetFlag {
                partition: path.clone(),
                flag,
            });
            self.inventory.rescan(disk)?;
        }

        self.created.push((role, path.clone()));
        Ok(path)
    }

    fn remove_created(&mut self, disk: &Path, partition: &Path) -> Result<()> {
        tracing::warn!("Removing {} after failed allocation", partition.display());
        self.backend().delete_partition(partition)?;
        self.ops.push(StorageOp::DeletePartition {
            partition: partition.to_path_buf(),
        });
        self.created.retain(|(_, p)| p != partition);
        self.inventory.rescan(disk)
    }

    fn filesystem_for(&self, role: PartitionRole) -> Filesystem {
        match role {
            PartitionRole::Efi => Filesystem::Fat32,
            PartitionRole::Root => self.policy.root_filesystem,
            PartitionRole::Home => self.policy.home_filesystem,
        }
    }

    /// Format every device created in this run, in creation order.
    fn format_created(&mut self) -> Result<()> {
        for (role, device) in std::mem::take(&mut self.created) {
            let fs = self.filesystem_for(role);
            tracing::info!("Formatting {} as {} ({})", device.display(), fs, role);
            self.backend()
                .format(&device, fs, role.label())
                .map_err(|e| match e {
                    ProvisionError::Format { .. } => e,
                    other => ProvisionError::format(&device, other.to_string()),
                })?;
            self.ops.push(StorageOp::FormatFs {
                device,
                filesystem: fs,
                label: role.label().to_string(),
            });
        }
        Ok(())
    }
}

/// Carve `want` bytes from the start of `[start, end)`, aligned, and reject
/// results smaller than `needed`.
fn carve(start: u64, end: u64, want: u64, needed: u64) -> Result<Region> {
    let s = align_up(start, MIB);
    let e = align_down(s.saturating_add(want).min(end), SECTOR_SIZE);
    if e <= s || e - s < needed {
        return Err(ProvisionError::allocation(format!(
            "region {}..{} holds {} after alignment, {} needed",
            start,
            end,
            display_size(e.saturating_sub(s)),
            display_size(needed)
        )));
    }
    Ok(Region { start: s, end: e })
}
