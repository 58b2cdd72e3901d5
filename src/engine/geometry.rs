//! Tolerant partition geometry.
//!
//! A desired `[start, end)` rarely lands exactly on free, aligned space:
//! neighbours end on odd sectors and the GPT reserves both ends of the disk.
//! [`GeometryPlanner::plan_region`] widens the desired range into an
//! [`AllocationRequest`] with tolerance windows, and
//! [`AllocationRequest::resolve`] picks a concrete aligned [`Region`] that
//! fits inside a single free region, or rejects.
//!
//! # Windows
//!
//! | Edge  | Window                  |
//! |-------|-------------------------|
//! | start | desired ± 20 MB         |
//! | end   | desired − 100 / + 20 MB |
//! | size  | desired ± 250 MB        |
//!
//! All windows are clamped to the usable range: the first 1 MiB is left to
//! the protective MBR and primary GPT, the last 33 sectors to the backup GPT.

use crate::engine::free_space::FreeRegion;
use crate::engine::size::{MB, MIB, SECTOR_SIZE, align_down, align_up, display_size};
use crate::error::{ProvisionError, Result};

pub const START_TOLERANCE: u64 = 20 * MB;
pub const END_SHRINK_TOLERANCE: u64 = 100 * MB;
pub const END_GROW_TOLERANCE: u64 = 20 * MB;
pub const SIZE_TOLERANCE: u64 = 250 * MB;

/// Sectors occupied by the backup GPT header and entries.
pub const GPT_BACKUP_SECTORS: u64 = 33;

/// Concrete partition extent `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: u64,
    pub end: u64,
}

impl Region {
    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        self.start < end && start < self.end
    }
}

/// Inclusive byte window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub min: u64,
    pub max: u64,
}

impl ByteRange {
    pub fn contains(&self, value: u64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Tolerant request handed to the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRequest {
    pub desired: Region,
    pub start_range: ByteRange,
    pub end_range: ByteRange,
    pub min_size: u64,
    pub max_size: u64,
}

impl AllocationRequest {
    /// Pick an aligned region inside one free region and all windows.
    ///
    /// The start is rounded up to 1 MiB and the end down to a sector, both
    /// after being pulled inside the free region.
    pub fn resolve(&self, free: &[FreeRegion]) -> Option<Region> {
        free.iter().find_map(|f| {
            let start = align_up(self.desired.start.max(f.start), MIB);
            let end = align_down(self.desired.end.min(f.end), SECTOR_SIZE);
            if end <= start || end > f.end {
                return None;
            }
            let size = end - start;
            let fits = self.start_range.contains(start)
                && self.end_range.contains(end)
                && size >= self.min_size
                && size <= self.max_size;
            fits.then_some(Region { start, end })
        })
    }
}

/// Builds allocation requests for one disk.
#[derive(Debug, Clone, Copy)]
pub struct GeometryPlanner {
    disk_size: u64,
}

impl GeometryPlanner {
    pub fn new(disk_size: u64) -> Self {
        Self { disk_size }
    }

    /// Byte range partitions may occupy on a GPT disk.
    pub fn usable_range(&self) -> ByteRange {
        let tail = align_down(
            self.disk_size
                .saturating_sub(GPT_BACKUP_SECTORS * SECTOR_SIZE),
            SECTOR_SIZE,
        );
        ByteRange {
            min: MIB,
            max: tail.max(MIB),
        }
    }

    /// Widen `[start, end)` into a tolerant request.
    pub fn plan_region(&self, start: u64, end: u64) -> Result<AllocationRequest> {
        let usable = self.usable_range();
        let start = start.max(usable.min);
        let end = end.min(usable.max);
        if end <= start || end - start < MIB {
            return Err(ProvisionError::allocation(format!(
                "requested range {}..{} leaves no usable space on a {} disk",
                start,
                end,
                display_size(self.disk_size)
            )));
        }

        let desired_size = end - start;
        let request = AllocationRequest {
            desired: Region { start, end },
            start_range: ByteRange {
                min: start.saturating_sub(START_TOLERANCE).max(usable.min),
                max: start.saturating_add(START_TOLERANCE).min(usable.max),
            },
            end_range: ByteRange {
                min: end.saturating_sub(END_SHRINK_TOLERANCE).max(usable.min),
                max: end.saturating_add(END_GROW_TOLERANCE).min(usable.max),
            },
            min_size: desired_size.saturating_sub(SIZE_TOLERANCE).max(MIB),
            max_size: desired_size.saturating_add(SIZE_TOLERANCE),
        };
        tracing::debug!("Planned region {:?}", request);
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::size::GB;

    const DISK: u64 = 64 * GB;

    #[test]
    fn test_usable_range_reserves_gpt() {
        let usable = GeometryPlanner::new(DISK).usable_range();
        assert_eq!(usable.min, MIB);
        assert_eq!(usable.max, DISK - 33 * 512);
    }

    #[test]
    fn test_resolve_snaps_start_to_mib() {
        let planner = GeometryPlanner::new(DISK);
        let request = planner.plan_region(0, 200 * MB).expect("plan"); // test: known-good input
        let free = [FreeRegion::new(17_408, DISK - 33 * 512)];
        let region = request.resolve(&free).expect("resolves"); // test: known-good input
        assert_eq!(region.start, MIB);
        assert_eq!(region.end, 200 * MB);
        assert_eq!(region.start % MIB, 0);
        assert_eq!(region.end % SECTOR_SIZE, 0);
    }

    #[test]
    fn test_resolve_tolerates_small_misalignment() {
        let planner = GeometryPlanner::new(DISK);
        let request = planner.plan_region(200 * MB, 30 * GB).expect("plan"); // test: known-good input
        // Previous partition ended a few sectors past the desired start
        let free = [FreeRegion::new(200 * MB + 4096, DISK - 33 * 512)];
        let region = request.resolve(&free).expect("resolves"); // test: known-good input
        assert!(region.start >= 200 * MB + 4096);
        assert_eq!(region.start % MIB, 0);
        assert_eq!(region.end, 30 * GB);
    }

    #[test]
    fn test_resolve_rejects_region_outside_start_window() {
        let planner = GeometryPlanner::new(DISK);
        let request = planner.plan_region(MIB, 10 * GB).expect("plan"); // test: known-good input
        let free = [FreeRegion::new(5 * GB, DISK - 33 * 512)];
        assert_eq!(request.resolve(&free), None);
    }

    #[test]
    fn test_resolve_rejects_shrunken_end() {
        let planner = GeometryPlanner::new(DISK);
        let request = planner.plan_region(MIB, 10 * GB).expect("plan"); // test: known-good input
        // Free space stops 500 MB short of the desired end
        let free = [FreeRegion::new(MIB, 10 * GB - 500 * MB)];
        assert_eq!(request.resolve(&free), None);
    }

    #[test]
    fn test_plan_region_clamps_to_disk_tail() {
        let planner = GeometryPlanner::new(DISK);
        let request = planner.plan_region(40 * GB, u64::MAX).expect("plan"); // test: known-good input
        assert_eq!(request.desired.end, DISK - 33 * 512);
        assert!(request.end_range.max <= DISK - 33 * 512);
    }

    #[test]
    fn test_plan_region_rejects_empty_range() {
        let planner = GeometryPlanner::new(DISK);
        assert!(planner.plan_region(DISK, DISK + GB).is_err());
        assert!(planner.plan_region(10 * GB, 10 * GB).is_err());
    }
}
