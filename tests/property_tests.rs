//! Property-based tests for sysinstall
//!
//! These tests verify:
//! - Minimum root size ordering and monotonicity
//! - Bound resolution against arbitrary disk sizes
//! - Alignment helpers
//! - Partition path construction and parsing are inverse
//! - Provisioning a fresh disk: one ROOT, EFI iff UEFI, no HOME on small
//!   disks, aligned and non-overlapping partitions

use proptest::prelude::*;
use std::path::PathBuf;
use std::time::Duration;

use sysinstall::engine::size::{
    Bound, GB, MIB, SECTOR_SIZE, SizePolicy, align_down, align_up, drive_of, partition_number,
    partition_path, resolve_bound,
};
use sysinstall::engine::geometry::GPT_BACKUP_SECTORS;
use sysinstall::{
    FakeBackend, Filesystem, FirmwareMode, HomePolicy, PartitionProvisioner, PartitionRole,
    PolicyConfig, ProvisioningRequest, RaidLevel, StorageOp,
};

// =============================================================================
// Enum Property Tests
// =============================================================================

fn filesystem_strategy() -> impl Strategy<Value = Filesystem> {
    prop_oneof![
        Just(Filesystem::Ext4),
        Just(Filesystem::Btrfs),
        Just(Filesystem::Xfs),
        Just(Filesystem::F2fs),
        Just(Filesystem::Fat32),
    ]
}

proptest! {
    /// Filesystem: to_string → parse round-trip is identity
    #[test]
    fn filesystem_roundtrip(fs in filesystem_strategy()) {
        let parsed: Filesystem = fs.to_string().parse().expect("Should parse");
        prop_assert_eq!(fs, parsed);
    }

    /// RaidLevel: only the five supported numbers convert
    #[test]
    fn raid_level_from_number(n in 0u8..=20) {
        let supported = matches!(n, 0 | 1 | 5 | 6 | 10);
        match RaidLevel::try_from(n) {
            Ok(level) => {
                prop_assert!(supported);
                prop_assert_eq!(level.number(), n);
            }
            Err(_) => prop_assert!(!supported),
        }
    }
}

// =============================================================================
// Size Policy Property Tests
// =============================================================================

proptest! {
    /// A swap file never makes the minimum root smaller
    #[test]
    fn min_root_with_swap_dominates(ram in 0u64..(1u64 << 40)) {
        let policy = PolicyConfig::defaults(FirmwareMode::Uefi);
        let sizes = SizePolicy::new(&policy);
        prop_assert!(sizes.minimum_root_size(true, ram) >= sizes.minimum_root_size(false, ram));
    }

    /// More RAM never lowers the minimum root
    #[test]
    fn min_root_monotonic_in_ram(a in 0u64..(1u64 << 40), b in 0u64..(1u64 << 40)) {
        let policy = PolicyConfig::defaults(FirmwareMode::Uefi);
        let sizes = SizePolicy::new(&policy);
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(sizes.minimum_root_size(true, lo) <= sizes.minimum_root_size(true, hi));
        prop_assert_eq!(sizes.minimum_root_size(false, lo), sizes.minimum_root_size(false, hi));
    }

    /// Percent bounds resolve to that share of the disk, sector-aligned
    #[test]
    fn percent_bound_resolves_to_share(pct in 0u8..=100, disk in (16 * GB)..(8_000 * GB)) {
        let resolved = resolve_bound(&format!("{}%", pct), disk).expect("valid percentage");
        let exact = disk as u128 * pct as u128 / 100;
        prop_assert_eq!(resolved % SECTOR_SIZE, 0);
        prop_assert!(resolved <= disk);
        prop_assert!((exact as i128 - resolved as i128).abs() <= SECTOR_SIZE as i128 + 1);
    }

    /// Absolute bounds never exceed the disk
    #[test]
    fn absolute_bound_clamped(bytes in any::<u64>(), disk in (16 * GB)..(8_000 * GB)) {
        let resolved = Bound::Bytes(bytes).resolve(disk);
        prop_assert!(resolved <= disk);
        prop_assert_eq!(resolved % SECTOR_SIZE, 0);
    }
}

// =============================================================================
// Alignment Property Tests
// =============================================================================

proptest! {
    #[test]
    fn align_up_is_smallest_multiple_above(value in 0u64..(u64::MAX - MIB)) {
        let up = align_up(value, MIB);
        prop_assert_eq!(up % MIB, 0);
        prop_assert!(up >= value);
        prop_assert!(up - value < MIB);
    }

    #[test]
    fn align_down_is_largest_multiple_below(value in any::<u64>()) {
        let down = align_down(value, SECTOR_SIZE);
        prop_assert_eq!(down % SECTOR_SIZE, 0);
        prop_assert!(down <= value);
        prop_assert!(value - down < SECTOR_SIZE);
    }
}

// =============================================================================
// Device Path Property Tests
// =============================================================================

fn disk_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "/dev/sd[a-z]{1,2}",
        "/dev/vd[a-z]",
        "/dev/nvme[0-9]n[1-9]",
        "/dev/mmcblk[0-9]",
    ]
}

proptest! {
    /// drive_of and partition_number undo partition_path
    #[test]
    fn partition_path_roundtrip(disk in disk_strategy(), number in 1u32..=128) {
        let disk = PathBuf::from(disk);
        let partition = partition_path(&disk, number);
        prop_assert_ne!(&partition, &disk);
        prop_assert_eq!(drive_of(&partition), disk);
        prop_assert_eq!(partition_number(&partition), Some(number));
    }

    /// Whole disks map to themselves and carry no partition number
    #[test]
    fn whole_disk_is_own_drive(disk in disk_strategy()) {
        let disk = PathBuf::from(disk);
        prop_assert_eq!(drive_of(&disk), disk.clone());
        prop_assert_eq!(partition_number(&disk), None);
    }
}

// =============================================================================
// Provisioning Property Tests
// =============================================================================

fn firmware_strategy() -> impl Strategy<Value = FirmwareMode> {
    prop_oneof![Just(FirmwareMode::Uefi), Just(FirmwareMode::Bios)]
}

fn home_strategy() -> impl Strategy<Value = HomePolicy> {
    prop_oneof![Just(HomePolicy::Absent), Just(HomePolicy::MakeNew)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Any fresh disk from 16 GB to 4 TB yields a valid layout
    #[test]
    fn fresh_disk_layout_holds_invariants(
        sectors in (16 * GB / SECTOR_SIZE)..=(4_000 * GB / SECTOR_SIZE),
        firmware in firmware_strategy(),
        home in home_strategy(),
        ram in (GB / 2)..=(64 * GB),
    ) {
        let disk_size = sectors * SECTOR_SIZE;
        let fake = FakeBackend::new().with_disk("/dev/sda", disk_size);
        let mut policy = PolicyConfig::defaults(firmware);
        policy.settle_delay = Duration::ZERO;
        let request = ProvisioningRequest::new("/dev/sda", firmware.is_uefi(), home.clone());

        let result = PartitionProvisioner::new(&fake, &policy, ram)
            .plan_and_provision(&request)
            .expect("fresh disk of supported size provisions"); // test: known-good input

        let roots = result
            .ops
            .iter()
            .filter(|op| matches!(op, StorageOp::CreatePartition { role: PartitionRole::Root, .. }))
            .count();
        prop_assert_eq!(roots, 1);
        prop_assert_eq!(result.efi.is_some(), firmware.is_uefi());
        if disk_size <= 32 * GB || home == HomePolicy::Absent {
            prop_assert_eq!(&result.home, &None);
        }

        let parts = fake.partitions("/dev/sda");
        prop_assert!(parts.iter().any(|(path, _, _)| *path == result.root));
        let usable_end = disk_size - GPT_BACKUP_SECTORS * SECTOR_SIZE;
        let mut previous_end = MIB;
        for (path, start, end) in &parts {
            prop_assert_eq!(start % MIB, 0, "{} start unaligned", path.display());
            prop_assert_eq!(end % SECTOR_SIZE, 0, "{} end unaligned", path.display());
            prop_assert!(*start >= previous_end, "{} overlaps its predecessor", path.display());
            prop_assert!(end > start);
            prop_assert!(*end <= usable_end, "{} runs into the backup GPT", path.display());
            previous_end = *end;
        }

        // Each table change is rescanned: mklabel plus one per create and flag
        let changes = result
            .ops
            .iter()
            .filter(|op| {
                matches!(
                    op,
                    StorageOp::ClobberDisk { .. }
                        | StorageOp::CreatePartition { .. }
                        | StorageOp::SetFlag { .. }
                        | StorageOp::DeletePartition { .. }
                )
            })
            .count();
        prop_assert_eq!(fake.reread_count(), changes);
    }
}
