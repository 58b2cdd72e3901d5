//! fstab generation for a provisioned layout.
//!
//! Entries reference devices by `UUID=` when `blkid` reports one and fall
//! back to the raw device path otherwise, so an unformatted or unreadable
//! device still gets a usable line.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::backend::DeviceBackend;
use crate::config::PolicyConfig;
use crate::engine::request::SwapPolicy;
use crate::engine::storage::ProvisioningResult;
use crate::types::{Filesystem, PartitionRole};

/// Path of the swap file inside the installed system.
pub const SWAP_FILE_PATH: &str = "/.swapfile";

/// One line of `/etc/fstab`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    pub device: String,
    pub mount_point: String,
    pub file_system_type: String,
    pub options: String,
    pub dump: u8,
    pub pass: u8,
}

impl fmt::Display for FstabEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{} {}",
            self.device,
            self.mount_point,
            self.file_system_type,
            self.options,
            self.dump,
            self.pass
        )
    }
}

fn mount_options(fs_type: &str) -> &'static str {
    match fs_type {
        "btrfs" => "defaults,noatime,compress=zstd",
        "vfat" => "umask=0077",
        "ext4" | "xfs" | "f2fs" => "defaults,noatime",
        _ => "defaults",
    }
}

/// fsck order: ROOT first, others after, none for filesystems without fsck.
fn pass_for(role: PartitionRole, fs_type: &str) -> u8 {
    match (fs_type, role) {
        ("btrfs" | "xfs", _) => 0,
        (_, PartitionRole::Root) => 1,
        _ => 2,
    }
}

/// `UUID=...` for `device`, or the device path when no UUID is known.
fn device_spec(backend: &dyn DeviceBackend, device: &Path) -> (String, Option<String>) {
    match backend.block_ids(device) {
        Ok(ids) => {
            let spec = ids
                .uuid
                .map_or_else(|| device.display().to_string(), |u| format!("UUID={}", u));
            (spec, ids.fstype)
        }
        Err(e) => {
            tracing::warn!("blkid failed for {}: {}", device.display(), e);
            (device.display().to_string(), None)
        }
    }
}

/// Entries for every path in `result`, ROOT first, then EFI, HOME and swap.
pub fn entries_for(
    result: &ProvisioningResult,
    backend: &dyn DeviceBackend,
    policy: &PolicyConfig,
    swap: &SwapPolicy,
) -> Vec<FstabEntry> {
    let mounts: Vec<(PartitionRole, PathBuf)> =
        [PartitionRole::Root, PartitionRole::Efi, PartitionRole::Home]
            .into_iter()
            .filter_map(|role| result.path_for(role).map(|p| (role, p.to_path_buf())))
            .collect();
    entries_for_mounts(&mounts, backend, policy, swap)
}

/// Entries for explicit `(role, device)` pairs, in the given order, plus swap.
pub fn entries_for_mounts(
    mounts: &[(PartitionRole, PathBuf)],
    backend: &dyn DeviceBackend,
    policy: &PolicyConfig,
    swap: &SwapPolicy,
) -> Vec<FstabEntry> {
    let mut entries = Vec::new();

    for (role, device) in mounts {
        let role = *role;
        let (spec, probed) = device_spec(backend, device);
        let fs_type = probed.unwrap_or_else(|| {
            let fs = match role {
                PartitionRole::Efi => Filesystem::Fat32,
                PartitionRole::Root => policy.root_filesystem,
                PartitionRole::Home => policy.home_filesystem,
            };
            fs.kernel_name().to_string()
        });
        entries.push(FstabEntry {
            device: spec,
            mount_point: role.mountpoint().to_string(),
            options: mount_options(&fs_type).to_string(),
            pass: pass_for(role, &fs_type),
            file_system_type: fs_type,
            dump: 0,
        });
    }

    let swap_device = match swap {
        SwapPolicy::File => SWAP_FILE_PATH.to_string(),
        SwapPolicy::Partition(path) => device_spec(backend, path).0,
    };
    entries.push(FstabEntry {
        device: swap_device,
        mount_point: "none".to_string(),
        file_system_type: "swap".to_string(),
        options: "defaults".to_string(),
        dump: 0,
        pass: 0,
    });

    entries
}

pub fn render(entries: &[FstabEntry]) -> String {
    let mut out = String::from("# /etc/fstab: static file system information.\n");
    for entry in entries {
        out.push_str(&entry.to_string());
        out.push('\n');
    }
    out
}

/// Write `etc/fstab` below `root_dir` (the mounted target). Returns the path
/// written.
pub fn write_fstab(root_dir: &Path, entries: &[FstabEntry]) -> anyhow::Result<PathBuf> {
    let etc = root_dir.join("etc");
    fs::create_dir_all(&etc).with_context(|| format!("Failed to create {:?}", etc))?;
    let path = etc.join("fstab");
    fs::write(&path, render(entries)).with_context(|| format!("Failed to write {:?}", path))?;
    tracing::info!("Wrote {} fstab entries to {}", entries.len(), path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FakeBackend;
    use crate::engine::size::{GB, MIB};
    use crate::engine::storage::Scenario;
    use crate::hardware::FirmwareMode;

    fn layout() -> (FakeBackend, ProvisioningResult) {
        let fake = FakeBackend::new()
            .with_disk("/dev/sda", 64 * GB)
            .with_partition("/dev/sda", MIB, 201 * MIB, None)
            .with_partition("/dev/sda", 201 * MIB, 40 * GB, None);
        fake.format(Path::new("/dev/sda1"), Filesystem::Fat32, "EFI")
            .expect("format"); // test: known-good input
        fake.format(Path::new("/dev/sda2"), Filesystem::Btrfs, "ROOT")
            .expect("format"); // test: known-good input
        let result = ProvisioningResult {
            root: PathBuf::from("/dev/sda2"),
            efi: Some(PathBuf::from("/dev/sda1")),
            home: None,
            scenario: Scenario::FreshDisk,
            ops: Vec::new(),
        };
        (fake, result)
    }

    #[test]
    fn test_entries_use_uuid_and_role_options() {
        let (fake, result) = layout();
        let policy = PolicyConfig::defaults(FirmwareMode::Uefi);
        let entries = entries_for(&result, &fake, &policy, &SwapPolicy::File);

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].device, "UUID=fake-uuid-sda2");
        assert_eq!(entries[0].mount_point, "/");
        assert_eq!(entries[0].options, "defaults,noatime,compress=zstd");
        assert_eq!(entries[1].mount_point, "/boot/efi");
        assert_eq!(entries[1].file_system_type, "vfat");
        assert_eq!(entries[1].options, "umask=0077");
        assert_eq!(entries[1].pass, 2);
    }

    #[test]
    fn test_swap_file_line() {
        let (fake, result) = layout();
        let policy = PolicyConfig::defaults(FirmwareMode::Uefi);
        let text = render(&entries_for(&result, &fake, &policy, &SwapPolicy::File));
        assert!(text.ends_with("/.swapfile\tnone\tswap\tdefaults\t0 0\n"));
    }

    #[test]
    fn test_missing_uuid_falls_back_to_path() {
        let (fake, mut result) = layout();
        result.home = Some(PathBuf::from("/dev/sdz9"));
        let policy = PolicyConfig::defaults(FirmwareMode::Uefi);
        let entries = entries_for(&result, &fake, &policy, &SwapPolicy::File);
        let home = entries
            .iter()
            .find(|e| e.mount_point == "/home")
            .expect("home entry"); // test: known-good input
        assert_eq!(home.device, "/dev/sdz9");
        assert_eq!(home.file_system_type, "btrfs");
    }

    #[test]
    fn test_write_fstab_creates_etc() {
        let dir = tempfile::tempdir().expect("tempdir"); // test: known-good input
        let (fake, result) = layout();
        let policy = PolicyConfig::defaults(FirmwareMode::Uefi);
        let entries = entries_for(&result, &fake, &policy, &SwapPolicy::File);
        let path = write_fstab(dir.path(), &entries).expect("write"); // test: known-good input
        let text = fs::read_to_string(path).expect("read"); // test: known-good input
        assert!(text.contains("UUID=fake-uuid-sda2\t/\tbtrfs"));
    }
}
