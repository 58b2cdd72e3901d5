//! Type-safe arguments for filesystem creation tools.
//!
//! Every variant forces creation over existing signatures, since a freshly
//! created partition may still carry a stale superblock.

use std::path::{Path, PathBuf};

use crate::tool_traits::ToolArgs;
use crate::types::Filesystem;

/// Arguments for `mkfs.<fs>` on one device.
///
/// | Filesystem | Program      | Force     | Label        |
/// |------------|--------------|-----------|--------------|
/// | btrfs      | `mkfs.btrfs` | `-f`      | `-L <label>` |
/// | ext4       | `mkfs.ext4`  | `-F`      | `-L <label>` |
/// | xfs        | `mkfs.xfs`   | `-f`      | `-L <label>` |
/// | f2fs       | `mkfs.f2fs`  | `-f`      | `-l <label>` |
/// | fat32      | `mkfs.fat`   | `-F 32`   | `-n <label>` |
#[derive(Debug, Clone)]
pub struct MkfsArgs {
    pub device: PathBuf,
    pub filesystem: Filesystem,
    pub label: Option<String>,
}

impl ToolArgs for MkfsArgs {
    fn program(&self) -> &'static str {
        match self.filesystem {
            Filesystem::Btrfs => "mkfs.btrfs",
            Filesystem::Ext4 => "mkfs.ext4",
            Filesystem::Xfs => "mkfs.xfs",
            Filesystem::F2fs => "mkfs.f2fs",
            Filesystem::Fat32 => "mkfs.fat",
        }
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args: Vec<String> = match self.filesystem {
            Filesystem::Ext4 => vec!["-F".into()],
            Filesystem::Fat32 => vec!["-F".into(), "32".into()],
            Filesystem::Btrfs | Filesystem::Xfs | Filesystem::F2fs => vec!["-f".into()],
        };

        if let Some(label) = &self.label {
            let flag = match self.filesystem {
                Filesystem::Fat32 => "-n",
                Filesystem::F2fs => "-l",
                _ => "-L",
            };
            args.push(flag.into());
            args.push(label.clone());
        }

        args.push(self.device.display().to_string());
        args
    }

    fn target(&self) -> Option<&Path> {
        Some(&self.device)
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mkfs(fs: Filesystem, label: Option<&str>) -> MkfsArgs {
        MkfsArgs {
            device: PathBuf::from("/dev/sda2"),
            filesystem: fs,
            label: label.map(String::from),
        }
    }

    #[test]
    fn test_btrfs_forces_and_labels() {
        let args = mkfs(Filesystem::Btrfs, Some("ROOT"));
        assert_eq!(args.program(), "mkfs.btrfs");
        assert_eq!(args.to_cli_args(), vec!["-f", "-L", "ROOT", "/dev/sda2"]);
    }

    #[test]
    fn test_fat32_uses_dash_capital_f_32() {
        let args = mkfs(Filesystem::Fat32, Some("EFI"));
        assert_eq!(args.program(), "mkfs.fat");
        assert_eq!(args.to_cli_args(), vec!["-F", "32", "-n", "EFI", "/dev/sda2"]);
    }

    #[test]
    fn test_target_is_the_formatted_device() {
        let args = mkfs(Filesystem::Xfs, None);
        assert!(args.is_destructive());
        assert_eq!(args.target(), Some(Path::new("/dev/sda2")));
    }

    #[test]
    fn test_ext4_force_flag_is_capital() {
        let args = mkfs(Filesystem::Ext4, None);
        assert_eq!(args.to_cli_args(), vec!["-F", "/dev/sda2"]);
    }

    #[test]
    fn test_f2fs_label_flag() {
        let args = mkfs(Filesystem::F2fs, Some("HOME"));
        assert_eq!(args.to_cli_args(), vec!["-f", "-l", "HOME", "/dev/sda2"]);
    }
}
