//! Read-only probing tools: `lsblk`, `blkid`, `partprobe`, and `mkswap`.

use std::path::{Path, PathBuf};

use crate::tool_traits::ToolArgs;

/// `lsblk --json --paths --bytes --output NAME,SIZE,TYPE,FSTYPE,START`
#[derive(Debug, Clone, Default)]
pub struct LsblkArgs;

impl ToolArgs for LsblkArgs {
    fn program(&self) -> &'static str {
        "lsblk"
    }

    fn to_cli_args(&self) -> Vec<String> {
        ["--json", "--paths", "--bytes", "--output", "NAME,SIZE,TYPE,FSTYPE,START"]
            .into_iter()
            .map(String::from)
            .collect()
    }
}

/// `blkid -o export <device>`
#[derive(Debug, Clone)]
pub struct BlkidArgs {
    pub device: PathBuf,
}

impl ToolArgs for BlkidArgs {
    fn program(&self) -> &'static str {
        "blkid"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            "export".to_string(),
            self.device.display().to_string(),
        ]
    }

    fn target(&self) -> Option<&Path> {
        Some(&self.device)
    }
}

/// `partprobe <disk>`: ask the kernel to re-read a partition table
#[derive(Debug, Clone)]
pub struct PartprobeArgs {
    pub disk: PathBuf,
}

impl ToolArgs for PartprobeArgs {
    fn program(&self) -> &'static str {
        "partprobe"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![self.disk.display().to_string()]
    }

    fn target(&self) -> Option<&Path> {
        Some(&self.disk)
    }
}

/// `mkswap <path>`
#[derive(Debug, Clone)]
pub struct MkswapArgs {
    pub path: PathBuf,
}

impl ToolArgs for MkswapArgs {
    fn program(&self) -> &'static str {
        "mkswap"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![self.path.display().to_string()]
    }

    fn target(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn is_destructive(&self) -> bool {
        true
    }
}
