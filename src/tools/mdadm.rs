//! Type-safe arguments for `mdadm --create`.

use std::path::{Path, PathBuf};

use crate::tool_traits::ToolArgs;
use crate::types::RaidLevel;

/// Arguments for building a software RAID array.
///
/// `--run` suppresses the interactive confirmation mdadm asks for when a
/// member already carries a filesystem. `--force` is only passed on the
/// retry after a failed first attempt.
#[derive(Debug, Clone)]
pub struct MdadmCreateArgs {
    pub array: PathBuf,
    pub level: RaidLevel,
    pub members: Vec<PathBuf>,
    pub force: bool,
}

impl ToolArgs for MdadmCreateArgs {
    fn program(&self) -> &'static str {
        "mdadm"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "--create".to_string(),
            self.array.display().to_string(),
            "--run".to_string(),
            format!("--level={}", self.level.number()),
            format!("--raid-devices={}", self.members.len()),
        ];
        if self.force {
            args.push("--force".to_string());
        }
        args.extend(self.members.iter().map(|m| m.display().to_string()));
        args
    }

    fn target(&self) -> Option<&Path> {
        Some(&self.array)
    }

    fn is_destructive(&self) -> bool {
        true
    }
}
