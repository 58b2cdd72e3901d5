//! Type-safe arguments for `parted`.
//!
//! All invocations run with `--script` so parted never prompts, and all
//! offsets are passed in bytes (`unit B`) so no rounding happens on the
//! parted side. Parted byte ends are inclusive; [`PartedCommand::MkPart`]
//! takes an exclusive end and converts.

use std::path::{Path, PathBuf};

use crate::tool_traits::ToolArgs;
use crate::types::{Filesystem, PartitionFlag};

/// One parted subcommand.
#[derive(Debug, Clone, PartialEq)]
pub enum PartedCommand {
    /// `mklabel gpt`, destroys the existing partition table
    MkLabelGpt,
    /// `mkpart` over the byte range `[start, end)`
    MkPart {
        fs: Filesystem,
        start: u64,
        end: u64,
    },
    /// `set N flag on`
    Set { number: u32, flag: PartitionFlag },
    /// `rm N`
    Rm { number: u32 },
    /// `print free` with JSON output
    PrintFree,
    /// `print` with JSON output
    Print,
}

/// Type-safe arguments for one `parted` run against `device`.
///
/// | Command      | CLI                                                      |
/// |--------------|----------------------------------------------------------|
/// | `MkLabelGpt` | `--script <dev> mklabel gpt`                             |
/// | `MkPart`     | `--script <dev> unit B mkpart primary <fs> <s>B <e-1>B`  |
/// | `Set`        | `--script <dev> set <n> <flag> on`                       |
/// | `Rm`         | `--script <dev> rm <n>`                                  |
/// | `PrintFree`  | `--script --json <dev> unit B print free`                |
#[derive(Debug, Clone)]
pub struct PartedArgs {
    pub device: PathBuf,
    pub command: PartedCommand,
}

impl PartedArgs {
    pub fn new(device: impl Into<PathBuf>, command: PartedCommand) -> Self {
        Self {
            device: device.into(),
            command,
        }
    }
}

impl ToolArgs for PartedArgs {
    fn program(&self) -> &'static str {
        "parted"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let device = self.device.display().to_string();
        let mut args = vec!["--script".to_string()];

        match &self.command {
            PartedCommand::MkLabelGpt => {
                args.extend([device, "mklabel".into(), "gpt".into()]);
            }
            PartedCommand::MkPart { fs, start, end } => {
                args.extend([
                    device,
                    "unit".into(),
                    "B".into(),
                    "mkpart".into(),
                    "primary".into(),
                    fs.parted_name().into(),
                    format!("{}B", start),
                    format!("{}B", end.saturating_sub(1)),
                ]);
            }
            PartedCommand::Set { number, flag } => {
                args.extend([
                    device,
                    "set".into(),
                    number.to_string(),
                    flag.as_str().into(),
                    "on".into(),
                ]);
            }
            PartedCommand::Rm { number } => {
                args.extend([device, "rm".into(), number.to_string()]);
            }
            PartedCommand::PrintFree => {
                args.extend([
                    "--json".into(),
                    device,
                    "unit".into(),
                    "B".into(),
                    "print".into(),
                    "free".into(),
                ]);
            }
            PartedCommand::Print => {
                args.extend([
                    "--json".into(),
                    device,
                    "unit".into(),
                    "B".into(),
                    "print".into(),
                ]);
            }
        }

        args
    }

    fn is_destructive(&self) -> bool {
        !matches!(self.command, PartedCommand::PrintFree | PartedCommand::Print)
    }

    fn target(&self) -> Option<&Path> {
        Some(&self.device)
    }
}
