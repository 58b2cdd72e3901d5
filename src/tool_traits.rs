//! Type-safe argument contracts for external storage tools.
//!
//! Each tool invocation is a struct implementing [`ToolArgs`]. The struct
//! definition is the contract: flag spelling lives in one `to_cli_args`
//! implementation and is covered by unit tests, never assembled ad hoc at
//! call sites.

use std::path::Path;

/// Trait for typed tool arguments.
///
/// # Contract
///
/// - `program()`: executable name, resolved through `PATH`.
/// - `to_cli_args()`: arguments exactly as the tool expects them.
/// - `is_destructive()`: whether running the tool modifies a disk.
/// - `target()`: the device or file the invocation operates on, if any.
pub trait ToolArgs {
    /// Executable name (e.g. `"parted"`).
    fn program(&self) -> &'static str;

    /// Convert struct fields to CLI arguments.
    fn to_cli_args(&self) -> Vec<String>;

    /// Whether the invocation writes to a block device.
    fn is_destructive(&self) -> bool {
        false
    }

    /// Device or file the tool works on. Reported when a run is interrupted.
    fn target(&self) -> Option<&Path> {
        None
    }

    /// Rendered command line for logs and error messages.
    fn command_line(&self) -> String {
        let mut line = self.program().to_string();
        for arg in self.to_cli_args() {
            line.push(' ');
            line.push_str(&arg);
        }
        line
    }
}
