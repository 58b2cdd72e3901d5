//! Typed argument modules for external storage tools.
//!
//! Each struct implements [`ToolArgs`](crate::tool_traits::ToolArgs) and maps
//! its fields to the exact flags of one program.

pub mod mdadm;
pub mod mkfs;
pub mod parted;
pub mod probe;
