//! sysinstall library
//!
//! Automatic partition provisioning for an OS installer: probe the block
//! devices, decide a layout for EFI/ROOT/HOME, materialize it through a
//! [`DeviceBackend`], and hand the resulting paths to the rest of the install.

pub mod backend;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod fstab;
pub mod hardware;
pub mod pipeline;
pub mod process_guard;
pub mod settings;
pub mod tool_runner;
pub mod tool_traits;
pub mod tools;
pub mod types;

// Re-export main types for convenience
pub use backend::{BlockIds, DeviceBackend, FakeBackend, SystemBackend};
pub use config::{ConfigError, PolicyConfig, PolicyFile, PolicyOverrides};
pub use error::{ProvisionError, Result};
pub use hardware::{FirmwareMode, HostInfo};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ToolJob};
pub use settings::{InstallSettings, RaidDescriptor};
pub use tool_runner::{ToolOutput, run_tool};
pub use tool_traits::ToolArgs;
pub use types::{Filesystem, PartitionFlag, PartitionRole, RaidLevel};

// Provisioning engine
pub use engine::inventory::{BlockDeviceInventory, Disk, Partition, Snapshot};
pub use engine::provision::{PartitionProvisioner, resolve_scenario};
pub use engine::raid::{RaidAssembler, RaidError, RaidSpec};
pub use engine::request::{HomePolicy, ProvisioningRequest, SwapPolicy};
pub use engine::size::{SizePolicy, resolve_bound};
pub use engine::storage::{ProvisioningResult, Scenario, StorageOp};

// Post-partition pipeline
pub use pipeline::{InstallStage, Progress, ProgressEvent, StageTracker, TransitionError};
