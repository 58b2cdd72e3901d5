//! Error handling for the provisioning engine
//!
//! Library code returns [`ProvisionError`]. The binary and the settings file
//! helpers wrap it in `anyhow` with context strings.
//!
//! # Fatality
//!
//! Everything except [`ProvisionError::RaidValidation`] and
//! [`ProvisionError::RaidCreation`] aborts provisioning. RAID validation is
//! reported back to the caller before any disk is touched; RAID creation
//! failures are absorbed by the assembler's retry and fall back to "no home".

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::engine::raid::RaidError;

/// Main error type for the provisioning engine
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Block-device inventory could not be read or parsed
    #[error("Probe error: {0}")]
    Probe(String),

    /// No free region or disk space satisfies the requested role
    #[error("Not enough space: {0}")]
    Allocation(String),

    /// RAID spec rejected before touching any disk
    #[error("Invalid RAID configuration: {0}")]
    RaidValidation(#[from] RaidError),

    /// Array assembly failed (absorbed by the assembler retry)
    #[error("RAID creation failed: {0}")]
    RaidCreation(String),

    /// Filesystem creation failed on a newly created device
    #[error("Failed to create filesystem on {}: {reason}", device.display())]
    Format { device: PathBuf, reason: String },

    /// Request does not describe an installable layout
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Policy configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// External tool exited non-zero or could not be spawned
    #[error("Backend error: {0}")]
    Backend(String),

    /// IO errors (sysfs, procfs, target filesystem)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

// Convenient error constructors
impl ProvisionError {
    /// Create a probe error
    pub fn probe(msg: impl Into<String>) -> Self {
        Self::Probe(msg.into())
    }

    /// Create an allocation error
    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::Allocation(msg.into())
    }

    /// Create a RAID creation error
    pub fn raid_creation(msg: impl Into<String>) -> Self {
        Self::RaidCreation(msg.into())
    }

    /// Create a format error for `device`
    pub fn format(device: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Format {
            device: device.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Whether the error aborts the installation.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::RaidValidation(_) | Self::RaidCreation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProvisionError::allocation("ROOT needs 33828000000 bytes");
        assert_eq!(
            err.to_string(),
            "Not enough space: ROOT needs 33828000000 bytes"
        );

        let err = ProvisionError::format("/dev/sda2", "mkfs.btrfs exited with 1");
        assert_eq!(
            err.to_string(),
            "Failed to create filesystem on /dev/sda2: mkfs.btrfs exited with 1"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ProvisionError = io_err.into();
        assert!(matches!(err, ProvisionError::Io(_)));
    }

    #[test]
    fn test_raid_errors_are_not_fatal() {
        let err = ProvisionError::from(RaidError::TooFewDisks {
            level: crate::types::RaidLevel::Raid10,
            required: 4,
            given: 3,
        });
        assert!(!err.is_fatal());
        assert!(!ProvisionError::raid_creation("mdadm exited 1").is_fatal());
        assert!(ProvisionError::probe("lsblk missing").is_fatal());
    }
}
