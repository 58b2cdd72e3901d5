//! Concrete configuration steps.
//!
//! [`HostnameStep`] owns `etc/hostname` and `etc/hosts`; [`SwapFileStep`]
//! owns the swap file. Neither touches the other's files, so they can run in
//! the same [`run_concurrent`](super::run_concurrent) call.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::ConfigStep;
use crate::engine::size::MIB;
use crate::fstab::SWAP_FILE_PATH;
use crate::tool_runner::run_tool;
use crate::tools::probe::MkswapArgs;

/// Writes the machine's hostname.
pub struct HostnameStep {
    hostname: String,
}

impl HostnameStep {
    /// Hostnames are 1-63 characters of letters, digits and `-`, not starting
    /// or ending with `-`.
    pub fn new(hostname: impl Into<String>) -> Result<Self> {
        let hostname = hostname.into();
        let valid_chars = hostname.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if hostname.is_empty()
            || hostname.len() > 63
            || !valid_chars
            || hostname.starts_with('-')
            || hostname.ends_with('-')
        {
            anyhow::bail!("Invalid hostname {:?}", hostname);
        }
        Ok(Self { hostname })
    }
}

impl ConfigStep for HostnameStep {
    fn name(&self) -> &str {
        "hostname"
    }

    fn run(&self, target: &Path) -> Result<()> {
        let etc = target.join("etc");
        fs::create_dir_all(&etc).with_context(|| format!("Failed to create {:?}", etc))?;

        let hostname = etc.join("hostname");
        fs::write(&hostname, format!("{}\n", self.hostname))
            .with_context(|| format!("Failed to write {:?}", hostname))?;

        let hosts = etc.join("hosts");
        let content = format!(
            "127.0.0.1\tlocalhost\n::1\tlocalhost\n127.0.1.1\t{}\n",
            self.hostname
        );
        fs::write(&hosts, content).with_context(|| format!("Failed to write {:?}", hosts))?;
        Ok(())
    }
}

/// Creates the swap file inside ROOT.
pub struct SwapFileStep {
    size: u64,
    run_mkswap: bool,
}

impl SwapFileStep {
    /// Swap file of exactly `size` bytes.
    pub fn new(size: u64) -> Self {
        Self {
            size,
            run_mkswap: true,
        }
    }

    /// Skip `mkswap` (the file is still zero-filled and mode 0600).
    pub fn without_mkswap(mut self) -> Self {
        self.run_mkswap = false;
        self
    }

    pub fn path_in(target: &Path) -> PathBuf {
        target.join(SWAP_FILE_PATH.trim_start_matches('/'))
    }

    fn write_zeros(&self, file: &mut File) -> Result<()> {
        let chunk = vec![0u8; MIB as usize];
        let mut remaining = self.size;
        while remaining > 0 {
            let n = remaining.min(MIB);
            file.write_all(&chunk[..n as usize])?;
            remaining -= n;
        }
        file.sync_all()?;
        Ok(())
    }
}

impl ConfigStep for SwapFileStep {
    fn name(&self) -> &str {
        "swap file"
    }

    fn run(&self, target: &Path) -> Result<()> {
        let path = Self::path_in(target);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)
            .with_context(|| format!("Failed to create {:?}", path))?;
        self.write_zeros(&mut file)
            .with_context(|| format!("Failed to fill {:?}", path))?;
        // mode() only applies on creation
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to chmod {:?}", path))?;

        if self.run_mkswap {
            run_tool(&MkswapArgs { path: path.clone() })?.ensure_success("mkswap")?;
        }
        tracing::info!("Swap file {} ready ({} bytes)", path.display(), self.size);
        Ok(())
    }
}
