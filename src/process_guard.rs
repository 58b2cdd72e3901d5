//! Child process bookkeeping for external storage tools
//!
//! Every tool started by [`run_tool`](crate::tool_runner::run_tool) leads its
//! own process group and is recorded as a [`ToolJob`]: PID, command line, the
//! device it works on, and whether it writes to that device. When the
//! installer is interrupted the signal handler stops every running job and
//! names the disks whose partition table or filesystem may be half written.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::tool_traits::ToolArgs;

/// How long stopped tools get between SIGTERM and SIGKILL.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// A running external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolJob {
    pub pid: u32,
    pub command: String,
    pub target: Option<PathBuf>,
    pub destructive: bool,
}

impl ToolJob {
    pub fn new<T: ToolArgs + ?Sized>(pid: u32, args: &T) -> Self {
        Self {
            pid,
            command: args.command_line(),
            target: args.target().map(PathBuf::from),
            destructive: args.is_destructive(),
        }
    }

    /// Command line and target, for interruption reports.
    pub fn describe(&self) -> String {
        match &self.target {
            Some(target) => format!("{} on {}", self.command, target.display()),
            None => self.command.clone(),
        }
    }
}

/// Jobs currently running, keyed by PID (which is also the group id).
#[derive(Debug, Default)]
pub struct ChildRegistry {
    jobs: BTreeMap<u32, ToolJob>,
    stopping: bool,
}

static REGISTRY: OnceLock<Mutex<ChildRegistry>> = OnceLock::new();

impl ChildRegistry {
    pub fn global() -> &'static Mutex<ChildRegistry> {
        REGISTRY.get_or_init(|| Mutex::new(ChildRegistry::default()))
    }

    pub fn register(&mut self, job: ToolJob) {
        tracing::debug!("Tracking PID {}: {}", job.pid, job.command);
        self.jobs.insert(job.pid, job);
    }

    pub fn unregister(&mut self, pid: u32) -> Option<ToolJob> {
        self.jobs.remove(&pid)
    }

    /// Disks or files that a running destructive job is writing to.
    pub fn targets_in_flight(&self) -> Vec<PathBuf> {
        self.jobs
            .values()
            .filter(|job| job.destructive)
            .filter_map(|job| job.target.clone())
            .collect()
    }

    /// Stop every running job: SIGTERM to each group, SIGKILL to whatever
    /// survives `grace`. Returns the jobs that were stopped. Only the first
    /// call does anything.
    pub fn stop_all(&mut self, grace: Duration) -> Vec<ToolJob> {
        if self.stopping {
            return Vec::new();
        }
        self.stopping = true;

        let jobs: Vec<ToolJob> = std::mem::take(&mut self.jobs).into_values().collect();
        for job in &jobs {
            if job.destructive {
                tracing::error!(
                    "Interrupted {}; the device may be left inconsistent",
                    job.describe()
                );
            } else {
                tracing::warn!("Interrupted {}", job.describe());
            }
            signal_group(job.pid, Signal::SIGTERM);
        }

        let deadline = Instant::now() + grace;
        while jobs.iter().any(|job| group_alive(job.pid)) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }
        for job in jobs.iter().filter(|job| group_alive(job.pid)) {
            tracing::warn!("{} ignored SIGTERM, killing", job.command);
            signal_group(job.pid, Signal::SIGKILL);
        }

        jobs
    }
}

fn signal_group(pgid: u32, signal: Signal) {
    // Negative PID addresses the whole group
    if let Err(e) = signal::kill(Pid::from_raw(-(pgid as i32)), signal) {
        tracing::debug!("{} to group {} failed: {}", signal, pgid, e);
    }
}

fn group_alive(pgid: u32) -> bool {
    signal::kill(Pid::from_raw(-(pgid as i32)), None).is_ok()
}

/// Stop running tools on SIGINT, SIGTERM or SIGHUP, then exit with
/// `128 + signal`. Call once at program start.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            tracing::warn!("Received signal {}, stopping storage tools", sig);
            if let Ok(mut registry) = ChildRegistry::global().lock() {
                let stopped = registry.stop_all(STOP_GRACE_PERIOD);
                let dirty: Vec<String> = stopped
                    .iter()
                    .filter(|job| job.destructive)
                    .filter_map(|job| job.target.as_ref().map(|t| t.display().to_string()))
                    .collect();
                if !dirty.is_empty() {
                    tracing::error!("Check before retrying: {}", dirty.join(", "));
                }
            }
            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait for `std::process::Command` to isolate tool processes
pub trait CommandProcessGroup {
    /// Run the command as leader of a new process group that receives
    /// SIGTERM when the installer dies.
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: only async-signal-safe calls run between fork and exec
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}
