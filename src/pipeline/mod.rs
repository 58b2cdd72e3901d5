//! Post-partition install pipeline.
//!
//! After partitioning, independent configuration steps run concurrently in a
//! `std::thread::scope`. Every step is joined before [`run_concurrent`]
//! returns; a failing step is reported and does not stop the others.
//!
//! # Design
//!
//! - **Structured**: No step outlives the call that started it
//! - **Disjoint resources**: Steps must not write the same files (see [`ConfigStep`])
//! - **Monotonic progress**: Completions raise a shared [`Progress`]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub mod progress;
pub mod stage;
pub mod steps;

pub use progress::{Progress, ProgressEvent};
pub use stage::{InstallStage, StageTracker, TransitionError};
pub use steps::{HostnameStep, SwapFileStep};

/// One independent configuration step run against the mounted target.
///
/// Steps passed to the same [`run_concurrent`] call run at the same time and
/// must touch disjoint files and devices.
pub trait ConfigStep: Send + Sync {
    fn name(&self) -> &str;

    /// Apply the step below `target` (the mounted ROOT).
    fn run(&self, target: &Path) -> anyhow::Result<()>;
}

/// Outcome of one step.
#[derive(Debug)]
pub struct StepReport {
    pub name: String,
    pub outcome: Result<(), String>,
    pub elapsed: Duration,
}

impl StepReport {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Run `steps` concurrently and join them all. Each completion moves
/// `progress` proportionally through `from..=to`. Reports come back in the
/// order of `steps`.
pub fn run_concurrent(
    steps: &[Box<dyn ConfigStep>],
    target: &Path,
    progress: &Progress,
    from: u8,
    to: u8,
) -> Vec<StepReport> {
    let total = steps.len().max(1);
    let done = AtomicUsize::new(0);
    let span = usize::from(to.saturating_sub(from));

    std::thread::scope(|scope| {
        let handles: Vec<_> = steps
            .iter()
            .map(|step| {
                let done = &done;
                scope.spawn(move || {
                    let started = Instant::now();
                    tracing::info!("Starting step: {}", step.name());
                    let outcome = step.run(target).map_err(|e| format!("{:#}", e));
                    let elapsed = started.elapsed();

                    match &outcome {
                        Ok(()) => tracing::info!("Step {} finished in {:?}", step.name(), elapsed),
                        Err(e) => tracing::error!("Step {} failed: {}", step.name(), e),
                    }

                    let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                    let percent = usize::from(from) + span * finished / total;
                    progress.report(
                        u8::try_from(percent).unwrap_or(100),
                        format!("{} {}", step.name(), if outcome.is_ok() { "done" } else { "failed" }),
                    );

                    StepReport {
                        name: step.name().to_string(),
                        outcome,
                        elapsed,
                    }
                })
            })
            .collect();

        handles
            .into_iter()
            .zip(steps)
            .map(|(handle, step)| {
                handle.join().unwrap_or_else(|_| StepReport {
                    name: step.name().to_string(),
                    outcome: Err("step panicked".to_string()),
                    elapsed: Duration::ZERO,
                })
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct WriteFile(&'static str);

    impl ConfigStep for WriteFile {
        fn name(&self) -> &str {
            self.0
        }

        fn run(&self, target: &Path) -> anyhow::Result<()> {
            fs::write(target.join(self.0), self.0)?;
            Ok(())
        }
    }

    struct Failing;

    impl ConfigStep for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn run(&self, _target: &Path) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    #[test]
    fn test_all_steps_run_and_progress_reaches_end() {
        let dir = tempfile::tempdir().expect("tempdir"); // test: known-good input
        let steps: Vec<Box<dyn ConfigStep>> =
            vec![Box::new(WriteFile("a")), Box::new(WriteFile("b")), Box::new(WriteFile("c"))];
        let progress = Progress::new();

        let reports = run_concurrent(&steps, dir.path(), &progress, 39, 89);

        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(StepReport::is_ok));
        assert_eq!(progress.percent(), 89);
        for name in ["a", "b", "c"] {
            assert!(dir.path().join(name).exists());
        }
    }

    #[test]
    fn test_failure_does_not_stop_siblings() {
        let dir = tempfile::tempdir().expect("tempdir"); // test: known-good input
        let steps: Vec<Box<dyn ConfigStep>> = vec![Box::new(Failing), Box::new(WriteFile("ok"))];
        let progress = Progress::new();

        let reports = run_concurrent(&steps, dir.path(), &progress, 0, 10);

        assert_eq!(reports[0].name, "failing");
        assert_eq!(reports[0].outcome, Err("boom".to_string()));
        assert!(reports[1].is_ok());
        assert!(dir.path().join("ok").exists());
        assert_eq!(progress.percent(), 10);
    }
}
