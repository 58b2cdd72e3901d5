//! Install stage tracker
//!
//! Owns the coarse position of the install pipeline and enforces that it only
//! moves forward, one stage at a time.
//!
//! # Design Principles
//!
//! - **Validated Transitions**: Only the immediate next stage is reachable
//! - **No Global State**: The tracker is owned by the caller
//! - **Fail From Anywhere**: Any non-terminal stage can move to `Failed`
//!
//! # Stage Flow
//!
//! ```text
//! NotStarted → Partitioning → Mounting → ExtractingRoot → GeneratingFstab
//!            → Configuring → Bootloader → Finalizing → Completed
//!
//! (Any stage can transition to Failed)
//! ```

use std::fmt;
use std::time::Instant;

use thiserror::Error;

/// Pipeline stages in sequential order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InstallStage {
    NotStarted = 0,

    /// Partitioning and formatting. Destructive; requires confirmation
    Partitioning = 1,

    Mounting = 2,

    /// Unpacking the root filesystem image onto the target
    ExtractingRoot = 3,

    GeneratingFstab = 4,

    /// Post-partition configuration steps (hostname, swap file, ...)
    Configuring = 5,

    Bootloader = 6,

    Finalizing = 7,

    Completed = 8,

    Failed = 255,
}

impl InstallStage {
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    #[inline]
    pub const fn is_destructive(self) -> bool {
        matches!(self, Self::Partitioning)
    }

    pub const fn next(self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::Partitioning),
            Self::Partitioning => Some(Self::Mounting),
            Self::Mounting => Some(Self::ExtractingRoot),
            Self::ExtractingRoot => Some(Self::GeneratingFstab),
            Self::GeneratingFstab => Some(Self::Configuring),
            Self::Configuring => Some(Self::Bootloader),
            Self::Bootloader => Some(Self::Finalizing),
            Self::Finalizing => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::Partitioning => "Partitioning disks",
            Self::Mounting => "Mounting partitions",
            Self::ExtractingRoot => "Extracting root filesystem",
            Self::GeneratingFstab => "Generating fstab",
            Self::Configuring => "Configuring system",
            Self::Bootloader => "Installing bootloader",
            Self::Finalizing => "Finalizing installation",
            Self::Completed => "Installation complete",
            Self::Failed => "Installation failed",
        }
    }

    /// Progress reached once this stage has been entered.
    pub const fn progress_percent(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Partitioning => 12,
            Self::Mounting => 14,
            Self::ExtractingRoot => 17,
            Self::GeneratingFstab => 34,
            Self::Configuring => 39,
            Self::Bootloader => 89,
            Self::Finalizing => 98,
            Self::Completed => 100,
            Self::Failed => 0,
        }
    }

    /// All stages in order, `Failed` excluded.
    pub const fn all_stages() -> &'static [Self] {
        &[
            Self::NotStarted,
            Self::Partitioning,
            Self::Mounting,
            Self::ExtractingRoot,
            Self::GeneratingFstab,
            Self::Configuring,
            Self::Bootloader,
            Self::Finalizing,
            Self::Completed,
        ]
    }
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Rejected stage transition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Cannot skip from {from} to {to}")]
    SkippedStage { from: InstallStage, to: InstallStage },

    #[error("Cannot go backwards from {from} to {to}")]
    BackwardTransition { from: InstallStage, to: InstallStage },

    #[error("Cannot leave terminal state {from}")]
    FromTerminalState { from: InstallStage },

    #[error("Stage {stage} requires explicit confirmation (destructive operation)")]
    MissingConfirmation { stage: InstallStage },

    #[error("Already at stage {stage}")]
    AlreadyAtStage { stage: InstallStage },
}

/// Current stage plus the path taken to reach it.
#[derive(Debug, Clone)]
pub struct StageTracker {
    current: InstallStage,
    failed_at: Option<InstallStage>,
    history: Vec<(InstallStage, Instant)>,
    destructive_confirmed: bool,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            current: InstallStage::NotStarted,
            failed_at: None,
            history: Vec::with_capacity(InstallStage::all_stages().len()),
            destructive_confirmed: false,
        }
    }

    /// Tracker for a pipeline whose earlier stages ran in another process
    /// (or outside this crate). Terminal stages are not resumable.
    pub fn resume_at(stage: InstallStage) -> Result<Self, TransitionError> {
        if stage.is_terminal() {
            return Err(TransitionError::FromTerminalState { from: stage });
        }
        let mut tracker = Self::new();
        tracker.current = stage;
        tracker.destructive_confirmed = stage.order() > InstallStage::Partitioning.order();
        Ok(tracker)
    }

    #[inline]
    pub fn current_stage(&self) -> InstallStage {
        self.current
    }

    #[inline]
    pub fn failed_at(&self) -> Option<InstallStage> {
        self.failed_at
    }

    #[inline]
    pub fn progress_percent(&self) -> u8 {
        self.current.progress_percent()
    }

    pub fn history(&self) -> &[(InstallStage, Instant)] {
        &self.history
    }

    /// Authorize the destructive `Partitioning` stage. Cannot be revoked.
    pub fn confirm_destructive_operations(&mut self) {
        self.destructive_confirmed = true;
    }

    /// Move to the next stage in sequence.
    pub fn advance(&mut self) -> Result<InstallStage, TransitionError> {
        let Some(next) = self.current.next() else {
            return Err(TransitionError::FromTerminalState { from: self.current });
        };
        self.transition_to(next)
    }

    /// Move to `target`, which must be the immediate next stage.
    pub fn transition_to(&mut self, target: InstallStage) -> Result<InstallStage, TransitionError> {
        if self.current.is_terminal() {
            return Err(TransitionError::FromTerminalState { from: self.current });
        }
        if target == self.current {
            return Err(TransitionError::AlreadyAtStage { stage: target });
        }
        if target != InstallStage::Failed && target.order() < self.current.order() {
            return Err(TransitionError::BackwardTransition {
                from: self.current,
                to: target,
            });
        }
        if self.current.next() != Some(target) {
            return Err(TransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }
        if target.is_destructive() && !self.destructive_confirmed {
            return Err(TransitionError::MissingConfirmation { stage: target });
        }

        tracing::info!("Stage: {} ({}%)", target, target.progress_percent());
        self.history.push((target, Instant::now()));
        self.current = target;
        Ok(target)
    }

    /// Mark the install as failed at the current stage.
    pub fn fail(&mut self) -> Result<(), TransitionError> {
        if self.current.is_terminal() {
            return Err(TransitionError::FromTerminalState { from: self.current });
        }
        tracing::error!("Install failed during: {}", self.current);
        self.failed_at = Some(self.current);
        self.history.push((InstallStage::Failed, Instant::now()));
        self.current = InstallStage::Failed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_next_forms_chain() {
        let mut current = InstallStage::NotStarted;
        let mut count = 0;
        while let Some(next) = current.next() {
            current = next;
            count += 1;
            assert!(count < 20, "Infinite loop detected in stage chain");
        }
        assert_eq!(current, InstallStage::Completed);
        assert_eq!(count, InstallStage::all_stages().len() - 1);
    }

    #[test]
    fn test_progress_is_monotonic_over_stages() {
        let percents: Vec<u8> = InstallStage::all_stages()
            .iter()
            .map(|s| s.progress_percent())
            .collect();
        assert!(percents.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_partitioning_requires_confirmation() {
        let mut tracker = StageTracker::new();
        assert_eq!(
            tracker.advance(),
            Err(TransitionError::MissingConfirmation {
                stage: InstallStage::Partitioning
            })
        );
        tracker.confirm_destructive_operations();
        assert_eq!(tracker.advance(), Ok(InstallStage::Partitioning));
        assert_eq!(tracker.progress_percent(), 12);
    }

    #[test]
    fn test_cannot_skip_or_go_back() {
        let mut tracker = StageTracker::new();
        tracker.confirm_destructive_operations();
        tracker.advance().expect("advance"); // test: known-good input
        tracker.advance().expect("advance"); // test: known-good input

        assert!(matches!(
            tracker.transition_to(InstallStage::GeneratingFstab),
            Err(TransitionError::SkippedStage { .. })
        ));
        assert!(matches!(
            tracker.transition_to(InstallStage::Partitioning),
            Err(TransitionError::BackwardTransition { .. })
        ));
        assert_eq!(tracker.current_stage(), InstallStage::Mounting);
    }

    #[test]
    fn test_fail_from_anywhere_is_terminal() {
        let mut tracker = StageTracker::new();
        tracker.fail().expect("fail"); // test: known-good input
        assert_eq!(tracker.failed_at(), Some(InstallStage::NotStarted));
        assert!(matches!(
            tracker.advance(),
            Err(TransitionError::FromTerminalState { .. })
        ));
        assert!(tracker.fail().is_err());
    }

    #[test]
    fn test_resume_after_external_stages() {
        let mut tracker =
            StageTracker::resume_at(InstallStage::ExtractingRoot).expect("resume"); // test: known-good input
        assert_eq!(tracker.advance(), Ok(InstallStage::GeneratingFstab));
        assert!(StageTracker::resume_at(InstallStage::Completed).is_err());
    }

    #[test]
    fn test_history_records_each_stage() {
        let mut tracker = StageTracker::new();
        tracker.confirm_destructive_operations();
        while tracker.advance().is_ok() {}
        assert_eq!(tracker.current_stage(), InstallStage::Completed);
        assert_eq!(tracker.history().len(), InstallStage::all_stages().len() - 1);
    }
}
