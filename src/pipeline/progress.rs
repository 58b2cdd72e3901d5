//! Monotonic install progress.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::Sender;

/// Emitted whenever progress is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Progress after this report, 0-100
    pub percent: u8,
    pub message: String,
}

/// Shared progress value. A lower report never overwrites a higher one, so
/// concurrent steps may report in any order.
#[derive(Debug, Default)]
pub struct Progress {
    percent: AtomicU8,
    events: Option<Sender<ProgressEvent>>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Progress that also forwards every report to `events`.
    pub fn with_events(events: Sender<ProgressEvent>) -> Self {
        Self {
            percent: AtomicU8::new(0),
            events: Some(events),
        }
    }

    pub fn percent(&self) -> u8 {
        self.percent.load(Ordering::SeqCst)
    }

    /// Raise progress to `percent` (capped at 100). Returns the value now in
    /// effect.
    pub fn report(&self, percent: u8, message: impl Into<String>) -> u8 {
        let percent = percent.min(100);
        let previous = self.percent.fetch_max(percent, Ordering::SeqCst);
        let now = previous.max(percent);
        let message = message.into();
        tracing::debug!("Progress {}%: {}", now, message);
        if let Some(events) = &self.events {
            // Receiver gone means nobody is watching
            let _ = events.send(ProgressEvent {
                percent: now,
                message,
            });
        }
        now
    }
}
