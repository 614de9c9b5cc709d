//! Failure-log arming.
//!
//! The engine does not own a log sink; callers who want "a logged error
//! fails the build" install [`FailureLogLayer`] on their own
//! `tracing_subscriber` stack and hand the shared [`FailureTracker`] to
//! the engine. During an execution the tracker captures every record at or
//! above the configured threshold; afterwards the engine consults it and
//! raises an aggregated failure when anything was captured.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Context, Layer};

use crate::config::LogLevel;

/// Shared counter of failure-worthy log records.
///
/// Armed by the engine for the duration of one execution; outside that
/// window records are ignored.
pub struct FailureTracker {
    threshold: Mutex<LogLevel>,
    records: Mutex<Vec<String>>,
}

impl FailureTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            threshold: Mutex::new(LogLevel::None),
            records: Mutex::new(Vec::new()),
        })
    }

    /// Start capturing records at or above `threshold`.
    pub(crate) fn arm(&self, threshold: LogLevel) {
        *self.threshold.lock() = threshold;
        self.records.lock().clear();
    }

    /// Stop capturing and take whatever was recorded.
    pub(crate) fn disarm(&self) -> Vec<String> {
        *self.threshold.lock() = LogLevel::None;
        std::mem::take(&mut *self.records.lock())
    }

    /// Record one log message at the given level. Ignored while disarmed
    /// or below the threshold.
    pub fn record(&self, level: LogLevel, message: impl Into<String>) {
        let threshold = *self.threshold.lock();
        if threshold == LogLevel::None || level == LogLevel::None || level < threshold {
            return;
        }
        self.records.lock().push(message.into());
    }

    /// Whether any record has been captured since arming.
    pub fn is_triggered(&self) -> bool {
        !self.records.lock().is_empty()
    }
}

/// `tracing_subscriber` layer feeding a [`FailureTracker`].
pub struct FailureLogLayer {
    tracker: Arc<FailureTracker>,
}

impl FailureLogLayer {
    pub fn new(tracker: Arc<FailureTracker>) -> Self {
        Self { tracker }
    }
}

impl<S: tracing::Subscriber> Layer<S> for FailureLogLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let level = LogLevel::from_tracing(event.metadata().level());
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.tracker.record(level, visitor.message);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disarmed_tracker_ignores_records() {
        let tracker = FailureTracker::new();
        tracker.record(LogLevel::Error, "dropped");
        assert!(!tracker.is_triggered());
    }

    #[test]
    fn armed_tracker_captures_at_or_above_threshold() {
        let tracker = FailureTracker::new();
        tracker.arm(LogLevel::Warning);

        tracker.record(LogLevel::Information, "below");
        tracker.record(LogLevel::Warning, "at");
        tracker.record(LogLevel::Error, "above");

        assert!(tracker.is_triggered());
        let records = tracker.disarm();
        assert_eq!(records, vec!["at".to_string(), "above".to_string()]);
        assert!(!tracker.is_triggered());
    }

    #[test]
    fn none_threshold_disables_capture() {
        let tracker = FailureTracker::new();
        tracker.arm(LogLevel::None);
        tracker.record(LogLevel::Error, "ignored");
        assert!(tracker.disarm().is_empty());
    }

    #[test]
    fn arming_clears_leftover_records() {
        let tracker = FailureTracker::new();
        tracker.arm(LogLevel::Error);
        tracker.record(LogLevel::Error, "stale");
        tracker.arm(LogLevel::Error);
        assert!(!tracker.is_triggered());
    }
}
