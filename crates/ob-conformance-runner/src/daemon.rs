// crates/ob-conformance-runner/src/daemon.rs
// ============================================================================
// Module: Daemon Controller
// Description: Shared stop flag, cancellation signal, result channel, and
//              result accumulator.
// Purpose: Let a host stop a run between test cases and read its records.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! The controller is shared between the run and its host. Stopping is
//! idempotent and never interrupts a request in flight: the orchestrator
//! checks the flag before each case. Consent acquisition watches the
//! cancellation channel so a stop also ends the token deadline early.
//!
//! Records also travel on a result channel. A host takes the receiving end
//! once with [`DaemonController::take_results`]; the channel carries each
//! [`RunEvent::TestResult`] in execution order and ends with exactly one
//! [`RunEvent::RunComplete`].

use std::sync::Mutex;

use ob_conformance_core::RunSummary;
use ob_conformance_core::TestRecord;
use tokio::sync::mpsc;
use tokio::sync::watch;

use crate::events::ChannelEventSink;
use crate::events::RunEvent;
use crate::events::RunEventSink;

/// Capacity of the result channel.
const RESULT_CHANNEL_CAPACITY: usize = 1024;

/// Mutable controller state.
#[derive(Debug, Default)]
struct DaemonState {
    /// Set once a stop was requested.
    stopped: bool,
    /// Records accumulated so far.
    records: Vec<TestRecord>,
}

/// Stop flag and result accumulator of one run.
#[derive(Debug)]
pub struct DaemonController {
    /// Guarded state.
    state: Mutex<DaemonState>,
    /// Cancellation signal; true once stopped.
    cancel: watch::Sender<bool>,
    /// Sending end of the result channel.
    results: ChannelEventSink,
    /// Receiving end, until a host takes it.
    receiver: Mutex<Option<mpsc::Receiver<RunEvent>>>,
}

impl Default for DaemonController {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonController {
    /// Creates a running controller.
    #[must_use]
    pub fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        let (sender, receiver) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(DaemonState::default()),
            cancel,
            results: ChannelEventSink::new(sender),
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Requests a stop; returns true on the first request only.
    pub fn stop(&self) -> bool {
        let first = self.state.lock().is_ok_and(|mut state| !std::mem::replace(&mut state.stopped, true));
        if first {
            tracing::info!("run stop requested");
            self.cancel.send_replace(true);
        }
        first
    }

    /// Returns true once a stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state.lock().map_or(true, |state| state.stopped)
    }

    /// Returns a receiver that turns true when the run is stopped.
    #[must_use]
    pub fn cancellation(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }

    /// Takes the receiving end of the result channel; `None` after the
    /// first call.
    #[must_use]
    pub fn take_results(&self) -> Option<mpsc::Receiver<RunEvent>> {
        self.receiver.lock().ok().and_then(|mut receiver| receiver.take())
    }

    /// Appends a record to the accumulator and sends it on the result
    /// channel.
    pub fn record(&self, record: TestRecord) {
        if let Ok(mut state) = self.state.lock() {
            state.records.push(record.clone());
        }
        self.results.record(&RunEvent::TestResult(record));
    }

    /// Sends an event other than a record on the result channel.
    pub fn publish(&self, event: &RunEvent) {
        self.results.record(event);
    }

    /// Sends the final summary on the result channel and returns it.
    pub fn complete(&self) -> RunSummary {
        let summary = self.summary();
        self.results.record(&RunEvent::RunComplete(summary));
        summary
    }

    /// Returns the accumulated records.
    #[must_use]
    pub fn results(&self) -> Vec<TestRecord> {
        self.state.lock().map(|state| state.records.clone()).unwrap_or_default()
    }

    /// Returns the counters over the accumulated records.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        self.state.lock().map(|state| RunSummary::from_records(&state.records)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only panic-based assertions are permitted."
    )]

    use ob_conformance_core::RunSummary;
    use ob_conformance_core::TestRecord;

    use super::DaemonController;
    use crate::events::RunEvent;

    #[test]
    fn stop_is_idempotent_and_signals_watchers() {
        let daemon = DaemonController::new();
        let watcher = daemon.cancellation();
        assert!(!daemon.is_stopped());
        assert!(daemon.stop());
        assert!(!daemon.stop());
        assert!(daemon.is_stopped());
        assert!(*watcher.borrow());
        assert!(*daemon.cancellation().borrow());
    }

    #[test]
    fn records_accumulate_into_summary() {
        let daemon = DaemonController::new();
        let failed = TestRecord::failed_before_dispatch("s", "t1", "n", "GET", "/accounts", vec![
            "boom".to_string(),
        ]);
        let mut passed = failed.clone();
        passed.test_id = "t2".to_string();
        passed.pass = true;
        passed.errors.clear();
        daemon.record(failed);
        daemon.record(passed);
        assert_eq!(daemon.results().len(), 2);
        let summary = daemon.summary();
        assert_eq!((summary.total, summary.passed, summary.failed), (2, 1, 1));
    }

    #[test]
    fn result_channel_is_taken_once_and_ends_with_summary() {
        let daemon = DaemonController::new();
        let mut receiver = daemon.take_results().unwrap();
        assert!(daemon.take_results().is_none());
        let record = TestRecord::failed_before_dispatch("s", "t1", "n", "GET", "/accounts", vec![
            "boom".to_string(),
        ]);
        daemon.record(record.clone());
        let summary = daemon.complete();
        assert_eq!(summary, RunSummary { total: 1, passed: 0, failed: 1 });
        assert_eq!(receiver.try_recv().unwrap(), RunEvent::TestResult(record));
        assert_eq!(receiver.try_recv().unwrap(), RunEvent::RunComplete(summary));
        assert!(receiver.try_recv().is_err());
    }
}
