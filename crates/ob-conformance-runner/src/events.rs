// crates/ob-conformance-runner/src/events.rs
// ============================================================================
// Module: Run Events
// Description: Typed run events and JSON-lines event sinks.
// Purpose: Report token acquisition, conditionality, test results, and run
//          completion to whatever consumes the run.
// Dependencies: serde, serde_json, tokio
// ============================================================================

//! ## Overview
//! Every observable step of a run is a [`RunEvent`]. Line sinks serialize
//! events as one JSON object per line; [`ChannelEventSink`] hands them to an
//! asynchronous reader instead. Sinks never fail the run: write and send
//! errors are dropped after logging.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use ob_conformance_core::RunSummary;
use ob_conformance_core::TestRecord;
use serde::Serialize;
use tokio::sync::mpsc::Sender;
use tokio::sync::mpsc::error::TrySendError;

// ============================================================================
// SECTION: Events
// ============================================================================

/// Event emitted during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum RunEvent {
    /// A consent was created and awaits PSU authorization.
    ConsentIssued {
        /// Token the consent serves.
        token_name: String,
        /// Consent identifier.
        consent_id: String,
        /// URL the PSU visits.
        consent_url: String,
    },
    /// An access token was granted.
    TokenGranted {
        /// Token name.
        token_name: String,
    },
    /// Token acquisition failed.
    TokenFailed {
        /// Token name.
        token_name: String,
        /// Failure description.
        error: String,
    },
    /// Every requested token was granted.
    AcquiredAll {
        /// Number of tokens granted.
        count: usize,
    },
    /// Mandatory endpoints a suite does not exercise.
    Conditionality {
        /// Suite identifier.
        suite_id: String,
        /// Specification identifier.
        specification: String,
        /// Missing mandatory endpoints as `METHOD path`.
        missing: Vec<String>,
    },
    /// A test case finished.
    TestResult(TestRecord),
    /// The run stopped before every case executed.
    RunStopped {
        /// Number of cases that did not execute.
        skipped: usize,
    },
    /// The run finished; emitted exactly once.
    RunComplete(RunSummary),
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Consumer of run events.
pub trait RunEventSink: Send + Sync {
    /// Records an event.
    fn record(&self, event: &RunEvent);
}

/// Sink writing JSON lines to stderr.
pub struct StderrEventSink;

impl RunEventSink for StderrEventSink {
    fn record(&self, event: &RunEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(io::stderr(), "{payload}");
        }
    }
}

/// Sink appending JSON lines to a file.
pub struct FileEventSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileEventSink {
    /// Opens the event log in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl RunEventSink for FileEventSink {
    fn record(&self, event: &RunEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// Sink keeping events in memory.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    /// Recorded events in arrival order.
    events: Mutex<Vec<RunEvent>>,
}

impl MemoryEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl RunEventSink for MemoryEventSink {
    fn record(&self, event: &RunEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Sink forwarding every event to several sinks.
pub struct FanoutEventSink {
    /// Downstream sinks.
    sinks: Vec<std::sync::Arc<dyn RunEventSink>>,
}

impl FanoutEventSink {
    /// Creates a fan-out over `sinks`.
    #[must_use]
    pub fn new(sinks: Vec<std::sync::Arc<dyn RunEventSink>>) -> Self {
        Self { sinks }
    }
}

impl RunEventSink for FanoutEventSink {
    fn record(&self, event: &RunEvent) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}

/// Sink sending events into a `tokio::sync::mpsc` channel.
///
/// # Invariants
/// - Each recorded event is enqueued at most once, in recording order.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    /// Sender feeding the reader.
    sender: Sender<RunEvent>,
}

impl ChannelEventSink {
    /// Creates a channel sink over `sender`.
    #[must_use]
    pub const fn new(sender: Sender<RunEvent>) -> Self {
        Self { sender }
    }
}

impl RunEventSink for ChannelEventSink {
    fn record(&self, event: &RunEvent) {
        match self.sender.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("result channel full; event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("result channel closed; event dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only panic-based assertions are permitted."
    )]

    use std::sync::Arc;

    use ob_conformance_core::RunSummary;
    use serde_json::json;

    use super::ChannelEventSink;
    use super::FanoutEventSink;
    use super::FileEventSink;
    use super::MemoryEventSink;
    use super::RunEvent;
    use super::RunEventSink;

    #[test]
    fn events_serialize_with_kebab_case_tags() {
        let event = RunEvent::AcquiredAll { count: 2 };
        assert_eq!(serde_json::to_value(&event).unwrap(), json!({"event": "acquired-all", "count": 2}));
        let complete = RunEvent::RunComplete(RunSummary::default());
        assert_eq!(serde_json::to_value(&complete).unwrap()["event"], json!("run-complete"));
    }

    #[test]
    fn file_sink_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let sink = FileEventSink::new(&path).unwrap();
        sink.record(&RunEvent::TokenGranted {
            token_name: "account_token_001".to_string(),
        });
        sink.record(&RunEvent::RunStopped { skipped: 3 });
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("token-granted"));
    }

    #[test]
    fn channel_sink_preserves_order_and_drops_when_full() {
        let (sender, mut receiver) = tokio::sync::mpsc::channel(2);
        let sink = ChannelEventSink::new(sender);
        sink.record(&RunEvent::AcquiredAll { count: 1 });
        sink.record(&RunEvent::RunStopped { skipped: 2 });
        sink.record(&RunEvent::RunComplete(RunSummary::default()));
        assert_eq!(receiver.try_recv().unwrap(), RunEvent::AcquiredAll { count: 1 });
        assert_eq!(receiver.try_recv().unwrap(), RunEvent::RunStopped { skipped: 2 });
        assert!(receiver.try_recv().is_err());

        drop(receiver);
        sink.record(&RunEvent::AcquiredAll { count: 3 });
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let first = Arc::new(MemoryEventSink::new());
        let second = Arc::new(MemoryEventSink::new());
        let sinks: Vec<Arc<dyn RunEventSink>> = vec![
            Arc::clone(&first) as Arc<dyn RunEventSink>,
            Arc::clone(&second) as Arc<dyn RunEventSink>,
        ];
        let fanout = FanoutEventSink::new(sinks);
        fanout.record(&RunEvent::AcquiredAll { count: 1 });
        assert_eq!(first.events().len(), 1);
        assert_eq!(second.events(), first.events());
    }
}
