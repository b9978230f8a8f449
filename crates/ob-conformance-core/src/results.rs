// crates/ob-conformance-core/src/results.rs
// ============================================================================
// Module: Result Records
// Description: Per-case result records and run summaries.
// Purpose: Define the record emitted for every executed test case.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A [`TestRecord`] is produced for every test case the run orchestrator
//! reaches, including cases that failed to prepare. [`RunSummary`] folds
//! records into pass/fail counters for the final report.

use serde::Deserialize;
use serde::Serialize;

/// Outcome of one executed test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRecord {
    /// Suite that declared the case.
    pub suite_id: String,
    /// Test case identifier.
    pub test_id: String,
    /// Human-readable case name.
    pub name: String,
    /// HTTP method.
    pub method: String,
    /// Endpoint after substitution, or the template when preparation failed.
    pub endpoint: String,
    /// Response status code, absent when no response was received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Wall-clock response time in milliseconds.
    pub elapsed_ms: u64,
    /// Response body size in bytes.
    pub response_size: u64,
    /// True when the case passed.
    pub pass: bool,
    /// Enumerated failures.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl TestRecord {
    /// Creates a failed record for a case that never produced a response.
    #[must_use]
    pub fn failed_before_dispatch(
        suite_id: impl Into<String>,
        test_id: impl Into<String>,
        name: impl Into<String>,
        method: impl Into<String>,
        endpoint: impl Into<String>,
        errors: Vec<String>,
    ) -> Self {
        Self {
            suite_id: suite_id.into(),
            test_id: test_id.into(),
            name: name.into(),
            method: method.into(),
            endpoint: endpoint.into(),
            status_code: None,
            elapsed_ms: 0,
            response_size: 0,
            pass: false,
            errors,
        }
    }
}

/// Aggregate counters for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Records observed.
    pub total: usize,
    /// Passing records.
    pub passed: usize,
    /// Failing records.
    pub failed: usize,
}

impl RunSummary {
    /// Folds a record into the summary.
    pub const fn record(&mut self, record: &TestRecord) {
        self.total += 1;
        if record.pass {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
    }

    /// Builds a summary from a slice of records.
    #[must_use]
    pub fn from_records(records: &[TestRecord]) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.record(record);
        }
        summary
    }

    /// Returns true when every observed record passed.
    #[must_use]
    pub const fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::RunSummary;
    use super::TestRecord;

    #[test]
    fn summary_counts_pass_and_fail() {
        let failed = TestRecord::failed_before_dispatch(
            "suite",
            "OB-301-ACC-001",
            "accounts",
            "GET",
            "/accounts",
            vec!["context key not set: access_token".to_string()],
        );
        let mut passed = failed.clone();
        passed.pass = true;
        passed.errors.clear();
        let summary = RunSummary::from_records(&[failed, passed]);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.passed, 1);
        assert!(!summary.all_passed());
    }

    #[test]
    fn records_serialize_camel_case() {
        let record = TestRecord::failed_before_dispatch("s", "t", "n", "GET", "/x", Vec::new());
        let value = serde_json::to_value(&record).unwrap_or_default();
        assert_eq!(value["testId"], "t");
        assert!(value.get("statusCode").is_none());
    }
}
