// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Test result collection.
//!
//! Each test area opens a sub-test; checks record failures against it and
//! never abort the run. Measurements and one-off values are kept for the
//! final summary, which is also serializable for JSON output.

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};

use crate::error::FsPerfResult;
use crate::profiler::Measurement;

/// Unit of a one-off value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Ns,
    NsPerOccurrence,
    Bytes,
    BytesPerSec,
    Occurrences,
}

impl Unit {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ns => "ns",
            Self::NsPerOccurrence => "ns/occurrence",
            Self::Bytes => "bytes",
            Self::BytesPerSec => "bytes/s",
            Self::Occurrences => "occurrences",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A named numeric result not produced by the adaptive profiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    pub name: String,
    pub value: u64,
    pub unit: Unit,
}

/// Results of one test area.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AreaSummary {
    pub name: String,
    pub failures: u32,
    /// Failure messages, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub measurements: Vec<Measurement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Value>,
}

/// Final run summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub areas: Vec<AreaSummary>,
    pub total_failures: u32,
}

impl RunSummary {
    pub fn passed(&self) -> bool {
        self.total_failures == 0
    }
}

/// Collects checks, values and measurements for a run.
#[derive(Debug, Default)]
pub struct TestReport {
    areas: Vec<AreaSummary>,
    show_duration: bool,
    show_iterations: bool,
}

impl TestReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also log the raw duration and iteration count of each measurement.
    pub fn with_details(mut self, show_duration: bool, show_iterations: bool) -> Self {
        self.show_duration = show_duration;
        self.show_iterations = show_iterations;
        self
    }

    /// Start a new test area. Results recorded before the first call go to
    /// an implicit "setup" area.
    pub fn sub(&mut self, name: impl Into<String>) {
        let name = name.into();
        tracing::info!(area = %name, "Testing");
        self.areas.push(AreaSummary {
            name,
            ..Default::default()
        });
    }

    fn current(&mut self) -> &mut AreaSummary {
        if self.areas.is_empty() {
            self.sub("setup");
        }
        let last = self.areas.len() - 1;
        &mut self.areas[last]
    }

    /// Record a failure.
    pub fn failed(&mut self, message: impl fmt::Display) {
        let message = message.to_string();
        let area = self.current();
        tracing::error!(area = %area.name, "{}", message);
        area.failures += 1;
        area.messages.push(message);
    }

    /// Record a failure unless `condition` holds.
    pub fn check(&mut self, condition: bool, message: impl FnOnce() -> String) -> bool {
        if !condition {
            self.failed(message());
        }
        condition
    }

    /// Unwrap a successful result or record the error.
    pub fn check_ok<T>(&mut self, result: io::Result<T>, what: impl fmt::Display) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.failed(format_args!("{}: {}", what, e));
                None
            }
        }
    }

    /// Record a failure unless `result` failed with `errno`.
    pub fn expect_errno<T>(&mut self, result: io::Result<T>, errno: i32, what: impl fmt::Display) -> bool {
        self.expect_any_errno(result, &[errno], what)
    }

    /// Record a failure unless `result` failed with one of `errnos`.
    pub fn expect_any_errno<T>(
        &mut self,
        result: io::Result<T>,
        errnos: &[i32],
        what: impl fmt::Display,
    ) -> bool {
        match result {
            Ok(_) => {
                self.failed(format_args!("{}: succeeded, expected errno {:?}", what, errnos));
                false
            }
            Err(e) if e.raw_os_error().is_some_and(|code| errnos.contains(&code)) => true,
            Err(e) => {
                self.failed(format_args!("{}: {}, expected errno {:?}", what, e, errnos));
                false
            }
        }
    }

    /// Mark the current area as skipped.
    pub fn skipped(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        let area = self.current();
        tracing::warn!(area = %area.name, reason = %reason, "Skipped");
        area.skipped = Some(reason);
    }

    /// Record a one-off value.
    pub fn value(&mut self, name: impl Into<String>, value: u64, unit: Unit) {
        let name = name.into();
        tracing::info!("{:<48} {:>14} {}", name, value, unit);
        self.current().values.push(Value { name, value, unit });
    }

    /// Record a profiler measurement.
    pub fn measurement(&mut self, m: Measurement) {
        tracing::info!("{:<48} {:>14} ns/call", m.name, m.ns_per_call);
        if let Some(bps) = m.bytes_per_sec {
            tracing::info!("{:<48} {:>14} bytes/s", m.name, bps);
        }
        if self.show_iterations {
            tracing::info!("{:<48} {:>14} iterations", m.name, m.iterations);
        }
        if self.show_duration {
            tracing::info!("{:<48} {:>14} ns total", m.name, m.duration_ns);
        }
        self.current().measurements.push(m);
    }

    /// Record a measurement or, when profiling failed, the failure.
    pub fn profiled(&mut self, result: FsPerfResult<Measurement>) -> Option<u64> {
        match result {
            Ok(m) => {
                let ns = m.ns_per_call;
                self.measurement(m);
                Some(ns)
            }
            Err(e) => {
                self.failed(e);
                None
            }
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.areas.iter().map(|a| a.failures).sum()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            areas: self.areas.clone(),
            total_failures: self.failure_count(),
        }
    }

    /// Process exit status for this run.
    pub fn exit_code(&self) -> i32 {
        if self.failure_count() == 0 {
            0
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_are_counted_per_area() {
        let mut report = TestReport::new();
        report.sub("open");
        report.failed("first");
        report.sub("stat");
        assert!(report.check(true, || "never".to_string()));
        assert!(!report.check(false, || "second".to_string()));
        report.failed("third");

        let summary = report.summary();
        assert_eq!(summary.areas.len(), 2);
        assert_eq!(summary.areas[0].failures, 1);
        assert_eq!(summary.areas[1].failures, 2);
        assert_eq!(summary.total_failures, 3);
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_expect_errno() {
        let mut report = TestReport::new();
        let enoent: io::Result<()> = Err(io::Error::from_raw_os_error(libc::ENOENT));
        assert!(report.expect_errno(enoent, libc::ENOENT, "open missing"));
        assert_eq!(report.failure_count(), 0);

        let ok: io::Result<()> = Ok(());
        assert!(!report.expect_errno(ok, libc::ENOENT, "open existing"));

        let eexist: io::Result<()> = Err(io::Error::from_raw_os_error(libc::EEXIST));
        assert!(!report.expect_errno(eexist, libc::ENOENT, "wrong errno"));
        assert_eq!(report.failure_count(), 2);
    }

    #[test]
    fn test_values_before_first_area_go_to_setup() {
        let mut report = TestReport::new();
        report.value("clock", 25, Unit::NsPerOccurrence);
        let summary = report.summary();
        assert_eq!(summary.areas[0].name, "setup");
        assert_eq!(summary.areas[0].values[0].value, 25);
        assert!(summary.passed());
    }

    #[test]
    fn test_summary_serializes() {
        let mut report = TestReport::new();
        report.sub("chsize");
        report.skipped("not enough free space");
        let json = serde_yaml::to_string(&report.summary()).unwrap();
        assert!(json.contains("chsize"));
        assert!(json.contains("not enough free space"));
    }
}
