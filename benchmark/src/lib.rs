// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! fsperf Benchmarking Framework
//!
//! Measures the harness's own building blocks and turns suite runs into
//! timestamped JSON reports.
//!
//! # Benchmark Categories
//!
//! - **Pattern**: offset pattern fill and verification throughput
//! - **Transport**: comms directory publish/receive round trips
//! - **Profiler**: clock calibration overhead
//! - **Suite**: measurements taken by a scaled-down `fsperf run`
//!
//! # Data Output
//!
//! Reports are written as JSON, one file per run, with host and test
//! volume details attached.

pub mod harness;
pub mod metrics;
pub mod reporter;

pub use harness::SampleHarness;
pub use metrics::{
    BenchmarkCategory, BenchmarkReport, BenchmarkResult, LatencyMetrics, SystemInfo,
    ThroughputMetrics,
};
pub use reporter::JsonReporter;
