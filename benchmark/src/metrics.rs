// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Result types for benchmark reports.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use fsperf_core::profiler::Measurement;
use fsperf_core::RunSummary;
use serde::{Deserialize, Serialize};
use sysinfo::System;
use uuid::Uuid;

/// What a benchmark exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkCategory {
    /// Offset pattern fill and verify
    Pattern,
    /// Comms directory message exchange
    Transport,
    /// Profiler clock overhead
    Profiler,
    /// Measurements taken by the test suite itself
    Suite,
}

impl BenchmarkCategory {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::Transport => "transport",
            Self::Profiler => "profiler",
            Self::Suite => "suite",
        }
    }
}

impl std::fmt::Display for BenchmarkCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Latency distribution of a sampled benchmark, in nanoseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyMetrics {
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: f64,
    pub median_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
    pub std_dev_ns: f64,
}

impl LatencyMetrics {
    pub fn from_samples(mut samples: Vec<u64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_unstable();

        let len = samples.len();
        let mean_ns = samples.iter().sum::<u64>() as f64 / len as f64;
        let variance = samples
            .iter()
            .map(|&x| (x as f64 - mean_ns).powi(2))
            .sum::<f64>()
            / len as f64;

        Self {
            min_ns: samples[0],
            max_ns: samples[len - 1],
            mean_ns,
            median_ns: percentile(&samples, 50),
            p95_ns: percentile(&samples, 95),
            p99_ns: percentile(&samples, 99),
            std_dev_ns: variance.sqrt(),
        }
    }
}

/// Nearest-rank percentile of sorted, non-empty `samples`.
fn percentile(samples: &[u64], pct: usize) -> u64 {
    let rank = (samples.len() * pct).div_ceil(100).max(1);
    samples[rank - 1]
}

/// Format nanoseconds with a readable unit.
pub fn format_ns(ns: u64) -> String {
    if ns < 1_000 {
        format!("{}ns", ns)
    } else if ns < 1_000_000 {
        format!("{:.2}µs", ns as f64 / 1e3)
    } else if ns < 1_000_000_000 {
        format!("{:.2}ms", ns as f64 / 1e6)
    } else {
        format!("{:.2}s", ns as f64 / 1e9)
    }
}

/// Format a byte rate in binary units, matching how block sizes are shown.
pub fn format_rate(bytes_per_sec: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KB/s", "MB/s", "GB/s"];
    let mut value = bytes_per_sec;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// Bytes moved over a timed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputMetrics {
    pub calls: u64,
    pub total_bytes: u64,
    pub duration_ns: u64,
    pub bytes_per_sec: f64,
}

impl ThroughputMetrics {
    pub fn calculate(calls: u64, total_bytes: u64, duration_ns: u64) -> Self {
        let secs = duration_ns.max(1) as f64 / 1e9;
        Self {
            calls,
            total_bytes,
            duration_ns,
            bytes_per_sec: total_bytes as f64 / secs,
        }
    }
}

/// Capacity of the volume a benchmark ran on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSummary {
    pub path: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub block_size: u64,
}

/// Host details captured with each report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub os_version: String,
    pub kernel_version: Option<String>,
    pub cpu_model: String,
    pub cpu_cores: usize,
    pub memory_bytes: u64,
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeSummary>,
}

impl SystemInfo {
    pub fn collect() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        sys.refresh_memory();

        let unknown = || "Unknown".to_string();
        Self {
            os: System::name().unwrap_or_else(unknown),
            os_version: System::os_version().unwrap_or_else(unknown),
            kernel_version: System::kernel_version(),
            cpu_model: sys
                .cpus()
                .first()
                .map(|cpu| cpu.brand().to_string())
                .unwrap_or_else(unknown),
            cpu_cores: sys.cpus().len(),
            memory_bytes: sys.total_memory(),
            hostname: System::host_name().unwrap_or_else(unknown),
            volume: None,
        }
    }

    /// Attach the capacity of the volume holding `path`, when it can be
    /// queried.
    pub fn with_volume(mut self, path: &Path) -> Self {
        self.volume = fsperf_core::sys::volume_info(path)
            .ok()
            .map(|info| VolumeSummary {
                path: path.display().to_string(),
                total_bytes: info.total_bytes,
                available_bytes: info.available_bytes,
                block_size: info.block_size,
            });
        self
    }
}

/// One named benchmark result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub name: String,
    pub category: BenchmarkCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencyMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput: Option<ThroughputMetrics>,
    pub iterations: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl BenchmarkResult {
    pub fn latency(name: impl Into<String>, category: BenchmarkCategory, samples: Vec<u64>) -> Self {
        let iterations = samples.len() as u64;
        Self {
            name: name.into(),
            category,
            latency: Some(LatencyMetrics::from_samples(samples)),
            throughput: None,
            iterations,
            metadata: BTreeMap::new(),
        }
    }

    pub fn throughput(
        name: impl Into<String>,
        category: BenchmarkCategory,
        calls: u64,
        bytes: u64,
        duration_ns: u64,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            latency: None,
            throughput: Some(ThroughputMetrics::calculate(calls, bytes, duration_ns)),
            iterations: calls,
            metadata: BTreeMap::new(),
        }
    }

    /// Convert a suite measurement. The profiler only keeps the mean, so
    /// the latency distribution collapses to that value.
    pub fn from_measurement(area: &str, m: &Measurement) -> Self {
        let mean = m.ns_per_call;
        let latency = LatencyMetrics {
            min_ns: mean,
            max_ns: mean,
            mean_ns: mean as f64,
            median_ns: mean,
            p95_ns: mean,
            p99_ns: mean,
            std_dev_ns: 0.0,
        };
        let throughput = m
            .bytes
            .map(|bytes| ThroughputMetrics::calculate(m.calls, bytes, m.duration_ns));
        Self {
            name: m.name.clone(),
            category: BenchmarkCategory::Suite,
            latency: Some(latency),
            throughput,
            iterations: m.iterations,
            metadata: BTreeMap::new(),
        }
        .with_metadata("area", area)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A complete report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub run_id: Uuid,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub system_info: SystemInfo,
    pub results: Vec<BenchmarkResult>,
    /// Failures recorded by suite runs folded into this report.
    #[serde(default)]
    pub suite_failures: u32,
}

impl BenchmarkReport {
    pub fn new(system_info: SystemInfo) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            system_info,
            results: Vec::new(),
            suite_failures: 0,
        }
    }

    pub fn add_result(&mut self, result: BenchmarkResult) {
        self.results.push(result);
    }

    /// Add every measurement of a suite run, tagged with its area.
    pub fn add_suite(&mut self, summary: &RunSummary) {
        for area in &summary.areas {
            for m in &area.measurements {
                self.add_result(BenchmarkResult::from_measurement(&area.name, m));
            }
        }
        self.suite_failures += summary.total_failures;
    }

    /// Results of one category.
    pub fn category(&self, category: BenchmarkCategory) -> impl Iterator<Item = &BenchmarkResult> {
        self.results.iter().filter(move |r| r.category == category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsperf_core::report::AreaSummary;

    #[test]
    fn test_latency_metrics_from_samples() {
        let samples = vec![1000, 100, 200, 300, 400, 500, 600, 700, 800, 900];
        let metrics = LatencyMetrics::from_samples(samples);

        assert_eq!(metrics.min_ns, 100);
        assert_eq!(metrics.max_ns, 1000);
        assert_eq!(metrics.median_ns, 500);
        assert_eq!(metrics.p99_ns, 1000);
        assert!((metrics.mean_ns - 550.0).abs() < 0.01);
        assert_eq!(LatencyMetrics::from_samples(Vec::new()), LatencyMetrics::default());
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_ns(500), "500ns");
        assert_eq!(format_ns(1500), "1.50µs");
        assert_eq!(format_ns(2_500_000), "2.50ms");
        assert_eq!(format_rate(512.0), "512.00 B/s");
        assert_eq!(format_rate(3.0 * 1024.0 * 1024.0), "3.00 MB/s");
    }

    #[test]
    fn test_throughput_calculation() {
        let metrics = ThroughputMetrics::calculate(10, 1_000_000, 500_000_000);
        assert!((metrics.bytes_per_sec - 2_000_000.0).abs() < 0.01);
    }

    #[test]
    fn test_add_suite_keeps_area_and_failures() {
        let measurement = Measurement {
            name: "read 4KB".to_string(),
            ns_per_call: 1200,
            calls: 1000,
            bytes: Some(4096 * 1000),
            bytes_per_sec: Some(3_413_333_333),
            iterations: 1000,
            duration_ns: 1_200_000,
        };
        let summary = RunSummary {
            areas: vec![AreaSummary {
                name: "read 4KB".to_string(),
                failures: 2,
                measurements: vec![measurement],
                ..Default::default()
            }],
            total_failures: 2,
        };

        let mut report = BenchmarkReport::new(SystemInfo::collect());
        report.add_suite(&summary);
        assert_eq!(report.suite_failures, 2);
        let results: Vec<_> = report.category(BenchmarkCategory::Suite).collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata["area"], "read 4KB");
        assert!(results[0].throughput.is_some());
        assert_eq!(results[0].latency.as_ref().unwrap().median_ns, 1200);
    }

    #[test]
    fn test_result_serialization() {
        let result = BenchmarkResult::latency("verify 4KB", BenchmarkCategory::Pattern, vec![1, 2, 3])
            .with_metadata("bytes", 4096);
        let json = serde_json::to_string_pretty(&result).unwrap();
        assert!(json.contains("verify 4KB"));
        assert!(json.contains("\"pattern\""));
        assert!(json.contains("bytes"));
    }
}
