// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Adaptive profiler.
//!
//! Measures operations whose cost ranges from nanoseconds to milliseconds
//! within a fixed wall-clock budget:
//!
//! 1. A one-time [`ClockCalibration`] measures what reading the clock costs.
//! 2. An estimation pass runs the operation for at least 10ms (and an even
//!    number of times) to get a per-call cost.
//! 3. The iteration count for the target duration is derived from that cost,
//!    forced even and at least 2.
//! 4. The measurement pass runs those iterations and grows the count by 25%
//!    while it undershoots the target by more than 10%.
//!
//! Operations receive the running iteration index so they can alternate
//! between two modes on even and odd iterations.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{FsPerfError, FsPerfResult};

/// Minimum length of the estimation pass.
pub const ESTIMATION_NS: u64 = 10_000_000;
/// Correction rounds after the first measurement pass.
pub const MAX_CORRECTION_PASSES: u32 = 4;
/// Costs within this many ns of the clock overhead are left uncorrected.
const OVERHEAD_NOISE_NS: u64 = 32;

/// Source of nanosecond timestamps.
pub trait Clock {
    fn now_ns(&self) -> u64;
}

/// Monotonic wall clock.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    base: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now_ns(&self) -> u64 {
        self.base.elapsed().as_nanos() as u64
    }
}

/// Spin until the clock visibly advances and return the new reading.
fn next_tick<C: Clock>(clock: &C) -> u64 {
    let start = clock.now_ns();
    loop {
        let now = clock.now_ns();
        if now != start {
            return now;
        }
        std::hint::spin_loop();
    }
}

/// Cost of a single clock read, measured once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockCalibration {
    ns_per_clock_call: u64,
}

impl ClockCalibration {
    /// Measure the monotonic clock.
    pub fn measure() -> Self {
        Self::measure_with(&MonotonicClock::new())
    }

    /// Measure an arbitrary clock for about 10ms.
    pub fn measure_with<C: Clock>(clock: &C) -> Self {
        std::thread::yield_now();
        std::thread::yield_now();

        let start = next_tick(clock);
        let mut calls = 0u64;
        let mut now;
        loop {
            now = clock.now_ns();
            calls += 1;
            if now - start >= ESTIMATION_NS {
                break;
            }
        }

        let ns_per_clock_call = ((now - start) / calls).max(1);
        tracing::debug!(ns_per_clock_call = ns_per_clock_call, calls = calls, "Clock calibrated");
        Self { ns_per_clock_call }
    }

    /// Use a known overhead.
    pub fn with_overhead(ns_per_clock_call: u64) -> Self {
        Self { ns_per_clock_call }
    }

    pub fn ns_per_clock_call(&self) -> u64 {
        self.ns_per_clock_call
    }
}

/// One benchmarked operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub name: String,
    /// Latency per call in nanoseconds.
    pub ns_per_call: u64,
    pub calls: u64,
    /// Total bytes moved, for I/O measurements.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_per_sec: Option<u64>,
    pub iterations: u64,
    pub duration_ns: u64,
}

/// Raw timing of one profile run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileRun {
    pub iterations: u64,
    pub elapsed_ns: u64,
    /// Per-iteration cost seen by the estimation pass.
    pub estimated_ns: u64,
}

/// Derive the iteration count for `target_ns` given a per-iteration cost.
/// Always even and at least 2.
pub fn iterations_for(target_ns: u64, cost_ns: u64) -> u64 {
    if cost_ns == 0 {
        return 2;
    }
    let iterations = target_ns / cost_ns;
    if iterations <= 1 {
        2
    } else if iterations % 2 == 1 {
        iterations + 1
    } else {
        iterations
    }
}

/// Adaptive iteration-count profiler.
#[derive(Debug, Clone)]
pub struct AdaptiveProfiler<C: Clock = MonotonicClock> {
    clock: C,
    calibration: ClockCalibration,
    target: Duration,
}

impl AdaptiveProfiler<MonotonicClock> {
    /// Profiler on the monotonic clock.
    pub fn new(calibration: ClockCalibration, target: Duration) -> Self {
        Self::with_clock(MonotonicClock::new(), calibration, target)
    }
}

impl<C: Clock> AdaptiveProfiler<C> {
    pub fn with_clock(clock: C, calibration: ClockCalibration, target: Duration) -> Self {
        Self {
            clock,
            calibration,
            target,
        }
    }

    pub fn target(&self) -> Duration {
        self.target
    }

    pub fn calibration(&self) -> ClockCalibration {
        self.calibration
    }

    /// Current clock reading.
    pub fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }

    /// Run the estimation and measurement passes for `op`.
    pub fn run<F>(&self, name: &str, mut op: F) -> FsPerfResult<ProfileRun>
    where
        F: FnMut(u64) -> std::io::Result<()>,
    {
        let mut call = |iteration: u64| {
            op(iteration).map_err(|source| FsPerfError::Profile {
                name: name.to_string(),
                iteration,
                source,
            })
        };

        // Estimation pass.
        let start = next_tick(&self.clock);
        let mut done = 0u64;
        let mut elapsed;
        loop {
            call(done)?;
            done += 1;
            elapsed = self.clock.now_ns() - start;
            if elapsed >= ESTIMATION_NS && done % 2 == 0 {
                break;
            }
        }
        let mut cost = elapsed / done;
        let overhead = self.calibration.ns_per_clock_call();
        if cost > overhead + OVERHEAD_NOISE_NS {
            cost -= overhead;
        }

        // Measurement pass with correction rounds.
        let target_ns = self.target.as_nanos() as u64;
        let mut iterations = iterations_for(target_ns, cost);
        let start = next_tick(&self.clock);
        let mut done = 0u64;
        let mut passes = 0u32;
        loop {
            while done < iterations {
                call(done)?;
                done += 1;
            }
            elapsed = self.clock.now_ns() - start;
            if elapsed >= target_ns - target_ns / 10 || passes >= MAX_CORRECTION_PASSES {
                break;
            }
            passes += 1;
            iterations += (iterations / 4).max(2);
            if iterations % 2 == 1 {
                iterations += 1;
            }
        }

        tracing::debug!(
            name = %name,
            iterations = iterations,
            elapsed_ns = elapsed,
            estimated_ns = cost,
            corrections = passes,
            "Profile complete"
        );

        Ok(ProfileRun {
            iterations,
            elapsed_ns: elapsed.max(1),
            estimated_ns: cost,
        })
    }

    /// Profile an operation with no byte count.
    pub fn profile<F>(&self, name: impl Into<String>, op: F) -> FsPerfResult<Measurement>
    where
        F: FnMut(u64) -> std::io::Result<()>,
    {
        let name = name.into();
        let run = self.run(&name, op)?;
        Ok(Measurement {
            ns_per_call: run.elapsed_ns / run.iterations,
            calls: run.iterations,
            bytes: None,
            bytes_per_sec: None,
            iterations: run.iterations,
            duration_ns: run.elapsed_ns,
            name,
        })
    }

    /// Profile an operation that moves `bytes_per_op` bytes per call.
    pub fn profile_io<F>(
        &self,
        name: impl Into<String>,
        bytes_per_op: u64,
        op: F,
    ) -> FsPerfResult<Measurement>
    where
        F: FnMut(u64) -> std::io::Result<()>,
    {
        let name = name.into();
        let run = self.run(&name, op)?;
        let bytes = run.iterations.saturating_mul(bytes_per_op);
        let bytes_per_sec = (bytes as f64 / (run.elapsed_ns as f64 / 1e9)) as u64;
        Ok(Measurement {
            ns_per_call: run.elapsed_ns / run.iterations,
            calls: run.iterations,
            bytes: Some(bytes),
            bytes_per_sec: Some(bytes_per_sec),
            iterations: run.iterations,
            duration_ns: run.elapsed_ns,
            name,
        })
    }

    /// Profile a walk over every file of a tree. One iteration touches each
    /// file once and makes `calls_per_file` calls for it; latency is reported
    /// per call.
    pub fn profile_tree<F>(
        &self,
        name: impl Into<String>,
        files: &[PathBuf],
        calls_per_file: u64,
        mut op: F,
    ) -> FsPerfResult<Measurement>
    where
        F: FnMut(&Path, u64) -> std::io::Result<()>,
    {
        let name = name.into();
        let run = self.run(&name, |iteration| {
            for file in files {
                op(file, iteration)?;
            }
            Ok(())
        })?;
        let calls = run
            .iterations
            .saturating_mul(files.len() as u64)
            .saturating_mul(calls_per_file)
            .max(1);
        Ok(Measurement {
            ns_per_call: run.elapsed_ns / calls,
            calls,
            bytes: None,
            bytes_per_sec: None,
            iterations: run.iterations,
            duration_ns: run.elapsed_ns,
            name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Clock that advances one nanosecond per read; operations add their
    /// simulated cost on top.
    #[derive(Clone)]
    struct SimulatedClock(Rc<Cell<u64>>);

    impl SimulatedClock {
        fn new() -> Self {
            Self(Rc::new(Cell::new(0)))
        }

        fn advance(&self, ns: u64) {
            self.0.set(self.0.get() + ns);
        }
    }

    impl Clock for SimulatedClock {
        fn now_ns(&self) -> u64 {
            let now = self.0.get() + 1;
            self.0.set(now);
            now
        }
    }

    fn profiler(clock: &SimulatedClock, target: Duration) -> AdaptiveProfiler<SimulatedClock> {
        AdaptiveProfiler::with_clock(clock.clone(), ClockCalibration::with_overhead(1), target)
    }

    #[test]
    fn test_iterations_for() {
        assert_eq!(iterations_for(1_000_000, 0), 2);
        assert_eq!(iterations_for(1_000_000, 2_000_000), 2);
        assert_eq!(iterations_for(1_000, 1_000), 2);
        assert_eq!(iterations_for(9_000, 1_000), 10);
        assert_eq!(iterations_for(10_000, 1_000), 10);
    }

    #[test]
    fn test_convergence_on_fixed_cost() {
        let clock = SimulatedClock::new();
        let profiler = profiler(&clock, Duration::from_millis(100));
        let cost = 10_000;

        let op_clock = clock.clone();
        let run = profiler
            .run("fixed", |_| {
                op_clock.advance(cost);
                Ok(())
            })
            .unwrap();

        let expected = 100_000_000 / cost;
        let error = (run.iterations as f64 - expected as f64).abs() / expected as f64;
        assert!(error < 0.05, "iterations {} vs {}", run.iterations, expected);
        assert_eq!(run.iterations % 2, 0);
    }

    #[test]
    fn test_slow_operation_runs_at_least_twice() {
        let clock = SimulatedClock::new();
        let profiler = profiler(&clock, Duration::from_millis(1));

        let op_clock = clock.clone();
        let mut calls = 0u64;
        let measurement = profiler
            .profile("slow", |_| {
                calls += 1;
                op_clock.advance(50_000_000);
                Ok(())
            })
            .unwrap();

        assert_eq!(measurement.iterations, 2);
        // Two estimation calls plus two measured ones.
        assert_eq!(calls, 4);
    }

    #[test]
    fn test_zero_cost_operation() {
        let clock = SimulatedClock::new();
        let profiler = profiler(&clock, Duration::from_millis(1));
        let run = profiler.run("free", |_| Ok(())).unwrap();
        assert!(run.iterations >= 2);
        assert_eq!(run.iterations % 2, 0);
    }

    #[test]
    fn test_correction_grows_iterations() {
        // Cheap during estimation, slower afterwards: the first guess undershoots.
        let clock = SimulatedClock::new();
        let profiler = profiler(&clock, Duration::from_millis(10));

        let op_clock = clock.clone();
        let mut estimating = true;
        let mut previous = u64::MAX;
        let run = profiler
            .run("warming", |i| {
                if i < previous && previous != u64::MAX {
                    estimating = false;
                }
                previous = i;
                op_clock.advance(if estimating { 10_000 } else { 5_000 });
                Ok(())
            })
            .unwrap();

        assert!(run.iterations > 1_000, "iterations {}", run.iterations);
        assert_eq!(run.iterations % 2, 0);
    }

    #[test]
    fn test_correction_from_two_iterations_adds_work() {
        // Estimated slow, measured fast: every correction pass must add calls.
        let clock = SimulatedClock::new();
        let profiler = profiler(&clock, Duration::from_millis(100));

        let op_clock = clock.clone();
        let mut estimating = true;
        let mut previous = u64::MAX;
        let mut measured_calls = 0u64;
        let run = profiler
            .run("shrinking", |i| {
                if i < previous && previous != u64::MAX {
                    estimating = false;
                }
                previous = i;
                if estimating {
                    op_clock.advance(50_000_000);
                } else {
                    measured_calls += 1;
                    op_clock.advance(1_000);
                }
                Ok(())
            })
            .unwrap();

        // 2, then four passes of +2.
        assert_eq!(run.iterations, 10);
        assert_eq!(measured_calls, 10);
    }

    #[test]
    fn test_io_throughput() {
        let clock = SimulatedClock::new();
        let profiler = profiler(&clock, Duration::from_millis(20));
        let op_clock = clock.clone();
        let m = profiler
            .profile_io("read 4KB", 4096, |_| {
                op_clock.advance(4_096);
                Ok(())
            })
            .unwrap();

        assert_eq!(m.bytes, Some(m.iterations * 4096));
        // Roughly one byte per nanosecond.
        let bps = m.bytes_per_sec.unwrap();
        assert!(bps > 800_000_000 && bps < 1_100_000_000, "bps {}", bps);
    }

    #[test]
    fn test_tree_reports_per_call() {
        let clock = SimulatedClock::new();
        let profiler = profiler(&clock, Duration::from_millis(10));
        let files: Vec<PathBuf> = (0..10).map(|i| PathBuf::from(format!("{:05}", i))).collect();

        let op_clock = clock.clone();
        let m = profiler
            .profile_tree("tree stat", &files, 1, |_, _| {
                op_clock.advance(1_000);
                Ok(())
            })
            .unwrap();

        assert_eq!(m.calls, m.iterations * 10);
        assert!(m.ns_per_call >= 1_000 && m.ns_per_call < 1_100);
    }

    #[test]
    fn test_failure_carries_iteration() {
        let clock = SimulatedClock::new();
        let profiler = profiler(&clock, Duration::from_millis(1));
        let result = profiler.run("failing", |i| {
            if i == 3 {
                Err(std::io::Error::from_raw_os_error(libc::EIO))
            } else {
                Ok(())
            }
        });

        match result {
            Err(FsPerfError::Profile { name, iteration, .. }) => {
                assert_eq!(name, "failing");
                assert_eq!(iteration, 3);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_calibration_on_simulated_clock() {
        let clock = SimulatedClock::new();
        let calibration = ClockCalibration::measure_with(&clock);
        assert_eq!(calibration.ns_per_clock_call(), 1);
    }
}
