// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Sampling harness for fallible operations.
//!
//! Unlike the adaptive profiler in `fsperf-core`, which reports one mean
//! per measurement, this keeps every sample so percentiles can be computed.

use std::io;
use std::time::{Duration, Instant};

/// Collects per-call latency samples.
#[derive(Debug, Clone)]
pub struct SampleHarness {
    warmup: u64,
    samples: u64,
}

impl SampleHarness {
    pub fn new() -> Self {
        Self {
            warmup: 10,
            samples: 100,
        }
    }

    /// Calls made before sampling starts.
    pub fn warmup(mut self, calls: u64) -> Self {
        self.warmup = calls;
        self
    }

    /// Number of samples to take.
    pub fn samples(mut self, count: u64) -> Self {
        self.samples = count.max(1);
        self
    }

    /// Time each call of `op`; `op` gets the call index. The first error
    /// stops sampling.
    pub fn run<F>(&self, mut op: F) -> io::Result<Vec<u64>>
    where
        F: FnMut(u64) -> io::Result<()>,
    {
        for i in 0..self.warmup {
            op(i)?;
        }

        let mut samples = Vec::with_capacity(self.samples as usize);
        for i in 0..self.samples {
            let start = Instant::now();
            op(self.warmup + i)?;
            samples.push(start.elapsed().as_nanos() as u64);
        }
        Ok(samples)
    }

    /// Call `op` repeatedly for `duration` after the warmup. `op` returns
    /// the bytes it moved. Returns `(calls, bytes, elapsed_ns)`.
    pub fn run_for<F>(&self, duration: Duration, mut op: F) -> io::Result<(u64, u64, u64)>
    where
        F: FnMut(u64) -> io::Result<u64>,
    {
        for i in 0..self.warmup {
            op(i)?;
        }

        let start = Instant::now();
        let mut calls = 0u64;
        let mut bytes = 0u64;
        while start.elapsed() < duration {
            bytes += op(self.warmup + calls)?;
            calls += 1;
        }
        Ok((calls, bytes, start.elapsed().as_nanos().max(1) as u64))
    }
}

impl Default for SampleHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_count_and_indices() {
        let mut seen = Vec::new();
        let samples = SampleHarness::new()
            .warmup(2)
            .samples(5)
            .run(|i| {
                seen.push(i);
                Ok(())
            })
            .unwrap();
        assert_eq!(samples.len(), 5);
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_error_stops_run() {
        let result = SampleHarness::new().warmup(0).samples(10).run(|i| {
            if i == 3 {
                Err(io::Error::other("stop"))
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_run_for_counts_bytes() {
        let (calls, bytes, elapsed) = SampleHarness::new()
            .warmup(1)
            .run_for(Duration::from_millis(5), |_| Ok(10))
            .unwrap();
        assert!(calls > 0);
        assert_eq!(bytes, calls * 10);
        assert!(elapsed >= 5_000_000);
    }
}
