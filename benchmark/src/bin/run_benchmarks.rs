// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI tool to run the self-benchmarks and generate reports.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use fsperf_benchmark::metrics::{format_ns, format_rate};
use fsperf_benchmark::{
    BenchmarkCategory, BenchmarkReport, BenchmarkResult, JsonReporter, SampleHarness, SystemInfo,
};
use fsperf_core::comms::{CommsTransport, MessageRole, Received, EOF_MARKER};
use fsperf_core::config::TreeShape;
use fsperf_core::{run_all, BlockSize, ClockCalibration, ConfigLoader, PatternBuffer, TestSelection};

const PATTERN_SIZES: &[u64] = &[4096, 65536, 1024 * 1024];

#[derive(Parser)]
#[command(name = "run_benchmarks")]
#[command(about = "Benchmark fsperf's own building blocks and write a JSON report")]
struct Args {
    /// Output directory for reports
    #[arg(short, long, default_value = "data")]
    output: PathBuf,

    /// Directory to create scratch files in (system temp dir if unset)
    #[arg(long)]
    scratch: Option<PathBuf>,

    /// Samples per latency benchmark
    #[arg(short, long, default_value_t = 100)]
    iterations: u64,

    /// Categories to run (all if not specified)
    #[arg(short, long, value_delimiter = ',')]
    category: Vec<String>,

    /// Fewer samples and shorter timed runs
    #[arg(long)]
    quick: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let iterations = if args.quick { 10 } else { args.iterations };
    let timed = if args.quick {
        Duration::from_millis(50)
    } else {
        Duration::from_millis(500)
    };

    let scratch = match &args.scratch {
        Some(dir) => tempfile::tempdir_in(dir),
        None => tempfile::tempdir(),
    }
    .context("creating scratch directory")?;

    println!("fsperf Benchmark Suite");
    println!("======================");
    println!("Output directory: {:?}", args.output);
    println!("Scratch directory: {:?}", scratch.path());
    println!("Iterations: {}", iterations);
    println!();

    let reporter = JsonReporter::new(&args.output)?;
    let mut report = BenchmarkReport::new(SystemInfo::collect().with_volume(scratch.path()));

    let should_run = |cat: BenchmarkCategory| {
        args.category.is_empty() || args.category.iter().any(|c| c.eq_ignore_ascii_case(cat.name()))
    };
    let harness = SampleHarness::new().warmup(iterations / 10).samples(iterations);

    if should_run(BenchmarkCategory::Pattern) {
        println!("Running pattern benchmarks...");
        run_pattern_benchmarks(&mut report, &harness, timed)?;
    }
    if should_run(BenchmarkCategory::Transport) {
        println!("Running transport benchmarks...");
        run_transport_benchmarks(&mut report, &harness, scratch.path())?;
    }
    if should_run(BenchmarkCategory::Profiler) {
        println!("Running profiler benchmarks...");
        run_profiler_benchmarks(&mut report, &harness)?;
    }
    if should_run(BenchmarkCategory::Suite) {
        println!("Running a scaled-down suite...");
        run_suite(&mut report, scratch.path(), args.quick)?;
    }

    let path = reporter.save(&report)?;
    println!();
    println!("Benchmark report saved to: {:?}", path);
    println!();

    print_summary(&report);
    Ok(())
}

fn run_pattern_benchmarks(
    report: &mut BenchmarkReport,
    harness: &SampleHarness,
    timed: Duration,
) -> anyhow::Result<()> {
    for &bytes in PATTERN_SIZES {
        let block = BlockSize::new(bytes)?;
        let size = block.len();
        let mut buf = vec![0u8; size];

        let samples = harness.run(|i| {
            PatternBuffer::fill(i * bytes, &mut buf, 0xf7);
            Ok(())
        })?;
        report.add_result(
            BenchmarkResult::latency(format!("fill {}", block), BenchmarkCategory::Pattern, samples)
                .with_metadata("bytes", bytes),
        );

        PatternBuffer::fill(0, &mut buf, 0xf7);
        let (calls, moved, ns) = harness.run_for(timed, |_| {
            if PatternBuffer::verify(0, &buf, 0xf7).is_ok() {
                Ok(bytes)
            } else {
                Err(std::io::Error::other("pattern mismatch in a freshly filled buffer"))
            }
        })?;
        report.add_result(
            BenchmarkResult::throughput(format!("verify {}", block), BenchmarkCategory::Pattern, calls, moved, ns)
                .with_metadata("bytes", bytes),
        );
        println!("  ✓ pattern {}", block);
    }
    Ok(())
}

fn run_transport_benchmarks(
    report: &mut BenchmarkReport,
    harness: &SampleHarness,
    scratch: &Path,
) -> anyhow::Result<()> {
    let transport = CommsTransport::new(scratch.join("comms"));
    transport.create_dirs()?;

    for size in [16usize, 4096] {
        let mut message = vec![b'x'; size];
        message.push(EOF_MARKER);

        let samples = harness.run(|seq| {
            let seq = seq as u32;
            let name = MessageRole::Order.file_name(seq);
            transport.publish(&name, &message).map_err(std::io::Error::other)?;
            match transport.receive(seq, MessageRole::Order).map_err(std::io::Error::other)? {
                Received::Message(body) if body.len() == size => {}
                other => {
                    return Err(std::io::Error::other(format!(
                        "message {} came back as {:?}",
                        seq, other
                    )))
                }
            }
            transport.remove_delivered(&name)
        })?;

        report.add_result(
            BenchmarkResult::latency(
                format!("publish+receive {}B", size),
                BenchmarkCategory::Transport,
                samples,
            )
            .with_metadata("message_bytes", size),
        );
        println!("  ✓ transport {}B", size);
    }

    transport.remove_all().context("removing comms directory")?;
    Ok(())
}

fn run_profiler_benchmarks(report: &mut BenchmarkReport, harness: &SampleHarness) -> anyhow::Result<()> {
    let mut overheads = Vec::new();
    let samples = harness.run(|_| {
        overheads.push(ClockCalibration::measure().ns_per_clock_call());
        Ok(())
    })?;

    report.add_result(BenchmarkResult::latency("clock calibration", BenchmarkCategory::Profiler, samples));
    report.add_result(BenchmarkResult::latency(
        "clock call overhead",
        BenchmarkCategory::Profiler,
        overheads,
    ));
    println!("  ✓ profiler");
    Ok(())
}

fn run_suite(report: &mut BenchmarkReport, scratch: &Path, quick: bool) -> anyhow::Result<()> {
    let mut config = ConfigLoader::defaults()?;
    config.paths.test_dir = scratch.join("suite");
    config.run.duration = Duration::from_millis(if quick { 10 } else { 100 });
    config.tests = TestSelection::all(true);
    config.tests.remote = false;
    config.run.many_files = 256;
    config.run.tree = TreeShape {
        files_per_dir: 8,
        subdirs_per_dir: 2,
        depth: 2,
    };
    config.run.io_file_size = 16 * 1024 * 1024;
    config.run.max_buffer = Some(4 * 1024 * 1024);
    config.run.ignore_no_cache = true;

    let summary = run_all(config)?.summary();
    report.add_suite(&summary);
    println!(
        "  ✓ suite: {} areas, {} failures",
        summary.areas.len(),
        summary.total_failures
    );
    Ok(())
}

fn print_summary(report: &BenchmarkReport) {
    println!("Summary");
    println!("-------");
    println!();

    for result in &report.results {
        let mut line = format!("[{}] {}:", result.category, result.name);
        if let Some(latency) = &result.latency {
            line.push_str(&format!(
                " median={}, p99={}",
                format_ns(latency.median_ns),
                format_ns(latency.p99_ns)
            ));
        }
        if let Some(throughput) = &result.throughput {
            line.push_str(&format!(" rate={}", format_rate(throughput.bytes_per_sec)));
        }
        println!("{}", line);
    }

    if report.suite_failures > 0 {
        println!();
        println!("Suite recorded {} failure(s)", report.suite_failures);
    }
}
