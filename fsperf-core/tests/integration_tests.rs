// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! End-to-end integration tests for fsperf.
//!
//! These run the suite against temporary directories, with an in-process
//! slave thread standing in for the remote host.

use std::path::Path;
use std::thread;
use std::time::Duration;

use fsperf_core::comms::SLAVE_PID_FILE;
use fsperf_core::config::{MmapPlacement, TreeShape};
use fsperf_core::{
    run_all, BlockSize, CommsMaster, CommsSlave, Config, ConfigLoader, RunSummary, TestSelection,
};
use tempfile::TempDir;

fn quick_config(test_dir: &Path) -> Config {
    let mut config = ConfigLoader::defaults().expect("defaults are valid");
    config.run.duration = Duration::from_millis(10);
    config.paths.test_dir = test_dir.to_path_buf();
    config
}

fn failures_in(summary: &RunSummary, area: &str) -> u32 {
    summary
        .areas
        .iter()
        .filter(|a| a.name == area)
        .map(|a| a.failures)
        .sum()
}

fn start_slave(work_dir: &Path, comms_dir: &Path) -> thread::JoinHandle<i32> {
    let slave = CommsSlave::new(work_dir, comms_dir, None);
    slave.start().expect("Failed to start slave");
    thread::spawn(move || slave.run().expect("Slave failed"))
}

/// Remote create, append, truncate and extension scenarios through a live
/// slave.
#[test]
fn test_remote_scenarios_with_slave() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let test_dir = temp.path().join("t");
    let comms_dir = temp.path().join("comms");
    let slave = start_slave(&test_dir, &comms_dir);

    let mut config = quick_config(&test_dir);
    config.tests = TestSelection::all(false);
    config.tests.remote = true;
    config.paths.comms_dir = Some(comms_dir.clone());

    let report = run_all(config).expect("run failed");
    let summary = report.summary();
    assert_eq!(failures_in(&summary, "remote"), 0, "{:#?}", summary);
    assert!(summary.passed(), "{:#?}", summary);
    assert_eq!(report.exit_code(), 0);

    // The run tells the slave to exit and removes its comms directory.
    assert_eq!(slave.join().expect("slave thread panicked"), 0);
    assert!(!test_dir.exists());
    assert!(!comms_dir.join(SLAVE_PID_FILE).exists());
}

/// A slave keeps serving after a failing script.
#[test]
fn test_slave_reports_script_errors() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let work_dir = temp.path().join("work");
    std::fs::create_dir(&work_dir).unwrap();
    let comms_dir = temp.path().join("comms");
    let slave = start_slave(&work_dir, &comms_dir);

    let mut master = CommsMaster::new(&comms_dir);
    let outcome = master.send_script("open 0 'missing' 'r' 'oe'").unwrap();
    assert_eq!(outcome.status, libc::ENOENT);
    assert!(!outcome.is_success());

    let outcome = master
        .send_script("open 0 'file' 'rw' 'ca'\nwritepattern 0 0 10 100\nclose 0")
        .unwrap();
    assert!(outcome.is_success(), "{:?}", outcome);
    let content = std::fs::read(work_dir.join("file")).unwrap();
    assert_eq!(content.len(), 100);
    assert_eq!(&content[..4], &[0x1f, 0x4e, 0x99, 0xec]);

    master.shutdown_slave().unwrap();
    assert_eq!(slave.join().unwrap(), 0);
}

/// The remote area is skipped, not failed, without a comms directory.
#[test]
fn test_remote_skipped_without_comms() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let mut config = quick_config(&temp.path().join("t"));
    config.tests = TestSelection::all(false);
    config.tests.remote = true;

    let summary = run_all(config).unwrap().summary();
    let remote = summary.areas.iter().find(|a| a.name == "remote").unwrap();
    assert_eq!(remote.skipped.as_deref(), Some("no comms directory"));
    assert!(summary.passed());
}

/// Every area, scaled down. Areas whose results depend on mount options
/// are only required to run; the data-integrity areas must pass.
#[test]
fn test_small_full_run() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let test_dir = temp.path().join("t");
    let mut config = quick_config(&test_dir);
    config.tests = TestSelection::all(true);
    config.run.many_files = 64;
    config.run.tree = TreeShape {
        files_per_dir: 4,
        subdirs_per_dir: 2,
        depth: 1,
    };
    config.run.io_file_size = 4 * 1024 * 1024;
    config.run.block_sizes = vec![BlockSize::new(4096).unwrap(), BlockSize::new(65536).unwrap()];
    config.run.max_buffer = Some(1024 * 1024);
    config.run.mmap_placement = MmapPlacement::Last;
    config.run.ignore_no_cache = true;

    let report = run_all(config).expect("run failed");
    let summary = report.summary();

    let names: Vec<&str> = summary.areas.iter().map(|a| a.name.as_str()).collect();
    for area in ["prep", "manyfiles", "chsize", "seek", "read tests", "write tests", "copy", "cleanup"] {
        assert!(names.contains(&area), "missing area {} in {:?}", area, names);
    }
    assert!(names.contains(&"read 4KB"));
    assert!(names.contains(&"write 64KB"));
    let mmap = names.iter().position(|&n| n == "mmap").unwrap();
    let fsync = names.iter().position(|&n| n == "fsync").unwrap();
    assert!(mmap > fsync, "mmap should run last: {:?}", names);

    for area in ["prep", "chsize", "seek", "read tests", "write tests", "copy", "cleanup"] {
        assert_eq!(failures_in(&summary, area), 0, "{:#?}", summary);
    }
    assert!(!test_dir.exists());
    assert_eq!(report.exit_code() == 0, summary.passed());
}

/// An existing test directory aborts the run before any area.
#[test]
fn test_existing_dir_is_refused() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = quick_config(temp.path());
    assert!(matches!(
        run_all(config),
        Err(fsperf_core::FsPerfError::TestDirExists { .. })
    ));
    assert!(temp.path().exists());
}
