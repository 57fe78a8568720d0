// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `fsperf run` command - Run the test suite.

use std::fs;
use std::path::Path;

use fsperf_core::config::TestSelection;
use fsperf_core::{Config, ConfigLoader, RunOverrides, RunSummary};

use super::CliError;
use crate::RunArgs;

/// Turn areas on and off: the `all` switches first, then `--enable`, then
/// `--disable`.
fn apply_selection(tests: &mut TestSelection, args: &RunArgs) -> Result<(), CliError> {
    if args.enable_all {
        *tests = TestSelection::all(true);
    }
    if args.disable_all {
        *tests = TestSelection::all(false);
    }
    for (names, enabled) in [(&args.enable, true), (&args.disable, false)] {
        for name in names {
            let flag = tests
                .toggle_mut(name)
                .ok_or_else(|| CliError::UnknownArea { name: name.clone() })?;
            *flag = enabled;
        }
    }
    Ok(())
}

fn overrides(args: &RunArgs) -> RunOverrides {
    let duration_ms = match (args.seconds, args.milliseconds) {
        (Some(seconds), _) => Some(seconds.saturating_mul(1000)),
        (None, ms) => ms,
    };
    RunOverrides {
        duration_ms,
        many_files: args.many_files,
        files_per_dir: args.files_per_dir,
        subdirs_per_dir: args.subdirs_per_dir,
        tree_depth: args.tree_depth,
        io_file_size: args.io_file_size,
        set_block_sizes: args.set_block_size.clone(),
        add_block_sizes: args.add_block_size.clone(),
        max_buffer: args.max_buffer_size,
        mmap_placement: args.mmap_placement,
        ignore_no_cache: args.ignore_no_cache,
        show_duration: args.show_duration,
        show_iterations: args.show_iterations,
        test_dir: args.dir.clone(),
        relative_dir: args.relative_dir,
        comms_dir: args.comms_dir.clone(),
    }
}

/// Resolve the configuration for a run from the optional file and the
/// command line.
pub fn resolve(config_path: Option<&Path>, args: &RunArgs) -> Result<Config, CliError> {
    let mut config = match config_path {
        Some(path) => ConfigLoader::load_file(path)?,
        None => ConfigLoader::defaults()?,
    };
    apply_selection(&mut config.tests, args)?;
    ConfigLoader::apply_overrides(&mut config, overrides(args))?;
    Ok(config)
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("{:<40} {:>8}  NOTE", "AREA", "FAILURES");
    for area in &summary.areas {
        let note = area.skipped.as_deref().unwrap_or("");
        println!("{:<40} {:>8}  {}", area.name, area.failures, note);
    }
    println!();
    if summary.passed() {
        println!("✓ All tests passed");
    } else {
        println!("✗ {} failure(s)", summary.total_failures);
    }
}

fn write_json(dir: &Path, summary: &RunSummary) -> Result<(), CliError> {
    let path = dir.join(format!("fsperf-{}.json", std::process::id()));
    let failed = |message: String| CliError::JsonReport {
        path: path.display().to_string(),
        message,
    };
    let json = serde_json::to_string_pretty(summary).map_err(|e| failed(e.to_string()))?;
    fs::create_dir_all(dir).map_err(|e| failed(e.to_string()))?;
    fs::write(&path, json).map_err(|e| failed(e.to_string()))?;
    tracing::info!(path = %path.display(), "Wrote JSON report");
    Ok(())
}

pub fn execute(config_path: Option<&Path>, args: RunArgs) -> Result<u8, CliError> {
    let config = resolve(config_path, &args)?;
    tracing::info!(
        dir = %config.paths.test_dir.display(),
        duration_ms = config.run.duration.as_millis() as u64,
        io_file_size = config.run.io_file_size,
        "Starting test run"
    );

    let report = fsperf_core::run_all(config)?;
    let summary = report.summary();
    print_summary(&summary);

    if let Some(dir) = &args.json_out {
        write_json(dir, &summary)?;
    }
    Ok(report.exit_code() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_order() {
        let args = RunArgs {
            disable_all: true,
            enable: vec!["seek".into(), "read-tests".into(), "copy".into()],
            disable: vec!["copy".into()],
            ..Default::default()
        };
        let config = resolve(None, &args).unwrap();
        assert!(config.tests.seek);
        assert!(config.tests.read_tests);
        assert!(!config.tests.copy);
        assert!(!config.tests.mmap);
    }

    #[test]
    fn test_unknown_area() {
        let args = RunArgs {
            enable: vec!["no-such-area".into()],
            ..Default::default()
        };
        let err = resolve(None, &args).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_seconds_override() {
        let args = RunArgs {
            seconds: Some(2),
            set_block_size: vec![4096],
            ..Default::default()
        };
        let config = resolve(None, &args).unwrap();
        assert_eq!(config.run.duration.as_millis(), 2000);
        assert_eq!(config.run.block_sizes.len(), 1);
    }
}
