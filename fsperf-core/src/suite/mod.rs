// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! The filesystem test suite.
//!
//! [`run_all`] prepares a fresh test directory, calibrates the clock and
//! then walks every enabled test area in a fixed order. Areas record their
//! checks, values and measurements into a shared [`TestReport`]; a failing
//! area never stops the ones after it. Only problems with the test
//! directory itself abort the run.

pub mod chsize;
pub mod copy;
pub mod dirs;
pub mod io;
pub mod manyfiles;
pub mod meta;
pub mod remote;

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::comms::CommsMaster;
use crate::config::Config;
use crate::error::{FsPerfError, FsPerfResult};
use crate::profiler::{AdaptiveProfiler, ClockCalibration};
use crate::report::{TestReport, Unit};

pub use manyfiles::{ManyFiles, ManyTree};

/// How much longer than the base directory the deep directory path is.
pub const DEEP_DIR_EXTRA: usize = 176;

/// Name of the file created in the base and deep directories.
pub const KNOWN_FILE: &str = "known-file";

/// Directory layout every test area works in.
#[derive(Debug, Clone)]
pub struct TestDirs {
    pub base: PathBuf,
    pub empty: PathBuf,
    pub deep: PathBuf,
}

impl TestDirs {
    /// Create the base directory and its fixtures. The base directory must
    /// not exist yet.
    pub fn prepare(base: impl Into<PathBuf>) -> FsPerfResult<Self> {
        let base = base.into();
        match fs::create_dir(&base) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(FsPerfError::TestDirExists { path: base });
            }
            Err(source) => {
                return Err(FsPerfError::Io {
                    context: "creating test directory",
                    source,
                })
            }
        }

        let empty = base.join("empty");
        fs::create_dir(&empty).map_err(|source| FsPerfError::Io {
            context: "creating empty directory",
            source,
        })?;

        let base_len = base.as_os_str().len();
        let mut deep = base.clone();
        while deep.as_os_str().len() < base_len + DEEP_DIR_EXTRA {
            deep.push("d");
            fs::create_dir(&deep).map_err(|source| FsPerfError::Io {
                context: "creating deep directory",
                source,
            })?;
        }

        for dir in [&base, &deep] {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(dir.join(KNOWN_FILE))
                .map_err(|source| FsPerfError::Io {
                    context: "creating known-file",
                    source,
                })?;
        }

        tracing::info!(
            base = %base.display(),
            deep_len = deep.as_os_str().len(),
            "Test directory prepared"
        );
        Ok(Self { base, empty, deep })
    }

    /// Path below the base directory. Trailing slashes and `.`/`..`
    /// components are kept as given.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.base.join(rel)
    }

    pub fn empty_path(&self, rel: &str) -> PathBuf {
        self.empty.join(rel)
    }

    pub fn deep_path(&self, rel: &str) -> PathBuf {
        self.deep.join(rel)
    }
}

/// Everything a test area needs.
pub struct TestContext {
    pub config: Config,
    pub dirs: TestDirs,
    pub profiler: AdaptiveProfiler,
    pub report: TestReport,
    pub many_files: Option<ManyFiles>,
    pub tree: Option<ManyTree>,
    pub master: Option<CommsMaster>,
}

impl TestContext {
    /// Prepare the test directory and calibrate the clock.
    pub fn new(config: Config) -> FsPerfResult<Self> {
        let base = resolve_test_dir(&config.paths.test_dir, config.paths.relative_dir)?;
        let mut report = TestReport::new()
            .with_details(config.run.show_duration, config.run.show_iterations);

        report.sub("prep");
        let dirs = TestDirs::prepare(base)?;

        let calibration = ClockCalibration::measure();
        report.value(
            "clock overhead",
            calibration.ns_per_clock_call(),
            Unit::NsPerOccurrence,
        );
        let profiler = AdaptiveProfiler::new(calibration, config.run.duration);
        let master = config.paths.comms_dir.as_ref().map(CommsMaster::new);

        Ok(Self {
            config,
            dirs,
            profiler,
            report,
            many_files: None,
            tree: None,
            master,
        })
    }

    /// Bytes available on the test volume, or `None` (with a recorded
    /// failure) when the query fails.
    pub fn free_space(&mut self) -> Option<u64> {
        let free = crate::sys::free_space(&self.dirs.base);
        self.report.check_ok(free, "statvfs on test directory")
    }

    /// Stop the remote slave and remove the test directory.
    pub fn finish(mut self) -> TestReport {
        self.report.sub("cleanup");
        if let Some(master) = self.master.as_mut() {
            if let Err(e) = master.shutdown_slave() {
                self.report.failed(format_args!("shutting down slave: {}", e));
            }
        }
        let removed = fs::remove_dir_all(&self.dirs.base);
        self.report.check_ok(
            removed,
            format_args!("removing {}", self.dirs.base.display()),
        );
        self.report
    }
}

/// Open `path` read/write, creating it or truncating it to zero.
pub fn create_replace(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

/// `path` with `suffix` appended to its last component.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Wall-clock time in nanoseconds since the epoch.
pub fn unix_now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

fn resolve_test_dir(dir: &Path, relative: bool) -> FsPerfResult<PathBuf> {
    if relative || dir.is_absolute() {
        return Ok(dir.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(dir))
        .map_err(|source| FsPerfError::Io {
            context: "resolving test directory",
            source,
        })
}

/// Run every enabled test area and clean up.
pub fn run_all(config: Config) -> FsPerfResult<TestReport> {
    let mut ctx = TestContext::new(config)?;
    let tests = ctx.config.tests.clone();

    if tests.many_files && ctx.config.run.many_files > 0 {
        manyfiles::run(&mut ctx);
    }
    if tests.open {
        meta::open(&mut ctx);
    }
    if tests.fstat {
        meta::fstat(&mut ctx);
    }
    if tests.fchmod {
        meta::fchmod(&mut ctx);
    }
    if tests.futimes {
        meta::futimes(&mut ctx);
    }
    if tests.stat {
        meta::stat(&mut ctx);
    }
    if tests.chmod {
        meta::chmod(&mut ctx);
    }
    if tests.utimes {
        meta::utimes(&mut ctx);
    }
    if tests.rename {
        meta::rename(&mut ctx);
    }
    if tests.dir_open {
        dirs::dir_open(&mut ctx);
    }
    if tests.dir_enum {
        dirs::dir_enum(&mut ctx);
    }
    if tests.mk_rm_dir {
        dirs::mk_rm_dir(&mut ctx);
    }
    if tests.stat_vfs {
        dirs::stat_vfs(&mut ctx);
    }
    if tests.rm || ctx.many_files.is_some() || ctx.tree.is_some() {
        dirs::rm(&mut ctx);
    }
    if tests.chsize {
        chsize::run(&mut ctx);
    }
    if tests.any_io() {
        io::run(&mut ctx);
    }
    if tests.copy {
        copy::run(&mut ctx);
    }
    if tests.remote {
        remote::run(&mut ctx);
    }

    Ok(ctx.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prepare_creates_fixtures() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("fstestdir");
        let dirs = TestDirs::prepare(&base).unwrap();

        assert!(dirs.empty.is_dir());
        assert_eq!(fs::read_dir(&dirs.empty).unwrap().count(), 0);
        assert!(dirs.path(KNOWN_FILE).is_file());
        assert!(dirs.deep_path(KNOWN_FILE).is_file());
        assert!(dirs.deep.as_os_str().len() >= base.as_os_str().len() + DEEP_DIR_EXTRA);
        assert!(dirs.deep.starts_with(&base));
    }

    #[test]
    fn test_prepare_refuses_existing_dir() {
        let temp = TempDir::new().unwrap();
        let result = TestDirs::prepare(temp.path());
        assert!(matches!(result, Err(FsPerfError::TestDirExists { .. })));
    }

    #[test]
    fn test_with_suffix() {
        assert_eq!(
            with_suffix(Path::new("/t/file16"), "-other"),
            PathBuf::from("/t/file16-other")
        );
        assert_eq!(
            with_suffix(Path::new("/t"), "-no-such-dir/file16"),
            PathBuf::from("/t-no-such-dir/file16")
        );
    }

    #[test]
    fn test_paths_keep_trailing_components() {
        let temp = TempDir::new().unwrap();
        let dirs = TestDirs::prepare(temp.path().join("t")).unwrap();
        assert!(dirs.path("known-file/").as_os_str().to_string_lossy().ends_with('/'));
        assert!(dirs.empty_path(".").as_os_str().to_string_lossy().ends_with("empty/."));
    }
}
