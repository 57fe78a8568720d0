// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML run configuration with strict validation.
//!
//! Every test area has a toggle, and the numeric knobs (duration, tree shape,
//! buffer and block sizes) are range-checked before a run starts. Command-line
//! flags are applied on top through [`RunOverrides`] and go through the same
//! checks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FsPerfError, FsPerfResult, HardValidationError};
use crate::types::BlockSize;

/// Maximum number of I/O block sizes in one run.
pub const MAX_BLOCK_SIZES: usize = 16;
/// Upper bound for files per tree directory (64M).
pub const MAX_FILES_PER_DIR: u32 = 64 * 1024 * 1024;
/// Upper bound for subdirectories per tree directory.
pub const MAX_SUBDIRS_PER_DIR: u32 = 1024;
/// Upper bound for tree depth.
pub const MAX_TREE_DEPTH: u32 = 8;
/// Smallest accepted buffer cap.
pub const MIN_MAX_BUFFER: u64 = 4096;

/// Where the mmap tests run relative to the read and write tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MmapPlacement {
    First,
    #[default]
    #[serde(alias = "default")]
    Between,
    Last,
}

impl std::str::FromStr for MmapPlacement {
    type Err = HardValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first" => Ok(Self::First),
            "between" | "default" => Ok(Self::Between),
            "last" => Ok(Self::Last),
            _ => Err(HardValidationError::InvalidFieldValue {
                field: "mmap_placement",
                value: s.to_string(),
                reason: "Expected first, between, default or last".to_string(),
            }),
        }
    }
}

/// One toggle per test area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestSelection {
    pub many_files: bool,
    pub open: bool,
    pub fstat: bool,
    pub fchmod: bool,
    pub futimes: bool,
    pub stat: bool,
    pub chmod: bool,
    pub utimes: bool,
    pub rename: bool,
    pub dir_open: bool,
    pub dir_enum: bool,
    pub mk_rm_dir: bool,
    pub stat_vfs: bool,
    pub rm: bool,
    pub chsize: bool,
    pub read_tests: bool,
    pub read_perf: bool,
    pub sendfile: bool,
    pub splice: bool,
    pub write_tests: bool,
    pub write_perf: bool,
    pub seek: bool,
    pub fsync: bool,
    pub mmap: bool,
    pub mmap_coherency: bool,
    pub copy: bool,
    pub remote: bool,
}

impl TestSelection {
    /// Selection with every area set to `enabled`.
    pub fn all(enabled: bool) -> Self {
        Self {
            many_files: enabled,
            open: enabled,
            fstat: enabled,
            fchmod: enabled,
            futimes: enabled,
            stat: enabled,
            chmod: enabled,
            utimes: enabled,
            rename: enabled,
            dir_open: enabled,
            dir_enum: enabled,
            mk_rm_dir: enabled,
            stat_vfs: enabled,
            rm: enabled,
            chsize: enabled,
            read_tests: enabled,
            read_perf: enabled,
            sendfile: enabled,
            splice: enabled,
            write_tests: enabled,
            write_perf: enabled,
            seek: enabled,
            fsync: enabled,
            mmap: enabled,
            mmap_coherency: enabled,
            copy: enabled,
            remote: enabled,
        }
    }

    /// Whether any area sharing the big I/O file is enabled.
    pub fn any_io(&self) -> bool {
        self.read_tests
            || self.read_perf
            || self.sendfile
            || self.splice
            || self.write_tests
            || self.write_perf
            || self.seek
            || self.fsync
            || self.mmap
    }

    /// Look up a toggle by its flag name (`many-files`, `dir-enum`, ...).
    pub fn toggle_mut(&mut self, name: &str) -> Option<&mut bool> {
        let flag = match name.replace('-', "_").as_str() {
            "many_files" | "manyfiles" => &mut self.many_files,
            "open" => &mut self.open,
            "fstat" => &mut self.fstat,
            "fchmod" => &mut self.fchmod,
            "futimes" => &mut self.futimes,
            "stat" => &mut self.stat,
            "chmod" => &mut self.chmod,
            "utimes" => &mut self.utimes,
            "rename" => &mut self.rename,
            "dir_open" => &mut self.dir_open,
            "dir_enum" => &mut self.dir_enum,
            "mk_rm_dir" => &mut self.mk_rm_dir,
            "stat_vfs" => &mut self.stat_vfs,
            "rm" => &mut self.rm,
            "chsize" => &mut self.chsize,
            "read_tests" => &mut self.read_tests,
            "read_perf" => &mut self.read_perf,
            "sendfile" => &mut self.sendfile,
            "splice" => &mut self.splice,
            "write_tests" => &mut self.write_tests,
            "write_perf" => &mut self.write_perf,
            "seek" => &mut self.seek,
            "fsync" => &mut self.fsync,
            "mmap" => &mut self.mmap,
            "mmap_coherency" => &mut self.mmap_coherency,
            "copy" => &mut self.copy,
            "remote" => &mut self.remote,
            _ => return None,
        };
        Some(flag)
    }
}

impl Default for TestSelection {
    fn default() -> Self {
        Self::all(true)
    }
}

/// Raw run parameters as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
struct RawRunConfig {
    #[serde(default = "default_duration_ms")]
    duration_ms: u64,
    #[serde(default = "default_many_files")]
    many_files: u32,
    #[serde(default = "default_files_per_dir")]
    files_per_dir: u32,
    #[serde(default = "default_subdirs_per_dir")]
    subdirs_per_dir: u32,
    #[serde(default = "default_tree_depth")]
    tree_depth: u32,
    #[serde(default = "default_io_file_size")]
    io_file_size: u64,
    #[serde(default = "default_block_sizes")]
    block_sizes: Vec<u64>,
    #[serde(default)]
    max_buffer: u64,
    #[serde(default)]
    mmap_placement: MmapPlacement,
    #[serde(default)]
    ignore_no_cache: bool,
    #[serde(default)]
    show_duration: bool,
    #[serde(default)]
    show_iterations: bool,
}

fn default_duration_ms() -> u64 {
    10_000 // 10 seconds per measurement
}

fn default_many_files() -> u32 {
    10_000
}

fn default_files_per_dir() -> u32 {
    640
}

fn default_subdirs_per_dir() -> u32 {
    16
}

fn default_tree_depth() -> u32 {
    1
}

fn default_io_file_size() -> u64 {
    512 * 1024 * 1024
}

fn default_block_sizes() -> Vec<u64> {
    vec![
        1,
        512,
        4096,
        16384,
        65536,
        1024 * 1024,
        32 * 1024 * 1024,
        128 * 1024 * 1024,
    ]
}

impl Default for RawRunConfig {
    fn default() -> Self {
        Self {
            duration_ms: default_duration_ms(),
            many_files: default_many_files(),
            files_per_dir: default_files_per_dir(),
            subdirs_per_dir: default_subdirs_per_dir(),
            tree_depth: default_tree_depth(),
            io_file_size: default_io_file_size(),
            block_sizes: default_block_sizes(),
            max_buffer: 0,
            mmap_placement: MmapPlacement::default(),
            ignore_no_cache: false,
            show_duration: false,
            show_iterations: false,
        }
    }
}

/// Raw directory settings.
#[derive(Debug, Default, Deserialize)]
struct RawPathConfig {
    #[serde(default)]
    test_dir: Option<String>,
    #[serde(default)]
    relative_dir: bool,
    #[serde(default)]
    comms_dir: Option<String>,
}

/// Raw root configuration file.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    tests: TestSelection,
    #[serde(default)]
    run: RawRunConfig,
    #[serde(default)]
    paths: RawPathConfig,
}

/// Shape of the many-files tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeShape {
    pub files_per_dir: u32,
    pub subdirs_per_dir: u32,
    pub depth: u32,
}

impl TreeShape {
    /// Number of directories in the tree, root included.
    pub fn directory_count(&self) -> u64 {
        let mut total = 1u64;
        let mut level = 1u64;
        for _ in 0..self.depth {
            level = level.saturating_mul(u64::from(self.subdirs_per_dir));
            total = total.saturating_add(level);
        }
        total
    }

    /// Number of files in the tree.
    pub fn total_files(&self) -> u64 {
        self.directory_count()
            .saturating_mul(u64::from(self.files_per_dir))
    }
}

/// Validated run parameters.
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    pub duration: Duration,
    pub many_files: u32,
    pub tree: TreeShape,
    pub io_file_size: u64,
    pub block_sizes: Vec<BlockSize>,
    /// `None` means unlimited.
    pub max_buffer: Option<u64>,
    pub mmap_placement: MmapPlacement,
    pub ignore_no_cache: bool,
    pub show_duration: bool,
    pub show_iterations: bool,
}

impl RunConfig {
    /// Clamp a buffer size to the configured cap.
    pub fn clamp_buffer(&self, bytes: u64) -> u64 {
        match self.max_buffer {
            Some(max) => bytes.min(max),
            None => bytes,
        }
    }
}

/// Validated directory settings.
#[derive(Debug, Clone, Serialize)]
pub struct PathConfig {
    pub test_dir: PathBuf,
    pub relative_dir: bool,
    pub comms_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Default test directory: `<tmp>/fstestdir-<pid>`.
    pub fn default_test_dir() -> PathBuf {
        std::env::temp_dir().join(format!("fstestdir-{}", std::process::id()))
    }
}

/// Complete validated configuration.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub tests: TestSelection,
    pub run: RunConfig,
    pub paths: PathConfig,
}

/// Command-line values layered on top of a loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub duration_ms: Option<u64>,
    pub many_files: Option<u32>,
    pub files_per_dir: Option<u32>,
    pub subdirs_per_dir: Option<u32>,
    pub tree_depth: Option<u32>,
    pub io_file_size: Option<u64>,
    /// Replaces the block size list.
    pub set_block_sizes: Vec<u64>,
    /// Appended after `set_block_sizes` is applied.
    pub add_block_sizes: Vec<u64>,
    pub max_buffer: Option<u64>,
    pub mmap_placement: Option<MmapPlacement>,
    pub ignore_no_cache: bool,
    pub show_duration: bool,
    pub show_iterations: bool,
    pub test_dir: Option<PathBuf>,
    pub relative_dir: bool,
    pub comms_dir: Option<PathBuf>,
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> FsPerfResult<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(FsPerfError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| FsPerfError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Built-in defaults, with no file involved.
    pub fn defaults() -> FsPerfResult<Config> {
        Self::validate(RawConfig::default())
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> FsPerfResult<Config> {
        if content.trim().is_empty() {
            return Self::defaults();
        }

        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| FsPerfError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Self::validate(raw)
    }

    /// Apply command-line overrides, validating each value.
    pub fn apply_overrides(config: &mut Config, overrides: RunOverrides) -> FsPerfResult<()> {
        let run = &mut config.run;

        if let Some(ms) = overrides.duration_ms {
            run.duration = Self::validate_duration(ms);
        }
        if let Some(count) = overrides.many_files {
            run.many_files = count;
        }
        let mut tree = run.tree;
        if let Some(v) = overrides.files_per_dir {
            tree.files_per_dir = v;
        }
        if let Some(v) = overrides.subdirs_per_dir {
            tree.subdirs_per_dir = v;
        }
        if let Some(v) = overrides.tree_depth {
            tree.depth = v;
        }
        run.tree = Self::validate_tree(tree.files_per_dir, tree.subdirs_per_dir, tree.depth)?;

        if let Some(size) = overrides.io_file_size {
            run.io_file_size = if size == 0 {
                default_io_file_size()
            } else {
                size
            };
        }

        if !overrides.set_block_sizes.is_empty() || !overrides.add_block_sizes.is_empty() {
            let mut sizes: Vec<u64> = if overrides.set_block_sizes.is_empty() {
                run.block_sizes.iter().map(|b| b.bytes()).collect()
            } else {
                overrides.set_block_sizes
            };
            sizes.extend(overrides.add_block_sizes);
            run.block_sizes = Self::validate_block_sizes(sizes)?;
        }

        if let Some(max) = overrides.max_buffer {
            run.max_buffer = Self::validate_max_buffer(max)?;
        }
        if let Some(placement) = overrides.mmap_placement {
            run.mmap_placement = placement;
        }
        run.ignore_no_cache |= overrides.ignore_no_cache;
        run.show_duration |= overrides.show_duration;
        run.show_iterations |= overrides.show_iterations;

        if let Some(dir) = overrides.test_dir {
            config.paths.test_dir = dir;
        }
        config.paths.relative_dir |= overrides.relative_dir;
        if let Some(dir) = overrides.comms_dir {
            config.paths.comms_dir = Some(dir);
        }

        Ok(())
    }

    /// Validate raw configuration and convert to validated types.
    fn validate(raw: RawConfig) -> FsPerfResult<Config> {
        let run = Self::validate_run(raw.run)?;

        let test_dir = raw
            .paths
            .test_dir
            .map(PathBuf::from)
            .unwrap_or_else(PathConfig::default_test_dir);

        Ok(Config {
            tests: raw.tests,
            run,
            paths: PathConfig {
                test_dir,
                relative_dir: raw.paths.relative_dir,
                comms_dir: raw.paths.comms_dir.map(PathBuf::from),
            },
        })
    }

    fn validate_run(raw: RawRunConfig) -> FsPerfResult<RunConfig> {
        let tree = Self::validate_tree(raw.files_per_dir, raw.subdirs_per_dir, raw.tree_depth)?;
        let block_sizes = Self::validate_block_sizes(raw.block_sizes)?;
        let max_buffer = Self::validate_max_buffer(raw.max_buffer)?;

        Ok(RunConfig {
            duration: Self::validate_duration(raw.duration_ms),
            many_files: raw.many_files,
            tree,
            io_file_size: if raw.io_file_size == 0 {
                default_io_file_size()
            } else {
                raw.io_file_size
            },
            block_sizes,
            max_buffer,
            mmap_placement: raw.mmap_placement,
            ignore_no_cache: raw.ignore_no_cache,
            show_duration: raw.show_duration,
            show_iterations: raw.show_iterations,
        })
    }

    /// Zero selects the default duration.
    fn validate_duration(ms: u64) -> Duration {
        if ms == 0 {
            Duration::from_millis(default_duration_ms())
        } else {
            Duration::from_millis(ms)
        }
    }

    fn validate_tree(files_per_dir: u32, subdirs_per_dir: u32, depth: u32) -> FsPerfResult<TreeShape> {
        if !(1..=MAX_FILES_PER_DIR).contains(&files_per_dir) {
            return Err(HardValidationError::OutOfRange {
                field: "files_per_dir",
                value: u64::from(files_per_dir),
                min: 1,
                max: u64::from(MAX_FILES_PER_DIR),
            }
            .into());
        }
        if !(1..=MAX_SUBDIRS_PER_DIR).contains(&subdirs_per_dir) {
            return Err(HardValidationError::OutOfRange {
                field: "subdirs_per_dir",
                value: u64::from(subdirs_per_dir),
                min: 1,
                max: u64::from(MAX_SUBDIRS_PER_DIR),
            }
            .into());
        }
        if depth > MAX_TREE_DEPTH {
            return Err(HardValidationError::OutOfRange {
                field: "tree_depth",
                value: u64::from(depth),
                min: 0,
                max: u64::from(MAX_TREE_DEPTH),
            }
            .into());
        }

        let tree = TreeShape {
            files_per_dir,
            subdirs_per_dir,
            depth,
        };
        if tree.total_files() > u64::from(u32::MAX) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "tree",
                value: tree.total_files().to_string(),
                reason: "Too many files in the many-files tree".to_string(),
            }
            .into());
        }
        Ok(tree)
    }

    fn validate_block_sizes(sizes: Vec<u64>) -> FsPerfResult<Vec<BlockSize>> {
        if sizes.len() > MAX_BLOCK_SIZES {
            return Err(HardValidationError::TooManyBlockSizes {
                count: sizes.len(),
                max: MAX_BLOCK_SIZES,
            }
            .into());
        }
        let sizes = sizes
            .into_iter()
            .map(BlockSize::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sizes)
    }

    /// Zero means unlimited.
    fn validate_max_buffer(bytes: u64) -> FsPerfResult<Option<u64>> {
        if bytes == 0 || bytes >= u64::from(u32::MAX) {
            return Ok(None);
        }
        if bytes < MIN_MAX_BUFFER {
            return Err(HardValidationError::InvalidFieldValue {
                field: "max_buffer",
                value: bytes.to_string(),
                reason: format!("Must be zero (unlimited) or at least {} bytes", MIN_MAX_BUFFER),
            }
            .into());
        }
        Ok(Some(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ConfigLoader::load_string("").unwrap();
        assert_eq!(config.run.duration, Duration::from_secs(10));
        assert_eq!(config.run.many_files, 10_000);
        assert_eq!(config.run.tree.total_files(), 10_880);
        assert_eq!(config.run.block_sizes.len(), 8);
        assert_eq!(config.run.max_buffer, None);
        assert_eq!(config.run.mmap_placement, MmapPlacement::Between);
        assert!(config.tests.remote);
        assert!(config.paths.comms_dir.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
tests:
  many_files: false
  copy: false
run:
  duration_ms: 250
  files_per_dir: 10
  subdirs_per_dir: 2
  tree_depth: 2
  block_sizes: [4096, 65536]
  max_buffer: 8192
  mmap_placement: last
paths:
  test_dir: /tmp/fsperf-yaml
  comms_dir: /mnt/shared/comms
"#;
        let config = ConfigLoader::load_string(yaml).unwrap();
        assert!(!config.tests.many_files);
        assert!(!config.tests.copy);
        assert!(config.tests.open);
        assert_eq!(config.run.duration, Duration::from_millis(250));
        assert_eq!(config.run.tree.directory_count(), 7);
        assert_eq!(config.run.tree.total_files(), 70);
        assert_eq!(config.run.max_buffer, Some(8192));
        assert_eq!(config.run.mmap_placement, MmapPlacement::Last);
        assert_eq!(
            config.paths.comms_dir,
            Some(PathBuf::from("/mnt/shared/comms"))
        );
    }

    #[test]
    fn test_invalid_tree_shape() {
        let yaml = "run:\n  subdirs_per_dir: 2000\n";
        let result = ConfigLoader::load_string(yaml);
        assert!(matches!(result, Err(FsPerfError::HardValidation(_))));

        let yaml = "run:\n  tree_depth: 9\n";
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_small_max_buffer_rejected() {
        let yaml = "run:\n  max_buffer: 100\n";
        let err = ConfigLoader::load_string(yaml).unwrap_err();
        assert!(err.to_string().contains("max_buffer"));
    }

    #[test]
    fn test_overrides() {
        let mut config = ConfigLoader::defaults().unwrap();
        let overrides = RunOverrides {
            duration_ms: Some(0),
            set_block_sizes: vec![512],
            add_block_sizes: vec![4096],
            mmap_placement: Some(MmapPlacement::First),
            ..Default::default()
        };
        ConfigLoader::apply_overrides(&mut config, overrides).unwrap();
        assert_eq!(config.run.duration, Duration::from_secs(10));
        let sizes: Vec<u64> = config.run.block_sizes.iter().map(|b| b.bytes()).collect();
        assert_eq!(sizes, vec![512, 4096]);
        assert_eq!(config.run.mmap_placement, MmapPlacement::First);
    }

    #[test]
    fn test_too_many_block_sizes() {
        let mut config = ConfigLoader::defaults().unwrap();
        let overrides = RunOverrides {
            add_block_sizes: vec![1; 9],
            ..Default::default()
        };
        let result = ConfigLoader::apply_overrides(&mut config, overrides);
        assert!(result.is_err());
    }

    #[test]
    fn test_toggle_by_name() {
        let mut selection = TestSelection::all(false);
        *selection.toggle_mut("dir-enum").unwrap() = true;
        assert!(selection.dir_enum);
        assert!(selection.toggle_mut("no-such-test").is_none());
        assert!(!selection.any_io());
    }

    #[test]
    fn test_config_not_found() {
        let result = ConfigLoader::load_file("/nonexistent/fsperf.yaml");
        assert!(matches!(result, Err(FsPerfError::ConfigNotFound { .. })));
    }
}
