// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! JSON report files.
//!
//! Each report lands in its own file named after its timestamp and run id,
//! so repeated runs never overwrite each other.

use crate::metrics::BenchmarkReport;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("Report I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to (de)serialize report: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReporterError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Writes reports into one directory.
pub struct JsonReporter {
    output_dir: PathBuf,
}

impl JsonReporter {
    /// Create the reporter, creating `output_dir` if needed.
    pub fn new(output_dir: impl AsRef<Path>) -> Result<Self, ReporterError> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir).map_err(|e| ReporterError::io(&output_dir, e))?;
        Ok(Self { output_dir })
    }

    /// Reporter writing under the crate's `data` directory.
    pub fn default_location() -> Result<Self, ReporterError> {
        Self::new(Path::new(env!("CARGO_MANIFEST_DIR")).join("data"))
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// File name a report is saved under.
    pub fn file_name(report: &BenchmarkReport) -> String {
        let run = report.run_id.simple().to_string();
        format!(
            "fsperf_{}_{}.json",
            report.timestamp.format("%Y-%m-%dT%H-%M-%SZ"),
            &run[..8]
        )
    }

    /// Save `report` and return the path written.
    pub fn save(&self, report: &BenchmarkReport) -> Result<PathBuf, ReporterError> {
        let path = self.output_dir.join(Self::file_name(report));
        let file = File::create(&path).map_err(|e| ReporterError::io(&path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, report)?;
        writer.flush().map_err(|e| ReporterError::io(&path, e))?;
        Ok(path)
    }

    /// All report files in the output directory, oldest first.
    pub fn list_reports(&self) -> Result<Vec<PathBuf>, ReporterError> {
        let entries = fs::read_dir(&self.output_dir).map_err(|e| ReporterError::io(&self.output_dir, e))?;
        let mut reports = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| ReporterError::io(&self.output_dir, e))?.path();
            let is_report = path.extension().is_some_and(|e| e == "json")
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("fsperf_"));
            if is_report {
                reports.push(path);
            }
        }
        reports.sort();
        Ok(reports)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<BenchmarkReport, ReporterError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| ReporterError::io(path, e))?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{BenchmarkCategory, BenchmarkResult, SystemInfo};
    use tempfile::TempDir;

    fn report() -> BenchmarkReport {
        let mut report = BenchmarkReport::new(SystemInfo::collect());
        report.add_result(BenchmarkResult::latency(
            "fill 4KB",
            BenchmarkCategory::Pattern,
            vec![100, 200, 300],
        ));
        report
    }

    #[test]
    fn test_reporter_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let reporter = JsonReporter::new(temp_dir.path().join("data")).unwrap();

        let report = report();
        let path = reporter.save(&report).unwrap();
        assert!(path.exists());

        let loaded = JsonReporter::load(&path).unwrap();
        assert_eq!(loaded.run_id, report.run_id);
        assert_eq!(loaded.results.len(), 1);
        assert_eq!(loaded.results[0].name, "fill 4KB");
    }

    #[test]
    fn test_list_reports_ignores_other_files() {
        let temp_dir = TempDir::new().unwrap();
        let reporter = JsonReporter::new(temp_dir.path()).unwrap();

        // Same second, different run ids.
        reporter.save(&report()).unwrap();
        reporter.save(&report()).unwrap();
        fs::write(temp_dir.path().join("notes.json"), "{}").unwrap();
        fs::write(temp_dir.path().join("fsperf_x.txt"), "").unwrap();

        assert_eq!(reporter.list_reports().unwrap().len(), 2);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("fsperf_bad.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            JsonReporter::load(&path),
            Err(ReporterError::Serialization(_))
        ));
        assert!(matches!(
            JsonReporter::load(temp_dir.path().join("missing.json")),
            Err(ReporterError::Io { .. })
        ));
    }
}
