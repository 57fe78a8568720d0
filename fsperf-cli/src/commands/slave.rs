// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `fsperf slave` command - Serve scripts from a master.

use std::path::Path;

use fsperf_core::CommsSlave;

use super::CliError;

pub fn execute(dir: &Path, comms_dir: &Path, max_buffer: Option<u64>) -> Result<u8, CliError> {
    tracing::info!(
        dir = %dir.display(),
        comms_dir = %comms_dir.display(),
        "Starting slave"
    );

    let max_buffer = max_buffer.filter(|&max| max > 0);
    let code = CommsSlave::new(dir, comms_dir, max_buffer).run()?;

    tracing::info!(exit_code = code, "Slave finished");
    // Exit statuses are 8 bits wide.
    Ok(code as u8)
}
