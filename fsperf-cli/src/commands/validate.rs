// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `fsperf validate` command - Validate configuration file.

use std::path::Path;

use fsperf_core::ConfigLoader;

use super::CliError;

pub fn execute(file: &Path) -> Result<u8, CliError> {
    tracing::info!(file = %file.display(), "Validating configuration");

    let config = ConfigLoader::load_file(file)?;
    let run = &config.run;

    println!("✓ Configuration is valid");
    println!();
    println!("Run Settings:");
    println!("  Duration:           {}ms", run.duration.as_millis());
    println!("  Many Files:         {}", run.many_files);
    println!(
        "  Tree:               {} files/dir, {} subdirs/dir, depth {} ({} files)",
        run.tree.files_per_dir,
        run.tree.subdirs_per_dir,
        run.tree.depth,
        run.tree.total_files()
    );
    println!("  I/O File Size:      {} bytes", run.io_file_size);
    let blocks: Vec<String> = run.block_sizes.iter().map(ToString::to_string).collect();
    println!("  Block Sizes:        {}", blocks.join(", "));
    match run.max_buffer {
        Some(max) => println!("  Max Buffer:         {} bytes", max),
        None => println!("  Max Buffer:         unlimited"),
    }
    println!("  mmap Placement:     {:?}", run.mmap_placement);
    println!();
    println!("Directories:");
    println!("  Test Directory:     {}", config.paths.test_dir.display());
    match &config.paths.comms_dir {
        Some(dir) => println!("  Comms Directory:    {}", dir.display()),
        None => println!("  Comms Directory:    (none, remote tests skipped)"),
    }
    println!();
    println!("Test Areas:");
    match serde_json::to_value(&config.tests) {
        Ok(serde_json::Value::Object(tests)) => {
            for (name, enabled) in tests {
                let mark = if enabled.as_bool() == Some(true) { "✓" } else { "-" };
                println!("  {} {}", mark, name.replace('_', "-"));
            }
        }
        _ => println!("  {:?}", config.tests),
    }
    Ok(0)
}
