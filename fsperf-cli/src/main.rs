// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! fsperf CLI
//!
//! Command-line front end for the fsperf filesystem harness.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use fsperf_core::config::MmapPlacement;

mod commands;

/// fsperf - filesystem correctness and performance harness
#[derive(Parser)]
#[command(name = "fsperf")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (YAML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the test suite against a fresh test directory
    Run(RunArgs),

    /// Serve scripts from a master over a comms directory
    Slave {
        /// Directory that script file names are relative to
        #[arg(short, long)]
        dir: PathBuf,

        /// Shared comms directory
        #[arg(long)]
        comms_dir: PathBuf,

        /// Cap on the write buffer, 0 for unlimited
        #[arg(long, value_parser = commands::parse_size)]
        max_buffer_size: Option<u64>,
    },

    /// Validate a configuration file and print the resolved settings
    Validate {
        /// Path to the configuration file
        file: PathBuf,
    },
}

/// Options of `fsperf run`. Anything given here overrides the config file.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Enable test areas (many-files, open, ..., remote); repeatable or comma separated
    #[arg(long, value_name = "AREA", value_delimiter = ',')]
    pub enable: Vec<String>,

    /// Disable test areas; applied after --enable
    #[arg(long, value_name = "AREA", value_delimiter = ',')]
    pub disable: Vec<String>,

    /// Enable every test area before applying --enable/--disable
    #[arg(long, conflicts_with = "disable_all")]
    pub enable_all: bool,

    /// Disable every test area before applying --enable/--disable
    #[arg(long)]
    pub disable_all: bool,

    /// Run even when the file cannot be opened without caching
    #[arg(long)]
    pub ignore_no_cache: bool,

    /// Also report the raw duration of each measurement
    #[arg(long)]
    pub show_duration: bool,

    /// Also report the iteration count of each measurement
    #[arg(long)]
    pub show_iterations: bool,

    /// Target duration of each measurement in seconds, 0 for the default
    #[arg(long, conflicts_with = "milliseconds")]
    pub seconds: Option<u64>,

    /// Target duration of each measurement in milliseconds, 0 for the default
    #[arg(long)]
    pub milliseconds: Option<u64>,

    /// Number of files in the flat many-files directory, 0 disables it
    #[arg(long)]
    pub many_files: Option<u32>,

    /// Files per directory of the many-files tree
    #[arg(long)]
    pub files_per_dir: Option<u32>,

    /// Subdirectories per directory of the many-files tree
    #[arg(long)]
    pub subdirs_per_dir: Option<u32>,

    /// Depth of the many-files tree
    #[arg(long)]
    pub tree_depth: Option<u32>,

    /// Cap on I/O buffers (K/M/G suffixes accepted), 0 for unlimited
    #[arg(long, value_parser = commands::parse_size)]
    pub max_buffer_size: Option<u64>,

    /// Size of the shared I/O file, 0 for the default
    #[arg(long, value_parser = commands::parse_size)]
    pub io_file_size: Option<u64>,

    /// Replace the block size list; repeatable
    #[arg(long, value_parser = commands::parse_size)]
    pub set_block_size: Vec<u64>,

    /// Add to the block size list; repeatable
    #[arg(long, value_parser = commands::parse_size)]
    pub add_block_size: Vec<u64>,

    /// When the mmap area runs: first, between (default) or last
    #[arg(long)]
    pub mmap_placement: Option<MmapPlacement>,

    /// Test directory, which must not exist yet
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Use --dir as given instead of making it absolute
    #[arg(long)]
    pub relative_dir: bool,

    /// Shared comms directory of a running slave
    #[arg(long)]
    pub comms_dir: Option<PathBuf>,

    /// Directory to write a JSON summary into
    #[arg(long)]
    pub json_out: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    // Dispatch to command handlers
    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(cli.config.as_deref(), args),
        Commands::Slave {
            dir,
            comms_dir,
            max_buffer_size,
        } => commands::slave::execute(&dir, &comms_dir, max_buffer_size),
        Commands::Validate { file } => commands::validate::execute(&file),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("✗ {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
