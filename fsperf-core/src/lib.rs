//! fsperf Core Library
//!
//! Filesystem correctness and performance harness. Provides the offset
//! pattern oracle, the adaptive profiler, the shared-directory master/slave
//! protocol and the test suite that ties them together.

pub mod comms;
pub mod config;
pub mod error;
pub mod pattern;
pub mod profiler;
pub mod report;
pub mod state;
pub mod suite;
pub mod sys;
pub mod types;

// Re-export commonly used types
pub use comms::{CommsMaster, CommsSlave, ScriptOutcome};
pub use config::{Config, ConfigLoader, RunConfig, RunOverrides, TestSelection};
pub use error::{CommsError, FsPerfError, FsPerfResult, HardValidationError, SlaveError};
pub use pattern::{PatternBuffer, PatternSpec, VerifyReport};
pub use profiler::{AdaptiveProfiler, ClockCalibration, Measurement};
pub use report::{RunSummary, TestReport, Unit};
pub use state::{MasterState, SlaveState, StateMachine};
pub use suite::run_all;
pub use types::{BlockSize, HandleIndex, PatternIndex};
