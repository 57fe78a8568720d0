// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Master/slave remote command protocol over a shared directory.
//!
//! There is no socket between the two sides; every exchange is built from
//! create, rename and delete operations on the comms directory.

pub mod master;
pub mod script;
pub mod slave;
pub mod transport;

pub use master::{CommsMaster, ScriptOutcome, DEFAULT_TIMEOUT};
pub use slave::CommsSlave;
pub use transport::{CommsTransport, MessageRole, Received, EOF_MARKER, SLAVE_PID_FILE};
