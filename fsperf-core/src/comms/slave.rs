// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Slave side of the remote protocol.
//!
//! The slave claims `<seq>-order.send`, runs the script line by line against
//! a fixed table of file slots, and publishes `<seq>-order.done` holding
//! `"<status>\n<message>"`. The first failing line aborts the rest of the
//! script.

use std::fs::{File, OpenOptions, Permissions};
use std::os::unix::fs::{FileExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{
    io_status, FsPerfResult, SlaveError, STATUS_HANDLE_STATE,
};
use crate::pattern::PatternSpec;
use crate::state::{SlaveState, StateMachine};
use crate::sys;
use crate::types::{HandleIndex, PatternIndex, MAX_HANDLES};

use super::script::{parse_number, script_lines, tokenize, ScriptLine};
use super::transport::{CommsTransport, MessageRole, Received, EOF_MARKER, SLAVE_PID_FILE};

/// Scratch buffer ceiling for `writepattern`.
const WRITE_CHUNK_MAX: usize = 2 * 1024 * 1024;
/// Smallest `writepattern` scratch buffer.
const WRITE_CHUNK_MIN: usize = 4096;
/// Largest `writepattern` request.
const WRITE_MAX: u64 = 1024 * 1024 * 1024;
/// Longest idle sleep between polls.
const MAX_POLL_SLEEP_MS: u64 = 128;
/// Default creation mode for `open`.
const DEFAULT_OPEN_MODE: u32 = 0o660;

/// An open file slot.
#[derive(Debug)]
struct FileSlot {
    file: File,
    name: String,
}

/// Context of the line being executed, for error messages.
struct Line<'a> {
    number: usize,
    command: &'a str,
}

impl Line<'_> {
    fn syntax(&self, message: impl Into<String>) -> SlaveError {
        SlaveError::Syntax {
            line: self.number,
            command: self.command.to_string(),
            message: message.into(),
        }
    }

    fn error(&self, status: i32, message: impl Into<String>) -> SlaveError {
        SlaveError::Execution {
            line: self.number,
            command: self.command.to_string(),
            message: message.into(),
            status,
        }
    }

    fn number(
        &self,
        arg: &str,
        name: &str,
        radix: Option<u32>,
        min: u64,
        max: u64,
    ) -> Result<u64, SlaveError> {
        parse_number(arg, name, radix, min, max).map_err(|message| self.syntax(message))
    }

    fn handle(&self, arg: &str) -> Result<HandleIndex, SlaveError> {
        let index = self.number(arg, "file index", None, 0, MAX_HANDLES as u64 - 1)?;
        HandleIndex::new(index as u32).map_err(|e| self.syntax(e.to_string()))
    }
}

type CommandHandler = fn(&mut CommsSlave, &Line<'_>, &[String]) -> Result<(), SlaveError>;

/// Commands understood by the slave.
const COMMANDS: &[(&str, CommandHandler)] = &[
    ("open", CommsSlave::cmd_open),
    ("close", CommsSlave::cmd_close),
    ("writepattern", CommsSlave::cmd_write_pattern),
    ("truncate", CommsSlave::cmd_truncate),
    ("futimes", CommsSlave::cmd_futimes),
    ("fchmod", CommsSlave::cmd_fchmod),
    ("reset", CommsSlave::cmd_reset),
    ("exit", CommsSlave::cmd_exit),
];

/// A slave instance serving one comms directory.
#[derive(Debug)]
pub struct CommsSlave {
    transport: CommsTransport,
    work_dir: PathBuf,
    write_chunk: usize,
    seq: u32,
    terminate: bool,
    exit_code: i32,
    handles: [Option<FileSlot>; MAX_HANDLES],
    state: StateMachine<SlaveState>,
}

impl CommsSlave {
    /// Create a slave. File names in scripts are relative to `work_dir`.
    pub fn new(work_dir: impl AsRef<Path>, comms_dir: impl AsRef<Path>, max_buffer: Option<u64>) -> Self {
        let write_chunk = match max_buffer {
            // 0 means unlimited, as on the command line.
            Some(0) | None => WRITE_CHUNK_MAX,
            Some(max) => (max.min(WRITE_CHUNK_MAX as u64) as usize).max(WRITE_CHUNK_MIN),
        };
        Self {
            transport: CommsTransport::new(comms_dir),
            work_dir: work_dir.as_ref().to_path_buf(),
            write_chunk,
            seq: 0,
            terminate: false,
            exit_code: 0,
            handles: Default::default(),
            state: StateMachine::new("slave", SlaveState::Idle),
        }
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn is_terminated(&self) -> bool {
        self.terminate
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Create the comms directories and announce liveness.
    pub fn start(&self) -> FsPerfResult<()> {
        self.transport.create_dirs()?;
        let marker = format!("{}{}", std::process::id(), EOF_MARKER as char);
        self.transport.write_file(SLAVE_PID_FILE, marker.as_bytes())?;
        tracing::info!(
            comms_dir = %self.transport.staging_dir().display(),
            work_dir = %self.work_dir.display(),
            "Slave started"
        );
        Ok(())
    }

    /// Serve orders until an `exit` command runs. Returns the exit code.
    pub fn run(mut self) -> FsPerfResult<i32> {
        self.start()?;

        let mut sleep_ms = 1u64;
        while !self.terminate {
            if self.poll_once()? {
                sleep_ms = 1;
            }
            if self.terminate {
                break;
            }
            std::thread::sleep(Duration::from_millis(sleep_ms));
            if sleep_ms < MAX_POLL_SLEEP_MS {
                sleep_ms += 1;
            }
        }

        self.shutdown();
        Ok(self.exit_code)
    }

    /// Remove the liveness marker and close every handle.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.transport.remove_staged(SLAVE_PID_FILE) {
            tracing::debug!(error = %e, "Failed to remove slave marker");
        }
        self.close_all();
        tracing::info!(exit_code = self.exit_code, "Slave stopped");
    }

    /// Try to claim and execute the next order. Returns whether one ran.
    pub fn poll_once(&mut self) -> FsPerfResult<bool> {
        self.state.transition_to(SlaveState::ClaimOrder)?;

        let content = match self
            .transport
            .receive_and_rename(self.seq, MessageRole::Order, MessageRole::Ack)
        {
            Ok(Received::Message(content)) => content,
            Ok(Received::TryAgain) | Ok(Received::NotFound) => {
                self.state.transition_to(SlaveState::Idle)?;
                return Ok(false);
            }
            Err(e) => {
                tracing::warn!(seq = self.seq, error = %e, "Failed to claim order");
                self.state.transition_to(SlaveState::Idle)?;
                return Ok(false);
            }
        };

        self.state.transition_to(SlaveState::Executing)?;
        tracing::debug!(seq = self.seq, bytes = content.len(), "Executing order");
        let (status, message) = match self.execute_script(&content) {
            Ok(()) => (0, String::new()),
            Err(e) => {
                tracing::debug!(seq = self.seq, error = %e, "Order failed");
                (e.status(), e.to_string())
            }
        };

        self.state.transition_to(SlaveState::PublishDone)?;
        let reply = format!("{}\n{}{}", status, message, EOF_MARKER as char);
        if let Err(e) = self
            .transport
            .publish(&MessageRole::Done.file_name(self.seq), reply.as_bytes())
        {
            tracing::error!(seq = self.seq, error = %e, "Failed to publish reply");
        }
        self.seq += 1;

        let next = if self.terminate {
            SlaveState::Terminated
        } else {
            SlaveState::Idle
        };
        self.state.transition_to(next)?;
        Ok(true)
    }

    /// Execute a script, stopping at the first failing line.
    pub fn execute_script(&mut self, content: &[u8]) -> Result<(), SlaveError> {
        let script = std::str::from_utf8(content).map_err(|e| SlaveError::InvalidEncoding {
            message: e.to_string(),
        })?;

        for line in script_lines(script) {
            self.execute_line(line)?;
        }
        Ok(())
    }

    fn execute_line(&mut self, line: ScriptLine<'_>) -> Result<(), SlaveError> {
        let args = tokenize(line.text).map_err(|e| SlaveError::ParseLine {
            line: line.number,
            message: e.to_string(),
        })?;
        let Some((command, args)) = args.split_first() else {
            return Err(SlaveError::NoCommand { line: line.number });
        };

        let Some((_, handler)) = COMMANDS.iter().find(|(name, _)| name == command) else {
            return Err(SlaveError::UnknownCommand {
                line: line.number,
                text: line.text.to_string(),
            });
        };

        let ctx = Line {
            number: line.number,
            command,
        };
        handler(self, &ctx, args)
    }

    fn slot(&mut self, line: &Line<'_>, index: HandleIndex) -> Result<&mut FileSlot, SlaveError> {
        self.handles[index.slot()]
            .as_mut()
            .ok_or_else(|| line.error(STATUS_HANDLE_STATE, format!("no open file at index #{}", index)))
    }

    fn close_all(&mut self) {
        for slot in self.handles.iter_mut() {
            *slot = None;
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// `open <idx> <file> <access> <disposition> [sharing] [mode]`
    fn cmd_open(&mut self, line: &Line<'_>, args: &[String]) -> Result<(), SlaveError> {
        if !(4..=6).contains(&args.len()) {
            return Err(line.syntax(format!("takes four to six arguments, not {}", args.len())));
        }
        let index = line.handle(&args[0])?;
        let filename = &args[1];
        let sharing = args.get(4).map(String::as_str).unwrap_or("");
        let mut options = open_options(&args[2], &args[3], sharing).ok_or_else(|| {
            line.syntax(format!(
                "failed to parse access ({}), disposition ({}) and sharing ({})",
                args[2], args[3], sharing
            ))
        })?;
        let mode = match args.get(5) {
            Some(arg) => line.number(arg, "mode", Some(8), 0, 0o777)? as u32,
            None => DEFAULT_OPEN_MODE,
        };

        if let Some(existing) = &self.handles[index.slot()] {
            return Err(line.error(
                STATUS_HANDLE_STATE,
                format!("handle #{} is already in use for '{}'", index, existing.name),
            ));
        }

        let path = self.work_dir.join(filename);
        let file = options
            .mode(mode)
            .open(&path)
            .map_err(|e| line.error(io_status(&e), format!("{}: {}", filename, e)))?;

        tracing::debug!(index = %index, path = %path.display(), "Opened file");
        self.handles[index.slot()] = Some(FileSlot {
            file,
            name: filename.clone(),
        });
        Ok(())
    }

    /// `close <idx>`
    fn cmd_close(&mut self, line: &Line<'_>, args: &[String]) -> Result<(), SlaveError> {
        if args.len() != 1 {
            return Err(line.syntax(format!("takes exactly one argument, not {}", args.len())));
        }
        let index = line.handle(&args[0])?;
        if self.handles[index.slot()].take().is_none() {
            return Err(line.error(STATUS_HANDLE_STATE, format!("no open file at index #{}", index)));
        }
        Ok(())
    }

    /// `writepattern <idx> <offset> <pattern> <bytes>`
    fn cmd_write_pattern(&mut self, line: &Line<'_>, args: &[String]) -> Result<(), SlaveError> {
        if args.len() != 4 {
            return Err(line.syntax(format!("takes exactly four arguments, not {}", args.len())));
        }
        let index = line.handle(&args[0])?;
        let offset = line.number(&args[1], "file offset", None, 0, u64::MAX / 4)?;
        let pattern = line.number(
            &args[2],
            "pattern index",
            None,
            0,
            PatternIndex::COUNT as u64 - 1,
        )?;
        let pattern = PatternIndex::new(pattern as u32).map_err(|e| line.syntax(e.to_string()))?;
        let length = line.number(&args[3], "number of bytes to write", None, 0, WRITE_MAX)?;

        let chunk = self.write_chunk;
        let slot = self.slot(line, index)?;
        let pattern = PatternSpec::get(pattern);

        let chunk_len = if length < chunk as u64 {
            ((length as usize + 511) & !511).max(512)
        } else {
            chunk
        };
        let mut buf = vec![0u8; chunk_len];
        if let Some(byte) = pattern.single_byte() {
            buf.fill(byte);
        }

        let mut written = 0u64;
        while written < length {
            let n = (length - written).min(chunk_len as u64) as usize;
            if pattern.single_byte().is_none() {
                for (i, b) in buf[..n].iter_mut().enumerate() {
                    *b = pattern.byte_at(written + i as u64);
                }
            }
            let at = offset + written;
            slot.file.write_all_at(&buf[..n], at).map_err(|e| {
                line.error(
                    io_status(&e),
                    format!(
                        "error writing {:#x} bytes at {:#x}: {} (file: {})",
                        n, at, e, slot.name
                    ),
                )
            })?;
            written += n as u64;
        }
        Ok(())
    }

    /// `truncate <idx> <size>`
    fn cmd_truncate(&mut self, line: &Line<'_>, args: &[String]) -> Result<(), SlaveError> {
        if args.len() != 2 {
            return Err(line.syntax(format!("takes exactly two arguments, not {}", args.len())));
        }
        let index = line.handle(&args[0])?;
        let size = line.number(&args[1], "new file size", None, 0, u64::MAX / 4)?;
        let slot = self.slot(line, index)?;
        slot.file.set_len(size).map_err(|e| {
            line.error(
                io_status(&e),
                format!(
                    "failed to set file size to {:#x}: {} (file: {})",
                    size, e, slot.name
                ),
            )
        })
    }

    /// `futimes <idx> <mtime> [atime] [ctime] [btime]`, nanoseconds since the
    /// epoch; zero leaves a time unchanged. Change and birth times cannot be
    /// set on POSIX and are only validated.
    fn cmd_futimes(&mut self, line: &Line<'_>, args: &[String]) -> Result<(), SlaveError> {
        if !(2..=5).contains(&args.len()) {
            return Err(line.syntax(format!(
                "takes between two and five arguments, not {}",
                args.len()
            )));
        }
        let index = line.handle(&args[0])?;
        let mtime = line.number(&args[1], "modified time", None, 0, u64::MAX)?;
        let atime = match args.get(2) {
            Some(arg) => line.number(arg, "access time", None, 0, u64::MAX)?,
            None => 0,
        };
        if let Some(arg) = args.get(3) {
            line.number(arg, "change time", None, 0, u64::MAX)?;
        }
        if let Some(arg) = args.get(4) {
            line.number(arg, "birth time", None, 0, u64::MAX)?;
        }

        let slot = self.slot(line, index)?;
        let nonzero = |ns: u64| (ns != 0).then_some(ns);
        sys::set_file_times(&slot.file, nonzero(atime), nonzero(mtime)).map_err(|e| {
            line.error(
                io_status(&e),
                format!(
                    "failed to set file times to {}, {}: {} (file: {})",
                    mtime, atime, e, slot.name
                ),
            )
        })
    }

    /// `fchmod <idx> <mode>`
    fn cmd_fchmod(&mut self, line: &Line<'_>, args: &[String]) -> Result<(), SlaveError> {
        if args.len() != 2 {
            return Err(line.syntax(format!("takes exactly two arguments, not {}", args.len())));
        }
        let index = line.handle(&args[0])?;
        let mode = line.number(&args[1], "new file attributes", None, 0, u64::from(u32::MAX))? as u32;
        let slot = self.slot(line, index)?;
        slot.file
            .set_permissions(Permissions::from_mode(mode & 0o7777))
            .map_err(|e| {
                line.error(
                    io_status(&e),
                    format!(
                        "failed to set file mode to {:#x}: {} (file: {})",
                        mode, e, slot.name
                    ),
                )
            })
    }

    /// `reset`
    fn cmd_reset(&mut self, line: &Line<'_>, args: &[String]) -> Result<(), SlaveError> {
        if !args.is_empty() {
            return Err(line.syntax(format!("takes zero arguments, not {}", args.len())));
        }
        self.close_all();
        Ok(())
    }

    /// `exit [code]`
    fn cmd_exit(&mut self, line: &Line<'_>, args: &[String]) -> Result<(), SlaveError> {
        if args.len() > 1 {
            return Err(line.syntax(format!("takes zero or one argument, not {}", args.len())));
        }
        let code = match args.first() {
            Some(arg) => line.number(arg, "exit code", None, 0, 127)? as i32,
            None => 0,
        };
        self.exit_code = code;
        self.terminate = true;
        Ok(())
    }
}

/// Translate protocol access, disposition and sharing strings into open
/// options. Sharing modes have no POSIX equivalent and are only validated.
fn open_options(access: &str, disposition: &str, sharing: &str) -> Option<OpenOptions> {
    let mut options = OpenOptions::new();
    match access {
        "r" => options.read(true),
        "w" => options.write(true),
        "rw" | "wr" => options.read(true).write(true),
        "a" => options.append(true),
        "ra" | "ar" => options.read(true).append(true),
        _ => return None,
    };
    match disposition {
        // Open existing.
        "oe" => &mut options,
        // Open or create.
        "oa" | "oc" => options.create(true),
        // Open existing and truncate.
        "ot" => options.truncate(true),
        // Create or replace.
        "ca" => options.create(true).truncate(true),
        // Create new, failing if it exists.
        "ce" => options.create_new(true),
        _ => return None,
    };
    if !sharing.chars().all(|c| matches!(c, 'n' | 'r' | 'w' | 'd' | '-')) {
        return None;
    }
    // Truncation needs write access.
    if matches!(disposition, "ot" | "ca") && access == "r" {
        return None;
    }
    Some(options)
}
