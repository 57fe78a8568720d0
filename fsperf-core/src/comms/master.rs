// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Master side of the remote protocol.

use std::time::{Duration, Instant};

use crate::error::{CommsError, FsPerfResult};
use crate::state::{MasterState, StateMachine};

use super::transport::{CommsTransport, MessageRole, Received, EOF_MARKER, SLAVE_PID_FILE};

/// How long `send` waits for a done-file.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a script as reported by the slave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutcome {
    /// Zero on success.
    pub status: i32,
    /// Error text; empty on success.
    pub message: String,
}

impl ScriptOutcome {
    pub fn is_success(&self) -> bool {
        self.status == 0
    }

    /// Parse a done-file body (EOF marker already removed).
    pub fn parse(reply: &[u8]) -> Result<Self, CommsError> {
        let text = String::from_utf8_lossy(reply);
        let (status, message) = match text.split_once('\n') {
            Some((status, message)) => (status, message),
            None => (text.as_ref(), ""),
        };
        let status = status
            .trim()
            .parse::<i32>()
            .map_err(|_| CommsError::MalformedReply {
                reply: text.to_string(),
            })?;
        Ok(Self {
            status,
            message: message.trim_end_matches(EOF_MARKER as char).to_string(),
        })
    }
}

/// Sends scripts to a slave over a comms directory.
#[derive(Debug)]
pub struct CommsMaster {
    transport: CommsTransport,
    seq: u32,
    timeout: Duration,
    state: StateMachine<MasterState>,
    shut_down: bool,
}

impl CommsMaster {
    pub fn new(comms_dir: impl AsRef<std::path::Path>) -> Self {
        Self {
            transport: CommsTransport::new(comms_dir),
            seq: 0,
            timeout: DEFAULT_TIMEOUT,
            state: StateMachine::new("master", MasterState::Idle),
            shut_down: false,
        }
    }

    /// Override the reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Next sequence number to be used.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn transport(&self) -> &CommsTransport {
        &self.transport
    }

    /// Whether the slave's liveness marker is present.
    pub fn is_connected(&self) -> bool {
        self.transport.staged_exists(SLAVE_PID_FILE)
    }

    /// Append the EOF marker to `body` and send it.
    pub fn send_script(&mut self, body: &str) -> FsPerfResult<ScriptOutcome> {
        let mut script = Vec::with_capacity(body.len() + 1);
        script.extend_from_slice(body.as_bytes());
        script.push(EOF_MARKER);
        self.send(&script)
    }

    /// Send a script (which must end with the EOF marker) and wait for the
    /// slave's reply.
    pub fn send(&mut self, script: &[u8]) -> FsPerfResult<ScriptOutcome> {
        if script.last() != Some(&EOF_MARKER) {
            return Err(CommsError::MissingTerminator.into());
        }
        if !self.is_connected() {
            return Err(CommsError::NotConnected {
                marker: self.transport.staging_path(SLAVE_PID_FILE),
            }
            .into());
        }

        self.state.transition_to(MasterState::Sent)?;
        let seq = self.seq;
        let order = MessageRole::Order.file_name(seq);
        if let Err(e) = self.transport.publish(&order, script) {
            self.state.transition_to(MasterState::Idle)?;
            return Err(e.into());
        }
        self.seq += 1;
        self.state.transition_to(MasterState::WaitingForDone)?;
        tracing::debug!(seq = seq, bytes = script.len(), "Sent order");

        let start = Instant::now();
        let mut sleep_x4 = 4u64;
        loop {
            match self.transport.receive(seq, MessageRole::Done) {
                Ok(Received::Message(reply)) => {
                    self.state.transition_to(MasterState::Completed)?;
                    let _ = self
                        .transport
                        .remove_delivered(&MessageRole::Done.file_name(seq));
                    self.state.transition_to(MasterState::Idle)?;
                    let outcome = ScriptOutcome::parse(&reply)?;
                    tracing::debug!(seq = seq, status = outcome.status, "Order done");
                    return Ok(outcome);
                }
                // A half-written reply means the slave is making progress.
                Ok(Received::TryAgain) => sleep_x4 = 4,
                Ok(Received::NotFound) => {}
                Err(e) => {
                    self.state.transition_to(MasterState::Idle)?;
                    return Err(e.into());
                }
            }

            if start.elapsed() >= self.timeout {
                return Err(self.cancel(seq, &order)?.into());
            }

            sleep_x4 += 1;
            std::thread::sleep(Duration::from_millis(sleep_x4 / 4));
        }
    }

    /// Withdraw an unanswered order and classify the timeout.
    fn cancel(&mut self, seq: u32, order: &str) -> FsPerfResult<CommsError> {
        let err = match self.transport.remove_delivered(order) {
            Ok(()) => {
                // Never claimed; the sequence number is reissued.
                self.seq -= 1;
                self.state.transition_to(MasterState::TimedOut)?;
                CommsError::Timeout { seq }
            }
            Err(_) if self.transport.staged_exists(&MessageRole::Ack.file_name(seq)) => {
                self.state.transition_to(MasterState::Busy)?;
                CommsError::Busy { seq }
            }
            Err(source) => CommsError::Io {
                context: "cancelling order",
                path: self.transport.delivery_path(order),
                source,
            },
        };
        tracing::warn!(seq = seq, error = %err, "Order timed out");
        self.state.transition_to(MasterState::Idle)?;
        Ok(err)
    }

    /// Tell the slave to exit and remove the comms directory. Only the
    /// first call does anything.
    pub fn shutdown_slave(&mut self) -> FsPerfResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        let result = self.send_script("exit");
        if let Err(e) = self.transport.remove_all() {
            tracing::warn!(error = %e, "Failed to remove comms directory");
        }
        result.map(|outcome| {
            tracing::info!(status = outcome.status, "Slave shut down");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FsPerfError;
    use tempfile::TempDir;

    fn connected_master(timeout: Duration) -> (TempDir, CommsMaster) {
        let dir = TempDir::new().unwrap();
        let master = CommsMaster::new(dir.path()).with_timeout(timeout);
        master.transport().create_dirs().unwrap();
        master
            .transport()
            .write_file(SLAVE_PID_FILE, b"1\x1a")
            .unwrap();
        (dir, master)
    }

    #[test]
    fn test_parse_outcome() {
        let ok = ScriptOutcome::parse(b"0\n").unwrap();
        assert!(ok.is_success());
        assert!(ok.message.is_empty());

        let failed = ScriptOutcome::parse(b"-2\nline 1: close: syntax error: x").unwrap();
        assert_eq!(failed.status, -2);
        assert_eq!(failed.message, "line 1: close: syntax error: x");

        assert_eq!(ScriptOutcome::parse(b"17").unwrap().status, 17);
        assert!(ScriptOutcome::parse(b"oops\n").is_err());
    }

    #[test]
    fn test_send_requires_terminator() {
        let (_dir, mut master) = connected_master(DEFAULT_TIMEOUT);
        let result = master.send(b"reset\n");
        assert!(matches!(
            result,
            Err(FsPerfError::Comms(CommsError::MissingTerminator))
        ));
    }

    #[test]
    fn test_send_requires_slave() {
        let dir = TempDir::new().unwrap();
        let mut master = CommsMaster::new(dir.path());
        let result = master.send_script("reset");
        assert!(matches!(
            result,
            Err(FsPerfError::Comms(CommsError::NotConnected { .. }))
        ));
        assert_eq!(master.seq(), 0);
    }

    #[test]
    fn test_timeout_cancels_unclaimed_order() {
        let (_dir, mut master) = connected_master(Duration::from_millis(50));
        let result = master.send_script("reset");
        assert!(matches!(
            result,
            Err(FsPerfError::Comms(CommsError::Timeout { seq: 0 }))
        ));
        // Sequence number is reissued and the order withdrawn.
        assert_eq!(master.seq(), 0);
        assert!(!master.transport().delivery_path("0-order.send").exists());
    }

    #[test]
    fn test_timeout_after_claim_is_busy() {
        let (_dir, mut master) = connected_master(Duration::from_millis(200));
        let transport = master.transport().clone();
        let claimer = std::thread::spawn(move || loop {
            if let Ok(Received::Message(_)) =
                transport.receive_and_rename(0, MessageRole::Order, MessageRole::Ack)
            {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        });

        let result = master.send_script("reset");
        claimer.join().unwrap();
        assert!(matches!(
            result,
            Err(FsPerfError::Comms(CommsError::Busy { seq: 0 }))
        ));
        assert_eq!(master.seq(), 1);
    }

    #[test]
    fn test_reply_is_returned() {
        let (_dir, mut master) = connected_master(Duration::from_secs(5));
        let transport = master.transport().clone();
        let responder = std::thread::spawn(move || loop {
            if let Ok(Received::Message(script)) =
                transport.receive_and_rename(0, MessageRole::Order, MessageRole::Ack)
            {
                assert_eq!(script, b"reset");
                transport.publish("0-order.done", b"3\nbad things\x1a").unwrap();
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        });

        let outcome = master.send_script("reset").unwrap();
        responder.join().unwrap();
        assert_eq!(outcome.status, 3);
        assert_eq!(outcome.message, "bad things");
        assert_eq!(master.seq(), 1);
    }
}
