// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shared-directory message transport.
//!
//! Layout under the comms directory:
//!
//! ```text
//! <comms>/slave.pid            liveness marker written by the slave
//! <comms>/<seq>-order.ack      order claimed by the slave
//! <comms>/*.tmp                messages being written
//! <comms>/comms/<seq>-order.send
//! <comms>/comms/<seq>-order.done
//! ```
//!
//! Messages are written to a unique temporary file in the staging directory
//! and renamed into the delivery directory, so a reader sees either nothing
//! or a complete message ending with [`EOF_MARKER`].

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::CommsError;

/// Terminates every message.
pub const EOF_MARKER: u8 = 0x1a;
/// Largest message a reader accepts.
pub const MAX_MESSAGE_SIZE: u64 = 1024 * 1024;
/// Delivery subdirectory name.
pub const DELIVERY_SUBDIR: &str = "comms";
/// Liveness marker written by the slave into the staging directory.
pub const SLAVE_PID_FILE: &str = "slave.pid";

/// Logical message role, encoded as a file name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    /// Script sent by the master.
    Order,
    /// Order claimed by the slave.
    Ack,
    /// Result published by the slave.
    Done,
}

impl MessageRole {
    pub const fn suffix(&self) -> &'static str {
        match self {
            Self::Order => "-order.send",
            Self::Ack => "-order.ack",
            Self::Done => "-order.done",
        }
    }

    /// File name for sequence number `seq`.
    pub fn file_name(&self, seq: u32) -> String {
        format!("{}{}", seq, self.suffix())
    }
}

/// Outcome of a receive attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// Complete message, without the trailing EOF marker.
    Message(Vec<u8>),
    /// File exists but is not terminated yet.
    TryAgain,
    /// No such message.
    NotFound,
}

/// Atomic publish/receive over a comms directory.
#[derive(Debug, Clone)]
pub struct CommsTransport {
    staging: PathBuf,
    delivery: PathBuf,
}

impl CommsTransport {
    pub fn new(comms_dir: impl AsRef<Path>) -> Self {
        let staging = comms_dir.as_ref().to_path_buf();
        let delivery = staging.join(DELIVERY_SUBDIR);
        Self { staging, delivery }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    pub fn delivery_dir(&self) -> &Path {
        &self.delivery
    }

    pub fn staging_path(&self, name: &str) -> PathBuf {
        self.staging.join(name)
    }

    pub fn delivery_path(&self, name: &str) -> PathBuf {
        self.delivery.join(name)
    }

    /// Create the staging and delivery directories.
    pub fn create_dirs(&self) -> Result<(), CommsError> {
        use std::os::unix::fs::DirBuilderExt;

        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o775)
            .create(&self.delivery)
            .map_err(|source| CommsError::Io {
                context: "creating comms directory",
                path: self.delivery.clone(),
                source,
            })
    }

    /// Write `content` to `name` in the staging directory, replacing any
    /// existing file. The file is removed again if writing fails.
    pub fn write_file(&self, name: &str, content: &[u8]) -> Result<(), CommsError> {
        Self::write_path(&self.staging.join(name), content)
    }

    fn write_path(path: &Path, content: &[u8]) -> Result<(), CommsError> {
        let result = File::create(path).and_then(|mut file| file.write_all(content));
        if let Err(source) = result {
            let _ = fs::remove_file(path);
            return Err(CommsError::Io {
                context: "writing",
                path: path.to_path_buf(),
                source,
            });
        }
        Ok(())
    }

    /// Atomically publish `content` under `name` in the delivery directory.
    pub fn publish(&self, name: &str, content: &[u8]) -> Result<(), CommsError> {
        let temp = self
            .staging
            .join(format!("{}.{}.tmp", name, uuid::Uuid::new_v4().simple()));
        Self::write_path(&temp, content)?;

        let target = self.delivery.join(name);
        if let Err(source) = fs::rename(&temp, &target) {
            let _ = fs::remove_file(&temp);
            return Err(CommsError::Io {
                context: "renaming into",
                path: target,
                source,
            });
        }

        tracing::trace!(name = %name, bytes = content.len(), "Published message");
        Ok(())
    }

    /// Try to read message `seq` with the given role from the delivery
    /// directory.
    pub fn receive(&self, seq: u32, role: MessageRole) -> Result<Received, CommsError> {
        let path = self.delivery.join(role.file_name(seq));
        Self::read_message(&path)
    }

    fn read_message(path: &Path) -> Result<Received, CommsError> {
        let io_err = |context, source| CommsError::Io {
            context,
            path: path.to_path_buf(),
            source,
        };

        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Received::NotFound),
            Err(e) => return Err(io_err("opening", e)),
        };

        let size = file.metadata().map_err(|e| io_err("querying", e))?.len();
        if size > MAX_MESSAGE_SIZE {
            return Err(CommsError::FileTooBig {
                path: path.to_path_buf(),
                size,
                max: MAX_MESSAGE_SIZE,
            });
        }

        let mut content = Vec::with_capacity(size as usize);
        Read::by_ref(&mut file)
            .take(MAX_MESSAGE_SIZE + 1)
            .read_to_end(&mut content)
            .map_err(|e| io_err("reading", e))?;
        if content.len() as u64 > MAX_MESSAGE_SIZE {
            return Err(CommsError::FileTooBig {
                path: path.to_path_buf(),
                size: content.len() as u64,
                max: MAX_MESSAGE_SIZE,
            });
        }

        match content.last() {
            Some(&EOF_MARKER) => {
                content.pop();
                Ok(Received::Message(content))
            }
            _ => Ok(Received::TryAgain),
        }
    }

    /// Receive message `seq` and, if complete, rename it out of the delivery
    /// directory into the staging directory under `claimed` role.
    pub fn receive_and_rename(
        &self,
        seq: u32,
        role: MessageRole,
        claimed: MessageRole,
    ) -> Result<Received, CommsError> {
        let received = self.receive(seq, role)?;
        if let Received::Message(_) = received {
            let from = self.delivery.join(role.file_name(seq));
            let to = self.staging.join(claimed.file_name(seq));
            fs::rename(&from, &to).map_err(|source| CommsError::Io {
                context: "claiming",
                path: from,
                source,
            })?;
        }
        Ok(received)
    }

    /// Remove a message from the delivery directory.
    pub fn remove_delivered(&self, name: &str) -> io::Result<()> {
        fs::remove_file(self.delivery.join(name))
    }

    /// Remove a file from the staging directory.
    pub fn remove_staged(&self, name: &str) -> io::Result<()> {
        fs::remove_file(self.staging.join(name))
    }

    pub fn staged_exists(&self, name: &str) -> bool {
        self.staging.join(name).exists()
    }

    /// Remove the whole comms directory.
    pub fn remove_all(&self) -> io::Result<()> {
        fs::remove_dir_all(&self.staging)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn transport() -> (TempDir, CommsTransport) {
        let dir = TempDir::new().unwrap();
        let transport = CommsTransport::new(dir.path());
        transport.create_dirs().unwrap();
        (dir, transport)
    }

    #[test]
    fn test_publish_then_receive() {
        let (_dir, t) = transport();
        t.publish("0-order.send", b"reset\n\x1a").unwrap();

        let received = t.receive(0, MessageRole::Order).unwrap();
        assert_eq!(received, Received::Message(b"reset\n".to_vec()));

        // No leftovers in staging.
        let leftovers: Vec<_> = fs::read_dir(t.staging_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "tmp").unwrap_or(false))
            .collect();
        assert!(leftovers.is_empty());
    }

    /// A reader polling while a writer keeps replacing the same large
    /// message only ever sees a complete one.
    #[test]
    fn test_concurrent_reader_never_sees_partial_message() {
        use std::sync::atomic::{AtomicBool, Ordering};

        const BODY_LEN: usize = 512 * 1024;
        const ROUNDS: u8 = 40;

        let (_dir, t) = transport();
        let name = MessageRole::Order.file_name(5);
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for round in 0..ROUNDS {
                    let mut message = vec![round; BODY_LEN];
                    message.push(EOF_MARKER);
                    t.publish(&name, &message).unwrap();
                }
                done.store(true, Ordering::Release);
            });

            let mut complete = 0u32;
            loop {
                let finished = done.load(Ordering::Acquire);
                match t.receive(5, MessageRole::Order).unwrap() {
                    Received::Message(body) => {
                        assert_eq!(body.len(), BODY_LEN);
                        let first = body[0];
                        assert!(first < ROUNDS);
                        assert!(body.iter().all(|&b| b == first), "mixed message content");
                        complete += 1;
                    }
                    Received::TryAgain => panic!("observed a partially written message"),
                    Received::NotFound => assert!(!finished, "published message vanished"),
                }
                if finished {
                    break;
                }
            }
            assert!(complete > 0);
        });

        // Every temporary file was renamed away.
        let leftovers = fs::read_dir(t.staging_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_receive_missing_and_unterminated() {
        let (_dir, t) = transport();
        assert_eq!(t.receive(5, MessageRole::Done).unwrap(), Received::NotFound);

        fs::write(t.delivery_path("5-order.done"), b"0\npartial").unwrap();
        assert_eq!(t.receive(5, MessageRole::Done).unwrap(), Received::TryAgain);

        fs::write(t.delivery_path("6-order.done"), b"").unwrap();
        assert_eq!(t.receive(6, MessageRole::Done).unwrap(), Received::TryAgain);
    }

    #[test]
    fn test_receive_too_big() {
        let (_dir, t) = transport();
        let big = vec![b'x'; MAX_MESSAGE_SIZE as usize + 10];
        fs::write(t.delivery_path("1-order.send"), &big).unwrap();
        let result = t.receive(1, MessageRole::Order);
        assert!(matches!(result, Err(CommsError::FileTooBig { .. })));
    }

    #[test]
    fn test_receive_and_rename_claims() {
        let (_dir, t) = transport();
        t.publish("3-order.send", b"exit\x1a").unwrap();

        let received = t
            .receive_and_rename(3, MessageRole::Order, MessageRole::Ack)
            .unwrap();
        assert_eq!(received, Received::Message(b"exit".to_vec()));
        assert!(!t.delivery_path("3-order.send").exists());
        assert!(t.staged_exists("3-order.ack"));

        // Second claim finds nothing.
        let again = t
            .receive_and_rename(3, MessageRole::Order, MessageRole::Ack)
            .unwrap();
        assert_eq!(again, Received::NotFound);
    }

    #[test]
    fn test_publish_replaces_existing() {
        let (_dir, t) = transport();
        t.publish("0-order.done", b"1\nold\x1a").unwrap();
        t.publish("0-order.done", b"0\n\x1a").unwrap();
        assert_eq!(
            t.receive(0, MessageRole::Done).unwrap(),
            Received::Message(b"0\n".to_vec())
        );
    }

    #[test]
    fn test_role_names() {
        assert_eq!(MessageRole::Order.file_name(12), "12-order.send");
        assert_eq!(MessageRole::Ack.file_name(0), "0-order.ack");
        assert_eq!(MessageRole::Done.file_name(7), "7-order.done");
    }
}
