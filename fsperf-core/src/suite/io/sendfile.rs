// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `sendfile` from the I/O file into a connected socket pair.

use std::fs::File;
use std::io;
use std::os::unix::net::UnixStream;

use super::transfer::{self, Outcome, Transfer};
use super::IoFile;
use crate::suite::TestContext;
use crate::sys;

/// One `sendfile` transfer into a fresh socket pair.
pub fn send_once(file: &File, buf: &mut [u8], transfer: Transfer) -> io::Result<Outcome> {
    let (server, client) = UnixStream::pair()?;
    transfer::file_to_stream(file, buf, transfer, server, client, |socket, file, offset, count| {
        sys::sendfile(socket, file, offset, count.min(sys::SENDFILE_MAX))
    })
}

pub fn run(ctx: &mut TestContext, io: &mut IoFile) {
    ctx.report.sub("sendfile");
    transfer::exercise_stream(ctx, io, send_once);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{PatternBuffer, DEFAULT_FILLER};
    use crate::suite::create_replace;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_sendfile_delivers_pattern() {
        let temp = TempDir::new().unwrap();
        let size = 300_000usize;
        let mut file = create_replace(&temp.path().join("f")).unwrap();
        let mut content = vec![0u8; size];
        PatternBuffer::fill(0, &mut content, DEFAULT_FILLER);
        file.write_all(&content).unwrap();

        let mut buf = vec![0u8; 64 * 1024];
        for (offset, count) in [(0, size), (63, size), (299_000, 5000), (size as u64, 10)] {
            let transfer = Transfer::new(offset, count, size as u64, Some(DEFAULT_FILLER));
            let outcome = send_once(&file, &mut buf, transfer).unwrap();
            assert!(outcome.problems.is_empty(), "{:?}", outcome.problems);
        }
    }
}
