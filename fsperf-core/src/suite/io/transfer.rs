// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Kernel-side copies between the I/O file and a stream (`sendfile` to a
//! socket, `splice` to a pipe).
//!
//! Every transfer runs a receiving thread that drains the stream and checks
//! the offset pattern. Both areas share the same sequence: whole-file sends,
//! sends right after regular writes (stale caches show up here), random
//! sends, and finally a throughput run.

use std::fs::File;
use std::io::{self, Read};
use std::os::unix::fs::FileExt;
use std::time::{Duration, Instant};

use rand::Rng;

use super::{rand_between, IoFile, KIB, MIB, PAGE};
use crate::pattern::{PatternBuffer, DEFAULT_FILLER};
use crate::report::Unit;
use crate::suite::TestContext;

/// Linux caps a single `sendfile`/`splice` at just below 2GB.
pub const MAX_TRANSFER: u64 = 0x7fff_f000;

/// One transfer from the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub offset: u64,
    /// Bytes requested.
    pub count: usize,
    /// Bytes that should arrive, less than `count` when the end of the file
    /// is reached.
    pub expected: u64,
    /// Filler to check the received data against; `None` skips the check.
    pub filler: Option<u8>,
}

impl Transfer {
    pub fn new(offset: u64, count: usize, file_size: u64, filler: Option<u8>) -> Self {
        let expected = (count as u64).min(file_size.saturating_sub(offset));
        Self {
            offset,
            count,
            expected,
            filler,
        }
    }
}

/// Result of one transfer.
#[derive(Debug, Default)]
pub struct Outcome {
    /// From the first call until the receiver had everything.
    pub elapsed: Duration,
    pub calls: u64,
    pub problems: Vec<String>,
}

/// What the receiving thread saw.
struct Received {
    bytes: u64,
    done: Instant,
    problems: Vec<String>,
}

fn receive(mut stream: impl Read, buf: &mut [u8], transfer: Transfer) -> Received {
    let mut problems = Vec::new();
    let mut bytes = 0u64;
    while bytes < transfer.expected {
        let want = buf.len().min((transfer.expected - bytes) as usize);
        match stream.read(&mut buf[..want]) {
            Ok(0) => {
                problems.push(format!("stream ended after {} of {} bytes", bytes, transfer.expected));
                break;
            }
            Ok(read) => {
                if let Some(filler) = transfer.filler {
                    let offset = transfer.offset + bytes;
                    if let Some(first) = PatternBuffer::verify(offset, &buf[..read], filler).first() {
                        if problems.len() < 8 {
                            problems.push(format!("received data: {}", first));
                        }
                    }
                }
                bytes += read as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                problems.push(format!("receiving: {}", e));
                break;
            }
        }
    }
    let done = Instant::now();

    // The sender closes its end once done, so anything but EOF is surplus.
    if bytes == transfer.expected {
        let mut extra = [0u8; 1];
        match stream.read(&mut extra) {
            Ok(0) => {}
            Ok(_) => problems.push("stream still holds data after the transfer".to_string()),
            Err(e) => problems.push(format!("reading after the transfer: {}", e)),
        }
    }

    Received {
        bytes,
        done,
        problems,
    }
}

/// Push `transfer` from `file` into `writer` with `push` while a thread
/// drains `reader` into `buf`.
pub fn file_to_stream<W, R>(
    file: &File,
    buf: &mut [u8],
    transfer: Transfer,
    writer: W,
    reader: R,
    mut push: impl FnMut(&W, &File, &mut u64, usize) -> io::Result<usize>,
) -> io::Result<Outcome>
where
    R: Read + Send,
{
    std::thread::scope(|scope| {
        let receiver = scope.spawn(move || receive(reader, buf, transfer));

        let mut outcome = Outcome::default();
        let start = Instant::now();
        let mut offset = transfer.offset;
        let mut total = 0u64;
        let mut left = transfer.count;
        while left > 0 {
            let before = offset;
            match push(&writer, file, &mut offset, left) {
                Ok(0) => break,
                Ok(moved) => {
                    outcome.calls += 1;
                    if offset != before + moved as u64 {
                        outcome.problems.push(format!(
                            "file offset {:#x} after moving {} bytes from {:#x}",
                            offset, moved, before
                        ));
                        break;
                    }
                    total += moved as u64;
                    left -= moved.min(left);
                }
                Err(e) if e.raw_os_error() == Some(libc::EPIPE) && total == transfer.expected => break,
                Err(e) => {
                    outcome
                        .problems
                        .push(format!("transfer of {} bytes at {:#x}: {}", left, offset, e));
                    break;
                }
            }
        }
        drop(writer);

        if total != transfer.expected {
            outcome.problems.push(format!(
                "transferred {} bytes from {:#x}, expected {}",
                total, transfer.offset, transfer.expected
            ));
        }

        let received = receiver
            .join()
            .map_err(|_| io::Error::other("receiving thread panicked"))?;
        if received.bytes != transfer.expected {
            outcome.problems.push(format!(
                "received {} bytes, expected {}",
                received.bytes, transfer.expected
            ));
        }
        outcome.problems.extend(received.problems);
        outcome.elapsed = received
            .done
            .saturating_duration_since(start)
            .max(Duration::from_nanos(1));
        Ok(outcome)
    })
}

/// Record the problems of a transfer; `None` when it could not run at all.
pub fn record(ctx: &mut TestContext, result: io::Result<Outcome>) -> Option<Outcome> {
    match result {
        Ok(mut outcome) => {
            for problem in outcome.problems.drain(..) {
                ctx.report.failed(problem);
            }
            Some(outcome)
        }
        Err(e) => {
            ctx.report.failed(format_args!("setting up transfer: {}", e));
            None
        }
    }
}

/// Repeat whole-file transfers until the configured duration has passed and
/// record the totals.
pub fn benchmark(ctx: &mut TestContext, per_iteration: u64, mut one: impl FnMut() -> io::Result<Outcome>) {
    let target = ctx.profiler.target();
    let mut elapsed = Duration::ZERO;
    let mut iterations = 0u64;
    let mut calls = 0u64;
    loop {
        let Some(outcome) = record(ctx, one()) else {
            break;
        };
        elapsed += outcome.elapsed;
        calls += outcome.calls;
        iterations += 1;
        if elapsed >= target {
            break;
        }
    }
    if iterations == 0 || calls == 0 {
        return;
    }

    let ns = elapsed.as_nanos().max(1) as u64;
    let bytes = per_iteration * iterations;
    ctx.report.value("latency", ns / calls, Unit::NsPerOccurrence);
    ctx.report.value(
        "throughput",
        (bytes as f64 / (ns as f64 / 1e9)) as u64,
        Unit::BytesPerSec,
    );
    ctx.report.value("calls", calls, Unit::Occurrences);
    ctx.report.value("bytes/call", bytes / calls, Unit::Bytes);
    ctx.report.value("iterations", iterations, Unit::Occurrences);
    ctx.report.value("bytes", bytes, Unit::Bytes);
    if ctx.config.run.show_duration {
        ctx.report.value("duration", ns, Unit::Ns);
    }
}

/// Largest single transfer for this file.
pub fn max_transfer(size: u64) -> u64 {
    size.min(MAX_TRANSFER)
}

/// Receive buffer size.
pub fn buffer_size(ctx: &TestContext, size: u64) -> usize {
    ctx.config.run.clamp_buffer(max_transfer(size).min(16 * MIB)) as usize
}

/// The common sequence of checks and the benchmark for a file-to-stream
/// area. `send` performs one transfer into a fresh stream.
pub fn exercise_stream(
    ctx: &mut TestContext,
    io: &mut IoFile,
    mut send: impl FnMut(&File, &mut [u8], Transfer) -> io::Result<Outcome>,
) {
    let size = io.size;
    let max = max_transfer(size);
    let mut buf = vec![0u8; buffer_size(ctx, size)];

    let whole = Transfer::new(0, max as usize, size, Some(DEFAULT_FILLER));
    let result = send(&io.file, &mut buf, whole);
    record(ctx, result);
    let count = if max == size { max } else { max - 63 };
    let result = send(&io.file, &mut buf, Transfer::new(63, count as usize, size, Some(DEFAULT_FILLER)));
    record(ctx, result);

    // Regular writes right before a transfer must be seen by it.
    let mut filler = DEFAULT_FILLER;
    let mut len = (max as usize).min(buf.len());
    loop {
        let result = send(&io.file, &mut buf, Transfer::new(0, len, size, Some(filler)));
        record(ctx, result);

        filler = filler.wrapping_add(1);
        PatternBuffer::fill(0, &mut buf[..len], filler);
        if ctx.report.check_ok(io.file.write_all_at(&buf[..len], 0), "rewriting start of file").is_none() {
            break;
        }
        let result = send(&io.file, &mut buf, Transfer::new(0, len, size, Some(filler)));
        record(ctx, result);

        len /= 2;
        if len < PAGE || filler.wrapping_sub(0xf7) >= 64 {
            break;
        }
    }

    PatternBuffer::fill(0, &mut buf, DEFAULT_FILLER);
    if ctx.report.check_ok(io.file.write_all_at(&buf, 0), "restoring start of file").is_none() {
        return;
    }

    let mut rng = rand::thread_rng();
    let small = (256 * KIB).min(max / 16).max(1);
    for i in 0..128 {
        let count = rand_between(&mut rng, 1, if i < 64 { small } else { max }) as usize;
        let offset = rng.gen_range(0..size);
        let result = send(&io.file, &mut buf, Transfer::new(offset, count, size, Some(DEFAULT_FILLER)));
        record(ctx, result);
    }

    let file = &io.file;
    benchmark(ctx, max, || send(file, &mut buf, Transfer::new(0, max as usize, size, None)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::create_replace;
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use tempfile::TempDir;

    fn pattern_file(temp: &TempDir, size: usize) -> File {
        let mut file = create_replace(&temp.path().join("f")).unwrap();
        let mut content = vec![0u8; size];
        PatternBuffer::fill(0, &mut content, DEFAULT_FILLER);
        file.write_all(&content).unwrap();
        file
    }

    #[test]
    fn test_transfer_clamps_to_file_end() {
        let t = Transfer::new(900, 500, 1000, None);
        assert_eq!(t.expected, 100);
        let t = Transfer::new(2000, 500, 1000, None);
        assert_eq!(t.expected, 0);
    }

    #[test]
    fn test_stream_with_plain_writes() {
        let temp = TempDir::new().unwrap();
        let file = pattern_file(&temp, 100_000);
        let mut buf = vec![0u8; 4096];
        let (writer, reader) = UnixStream::pair().unwrap();

        let transfer = Transfer::new(1000, 200_000, 100_000, Some(DEFAULT_FILLER));
        let outcome = file_to_stream(&file, &mut buf, transfer, writer, reader, |mut w, f, offset, count| {
            let mut chunk = vec![0u8; count.min(10_000)];
            let read = f.read_at(&mut chunk, *offset)?;
            let written = w.write(&chunk[..read])?;
            *offset += written as u64;
            Ok(written)
        })
        .unwrap();

        assert!(outcome.problems.is_empty(), "{:?}", outcome.problems);
        assert!(outcome.calls >= 10);
    }

    #[test]
    fn test_corrupt_stream_is_reported() {
        let temp = TempDir::new().unwrap();
        let file = pattern_file(&temp, 8192);
        let mut buf = vec![0u8; 4096];
        let (writer, reader) = UnixStream::pair().unwrap();

        let transfer = Transfer::new(0, 8192, 8192, Some(DEFAULT_FILLER));
        let outcome = file_to_stream(&file, &mut buf, transfer, writer, reader, |mut w, _, offset, count| {
            let junk = vec![0u8; count];
            let written = w.write(&junk)?;
            *offset += written as u64;
            Ok(written)
        })
        .unwrap();

        assert!(!outcome.problems.is_empty());
    }
}
