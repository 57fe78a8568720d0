// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `splice` between the I/O file and a pipe, in both directions.

use std::fs::File;
use std::io::{self, Write};
use std::os::unix::fs::FileExt;
use std::time::Instant;

use rand::Rng;

use super::transfer::{self, Outcome, Transfer};
use super::{check_pattern, rand_between, IoFile, KIB};
use crate::pattern::{PatternBuffer, DEFAULT_FILLER};
use crate::report::TestReport;
use crate::suite::TestContext;
use crate::sys;

/// One file-to-pipe transfer into a fresh pipe.
pub fn splice_once(file: &File, buf: &mut [u8], transfer: Transfer) -> io::Result<Outcome> {
    let (read_end, write_end) = sys::pipe()?;
    transfer::file_to_stream(file, buf, transfer, write_end, read_end, |pipe, file, offset, count| {
        sys::splice(file, Some(offset), pipe, None, count)
    })
}

pub fn to_pipe(ctx: &mut TestContext, io: &mut IoFile) {
    ctx.report.sub("splice/to-pipe");
    transfer::exercise_stream(ctx, io, splice_once);
}

/// Fill the file at `offset` from a pipe that a writer thread feeds with
/// `expected` bytes of pattern; `count` may ask for more than that.
/// `buf` is the writer's staging buffer.
pub fn fill_from_pipe(file: &File, buf: &mut [u8], offset: u64, count: usize, expected: u64, filler: u8) -> io::Result<Outcome> {
    let (read_end, mut write_end) = sys::pipe()?;

    std::thread::scope(|scope| {
        let writer = scope.spawn(move || -> io::Result<()> {
            let mut sent = 0u64;
            while sent < expected {
                let len = buf.len().min((expected - sent) as usize);
                PatternBuffer::fill(offset + sent, &mut buf[..len], filler);
                write_end.write_all(&buf[..len])?;
                sent += len as u64;
            }
            Ok(())
        });

        let mut outcome = Outcome::default();
        let start = Instant::now();
        let mut position = offset;
        let mut total = 0u64;
        let mut left = count;
        while left > 0 {
            let before = position;
            match sys::splice(&read_end, None, file, Some(&mut position), left) {
                Ok(0) => break,
                Ok(moved) => {
                    outcome.calls += 1;
                    if position != before + moved as u64 {
                        outcome.problems.push(format!(
                            "file offset {:#x} after splicing {} bytes to {:#x}",
                            position, moved, before
                        ));
                        break;
                    }
                    total += moved as u64;
                    left -= moved.min(left);
                }
                Err(e) => {
                    outcome
                        .problems
                        .push(format!("splice of {} bytes to {:#x}: {}", left, position, e));
                    break;
                }
            }
        }
        outcome.elapsed = start.elapsed();
        drop(read_end);

        if total != expected {
            outcome
                .problems
                .push(format!("spliced {} bytes to {:#x}, expected {}", total, offset, expected));
        }
        match writer.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) if total != expected && e.kind() == io::ErrorKind::BrokenPipe => {}
            Ok(Err(e)) => outcome.problems.push(format!("feeding pipe: {}", e)),
            Err(_) => return Err(io::Error::other("pipe writer thread panicked")),
        }
        Ok(outcome)
    })
}

/// Read back `len` bytes at `offset` and check the pattern.
fn check_file(report: &mut TestReport, file: &File, buf: &mut [u8], offset: u64, len: u64, filler: u8) {
    let mut done = 0u64;
    while done < len {
        let chunk = buf.len().min((len - done) as usize);
        if let Err(e) = file.read_exact_at(&mut buf[..chunk], offset + done) {
            report.failed(format_args!("reading back spliced data at {:#x}: {}", offset + done, e));
            return;
        }
        if !check_pattern(report, "spliced data", offset + done, &buf[..chunk], filler) {
            return;
        }
        done += chunk as u64;
    }
}

fn splice_and_check(ctx: &mut TestContext, io: &IoFile, buf: &mut [u8], offset: u64, count: usize, expected: u64, filler: u8) {
    let result = fill_from_pipe(&io.file, buf, offset, count, expected, filler);
    if let Some(outcome) = transfer::record(ctx, result) {
        if outcome.calls > 0 {
            check_file(&mut ctx.report, &io.file, buf, offset, expected, filler);
        }
    }
}

pub fn to_file(ctx: &mut TestContext, io: &mut IoFile) {
    ctx.report.sub("splice/to-file");

    let size = io.size;
    let max = transfer::max_transfer(size);
    let mut buf = vec![0u8; transfer::buffer_size(ctx, size)];

    let mut filler = 0x76u8;
    splice_and_check(ctx, io, &mut buf, 0, max as usize, max, filler);

    let mut rng = rand::thread_rng();
    let small = (256 * KIB).min(max / 16).max(1);
    for i in 0..64 {
        let len = rand_between(&mut rng, 1, if i < 24 { small } else { max });
        let offset = rand_between(&mut rng, 0, size - len);
        let extra = if i & 1 == 1 { rng.gen_range(0..=64 * KIB) } else { 0 };
        filler = filler.wrapping_add(1);
        splice_and_check(ctx, io, &mut buf, offset, (len + extra) as usize, len, filler);
    }

    let file = &io.file;
    transfer::benchmark(ctx, max, || {
        fill_from_pipe(file, &mut buf, 0, max as usize, max, DEFAULT_FILLER)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::create_replace;
    use tempfile::TempDir;

    #[test]
    fn test_splice_to_pipe_delivers_pattern() {
        let temp = TempDir::new().unwrap();
        let size = 200_000u64;
        let mut file = create_replace(&temp.path().join("f")).unwrap();
        let mut content = vec![0u8; size as usize];
        PatternBuffer::fill(0, &mut content, DEFAULT_FILLER);
        file.write_all(&content).unwrap();

        let mut buf = vec![0u8; 16 * 1024];
        let outcome = splice_once(&file, &mut buf, Transfer::new(17, size as usize, size, Some(DEFAULT_FILLER))).unwrap();
        assert!(outcome.problems.is_empty(), "{:?}", outcome.problems);
    }

    #[test]
    fn test_fill_from_pipe_with_oversized_request() {
        let temp = TempDir::new().unwrap();
        let file = create_replace(&temp.path().join("f")).unwrap();
        file.set_len(100_000).unwrap();

        let mut buf = vec![0u8; 8192];
        let outcome = fill_from_pipe(&file, &mut buf, 5000, 90_000, 50_000, 0x77).unwrap();
        assert!(outcome.problems.is_empty(), "{:?}", outcome.problems);

        let mut report = TestReport::new();
        check_file(&mut report, &file, &mut buf, 5000, 50_000, 0x77);
        assert_eq!(report.failure_count(), 0);
        assert_eq!(file.metadata().unwrap().len(), 100_000);
    }
}
