// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Read semantics and sequential read throughput.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::fs::FileExt;

use rand::Rng;

use super::{
    check_pattern, rand_between, random_split, segment_counts, segments_mut, test_buffer_size,
    ChunkRule, IoFile, CHUNKED_PASSES, KIB, MAX_SEGMENTS, PAGE,
};
use crate::pattern::DEFAULT_FILLER;
use crate::report::{TestReport, Unit};
use crate::suite::TestContext;
use crate::sys::{self, PageBuffer};
use crate::types::BlockSize;

/// Offsets before the end used by the EOF checks.
const EOF_OFFSETS: &[usize] = &[
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 32, 63, 64, 127, 128, 255, 254,
    256, 1023, 1024, 2048, 4092, 4093, 4094, 4095, 4096, 4097, 4098, 4099, 4100, 8192, 16384,
    32767, 32768, 32769, 65535, 65536, 1024 * 1024 - 1,
];

/// Read `buf.len()` bytes from `start` in random chunk lengths, checking the
/// file position after each read.
fn read_chunked(
    file: &mut File,
    start: u64,
    buf: &mut [u8],
    rule: ChunkRule,
    rng: &mut impl Rng,
) -> io::Result<Option<String>> {
    file.seek(SeekFrom::Start(start))?;
    let mut done = 0usize;
    while done < buf.len() {
        let left = buf.len() - done;
        let (low, high) = rule(left);
        let chunk = rand_between(rng, low as u64, high as u64) as usize;
        let read = file.read(&mut buf[done..done + chunk])?;
        if read != chunk {
            return Ok(Some(format!(
                "read of {} bytes at {:#x} returned {}",
                chunk,
                start + done as u64,
                read
            )));
        }
        done += read;
        let position = file.stream_position()?;
        if position != start + done as u64 {
            return Ok(Some(format!(
                "position {:#x} after reading to {:#x}",
                position,
                start + done as u64
            )));
        }
    }
    Ok(None)
}

fn chunked_passes(report: &mut TestReport, file: &mut File, size: u64, buf: &mut [u8]) {
    let mut rng = rand::thread_rng();
    for (i, (from_end, rule)) in CHUNKED_PASSES.into_iter().enumerate() {
        let start = if from_end { size - buf.len() as u64 } else { 0 };
        buf.fill(0x55);
        match read_chunked(file, start, buf, rule, &mut rng) {
            Ok(None) => {
                check_pattern(report, &format!("chunked read pass {}", i), start, buf, DEFAULT_FILLER);
            }
            Ok(Some(problem)) => report.failed(problem),
            Err(e) => report.failed(format_args!("chunked read pass {}: {}", i, e)),
        }
    }
}

/// Reads that straddle or start at the end of the file.
fn eof_checks(file: &mut File, size: u64, buf: &mut [u8]) -> io::Result<Vec<String>> {
    let mut problems = Vec::new();
    let buf_len = buf.len();
    let maxes = [buf_len, 64 * KIB as usize, 16 * KIB as usize, 4 * KIB as usize, 256];

    for max in maxes.into_iter().filter(|&max| max <= buf_len) {
        for &off in EOF_OFFSETS.iter().filter(|&&off| off < max && (off as u64) <= size) {
            let start = size - off as u64;

            file.seek(SeekFrom::Start(start))?;
            let read = file.read(&mut buf[..max])?;
            if read != off {
                problems.push(format!("read {} at end-{}: got {}, expected {}", max, off, read, off));
            }

            file.seek(SeekFrom::Start(start))?;
            let read = file.read(&mut buf[..off])?;
            if read != off {
                problems.push(format!("read {} at end-{}: got {}", off, off, read));
            } else if let Some(first) =
                crate::pattern::PatternBuffer::verify(start, &buf[..off], DEFAULT_FILLER).first()
            {
                problems.push(format!("read at end-{}: {}", off, first));
            }

            let read = file.read(&mut buf[..1])?;
            if read != 0 {
                problems.push(format!("read at EOF after end-{}: got {} bytes", off, read));
            }
        }
    }

    let max = buf.len();
    for off in 0..256u64 {
        file.seek(SeekFrom::Start(size + off))?;
        let read = file.read(&mut buf[..max])?;
        if read != 0 {
            problems.push(format!("read {} bytes at end+{}", read, off));
        }
    }

    file.seek(SeekFrom::Start(size))?;
    let read = file.read(&mut buf[..0])?;
    if read != 0 {
        problems.push(format!("zero-byte read at EOF returned {}", read));
    }
    Ok(problems)
}

/// Page-sized random reads through the uncached handle.
fn uncached_reads(report: &mut TestReport, no_cache: &File, len: usize) {
    let pages = (len / PAGE).max(1);
    let Some(mut buf) = report.check_ok(PageBuffer::new(pages * PAGE), "allocating page buffer") else {
        return;
    };
    let mut rng = rand::thread_rng();
    let mut done = 0usize;
    while done < buf.len() {
        let left = (buf.len() - done) / PAGE;
        let chunk = rand_between(&mut rng, 1, left as u64) as usize * PAGE;
        match no_cache.read_at(&mut buf[done..done + chunk], done as u64) {
            Ok(read) if read == chunk => done += read,
            Ok(read) => {
                report.failed(format_args!("uncached read of {} at {:#x} returned {}", chunk, done, read));
                return;
            }
            Err(e) => {
                report.failed(format_args!("uncached read of {} at {:#x}: {}", chunk, done, e));
                return;
            }
        }
    }
    check_pattern(report, "uncached read", 0, &buf, DEFAULT_FILLER);
}

/// Scatter reads from offset 0 with segments filled in reverse order, so
/// segment `i` sits at the end of the buffer and holds offset `i * seg`.
fn scatter_reads(report: &mut TestReport, file: &File, buf: &mut [u8]) {
    for count in segment_counts(MAX_SEGMENTS) {
        let seg = buf.len() / count;
        if seg == 0 {
            break;
        }
        let used = &mut buf[..seg * count];
        used.fill(0x55);
        let mut slices: Vec<_> = used.chunks_exact_mut(seg).rev().map(io::IoSliceMut::new).collect();
        match sys::read_vectored_at(file, &mut slices, 0) {
            Ok(read) if read == seg * count => {}
            Ok(read) => {
                report.failed(format_args!("preadv {}x{} returned {}", count, seg, read));
                continue;
            }
            Err(e) => {
                report.failed(format_args!("preadv {}x{}: {}", count, seg, e));
                continue;
            }
        }
        drop(slices);
        for (i, chunk) in used.chunks_exact(seg).rev().enumerate() {
            let what = format!("preadv {}x{} segment {}", count, seg, i);
            if !check_pattern(report, &what, (i * seg) as u64, chunk, DEFAULT_FILLER) {
                break;
            }
        }
    }
}

/// Random vectored reads, some starting before and ending past the end.
fn random_vectored_reads(report: &mut TestReport, file: &File, size: u64, buf: &mut [u8]) {
    let mut rng = rand::thread_rng();

    for _ in 0..128 {
        let count = rng.gen_range(1..=MAX_SEGMENTS);
        let total = rng.gen_range(0..=buf.len());
        let offset = rand_between(&mut rng, 0, size - total as u64);
        let lens = random_split(&mut rng, total, count);
        let mut slices = segments_mut(&mut buf[..total], &lens);
        match sys::read_vectored_at(file, &mut slices, offset) {
            Ok(read) if read == total => {
                drop(slices);
                check_pattern(report, "random preadv", offset, &buf[..total], DEFAULT_FILLER);
            }
            Ok(read) => report.failed(format_args!("random preadv of {} at {:#x} returned {}", total, offset, read)),
            Err(e) => report.failed(format_args!("random preadv of {} at {:#x}: {}", total, offset, e)),
        }
    }

    for count in 1..=6 {
        for _ in 0..128 {
            let to_read = rng.gen_range(0..=buf.len());
            let beyond = rng.gen_range(0..=to_read);
            let offset = size + beyond as u64 - to_read as u64;
            let expected = to_read - beyond;
            let lens = random_split(&mut rng, to_read, count);
            let mut slices = segments_mut(&mut buf[..to_read], &lens);
            match sys::read_vectored_at(file, &mut slices, offset) {
                Ok(read) if read == expected => {
                    drop(slices);
                    check_pattern(report, "preadv across EOF", offset, &buf[..expected], DEFAULT_FILLER);
                }
                Ok(read) => report.failed(format_args!(
                    "preadv of {} at end-{} returned {}, expected {}",
                    to_read,
                    to_read - beyond,
                    read,
                    expected
                )),
                Err(e) => report.failed(format_args!("preadv across EOF at {:#x}: {}", offset, e)),
            }
        }
    }
}

pub fn run(ctx: &mut TestContext, io: &mut IoFile) {
    ctx.report.sub("read tests");

    let len = test_buffer_size(ctx, io.size);
    let mut buf = vec![0u8; len];
    let report = &mut ctx.report;

    chunked_passes(report, &mut io.file, io.size, &mut buf);

    match eof_checks(&mut io.file, io.size, &mut buf) {
        Ok(problems) => problems.into_iter().for_each(|p| report.failed(p)),
        Err(e) => report.failed(format_args!("EOF checks: {}", e)),
    }

    if let Some(no_cache) = &io.no_cache {
        uncached_reads(report, no_cache, len);
    }

    let position = io.file.stream_position();
    scatter_reads(report, &io.file, &mut buf);
    random_vectored_reads(report, &io.file, io.size, &mut buf);
    if let (Ok(before), Ok(after)) = (position, io.file.stream_position()) {
        report.check(before == after, || {
            format!("preadv moved the file position from {} to {}", before, after)
        });
    }
}

/// Sequential reads of `block` bytes, wrapping to the start at the end.
pub fn profile_block(ctx: &mut TestContext, io: &mut IoFile, block: BlockSize) {
    let len = block.len();
    let size = io.size;
    let mut buf = vec![0xf7u8; len];
    let file = &mut io.file;
    if ctx.report.check_ok(file.seek(SeekFrom::Start(0)), "seek to start").is_none() {
        return;
    }

    let mut offset = 0u64;
    let mut seeks = 0u64;
    let m = ctx.profiler.profile_io(format!("read {}", block), len as u64, |_| {
        if offset + (len as u64) > size {
            file.seek(SeekFrom::Start(0))?;
            seeks += 1;
            offset = 0;
        }
        let read = file.read(&mut buf)?;
        offset += read as u64;
        if read != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read at {:#x} returned {} bytes, expected {}", offset - read as u64, read, len),
            ));
        }
        Ok(())
    });
    ctx.report.profiled(m);
    ctx.report.value(format!("read {} seeks", block), seeks, Unit::Occurrences);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PatternBuffer;
    use crate::suite::create_replace;
    use std::io::Write;
    use tempfile::TempDir;

    fn pattern_file(temp: &TempDir, size: usize) -> File {
        let mut file = create_replace(&temp.path().join("f")).unwrap();
        let mut content = vec![0u8; size];
        PatternBuffer::fill(0, &mut content, DEFAULT_FILLER);
        file.write_all(&content).unwrap();
        file
    }

    #[test]
    fn test_read_semantics_on_pattern_file() {
        let temp = TempDir::new().unwrap();
        let size = 256 * KIB as usize;
        let mut file = pattern_file(&temp, size);
        let mut buf = vec![0u8; 64 * KIB as usize];
        let mut report = TestReport::new();

        chunked_passes(&mut report, &mut file, size as u64, &mut buf);
        let problems = eof_checks(&mut file, size as u64, &mut buf).unwrap();
        assert!(problems.is_empty(), "{:?}", problems);
        scatter_reads(&mut report, &file, &mut buf);
        random_vectored_reads(&mut report, &file, size as u64, &mut buf);

        assert_eq!(report.failure_count(), 0, "{:?}", report.summary());
    }

    #[test]
    fn test_chunked_read_reports_short_file() {
        let temp = TempDir::new().unwrap();
        let mut file = pattern_file(&temp, 100);
        let mut buf = vec![0u8; 200];
        let problem = read_chunked(&mut file, 0, &mut buf, |left| (left, left), &mut rand::thread_rng()).unwrap();
        assert!(problem.is_some());
    }
}
