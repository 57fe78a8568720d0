// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Write semantics and sequential write throughput.
//!
//! Each pass writes the offset pattern with a fresh filler byte, so reading
//! back catches data from earlier passes as well as misplaced writes.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;

use rand::Rng;

use super::{
    check_pattern, rand_between, random_split, segment_counts, segments, test_buffer_size,
    ChunkRule, IoFile, CHUNKED_PASSES, KIB, MAX_SEGMENTS, PAGE,
};
use crate::pattern::PatternBuffer;
use crate::report::{TestReport, Unit};
use crate::suite::TestContext;
use crate::sys::{self, PageBuffer};
use crate::types::BlockSize;

const FIRST_FILLER: u8 = 0x88;

/// Write `buf` at `start` in random chunk lengths, checking the file
/// position after each write.
fn write_chunked(
    file: &mut File,
    start: u64,
    buf: &[u8],
    rule: ChunkRule,
    rng: &mut impl Rng,
) -> io::Result<Option<String>> {
    file.seek(SeekFrom::Start(start))?;
    let mut done = 0usize;
    while done < buf.len() {
        let (low, high) = rule(buf.len() - done);
        let chunk = rand_between(rng, low as u64, high as u64) as usize;
        let written = file.write(&buf[done..done + chunk])?;
        if written != chunk {
            return Ok(Some(format!(
                "write of {} bytes at {:#x} wrote {}",
                chunk,
                start + done as u64,
                written
            )));
        }
        done += written;
        let position = file.stream_position()?;
        if position != start + done as u64 {
            return Ok(Some(format!(
                "position {:#x} after writing to {:#x}",
                position,
                start + done as u64
            )));
        }
    }
    Ok(None)
}

fn chunked_passes(report: &mut TestReport, file: &mut File, size: u64, buf: &mut [u8], filler: &mut u8) {
    let mut rng = rand::thread_rng();
    for (i, (from_end, rule)) in CHUNKED_PASSES.into_iter().enumerate() {
        let start = if from_end { size - buf.len() as u64 } else { 0 };
        PatternBuffer::fill(start, buf, *filler);
        match write_chunked(file, start, buf, rule, &mut rng) {
            Ok(None) => {
                buf.fill(0x55);
                match file.read_exact_at(buf, start) {
                    Ok(()) => {
                        check_pattern(report, &format!("chunked write pass {}", i), start, buf, *filler);
                    }
                    Err(e) => report.failed(format_args!("reading back write pass {}: {}", i, e)),
                }
            }
            Ok(Some(problem)) => report.failed(problem),
            Err(e) => report.failed(format_args!("chunked write pass {}: {}", i, e)),
        }
        *filler = filler.wrapping_add(1);
    }
}

/// Page-sized random writes through `handle`, each read back through the
/// cached handle.
fn page_writes(report: &mut TestReport, what: &str, handle: &File, cached: &File, len: usize, filler: u8) {
    let pages = (len / PAGE).max(1);
    let Some(mut buf) = report.check_ok(PageBuffer::new(pages * PAGE), "allocating page buffer") else {
        return;
    };
    PatternBuffer::fill(0, &mut buf, filler);
    let mut check = vec![0u8; buf.len()];
    let mut rng = rand::thread_rng();

    let mut done = 0usize;
    while done < buf.len() {
        let left = (buf.len() - done) / PAGE;
        let chunk = rand_between(&mut rng, 1, left as u64) as usize * PAGE;
        match handle.write_at(&buf[done..done + chunk], done as u64) {
            Ok(written) if written == chunk => {}
            Ok(written) => {
                report.failed(format_args!("{} write of {} at {:#x} wrote {}", what, chunk, done, written));
                return;
            }
            Err(e) => {
                report.failed(format_args!("{} write of {} at {:#x}: {}", what, chunk, done, e));
                return;
            }
        }
        let readback = &mut check[..chunk];
        match cached.read_exact_at(readback, done as u64) {
            Ok(()) => {
                check_pattern(report, what, done as u64, readback, filler);
            }
            Err(e) => report.failed(format_args!("reading back {} write at {:#x}: {}", what, done, e)),
        }
        done += chunk;
    }

    buf.fill(0x55);
    match handle.read_exact_at(&mut buf, 0) {
        Ok(()) => {
            check_pattern(report, what, 0, &buf, filler);
        }
        Err(e) => report.failed(format_args!("reading back through {} handle: {}", what, e)),
    }
}

/// A zero-byte write must neither fail nor truncate.
fn zero_byte_write(file: &mut File, size: u64) -> io::Result<Option<String>> {
    file.seek(SeekFrom::End(-(4 * KIB as i64)))?;
    let written = file.write(&[])?;
    if written != 0 {
        return Ok(Some(format!("zero-byte write wrote {}", written)));
    }
    let mut tail = vec![0u8; 4 * KIB as usize];
    file.read_exact(&mut tail)?;
    let report = PatternBuffer::verify(size - 4 * KIB, &tail, tail[8]);
    Ok(report.first().map(|m| format!("after zero-byte write: {}", m)))
}

/// Gather writes at offset 0 with segments taken from the end of the
/// buffer backwards, so segment `i` carries offset `i * seg`.
fn gather_writes(report: &mut TestReport, file: &File, buf: &mut [u8], filler: &mut u8) {
    for count in segment_counts(MAX_SEGMENTS) {
        let seg = buf.len() / count;
        if seg == 0 {
            break;
        }
        let used = &mut buf[..seg * count];
        for (i, chunk) in used.chunks_exact_mut(seg).rev().enumerate() {
            PatternBuffer::fill((i * seg) as u64, chunk, *filler);
        }
        let slices: Vec<_> = used.chunks_exact(seg).rev().map(io::IoSlice::new).collect();
        let result = sys::write_vectored_at(file, &slices, 0);
        drop(slices);
        match result {
            Ok(written) if written == used.len() => {
                used.fill(0x55);
                match file.read_exact_at(used, 0) {
                    Ok(()) => {
                        check_pattern(report, &format!("pwritev {}x{}", count, seg), 0, used, *filler);
                    }
                    Err(e) => report.failed(format_args!("reading back pwritev {}x{}: {}", count, seg, e)),
                }
            }
            Ok(written) => report.failed(format_args!("pwritev {}x{} wrote {}", count, seg, written)),
            Err(e) => {
                report.failed(format_args!("pwritev {}x{}: {}", count, seg, e));
                break;
            }
        }
        *filler = filler.wrapping_add(1);
    }
}

/// Random gather writes, including empty segments.
fn random_gather_writes(report: &mut TestReport, file: &File, size: u64, buf: &mut [u8], filler: &mut u8) {
    let mut rng = rand::thread_rng();
    for _ in 0..128 {
        let count = rng.gen_range(1..=MAX_SEGMENTS);
        let total = rng.gen_range(0..=buf.len());
        let offset = rand_between(&mut rng, 0, size - total as u64);
        let lens = random_split(&mut rng, total, count);
        let data = &mut buf[..total];
        PatternBuffer::fill(offset, data, *filler);

        let result = sys::write_vectored_at(file, &segments(data, &lens), offset);
        match result {
            Ok(written) if written == total => {
                data.fill(0x55);
                match file.read_exact_at(data, offset) {
                    Ok(()) => {
                        check_pattern(report, "random pwritev", offset, data, *filler);
                    }
                    Err(e) => report.failed(format_args!("reading back random pwritev at {:#x}: {}", offset, e)),
                }
            }
            Ok(written) => report.failed(format_args!("random pwritev of {} at {:#x} wrote {}", total, offset, written)),
            Err(e) => {
                report.failed(format_args!("random pwritev of {} at {:#x}: {}", total, offset, e));
                break;
            }
        }
        *filler = filler.wrapping_add(1);
    }
}

pub fn run(ctx: &mut TestContext, io: &mut IoFile) {
    ctx.report.sub("write tests");

    let len = test_buffer_size(ctx, io.size);
    let mut buf = vec![0u8; len];
    let mut filler = FIRST_FILLER;
    let report = &mut ctx.report;

    chunked_passes(report, &mut io.file, io.size, &mut buf, &mut filler);

    page_writes(report, "write-through", &io.write_through, &io.file, len, filler);
    filler = filler.wrapping_add(1);
    if let Some(no_cache) = &io.no_cache {
        page_writes(report, "uncached", no_cache, &io.file, len, filler);
        filler = filler.wrapping_add(1);
    }

    match zero_byte_write(&mut io.file, io.size) {
        Ok(None) => {}
        Ok(Some(problem)) => report.failed(problem),
        Err(e) => report.failed(format_args!("zero-byte write: {}", e)),
    }

    let position = io.file.stream_position();
    gather_writes(report, &io.file, &mut buf, &mut filler);
    random_gather_writes(report, &io.file, io.size, &mut buf, &mut filler);
    if let (Ok(before), Ok(after)) = (position, io.file.stream_position()) {
        report.check(before == after, || {
            format!("pwritev moved the file position from {} to {}", before, after)
        });
    }

    if let Ok(meta) = io.file.metadata() {
        report.check(meta.len() == io.size, || {
            format!("file size {} after write tests, expected {}", meta.len(), io.size)
        });
    }
}

/// Sequential writes of `block` bytes, wrapping to the start at the end.
pub fn profile_block(ctx: &mut TestContext, io: &mut IoFile, block: BlockSize) {
    let len = block.len();
    let size = io.size;
    let buf = vec![0xf7u8; len];
    let file = &mut io.file;
    if ctx.report.check_ok(file.seek(SeekFrom::Start(0)), "seek to start").is_none() {
        return;
    }

    let mut offset = 0u64;
    let mut seeks = 0u64;
    let m = ctx.profiler.profile_io(format!("write {}", block), len as u64, |_| {
        if offset + (len as u64) > size {
            file.seek(SeekFrom::Start(0))?;
            seeks += 1;
            offset = 0;
        }
        let written = file.write(&buf)?;
        offset += written as u64;
        if written != len {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("write at {:#x} wrote {} bytes, expected {}", offset - written as u64, written, len),
            ));
        }
        Ok(())
    });
    ctx.report.profiled(m);
    ctx.report.value(format!("write {} seeks", block), seeks, Unit::Occurrences);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::create_replace;
    use tempfile::TempDir;

    #[test]
    fn test_write_semantics() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("f");
        let size = 256 * KIB;
        let mut file = create_replace(&path).unwrap();
        file.set_len(size).unwrap();
        let write_through = sys::open_write_through(&path).unwrap();

        let mut buf = vec![0u8; 64 * KIB as usize];
        let mut filler = FIRST_FILLER;
        let mut report = TestReport::new();

        chunked_passes(&mut report, &mut file, size, &mut buf, &mut filler);
        assert_eq!(filler, FIRST_FILLER + 3);
        page_writes(&mut report, "write-through", &write_through, &file, buf.len(), filler);
        assert_eq!(zero_byte_write(&mut file, size).unwrap(), None);
        gather_writes(&mut report, &file, &mut buf, &mut filler);
        random_gather_writes(&mut report, &file, size, &mut buf, &mut filler);

        assert_eq!(report.failure_count(), 0, "{:?}", report.summary());
        assert_eq!(file.metadata().unwrap().len(), size);
    }
}
