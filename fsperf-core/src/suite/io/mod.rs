// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! The shared-file I/O areas.
//!
//! All of them work on one big file (`file21`) that is zero-checked and then
//! filled with the offset pattern. Three handles are kept open on it: the
//! cached read/write handle, an optional `O_DIRECT` handle and an `O_DSYNC`
//! write-through handle. Areas that rewrite the content either restore the
//! pattern or run after every area that relies on it.

pub mod fsync;
pub mod mmap;
pub mod read;
pub mod seek;
pub mod sendfile;
pub mod splice;
pub mod transfer;
pub mod write;

use std::fs::{self, File};
use std::io::{self, IoSlice, IoSliceMut, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use rand::Rng;

use crate::config::MmapPlacement;
use crate::pattern::{PatternBuffer, DEFAULT_FILLER};
use crate::report::TestReport;
use crate::sys;
use crate::types::BlockSize;

use super::{create_replace, TestContext};

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;

/// File sizes are rounded up to this.
pub const SIZE_ALIGN: u64 = 64 * KIB;
/// Page size assumed for uncached and mmap accesses.
pub const PAGE: usize = sys::DIRECT_IO_ALIGN;

/// Pick the I/O file size for `requested` bytes with `free` bytes available.
/// `Err` carries the skip reason.
pub fn io_file_size(requested: u64, free: u64) -> Result<u64, String> {
    let size = if requested.saturating_add(16 * MIB) < free {
        align_up(requested, SIZE_ALIGN)
    } else if free < 32 * MIB {
        return Err(format!(
            "Insufficient free space: {} bytes, requires >= 32MB",
            free
        ));
    } else {
        let reserve = if free > 128 * MIB { 64 * MIB } else { 16 * MIB };
        let size = align_up(free - reserve, SIZE_ALIGN);
        tracing::info!(size = size, free = free, "Adjusted I/O file size to free space");
        size
    };
    if size < SIZE_ALIGN {
        return Err(format!(
            "Test file size too small: {} bytes, requires >= 64KB",
            size
        ));
    }
    Ok(size)
}

pub fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

/// The I/O test file and its handles.
pub struct IoFile {
    pub path: PathBuf,
    /// Cached read/write handle.
    pub file: File,
    pub no_cache: Option<File>,
    pub write_through: File,
    pub size: u64,
}

impl IoFile {
    /// Chunk size for whole-file passes.
    fn chunk(ctx: &TestContext) -> usize {
        ctx.config.run.clamp_buffer(MIB) as usize
    }

    /// Fill the whole file with the default pattern.
    pub fn reinit(&mut self, chunk: usize) -> io::Result<()> {
        fill_pattern(&mut self.file, self.size, chunk, DEFAULT_FILLER)
    }

    /// Extend the new file to `size`, check it reads back as zeros and
    /// write the pattern.
    fn prepare(&mut self, chunk: usize) -> io::Result<Result<(), String>> {
        let tail = 4 * KIB;
        self.file.seek(SeekFrom::Start(self.size - tail))?;
        self.file.write_all(&vec![0u8; tail as usize])?;

        self.file.seek(SeekFrom::Start(0))?;
        let mut buf = vec![0u8; chunk];
        let mut offset = 0u64;
        while offset < self.size {
            let len = (self.size - offset).min(chunk as u64) as usize;
            buf[len - 1] = 0xff;
            self.file.read_exact(&mut buf[..len])?;
            if let Some(pos) = buf[..len].iter().position(|&b| b != 0) {
                return Ok(Err(format!(
                    "new file is not zero filled at {:#x}",
                    offset + pos as u64
                )));
            }
            offset += len as u64;
        }

        self.reinit(chunk)?;
        Ok(Ok(()))
    }
}

/// Write the pattern with `filler` over `size` bytes from offset 0.
pub fn fill_pattern(file: &mut File, size: u64, chunk: usize, filler: u8) -> io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    let mut buf = vec![0u8; chunk];
    let mut offset = 0u64;
    while offset < size {
        let len = (size - offset).min(chunk as u64) as usize;
        PatternBuffer::fill(offset, &mut buf[..len], filler);
        file.write_all(&buf[..len])?;
        offset += len as u64;
    }
    Ok(())
}

/// Verify `buf` read from `offset`, recording each mismatch as a failure.
pub fn check_pattern(
    report: &mut TestReport,
    what: &str,
    offset: u64,
    buf: &[u8],
    filler: u8,
) -> bool {
    let result = PatternBuffer::verify(offset, buf, filler);
    for mismatch in &result.mismatches {
        report.failed(format_args!("{}: {}", what, mismatch));
    }
    if result.truncated {
        report.failed(format_args!("{}: too many mismatches, stopped checking", what));
    }
    result.is_ok()
}

/// Uniform random value in `low..=high`; `low` when the range is empty.
pub fn rand_between(rng: &mut impl Rng, low: u64, high: u64) -> u64 {
    if high <= low {
        low
    } else {
        rng.gen_range(low..=high)
    }
}

/// Chunk length range for a sequential pass, given the bytes left.
pub type ChunkRule = fn(usize) -> (usize, usize);

fn small_chunks(left: usize) -> (usize, usize) {
    (1, left.min(127))
}

fn quarter_chunks(left: usize) -> (usize, usize) {
    ((left / 4).max(1), left)
}

fn large_chunks(left: usize) -> (usize, usize) {
    let low = if left >= 8 * KIB as usize { 8 * KIB as usize } else { 1 };
    (low, left.min(MIB as usize))
}

/// Sequential read and write passes: whether to start at `size - buf`
/// instead of 0, and how chunk lengths are picked.
pub const CHUNKED_PASSES: [(bool, ChunkRule); 3] = [
    (false, small_chunks),
    (true, quarter_chunks),
    (false, large_chunks),
];

/// Scatter/gather segment counts: 1..=16, then steps of 7 up to 128, then
/// steps of 64.
pub fn segment_counts(max: usize) -> Vec<usize> {
    let mut counts = Vec::new();
    let mut count = 1;
    let mut step = 1;
    while count <= max {
        counts.push(count);
        if count == 16 {
            step = 7;
        } else if count == 128 {
            step = 64;
        }
        count += step;
    }
    counts
}

/// Most segments passed to one vectored call.
pub const MAX_SEGMENTS: usize = 512;

/// Split `total` bytes into `count` segment lengths at random cut points.
/// Some segments come out empty.
pub fn random_split(rng: &mut impl Rng, total: usize, count: usize) -> Vec<usize> {
    let mut cuts: Vec<usize> = (1..count).map(|_| rng.gen_range(0..=total)).collect();
    cuts.sort_unstable();
    let mut lens = Vec::with_capacity(count);
    let mut previous = 0;
    for cut in cuts {
        lens.push(cut - previous);
        previous = cut;
    }
    lens.push(total - previous);
    lens
}

/// Consecutive mutable segments of `buf` with the given lengths.
pub fn segments_mut<'a>(buf: &'a mut [u8], lens: &[usize]) -> Vec<IoSliceMut<'a>> {
    let mut rest = buf;
    let mut segments = Vec::with_capacity(lens.len());
    for &len in lens {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(len);
        segments.push(IoSliceMut::new(head));
        rest = tail;
    }
    segments
}

/// Consecutive segments of `buf` with the given lengths.
pub fn segments<'a>(buf: &'a [u8], lens: &[usize]) -> Vec<IoSlice<'a>> {
    let mut rest = buf;
    let mut segments = Vec::with_capacity(lens.len());
    for &len in lens {
        let (head, tail) = rest.split_at(len);
        segments.push(IoSlice::new(head));
        rest = tail;
    }
    segments
}

/// Run `op` once per configured block size, each in its own sub-area named
/// `"{area} {size}"`. Sizes larger than the file are skipped.
pub fn for_each_block_size(
    ctx: &mut TestContext,
    io: &mut IoFile,
    area: &str,
    mut op: impl FnMut(&mut TestContext, &mut IoFile, BlockSize),
) {
    for block in ctx.config.run.block_sizes.clone() {
        ctx.report.sub(format!("{} {}", area, block));
        if block.bytes() > io.size {
            ctx.report.skipped(format!(
                "block size {} exceeds file size {}",
                block.bytes(),
                io.size
            ));
            continue;
        }
        op(ctx, io, block);
    }
}

/// Size of the scratch buffer for read and write tests.
pub fn test_buffer_size(ctx: &TestContext, file_size: u64) -> usize {
    ctx.config.run.clamp_buffer(64 * MIB).min(file_size) as usize
}

fn open_handles(ctx: &mut TestContext, path: PathBuf, size: u64) -> Option<IoFile> {
    let file = ctx.report.check_ok(create_replace(&path), "creating file21")?;

    let no_cache = match sys::open_no_cache(&path, true) {
        Ok(handle) => Some(handle),
        Err(e) if ctx.config.run.ignore_no_cache => {
            tracing::warn!(error = %e, "Unable to open I/O file uncached, skipping related tests");
            None
        }
        Err(e) => {
            ctx.report.failed(format_args!("opening file21 with O_DIRECT: {}", e));
            return None;
        }
    };
    let write_through = ctx
        .report
        .check_ok(sys::open_write_through(&path), "opening file21 with O_DSYNC")?;

    Some(IoFile {
        path,
        file,
        no_cache,
        write_through,
        size,
    })
}

fn run_mmap(ctx: &mut TestContext, io: &mut IoFile) {
    mmap::run(ctx, io);
}

fn reinit(ctx: &mut TestContext, io: &mut IoFile) {
    let chunk = IoFile::chunk(ctx);
    let result = io.reinit(chunk);
    ctx.report.check_ok(result, "re-initializing file21");
}

pub fn run(ctx: &mut TestContext) {
    ctx.report.sub("I/O");

    let Some(free) = ctx.free_space() else {
        return;
    };
    let size = match io_file_size(ctx.config.run.io_file_size, free) {
        Ok(size) => size,
        Err(reason) => {
            ctx.report.skipped(reason);
            return;
        }
    };

    let path = ctx.dirs.path("file21");
    let Some(mut io) = open_handles(ctx, path, size) else {
        return;
    };

    let chunk = IoFile::chunk(ctx);
    let prepared = match io.prepare(chunk) {
        Ok(Ok(())) => true,
        Ok(Err(problem)) => {
            ctx.report.failed(problem);
            false
        }
        Err(e) => {
            ctx.report.failed(format_args!("preparing file21: {}", e));
            false
        }
    };

    if prepared {
        let tests = ctx.config.tests.clone();
        let placement = ctx.config.run.mmap_placement;

        if tests.seek {
            seek::run(ctx, &mut io);
        }
        if tests.mmap && placement == MmapPlacement::First {
            run_mmap(ctx, &mut io);
            reinit(ctx, &mut io);
        }
        if tests.read_tests {
            read::run(ctx, &mut io);
        }
        if tests.read_perf {
            for_each_block_size(ctx, &mut io, "read", read::profile_block);
        }
        if tests.sendfile {
            sendfile::run(ctx, &mut io);
        }
        if tests.splice {
            splice::to_pipe(ctx, &mut io);
        }
        if tests.mmap && placement == MmapPlacement::Between {
            run_mmap(ctx, &mut io);
        }
        // Everything below rewrites the file content.
        if tests.write_tests {
            write::run(ctx, &mut io);
        }
        if tests.write_perf {
            for_each_block_size(ctx, &mut io, "write", write::profile_block);
        }
        if tests.splice {
            splice::to_file(ctx, &mut io);
        }
        if tests.fsync {
            fsync::run(ctx, &mut io);
        }
        if tests.mmap && placement == MmapPlacement::Last {
            reinit(ctx, &mut io);
            run_mmap(ctx, &mut io);
        }
    }

    ctx.report.sub("I/O cleanup");
    ctx.report.check_ok(io.file.set_len(0), "truncating file21");
    let path = io.path.clone();
    drop(io);
    ctx.report.check_ok(fs::remove_file(&path), "deleting file21");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_io_file_size() {
        assert_eq!(io_file_size(100 * KIB, 1024 * MIB), Ok(128 * KIB));
        assert_eq!(io_file_size(512 * MIB, 1024 * MIB), Ok(512 * MIB));
        // Not enough room: fall back to free space minus a reserve.
        assert_eq!(io_file_size(512 * MIB, 256 * MIB), Ok(192 * MIB));
        assert_eq!(io_file_size(512 * MIB, 100 * MIB), Ok(84 * MIB));
        assert!(io_file_size(512 * MIB, 20 * MIB).is_err());
        assert!(io_file_size(0, 1024 * MIB).is_err());
    }

    #[test]
    fn test_segment_counts() {
        let counts = segment_counts(MAX_SEGMENTS);
        assert_eq!(&counts[..16], &(1..=16).collect::<Vec<_>>()[..]);
        assert_eq!(&counts[16..19], &[23, 30, 37]);
        assert!(counts.contains(&128));
        assert!(counts.contains(&192));
        assert_eq!(*counts.last().unwrap(), 512);
    }

    #[test]
    fn test_random_split_covers_total() {
        let mut rng = rand::thread_rng();
        for count in [1, 2, 17, MAX_SEGMENTS] {
            let lens = random_split(&mut rng, 10_000, count);
            assert_eq!(lens.len(), count);
            assert_eq!(lens.iter().sum::<usize>(), 10_000);
        }
        assert_eq!(random_split(&mut rng, 0, 3), vec![0, 0, 0]);
    }

    #[test]
    fn test_segments_are_consecutive() {
        let mut buf: Vec<u8> = (0..10).collect();
        let lens = [3, 0, 7];
        let segs = segments(&buf, &lens);
        assert_eq!(&*segs[0], &[0, 1, 2]);
        assert!(segs[1].is_empty());
        assert_eq!(segs[2][0], 3);
        let segs = segments_mut(&mut buf, &lens);
        assert_eq!(segs[2].len(), 7);
    }

    #[test]
    fn test_prepare_and_reinit() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("file21");
        let file = create_replace(&path).unwrap();
        let write_through = sys::open_write_through(&path).unwrap();
        let mut io = IoFile {
            path: path.clone(),
            file,
            no_cache: None,
            write_through,
            size: 256 * KIB,
        };
        io.prepare(64 * KIB as usize).unwrap().unwrap();

        let content = fs::read(&path).unwrap();
        assert_eq!(content.len() as u64, 256 * KIB);
        assert!(PatternBuffer::verify(0, &content, DEFAULT_FILLER).is_ok());
    }

    #[test]
    fn test_check_pattern_records_mismatches() {
        let mut report = TestReport::new();
        let mut buf = vec![0u8; 2048];
        PatternBuffer::fill(4096, &mut buf, 0x33);
        assert!(check_pattern(&mut report, "ok", 4096, &buf, 0x33));
        buf[100] = 0;
        assert!(!check_pattern(&mut report, "bad", 4096, &buf, 0x33));
        assert_eq!(report.failure_count(), 1);
    }
}
