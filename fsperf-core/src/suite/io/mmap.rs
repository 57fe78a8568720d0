// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Memory mappings of the I/O file in each access mode, plus short-lived
//! mappings that outlive their file handles.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::Path;
use std::time::Duration;

use rand::Rng;

use super::{check_pattern, rand_between, IoFile, KIB, MIB, PAGE};
use crate::pattern::{PatternBuffer, DEFAULT_FILLER};
use crate::report::{TestReport, Unit};
use crate::suite::{create_replace, TestContext};
use crate::sys::{MapAccess, MappedFile, PageBuffer};

/// Mappings are halved on failure down to this size.
const MIN_MAPPING: usize = 2 * MIB as usize;
/// Region the writable mappings modify.
const DIRTY_REGION: usize = 2 * MIB as usize;
const DIRTY_FILLER: u8 = 0xf7;
const COHERENCY_FILLER: u8 = 0xf8;
const FLUSH_SIZES: [usize; 6] = [PAGE, 2 * PAGE, 3 * PAGE, 8 * PAGE, 16 * PAGE, 2 * MIB as usize];
const NO_HANDLE_ROUNDS: u32 = 32;
const NO_HANDLE_SIZE: usize = 256 * KIB as usize;

/// Map as much of the file as possible, halving the length on failure.
fn map_largest(file: &File, size: u64, access: MapAccess) -> io::Result<MappedFile> {
    let mut len = usize::try_from(size).unwrap_or(usize::MAX);
    loop {
        match MappedFile::map(file, len, access) {
            Ok(map) => return Ok(map),
            Err(e) if len <= MIN_MAPPING => return Err(e),
            Err(e) => {
                tracing::debug!(len = len, error = %e, "Mapping failed, retrying with half");
                len /= 2;
            }
        }
    }
}

/// Touch one byte per page and return the mean cost per page.
fn page_in(ctx: &TestContext, map: &MappedFile) -> u64 {
    let pages = (map.len() / PAGE).max(1);
    let mut byte = [0u8; 1];
    let mut sum = 0u64;
    let start = ctx.profiler.now_ns();
    for page in 0..pages {
        if map.read_at(page * PAGE, &mut byte).is_ok() {
            sum += u64::from(byte[0]);
        }
    }
    let elapsed = ctx.profiler.now_ns() - start;
    tracing::trace!(sum = sum, "Paged in mapping");
    elapsed / pages as u64
}

/// Write `size` as a u64 at +8 of every page in `offset..offset + size`,
/// then flush that range.
fn touch_and_flush(map: &mut MappedFile, offset: usize, size: usize) -> io::Result<()> {
    let bytes = (size as u64).to_le_bytes();
    {
        let view = map.as_mut_slice()?;
        for page in (offset..offset + size).step_by(PAGE) {
            view[page + 8..page + 16].copy_from_slice(&bytes);
        }
    }
    map.sync_range(offset, size)
}

/// Check that every page up to `extent` carries `size` at +8 when read
/// around the page cache.
fn check_flushed(report: &mut TestReport, no_cache: &File, extent: usize, size: usize, chunk: usize) {
    let Some(mut buf) = report.check_ok(PageBuffer::new(chunk), "allocating page buffer") else {
        return;
    };
    let mut errors = 0;
    let mut offset = 0usize;
    while offset < extent && errors < 32 {
        let len = chunk.min(extent - offset);
        if let Err(e) = no_cache.read_exact_at(&mut buf[..len], offset as u64) {
            report.failed(format_args!("uncached read at {:#x}: {}", offset, e));
            return;
        }
        for page in (0..len).step_by(PAGE) {
            let mut stored = [0u8; 8];
            stored.copy_from_slice(&buf[page + 8..page + 16]);
            let stored = u64::from_le_bytes(stored);
            if stored != size as u64 {
                report.failed(format_args!(
                    "flush of {} bytes missing at {:#x}: found {:#x}",
                    size,
                    offset + page + 8,
                    stored
                ));
                errors += 1;
                if errors >= 32 {
                    break;
                }
            }
        }
        offset += len;
    }
}

fn touch_flush_profiles(ctx: &mut TestContext, io: &IoFile, map: &mut MappedFile) {
    let chunk = ctx.config.run.clamp_buffer(2 * MIB).max(PAGE as u64) as usize / PAGE * PAGE;
    for size in FLUSH_SIZES {
        if size > map.len() {
            continue;
        }
        let used = map.len() / size * size;
        let mut flushed = 0usize;
        let m = ctx.profiler.profile(format!("touch/flush/{}", size), |i| {
            let offset = (i as usize).wrapping_mul(size) % used;
            touch_and_flush(&mut *map, offset, size)?;
            flushed = flushed.max(offset + size);
            Ok(())
        });
        ctx.report.profiled(m);

        if let Some(no_cache) = &io.no_cache {
            check_flushed(&mut ctx.report, no_cache, flushed.min(used), size, chunk);
        }
    }
}

/// Random writes through the file handle must show up in the mapping.
fn coherency(ctx: &mut TestContext, io: &IoFile, map: &MappedFile) {
    let max = ctx
        .config
        .run
        .clamp_buffer(DIRTY_REGION.min(map.len() / 2) as u64)
        .max(1) as usize;
    let mut buf = vec![0u8; max];
    let mut seen = vec![0u8; max];
    let mut rng = rand::thread_rng();

    for i in 0..128 {
        let len = rng.gen_range(1..=max);
        let offset = rand_between(&mut rng, 0, (map.len() - len) as u64);
        let data = &mut buf[..len];
        PatternBuffer::fill(offset, data, COHERENCY_FILLER);
        data[0] = !data[0];
        data[len - 1] = !data[len - 1];
        if ctx.report.check_ok(io.file.write_all_at(data, offset), "coherency write").is_none() {
            return;
        }

        let mapped = &mut seen[..len];
        match map.read_at(offset as usize, mapped) {
            Ok(()) => {
                ctx.report.check(mapped == &*data, || {
                    format!("write #{} at {:#x} of {} bytes not visible in the mapping", i, offset, len)
                });
            }
            Err(e) => ctx.report.failed(format_args!("reading mapping at {:#x}: {}", offset, e)),
        }

        PatternBuffer::fill(offset, data, DEFAULT_FILLER);
        ctx.report.check_ok(io.file.write_all_at(data, offset), "restoring after coherency write");
    }
}

fn map_one(ctx: &mut TestContext, io: &IoFile, access: MapAccess) {
    let mut map = match map_largest(&io.file, io.size, access) {
        Ok(map) => map,
        Err(e) => {
            ctx.report.failed(format_args!("mmap {}: {}", access, e));
            return;
        }
    };

    let per_page = page_in(ctx, &map);
    ctx.report.value(format!("page-in {}", access), per_page, Unit::NsPerOccurrence);

    check_pattern(&mut ctx.report, &format!("mmap {}", access), 0, map.as_slice(), DEFAULT_FILLER);

    let coherency_enabled = ctx.config.tests.mmap_coherency;
    if access.is_writable() {
        let dirty = DIRTY_REGION.min(map.len());
        match map.as_mut_slice() {
            Ok(view) => PatternBuffer::fill(0, &mut view[..dirty], DIRTY_FILLER),
            Err(e) => {
                ctx.report.failed(format_args!("writable view of {} mapping: {}", access, e));
                return;
            }
        }

        if access == MapAccess::ReadWrite && coherency_enabled {
            let mut buf = vec![0u8; 4 * KIB as usize];
            for offset in (0..dirty).step_by(buf.len()) {
                let len = buf.len().min(dirty - offset);
                match io.file.read_exact_at(&mut buf[..len], offset as u64) {
                    Ok(()) => {
                        if !check_pattern(&mut ctx.report, "mapped write seen by read", offset as u64, &buf[..len], DIRTY_FILLER) {
                            break;
                        }
                    }
                    Err(e) => {
                        ctx.report.failed(format_args!("read after mapped write at {:#x}: {}", offset, e));
                        break;
                    }
                }
            }
            ctx.report.check_ok(map.sync_range(0, dirty), "msync dirty region");
        }

        if access == MapAccess::ReadWrite {
            touch_flush_profiles(ctx, io, &mut map);
        }
    }

    if coherency_enabled && access != MapAccess::CopyOnWrite {
        coherency(ctx, io, &map);
    }
}

/// Create a file of random bytes, map it, close every handle and use the
/// mapping afterwards.
fn no_handle_round(dir: &Path, round: u32, rng: &mut impl Rng) -> io::Result<Option<String>> {
    let path = dir.join(format!("mmap-{}.noh", round));

    let mut content = PageBuffer::new(NO_HANDLE_SIZE)?;
    rng.fill(&mut content[..]);

    let uncached = if round & 3 == 3 {
        None
    } else {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .custom_flags(libc::O_DIRECT)
            .open(&path)
            .ok()
    };
    let mut writer = match uncached {
        Some(file) => file,
        None => create_replace(&path)?,
    };
    writer.write_all(&content)?;
    drop(writer);

    let mut extra = if round & 3 == 3 { Some(File::open(&path)?) } else { None };
    let file = OpenOptions::new().read(true).write(true).open(&path)?;
    if round & 3 == 1 {
        extra = Some(File::open(&path)?);
    }

    let mapped = MappedFile::map(&file, NO_HANDLE_SIZE, MapAccess::ReadWrite);
    if round & 7 == 7 {
        extra = None;
    }
    drop(file);
    if round & 7 == 5 {
        extra = None;
    }
    let mut map = mapped?;

    std::thread::sleep(Duration::from_millis(2));
    let mut problem = None;
    if map.as_slice() != &content[..] {
        problem = Some(format!("mapping of {} does not match what was written", path.display()));
    }

    let view = map.as_mut_slice()?;
    for (byte, original) in view.iter_mut().zip(content.iter_mut()) {
        *byte = !*byte;
        *original = !*original;
    }
    map.sync()?;
    drop(map);
    drop(extra);

    if problem.is_none() && fs::read(&path)? != &content[..] {
        problem = Some(format!("inverted mapping of {} not written back", path.display()));
    }
    fs::remove_file(&path)?;
    Ok(problem)
}

pub fn run(ctx: &mut TestContext, io: &mut IoFile) {
    ctx.report.sub("mmap");

    for access in MapAccess::ALL {
        map_one(ctx, io, access);
    }

    let mut rng = rand::thread_rng();
    for round in 0..NO_HANDLE_ROUNDS {
        match no_handle_round(&ctx.dirs.base, round, &mut rng) {
            Ok(None) => {}
            Ok(Some(problem)) => ctx.report.failed(problem),
            Err(e) => {
                ctx.report.failed(format_args!("mapping without handles, round {}: {}", round, e));
                break;
            }
        }
    }
}
