// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! File size changes: zero extension, EOF after shrinking, and the cost of
//! `ftruncate` within one allocation unit.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};

use super::{create_replace, TestContext};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Minimum free space for the area to run.
pub const MIN_FREE: u64 = MIB;

/// Size walk, growing and shrinking across block and page boundaries.
pub const SIZE_CHANGES: [u64; 21] = [
    1023,
    1024,
    1024,
    1025,
    8192,
    11111,
    MIB,
    8 * MIB,
    8 * MIB,
    4 * MIB,
    2 * MIB + 1,
    MIB - 1,
    65537,
    65536,
    32768,
    8000,
    7999,
    7998,
    1024,
    1,
    0,
];

/// Read `len` bytes from the current position and check they are zero.
fn check_zero_extension(file: &mut File, mut len: u64) -> io::Result<bool> {
    let mut buf = [0u8; 4096];
    while len > 0 {
        let chunk = len.min(buf.len() as u64) as usize;
        buf[..chunk].fill(0xff);
        file.read_exact(&mut buf[..chunk])?;
        if buf[..chunk].iter().any(|&b| b != 0) {
            return Ok(false);
        }
        len -= chunk as u64;
    }
    Ok(true)
}

/// Apply one size change and verify it. The file position follows the end.
fn change_size(file: &mut File, old: u64, new: u64) -> io::Result<Result<(), String>> {
    file.set_len(new)?;
    let size = file.metadata()?.len();
    if size != new {
        return Ok(Err(format!("size {} after set_len({})", size, new)));
    }

    if new > old {
        if !check_zero_extension(file, new - old)? {
            return Ok(Err(format!("extension {}..{} is not zeroed", old, new)));
        }
    } else {
        let mut byte = [0u8; 1];
        let read = file.read(&mut byte)?;
        if read != 0 {
            return Ok(Err(format!("read {} bytes past the end after shrink to {}", read, new)));
        }
        file.seek(SeekFrom::Start(new))?;
    }
    Ok(Ok(()))
}

pub fn run(ctx: &mut TestContext) {
    ctx.report.sub("chsize");

    let Some(free) = ctx.free_space() else {
        return;
    };
    if free < MIN_FREE {
        ctx.report.skipped(format!(
            "Insufficient free space: {} bytes, requires >= 1MB",
            free
        ));
        return;
    }

    let path = ctx.dirs.path("file20");
    let Some(mut file) = ctx.report.check_ok(create_replace(&path), "creating file20") else {
        return;
    };
    if let Some(meta) = ctx.report.check_ok(file.metadata(), "fstat file20") {
        ctx.report
            .check(meta.len() == 0, || format!("new file has size {}", meta.len()));
    }

    let mut old = 0u64;
    for new in SIZE_CHANGES {
        if new + 64 * KIB >= free {
            continue;
        }
        match change_size(&mut file, old, new) {
            Ok(Ok(())) => {}
            Ok(Err(problem)) => ctx.report.failed(problem),
            Err(e) => ctx
                .report
                .failed(format_args!("resizing {} -> {}: {}", old, new, e)),
        }
        old = new;
    }

    if ctx
        .report
        .check_ok(file.set_len(64 * KIB), "set_len 64K")
        .is_some()
    {
        let m = ctx.profiler.profile("ftruncate/noalloc", |iteration| {
            file.set_len(64 * KIB - (iteration & 255) - 128)
        });
        ctx.report.profiled(m);
    }

    ctx.report.check_ok(file.set_len(0), "set_len 0");
    drop(file);
    ctx.report.check_ok(fs::remove_file(&path), "deleting file20");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_size_walk() {
        let temp = TempDir::new().unwrap();
        let mut file = create_replace(&temp.path().join("f")).unwrap();
        let mut old = 0;
        for new in SIZE_CHANGES {
            change_size(&mut file, old, new).unwrap().unwrap();
            assert_eq!(file.stream_position().unwrap(), new);
            old = new;
        }
    }

    #[test]
    fn test_dirty_extension_detected() {
        let temp = TempDir::new().unwrap();
        let mut file = create_replace(&temp.path().join("f")).unwrap();
        file.write_all(&[0, 0, 7, 0]).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        assert!(!check_zero_extension(&mut file, 4).unwrap());
    }
}
