// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! File copies: `fs::copy`, copies through handles, positional copies and
//! `sendfile` between two regular files.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::Path;

use rand::Rng;

use super::io::{align_up, fill_pattern, rand_between, KIB, MIB, SIZE_ALIGN};
use super::{create_replace, with_suffix, TestContext};
use crate::sys;

/// Free space kept aside when sizing the copy source.
const COPY_RESERVE: u64 = 16 * MIB;
const COMPARE_CHUNK: usize = 64 * KIB as usize;

/// Size of the copy source for `requested` bytes with `free` bytes
/// available. Source and copy must both fit. `Err` carries the skip reason.
pub fn copy_file_size(requested: u64, free: u64) -> Result<u64, String> {
    let mut size = align_up(requested.max(MIB), SIZE_ALIGN);
    while size > MIB && size.saturating_mul(2).saturating_add(COPY_RESERVE) > free {
        size /= 2;
    }
    if size.saturating_mul(2).saturating_add(COPY_RESERVE) > free {
        return Err(format!(
            "Insufficient free space: {} bytes, requires >= {}",
            free,
            2 * MIB + COPY_RESERVE
        ));
    }
    Ok(size)
}

/// Compare `len` bytes of two files at `offset`. Returns a description of
/// the first difference.
fn compare_range(a: &File, b: &File, offset: u64, len: u64) -> io::Result<Option<String>> {
    let mut left = vec![0u8; COMPARE_CHUNK];
    let mut right = vec![0u8; COMPARE_CHUNK];
    let mut done = 0u64;
    while done < len {
        let chunk = (len - done).min(COMPARE_CHUNK as u64) as usize;
        let at = offset + done;
        a.read_exact_at(&mut left[..chunk], at)?;
        b.read_exact_at(&mut right[..chunk], at)?;
        if let Some(pos) = left[..chunk].iter().zip(&right[..chunk]).position(|(x, y)| x != y) {
            return Ok(Some(format!(
                "copies differ at {:#x}: {:#04x} vs {:#04x}",
                at + pos as u64,
                left[pos],
                right[pos]
            )));
        }
        done += chunk as u64;
    }
    Ok(None)
}

/// Compare two whole files, sizes included.
fn compare_files(source: &Path, copy: &Path) -> io::Result<Option<String>> {
    let a = File::open(source)?;
    let b = File::open(copy)?;
    let (size_a, size_b) = (a.metadata()?.len(), b.metadata()?.len());
    if size_a != size_b {
        return Ok(Some(format!(
            "{} is {} bytes, {} is {}",
            source.display(),
            size_a,
            copy.display(),
            size_b
        )));
    }
    compare_range(&a, &b, 0, size_a)
}

fn check_same(ctx: &mut TestContext, what: &str, source: &Path, copy: &Path) {
    match compare_files(source, copy) {
        Ok(None) => {}
        Ok(Some(problem)) => ctx.report.failed(format_args!("{}: {}", what, problem)),
        Err(e) => ctx.report.failed(format_args!("{}: comparing: {}", what, e)),
    }
}

/// Copy through two open handles with `io::copy`.
fn copy_by_handles(source: &Path, dest: &Path) -> io::Result<u64> {
    let mut from = File::open(source)?;
    let mut to = create_replace(dest)?;
    io::copy(&mut from, &mut to)
}

/// Copy in two halves with positional reads and writes, second half first.
fn copy_in_halves(source: &Path, dest: &Path) -> io::Result<()> {
    let from = File::open(source)?;
    let to = create_replace(dest)?;
    let size = from.metadata()?.len();
    let half = size / 2;
    let mut buf = vec![0u8; COMPARE_CHUNK];
    for (start, end) in [(half, size), (0, half)] {
        let mut offset = start;
        while offset < end {
            let len = (end - offset).min(buf.len() as u64) as usize;
            from.read_exact_at(&mut buf[..len], offset)?;
            to.write_all_at(&buf[..len], offset)?;
            offset += len as u64;
        }
    }
    Ok(())
}

/// `sendfile` `count` bytes from `from` at `offset` into `to` at its current
/// position. Returns the bytes moved, which is short at end of file.
fn sendfile_range(to: &File, from: &File, offset: u64, count: u64) -> io::Result<u64> {
    let mut position = offset;
    let mut left = count;
    while left > 0 {
        let chunk = left.min(sys::SENDFILE_MAX as u64) as usize;
        let before = position;
        let sent = sys::sendfile(to, from, &mut position, chunk)?;
        if sent == 0 {
            break;
        }
        if position != before + sent as u64 {
            return Err(io::Error::other(format!(
                "sendfile offset {:#x} after sending {} bytes from {:#x}",
                position, sent, before
            )));
        }
        left -= sent as u64;
    }
    Ok(count - left)
}

fn sendfile_checks(ctx: &mut TestContext, source: &Path, dest: &Path, size: u64) -> io::Result<()> {
    let from = File::open(source)?;

    let mut to = create_replace(dest)?;
    let sent = sendfile_range(&to, &from, 0, size)?;
    ctx.report.check(sent == size, || format!("sendfile copy moved {} of {} bytes", sent, size));
    check_same(ctx, "sendfile copy", source, dest);

    to.set_len(0)?;
    to.seek(SeekFrom::Start(0))?;
    let sent = sendfile_range(&to, &from, 0, size + 4096)?;
    ctx.report.check(sent == size, || {
        format!("over-long sendfile moved {} bytes from a {} byte file", sent, size)
    });
    check_same(ctx, "over-long sendfile copy", source, dest);

    let mut rng = rand::thread_rng();
    let zeros = vec![0u8; COMPARE_CHUNK];
    for i in 0..64 {
        let len = rand_between(&mut rng, 1, if i < 32 { 64 * KIB } else { size });
        let offset = rng.gen_range(0..=size - len);

        let mut cleared = 0u64;
        while cleared < len {
            let chunk = (len - cleared).min(zeros.len() as u64) as usize;
            to.write_all_at(&zeros[..chunk], offset + cleared)?;
            cleared += chunk as u64;
        }
        to.seek(SeekFrom::Start(offset))?;
        let sent = sendfile_range(&to, &from, offset, len)?;
        if !ctx.report.check(sent == len, || {
            format!("partial sendfile of {} at {:#x} moved {}", len, offset, sent)
        }) {
            continue;
        }
        match compare_range(&from, &to, offset, len)? {
            None => {}
            Some(problem) => ctx.report.failed(format_args!("partial sendfile of {} at {:#x}: {}", len, offset, problem)),
        }
    }
    Ok(())
}

fn error_cases(ctx: &mut TestContext) {
    let dirs = ctx.dirs.clone();
    let cases = [
        (dirs.empty_path("no-such-file"), dirs.path("file22"), libc::ENOENT),
        (dirs.path("no-such-dir/no-such-file"), dirs.path("file22"), libc::ENOENT),
        (dirs.path("known-file/no-such-file"), dirs.path("file22"), libc::ENOTDIR),
        (dirs.path("known-file"), with_suffix(&dirs.base, "-no-such-dir/file22"), libc::ENOENT),
        (dirs.path("known-file"), dirs.path("known-file/file22"), libc::ENOTDIR),
    ];
    for (from, to, errno) in cases {
        ctx.report.expect_errno(
            fs::copy(&from, &to),
            errno,
            format_args!("copy {} -> {}", from.display(), to.display()),
        );
    }
}

pub fn run(ctx: &mut TestContext) {
    ctx.report.sub("copy");

    error_cases(ctx);

    let Some(free) = ctx.free_space() else {
        return;
    };
    let size = match copy_file_size(ctx.config.run.io_file_size, free) {
        Ok(size) => size,
        Err(reason) => {
            ctx.report.skipped(reason);
            return;
        }
    };

    let source = ctx.dirs.path("file22");
    let dest = ctx.dirs.path("file23");
    let chunk = ctx.config.run.clamp_buffer(MIB) as usize;
    let created = create_replace(&source)
        .and_then(|mut file| fill_pattern(&mut file, size, chunk, crate::pattern::DEFAULT_FILLER));
    if ctx.report.check_ok(created, "creating file22").is_none() {
        return;
    }

    if let Some(copied) = ctx.report.check_ok(fs::copy(&source, &dest), "copy file22 -> file23") {
        ctx.report.check(copied == size, || format!("copy moved {} of {} bytes", copied, size));
        check_same(ctx, "copy", &source, &dest);
    }

    ctx.report.expect_errno(
        OpenOptions::new().write(true).create_new(true).open(&dest),
        libc::EEXIST,
        "copy onto existing file23",
    );

    if ctx.report.check_ok(copy_by_handles(&source, &dest), "copy by handles").is_some() {
        check_same(ctx, "copy by handles", &source, &dest);
    }
    if ctx.report.check_ok(copy_in_halves(&source, &dest), "copy in halves").is_some() {
        check_same(ctx, "copy in halves", &source, &dest);
    }

    let checked = sendfile_checks(ctx, &source, &dest, size);
    ctx.report.check_ok(checked, "sendfile between files");

    let m = ctx.profiler.profile_io("copy-replace", size, |_| {
        fs::remove_file(&dest)?;
        fs::copy(&source, &dest).map(drop)
    });
    ctx.report.profiled(m);

    let m = ctx.profiler.profile_io("copy by handles", size, |_| {
        copy_by_handles(&source, &dest).map(drop)
    });
    ctx.report.profiled(m);

    let handles = File::open(&source).and_then(|from| Ok((from, create_replace(&dest)?)));
    if let Some((from, mut to)) = ctx.report.check_ok(handles, "opening sendfile copy handles") {
        let m = ctx.profiler.profile_io("sendfile copy", size, |_| {
            to.seek(SeekFrom::Start(0))?;
            let sent = sendfile_range(&to, &from, 0, size)?;
            if sent != size {
                return Err(io::Error::other(format!("sendfile moved {} of {} bytes", sent, size)));
            }
            Ok(())
        });
        ctx.report.profiled(m);
    }

    for path in [&source, &dest] {
        ctx.report
            .check_ok(fs::remove_file(path), format_args!("deleting {}", path.display()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::DEFAULT_FILLER;
    use tempfile::TempDir;

    #[test]
    fn test_copy_file_size() {
        assert_eq!(copy_file_size(4 * MIB, 1024 * MIB), Ok(4 * MIB));
        assert_eq!(copy_file_size(1000, 1024 * MIB), Ok(MIB));
        assert_eq!(copy_file_size(64 * MIB, 48 * MIB), Ok(16 * MIB));
        assert!(copy_file_size(MIB, 17 * MIB).is_err());
    }

    #[test]
    fn test_copies_match_source() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a");
        let dest = temp.path().join("b");
        let size = 300 * KIB + 17;
        let mut file = create_replace(&source).unwrap();
        fill_pattern(&mut file, size, 64 * 1024, DEFAULT_FILLER).unwrap();

        assert_eq!(copy_by_handles(&source, &dest).unwrap(), size);
        assert_eq!(compare_files(&source, &dest).unwrap(), None);

        copy_in_halves(&source, &dest).unwrap();
        assert_eq!(compare_files(&source, &dest).unwrap(), None);

        let to = create_replace(&dest).unwrap();
        let from = File::open(&source).unwrap();
        assert_eq!(sendfile_range(&to, &from, 0, size + 4096).unwrap(), size);
        assert_eq!(compare_files(&source, &dest).unwrap(), None);
    }

    #[test]
    fn test_compare_reports_difference() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        fs::write(&a, vec![1u8; 100_000]).unwrap();
        let mut other = vec![1u8; 100_000];
        other[70_000] = 2;
        fs::write(&b, &other).unwrap();

        let problem = compare_files(&a, &b).unwrap().unwrap();
        assert!(problem.contains("0x11170"), "{}", problem);

        fs::write(&b, vec![1u8; 10]).unwrap();
        assert!(compare_files(&a, &b).unwrap().is_some());
    }
}
