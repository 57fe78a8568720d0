// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Directory areas: open, enumeration, mkdir/rmdir, statvfs, and file
//! removal.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::report::Unit;
use crate::sys;

use super::{create_replace, TestContext};

/// Directories created and removed per mkdir/rmdir round.
pub const DIRS_PER_ROUND: u32 = 998;

fn open_close(dir: &Path) -> io::Result<()> {
    fs::read_dir(dir).map(drop)
}

/// Open `dir`, read it to the end and return the entry count.
fn enumerate(dir: &Path) -> io::Result<u64> {
    let mut count = 0u64;
    for entry in fs::read_dir(dir)? {
        entry?;
        count += 1;
    }
    Ok(count)
}

pub fn dir_open(ctx: &mut TestContext) {
    ctx.report.sub("dir open");

    let dirs = ctx.dirs.clone();
    let errors = [
        (dirs.empty_path("no-such-file"), libc::ENOENT),
        (dirs.empty_path("no-such-dir/no-such-file"), libc::ENOENT),
        (dirs.path("known-file/no-such-file"), libc::ENOTDIR),
    ];
    for (path, errno) in errors {
        ctx.report
            .expect_errno(fs::read_dir(&path), errno, format_args!("opendir {}", path.display()));
    }

    if ctx
        .report
        .check_ok(open_close(&dirs.empty), "opendir empty")
        .is_none()
    {
        return;
    }

    let m = ctx
        .profiler
        .profile("opendir/closedir empty", |_| open_close(&dirs.empty));
    ctx.report.profiled(m);
    if let Some(many) = &ctx.many_files {
        let m = ctx
            .profiler
            .profile("opendir/closedir manyfiles", |_| open_close(&many.dir));
        ctx.report.profiled(m);
    }
}

/// Every name in `dir` must be a decimal index below `count`, each seen
/// exactly once. Returns the failures found.
pub fn check_many_files_listing(dir: &Path, count: u32) -> io::Result<Vec<String>> {
    let mut seen = vec![false; count as usize];
    let mut problems = Vec::new();
    let mut found = 0u32;

    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        match name.parse::<u32>() {
            Ok(index) if index < count && !seen[index as usize] => {
                seen[index as usize] = true;
                found += 1;
            }
            _ => problems.push(format!("unexpected entry '{}' in manyfiles", name)),
        }
    }
    if found != count {
        problems.push(format!("enumerated {} files, expected {}", found, count));
    }
    Ok(problems)
}

pub fn dir_enum(ctx: &mut TestContext) {
    ctx.report.sub("dir enum");

    let empty = ctx.dirs.empty.clone();
    let Some(count) = ctx.report.check_ok(enumerate(&empty), "enumerating empty") else {
        return;
    };
    ctx.report
        .check(count == 0, || format!("empty directory yielded {} entries", count));

    if let Some(many) = ctx.many_files.clone() {
        let listing = check_many_files_listing(&many.dir, many.count);
        if let Some(problems) = ctx.report.check_ok(listing, "enumerating manyfiles") {
            for problem in problems {
                ctx.report.failed(problem);
            }
        }
    }

    let m = ctx
        .profiler
        .profile("opendir/readdir/closedir empty", |_| enumerate(&empty).map(drop));
    ctx.report.profiled(m);
    if let Some(many) = &ctx.many_files {
        let expected = u64::from(many.count);
        let m = ctx
            .profiler
            .profile("opendir/readdir/closedir manyfiles", |_| {
                let count = enumerate(&many.dir)?;
                if count != expected {
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        format!("enumerated {} entries, expected {}", count, expected),
                    ));
                }
                Ok(())
            });
        ctx.report.profiled(m);
    }
}

pub fn mk_rm_dir(ctx: &mut TestContext) {
    ctx.report.sub("mkdir/rmdir");

    let dirs = ctx.dirs.clone();
    let rmdir_errors = [
        (dirs.empty_path("no-such-dir"), libc::ENOENT),
        (dirs.empty_path("no-such-dir/"), libc::ENOENT),
        (dirs.empty_path("no-such-dir/no-such-file"), libc::ENOENT),
        (dirs.empty_path("no-such-dir/no-such-file/"), libc::ENOENT),
        (dirs.path("known-file/no-such-file"), libc::ENOTDIR),
        (dirs.path("known-file/no-such-file/"), libc::ENOTDIR),
        (dirs.path("known-file"), libc::ENOTDIR),
        (dirs.path("known-file/"), libc::ENOTDIR),
        (dirs.path("."), libc::EINVAL),
    ];
    for (path, errno) in rmdir_errors {
        ctx.report
            .expect_errno(fs::remove_dir(&path), errno, format_args!("rmdir {}", path.display()));
    }
    ctx.report.expect_any_errno(
        fs::remove_dir(dirs.path("..")),
        &[libc::ENOTEMPTY, libc::EBUSY],
        "rmdir base/..",
    );
    ctx.report
        .expect_errno(fs::remove_dir(dirs.path("")), libc::ENOTEMPTY, "rmdir base/");

    let mkdir_errors = [
        (dirs.empty_path("no-such-dir/no-such-file"), libc::ENOENT),
        (dirs.path("known-file/no-such-file"), libc::ENOTDIR),
        (dirs.empty_path("."), libc::EEXIST),
        (dirs.empty_path(".."), libc::EEXIST),
    ];
    for (path, errno) in mkdir_errors {
        ctx.report
            .expect_errno(fs::create_dir(&path), errno, format_args!("mkdir {}", path.display()));
    }

    let subdir = dirs.path("subdir-1");
    ctx.report.check_ok(fs::create_dir(&subdir), "mkdir subdir-1");
    ctx.report.check_ok(fs::remove_dir(&subdir), "rmdir subdir-1");

    let file18 = dirs.path("file18");
    if ctx
        .report
        .check_ok(create_replace(&file18), "creating file18")
        .is_none()
    {
        return;
    }
    ctx.report
        .expect_errno(fs::remove_dir(&file18), libc::ENOTDIR, "rmdir file18");
    ctx.report
        .expect_errno(fs::create_dir(&file18), libc::EEXIST, "mkdir file18");
    ctx.report.expect_errno(
        fs::create_dir(dirs.path("file18/subdir")),
        libc::ENOTDIR,
        "mkdir file18/subdir",
    );

    let parent = dirs.path("subdir-2");
    if ctx
        .report
        .check_ok(fs::create_dir(&parent), "mkdir subdir-2")
        .is_none()
    {
        return;
    }
    let names: Vec<PathBuf> = (0..DIRS_PER_ROUND)
        .map(|i| parent.join(format!("s{:03}", i)))
        .collect();

    let target = ctx.profiler.target().as_nanos() as u64;
    let mut created = 0u64;
    let mut ns_create = 0u64;
    let mut ns_remove = 0u64;
    loop {
        let start = ctx.profiler.now_ns();
        for path in &names {
            if ctx
                .report
                .check_ok(fs::create_dir(path), format_args!("mkdir {}", path.display()))
                .is_none()
            {
                return;
            }
        }
        ns_create += ctx.profiler.now_ns() - start;
        created += u64::from(DIRS_PER_ROUND);

        let start = ctx.profiler.now_ns();
        for path in &names {
            if ctx
                .report
                .check_ok(fs::remove_dir(path), format_args!("rmdir {}", path.display()))
                .is_none()
            {
                return;
            }
        }
        ns_remove += ctx.profiler.now_ns() - start;

        if (ns_remove >= target && ns_create >= target) || ns_create + ns_remove >= target * 3 {
            break;
        }
    }

    ctx.report
        .value("mkdir", ns_create / created, Unit::NsPerOccurrence);
    ctx.report
        .value("rmdir", ns_remove / created, Unit::NsPerOccurrence);
}

pub fn stat_vfs(ctx: &mut TestContext) {
    ctx.report.sub("statvfs");

    let dirs = ctx.dirs.clone();
    if let Some(info) = ctx
        .report
        .check_ok(sys::volume_info(&dirs.empty), "statvfs empty")
    {
        tracing::info!(
            total = info.total_bytes,
            available = info.available_bytes,
            block_size = info.block_size,
            "Test volume"
        );
        ctx.report.check(info.available_bytes <= info.total_bytes, || {
            format!(
                "available bytes {} exceed total {}",
                info.available_bytes, info.total_bytes
            )
        });
    }

    let m = ctx
        .profiler
        .profile("statvfs/empty", |_| sys::volume_info(&dirs.empty).map(drop));
    ctx.report.profiled(m);
    let m = ctx
        .profiler
        .profile("statvfs/deep", |_| sys::volume_info(&dirs.deep).map(drop));
    ctx.report.profiled(m);
}

/// Delete `files`, returning the elapsed time.
fn delete_all(ctx: &mut TestContext, files: &[PathBuf]) -> Option<u64> {
    let start = ctx.profiler.now_ns();
    for path in files {
        ctx.report
            .check_ok(fs::remove_file(path), format_args!("unlink {}", path.display()))?;
    }
    Some(ctx.profiler.now_ns() - start)
}

pub fn rm(ctx: &mut TestContext) {
    ctx.report.sub("rm");

    if ctx.config.tests.rm {
        let dirs = ctx.dirs.clone();
        let errors: [(PathBuf, &[i32]); 10] = [
            (dirs.empty_path("no-such-file"), &[libc::ENOENT]),
            (dirs.empty_path("no-such-file/"), &[libc::ENOENT, libc::ENOTDIR]),
            (dirs.empty_path("no-such-dir/no-such-file"), &[libc::ENOENT]),
            (dirs.empty_path("no-such-dir/no-such-file/"), &[libc::ENOENT]),
            (dirs.path("known-file/no-such-file"), &[libc::ENOTDIR]),
            (dirs.path("known-file/no-such-file/"), &[libc::ENOTDIR]),
            (dirs.path("known-file/"), &[libc::ENOTDIR]),
            (dirs.empty_path("."), &[libc::EISDIR]),
            (dirs.empty_path(".."), &[libc::EISDIR]),
            (dirs.empty_path(""), &[libc::EISDIR]),
        ];
        for (path, errnos) in errors {
            ctx.report.expect_any_errno(
                fs::remove_file(&path),
                errnos,
                format_args!("unlink {}", path.display()),
            );
        }

        let file19 = dirs.path("file19");
        if ctx
            .report
            .check_ok(create_replace(&file19), "creating file19")
            .is_some()
        {
            ctx.report.check_ok(fs::remove_file(&file19), "unlink file19");
            ctx.report
                .expect_errno(fs::remove_file(&file19), libc::ENOENT, "unlink file19 again");
        }
    }

    if let Some(many) = ctx.many_files.take() {
        let files = many.files();
        if let Some(elapsed) = delete_all(ctx, &files) {
            ctx.report.value(
                format!("Deleted {} empty files from a single directory", many.count),
                elapsed,
                Unit::Ns,
            );
            ctx.report.value(
                "Delete file (single dir)",
                elapsed / files.len().max(1) as u64,
                Unit::NsPerOccurrence,
            );
        }
    }

    if let Some(tree) = ctx.tree.take() {
        if let Some(elapsed) = delete_all(ctx, &tree.files) {
            ctx.report.value(
                format!("Deleted {} empty files in tree", tree.files.len()),
                elapsed,
                Unit::Ns,
            );
            ctx.report.value(
                "Delete file (tree)",
                elapsed / tree.files.len().max(1) as u64,
                Unit::NsPerOccurrence,
            );
        }
    }
}
