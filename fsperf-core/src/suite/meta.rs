// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! File metadata areas: open, fstat, fchmod, futimes, stat, chmod, utimes
//! and rename.

use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::sys;

use super::{create_replace, unix_now_ns, with_suffix, TestContext, TestDirs};

use self::Disposition::{Create, CreateReplace, Open, OpenOrCreate};

const SEC: u64 = 1_000_000_000;

/// Offset of the second test time from now.
const TIME2_OFFSET_SECS: u64 = 3636;

/// The lookup failures every path-based area checks first.
fn path_errors(dirs: &TestDirs) -> [(PathBuf, i32); 3] {
    [
        (dirs.empty_path("no-such-file"), libc::ENOENT),
        (dirs.empty_path("no-such-dir/no-such-file"), libc::ENOENT),
        (dirs.path("known-file/no-such-file"), libc::ENOTDIR),
    ]
}

fn open_read(path: &Path) -> io::Result<File> {
    File::open(path)
}

fn open_write(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).open(path)
}

/// Permission modes alternated by the chmod areas: `(even, odd)`.
fn alternate_modes(mode: u32) -> (u32, u32) {
    let keep = mode & !0o777;
    (keep | 0o400, keep | 0o640)
}

// =============================================================================
// open
// =============================================================================

/// How an open treats an existing or missing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Fail when missing.
    Open,
    /// Create when missing.
    OpenOrCreate,
    /// Create, replacing any existing file.
    CreateReplace,
    /// Create, failing when the file exists.
    Create,
}

/// One row of the open matrix.
struct OpenCase {
    /// Size to set up before the open; `None` deletes the file.
    existing: Option<u64>,
    /// Bytes to write after a successful open.
    next_write: u64,
    disposition: Disposition,
    truncate: bool,
    /// Expected errno; `None` means success.
    errno: Option<i32>,
}

const fn case(
    existing: Option<u64>,
    next_write: u64,
    disposition: Disposition,
    truncate: bool,
    errno: Option<i32>,
) -> OpenCase {
    OpenCase {
        existing,
        next_write,
        disposition,
        truncate,
        errno,
    }
}

const OPEN_MATRIX: &[OpenCase] = &[
    case(None, 0, Open, false, Some(libc::ENOENT)),
    case(None, 0, OpenOrCreate, false, None),
    case(Some(0), 0, OpenOrCreate, false, None),
    case(Some(0), 0, Open, false, None),
    case(Some(0), 0, Open, true, None),
    case(Some(0), 10, OpenOrCreate, true, None),
    case(Some(10), 10, OpenOrCreate, true, None),
    case(Some(10), 0, Open, true, None),
    case(None, 0, Open, true, Some(libc::ENOENT)),
    case(None, 0, OpenOrCreate, true, None),
    case(Some(0), 0, CreateReplace, false, None),
    case(None, 0, CreateReplace, false, None),
    case(Some(0), 0, Create, false, Some(libc::EEXIST)),
    case(None, 0, Create, false, None),
    case(None, 10, Create, true, None),
    case(Some(10), 10, Create, true, Some(libc::EEXIST)),
    case(Some(10), 0, CreateReplace, true, None),
    case(None, 0, CreateReplace, true, None),
];

impl OpenCase {
    fn options(&self) -> OpenOptions {
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        match self.disposition {
            Disposition::Open => {}
            Disposition::OpenOrCreate => {
                options.create(true);
            }
            Disposition::CreateReplace => {
                options.create(true).truncate(true);
            }
            Disposition::Create => {
                options.create_new(true);
            }
        }
        if self.truncate {
            options.truncate(true);
        }
        options
    }

    /// Size the file must have right after a successful open.
    fn expected_size(&self) -> u64 {
        match self.existing {
            Some(size)
                if !self.truncate && matches!(
                    self.disposition,
                    Disposition::Open | Disposition::OpenOrCreate
                ) =>
            {
                size
            }
            _ => 0,
        }
    }
}

fn setup_open_case(path: &Path, existing: Option<u64>) -> io::Result<()> {
    match existing {
        Some(size) => create_replace(path)?.set_len(size),
        None => match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        },
    }
}

fn run_open_case(ctx: &mut TestContext, row: usize, case: &OpenCase, path: &Path) {
    if let Err(e) = setup_open_case(path, case.existing) {
        ctx.report.failed(format_args!("open case {}: setup: {}", row, e));
        return;
    }

    let what = format!("open case {} ({:?}, truncate={})", row, case.disposition, case.truncate);
    let opened = case.options().open(path);
    let mut file = match case.errno {
        Some(errno) => {
            ctx.report.expect_errno(opened, errno, &what);
            return;
        }
        None => match ctx.report.check_ok(opened, &what) {
            Some(file) => file,
            None => return,
        },
    };

    let expected = case.expected_size();
    if let Some(meta) = ctx.report.check_ok(file.metadata(), &what) {
        ctx.report.check(meta.len() == expected, || {
            format!("{}: size {}, expected {}", what, meta.len(), expected)
        });
    }
    if expected == 0 {
        let mut byte = [0u8; 1];
        let read = file.read(&mut byte);
        if let Some(n) = ctx.report.check_ok(read, &what) {
            ctx.report
                .check(n == 0, || format!("{}: read {} bytes from empty file", what, n));
        }
    }

    let name = path.as_os_str().as_bytes();
    let mut left = case.next_write as usize;
    while left > 0 {
        let chunk = left.min(name.len());
        if ctx.report.check_ok(file.write_all(&name[..chunk]), &what).is_none() {
            break;
        }
        left -= chunk;
    }
}

pub fn open(ctx: &mut TestContext) {
    ctx.report.sub("open");

    for (path, errno) in path_errors(&ctx.dirs) {
        ctx.report
            .expect_errno(open_read(&path), errno, format_args!("open {}", path.display()));
    }

    let file1 = ctx.dirs.path("file1");
    for (row, case) in OPEN_MATRIX.iter().enumerate() {
        run_open_case(ctx, row, case, &file1);
    }

    ctx.report
        .check_ok(fs::remove_file(&file1), "deleting file1");
    let created = OpenOptions::new().write(true).create_new(true).open(&file1);
    ctx.report.check_ok(created, "exclusive create of file1");
    let again = OpenOptions::new().write(true).create_new(true).open(&file1);
    ctx.report
        .expect_errno(again, libc::EEXIST, "exclusive create of existing file1");

    let deep1 = ctx.dirs.deep_path("file1");
    ctx.report
        .check_ok(create_replace(&deep1), "creating deep file1");

    for (label, path) in [("", &file1), ("/deep", &deep1)] {
        let m = ctx
            .profiler
            .profile(format!("open/close/readonly{}", label), |_| open_read(path).map(drop));
        ctx.report.profiled(m);
        let m = ctx
            .profiler
            .profile(format!("open/close/writeonly{}", label), |_| open_write(path).map(drop));
        ctx.report.profiled(m);
    }

    if let Some(tree) = &ctx.tree {
        let m = ctx
            .profiler
            .profile_tree("open/close/readonly/manytree", &tree.files, 1, |path, _| {
                open_read(path).map(drop)
            });
        ctx.report.profiled(m);
        let m = ctx
            .profiler
            .profile_tree("open/close/writeonly/manytree", &tree.files, 1, |path, _| {
                open_write(path).map(drop)
            });
        ctx.report.profiled(m);
    }
}

// =============================================================================
// Handle-based metadata
// =============================================================================

pub fn fstat(ctx: &mut TestContext) {
    ctx.report.sub("fstat");

    let Some(file) = ctx
        .report
        .check_ok(create_replace(&ctx.dirs.path("file2")), "creating file2")
    else {
        return;
    };
    let m = ctx.profiler.profile("fstat", |_| file.metadata().map(drop));
    ctx.report.profiled(m);
}

pub fn fchmod(ctx: &mut TestContext) {
    ctx.report.sub("fchmod");

    let Some(file) = ctx
        .report
        .check_ok(create_replace(&ctx.dirs.path("file4")), "creating file4")
    else {
        return;
    };
    let Some(meta) = ctx.report.check_ok(file.metadata(), "fstat file4") else {
        return;
    };
    let original = meta.mode();
    let (even, odd) = alternate_modes(original);

    let m = ctx.profiler.profile("fchmod", |iteration| {
        let mode = if iteration & 1 == 1 { odd } else { even };
        file.set_permissions(Permissions::from_mode(mode))
    });
    ctx.report.profiled(m);

    let restored = file.set_permissions(Permissions::from_mode(original));
    ctx.report.check_ok(restored, "restoring file4 mode");
}

/// Check that a `set mtime only` and then a `set atime only` round-trip
/// through `set` and `query`, leaving the other time alone.
fn check_time_round_trip(
    ctx: &mut TestContext,
    what: &str,
    mut set: impl FnMut(Option<u64>, Option<u64>) -> io::Result<()>,
    mut query: impl FnMut() -> io::Result<fs::Metadata>,
    time1: u64,
    time2: u64,
) {
    let Some(before) = ctx.report.check_ok(query(), what) else {
        return;
    };

    if ctx
        .report
        .check_ok(set(None, Some(time2)), format_args!("{}: set mtime", what))
        .is_none()
    {
        return;
    }
    let Some(after) = ctx.report.check_ok(query(), what) else {
        return;
    };
    let mtime = after.mtime() as u64;
    ctx.report.check(mtime >> 2 == (time2 / SEC) >> 2, || {
        format!("{}: mtime {} s, expected {} s", what, mtime, time2 / SEC)
    });
    let (atime_before, atime_after) = (atime_us(&before), atime_us(&after));
    ctx.report.check(atime_before == atime_after, || {
        format!("{}: atime changed from {} us to {} us", what, atime_before, atime_after)
    });

    if ctx
        .report
        .check_ok(set(Some(time1), None), format_args!("{}: set atime", what))
        .is_none()
    {
        return;
    }
    let Some(last) = ctx.report.check_ok(query(), what) else {
        return;
    };
    let atime = last.atime() as u64;
    ctx.report.check(atime >> 2 == (time1 / SEC) >> 2, || {
        format!("{}: atime {} s, expected {} s", what, atime, time1 / SEC)
    });
    ctx.report.check(mtime_us(&last) == mtime_us(&after), || {
        format!("{}: mtime changed by setting atime", what)
    });
}

fn atime_us(meta: &fs::Metadata) -> i64 {
    meta.atime() * 1_000_000 + meta.atime_nsec() / 1000
}

fn mtime_us(meta: &fs::Metadata) -> i64 {
    meta.mtime() * 1_000_000 + meta.mtime_nsec() / 1000
}

fn test_times() -> (u64, u64) {
    let time1 = unix_now_ns();
    (time1, time1.saturating_sub(TIME2_OFFSET_SECS * SEC))
}

pub fn futimes(ctx: &mut TestContext) {
    ctx.report.sub("futimes");

    let Some(file) = ctx
        .report
        .check_ok(create_replace(&ctx.dirs.path("file5")), "creating file5")
    else {
        return;
    };
    let (time1, time2) = test_times();

    check_time_round_trip(
        ctx,
        "futimens file5",
        |atime, mtime| sys::set_file_times(&file, atime, mtime),
        || file.metadata(),
        time1,
        time2,
    );

    let m = ctx.profiler.profile("futimens", |iteration| {
        let mtime = if iteration & 1 == 1 { time1 } else { time2 };
        sys::set_file_times(&file, None, Some(mtime))
    });
    ctx.report.profiled(m);
}

// =============================================================================
// Path-based metadata
// =============================================================================

pub fn stat(ctx: &mut TestContext) {
    ctx.report.sub("stat");

    for (path, errno) in path_errors(&ctx.dirs) {
        ctx.report
            .expect_errno(fs::metadata(&path), errno, format_args!("stat {}", path.display()));
    }

    let shallow = ctx.dirs.path("file3");
    let deep = ctx.dirs.deep_path("file3");
    for (label, path) in [("", &shallow), ("/deep", &deep)] {
        if ctx
            .report
            .check_ok(create_replace(path), format_args!("creating {}", path.display()))
            .is_none()
        {
            continue;
        }
        let m = ctx
            .profiler
            .profile(format!("stat{}", label), |_| fs::metadata(path).map(drop));
        ctx.report.profiled(m);
        let m = ctx
            .profiler
            .profile(format!("lstat{}", label), |_| fs::symlink_metadata(path).map(drop));
        ctx.report.profiled(m);
    }

    if let Some(tree) = &ctx.tree {
        let m = ctx
            .profiler
            .profile_tree("stat/manytree", &tree.files, 1, |path, _| {
                fs::symlink_metadata(path).map(drop)
            });
        ctx.report.profiled(m);
    }
}

pub fn chmod(ctx: &mut TestContext) {
    ctx.report.sub("chmod");

    for (path, errno) in path_errors(&ctx.dirs) {
        let result = fs::set_permissions(&path, Permissions::from_mode(0o644));
        ctx.report
            .expect_errno(result, errno, format_args!("chmod {}", path.display()));
    }

    let shallow = ctx.dirs.path("file14");
    let deep = ctx.dirs.deep_path("file14");
    for (label, path) in [("", &shallow), ("/deep", &deep)] {
        if ctx
            .report
            .check_ok(create_replace(path), format_args!("creating {}", path.display()))
            .is_none()
        {
            continue;
        }
        let Some(meta) = ctx.report.check_ok(fs::symlink_metadata(path), "stat before chmod")
        else {
            continue;
        };
        let original = meta.mode();
        let (even, odd) = alternate_modes(original);
        let m = ctx.profiler.profile(format!("chmod{}", label), |iteration| {
            let mode = if iteration & 1 == 1 { odd } else { even };
            fs::set_permissions(path, Permissions::from_mode(mode))
        });
        ctx.report.profiled(m);
        ctx.report.check_ok(
            fs::set_permissions(path, Permissions::from_mode(original)),
            "restoring mode",
        );
    }

    if let Some(tree) = &ctx.tree {
        let Some(first) = tree.files.first() else {
            return;
        };
        let Some(meta) = ctx.report.check_ok(fs::symlink_metadata(first), "stat tree file") else {
            return;
        };
        let original = meta.mode();
        let (even, odd) = alternate_modes(original);
        let m = ctx
            .profiler
            .profile_tree("chmod/manytree", &tree.files, 1, |path, iteration| {
                let mode = if iteration & 1 == 1 { odd } else { even };
                fs::set_permissions(path, Permissions::from_mode(mode))
            });
        ctx.report.profiled(m);
        for path in &tree.files {
            let restored = fs::set_permissions(path, Permissions::from_mode(original));
            if ctx
                .report
                .check_ok(restored, format_args!("restoring {}", path.display()))
                .is_none()
            {
                break;
            }
        }
    }
}

pub fn utimes(ctx: &mut TestContext) {
    ctx.report.sub("utimes");

    let (time1, time2) = test_times();
    for (path, errno) in path_errors(&ctx.dirs) {
        let result = sys::set_path_times(&path, Some(time1), Some(time2));
        ctx.report
            .expect_errno(result, errno, format_args!("utimensat {}", path.display()));
    }

    let shallow = ctx.dirs.path("file15");
    let deep = ctx.dirs.deep_path("file15");
    for (label, path) in [("", &shallow), ("/deep", &deep)] {
        if ctx
            .report
            .check_ok(create_replace(path), format_args!("creating {}", path.display()))
            .is_none()
        {
            continue;
        }
        if label.is_empty() {
            check_time_round_trip(
                ctx,
                "utimensat file15",
                |atime, mtime| sys::set_path_times(path, atime, mtime),
                || fs::symlink_metadata(path),
                time1,
                time2,
            );
        }
        let m = ctx.profiler.profile(format!("utimensat{}", label), |iteration| {
            let (atime, mtime) = if iteration & 1 == 1 { (time1, time2) } else { (time2, time1) };
            sys::set_path_times(path, Some(atime), Some(mtime))
        });
        ctx.report.profiled(m);
    }

    if let Some(tree) = &ctx.tree {
        let m = ctx
            .profiler
            .profile_tree("utimensat/manytree", &tree.files, 1, |path, iteration| {
                let (atime, mtime) = if iteration & 1 == 1 { (time1, time2) } else { (time2, time1) };
                sys::set_path_times(path, Some(atime), Some(mtime))
            });
        ctx.report.profiled(m);
    }
}

// =============================================================================
// rename
// =============================================================================

/// Rename `a` to `b` on even iterations and back on odd ones.
fn ping_pong(a: &Path, b: &Path, iteration: u64) -> io::Result<()> {
    if iteration & 1 == 0 {
        fs::rename(a, b)
    } else {
        fs::rename(b, a)
    }
}

pub fn rename(ctx: &mut TestContext) {
    ctx.report.sub("rename");

    let dirs = ctx.dirs.clone();
    let errors = [
        (
            dirs.empty_path("no-such-file"),
            dirs.empty_path("other-no-such-file"),
            libc::ENOENT,
        ),
        (
            dirs.path("no-such-dir/no-such-file"),
            dirs.empty_path("other-no-such-file"),
            libc::ENOENT,
        ),
        (
            dirs.path("known-file/no-such-file"),
            dirs.empty_path("other-no-such-file"),
            libc::ENOTDIR,
        ),
    ];
    for (from, to, errno) in errors {
        ctx.report.expect_errno(
            fs::rename(&from, &to),
            errno,
            format_args!("rename {} -> {}", from.display(), to.display()),
        );
    }

    let file16 = dirs.path("file16");
    if ctx
        .report
        .check_ok(create_replace(&file16), "creating file16")
        .is_none()
    {
        return;
    }
    let missing = with_suffix(&dirs.base, "-no-such-dir/file16");
    ctx.report.expect_errno(
        fs::rename(&file16, &missing),
        libc::ENOENT,
        "rename file16 into missing directory",
    );
    ctx.report.expect_errno(
        fs::rename(&missing, &file16),
        libc::ENOENT,
        "rename from missing directory onto file16",
    );

    let deep15 = dirs.deep_path("file15");
    ctx.report
        .check_ok(create_replace(&deep15).map(drop), "creating deep file15");

    for (label, path) in [("", &file16), ("/deep", &deep15)] {
        let other = with_suffix(path, "-other");
        let m = ctx
            .profiler
            .profile(format!("rename{}", label), |iteration| {
                ping_pong(path, &other, iteration)
            });
        ctx.report.profiled(m);
    }

    if let Some(tree) = &ctx.tree {
        let m = ctx
            .profiler
            .profile_tree("rename/manytree", &tree.files, 1, |path, iteration| {
                ping_pong(path, &with_suffix(path, "-renamed"), iteration)
            });
        ctx.report.profiled(m);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_alternate_modes_keep_file_type() {
        let (even, odd) = alternate_modes(0o100644);
        assert_eq!(even, 0o100400);
        assert_eq!(odd, 0o100640);
    }

    #[test]
    fn test_open_matrix_expectations() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("file1");
        for case in OPEN_MATRIX {
            setup_open_case(&path, case.existing).unwrap();
            let result = case.options().open(&path);
            match case.errno {
                Some(errno) => assert_eq!(result.unwrap_err().raw_os_error(), Some(errno)),
                None => {
                    let file = result.unwrap();
                    assert_eq!(file.metadata().unwrap().len(), case.expected_size());
                }
            }
        }
    }

    #[test]
    fn test_ping_pong_restores_after_even_count() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        fs::write(&a, b"x").unwrap();
        for iteration in 0..4 {
            ping_pong(&a, &b, iteration).unwrap();
        }
        assert!(a.exists());
        assert!(!b.exists());
    }
}
