// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Thin wrappers over the system calls the test suite needs and std does
//! not expose: cache-bypassing opens, `futimens`, `statvfs`, positioned
//! vectored I/O, `sendfile`, `splice` and pipes.

pub mod mmap;

use std::fs::{File, OpenOptions};
use std::io::{self, IoSlice, IoSliceMut};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};
use std::path::Path;

pub use mmap::{MapAccess, MappedFile, PageBuffer};

/// Alignment required for `O_DIRECT` buffers, offsets and sizes.
pub const DIRECT_IO_ALIGN: usize = 4096;

/// Largest count a single Linux `sendfile` call transfers.
pub const SENDFILE_MAX: usize = 0x7fff_f000;

/// Open an existing file bypassing the page cache.
pub fn open_no_cache(path: &Path, write: bool) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(write)
        .custom_flags(libc::O_DIRECT)
        .open(path)
}

/// Open an existing file with synchronous data writes.
pub fn open_write_through(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_DSYNC)
        .open(path)
}

fn timespec(ns: Option<u64>) -> libc::timespec {
    match ns {
        Some(ns) => libc::timespec {
            tv_sec: (ns / 1_000_000_000) as libc::time_t,
            tv_nsec: (ns % 1_000_000_000) as libc::c_long,
        },
        None => libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_OMIT,
        },
    }
}

/// Set access and modification times in nanoseconds since the epoch.
/// `None` leaves a time unchanged.
pub fn set_file_times(file: &File, atime_ns: Option<u64>, mtime_ns: Option<u64>) -> io::Result<()> {
    let times = [timespec(atime_ns), timespec(mtime_ns)];
    // SAFETY: fd is valid for the lifetime of `file`; times has two entries.
    let result = unsafe { libc::futimens(file.as_raw_fd(), times.as_ptr()) };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Set access and modification times of a path.
pub fn set_path_times(path: &Path, atime_ns: Option<u64>, mtime_ns: Option<u64>) -> io::Result<()> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
    let times = [timespec(atime_ns), timespec(mtime_ns)];
    // SAFETY: c_path is NUL terminated; times has two entries.
    let result = unsafe { libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), times.as_ptr(), 0) };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Filesystem capacity figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeInfo {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub available_bytes: u64,
    pub block_size: u64,
    pub total_files: u64,
    pub free_files: u64,
}

/// Query the filesystem holding `path`.
pub fn volume_info(path: &Path) -> io::Result<VolumeInfo> {
    let st = nix::sys::statvfs::statvfs(path).map_err(errno_to_io)?;
    let fragment = st.fragment_size() as u64;
    Ok(VolumeInfo {
        total_bytes: st.blocks() as u64 * fragment,
        free_bytes: st.blocks_free() as u64 * fragment,
        available_bytes: st.blocks_available() as u64 * fragment,
        block_size: st.block_size() as u64,
        total_files: st.files() as u64,
        free_files: st.files_free() as u64,
    })
}

/// Bytes available to unprivileged users on the filesystem holding `path`.
pub fn free_space(path: &Path) -> io::Result<u64> {
    volume_info(path).map(|info| info.available_bytes)
}

fn errno_to_io(errno: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(errno as i32)
}

/// `preadv(2)`: scatter-read into `bufs` from `offset`. The file position
/// is not used or changed.
pub fn read_vectored_at(file: &File, bufs: &mut [IoSliceMut<'_>], offset: u64) -> io::Result<usize> {
    nix::sys::uio::preadv(file, bufs, offset as libc::off_t).map_err(errno_to_io)
}

/// `pwritev(2)`: gather-write `bufs` at `offset`.
pub fn write_vectored_at(file: &File, bufs: &[IoSlice<'_>], offset: u64) -> io::Result<usize> {
    nix::sys::uio::pwritev(file, bufs, offset as libc::off_t).map_err(errno_to_io)
}

/// `sendfile(2)`: copy up to `count` bytes from `input` at `*offset` to `out`.
pub fn sendfile(out: &impl AsRawFd, input: &File, offset: &mut u64, count: usize) -> io::Result<usize> {
    let mut off = *offset as libc::off_t;
    // SAFETY: both descriptors are valid; off is a valid in/out pointer.
    let sent = unsafe { libc::sendfile(out.as_raw_fd(), input.as_raw_fd(), &mut off, count) };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    *offset = off as u64;
    Ok(sent as usize)
}

/// `splice(2)` between a file (at `*file_offset`) and a pipe.
pub fn splice(
    from: &impl AsRawFd,
    from_offset: Option<&mut u64>,
    to: &impl AsRawFd,
    to_offset: Option<&mut u64>,
    count: usize,
) -> io::Result<usize> {
    let mut from_off = from_offset.as_ref().map(|off| **off as libc::loff_t);
    let mut to_off = to_offset.as_ref().map(|off| **off as libc::loff_t);
    let from_ptr = from_off
        .as_mut()
        .map_or(std::ptr::null_mut(), |off| off as *mut libc::loff_t);
    let to_ptr = to_off
        .as_mut()
        .map_or(std::ptr::null_mut(), |off| off as *mut libc::loff_t);

    // SAFETY: descriptors are valid; offset pointers are null or point to
    // locals that outlive the call.
    let moved = unsafe {
        libc::splice(
            from.as_raw_fd(),
            from_ptr,
            to.as_raw_fd(),
            to_ptr,
            count,
            0,
        )
    };
    if moved < 0 {
        return Err(io::Error::last_os_error());
    }
    if let (Some(off), Some(new)) = (from_offset, from_off) {
        *off = new as u64;
    }
    if let (Some(off), Some(new)) = (to_offset, to_off) {
        *off = new as u64;
    }
    Ok(moved as usize)
}

/// Create a pipe, returning `(read_end, write_end)`.
pub fn pipe() -> io::Result<(File, File)> {
    let mut fds = [0i32; 2];
    // SAFETY: fds has room for the two descriptors.
    let result = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe2 succeeded, so both descriptors are open and owned here.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    Ok((File::from(read), File::from(write)))
}

/// Resize a pipe buffer. Returns the size actually applied.
pub fn set_pipe_size(pipe: &impl AsRawFd, size: usize) -> io::Result<usize> {
    // SAFETY: F_SETPIPE_SZ takes an int argument.
    let result = unsafe { libc::fcntl(pipe.as_raw_fd(), libc::F_SETPIPE_SZ, size as libc::c_int) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(result as usize)
}
