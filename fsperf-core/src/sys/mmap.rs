// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Memory mapping wrappers.
//!
//! [`MappedFile`] maps a regular file read-only, copy-on-write or shared
//! read-write. The mmap tests use it to check that writes through a file
//! descriptor show up in the mapping and vice versa. [`PageBuffer`] is an anonymous, page-aligned
//! buffer suitable for `O_DIRECT` transfers.
//!
//! All unsafe operations are encapsulated here with bounds checking.

use std::fs::File;
use std::io;
use std::ops::{Deref, DerefMut};
use std::os::unix::io::AsRawFd;
use std::ptr::NonNull;

/// How a file is mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapAccess {
    ReadOnly,
    /// Private writable mapping; writes never reach the file.
    CopyOnWrite,
    ReadWrite,
}

impl MapAccess {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ReadOnly => "readonly",
            Self::CopyOnWrite => "writecopy",
            Self::ReadWrite => "readwrite",
        }
    }

    pub const fn is_writable(&self) -> bool {
        !matches!(self, Self::ReadOnly)
    }

    /// All modes, in test order.
    pub const ALL: [MapAccess; 3] = [Self::ReadOnly, Self::CopyOnWrite, Self::ReadWrite];
}

impl std::fmt::Display for MapAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Map `len` bytes of `fd` (or anonymous memory when `fd` is `None`).
fn map(fd: Option<i32>, len: usize, access: MapAccess) -> io::Result<NonNull<u8>> {
    if len == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "cannot map zero bytes",
        ));
    }

    let prot = if access.is_writable() {
        libc::PROT_READ | libc::PROT_WRITE
    } else {
        libc::PROT_READ
    };
    let (flags, fd) = match (fd, access) {
        (Some(fd), MapAccess::CopyOnWrite) => (libc::MAP_PRIVATE, fd),
        (Some(fd), _) => (libc::MAP_SHARED, fd),
        (None, _) => (libc::MAP_PRIVATE | libc::MAP_ANONYMOUS, -1),
    };

    // SAFETY: a null hint lets the kernel pick the address; len is non-zero
    // and fd is either a valid descriptor or -1 for anonymous memory.
    let ptr = unsafe { libc::mmap(std::ptr::null_mut(), len, prot, flags, fd, 0) };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }

    NonNull::new(ptr as *mut u8)
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))
}

fn unmap(ptr: NonNull<u8>, len: usize) {
    // SAFETY: ptr/len describe a mapping created by `map` that is unmapped
    // exactly once, from Drop.
    let result = unsafe { libc::munmap(ptr.as_ptr() as *mut libc::c_void, len) };
    if result != 0 {
        tracing::warn!(
            len = len,
            error = %io::Error::last_os_error(),
            "munmap failed"
        );
    }
}

/// Mapping of a file.
pub struct MappedFile {
    ptr: NonNull<u8>,
    len: usize,
    access: MapAccess,
}

// SAFETY: MappedFile owns its mapping; the raw pointer is not aliased by
// other Rust values.
unsafe impl Send for MappedFile {}

impl MappedFile {
    /// Map the first `len` bytes of `file`.
    pub fn map(file: &File, len: usize, access: MapAccess) -> io::Result<Self> {
        let ptr = map(Some(file.as_raw_fd()), len, access)?;
        tracing::debug!(len = len, access = %access, "Mapped file");
        Ok(Self { ptr, len, access })
    }

    pub fn access(&self) -> MapAccess {
        self.access
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping is valid for len bytes for the lifetime of self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Writable view. Fails for read-only mappings.
    pub fn as_mut_slice(&mut self) -> io::Result<&mut [u8]> {
        if !self.access.is_writable() {
            return Err(io::Error::from_raw_os_error(libc::EACCES));
        }
        // SAFETY: the mapping is valid and writable for len bytes, and the
        // &mut self borrow prevents aliasing.
        Ok(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) })
    }

    /// Copy `buf.len()` bytes at `offset` out of the mapping with volatile
    /// reads, so the current page content is observed.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> io::Result<()> {
        if offset.checked_add(buf.len()).map_or(true, |end| end > self.len) {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        for (i, b) in buf.iter_mut().enumerate() {
            // SAFETY: offset + i < offset + buf.len() <= len.
            *b = unsafe { std::ptr::read_volatile(self.ptr.as_ptr().add(offset + i)) };
        }
        Ok(())
    }

    /// Flush dirty pages synchronously.
    pub fn sync(&self) -> io::Result<()> {
        self.sync_range(0, self.len)
    }

    /// Flush the pages covering `offset..offset + len`. `offset` is rounded
    /// down to a page boundary.
    pub fn sync_range(&self, offset: usize, len: usize) -> io::Result<()> {
        if offset.checked_add(len).map_or(true, |end| end > self.len) {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        let page = super::DIRECT_IO_ALIGN;
        let start = offset & !(page - 1);
        // SAFETY: start..offset + len lies within the live mapping and start
        // is page aligned since the mapping itself is.
        let result = unsafe {
            libc::msync(
                self.ptr.as_ptr().add(start) as *mut libc::c_void,
                offset + len - start,
                libc::MS_SYNC,
            )
        };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        unmap(self.ptr, self.len);
        tracing::trace!(len = self.len, "Unmapped file");
    }
}

/// Page-aligned anonymous buffer.
pub struct PageBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: PageBuffer exclusively owns its anonymous mapping.
unsafe impl Send for PageBuffer {}

impl PageBuffer {
    /// Allocate `len` zeroed bytes, page aligned.
    pub fn new(len: usize) -> io::Result<Self> {
        let ptr = map(None, len, MapAccess::ReadWrite)?;
        Ok(Self { ptr, len })
    }
}

impl Deref for PageBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the anonymous mapping is valid for len bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for PageBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: the anonymous mapping is valid and writable for len bytes.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for PageBuffer {
    fn drop(&mut self) {
        unmap(self.ptr, self.len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::os::unix::fs::FileExt;
    use tempfile::TempDir;

    #[test]
    fn test_page_buffer_is_aligned_and_zeroed() {
        let buf = PageBuffer::new(3 * 4096).unwrap();
        assert_eq!(buf.as_ptr() as usize % 4096, 0);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zero_length_rejected() {
        assert!(PageBuffer::new(0).is_err());
    }

    #[test]
    fn test_write_visible_in_shared_mapping() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mapped");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .unwrap();
        file.set_len(8192).unwrap();

        let mut mapping = MappedFile::map(&file, 8192, MapAccess::ReadWrite).unwrap();
        file.write_all_at(b"coherent", 5000).unwrap();

        let mut seen = [0u8; 8];
        mapping.read_at(5000, &mut seen).unwrap();
        assert_eq!(&seen, b"coherent");

        mapping.as_mut_slice().unwrap()[100..104].copy_from_slice(b"back");
        mapping.sync_range(100, 4).unwrap();
        let mut read = [0u8; 4];
        file.read_exact_at(&mut read, 100).unwrap();
        assert_eq!(&read, b"back");
    }

    #[test]
    fn test_read_only_mapping_refuses_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ro");
        std::fs::write(&path, vec![1u8; 4096]).unwrap();
        let file = File::open(&path).unwrap();
        let mut mapping = MappedFile::map(&file, 4096, MapAccess::ReadOnly).unwrap();
        assert_eq!(mapping.as_slice()[0], 1);
        assert!(mapping.as_mut_slice().is_err());
        assert!(mapping.read_at(4090, &mut [0u8; 10]).is_err());
        assert!(mapping.sync_range(4000, 200).is_err());
    }

    #[test]
    fn test_copy_on_write_stays_private() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cow");
        std::fs::write(&path, vec![7u8; 4096]).unwrap();
        let file = OpenOptions::new().read(true).write(true).open(&path).unwrap();

        let mut mapping = MappedFile::map(&file, 4096, MapAccess::CopyOnWrite).unwrap();
        mapping.as_mut_slice().unwrap()[0] = 9;
        mapping.sync().unwrap();
        drop(mapping);

        assert_eq!(std::fs::read(&path).unwrap()[0], 7);
        assert_eq!(MapAccess::CopyOnWrite.name(), "writecopy");
    }
}
