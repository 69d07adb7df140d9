// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Store memory allocators.
//!
//! # Safety
//!
//! The mmap allocator contains `unsafe` code for mmap/munmap; all unsafe
//! operations are confined to small functions in this module.

use std::os::fd::RawFd;
use std::ptr;
use std::sync::atomic::{AtomicI64, Ordering};

/// A region of store memory.
///
/// Move-only; dropping an `Allocation` does NOT free the memory. The region
/// must be returned to its allocator via `free()`.
#[derive(Debug)]
pub struct Allocation {
    /// Pointer to the region. Always valid for `size` bytes.
    pub address: *mut u8,
    /// Usable bytes in the region.
    pub size: i64,
    /// Backing file descriptor (-1 for heap allocations).
    pub fd: RawFd,
    /// Total size of the backing mmap (equals `size` here).
    pub mmap_size: i64,
    /// Whether this came from the fallback (disk) allocator.
    pub fallback_allocated: bool,
}

// The region is only touched through the store's synchronized handles.
unsafe impl Send for Allocation {}

impl Allocation {
    /// Copy `bytes` into the region at `offset`. Returns false when the
    /// write would run past the end.
    pub fn write_at(&self, offset: usize, bytes: &[u8]) -> bool {
        if offset + bytes.len() > self.size as usize {
            return false;
        }
        if bytes.is_empty() {
            return true;
        }
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.address.add(offset), bytes.len());
        }
        true
    }

    /// Copy `len` bytes out of the region starting at `offset`.
    pub fn read_at(&self, offset: usize, len: usize) -> Vec<u8> {
        assert!(
            offset + len <= self.size as usize,
            "read past end of allocation"
        );
        let mut out = vec![0u8; len];
        if len > 0 {
            unsafe {
                ptr::copy_nonoverlapping(self.address.add(offset), out.as_mut_ptr(), len);
            }
        }
        out
    }
}

/// Store allocator interface.
pub trait IAllocator: Send + Sync {
    /// Allocate from the primary (RAM-backed) pool.
    fn allocate(&self, bytes: usize) -> Option<Allocation>;

    /// Allocate from the fallback (disk-backed) pool.
    fn fallback_allocate(&self, bytes: usize) -> Option<Allocation>;

    /// Return a region to the allocator.
    fn free(&self, allocation: Allocation);

    /// Maximum primary footprint in bytes.
    fn footprint_limit(&self) -> i64;

    /// Currently allocated primary bytes.
    fn allocated(&self) -> i64;

    /// Currently allocated fallback bytes.
    fn fallback_allocated(&self) -> i64;
}

// ── Heap allocator ──────────────────────────────────────────────────────

/// Plain heap allocator. Used by single-process deployments and tests where
/// cross-process shared memory is unnecessary.
pub struct HeapAllocator {
    footprint_limit: i64,
    allocated: AtomicI64,
}

impl HeapAllocator {
    pub fn new(footprint_limit: i64) -> Self {
        Self {
            footprint_limit,
            allocated: AtomicI64::new(0),
        }
    }
}

impl IAllocator for HeapAllocator {
    fn allocate(&self, bytes: usize) -> Option<Allocation> {
        let size = bytes.max(1);
        let current = self.allocated.load(Ordering::Relaxed);
        if current + size as i64 > self.footprint_limit {
            return None;
        }
        let boxed = vec![0u8; size].into_boxed_slice();
        let address = Box::into_raw(boxed) as *mut u8;
        self.allocated.fetch_add(size as i64, Ordering::Relaxed);
        Some(Allocation {
            address,
            size: size as i64,
            fd: -1,
            mmap_size: size as i64,
            fallback_allocated: false,
        })
    }

    fn fallback_allocate(&self, _bytes: usize) -> Option<Allocation> {
        None
    }

    fn free(&self, allocation: Allocation) {
        let size = allocation.size as usize;
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                allocation.address,
                size,
            )));
        }
        self.allocated.fetch_sub(size as i64, Ordering::Relaxed);
    }

    fn footprint_limit(&self) -> i64 {
        self.footprint_limit
    }

    fn allocated(&self) -> i64 {
        self.allocated.load(Ordering::Relaxed)
    }

    fn fallback_allocated(&self) -> i64 {
        0
    }
}

// ── Mmap allocator ──────────────────────────────────────────────────────

/// Shared-memory allocator backed by mmap'd files.
///
/// Primary allocations map files under `plasma_directory` (typically a tmpfs
/// such as /dev/shm); fallback allocations map files under
/// `fallback_directory` on disk.
pub struct MmapAllocator {
    footprint_limit: i64,
    alignment: usize,
    allocated: AtomicI64,
    fallback_allocated_bytes: AtomicI64,
    plasma_directory: String,
    fallback_directory: String,
}

impl MmapAllocator {
    pub fn new(footprint_limit: i64, plasma_directory: &str, fallback_directory: &str) -> Self {
        Self {
            footprint_limit,
            alignment: 64,
            allocated: AtomicI64::new(0),
            fallback_allocated_bytes: AtomicI64::new(0),
            plasma_directory: plasma_directory.to_string(),
            fallback_directory: fallback_directory.to_string(),
        }
    }

    fn mmap_allocate(&self, bytes: usize, directory: &str) -> Option<Allocation> {
        let aligned_size = self.align_up(bytes.max(1));
        let fd = create_backing_fd(directory, aligned_size)?;

        let address = unsafe {
            let ptr = libc::mmap(
                ptr::null_mut(),
                aligned_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            );
            if ptr == libc::MAP_FAILED {
                libc::close(fd);
                return None;
            }
            ptr as *mut u8
        };

        Some(Allocation {
            address,
            size: aligned_size as i64,
            fd,
            mmap_size: aligned_size as i64,
            fallback_allocated: false,
        })
    }

    fn align_up(&self, size: usize) -> usize {
        (size + self.alignment - 1) & !(self.alignment - 1)
    }
}

impl IAllocator for MmapAllocator {
    fn allocate(&self, bytes: usize) -> Option<Allocation> {
        let aligned = self.align_up(bytes.max(1)) as i64;
        if self.allocated.load(Ordering::Relaxed) + aligned > self.footprint_limit {
            return None;
        }
        let alloc = self.mmap_allocate(bytes, &self.plasma_directory)?;
        self.allocated.fetch_add(alloc.size, Ordering::Relaxed);
        Some(alloc)
    }

    fn fallback_allocate(&self, bytes: usize) -> Option<Allocation> {
        if self.fallback_directory.is_empty() {
            return None;
        }
        let mut alloc = self.mmap_allocate(bytes, &self.fallback_directory)?;
        alloc.fallback_allocated = true;
        self.fallback_allocated_bytes
            .fetch_add(alloc.size, Ordering::Relaxed);
        Some(alloc)
    }

    fn free(&self, allocation: Allocation) {
        let size = allocation.size;
        let is_fallback = allocation.fallback_allocated;

        unsafe {
            if !allocation.address.is_null() {
                libc::munmap(allocation.address as *mut libc::c_void, size as usize);
            }
            if allocation.fd >= 0 {
                libc::close(allocation.fd);
            }
        }

        if is_fallback {
            self.fallback_allocated_bytes
                .fetch_sub(size, Ordering::Relaxed);
        } else {
            self.allocated.fetch_sub(size, Ordering::Relaxed);
        }
    }

    fn footprint_limit(&self) -> i64 {
        self.footprint_limit
    }

    fn allocated(&self) -> i64 {
        self.allocated.load(Ordering::Relaxed)
    }

    fn fallback_allocated(&self) -> i64 {
        self.fallback_allocated_bytes.load(Ordering::Relaxed)
    }
}

/// Create an unlinked backing file of `size` bytes and return its fd.
fn create_backing_fd(directory: &str, size: usize) -> Option<RawFd> {
    use std::ffi::CString;

    let path = CString::new(format!(
        "{}/tidal-store-{}-{}",
        directory,
        std::process::id(),
        tidal_util::time::current_time_ns()
    ))
    .ok()?;

    unsafe {
        let fd = libc::open(
            path.as_ptr(),
            libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
            0o600,
        );
        if fd < 0 {
            return None;
        }
        // Unlink immediately so the file vanishes when the fd closes.
        libc::unlink(path.as_ptr());
        if libc::ftruncate(fd, size as libc::off_t) != 0 {
            libc::close(fd);
            return None;
        }
        Some(fd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_allocator_roundtrip() {
        let allocator = HeapAllocator::new(1024 * 1024);
        let alloc = allocator.allocate(4096).unwrap();
        assert!(!alloc.address.is_null());
        assert!(allocator.allocated() >= 4096);

        assert!(alloc.write_at(0, b"hello"));
        assert_eq!(alloc.read_at(0, 5), b"hello");

        allocator.free(alloc);
        assert_eq!(allocator.allocated(), 0);
    }

    #[test]
    fn test_heap_allocator_oom() {
        let allocator = HeapAllocator::new(100);
        assert!(allocator.allocate(1024).is_none());
    }

    #[test]
    fn test_heap_allocator_zero_size() {
        let allocator = HeapAllocator::new(1024);
        let alloc = allocator.allocate(0).unwrap();
        assert!(alloc.size >= 1);
        allocator.free(alloc);
    }

    #[test]
    fn test_write_past_end_rejected() {
        let allocator = HeapAllocator::new(1024);
        let alloc = allocator.allocate(8).unwrap();
        assert!(!alloc.write_at(4, b"too-long"));
        allocator.free(alloc);
    }

    #[test]
    fn test_mmap_allocator_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = MmapAllocator::new(1024 * 1024, dir.path().to_str().unwrap(), "");

        let alloc = allocator.allocate(4096).unwrap();
        assert!(!alloc.address.is_null());
        assert!(alloc.write_at(100, b"mapped"));
        assert_eq!(alloc.read_at(100, 6), b"mapped");

        allocator.free(alloc);
        assert_eq!(allocator.allocated(), 0);
    }

    #[test]
    fn test_mmap_allocator_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = MmapAllocator::new(128, dir.path().to_str().unwrap(), "");
        assert!(allocator.allocate(4096).is_none());
    }
}
