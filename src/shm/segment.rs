// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! POSIX shared memory region management.
//!
//! A concrete, complete implementation of [`SharedMemoryResource`] using
//! `shm_open`, `ftruncate`, and `mmap`. The core never calls into this
//! module directly (see `src/shm/mod.rs` docs and `SPEC_FULL.md` §D) — it
//! exists so the contract has at least one real implementation behind it.
//!
//! # Region lifecycle
//!
//! 1. Writer creates a region with `PosixShmRegion::create()`
//! 2. Readers open the same region with `PosixShmRegion::open()`
//! 3. The region is automatically unmapped on drop
//! 4. The writer should call `PosixShmRegion::unlink()` on cleanup
//!
//! # Naming convention
//!
//! Region names must start with `/` and contain no other `/`.
//! Example: `/lola_service42_event7`

use super::{Result, SegmentHandle, ShmError, SharedMemoryResource};
use std::ffi::CString;
use std::io;
use std::ptr;

/// A mapped POSIX shared memory region.
///
/// Automatically unmaps the memory region on drop. Does NOT automatically
/// unlink the region (the creator's responsibility).
pub struct PosixShmRegion {
    ptr: *mut u8,
    size: usize,
    name: String,
}

// SAFETY: the mapped region is shared memory accessed from multiple
// threads/processes; synchronization over it is the caller's job (it holds
// a `Slot`/`TransactionLog` array built on atomics), not this wrapper's.
unsafe impl Send for PosixShmRegion {}
unsafe impl Sync for PosixShmRegion {}

impl PosixShmRegion {
    /// Create a new shared memory region.
    ///
    /// If a region with this name already exists, it is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if region creation or mapping fails.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        Self::validate_name(name)?;

        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;

        // SAFETY:
        // - c_name is a valid null-terminated CString created above
        // - shm_unlink is safe to call with any valid path; errors are ignored
        // - shm_open with O_CREAT|O_RDWR|O_EXCL creates a new region or fails if it exists
        // - mode 0o600 is a valid file permission mask
        // - shm_open returns a valid fd on success or -1 on error (checked below)
        let fd = unsafe {
            libc::shm_unlink(c_name.as_ptr());
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };

        if fd < 0 {
            return Err(ShmError::SegmentCreate(io::Error::last_os_error()));
        }

        // SAFETY: fd is a valid descriptor from the shm_open call above; size
        // is bounded by validate_name and practical memory limits.
        let ret = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is still valid and not reused on this error path.
            unsafe { libc::close(fd) };
            return Err(ShmError::SegmentCreate(err));
        }

        // SAFETY:
        // - null first argument lets the kernel choose the address
        // - size is the caller-provided region size
        // - PROT_READ | PROT_WRITE is a valid read-write mapping
        // - MAP_SHARED makes the mapping visible to other processes
        // - fd is valid from the successful shm_open/ftruncate above
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        // SAFETY: fd is valid; the mapping (success or failure) retains its
        // own reference, so closing fd here is safe either way.
        unsafe { libc::close(fd) };

        if ptr == libc::MAP_FAILED {
            return Err(ShmError::Mmap(io::Error::last_os_error()));
        }

        // SAFETY: ptr is a fresh PROT_WRITE mapping of exactly `size` bytes
        // with no other references yet.
        unsafe {
            ptr::write_bytes(ptr as *mut u8, 0, size);
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            size,
            name: name.to_string(),
        })
    }

    /// Open an existing shared memory region.
    ///
    /// # Errors
    ///
    /// Returns an error if the region doesn't exist or mapping fails.
    pub fn open(name: &str, size: usize) -> Result<Self> {
        Self::validate_name(name)?;

        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is valid; O_RDWR opens an existing region for
        // read/write; mode is ignored without O_CREAT.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };

        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::NotFound {
                return Err(ShmError::NotFound(name.to_string()));
            }
            return Err(ShmError::SegmentOpen(err));
        }

        // SAFETY: same reasoning as in `create` — fd valid, size caller
        // supplied, MAP_SHARED visible cross-process.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        // SAFETY: fd valid; mapping retains its own reference.
        unsafe { libc::close(fd) };

        if ptr == libc::MAP_FAILED {
            return Err(ShmError::Mmap(io::Error::last_os_error()));
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            size,
            name: name.to_string(),
        })
    }

    fn validate_name(name: &str) -> Result<()> {
        if !name.starts_with('/') {
            return Err(ShmError::InvalidName(format!(
                "region name must start with '/': {name}"
            )));
        }
        if name.len() > 1 && name[1..].contains('/') {
            return Err(ShmError::InvalidName(format!(
                "region name cannot contain '/' after prefix: {name}"
            )));
        }
        if name.len() > 255 {
            return Err(ShmError::InvalidName(format!(
                "region name too long (max 255): {name}"
            )));
        }
        Ok(())
    }

    /// Unlink (delete) a shared memory region by name.
    ///
    /// The region is removed once all processes unmap it. Should be called
    /// by the creator when cleaning up.
    ///
    /// # Errors
    ///
    /// Returns an error if unlink fails for a reason other than "not found"
    /// (unlinking a missing region is treated as a no-op, for idempotent
    /// cleanup).
    pub fn unlink(name: &str) -> Result<()> {
        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is valid; shm_unlink only touches the shm
        // filesystem namespace, not memory safety.
        let ret = unsafe { libc::shm_unlink(c_name.as_ptr()) };

        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotFound {
                return Err(ShmError::SegmentOpen(err));
            }
        }

        Ok(())
    }

    /// Check whether a region with the given name exists.
    #[must_use]
    pub fn exists(name: &str) -> bool {
        let Ok(c_name) = CString::new(name) else {
            return false;
        };

        // SAFETY: c_name is valid; O_RDONLY is a harmless existence probe.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };

        if fd >= 0 {
            // SAFETY: fd >= 0 from the successful shm_open just above.
            unsafe { libc::close(fd) };
            true
        } else {
            false
        }
    }
}

impl SharedMemoryResource for PosixShmRegion {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    fn size(&self) -> usize {
        self.size
    }

    fn handle(&self) -> SegmentHandle {
        SegmentHandle(self.name.clone())
    }
}

impl Drop for PosixShmRegion {
    fn drop(&mut self) {
        // SAFETY: self.ptr/self.size are exactly what mmap returned in
        // `create`/`open`, and Drop runs at most once.
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.size);
        }
        // Intentionally not unlinked here; the creator owns cleanup.
    }
}

/// Clean up stale `/lola_*` shared memory regions left behind by crashed
/// processes, using the same orphan heuristic a deployment layer would run
/// at startup before re-offering an endpoint.
///
/// Returns the number of regions removed.
pub fn cleanup_stale_regions() -> usize {
    let mut cleaned = 0;

    let shm_dir = std::path::Path::new("/dev/shm");
    if !shm_dir.exists() {
        return 0;
    }

    let Ok(entries) = std::fs::read_dir(shm_dir) else {
        return 0;
    };

    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };

        if !name.starts_with("lola_") {
            continue;
        }

        let region_name = format!("/{name}");

        if is_region_stale(&region_name) && PosixShmRegion::unlink(&region_name).is_ok() {
            log::debug!("cleaned up stale shm region: {region_name}");
            cleaned += 1;
        }
    }

    cleaned
}

/// Heuristic orphan check: a region whose first word looks like it was
/// never written, or wildly out of range, is assumed to be stale rather
/// than actively owned by a live process.
fn is_region_stale(name: &str) -> bool {
    use std::sync::atomic::{AtomicU64, Ordering};

    let Ok(region) = PosixShmRegion::open(name, 64) else {
        return false;
    };

    let head_ptr = region.as_ptr() as *const AtomicU64;
    // SAFETY: region was opened with size 64, mmap returns page-aligned
    // memory so the 8-byte alignment AtomicU64 needs is satisfied, and a
    // Relaxed load has no ordering requirements to violate.
    let head = unsafe { (*head_ptr).load(Ordering::Relaxed) };

    head > (1u64 << 48)
}
