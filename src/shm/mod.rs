// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The shared-memory layer external collaborator (spec §6).
//!
//! The core treats shared-memory segment creation, mapping, and
//! cross-process pointer arithmetic as provided by this layer — it assumes
//! only that *something* can hand it (a) a mapped virtual address, (b)
//! space to allocate a control block and payload array inside, (c) a
//! handle that identifies the segment across processes, and (d) a file
//! descriptor that a peer process can use to re-map it. [`SharedMemoryResource`]
//! is that contract; [`PosixShmRegion`] is one concrete implementation of
//! it, adapted from the teacher crate's `transport::shm::segment` module.
//!
//! `EventDataControl` itself does not call into this module — per
//! `SPEC_FULL.md` §D, this crate keeps the control block in-process behind
//! an `Arc` and leaves real cross-process placement to a deployment that
//! wires a `SharedMemoryResource` in above this core.

#[cfg(feature = "posix-shm")]
mod futex;
#[cfg(feature = "posix-shm")]
mod notify;
#[cfg(feature = "posix-shm")]
mod segment;

#[cfg(feature = "posix-shm")]
pub use futex::{futex_wait, futex_wake, futex_wake_all, futex_wake_one};
#[cfg(feature = "posix-shm")]
pub use notify::{NotifyBucket, TopicNotify};
#[cfg(feature = "posix-shm")]
pub use segment::{cleanup_stale_regions, PosixShmRegion};

use std::fmt;
use std::io;

/// Errors raised by the shared-memory resource layer.
#[derive(Debug)]
pub enum ShmError {
    /// Segment creation failed.
    SegmentCreate(io::Error),
    /// Segment open failed.
    SegmentOpen(io::Error),
    /// Memory mapping failed.
    Mmap(io::Error),
    /// Invalid segment name.
    InvalidName(String),
    /// Segment not found.
    NotFound(String),
}

impl fmt::Display for ShmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SegmentCreate(e) => write!(f, "shared memory segment creation failed: {e}"),
            Self::SegmentOpen(e) => write!(f, "shared memory segment open failed: {e}"),
            Self::Mmap(e) => write!(f, "memory mapping failed: {e}"),
            Self::InvalidName(name) => write!(f, "invalid segment name: {name}"),
            Self::NotFound(name) => write!(f, "segment not found: {name}"),
        }
    }
}

impl std::error::Error for ShmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SegmentCreate(e) | Self::SegmentOpen(e) | Self::Mmap(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for shared-memory resource operations.
pub type Result<T> = std::result::Result<T, ShmError>;

/// A stable identifier for a shared-memory segment that's meaningful across
/// process boundaries (spec §6 "a stable handle that identifies the segment
/// across processes"). Deliberately opaque to the core beyond equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentHandle(pub String);

/// The contract the core assumes of its shared-memory layer (spec §6).
pub trait SharedMemoryResource: Send + Sync {
    /// Raw pointer to the mapped region's start.
    fn as_ptr(&self) -> *mut u8;
    /// Size in bytes of the mapped region.
    fn size(&self) -> usize;
    /// Stable handle identifying this segment across processes.
    fn handle(&self) -> SegmentHandle;
}
