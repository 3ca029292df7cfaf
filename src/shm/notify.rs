// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A futex-bucketed fire-and-forget wake primitive, bundled as the default
//! building block for an `EventNotifier` (spec §6 "To the notifier": "no
//! delivery or ordering guarantee... a best-effort wake").
//!
//! ```text
//! TopicNotify (16KB shared memory region)
//! +----------------------------------------+
//! | NotifyBucket[0]   (64 bytes, aligned)  |
//! | NotifyBucket[1]   (64 bytes, aligned)  |
//! | ...                                    |
//! | NotifyBucket[255] (64 bytes, aligned)  |
//! +----------------------------------------+
//! ```
//!
//! Skeletons increment their assigned bucket and wake waiters; proxies
//! snapshot the bucket value before waiting to avoid lost wakes. Nothing
//! here decides *when* to notify or *how many* events arrived — per §6 that
//! policy lives entirely with the caller (`EventReceiveHandlerManager`).

use super::segment::PosixShmRegion;
use super::{futex_wait, futex_wake_all, Result};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Number of notification buckets in one [`TopicNotify`] region.
const NOTIFY_BUCKET_COUNT: usize = 256;

/// A single notification counter, cache-line aligned to avoid false
/// sharing between buckets assigned to different event instances.
#[repr(C, align(64))]
pub struct NotifyBucket {
    /// Notification counter, incremented on each send.
    pub val: AtomicU32,
    _pad: [u8; 60],
}

impl NotifyBucket {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            val: AtomicU32::new(0),
            _pad: [0u8; 60],
        }
    }

    /// Increment the counter and wake every waiter. Fire-and-forget: no
    /// feedback about whether anyone was listening.
    #[inline]
    pub fn notify(&self) {
        self.val.fetch_add(1, Ordering::Release);
        futex_wake_all(&self.val);
    }

    /// Snapshot the counter before polling for new data, to avoid missing
    /// a notification that lands between the poll and the wait.
    #[inline]
    pub fn snapshot(&self) -> u32 {
        self.val.load(Ordering::Acquire)
    }

    /// Block until the counter no longer matches `snapshot`, or `timeout`
    /// elapses.
    #[inline]
    pub fn wait(&self, snapshot: u32, timeout: Option<Duration>) -> i32 {
        futex_wait(&self.val, snapshot, timeout)
    }
}

impl Default for NotifyBucket {
    fn default() -> Self {
        Self::new()
    }
}

/// A shared-memory-backed bucket array one service-element's skeleton and
/// its proxies share to exchange wake-ups. Each event instance is assigned
/// a bucket by hashing its identity, so independent events spread across
/// cache lines instead of contending on one counter.
pub struct TopicNotify {
    region: PosixShmRegion,
}

impl TopicNotify {
    /// Size of the notification region (256 buckets x 64 bytes = 16KB).
    pub const REGION_SIZE: usize = NOTIFY_BUCKET_COUNT * std::mem::size_of::<NotifyBucket>();

    /// Create or open a notification region for one service element.
    pub fn new(name: &str, create: bool) -> Result<Self> {
        let region = if create {
            PosixShmRegion::create(name, Self::REGION_SIZE)?
        } else {
            PosixShmRegion::open(name, Self::REGION_SIZE)?
        };

        Ok(Self { region })
    }

    fn buckets_ptr(&self) -> *const NotifyBucket {
        self.region.as_ptr() as *const NotifyBucket
    }

    /// Reference a specific bucket.
    ///
    /// # Panics
    ///
    /// Panics (via `debug_assert!`) if `index >= NOTIFY_BUCKET_COUNT` in
    /// debug builds.
    #[inline]
    #[must_use]
    pub fn bucket(&self, index: usize) -> &NotifyBucket {
        debug_assert!(index < NOTIFY_BUCKET_COUNT);
        // SAFETY: region is owned by self and sized for NOTIFY_BUCKET_COUNT
        // buckets; index is bounds-checked above.
        unsafe { &*self.buckets_ptr().add(index) }
    }

    /// Hash an event instance identifier (FNV-1a) onto a bucket index.
    #[must_use]
    pub fn bucket_for_event(instance_id: &[u8]) -> usize {
        let mut hash: u32 = 2_166_136_261;
        for byte in instance_id {
            hash ^= u32::from(*byte);
            hash = hash.wrapping_mul(16_777_619);
        }
        (hash as usize) % NOTIFY_BUCKET_COUNT
    }

    #[inline]
    pub fn notify(&self, bucket_index: usize) {
        self.bucket(bucket_index).notify();
    }

    #[inline]
    pub fn wait(&self, bucket_index: usize, snapshot: u32, timeout: Option<Duration>) -> i32 {
        self.bucket(bucket_index).wait(snapshot, timeout)
    }

    /// Region name for a service element's notify bucket array, sanitized
    /// for POSIX shm naming.
    #[must_use]
    pub fn region_name(instance_specifier: &str, event_name: &str) -> String {
        let sanitize = |s: &str| -> String {
            s.chars()
                .map(|c| if c.is_alphanumeric() { c } else { '_' })
                .collect()
        };
        format!(
            "/lola_notify_{}_{}",
            sanitize(instance_specifier),
            sanitize(event_name)
        )
    }
}
