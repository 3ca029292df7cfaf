// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The single-word atomic slot control state (§3, §4.1).
//!
//! Every slot packs state, reference count, and timestamp into one
//! `AtomicU64` so that every transition is a single compare-and-swap with no
//! cross-slot locking, mirroring the torn-read-free encoding the teacher
//! crate uses for its own ring-buffer sequence words.
//!
//! Bit layout (low to high):
//! ```text
//! [ 0.. 2)  state      (2 bits:  0=Free, 1=Writing, 2=Ready)
//! [ 2..22)  refcount   (20 bits: up to ~1M concurrent proxies)
//! [22..64)  timestamp  (42 bits: monotonic publish counter)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

const STATE_BITS: u32 = 2;
const STATE_MASK: u64 = 0b11;
const REFCOUNT_BITS: u32 = 20;
const REFCOUNT_SHIFT: u32 = STATE_BITS;
const REFCOUNT_MASK: u64 = ((1u64 << REFCOUNT_BITS) - 1) << REFCOUNT_SHIFT;
const TIMESTAMP_SHIFT: u32 = STATE_BITS + REFCOUNT_BITS;

/// One slot's control state (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Writing,
    Ready,
}

impl SlotState {
    const fn from_bits(bits: u64) -> Self {
        match bits & STATE_MASK {
            0 => Self::Free,
            1 => Self::Writing,
            _ => Self::Ready,
        }
    }

    const fn to_bits(self) -> u64 {
        match self {
            Self::Free => 0,
            Self::Writing => 1,
            Self::Ready => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Decoded {
    state: SlotState,
    refcount: u32,
    timestamp: u64,
}

fn decode(word: u64) -> Decoded {
    Decoded {
        state: SlotState::from_bits(word),
        refcount: ((word & REFCOUNT_MASK) >> REFCOUNT_SHIFT) as u32,
        timestamp: word >> TIMESTAMP_SHIFT,
    }
}

fn encode(d: Decoded) -> u64 {
    d.state.to_bits()
        | (u64::from(d.refcount) << REFCOUNT_SHIFT)
        | (d.timestamp << TIMESTAMP_SHIFT)
}

/// Maximum retries for a slot transition that can race with concurrent
/// proxies before the core concludes the contention is a contract
/// violation rather than transient load (§9 Open Question 1).
pub(crate) const REFERENCE_TRANSACTION_RETRY_LIMIT: u32 = 10;

/// One element of the fixed-length slot array (§3).
///
/// Cache-line aligned so independent slots never false-share, the same
/// discipline the teacher applies to its own shared-memory control words.
#[repr(C, align(64))]
pub struct Slot {
    word: AtomicU64,
    _pad: [u8; 56],
}

impl Slot {
    pub fn new() -> Self {
        Self {
            word: AtomicU64::new(encode(Decoded {
                state: SlotState::Free,
                refcount: 0,
                timestamp: 0,
            })),
            _pad: [0u8; 56],
        }
    }

    #[inline]
    pub fn state(&self) -> SlotState {
        decode(self.word.load(Ordering::Acquire)).state
    }

    #[inline]
    pub fn timestamp(&self) -> u64 {
        decode(self.word.load(Ordering::Acquire)).timestamp
    }

    #[inline]
    pub fn refcount(&self) -> u32 {
        decode(self.word.load(Ordering::Acquire)).refcount
    }

    /// Claim this slot for writing if it is eligible: refcount zero and not
    /// already `Writing`.
    ///
    /// A `Ready` slot with refcount zero is eligible too — this *is* the
    /// `Ready -> Free` transition the invariants describe; it happens
    /// lazily, at the moment a skeleton reclaims the oldest unreferenced
    /// slot, rather than eagerly the instant the last proxy drops it.
    pub fn try_claim_for_writing(&self) -> bool {
        let current = self.word.load(Ordering::Acquire);
        let decoded = decode(current);
        if decoded.state == SlotState::Writing || decoded.refcount != 0 {
            return false;
        }
        let next = encode(Decoded {
            state: SlotState::Writing,
            refcount: 0,
            timestamp: decoded.timestamp,
        });
        self.word
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `Writing -> Ready`, stamping `timestamp`. Terminates the process if
    /// the slot isn't `Writing` (§7: publishing an already-published slot is
    /// a contract violation, not a recoverable error).
    pub fn publish(&self, timestamp: u64) {
        let current = self.word.load(Ordering::Acquire);
        let decoded = decode(current);
        if decoded.state != SlotState::Writing {
            crate::error::terminate("event_ready called on a slot that is not Writing");
        }
        let next = encode(Decoded {
            state: SlotState::Ready,
            refcount: 0,
            timestamp,
        });
        if self
            .word
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            crate::error::terminate("concurrent mutation of a slot exclusively owned while Writing");
        }
    }

    /// `Writing -> Free`, discarding without publishing. Terminates if the
    /// slot isn't `Writing` for the same reason as [`Slot::publish`].
    pub fn discard(&self) {
        let current = self.word.load(Ordering::Acquire);
        let decoded = decode(current);
        if decoded.state != SlotState::Writing {
            crate::error::terminate("discard called on a slot that is not Writing");
        }
        let next = encode(Decoded {
            state: SlotState::Free,
            refcount: 0,
            timestamp: decoded.timestamp,
        });
        if self
            .word
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            crate::error::terminate("concurrent mutation of a slot exclusively owned while Writing");
        }
    }

    /// Increment the reference count if `Ready` and `since < timestamp <
    /// bound`. Returns the slot's timestamp on success.
    pub fn try_reference_in_range(&self, since: u64, bound: u64) -> Option<u64> {
        for _ in 0..REFERENCE_TRANSACTION_RETRY_LIMIT {
            let current = self.word.load(Ordering::Acquire);
            let decoded = decode(current);
            if decoded.state != SlotState::Ready
                || decoded.timestamp <= since
                || decoded.timestamp >= bound
            {
                return None;
            }
            let next = encode(Decoded {
                state: decoded.state,
                refcount: decoded.refcount + 1,
                timestamp: decoded.timestamp,
            });
            if self
                .word
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(decoded.timestamp);
            }
        }
        crate::error::terminate("reference transaction retry limit exceeded");
    }

    /// Increment the reference count of a known `Ready` slot unconditionally
    /// (skeleton-side tracing pin, §4.1 `reference_specific_event`).
    pub fn try_reference(&self) -> bool {
        for _ in 0..REFERENCE_TRANSACTION_RETRY_LIMIT {
            let current = self.word.load(Ordering::Acquire);
            let decoded = decode(current);
            if decoded.state != SlotState::Ready {
                return false;
            }
            let next = encode(Decoded {
                state: decoded.state,
                refcount: decoded.refcount + 1,
                timestamp: decoded.timestamp,
            });
            if self
                .word
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
        crate::error::terminate("reference transaction retry limit exceeded");
    }

    /// Decrement the reference count. Terminates on underflow (P2) rather
    /// than wrapping, since that can only happen from a double-free bug.
    pub fn dereference(&self) {
        for _ in 0..REFERENCE_TRANSACTION_RETRY_LIMIT {
            let current = self.word.load(Ordering::Acquire);
            let decoded = decode(current);
            if decoded.refcount == 0 {
                crate::error::terminate("reference count underflow");
            }
            let next = encode(Decoded {
                state: decoded.state,
                refcount: decoded.refcount - 1,
                timestamp: decoded.timestamp,
            });
            if self
                .word
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
        crate::error::terminate("reference transaction retry limit exceeded");
    }
}

impl Default for Slot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_slot_is_free() {
        let slot = Slot::new();
        assert_eq!(slot.state(), SlotState::Free);
        assert_eq!(slot.refcount(), 0);
    }

    #[test]
    fn claim_publish_discard_cycle() {
        let slot = Slot::new();
        assert!(slot.try_claim_for_writing());
        assert_eq!(slot.state(), SlotState::Writing);
        slot.publish(7);
        assert_eq!(slot.state(), SlotState::Ready);
        assert_eq!(slot.timestamp(), 7);
    }

    #[test]
    fn double_claim_fails_while_writing() {
        let slot = Slot::new();
        assert!(slot.try_claim_for_writing());
        assert!(!slot.try_claim_for_writing());
    }

    #[test]
    fn discard_returns_slot_to_free_without_timestamp() {
        let slot = Slot::new();
        slot.try_claim_for_writing();
        slot.discard();
        assert_eq!(slot.state(), SlotState::Free);
        assert_eq!(slot.timestamp(), 0);
    }

    #[test]
    fn ready_with_zero_refcount_is_reclaimable() {
        let slot = Slot::new();
        slot.try_claim_for_writing();
        slot.publish(1);
        assert!(slot.try_claim_for_writing());
        assert_eq!(slot.state(), SlotState::Writing);
    }

    #[test]
    fn ready_with_outstanding_refcount_is_not_reclaimable() {
        let slot = Slot::new();
        slot.try_claim_for_writing();
        slot.publish(1);
        assert!(slot.try_reference_in_range(0, u64::MAX).is_some());
        assert!(!slot.try_claim_for_writing());
    }

    #[test]
    fn reference_respects_exclusive_upper_bound() {
        let slot = Slot::new();
        slot.try_claim_for_writing();
        slot.publish(5);
        assert!(slot.try_reference_in_range(5, 5).is_none());
        assert!(slot.try_reference_in_range(4, 6).is_some());
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn dereference_below_zero_terminates() {
        let slot = Slot::new();
        slot.dereference();
    }
}
