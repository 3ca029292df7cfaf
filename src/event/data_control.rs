// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The slot engine: allocate, publish, reference, dereference, free (§4.1).

use super::slot::Slot;
use crate::transaction_log::{TransactionLog, TransactionLogSet};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// The shared-memory control block for one event endpoint (§3
/// `EventDataControl`): a fixed slot-status array, a parallel payload array,
/// a subscriber admission counter, and an embedded transaction-log set.
///
/// Per `SPEC_FULL.md` §D this crate keeps the control block behind an
/// `Arc` rather than placing it in an actual `SharedMemoryResource` mapping
/// — real cross-process placement is left to a deployment layered above
/// this core.
pub struct EventDataControl<T> {
    slots: Box<[Slot]>,
    payload: Box<[UnsafeCell<MaybeUninit<T>>]>,
    subscriber_count: AtomicUsize,
    max_subscribers: usize,
    log_set: Arc<TransactionLogSet>,
    next_timestamp: AtomicU64,
}

// SAFETY: access to `payload` is gated entirely by `Slot`'s state machine —
// a cell is written only while its slot is exclusively `Writing`, and read
// only while `Ready`, which proxies hold via a reference count. No two
// threads ever touch the same cell in conflicting ways at once.
unsafe impl<T: Send> Send for EventDataControl<T> {}
unsafe impl<T: Send> Sync for EventDataControl<T> {}

impl<T> EventDataControl<T> {
    /// Construct a fresh control block with `slot_count` slots admitting up
    /// to `max_subscribers` concurrent proxies.
    #[must_use]
    pub fn new(slot_count: usize, max_subscribers: usize) -> Arc<Self> {
        Arc::new(Self {
            slots: (0..slot_count).map(|_| Slot::new()).collect(),
            payload: (0..slot_count)
                .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
                .collect(),
            subscriber_count: AtomicUsize::new(0),
            max_subscribers,
            log_set: Arc::new(TransactionLogSet::new(max_subscribers, slot_count)),
            next_timestamp: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn log_set(&self) -> &Arc<TransactionLogSet> {
        &self.log_set
    }

    /// Scan for a slot eligible for writing (refcount zero, not already
    /// `Writing`) and claim the oldest one. `None` if every slot is either
    /// `Writing` or `Ready` with an outstanding reference.
    pub fn allocate_next_slot(&self) -> Option<usize> {
        loop {
            let candidate = self
                .slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| {
                    slot.state() != super::slot::SlotState::Writing && slot.refcount() == 0
                })
                .min_by_key(|(_, slot)| slot.timestamp())
                .map(|(index, _)| index)?;

            if self.slots[candidate].try_claim_for_writing() {
                return Some(candidate);
            }
            // Lost the race for the oldest candidate (another allocation,
            // or a late reference, beat us to it) — rescan.
        }
    }

    /// `Writing -> Ready`. Assigns the next monotonic timestamp and returns
    /// it.
    pub fn event_ready(&self, index: usize) -> u64 {
        let timestamp = self.next_timestamp.fetch_add(1, Ordering::AcqRel) + 1;
        self.slots[index].publish(timestamp);
        timestamp
    }

    /// `Writing -> Free` without publishing.
    pub fn discard(&self, index: usize) {
        self.slots[index].discard();
    }

    /// The next `Ready` slot whose timestamp is strictly greater than
    /// `since` and strictly less than `bound`, preferring the largest such
    /// timestamp so repeated calls with a shrinking `bound` walk newest to
    /// oldest (§4.3's descending collection order). Journals the reference
    /// on `log_index`'s row around the refcount increment.
    pub fn reference_next_event(
        &self,
        since: u64,
        log_index: usize,
        bound: u64,
    ) -> Option<(usize, u64)> {
        loop {
            let candidate = self
                .slots
                .iter()
                .enumerate()
                .filter_map(|(index, slot)| {
                    let ts = slot.timestamp();
                    (slot.state() == super::slot::SlotState::Ready && ts > since && ts < bound)
                        .then_some((index, ts))
                })
                .max_by_key(|(_, ts)| *ts)?;

            let (index, expected_ts) = candidate;
            self.log_set.row(log_index).begin_reference(index);
            match self.slots[index].try_reference_in_range(since, bound) {
                Some(ts) => {
                    debug_assert_eq!(ts, expected_ts);
                    self.log_set.row(log_index).end_reference(index);
                    return Some((index, ts));
                }
                None => {
                    // The candidate was reclaimed or re-referenced out from
                    // under us between the scan and the CAS; the Begin we
                    // just journaled never committed to a refcount change,
                    // so clear it and rescan.
                    self.log_set.row(log_index).slot(index).reset();
                }
            }
        }
    }

    /// Pin a known slot against a specific transaction-log row, journaling
    /// the increment around the refcount change the same way
    /// `reference_next_event` does.
    fn reference_via_row(&self, index: usize, log: &TransactionLog) -> bool {
        log.begin_reference(index);
        let referenced = self.slots[index].try_reference();
        if referenced {
            log.end_reference(index);
        } else {
            log.slot(index).reset();
        }
        referenced
    }

    /// Release a pin taken by [`Self::reference_via_row`] against the same
    /// row.
    fn dereference_via_row(&self, index: usize, log: &TransactionLog) {
        log.begin_dereference(index);
        self.slots[index].dereference();
        log.end_dereference(index);
    }

    /// Pin a known slot (skeleton-side tracing, §4.1
    /// `reference_specific_event`), journaling against the transaction-log
    /// set's reserved skeleton sentinel row — the skeleton side never holds
    /// a leased subscriber row of its own.
    pub fn reference_specific_event(&self, index: usize) -> bool {
        self.reference_via_row(index, self.log_set.skeleton_row())
    }

    /// Release a pin taken by [`Self::reference_specific_event`].
    pub fn dereference_specific_event(&self, index: usize) {
        self.dereference_via_row(index, self.log_set.skeleton_row());
    }

    /// Pin a known slot for proxy-side receive tracing, journaling against
    /// the calling subscriber's own leased row (`log_index`) rather than the
    /// skeleton sentinel — the sentinel is reserved for skeleton-side
    /// tracing only (§3), so a proxy's tracing pin must not share it with a
    /// concurrent `Skeleton::send` pin on the same slot.
    pub fn reference_specific_event_for_subscriber(&self, index: usize, log_index: usize) -> bool {
        self.reference_via_row(index, self.log_set.row(log_index))
    }

    /// Release a pin taken by [`Self::reference_specific_event_for_subscriber`].
    pub fn dereference_specific_event_for_subscriber(&self, index: usize, log_index: usize) {
        self.dereference_via_row(index, self.log_set.row(log_index));
    }

    /// Journal and perform a reference decrement (§4.5 decrement protocol).
    pub fn dereference_event(&self, index: usize, log_index: usize) {
        self.log_set.row(log_index).begin_dereference(index);
        self.slots[index].dereference();
        self.log_set.row(log_index).end_dereference(index);
    }

    /// Count of `Ready` slots with timestamp strictly greater than `since`.
    #[must_use]
    pub fn get_num_new_events(&self, since: u64) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state() == super::slot::SlotState::Ready && slot.timestamp() > since)
            .count()
    }

    /// Atomically admit one more subscriber under `max_subscribers`.
    pub fn try_admit_subscriber(&self) -> bool {
        self.subscriber_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < self.max_subscribers).then_some(count + 1)
            })
            .is_ok()
    }

    /// Release one subscriber's admission slot (unsubscribe, or crash
    /// recovery rollback).
    pub fn release_subscriber(&self) {
        let previous = self.subscriber_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "subscriber admission counter underflow");
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::Acquire)
    }

    /// Crash recovery over every leased transaction-log row (§4.5
    /// `rollback_proxy_element_log`, §8 scenario 5): undoes any reference
    /// whose increment committed but was never paired with a decrement, and
    /// rolls back subscriber admission for any subscribe that committed but
    /// was never unwound. Meant to run once, at restart, before new
    /// subscribers attach.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::LolaError::CouldNotRestartProxy`] if any row's
    /// journal was caught mid-transaction — every unambiguous row still
    /// recovers; the ambiguous ones are left for a later retry.
    pub fn recover(&self) -> crate::error::Result<()> {
        self.log_set.recover_all(
            |_row_index, slot_index| self.slots[slot_index].dereference(),
            |_row_index, _max_samples| self.release_subscriber(),
        )
    }

    /// Raw pointer to slot `index`'s payload cell. Callers must only
    /// dereference while holding the slot in a state that makes that safe
    /// (exclusively `Writing`, or `Ready` with a contributed reference).
    pub(crate) fn payload_ptr(&self, index: usize) -> *mut T {
        self.payload[index].get().cast::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_publish_reference_dereference_round_trip() {
        let control = EventDataControl::<u32>::new(4, 2);
        let log_set = Arc::clone(control.log_set());
        let guard = log_set.register().unwrap();

        let index = control.allocate_next_slot().unwrap();
        // SAFETY: slot `index` is exclusively Writing, owned by this test.
        unsafe {
            control.payload_ptr(index).write(10);
        }
        let timestamp = control.event_ready(index);
        assert_eq!(timestamp, 1);

        let (referenced_index, ts) = control
            .reference_next_event(0, guard.index(), u64::MAX)
            .unwrap();
        assert_eq!(referenced_index, index);
        assert_eq!(ts, 1);

        // SAFETY: slot is Ready and we hold a reference.
        let value = unsafe { *control.payload_ptr(index) };
        assert_eq!(value, 10);

        control.dereference_event(index, guard.index());
        assert!(!guard.log().contains_transactions());
    }

    #[test]
    fn allocation_overflow_then_recovery_by_discard() {
        let control = EventDataControl::<u32>::new(2, 1);

        let first = control.allocate_next_slot().unwrap();
        let _second = control.allocate_next_slot().unwrap();
        assert!(control.allocate_next_slot().is_none());

        control.discard(first);
        assert!(control.allocate_next_slot().is_some());
    }

    #[test]
    fn lossy_fast_producer_keeps_newest_two() {
        let control = EventDataControl::<u32>::new(2, 1);
        let log_set = Arc::clone(control.log_set());
        let guard = log_set.register().unwrap();

        for value in 1u32..=4 {
            let index = control.allocate_next_slot().unwrap();
            // SAFETY: slot is exclusively Writing here.
            unsafe {
                control.payload_ptr(index).write(value);
            }
            control.event_ready(index);
        }

        let mut collected = Vec::new();
        let mut bound = u64::MAX;
        while let Some((index, ts)) = control.reference_next_event(0, guard.index(), bound) {
            collected.push(ts);
            bound = ts;
            control.dereference_event(index, guard.index());
        }

        assert_eq!(collected, vec![4, 3]);
        assert_eq!(control.get_num_new_events(4), 0);
    }

    #[test]
    fn subscriber_admission_is_bounded() {
        let control = EventDataControl::<u32>::new(2, 1);
        assert!(control.try_admit_subscriber());
        assert!(!control.try_admit_subscriber());
        control.release_subscriber();
        assert!(control.try_admit_subscriber());
    }

    #[test]
    fn skeleton_pin_holds_the_slot_without_a_subscriber_row() {
        let control = EventDataControl::<u32>::new(1, 1);
        let index = control.allocate_next_slot().unwrap();
        // SAFETY: slot is exclusively Writing here.
        unsafe {
            control.payload_ptr(index).write(1);
        }
        control.event_ready(index);

        assert!(control.reference_specific_event(index));
        // No subscriber row was leased, yet the pin still blocks reclaim.
        assert!(control.allocate_next_slot().is_none());

        control.dereference_specific_event(index);
        assert!(control.allocate_next_slot().is_some());
    }

    #[test]
    fn crash_recovery_decrements_committed_reference_and_admission() {
        let control = EventDataControl::<u32>::new(1, 2);
        let log_set = Arc::clone(control.log_set());
        let guard = log_set.register().unwrap();

        let index = control.allocate_next_slot().unwrap();
        // SAFETY: slot is exclusively Writing here.
        unsafe {
            control.payload_ptr(index).write(1);
        }
        control.event_ready(index);

        assert!(control.try_admit_subscriber());
        guard.log().subscribe_begin(5);
        guard.log().subscribe_commit();

        // A successful reference, left uncommitted to the decrement side —
        // simulates the subscriber process crashing right after delivery.
        control
            .reference_next_event(0, guard.index(), u64::MAX)
            .unwrap();

        assert!(control.allocate_next_slot().is_none());
        control.recover().unwrap();

        assert!(!guard.log().contains_transactions());
        assert_eq!(control.subscriber_count(), 0);
        assert!(control.allocate_next_slot().is_some());
    }
}
