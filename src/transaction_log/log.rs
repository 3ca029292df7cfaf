// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One subscriber's crash-recovery journal row (§3 `TransactionLog`, §4.5).

use super::slot::{JournalState, TransactionLogSlot};
use crate::error::{LolaError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};

/// One row of the transaction-log set: one `(Begin, End)` pair per slot the
/// subscriber may reference, plus one pair and a recorded window size for
/// the subscribe/unsubscribe transaction itself.
pub struct TransactionLog {
    slots: Box<[TransactionLogSlot]>,
    subscribe: TransactionLogSlot,
    max_sample_count: AtomicUsize,
}

impl TransactionLog {
    #[must_use]
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: (0..slot_count).map(|_| TransactionLogSlot::new()).collect(),
            subscribe: TransactionLogSlot::new(),
            max_sample_count: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn slot(&self, index: usize) -> &TransactionLogSlot {
        &self.slots[index]
    }

    pub fn begin_reference(&self, index: usize) {
        self.slots[index].set_begin();
    }

    pub fn end_reference(&self, index: usize) {
        self.slots[index].set_end();
    }

    pub fn begin_dereference(&self, index: usize) {
        self.slots[index].clear_begin();
    }

    pub fn end_dereference(&self, index: usize) {
        self.slots[index].clear_end();
    }

    pub fn subscribe_begin(&self, max_sample_count: usize) {
        self.max_sample_count
            .store(max_sample_count, Ordering::Release);
        self.subscribe.set_begin();
    }

    pub fn subscribe_commit(&self) {
        self.subscribe.set_end();
    }

    /// Undo an in-flight `subscribe_begin` that failed before it could
    /// commit (§4.4 step 3: "journal `subscribe_abort`").
    pub fn subscribe_abort(&self) {
        self.subscribe.reset();
    }

    pub fn unsubscribe_begin(&self) {
        self.subscribe.clear_begin();
    }

    pub fn unsubscribe_commit(&self) {
        self.subscribe.clear_end();
    }

    #[must_use]
    pub fn max_sample_count(&self) -> usize {
        self.max_sample_count.load(Ordering::Acquire)
    }

    /// True iff any slot row, or the subscribe row, is not at a resting
    /// `(0,0)` — used to decide whether a row is still "in use" at detach
    /// time (§4.5).
    #[must_use]
    pub fn contains_transactions(&self) -> bool {
        self.slots.iter().any(|s| s.state() != JournalState::Clean)
            || self.subscribe.state() != JournalState::Clean
    }

    /// Roll back every dangling transaction in this row after a crash
    /// (§4.5 `rollback_proxy_element_log`).
    ///
    /// `decrement(slot_index)` is invoked once per slot whose increment
    /// committed but was never undone. `rollback_subscription(max_samples)`
    /// is invoked once if the subscribe transaction committed but was never
    /// unwound. Ambiguous `(1,0)`/`(0,1)` rows are left untouched and
    /// reported as [`LolaError::CouldNotRestartProxy`] so a later recovery
    /// pass can retry once the ambiguity resolves (it never will on its
    /// own — this is meant for an operator/restart decision, not a spin
    /// loop).
    ///
    /// # Errors
    ///
    /// Returns [`LolaError::CouldNotRestartProxy`] if any row is caught
    /// mid-transaction.
    pub fn rollback_proxy_element_log(
        &self,
        mut decrement: impl FnMut(usize),
        mut rollback_subscription: impl FnMut(usize),
    ) -> Result<()> {
        for (index, slot) in self.slots.iter().enumerate() {
            match slot.state() {
                JournalState::Clean => {}
                JournalState::Referenced => {
                    decrement(index);
                    slot.reset();
                }
                JournalState::IncrementInProgress | JournalState::DecrementInProgress => {
                    return Err(LolaError::CouldNotRestartProxy);
                }
            }
        }

        match self.subscribe.state() {
            JournalState::Clean => {}
            JournalState::Referenced => {
                rollback_subscription(self.max_sample_count());
                self.subscribe.reset();
            }
            JournalState::IncrementInProgress | JournalState::DecrementInProgress => {
                return Err(LolaError::CouldNotRestartProxy);
            }
        }

        Ok(())
    }
}
