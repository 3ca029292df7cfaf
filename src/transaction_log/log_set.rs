// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The collection of transaction logs embedded in an event's control block
//! (§3 `TransactionLogSet`, §4.5).

use super::log::TransactionLog;
use crate::error::{LolaError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Fixed-capacity table of proxy subscriber rows, plus one reserved
/// sentinel row used only by skeleton-side tracing (which journals slot
/// references but never the subscribe bit).
pub struct TransactionLogSet {
    rows: Box<[TransactionLog]>,
    in_use: Box<[AtomicBool]>,
    skeleton_sentinel: TransactionLog,
    // Registration is rare (subscribe/unsubscribe, not the data-plane hot
    // path) so a single mutex serializing the free-row scan is simpler than
    // a lock-free bitmap scan and costs nothing under load.
    registration: Mutex<()>,
}

impl TransactionLogSet {
    #[must_use]
    pub fn new(max_subscribers: usize, slot_count: usize) -> Self {
        Self {
            rows: (0..max_subscribers)
                .map(|_| TransactionLog::new(slot_count))
                .collect(),
            in_use: (0..max_subscribers).map(|_| AtomicBool::new(false)).collect(),
            skeleton_sentinel: TransactionLog::new(slot_count),
            registration: Mutex::new(()),
        }
    }

    /// Lease one free row for the lifetime of a new subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`LolaError::MaxSubscribersExceeded`] if every row is
    /// already leased.
    pub fn register(self: &Arc<Self>) -> Result<TransactionLogRegistrationGuard> {
        let _held = self.registration.lock();
        for (index, flag) in self.in_use.iter().enumerate() {
            if !flag.load(Ordering::Acquire) {
                flag.store(true, Ordering::Release);
                return Ok(TransactionLogRegistrationGuard {
                    log_set: Arc::clone(self),
                    index,
                });
            }
        }
        Err(LolaError::MaxSubscribersExceeded)
    }

    #[must_use]
    pub fn row(&self, index: usize) -> &TransactionLog {
        &self.rows[index]
    }

    #[must_use]
    pub fn skeleton_row(&self) -> &TransactionLog {
        &self.skeleton_sentinel
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.rows.len()
    }

    fn release(&self, index: usize) {
        if !self.rows[index].contains_transactions() {
            self.in_use[index].store(false, Ordering::Release);
        }
        // A row with a dangling transaction stays marked in-use; a later
        // `recover_all` pass is the only thing that clears it.
    }

    /// Scan every leased row and roll back any dangling transaction found
    /// (§4.5, scenario 5). Meant to run once, at process/participant
    /// restart, before new subscribers attach.
    ///
    /// Every row is attempted regardless of earlier failures, so a single
    /// ambiguous row never prevents the rest of the table from recovering.
    ///
    /// # Errors
    ///
    /// Returns [`LolaError::CouldNotRestartProxy`] if any row's journal was
    /// caught mid-transaction (§4.5: ambiguous, not recoverable in place).
    /// That row is left marked in-use so a later recovery attempt can retry
    /// once the ambiguity resolves; every other row still recovers.
    pub fn recover_all(
        &self,
        mut decrement: impl FnMut(usize, usize),
        mut rollback_subscription: impl FnMut(usize, usize),
    ) -> Result<()> {
        let mut ambiguous = false;
        for (index, flag) in self.in_use.iter().enumerate() {
            if !flag.load(Ordering::Acquire) {
                continue;
            }
            let row = &self.rows[index];
            let recovered = row.rollback_proxy_element_log(
                |slot_index| decrement(index, slot_index),
                |max_samples| rollback_subscription(index, max_samples),
            );
            match recovered {
                Ok(()) => flag.store(false, Ordering::Release),
                Err(_) => ambiguous = true,
            }
        }
        if ambiguous {
            Err(LolaError::CouldNotRestartProxy)
        } else {
            Ok(())
        }
    }
}

/// An RAII lease on one row of a [`TransactionLogSet`] (§5 "Lifetime /
/// ownership": "on drop it either returns the row to the free pool if the
/// row is clean or leaves it marked so that a later recovery pass handles
/// it").
pub struct TransactionLogRegistrationGuard {
    log_set: Arc<TransactionLogSet>,
    index: usize,
}

impl TransactionLogRegistrationGuard {
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn log(&self) -> &TransactionLog {
        self.log_set.row(self.index)
    }
}

impl Drop for TransactionLogRegistrationGuard {
    fn drop(&mut self) {
        self.log_set.release(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_exhausts_capacity() {
        let log_set = Arc::new(TransactionLogSet::new(2, 4));

        let g1 = log_set.register().unwrap();
        let g2 = log_set.register().unwrap();
        assert_ne!(g1.index(), g2.index());

        let err = log_set.register().unwrap_err();
        assert_eq!(err, LolaError::MaxSubscribersExceeded);
    }

    #[test]
    fn clean_row_is_returned_to_the_pool_on_drop() {
        let log_set = Arc::new(TransactionLogSet::new(1, 4));

        {
            let _guard = log_set.register().unwrap();
        }

        assert!(log_set.register().is_ok());
    }

    #[test]
    fn dirty_row_stays_leased_until_recovery() {
        let log_set = Arc::new(TransactionLogSet::new(1, 4));

        {
            let guard = log_set.register().unwrap();
            guard.log().begin_reference(0);
            guard.log().end_reference(0);
        }

        assert_eq!(
            log_set.register().unwrap_err(),
            LolaError::MaxSubscribersExceeded
        );

        let mut decremented = Vec::new();
        log_set
            .recover_all(|_, slot| decremented.push(slot), |_, _| {})
            .unwrap();
        assert_eq!(decremented, vec![0]);

        assert!(log_set.register().is_ok());
    }

    #[test]
    fn ambiguous_row_is_reported_and_other_rows_still_recover() {
        let log_set = Arc::new(TransactionLogSet::new(2, 4));

        let ambiguous_guard = log_set.register().unwrap();
        ambiguous_guard.log().begin_reference(0);
        // Left mid-increment: (Begin=1, End=0), simulating a crash between
        // the refcount bump and its journal commit.

        let clean_guard = log_set.register().unwrap();
        clean_guard.log().begin_reference(1);
        clean_guard.log().end_reference(1);
        std::mem::forget(clean_guard);
        std::mem::forget(ambiguous_guard);

        let mut decremented = Vec::new();
        let result = log_set.recover_all(|_, slot| decremented.push(slot), |_, _| {});

        assert_eq!(result, Err(LolaError::CouldNotRestartProxy));
        // The unambiguous row still recovered even though the other row
        // failed.
        assert_eq!(decremented, vec![1]);
        // The ambiguous row's lease is still held; the clean row's was
        // released back to the pool.
        assert!(log_set.register().is_ok());
        assert_eq!(
            log_set.register().unwrap_err(),
            LolaError::MaxSubscribersExceeded
        );
    }
}
