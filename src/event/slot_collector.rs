// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Proxy-side ordered scan of newly published slots (§4.3).

use super::data_control::EventDataControl;
use super::sample::SamplePtr;
use std::sync::Arc;

/// One candidate found during a collection pass, before being turned into
/// a [`SamplePtr`] — kept as a plain `(index, timestamp)` pair in the
/// pre-allocated scratch buffer so collection itself never allocates.
struct ControlSlotIndicator {
    index: usize,
    timestamp: u64,
}

/// Packages "what's new since last time" for a single subscriber (§4.3).
///
/// Not thread-safe: calls must be serialized per collector, matching the
/// subscription machine's single-threaded-per-endpoint assumption for its
/// lock-free read path.
pub struct SlotCollector<T> {
    control: Arc<EventDataControl<T>>,
    last_ts: u64,
    log_index: usize,
    scratch: Vec<ControlSlotIndicator>,
    max_slots: usize,
}

impl<T> SlotCollector<T> {
    /// # Panics
    ///
    /// Terminates the process if `max_slots == 0` (§8 boundary behavior:
    /// "Creating a slot collector with `max_slots = 0` terminates the
    /// process").
    pub(crate) fn new(control: Arc<EventDataControl<T>>, log_index: usize, max_slots: usize) -> Self {
        if max_slots == 0 {
            crate::error::terminate("slot collector requires max_slots > 0");
        }
        Self {
            control,
            last_ts: 0,
            log_index,
            scratch: Vec::with_capacity(max_slots),
            max_slots,
        }
    }

    /// Collect up to `max_count` new samples (capped at the collector's
    /// declared window), oldest first.
    ///
    /// Internally walks newest-to-oldest by repeatedly calling
    /// `reference_next_event` with a shrinking upper bound, then reverses
    /// the result into chronological order before returning it.
    pub fn get_new_samples_slot_indices(&mut self, max_count: usize) -> Vec<SamplePtr<T>> {
        self.scratch.clear();
        let limit = max_count.min(self.max_slots);
        let mut bound = u64::MAX;

        while self.scratch.len() < limit {
            match self
                .control
                .reference_next_event(self.last_ts, self.log_index, bound)
            {
                Some((index, timestamp)) => {
                    bound = timestamp;
                    self.scratch.push(ControlSlotIndicator { index, timestamp });
                }
                None => break,
            }
        }

        if let Some(newest) = self.scratch.first() {
            self.last_ts = self.last_ts.max(newest.timestamp);
        }

        self.scratch
            .drain(..)
            .rev()
            .map(|indicator| {
                SamplePtr::new(
                    Arc::clone(&self.control),
                    indicator.index,
                    self.log_index,
                    indicator.timestamp,
                )
            })
            .collect()
    }

    /// Read-only count equivalent of [`Self::get_new_samples_slot_indices`].
    #[must_use]
    pub fn get_num_new_samples_available(&self) -> usize {
        self.control.get_num_new_events(self.last_ts)
    }
}
