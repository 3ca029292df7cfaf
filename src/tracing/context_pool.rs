// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The `TraceContextId` pool (§4.7, §C supplement from
//! `type_erased_sample_ptrs_guard.*`).
//!
//! Each service element is assigned a contiguous range of slot indices at
//! registration time, sized to its configured `ipc_tracing_slots`; a slot
//! holds the type-erased sample handle that must outlive an in-flight
//! asynchronous trace record. This keeps memory pressure from tracing
//! bounded per element (P8) regardless of how far behind the sink falls.

use crate::event::TypeErasedSamplePtr;
use parking_lot::Mutex;
use std::ops::Range;

use super::ids::TraceContextId;

/// A table of slots shared by every service element registered against one
/// binding; each element owns a disjoint, contiguous sub-range.
pub struct ContextIdTable {
    slots: Mutex<Vec<Option<TypeErasedSamplePtr>>>,
}

impl ContextIdTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Grow the table by `capacity` slots and return the contiguous range
    /// assigned to the caller.
    pub fn allocate_range(&self, capacity: usize) -> Range<usize> {
        let mut slots = self.slots.lock();
        let base = slots.len();
        slots.resize_with(base + capacity, || None);
        base..base + capacity
    }

    /// Emplace `sample` into the first free slot within `range`. `None` if
    /// every slot in the range is already occupied (the pool is full for
    /// this element — §4.7 step 4: "set the data-loss flag, skip this
    /// trace, and succeed quietly").
    pub fn try_reserve(&self, range: &Range<usize>, sample: TypeErasedSamplePtr) -> Option<TraceContextId> {
        let mut slots = self.slots.lock();
        for index in range.clone() {
            if slots[index].is_none() {
                slots[index] = Some(sample);
                return Some(TraceContextId(index));
            }
        }
        None
    }

    /// Clear a slot, dropping the sample it held, if any. Used both on a
    /// sink's trace-done callback and to unwind a reservation that was
    /// made but never successfully traced.
    pub fn release(&self, context_id: TraceContextId) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(context_id.0) {
            *slot = None;
        }
    }

    #[must_use]
    pub fn in_use(&self, range: &Range<usize>) -> usize {
        let slots = self.slots.lock();
        range.clone().filter(|i| slots[*i].is_some()).count()
    }
}

impl Default for ContextIdTable {
    fn default() -> Self {
        Self::new()
    }
}
