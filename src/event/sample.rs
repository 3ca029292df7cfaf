// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed RAII handles over a slot (§4.2).

use super::data_control::EventDataControl;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// An owning handle to exactly one `Writing` slot (skeleton side).
///
/// Move-only: dropping a still-owning handle without calling [`Self::send`]
/// discards the slot, so a skeleton that abandons a sample loses nothing
/// but the slot — no half-written payload is ever observed by a proxy.
pub struct SampleAllocateePtr<T> {
    control: Option<Arc<EventDataControl<T>>>,
    index: usize,
}

impl<T> SampleAllocateePtr<T> {
    pub(crate) fn new(control: Arc<EventDataControl<T>>, index: usize) -> Self {
        Self {
            control: Some(control),
            index,
        }
    }

    /// Initialize the payload in place.
    pub fn write(&mut self, value: T) {
        let control = self.control.as_ref().expect("allocatee handle is empty");
        // SAFETY: this handle exclusively owns slot `self.index` while it
        // is `Writing`; no proxy can observe the cell until `send` commits
        // it to `Ready`.
        unsafe {
            control.payload_ptr(self.index).write(value);
        }
    }

    /// Publish the sample: `Writing -> Ready`, stamped with the next
    /// monotonic timestamp. Consumes the handle.
    #[must_use]
    pub fn send(mut self) -> u64 {
        let control = self.control.take().expect("allocatee handle is empty");
        control.event_ready(self.index)
    }

    /// The slot this handle owns, for callers (the skeleton wrapper) that
    /// need it to pin the slot for tracing right after `send`.
    pub(crate) fn index(&self) -> usize {
        self.index
    }
}

impl<T> fmt::Debug for SampleAllocateePtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleAllocateePtr")
            .field("index", &self.index)
            .finish()
    }
}

impl<T> Drop for SampleAllocateePtr<T> {
    fn drop(&mut self) {
        if let Some(control) = self.control.take() {
            control.discard(self.index);
        }
    }
}

/// A borrowed, reference-counted handle to a `Ready` slot (proxy side).
///
/// Dereferences to the payload in place; dropping releases the reference.
pub struct SamplePtr<T> {
    control: Arc<EventDataControl<T>>,
    index: usize,
    log_index: usize,
    timestamp: u64,
}

impl<T> SamplePtr<T> {
    pub(crate) fn new(
        control: Arc<EventDataControl<T>>,
        index: usize,
        log_index: usize,
        timestamp: u64,
    ) -> Self {
        Self {
            control,
            index,
            log_index,
            timestamp,
        }
    }

    /// The timestamp assigned to this sample at publication.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// The slot this handle references, for callers (the proxy wrapper)
    /// that need it to take an independent tracing pin alongside the
    /// application's own reference.
    pub(crate) fn index(&self) -> usize {
        self.index
    }
}

impl<T> Deref for SamplePtr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: this handle contributes one to the slot's reference
        // count, which can only be non-zero while the slot is `Ready` and
        // its payload fully written.
        unsafe { &*self.control.payload_ptr(self.index) }
    }
}

impl<T> fmt::Debug for SamplePtr<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SamplePtr")
            .field("index", &self.index)
            .field("timestamp", &self.timestamp)
            .field("value", &**self)
            .finish()
    }
}

impl<T> Drop for SamplePtr<T> {
    fn drop(&mut self) {
        self.control.dereference_event(self.index, self.log_index);
    }
}

/// A handle to a `Ready` slot pinned by the skeleton's own tracing sentinel
/// row rather than a subscriber's transaction-log row (§4.1
/// `reference_specific_event`): the skeleton side traces its own just-sent
/// sample without leasing a subscriber row for itself.
pub struct SkeletonTracedSamplePtr<T> {
    control: Arc<EventDataControl<T>>,
    index: usize,
}

impl<T> SkeletonTracedSamplePtr<T> {
    pub(crate) fn new(control: Arc<EventDataControl<T>>, index: usize) -> Self {
        Self { control, index }
    }
}

impl<T> Deref for SkeletonTracedSamplePtr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: this handle contributes one to the slot's reference count,
        // taken via `reference_specific_event` while the slot was `Ready`.
        unsafe { &*self.control.payload_ptr(self.index) }
    }
}

impl<T> Drop for SkeletonTracedSamplePtr<T> {
    fn drop(&mut self) {
        self.control.dereference_specific_event(self.index);
    }
}

/// A handle to a `Ready` slot pinned by a proxy's own leased transaction-log
/// row (§4.1 `reference_specific_event`, used for proxy-side receive
/// tracing): unlike [`SkeletonTracedSamplePtr`], this journals against the
/// subscriber's own row rather than the skeleton's reserved sentinel row, so
/// a concurrent skeleton-side trace pin and a proxy-side trace pin on the
/// same slot never share one journal entry (§3: the sentinel is reserved for
/// skeleton-side tracing only).
pub struct ProxyTracedSamplePtr<T> {
    control: Arc<EventDataControl<T>>,
    index: usize,
    log_index: usize,
}

impl<T> ProxyTracedSamplePtr<T> {
    pub(crate) fn new(control: Arc<EventDataControl<T>>, index: usize, log_index: usize) -> Self {
        Self { control, index, log_index }
    }
}

impl<T> Deref for ProxyTracedSamplePtr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: this handle contributes one to the slot's reference count,
        // taken via `reference_specific_event_for_subscriber` while the slot
        // was `Ready`.
        unsafe { &*self.control.payload_ptr(self.index) }
    }
}

impl<T> Drop for ProxyTracedSamplePtr<T> {
    fn drop(&mut self) {
        self.control
            .dereference_specific_event_for_subscriber(self.index, self.log_index);
    }
}

/// Marker implemented for any droppable handle that should be kept alive
/// purely for its `Drop` side effect, erasing everything else about it.
pub trait ErasedSample: Send {}

impl<T: Send + 'static> ErasedSample for SamplePtr<T> {}
impl<T: Send + 'static> ErasedSample for SkeletonTracedSamplePtr<T> {}
impl<T: Send + 'static> ErasedSample for ProxyTracedSamplePtr<T> {}

/// A type-erased wrapper preserving only a sample handle's drop behavior
/// (§4.2): used by the tracing subsystem to keep a sample alive while an
/// asynchronous trace record referencing it is in flight, without the
/// tracing runtime needing to know the sample's payload type.
pub struct TypeErasedSamplePtr(Box<dyn ErasedSample>);

impl TypeErasedSamplePtr {
    pub fn new<S: ErasedSample + 'static>(ptr: S) -> Self {
        Self(Box::new(ptr))
    }
}

impl fmt::Debug for TypeErasedSamplePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TypeErasedSamplePtr(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocatee_discards_on_drop_without_send() {
        let control = EventDataControl::<u32>::new(2, 1);
        let index = control.allocate_next_slot().unwrap();
        {
            let mut allocatee = SampleAllocateePtr::new(Arc::clone(&control), index);
            allocatee.write(1);
        }
        // The slot returned to Free; a fresh allocation reclaims it.
        assert!(control.allocate_next_slot().is_some());
    }

    #[test]
    fn allocatee_send_publishes_and_assigns_timestamp() {
        let control = EventDataControl::<u32>::new(2, 1);
        let index = control.allocate_next_slot().unwrap();
        let mut allocatee = SampleAllocateePtr::new(Arc::clone(&control), index);
        allocatee.write(42);
        let ts = allocatee.send();
        assert_eq!(ts, 1);
    }

    #[test]
    fn sample_ptr_derefs_to_payload_and_releases_on_drop() {
        let control = EventDataControl::<u32>::new(2, 1);
        let log_set = Arc::clone(control.log_set());
        let guard = log_set.register().unwrap();

        let index = control.allocate_next_slot().unwrap();
        let mut allocatee = SampleAllocateePtr::new(Arc::clone(&control), index);
        allocatee.write(99);
        allocatee.send();

        let (idx, ts) = control
            .reference_next_event(0, guard.index(), u64::MAX)
            .unwrap();
        let sample = SamplePtr::new(Arc::clone(&control), idx, guard.index(), ts);
        assert_eq!(*sample, 99);
        drop(sample);

        assert!(!guard.log().contains_transactions());
    }

    #[test]
    fn type_erased_sample_still_releases_on_drop() {
        let control = EventDataControl::<u32>::new(2, 1);
        let log_set = Arc::clone(control.log_set());
        let guard = log_set.register().unwrap();

        let index = control.allocate_next_slot().unwrap();
        let mut allocatee = SampleAllocateePtr::new(Arc::clone(&control), index);
        allocatee.write(7);
        allocatee.send();

        let (idx, ts) = control
            .reference_next_event(0, guard.index(), u64::MAX)
            .unwrap();
        let sample = SamplePtr::new(Arc::clone(&control), idx, guard.index(), ts);
        let erased = TypeErasedSamplePtr::new(sample);
        drop(erased);

        assert!(!guard.log().contains_transactions());
    }

    #[test]
    fn skeleton_traced_sample_releases_its_pin_on_drop() {
        let control = EventDataControl::<u32>::new(2, 1);
        let index = control.allocate_next_slot().unwrap();
        let mut allocatee = SampleAllocateePtr::new(Arc::clone(&control), index);
        allocatee.write(5);
        allocatee.send();

        assert!(control.reference_specific_event(index));
        let pinned = SkeletonTracedSamplePtr::new(Arc::clone(&control), index);
        assert_eq!(*pinned, 5);

        let erased = TypeErasedSamplePtr::new(pinned);
        assert!(control.allocate_next_slot().is_none());
        drop(erased);
        assert!(control.allocate_next_slot().is_some());
    }
}
