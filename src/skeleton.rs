// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The user-facing skeleton (publisher) wrapper (`SPEC_FULL.md` §A).
//!
//! Kept thin on purpose: every operation forwards straight into
//! [`EventDataControl`], adding only the tracing glue calls the spec's §4.7
//! wires to each skeleton-side trace point. This module exists so the
//! end-to-end scenarios in `tests/end_to_end.rs` have something to drive.

use crate::config::EndpointConfig;
use crate::error::{LolaError, Result};
use crate::event::{EventDataControl, SampleAllocateePtr, SkeletonTracedSamplePtr, TypeErasedSamplePtr};
use crate::tracing::{skeleton_glue, ServiceElementInstanceId, TracingRuntime};
use std::sync::Arc;

/// The producer side of one event endpoint.
pub struct Skeleton<T> {
    control: Arc<EventDataControl<T>>,
    element: ServiceElementInstanceId,
    tracing: Option<Arc<TracingRuntime>>,
    config: EndpointConfig,
}

impl<T: Send + 'static> Skeleton<T> {
    /// Offer a fresh endpoint: builds the slot engine per `config` and
    /// traces the offer, if a tracing runtime is attached.
    #[must_use]
    pub fn offer(config: EndpointConfig, element: ServiceElementInstanceId, tracing: Option<Arc<TracingRuntime>>) -> Self {
        let control = EventDataControl::new(config.slot_count, config.max_subscribers);
        if let Some(runtime) = &tracing {
            skeleton_glue::trace_offer(runtime, &config.tracing, &element);
        }
        Self { control, element, tracing, config }
    }

    /// §4.4 `stop_offer`, as seen from the skeleton side — the event-data
    /// control has no state of its own to transition here; only the trace
    /// point fires. The per-subscriber state transition lives in each
    /// proxy's own [`crate::subscription::SubscriptionStateMachine`].
    pub fn stop_offer(&self) {
        if let Some(runtime) = &self.tracing {
            skeleton_glue::trace_stop_offer(runtime, &self.config.tracing, &self.element);
        }
    }

    /// The underlying control block, shared with every `Proxy` attached to
    /// this endpoint.
    #[must_use]
    pub fn control(&self) -> &Arc<EventDataControl<T>> {
        &self.control
    }

    /// §4.1 `allocate_next_slot`, wrapped in the owning handle.
    ///
    /// # Errors
    ///
    /// Returns [`LolaError::AllocationFailed`] if every slot is in use.
    pub fn allocate(&self) -> Result<SampleAllocateePtr<T>> {
        if let Some(runtime) = &self.tracing {
            skeleton_glue::trace_send_with_allocate(runtime, &self.config.tracing, &self.element);
        }
        let index = self.control.allocate_next_slot().ok_or(LolaError::AllocationFailed)?;
        Ok(SampleAllocateePtr::new(Arc::clone(&self.control), index))
    }

    /// Publish `allocatee` and trace the send by pinning the just-published
    /// slot through the skeleton's reserved sentinel row (§4.1
    /// `reference_specific_event`).
    pub fn send(&self, allocatee: SampleAllocateePtr<T>) -> u64 {
        let index = allocatee.index();
        let timestamp = allocatee.send();
        if let Some(runtime) = &self.tracing {
            if self.control.reference_specific_event(index) {
                let pinned = SkeletonTracedSamplePtr::new(Arc::clone(&self.control), index);
                let erased = TypeErasedSamplePtr::new(pinned);
                skeleton_glue::trace_send(
                    runtime,
                    &self.config.tracing,
                    &self.element,
                    timestamp,
                    0,
                    std::mem::size_of::<T>(),
                    erased,
                );
            }
        }
        timestamp
    }

    /// Allocate, write, and publish in one call.
    ///
    /// # Errors
    ///
    /// Returns [`LolaError::AllocationFailed`] if every slot is in use.
    pub fn send_with_allocate(&self, value: T) -> Result<u64> {
        let mut allocatee = self.allocate()?;
        allocatee.write(value);
        Ok(self.send(allocatee))
    }
}
