// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Skeleton-side trace-point glue (§2 "Skeleton/proxy event tracing glue",
//! §C supplement from `skeleton_event_tracing.*`).
//!
//! Each function checks the endpoint's configured enable mask, and — if the
//! trace point is on — makes exactly one call into the shared
//! [`TracingRuntime`]. Per §7, the result is always swallowed: a dropped
//! trace record is never allowed to look like a publish failure to the
//! caller.

use super::{BindingTag, MetaInfo, ServiceElementInstanceId, SkeletonTracePoint, TracePointKind, TracingRuntime};
use crate::config::TracingEndpointConfig;
use crate::event::TypeErasedSamplePtr;

/// Trace `offer()` (no payload; always a local trace).
pub fn trace_offer(runtime: &TracingRuntime, config: &TracingEndpointConfig, element: &ServiceElementInstanceId) {
    if !SkeletonTracePoint::Offer.is_enabled(config.enabled_trace_points) {
        return;
    }
    let meta = MetaInfo {
        trace_point: TracePointKind::Skeleton(SkeletonTracePoint::Offer),
        element: element.clone(),
        data_id: None,
        data_loss: false,
    };
    let _ = runtime.trace_local(BindingTag::Lola, meta, &[]);
}

/// Trace `stop_offer()`.
pub fn trace_stop_offer(runtime: &TracingRuntime, config: &TracingEndpointConfig, element: &ServiceElementInstanceId) {
    if !SkeletonTracePoint::StopOffer.is_enabled(config.enabled_trace_points) {
        return;
    }
    let meta = MetaInfo {
        trace_point: TracePointKind::Skeleton(SkeletonTracePoint::StopOffer),
        element: element.clone(),
        data_id: None,
        data_loss: false,
    };
    let _ = runtime.trace_local(BindingTag::Lola, meta, &[]);
}

/// Trace a `send()` (§4.1 `reference_specific_event`'s caller): the
/// skeleton pins the slot it just published using the reserved sentinel
/// transaction-log row, wraps that reference in a type-erased sample
/// pointer, and hands it to the runtime so the sample outlives the
/// asynchronous trace record.
pub fn trace_send(
    runtime: &TracingRuntime,
    config: &TracingEndpointConfig,
    element: &ServiceElementInstanceId,
    timestamp: u64,
    offset: usize,
    size: usize,
    sample: TypeErasedSamplePtr,
) {
    if !SkeletonTracePoint::Send.is_enabled(config.enabled_trace_points) {
        return;
    }
    let meta = MetaInfo {
        trace_point: TracePointKind::Skeleton(SkeletonTracePoint::Send),
        element: element.clone(),
        data_id: Some(timestamp),
        data_loss: false,
    };
    let _ = runtime.trace_shm(BindingTag::Lola, element, meta, offset, size, sample);
}

/// Trace the allocation half of a `send`, before the payload is written
/// (local trace: nothing in shared memory is observable yet).
pub fn trace_send_with_allocate(
    runtime: &TracingRuntime,
    config: &TracingEndpointConfig,
    element: &ServiceElementInstanceId,
) {
    if !SkeletonTracePoint::SendWithAllocate.is_enabled(config.enabled_trace_points) {
        return;
    }
    let meta = MetaInfo {
        trace_point: TracePointKind::Skeleton(SkeletonTracePoint::SendWithAllocate),
        element: element.clone(),
        data_id: None,
        data_loss: false,
    };
    let _ = runtime.trace_local(BindingTag::Lola, meta, &[]);
}
