// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Proxy-side trace-point glue (§2 "Skeleton/proxy event tracing glue",
//! §C supplement from `proxy_event_tracing.*`).
//!
//! Mirrors `skeleton_glue`: one function per proxy-side trace point,
//! gated by the endpoint's enable mask, always swallowing the result.

use super::{BindingTag, MetaInfo, ProxyTracePoint, ServiceElementInstanceId, TracePointKind, TracingRuntime};
use crate::config::TracingEndpointConfig;
use crate::event::TypeErasedSamplePtr;

pub fn trace_subscribe(
    runtime: &TracingRuntime,
    config: &TracingEndpointConfig,
    element: &ServiceElementInstanceId,
    max_samples: usize,
) {
    if !ProxyTracePoint::Subscribe.is_enabled(config.enabled_trace_points) {
        return;
    }
    let meta = MetaInfo {
        trace_point: TracePointKind::Proxy(ProxyTracePoint::Subscribe),
        element: element.clone(),
        data_id: Some(max_samples as u64),
        data_loss: false,
    };
    let _ = runtime.trace_local(BindingTag::Lola, meta, &[]);
}

pub fn trace_unsubscribe(runtime: &TracingRuntime, config: &TracingEndpointConfig, element: &ServiceElementInstanceId) {
    if !ProxyTracePoint::Unsubscribe.is_enabled(config.enabled_trace_points) {
        return;
    }
    let meta = MetaInfo {
        trace_point: TracePointKind::Proxy(ProxyTracePoint::Unsubscribe),
        element: element.clone(),
        data_id: None,
        data_loss: false,
    };
    let _ = runtime.trace_local(BindingTag::Lola, meta, &[]);
}

pub fn trace_set_receive_handler(
    runtime: &TracingRuntime,
    config: &TracingEndpointConfig,
    element: &ServiceElementInstanceId,
) {
    if !ProxyTracePoint::SetReceiveHandler.is_enabled(config.enabled_trace_points) {
        return;
    }
    let meta = MetaInfo {
        trace_point: TracePointKind::Proxy(ProxyTracePoint::SetReceiveHandler),
        element: element.clone(),
        data_id: None,
        data_loss: false,
    };
    let _ = runtime.trace_local(BindingTag::Lola, meta, &[]);
}

pub fn trace_unset_receive_handler(
    runtime: &TracingRuntime,
    config: &TracingEndpointConfig,
    element: &ServiceElementInstanceId,
) {
    if !ProxyTracePoint::UnsetReceiveHandler.is_enabled(config.enabled_trace_points) {
        return;
    }
    let meta = MetaInfo {
        trace_point: TracePointKind::Proxy(ProxyTracePoint::UnsetReceiveHandler),
        element: element.clone(),
        data_id: None,
        data_loss: false,
    };
    let _ = runtime.trace_local(BindingTag::Lola, meta, &[]);
}

/// Trace a `get_new_samples` delivery: one call per sample handed to the
/// application, pinning it alive via the type-erased wrapper the same way
/// the skeleton side does for `send` (§4.2, §4.7 step 4).
pub fn trace_receive(
    runtime: &TracingRuntime,
    config: &TracingEndpointConfig,
    element: &ServiceElementInstanceId,
    timestamp: u64,
    offset: usize,
    size: usize,
    sample: TypeErasedSamplePtr,
) {
    if !ProxyTracePoint::Receive.is_enabled(config.enabled_trace_points) {
        return;
    }
    let meta = MetaInfo {
        trace_point: TracePointKind::Proxy(ProxyTracePoint::Receive),
        element: element.clone(),
        data_id: Some(timestamp),
        data_loss: false,
    };
    let _ = runtime.trace_shm(BindingTag::Lola, element, meta, offset, size, sample);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracing::{ShmObjectHandle, SinkResult, TraceClientId, TraceContextId, TraceDoneCallback, TraceSink};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink {
        local_calls: AtomicUsize,
    }

    impl TraceSink for CountingSink {
        fn register_client(&self, _binding: BindingTag, _app_instance_id: &str) -> TraceClientId {
            TraceClientId(1)
        }
        fn register_shm_object(&self, _client_id: TraceClientId, _fd: i32) -> SinkResult<ShmObjectHandle> {
            Ok(ShmObjectHandle(1))
        }
        fn unregister_shm_object(&self, _client_id: TraceClientId, _handle: ShmObjectHandle) {}
        fn trace_local(&self, _client_id: TraceClientId, _meta: &MetaInfo, _payload: &[u8]) -> SinkResult<()> {
            self.local_calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        fn trace_shm(
            &self,
            _client_id: TraceClientId,
            _meta: &MetaInfo,
            _chunk: super::super::ShmChunk,
            _context_id: TraceContextId,
        ) -> SinkResult<()> {
            Ok(())
        }
        fn register_trace_done_callback(&self, _client_id: TraceClientId, _callback: TraceDoneCallback) {}
    }

    #[test]
    fn subscribe_trace_point_respects_the_enable_mask() {
        let sink = Arc::new(CountingSink { local_calls: AtomicUsize::new(0) });
        let runtime = TracingRuntime::new(sink.clone(), None);
        runtime.register_client(BindingTag::Lola, "app");
        let element = ServiceElementInstanceId::new("svc", "inst", "evt");
        let config = TracingEndpointConfig::disabled();

        trace_subscribe(&runtime, &config, &element, 4);
        assert_eq!(sink.local_calls.load(Ordering::Relaxed), 0);

        let config = TracingEndpointConfig::default();
        trace_subscribe(&runtime, &config, &element, 4);
        assert_eq!(sink.local_calls.load(Ordering::Relaxed), 1);
    }
}
