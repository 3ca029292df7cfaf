// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The binding-neutral tracing runtime (§4.7).
//!
//! Centralizes every policy decision around the generic trace sink so the
//! skeleton/proxy glue (§4.7's "Skeleton/proxy event tracing glue", see
//! `crate::tracing::trace_point`) only ever has to call one `trace_local`
//! or `trace_shm` entry point per trace point.

use super::context_pool::ContextIdTable;
use super::ids::{BindingTag, ServiceElementInstanceId, ShmObjectHandle, TraceClientId, TraceContextId};
use super::sink::{MetaInfo, ShmChunk, SinkError, SinkResult, TraceSink};
use crate::error::{LolaError, Result};
use crate::event::TypeErasedSamplePtr;
use dashmap::DashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Per-binding runtime state (§4.7 "Per-binding state").
struct BindingRuntime {
    client_id: TraceClientId,
    data_loss: AtomicBool,
    shm_objects: DashMap<ServiceElementInstanceId, ShmObjectHandle>,
    /// File descriptors cached after a recoverable registration failure,
    /// retried the next time this element is traced (§4.7 step 2).
    pending_fds: DashMap<ServiceElementInstanceId, i32>,
    ranges: DashMap<ServiceElementInstanceId, Range<usize>>,
    contexts: ContextIdTable,
}

impl BindingRuntime {
    fn new(client_id: TraceClientId) -> Self {
        Self {
            client_id,
            data_loss: AtomicBool::new(false),
            shm_objects: DashMap::new(),
            pending_fds: DashMap::new(),
            ranges: DashMap::new(),
            contexts: ContextIdTable::new(),
        }
    }
}

/// Centralizes all policy around the generic trace sink (§4.7).
///
/// `is_enabled` starts `true` and only ever transitions to `false`; once
/// disabled, every further trace call is a no-op that returns
/// [`LolaError::TraceDisableAllTracePoints`] without touching the sink.
pub struct TracingRuntime {
    sink: Arc<dyn TraceSink>,
    is_enabled: AtomicBool,
    consecutive_failures: AtomicU32,
    failure_cap: Option<u32>,
    bindings: DashMap<BindingTag, Arc<BindingRuntime>>,
}

impl TracingRuntime {
    /// `failure_cap` mirrors [`crate::config::TracingEndpointConfig::consecutive_failure_cap`]:
    /// `None` means "practically infinite" (tracing never self-disables on
    /// the failure counter alone, only on a terminal-fatal sink error).
    #[must_use]
    pub fn new(sink: Arc<dyn TraceSink>, failure_cap: Option<u32>) -> Self {
        Self {
            sink,
            is_enabled: AtomicBool::new(true),
            consecutive_failures: AtomicU32::new(0),
            failure_cap,
            bindings: DashMap::new(),
        }
    }

    #[must_use]
    pub fn is_tracing_enabled(&self) -> bool {
        self.is_enabled.load(Ordering::Acquire)
    }

    fn disable_globally(&self, reason: &str) {
        if !self.is_enabled.swap(false, Ordering::AcqRel) {
            return;
        }
        crate::error!("tracing disabled globally: {reason}");
    }

    /// Register this process as a trace client for `binding`. Idempotent
    /// per binding: a second call replaces the stored runtime (matching a
    /// restart of the client-side connection to the sink).
    pub fn register_client(&self, binding: BindingTag, app_instance_id: &str) -> TraceClientId {
        let client_id = self.sink.register_client(binding, app_instance_id);
        self.bindings
            .insert(binding, Arc::new(BindingRuntime::new(client_id)));
        client_id
    }

    /// Reserve `ipc_tracing_slots` context-id slots for `element` and
    /// record it for later `trace_shm` calls. Must run before the first
    /// trace on this element.
    pub fn register_service_element(
        &self,
        binding: BindingTag,
        element: ServiceElementInstanceId,
        ipc_tracing_slots: usize,
    ) {
        if let Some(runtime) = self.bindings.get(&binding) {
            let range = runtime.contexts.allocate_range(ipc_tracing_slots);
            runtime.ranges.insert(element, range);
        }
    }

    /// Submit `fd` to the sink and store the returned handle.
    pub fn register_shm_object(&self, binding: BindingTag, element: ServiceElementInstanceId, fd: i32) {
        let Some(runtime) = self.bindings.get(&binding) else {
            return;
        };
        match self.sink.register_shm_object(runtime.client_id, fd) {
            Ok(handle) => {
                runtime.shm_objects.insert(element.clone(), handle);
                runtime.pending_fds.remove(&element);
            }
            Err(SinkError::Recoverable) => {
                runtime.pending_fds.insert(element, fd);
            }
            Err(SinkError::NonRecoverable) => {
                crate::warn!("shm object registration for this element was refused, not retrying");
            }
            Err(SinkError::TerminalFatal) => {
                self.disable_globally("shm object registration returned a terminal-fatal error");
            }
        }
    }

    /// Symmetric teardown: if a handle exists, unregisters it with the
    /// sink and drops it; otherwise clears any cached retry fd.
    pub fn unregister_shm_object(&self, binding: BindingTag, element: &ServiceElementInstanceId) {
        let Some(runtime) = self.bindings.get(&binding) else {
            return;
        };
        if let Some((_, handle)) = runtime.shm_objects.remove(element) {
            self.sink.unregister_shm_object(runtime.client_id, handle);
        } else {
            runtime.pending_fds.remove(element);
        }
    }

    /// Trace a local (non-shared-memory) payload (§4.7 `trace_local`).
    ///
    /// # Errors
    /// See [`LolaError::TraceDisableAllTracePoints`]/
    /// [`LolaError::TraceDisableTracePointInstance`]. Per §7, callers must
    /// never let either propagate to the application — a dropped trace
    /// record is never a publish/receive failure.
    pub fn trace_local(
        &self,
        binding: BindingTag,
        meta: MetaInfo,
        payload: &[u8],
    ) -> Result<()> {
        if !self.is_tracing_enabled() {
            return Err(LolaError::TraceDisableAllTracePoints);
        }
        let Some(runtime) = self.bindings.get(&binding) else {
            return Err(LolaError::TraceDisableTracePointInstance);
        };
        match self.sink.trace_local(runtime.client_id, &meta, payload) {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Release);
                Ok(())
            }
            Err(err) => self.handle_sink_failure(&runtime, err),
        }
    }

    /// Trace a shared-memory payload, pinning `sample` alive until the
    /// sink's trace-done callback releases it (§4.7 `trace_shm`).
    ///
    /// # Errors
    /// See [`Self::trace_local`].
    pub fn trace_shm(
        &self,
        binding: BindingTag,
        element: &ServiceElementInstanceId,
        mut meta: MetaInfo,
        offset: usize,
        size: usize,
        sample: TypeErasedSamplePtr,
    ) -> Result<()> {
        if !self.is_tracing_enabled() {
            return Err(LolaError::TraceDisableAllTracePoints);
        }
        let Some(runtime) = self.bindings.get(&binding) else {
            return Err(LolaError::TraceDisableTracePointInstance);
        };

        let handle = match runtime.shm_objects.get(element).map(|r| *r) {
            Some(handle) => handle,
            None => {
                let Some(fd) = runtime.pending_fds.get(element).map(|r| *r) else {
                    return Err(LolaError::TraceDisableTracePointInstance);
                };
                match self.sink.register_shm_object(runtime.client_id, fd) {
                    Ok(handle) => {
                        runtime.shm_objects.insert(element.clone(), handle);
                        runtime.pending_fds.remove(element);
                        handle
                    }
                    Err(SinkError::TerminalFatal) => {
                        self.disable_globally("shm object retry returned a terminal-fatal error");
                        return Err(LolaError::TraceDisableAllTracePoints);
                    }
                    Err(_) => return Err(LolaError::TraceDisableTracePointInstance),
                }
            }
        };

        let Some(range) = runtime.ranges.get(element).map(|r| r.clone()) else {
            return Err(LolaError::TraceDisableTracePointInstance);
        };

        let Some(context_id) = runtime.contexts.try_reserve(&range, sample) else {
            // Pool full: drop the trace quietly, but remember we lost one.
            runtime.data_loss.store(true, Ordering::Release);
            return Ok(());
        };

        meta.data_loss = runtime.data_loss.load(Ordering::Acquire);
        let chunk = ShmChunk { handle, offset, size };

        match self.sink.trace_shm(runtime.client_id, &meta, chunk, context_id) {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Release);
                Ok(())
            }
            Err(err) => {
                runtime.contexts.release(context_id);
                runtime.data_loss.store(true, Ordering::Release);
                self.handle_sink_failure(&runtime, err)
            }
        }
    }

    /// Invoked by the sink, out of band, once a shm trace record has been
    /// consumed — releases the pinned sample.
    pub fn on_trace_done(&self, binding: BindingTag, context_id: TraceContextId) {
        if let Some(runtime) = self.bindings.get(&binding) {
            runtime.contexts.release(context_id);
        }
    }

    #[must_use]
    pub fn has_data_loss(&self, binding: BindingTag) -> bool {
        self.bindings
            .get(&binding)
            .is_some_and(|runtime| runtime.data_loss.load(Ordering::Acquire))
    }

    fn handle_sink_failure(&self, runtime: &BindingRuntime, err: SinkError) -> Result<()> {
        match err {
            SinkError::TerminalFatal => {
                self.disable_globally("trace sink returned a terminal-fatal error");
                Err(LolaError::TraceDisableAllTracePoints)
            }
            SinkError::NonRecoverable => {
                runtime.data_loss.store(true, Ordering::Release);
                Err(LolaError::TraceDisableTracePointInstance)
            }
            SinkError::Recoverable => {
                runtime.data_loss.store(true, Ordering::Release);
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if self.failure_cap.is_some_and(|cap| failures >= cap) {
                    self.disable_globally("consecutive recoverable trace failures reached cap");
                    Err(LolaError::TraceDisableAllTracePoints)
                } else {
                    Ok(())
                }
            }
        }
    }
}
