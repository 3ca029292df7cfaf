// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The generic trace sink contract (§6 "To the trace sink").

use super::ids::{BindingTag, ServiceElementInstanceId, ShmObjectHandle, TraceClientId, TraceContextId};
use super::trace_point::TracePointKind;
use std::sync::Arc;

/// How a sink failure is classified (§7, §4.7 step 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// Transient; swallowed unless the consecutive-failure cap is reached.
    Recoverable,
    /// Disables this endpoint's tracing only.
    NonRecoverable,
    /// Disables tracing globally for the process.
    TerminalFatal,
}

/// Result type for calls into the external sink.
pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// Invoked by the sink, out of band, once an asynchronous `trace_shm`
/// record has been consumed or dropped, keyed by the `TraceContextId` that
/// call was given.
pub type TraceDoneCallback = Arc<dyn Fn(TraceContextId) + Send + Sync>;

/// One chunk of shared-memory payload referenced by a trace record (§4.7
/// step 5: "a one-chunk shared-memory list").
#[derive(Debug, Clone, Copy)]
pub struct ShmChunk {
    pub handle: ShmObjectHandle,
    pub offset: usize,
    pub size: usize,
}

/// The metadata accompanying every trace record (§4.7 step 5).
#[derive(Debug, Clone)]
pub struct MetaInfo {
    pub trace_point: TracePointKind,
    pub element: ServiceElementInstanceId,
    pub data_id: Option<u64>,
    pub data_loss: bool,
}

/// The narrow contract the tracing runtime assumes of its backend (§6).
///
/// `register_shm_object`/`trace_shm` are the async, zero-copy path;
/// `trace_local` is synchronous and returns once the sink has consumed or
/// dropped the record.
pub trait TraceSink: Send + Sync {
    fn register_client(&self, binding: BindingTag, app_instance_id: &str) -> TraceClientId;

    /// # Errors
    /// See [`SinkError`].
    fn register_shm_object(&self, client_id: TraceClientId, fd: i32) -> SinkResult<ShmObjectHandle>;

    fn unregister_shm_object(&self, client_id: TraceClientId, handle: ShmObjectHandle);

    /// Synchronous: returns once the record has been consumed or dropped.
    ///
    /// # Errors
    /// See [`SinkError`].
    fn trace_local(&self, client_id: TraceClientId, meta: &MetaInfo, payload: &[u8]) -> SinkResult<()>;

    /// Asynchronous: the sink calls back with `context_id` through a
    /// callback registered via [`Self::register_trace_done_callback`] once
    /// the sample can be released.
    ///
    /// # Errors
    /// See [`SinkError`].
    fn trace_shm(
        &self,
        client_id: TraceClientId,
        meta: &MetaInfo,
        chunk: ShmChunk,
        context_id: TraceContextId,
    ) -> SinkResult<()>;

    fn register_trace_done_callback(&self, client_id: TraceClientId, callback: TraceDoneCallback);
}
