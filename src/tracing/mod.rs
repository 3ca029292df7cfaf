// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The tracing dispatch layer (§2 "Tracing runtime" and "Skeleton/proxy
//! event tracing glue", §4.7).
//!
//! [`TracingRuntime`] is the binding-neutral core: it owns the global
//! enable flag, the consecutive-failure counter, and one [`TraceSink`]
//! connection per binding. [`skeleton_glue`]/[`proxy_glue`] are the thin,
//! per-trace-point wrappers the skeleton/proxy event types call into,
//! translating "is this trace point enabled for this endpoint's config"
//! into the one shared `trace_local`/`trace_shm` call.

mod context_pool;
mod ids;
mod runtime;
mod sink;
mod trace_point;

pub mod proxy_glue;
pub mod skeleton_glue;

pub use ids::{BindingTag, ServiceElementInstanceId, ShmObjectHandle, TraceClientId, TraceContextId};
pub use runtime::TracingRuntime;
pub use sink::{MetaInfo, ShmChunk, SinkError, SinkResult, TraceDoneCallback, TraceSink};
pub use trace_point::{ProxyTracePoint, SkeletonTracePoint, TracePointKind};
