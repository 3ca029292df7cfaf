// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Opaque identifiers shared across the tracing runtime (§4.7, §6).

/// The small, closed set of bindings the tracing runtime can serve.
///
/// §9 REDESIGN FLAGS prefers a tagged variant over dynamic dispatch here;
/// dynamic dispatch is reserved for the sink itself ([`super::TraceSink`]).
/// This crate implements only the LoLa (shared-memory) binding, but the
/// enum is kept open-ended in shape rather than collapsed to a unit type so
/// a sibling binding can be added as another variant without reshaping the
/// runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingTag {
    Lola,
}

/// An individually addressable event or field within a service type,
/// scoped to one instance (§ Glossary "Service element").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceElementInstanceId(pub String);

impl ServiceElementInstanceId {
    #[must_use]
    pub fn new(service: &str, instance: &str, element: &str) -> Self {
        Self(format!("{service}/{instance}/{element}"))
    }
}

/// Opaque trace-client id handed back by [`super::TraceSink::register_client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceClientId(pub u32);

/// Opaque shm-object handle handed back by
/// [`super::TraceSink::register_shm_object`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShmObjectHandle(pub u64);

/// A token associating an in-flight asynchronous trace record with the
/// sample pointer that must outlive it (§ Glossary "Trace context id").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceContextId(pub usize);
