// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Plain configuration structs handed to the core at `offer()` time.
//!
//! The core never reads a config file, an environment variable, or a CLI
//! flag — per the spec (§6, §1 Non-goals) that is the job of an external
//! configuration layer. These structs are only the shape of what that layer
//! is expected to hand the skeleton when it offers an endpoint. With the
//! `config-serde` feature enabled they additionally derive `Serialize`/
//! `Deserialize` so an external JSON/YAML loader can populate them without
//! this crate depending on a parser (mirroring the teacher crate's
//! `qos-loaders` feature, which gates `serde` the same way for its own
//! config structs).

#[cfg(feature = "config-serde")]
use serde::{Deserialize, Serialize};

/// Describes one event endpoint at offer time: how many slots back it, how
/// many subscribers it admits, and how tracing is configured for it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config-serde", derive(Serialize, Deserialize))]
pub struct EndpointConfig {
    /// Number of slots in the fixed-size slot array (§3, `EventDataControl`).
    pub slot_count: usize,
    /// Maximum number of concurrent subscribers (rows in the
    /// `TransactionLogSet`'s proxy table).
    pub max_subscribers: usize,
    /// Tracing configuration for this endpoint.
    pub tracing: TracingEndpointConfig,
}

impl EndpointConfig {
    /// Construct a config with tracing left at its default (enabled, no
    /// explicit per-trace-point slot override).
    #[must_use]
    pub fn new(slot_count: usize, max_subscribers: usize) -> Self {
        Self {
            slot_count,
            max_subscribers,
            tracing: TracingEndpointConfig::default(),
        }
    }
}

/// Per-endpoint tracing configuration (§6 "To the configuration layer": "an
/// enable mask for trace points" and "required tracing-slot count per trace
/// point").
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config-serde", derive(Serialize, Deserialize))]
pub struct TracingEndpointConfig {
    /// Bitmask of enabled trace points for this service element. Bit
    /// positions are defined by `crate::tracing::TracePoint::bit()`.
    pub enabled_trace_points: u32,
    /// Number of in-flight `TraceContextId` slots reserved for this service
    /// element (§4.7: "the range size equals the configured 'IPC tracing
    /// slots' for that element").
    pub ipc_tracing_slots: usize,
    /// Cap on consecutive sink failures before tracing disables itself
    /// globally (§4.7 `consecutive_failure_counter`). `None` means
    /// "practically infinite", the spec's default.
    pub consecutive_failure_cap: Option<u32>,
}

impl Default for TracingEndpointConfig {
    fn default() -> Self {
        Self {
            enabled_trace_points: u32::MAX,
            ipc_tracing_slots: 8,
            consecutive_failure_cap: None,
        }
    }
}

impl TracingEndpointConfig {
    /// A config with tracing fully disabled (`enabled_trace_points == 0`).
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled_trace_points: 0,
            ipc_tracing_slots: 0,
            consecutive_failure_cap: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_config_defaults_tracing_enabled() {
        let cfg = EndpointConfig::new(4, 2);
        assert_eq!(cfg.slot_count, 4);
        assert_eq!(cfg.max_subscribers, 2);
        assert_eq!(cfg.tracing.enabled_trace_points, u32::MAX);
    }

    #[test]
    fn tracing_disabled_has_zero_slots() {
        let tracing = TracingEndpointConfig::disabled();
        assert_eq!(tracing.enabled_trace_points, 0);
        assert_eq!(tracing.ipc_tracing_slots, 0);
    }
}
