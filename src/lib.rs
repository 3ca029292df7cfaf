// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # LoLa — shared-memory publish/subscribe middleware core
//!
//! The core data-plane and subscription lifecycle of one event endpoint,
//! shared by a single producer process (the *skeleton*) and many consumer
//! processes (*proxies*) observing samples in shared memory without
//! copying. This crate implements the pieces described in `SPEC_FULL.md`
//! §1: service discovery, shared-memory segment placement beyond the
//! `SharedMemoryResource` contract, the notifier's own wake delivery, and
//! the trace sink backend are all external collaborators whose contracts
//! this crate depends on but does not implement.
//!
//! ## Quick Start
//!
//! ```rust
//! use lola::event::EventDataControl;
//!
//! // Skeleton side: offer an endpoint with 4 slots, admit up to 2 subscribers.
//! let control = EventDataControl::<u32>::new(4, 2);
//! assert_eq!(control.slot_count(), 4);
//!
//! let index = control.allocate_next_slot().expect("a slot is free");
//! let timestamp = control.event_ready(index);
//! assert_eq!(timestamp, 1);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------------------------+
//! |                  Skeleton side      |      Proxy side           |
//! |  SampleAllocateePtr<T> (owning)      |  SamplePtr<T> (shared)    |
//! +-----------------------------------------------------------------+
//! |                 EventDataControl<T> (shared memory)              |
//! |   Slot[] (state+refcount+timestamp) | Payload[T]                |
//! |   subscriber_count                   | TransactionLogSet        |
//! +-----------------------------------------------------------------+
//! |  SubscriptionStateMachine  <-- EventReceiveHandlerManager         |
//! |                            <-- SlotCollector<T>                  |
//! |                            <-- TransactionLogRegistrationGuard    |
//! +-----------------------------------------------------------------+
//! |            TracingRuntime (binding-neutral, §4.7)                |
//! |   skeleton_glue / proxy_glue --> trace_local / trace_shm         |
//! +-----------------------------------------------------------------+
//! ```
//!
//! ## Modules
//!
//! - [`event`] — the slot control block and allocation/publish/reference
//!   paths (§3, §4.1-§4.3).
//! - [`transaction_log`] — the per-subscriber crash-recovery journal (§4.5).
//! - [`subscription`] — the subscription state machine and notifier binding
//!   (§4.4, §4.6).
//! - [`tracing`] — the trace-point dispatch layer (§4.7).
//! - [`config`] — plain structs describing an endpoint at offer time (§6).
//! - [`shm`] — the shared-memory resource contract and a POSIX
//!   implementation of it (§6; kept out of the data-plane's own call graph
//!   per `SPEC_FULL.md` §D).
//! - [`logging`] — compile-time configurable logging, used throughout.
//! - [`error`] — the recoverable error taxonomy (§7) and `terminate` for
//!   contract violations.
//! - [`skeleton`] / [`proxy`] — thin, user-facing wrappers with no policy of
//!   their own, forwarding straight into `event`/`subscription`; see
//!   `tests/end_to_end.rs` for the scenarios they exist to drive.
//!
//! ## Non-goals
//!
//! No dynamic resizing of a slot array after offering; no byte-level wire
//! compatibility with any external protocol; no guaranteed delivery (lossy
//! by design under a slow subscriber). See `spec.md` §1 and `SPEC_FULL.md`
//! for the complete scope statement.

#![cfg_attr(docsrs, feature(doc_cfg))]

/// Compile-time configurable logging system (zero-cost when disabled).
#[macro_use]
pub mod logging;

/// Recoverable error taxonomy (§7) and the `terminate` contract-violation
/// path.
pub mod error;

/// Plain configuration structs handed to the core at `offer()` time (§6).
pub mod config;

/// The slot control block and the sample allocation/reception paths
/// (§3, §4.1-§4.3).
pub mod event;

/// The per-subscriber crash-recovery journal (§3, §4.5).
pub mod transaction_log;

/// The subscription state machine and its binding to the notifier
/// subsystem (§4.4, §4.6).
pub mod subscription;

/// The tracing dispatch layer (§4.7).
pub mod tracing;

/// The shared-memory resource contract and implementations of it (§6).
pub mod shm;

/// The user-facing skeleton (publisher) wrapper: thin forwarding over
/// [`event::EventDataControl`] plus its tracing glue (`SPEC_FULL.md` §A).
pub mod skeleton;

/// The user-facing proxy (subscriber) wrapper: thin forwarding over
/// [`subscription::SubscriptionStateMachine`] plus its tracing glue
/// (`SPEC_FULL.md` §A).
pub mod proxy;

pub use config::{EndpointConfig, TracingEndpointConfig};
pub use error::{terminate, LolaError, Result};
pub use event::{EventDataControl, SampleAllocateePtr, SamplePtr, SlotState, TypeErasedSamplePtr};
pub use proxy::Proxy;
pub use skeleton::Skeleton;
pub use subscription::{SubscriptionState, SubscriptionStateMachine};
pub use transaction_log::{TransactionLog, TransactionLogRegistrationGuard, TransactionLogSet};

/// LoLa crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// End-to-end scenario 1 from `spec.md` §8: "Publish/receive, one of
    /// each."
    #[test]
    fn publish_receive_one_of_each() {
        let control = EventDataControl::<u32>::new(4, 2);
        let log_set = Arc::clone(control.log_set());
        let guard = log_set.register().expect("a free transaction-log row");

        let index = control.allocate_next_slot().expect("a free slot");
        let mut allocatee = SampleAllocateePtr::new(Arc::clone(&control), index);
        allocatee.write(10);
        let timestamp = allocatee.send();
        assert_eq!(timestamp, 1);

        let mut collector = event::SlotCollector::new(Arc::clone(&control), guard.index(), 4);
        let samples = collector.get_new_samples_slot_indices(4);
        assert_eq!(samples.len(), 1);
        assert_eq!(*samples[0], 10);
        assert_eq!(samples[0].timestamp(), 1);

        drop(samples);
        assert_eq!(collector.get_num_new_samples_available(), 0);
    }

    /// End-to-end scenario 4 from `spec.md` §8: "Subscribe/unsubscribe
    /// journal", driven through the public state machine rather than its
    /// parts directly.
    #[test]
    fn subscribe_unsubscribe_journal_round_trip() {
        use subscription::{EventNotifier, Pid, ReceiveHandler, RegistrationId};

        struct NullNotifier;
        impl EventNotifier for NullNotifier {
            fn register(&self, _key: &str, _handler: ReceiveHandler, _source_pid: Pid) -> RegistrationId {
                1
            }
            fn reregister(&self, _key: &str, _source_pid: Pid) {}
            fn unregister(&self, _key: &str, _registration_id: RegistrationId, _source_pid: Pid) {}
        }

        let control = EventDataControl::<u32>::new(4, 2);
        let machine = SubscriptionStateMachine::new(
            Arc::clone(&control),
            Arc::new(NullNotifier),
            "reliable/speed".to_string(),
            1,
            true,
        );

        machine.subscribe(5).unwrap();
        assert_eq!(control.subscriber_count(), 1);
        assert_eq!(machine.state(), SubscriptionState::Subscribed);

        machine.unsubscribe();
        assert_eq!(control.subscriber_count(), 0);
        assert_eq!(machine.state(), SubscriptionState::NotSubscribed);
    }
}
