// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The user-facing proxy (subscriber) wrapper (`SPEC_FULL.md` §A).
//!
//! Kept thin on purpose: every operation forwards straight into
//! [`SubscriptionStateMachine`], adding only the tracing glue calls the
//! spec's §4.7 wires to each proxy-side trace point. This module exists so
//! the end-to-end scenarios in `tests/end_to_end.rs` have something to
//! drive.

use crate::config::TracingEndpointConfig;
use crate::error::Result;
use crate::event::{EventDataControl, ProxyTracedSamplePtr, SamplePtr, TypeErasedSamplePtr};
use crate::subscription::{EventNotifier, Pid, ReceiveHandler, SubscriptionState, SubscriptionStateMachine};
use crate::tracing::{proxy_glue, ServiceElementInstanceId, TracingRuntime};
use std::sync::Arc;

/// The consumer side of one event endpoint.
pub struct Proxy<T> {
    control: Arc<EventDataControl<T>>,
    machine: SubscriptionStateMachine<T>,
    element: ServiceElementInstanceId,
    tracing: Option<Arc<TracingRuntime>>,
    tracing_config: TracingEndpointConfig,
}

impl<T: Send + 'static> Proxy<T> {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        control: Arc<EventDataControl<T>>,
        notifier: Arc<dyn EventNotifier>,
        notifier_key: String,
        provider_pid: Pid,
        provider_available: bool,
        element: ServiceElementInstanceId,
        tracing: Option<Arc<TracingRuntime>>,
        tracing_config: TracingEndpointConfig,
    ) -> Self {
        let machine = SubscriptionStateMachine::new(
            Arc::clone(&control),
            notifier,
            notifier_key,
            provider_pid,
            provider_available,
        );
        Self { control, machine, element, tracing, tracing_config }
    }

    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.machine.state()
    }

    /// §4.4 `subscribe`, traced after it succeeds.
    ///
    /// # Errors
    ///
    /// See [`SubscriptionStateMachine::subscribe`].
    pub fn subscribe(&self, max_samples: usize) -> Result<()> {
        self.machine.subscribe(max_samples)?;
        if let Some(runtime) = &self.tracing {
            proxy_glue::trace_subscribe(runtime, &self.tracing_config, &self.element, max_samples);
        }
        Ok(())
    }

    /// §4.4 `unsubscribe`.
    pub fn unsubscribe(&self) {
        self.machine.unsubscribe();
        if let Some(runtime) = &self.tracing {
            proxy_glue::trace_unsubscribe(runtime, &self.tracing_config, &self.element);
        }
    }

    /// §4.4 `stop_offer`, as observed by this subscriber.
    pub fn stop_offer(&self) {
        self.machine.stop_offer();
    }

    /// §4.4 `reoffer`.
    pub fn reoffer(&self, new_pid: Pid) {
        self.machine.reoffer(new_pid);
    }

    /// §4.4 `set_receive_handler`.
    pub fn set_receive_handler(&self, handler: ReceiveHandler) {
        self.machine.set_receive_handler(handler);
        if let Some(runtime) = &self.tracing {
            proxy_glue::trace_set_receive_handler(runtime, &self.tracing_config, &self.element);
        }
    }

    /// §4.4 `unset_receive_handler`.
    pub fn unset_receive_handler(&self) {
        self.machine.unset_receive_handler();
        if let Some(runtime) = &self.tracing {
            proxy_glue::trace_unset_receive_handler(runtime, &self.tracing_config, &self.element);
        }
    }

    /// §4.3 `get_new_samples_slot_indices`. Empty while not subscribed.
    ///
    /// When a tracing runtime is attached, each delivered sample also gets
    /// an independent tracing pin taken through this subscriber's own
    /// leased transaction-log row (not the skeleton's sentinel row — see
    /// [`crate::event::ProxyTracedSamplePtr`]), kept alive until the sink
    /// signals it is done with the trace record.
    pub fn get_new_samples(&self, max_count: usize) -> Vec<SamplePtr<T>> {
        let Some(collector) = self.machine.get_slot_collector() else {
            return Vec::new();
        };
        let samples = collector.lock().get_new_samples_slot_indices(max_count);

        if let Some(runtime) = &self.tracing {
            if let Some(log_index) = self.machine.get_transaction_log_index() {
                for sample in &samples {
                    if self
                        .control
                        .reference_specific_event_for_subscriber(sample.index(), log_index)
                    {
                        let pinned =
                            ProxyTracedSamplePtr::new(Arc::clone(&self.control), sample.index(), log_index);
                        let erased = TypeErasedSamplePtr::new(pinned);
                        proxy_glue::trace_receive(
                            runtime,
                            &self.tracing_config,
                            &self.element,
                            sample.timestamp(),
                            0,
                            std::mem::size_of::<T>(),
                            erased,
                        );
                    }
                }
            }
        }

        samples
    }

    /// §4.3 `get_num_new_samples_available`. `0` while not subscribed.
    #[must_use]
    pub fn get_num_new_samples_available(&self) -> usize {
        self.machine
            .get_slot_collector()
            .map_or(0, |collector| collector.lock().get_num_new_samples_available())
    }
}
