// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The three-state subscription lifecycle (§3 `SubscriptionStateMachine`,
//! §4.4).
//!
//! Public operations are serialized through one per-endpoint mutex, as the
//! spec requires; the one exception is [`SubscriptionStateMachine::get_slot_collector`],
//! which is handed out through an [`arc_swap::ArcSwapOption`] so the hot
//! receive path never contends with a concurrent `subscribe`/`unsubscribe`
//! call on the same endpoint — the crate's documented application-level
//! assumption is that callers serialize their own calls into the collector
//! (§4.4, §5 "lock-free ... single-threaded per endpoint").

use super::receive_handler::{EventNotifier, EventReceiveHandlerManager, Pid, ReceiveHandler};
use crate::error::{LolaError, Result};
use crate::event::{EventDataControl, SlotCollector};
use crate::transaction_log::{TransactionLogRegistrationGuard, TransactionLogSet};
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::sync::Arc;

/// The three states of §4.4's table, in the same order the spec lists them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    NotSubscribed,
    SubscriptionPending,
    Subscribed,
}

struct Inner<T> {
    state: SubscriptionState,
    guard: Option<TransactionLogRegistrationGuard>,
    max_sample_count: Option<usize>,
    handler_manager: EventReceiveHandlerManager,
    provider_available: bool,
    control: Arc<EventDataControl<T>>,
    log_set: Arc<TransactionLogSet>,
}

/// Process-local state per (proxy, event) (§3, §4.4).
pub struct SubscriptionStateMachine<T> {
    inner: Mutex<Inner<T>>,
    // Exposed lock-free: see module docs.
    collector: ArcSwapOption<Mutex<SlotCollector<T>>>,
}

impl<T> SubscriptionStateMachine<T> {
    #[must_use]
    pub fn new(
        control: Arc<EventDataControl<T>>,
        notifier: Arc<dyn EventNotifier>,
        notifier_key: String,
        initial_provider_pid: Pid,
        provider_available: bool,
    ) -> Self {
        let log_set = Arc::clone(control.log_set());
        Self {
            inner: Mutex::new(Inner {
                state: SubscriptionState::NotSubscribed,
                guard: None,
                max_sample_count: None,
                handler_manager: EventReceiveHandlerManager::new(
                    notifier,
                    notifier_key,
                    initial_provider_pid,
                ),
                provider_available,
                control,
                log_set,
            }),
            collector: ArcSwapOption::from(None),
        }
    }

    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.inner.lock().state
    }

    /// §4.4 `subscribe`. See the module-level table for the full
    /// per-state behavior.
    ///
    /// # Errors
    ///
    /// Returns [`LolaError::MaxSubscribersExceeded`] if no transaction-log
    /// row is free, or [`LolaError::MaxSampleCountNotRealizable`] if the
    /// slot array can't support `max_samples`, or if a re-`subscribe` names
    /// a different window than the one already active.
    pub fn subscribe(&self, max_samples: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            SubscriptionState::NotSubscribed => self.do_subscribe(&mut inner, max_samples),
            SubscriptionState::SubscriptionPending | SubscriptionState::Subscribed => {
                if inner.max_sample_count == Some(max_samples) {
                    Ok(())
                } else {
                    // §9 Open Question 2: retained verbatim from the
                    // source even though it leaves the machine in
                    // `SubscriptionPending` on failure — flagged there,
                    // not fixed here.
                    crate::warn!(
                        "subscribe({max_samples}) while already subscribed with a different \
                         window; state is left unchanged"
                    );
                    Err(LolaError::MaxSampleCountNotRealizable)
                }
            }
        }
    }

    fn do_subscribe(&self, inner: &mut Inner<T>, max_samples: usize) -> Result<()> {
        // Step 1: lease a transaction-log row.
        let guard = Arc::clone(&inner.log_set).register()?;

        // Step 2: journal subscribe_begin before the admission call, so the
        // journal exists even if admission itself crashes.
        guard.log().subscribe_begin(max_samples);

        // Step 3: admit under max_subscribers.
        if !inner.control.try_admit_subscriber() {
            guard.log().subscribe_abort();
            drop(guard);
            return Err(LolaError::MaxSampleCountNotRealizable);
        }

        // Step 4: commit the journal.
        guard.log().subscribe_commit();

        // Step 5: build a fresh collector.
        let collector = SlotCollector::new(Arc::clone(&inner.control), guard.index(), max_samples);
        self.collector.store(Some(Arc::new(Mutex::new(collector))));

        // Step 6: register a pre-set handler, if any, under the stored pid.
        inner.handler_manager.register_if_pending();

        // Step 7: transition.
        inner.guard = Some(guard);
        inner.max_sample_count = Some(max_samples);
        inner.state = if inner.provider_available {
            SubscriptionState::Subscribed
        } else {
            SubscriptionState::SubscriptionPending
        };
        Ok(())
    }

    /// §4.4 `unsubscribe`: a no-op from `NotSubscribed`, otherwise runs the
    /// `on_entry(NotSubscribed)` teardown.
    pub fn unsubscribe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SubscriptionState::NotSubscribed {
            return;
        }
        self.on_entry_not_subscribed(&mut inner);
    }

    /// The symmetric teardown run on every path into `NotSubscribed`
    /// (§4.4 `on_entry(NotSubscribed)`).
    fn on_entry_not_subscribed(&self, inner: &mut Inner<T>) {
        if let Some(guard) = &inner.guard {
            guard.log().unsubscribe_begin();
            inner.control.release_subscriber();
            guard.log().unsubscribe_commit();
        }
        inner.handler_manager.unregister();
        self.collector.store(None);
        inner.guard = None;
        inner.max_sample_count = None;
        inner.state = SubscriptionState::NotSubscribed;
    }

    /// §4.4 `stop_offer`. Terminates the process if called while
    /// `SubscriptionPending` — the spec treats that as a contract
    /// violation by the skeleton side of the matched pair.
    pub fn stop_offer(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            SubscriptionState::NotSubscribed => inner.provider_available = false,
            SubscriptionState::SubscriptionPending => {
                crate::error::terminate(
                    "stop_offer received while SubscriptionPending: contract violation",
                );
            }
            SubscriptionState::Subscribed => {
                inner.provider_available = false;
                inner.state = SubscriptionState::SubscriptionPending;
            }
        }
    }

    /// §4.4 `reoffer(new_pid)`.
    pub fn reoffer(&self, new_pid: Pid) {
        let mut inner = self.inner.lock();
        match inner.state {
            SubscriptionState::NotSubscribed => {
                inner.handler_manager.update_pid(new_pid);
                inner.provider_available = true;
            }
            SubscriptionState::SubscriptionPending => {
                inner.handler_manager.update_pid(new_pid);
                inner.handler_manager.reregister();
                inner.provider_available = true;
                inner.state = SubscriptionState::Subscribed;
            }
            SubscriptionState::Subscribed => {
                crate::warn!(
                    "reoffer(pid={new_pid}) received while already Subscribed; remaining \
                     Subscribed"
                );
            }
        }
    }

    /// §4.4 `set_receive_handler`.
    pub fn set_receive_handler(&self, handler: ReceiveHandler) {
        let mut inner = self.inner.lock();
        match inner.state {
            SubscriptionState::NotSubscribed | SubscriptionState::SubscriptionPending => {
                inner.handler_manager.set_pending(handler);
            }
            SubscriptionState::Subscribed => {
                inner.handler_manager.register_now(handler);
            }
        }
    }

    /// §4.4 `unset_receive_handler`.
    pub fn unset_receive_handler(&self) {
        let mut inner = self.inner.lock();
        inner.handler_manager.clear_pending();
    }

    /// Lock-free: the per-endpoint single-threaded-caller assumption
    /// documented in §4.4/§5 lets this skip the subscription mutex
    /// entirely.
    #[must_use]
    pub fn get_slot_collector(&self) -> Option<Arc<Mutex<SlotCollector<T>>>> {
        self.collector.load_full()
    }

    /// Well-defined only in `Subscribed`/`SubscriptionPending`; `None` in
    /// `NotSubscribed`.
    #[must_use]
    pub fn get_max_sample_count(&self) -> Option<usize> {
        self.inner.lock().max_sample_count
    }

    /// Well-defined only in `Subscribed`/`SubscriptionPending`; `None` in
    /// `NotSubscribed`.
    #[must_use]
    pub fn get_transaction_log_index(&self) -> Option<usize> {
        self.inner.lock().guard.as_ref().map(TransactionLogRegistrationGuard::index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as StdMutex;

    #[derive(Default)]
    struct NullNotifier {
        registrations: StdMutex<u64>,
    }

    impl EventNotifier for NullNotifier {
        fn register(&self, _key: &str, _handler: ReceiveHandler, _source_pid: Pid) -> u64 {
            let mut n = self.registrations.lock();
            *n += 1;
            *n
        }
        fn reregister(&self, _key: &str, _source_pid: Pid) {}
        fn unregister(&self, _key: &str, _registration_id: u64, _source_pid: Pid) {}
    }

    fn machine(provider_available: bool) -> SubscriptionStateMachine<u32> {
        let control = EventDataControl::<u32>::new(4, 2);
        let notifier = Arc::new(NullNotifier::default());
        SubscriptionStateMachine::new(control, notifier, "k".into(), 1, provider_available)
    }

    #[test]
    fn subscribe_from_not_subscribed_with_provider_goes_subscribed() {
        let machine = machine(true);
        machine.subscribe(4).unwrap();
        assert_eq!(machine.state(), SubscriptionState::Subscribed);
        assert_eq!(machine.get_max_sample_count(), Some(4));
        assert!(machine.get_slot_collector().is_some());
    }

    #[test]
    fn subscribe_without_provider_goes_pending() {
        let machine = machine(false);
        machine.subscribe(4).unwrap();
        assert_eq!(machine.state(), SubscriptionState::SubscriptionPending);
    }

    #[test]
    fn subscribe_again_with_same_window_is_a_no_op() {
        let machine = machine(true);
        machine.subscribe(4).unwrap();
        machine.subscribe(4).unwrap();
        assert_eq!(machine.state(), SubscriptionState::Subscribed);
    }

    #[test]
    fn subscribe_again_with_different_window_fails_but_leaves_state() {
        let machine = machine(true);
        machine.subscribe(4).unwrap();
        let err = machine.subscribe(2).unwrap_err();
        assert_eq!(err, LolaError::MaxSampleCountNotRealizable);
        assert_eq!(machine.state(), SubscriptionState::Subscribed);
    }

    #[test]
    fn unsubscribe_from_not_subscribed_is_a_no_op() {
        let machine = machine(true);
        machine.unsubscribe();
        assert_eq!(machine.state(), SubscriptionState::NotSubscribed);
    }

    #[test]
    fn subscribe_then_unsubscribe_journal_round_trips_to_clean() {
        let machine = machine(true);
        machine.subscribe(5).unwrap();
        let index = machine.get_transaction_log_index().unwrap();
        machine.unsubscribe();
        assert_eq!(machine.state(), SubscriptionState::NotSubscribed);
        assert!(machine.get_slot_collector().is_none());
        assert!(machine.get_max_sample_count().is_none());
        // The row was released to the pool clean, so a fresh subscribe can
        // reuse it (and reuses the same index given capacity 2 and no
        // other subscribers).
        machine.subscribe(5).unwrap();
        assert_eq!(machine.get_transaction_log_index(), Some(index));
    }

    #[test]
    fn stop_offer_then_reoffer_round_trips_subscribed() {
        let machine = machine(true);
        machine.subscribe(4).unwrap();
        machine.stop_offer();
        assert_eq!(machine.state(), SubscriptionState::SubscriptionPending);
        machine.reoffer(2);
        assert_eq!(machine.state(), SubscriptionState::Subscribed);
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn stop_offer_while_pending_terminates() {
        let machine = machine(false);
        machine.subscribe(4).unwrap();
        assert_eq!(machine.state(), SubscriptionState::SubscriptionPending);
        machine.stop_offer();
    }

    #[test]
    fn receive_handler_registers_immediately_when_subscribed() {
        let machine = machine(true);
        machine.subscribe(4).unwrap();
        machine.set_receive_handler(Arc::new(|| {}));
        // No panic / no observable state beyond "it registered" (covered by
        // `EventReceiveHandlerManager`'s own unit tests); this exercises the
        // Subscribed branch of the dispatch.
        machine.unset_receive_handler();
    }

    #[test]
    fn pending_receive_handler_registers_on_subscribe() {
        let machine = machine(true);
        machine.set_receive_handler(Arc::new(|| {}));
        machine.subscribe(4).unwrap();
        assert_eq!(machine.state(), SubscriptionState::Subscribed);
    }
}
