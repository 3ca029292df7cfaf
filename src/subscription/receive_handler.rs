// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Binding to the external notifier subsystem (§4.6, §6 "To the notifier").

use std::sync::Arc;

/// Process id a notifier registration is scoped to.
pub type Pid = u32;

/// Opaque registration id handed back by [`EventNotifier::register`].
pub type RegistrationId = u64;

/// A callback invoked, on a notifier thread, when new samples are
/// available. Per §9 "Coroutine/async control flow", the registered
/// handler must be reentrant with respect to the subscription mutex — it
/// runs on a foreign thread, not inside any call this crate makes.
pub type ReceiveHandler = Arc<dyn Fn() + Send + Sync>;

/// The three calls the core needs from an external notifier (§6).
///
/// Delivery is best-effort; handlers run on a notifier thread the core
/// does not control.
pub trait EventNotifier: Send + Sync {
    fn register(&self, key: &str, handler: ReceiveHandler, source_pid: Pid) -> RegistrationId;
    fn reregister(&self, key: &str, source_pid: Pid);
    fn unregister(&self, key: &str, registration_id: RegistrationId, source_pid: Pid);
}

/// Map a `(quality, event/field name)` pair to the notifier's expected key,
/// the same free-standing, stateless mapping the original binding keeps
/// outside any type.
#[must_use]
pub fn notifier_key(quality: &str, event_name: &str) -> String {
    format!("{quality}/{event_name}")
}

/// Wraps the notifier's register/reregister/unregister calls with the
/// bookkeeping needed to satisfy §4.6's contract: at most one active
/// registration, idempotent unregister, and a pid that can be updated
/// without touching an existing registration.
pub struct EventReceiveHandlerManager {
    notifier: Arc<dyn EventNotifier>,
    key: String,
    pid: Pid,
    registration: Option<RegistrationId>,
    handler: Option<ReceiveHandler>,
}

impl EventReceiveHandlerManager {
    pub fn new(notifier: Arc<dyn EventNotifier>, key: String, pid: Pid) -> Self {
        Self {
            notifier,
            key,
            pid,
            registration: None,
            handler: None,
        }
    }

    /// Store a handler for a future registration without registering it
    /// yet (used while `NotSubscribed`/`SubscriptionPending`).
    pub fn set_pending(&mut self, handler: ReceiveHandler) {
        self.handler = Some(handler);
    }

    /// Drop any stored handler and unregister an active registration, if
    /// any.
    pub fn clear_pending(&mut self) {
        self.handler = None;
        self.unregister();
    }

    /// Register `handler` immediately, replacing any prior registration
    /// (§4.6: "first unregisters any previously registered handler").
    pub fn register_now(&mut self, handler: ReceiveHandler) {
        self.handler = Some(Arc::clone(&handler));
        self.unregister();
        self.registration = Some(self.notifier.register(&self.key, handler, self.pid));
    }

    /// Idempotent: a no-op if nothing is registered.
    pub fn unregister(&mut self) {
        if let Some(id) = self.registration.take() {
            self.notifier.unregister(&self.key, id, self.pid);
        }
    }

    /// Re-register the stored handler under the current pid (used on
    /// `reoffer`).
    pub fn reregister(&mut self) {
        if let Some(handler) = self.handler.clone() {
            self.unregister();
            self.registration = Some(self.notifier.register(&self.key, handler, self.pid));
        }
    }

    /// If a handler was pre-set but never registered (it was set while
    /// `NotSubscribed`/`SubscriptionPending`), register it now.
    pub fn register_if_pending(&mut self) {
        if self.handler.is_some() && self.registration.is_none() {
            self.reregister();
        }
    }

    /// Update the pid used for future registrations without touching an
    /// existing one (§4.6 `update_pid`).
    pub fn update_pid(&mut self, new_pid: Pid) {
        self.pid = new_pid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        registered: Mutex<Vec<(String, Pid)>>,
        unregistered: Mutex<Vec<(String, RegistrationId, Pid)>>,
        next_id: Mutex<RegistrationId>,
    }

    impl EventNotifier for RecordingNotifier {
        fn register(&self, key: &str, _handler: ReceiveHandler, source_pid: Pid) -> RegistrationId {
            self.registered.lock().push((key.to_string(), source_pid));
            let mut next = self.next_id.lock();
            *next += 1;
            *next
        }

        fn reregister(&self, _key: &str, _source_pid: Pid) {}

        fn unregister(&self, key: &str, registration_id: RegistrationId, source_pid: Pid) {
            self.unregistered
                .lock()
                .push((key.to_string(), registration_id, source_pid));
        }
    }

    #[test]
    fn notifier_key_joins_quality_and_event() {
        assert_eq!(notifier_key("reliable", "speed"), "reliable/speed");
    }

    #[test]
    fn register_now_replaces_prior_registration() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut manager = EventReceiveHandlerManager::new(notifier.clone(), "k".into(), 1);

        manager.register_now(Arc::new(|| {}));
        manager.register_now(Arc::new(|| {}));

        assert_eq!(notifier.registered.lock().len(), 2);
        assert_eq!(notifier.unregistered.lock().len(), 1);
    }

    #[test]
    fn unregister_is_idempotent() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut manager = EventReceiveHandlerManager::new(notifier.clone(), "k".into(), 1);

        manager.unregister();
        manager.unregister();

        assert!(notifier.unregistered.lock().is_empty());
    }

    #[test]
    fn pending_handler_registers_on_demand() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut manager = EventReceiveHandlerManager::new(notifier.clone(), "k".into(), 1);

        manager.set_pending(Arc::new(|| {}));
        assert!(notifier.registered.lock().is_empty());

        manager.register_if_pending();
        assert_eq!(notifier.registered.lock().len(), 1);
    }

    #[test]
    fn update_pid_does_not_touch_existing_registration() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut manager = EventReceiveHandlerManager::new(notifier.clone(), "k".into(), 1);
        manager.register_now(Arc::new(|| {}));

        manager.update_pid(2);
        assert_eq!(notifier.registered.lock().len(), 1);

        manager.reregister();
        assert_eq!(notifier.registered.lock()[1].1, 2);
    }
}
