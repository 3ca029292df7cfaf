// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The subscription state machine and its binding to the notifier
//! subsystem (§4.4, §4.6).

mod receive_handler;
mod state_machine;

pub use receive_handler::{
    notifier_key, EventNotifier, EventReceiveHandlerManager, Pid, ReceiveHandler, RegistrationId,
};
pub use state_machine::{SubscriptionState, SubscriptionStateMachine};
