// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The per-subscriber crash-recovery journal (§3, §4.5).
//!
//! If a peer process dies mid-increment, mid-decrement, mid-subscribe, or
//! mid-unsubscribe, a surviving process must be able to reconstruct a
//! consistent reference count on every slot it touched. This module is the
//! bookkeeping that makes that reconstruction possible — it is write-mostly
//! during normal operation and read only by [`TransactionLogSet::recover_all`].

mod log;
mod log_set;
mod slot;

pub use log::TransactionLog;
pub use log_set::{TransactionLogRegistrationGuard, TransactionLogSet};
pub use slot::{JournalState, TransactionLogSlot};
