//
// Copyright (c) The BFD Contributors
//
// SPDX-License-Identifier: MIT
//

//! State-change notifications (§6 "Notification channel"): a bounded,
//! best-effort fan-out from sessions to whatever is watching for
//! Up/Down transitions (an external BGP speaker, a monitoring agent).

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::warn;

use crate::packet::Diag;
use crate::types::State;

#[derive(Clone, Debug)]
pub struct StateChange {
    pub local_discr: u32,
    pub peer_addr: SocketAddr,
    pub old_state: State,
    pub new_state: State,
    pub diag: Diag,
    pub timestamp: DateTime<Utc>,
}

// Creates a bounded notification channel. `capacity` mirrors the recv
// queue's capacity in spirit but is caller-chosen since fan-out consumers
// vary widely in how fast they drain.
pub fn channel(capacity: usize) -> (mpsc::Sender<StateChange>, mpsc::Receiver<StateChange>) {
    mpsc::channel(capacity)
}

// Sends `change` without blocking. On backpressure the notification is
// dropped and a warning logged — spec.md §9 flags this as a known
// limitation for reliable-monitoring use cases, not a bug to fix here.
pub(crate) fn notify(sender: &Option<mpsc::Sender<StateChange>>, change: StateChange) {
    let Some(sender) = sender else {
        return;
    };
    if let Err(mpsc::error::TrySendError::Full(change)) = sender.try_send(change) {
        warn!(
            local_discr = change.local_discr,
            peer = %change.peer_addr,
            old_state = %change.old_state,
            new_state = %change.new_state,
            "dropping state-change notification, channel full"
        );
    }
}
