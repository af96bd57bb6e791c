//
// Copyright (c) The BFD Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::SocketAddr;

use tracing::{debug, debug_span};

use crate::types::State;

// Debug-level trace points common to both session kinds.
#[derive(Debug)]
pub enum Debug<'a> {
    SessionCreate(u32, &'a SocketAddr),
    SessionDelete(u32, &'a SocketAddr),
    FsmTransition(u32, State, State),
    DetectionTimeExpiry(u32),
    RecvQueueFull(u32),
    PacketDiscarded(u32, &'a str),
}

// ===== impl Debug =====

impl Debug<'_> {
    pub(crate) fn log(&self) {
        match self {
            Debug::SessionCreate(discr, peer) | Debug::SessionDelete(discr, peer) => {
                debug_span!("session", local_discr = discr, peer = %peer)
                    .in_scope(|| debug!("{}", self));
            }
            Debug::FsmTransition(discr, old_state, new_state) => {
                debug_span!("session", local_discr = discr)
                    .in_scope(|| debug!(?old_state, ?new_state, "{}", self));
            }
            Debug::DetectionTimeExpiry(discr) | Debug::RecvQueueFull(discr) => {
                debug_span!("session", local_discr = discr).in_scope(|| debug!("{}", self));
            }
            Debug::PacketDiscarded(discr, reason) => {
                debug_span!("session", local_discr = discr)
                    .in_scope(|| debug!(%reason, "{}", self));
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::SessionCreate(..) => write!(f, "session created"),
            Debug::SessionDelete(..) => write!(f, "session deleted"),
            Debug::FsmTransition(..) => write!(f, "state transition"),
            Debug::DetectionTimeExpiry(..) => write!(f, "detection timer expired"),
            Debug::RecvQueueFull(..) => write!(f, "receive queue full, dropping packet"),
            Debug::PacketDiscarded(..) => write!(f, "discarding received packet"),
        }
    }
}
