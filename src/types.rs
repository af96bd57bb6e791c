//
// Copyright (c) The BFD Contributors
//
// SPDX-License-Identifier: MIT
//

//! Shared wire-adjacent enumerations used by both the Control and Echo
//! session state machines.

use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

// BFD session state (RFC 5880, Section 4.1).
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum State {
    AdminDown = 0,
    Down = 1,
    Init = 2,
    Up = 3,
}

// Whether a session actively initiates the three-way handshake or waits for
// the peer to do so.
//
// RFC 5880, Section 6.1: a Passive session with no knowledge of its peer's
// discriminator must not transmit until it has received a packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum SessionRole {
    Active,
    Passive,
}

// Distinguishes IP single-hop sessions (tied to an interface, TTL fixed at
// 255) from IP multihop sessions (TTL is negotiated out of band). Only
// affects source-port selection and TTL/GTSM enforcement, both of which are
// the external I/O layer's responsibility.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum SessionType {
    SingleHop,
    MultiHop,
}

// ===== impl State =====

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::AdminDown => "AdminDown",
            State::Down => "Down",
            State::Init => "Init",
            State::Up => "Up",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
