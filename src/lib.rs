//
// Copyright (c) The BFD Contributors
//
// SPDX-License-Identifier: MIT
//

//! Bidirectional Forwarding Detection (RFC 5880/5881/5883) session core:
//! packet codec, FSM, and the Control/Echo session tasks. No sockets, no
//! configuration store, no northbound protocol — those belong to whatever
//! daemon links this crate in.

pub mod auth;
pub mod config;
pub mod control;
pub mod debug;
pub mod echo;
pub mod error;
pub mod fsm;
pub mod interval;
pub mod metrics;
pub mod notify;
pub mod packet;
pub mod sender;
pub mod types;

pub use config::{AuthConfig, EchoConfig, SessionConfig};
pub use control::ControlSession;
pub use echo::EchoSession;
pub use error::{ConfigError, SessionError};
pub use fsm::{Action, Event, Transition};
pub use notify::StateChange;
pub use packet::{AuthSection, AuthType, Diag, Packet, PacketFlags};
pub use types::{SessionRole, SessionType, State};
