//
// Copyright (c) The BFD Contributors
//
// SPDX-License-Identifier: MIT
//

//! Session configuration and the construction-time validation that
//! `ControlSession::new`/`EchoSession::new` run before a session starts.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::packet::AuthType;
use crate::types::{SessionRole, SessionType};

// Minimum interval BFD supports negotiating, per RFC 5880's discussion of
// sub-millisecond rates being impractical on most platforms.
pub const MIN_SUPPORTED_INTERVAL: Duration = Duration::from_micros(50_000);

// Authentication is configured per session but the key material itself is
// opaque to this crate: it lives behind the `Authenticator` trait's
// `authState`. This struct only carries what the FSM/codec need to know —
// that auth is on, and which type to advertise.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AuthConfig {
    pub auth_type: AuthType,
    pub key_id: u8,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub peer_addr: SocketAddr,
    pub local_addr: Option<SocketAddr>,
    pub interface: Option<String>,
    pub session_type: SessionType,
    pub role: SessionRole,
    pub detect_mult: u8,
    pub desired_min_tx: Duration,
    pub required_min_rx: Duration,
    pub auth: Option<AuthConfig>,
}

impl SessionConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.detect_mult == 0 {
            return Err(ConfigError::InvalidDetectMult(self.detect_mult));
        }
        if self.desired_min_tx.is_zero() {
            return Err(ConfigError::InvalidTxInterval);
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct EchoConfig {
    pub peer_addr: SocketAddr,
    pub tx_interval: Duration,
    pub detect_mult: u8,
}

impl EchoConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.detect_mult == 0 {
            return Err(ConfigError::InvalidDetectMult(self.detect_mult));
        }
        if self.tx_interval.is_zero() {
            return Err(ConfigError::InvalidEchoTxInterval);
        }
        Ok(())
    }
}
