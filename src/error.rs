//
// Copyright (c) The BFD Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::SocketAddr;

use tracing::{debug, warn};

use crate::packet::EncodeError;

// Errors that fail session construction (§7 "Configuration"). Construction
// is the only place these surface; once a session is running, its
// parameters are immutable.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConfigError {
    InvalidDiscriminator,
    InvalidDetectMult(u8),
    InvalidTxInterval,
    InvalidSessionType,
    InvalidSessionRole,
    InvalidEchoPeerAddr,
    InvalidEchoTxInterval,
}

// Errors raised while a session is running (§7 "Runtime"). Never fatal:
// the session logs and continues.
#[derive(Debug)]
pub enum SessionError {
    SendFailed(SocketAddr, Box<dyn std::error::Error + Send + Sync>),
    AuthVerifyFailed(SocketAddr),
}

// ===== impl ConfigError =====

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidDiscriminator => {
                write!(f, "local discriminator must be nonzero")
            }
            ConfigError::InvalidDetectMult(mult) => {
                write!(f, "detection multiplier must be nonzero, got {mult}")
            }
            ConfigError::InvalidTxInterval => {
                write!(f, "desired minimum TX interval must be nonzero")
            }
            ConfigError::InvalidSessionType => {
                write!(f, "unrecognized session type")
            }
            ConfigError::InvalidSessionRole => {
                write!(f, "unrecognized session role")
            }
            ConfigError::InvalidEchoPeerAddr => {
                write!(f, "echo session requires a peer address")
            }
            ConfigError::InvalidEchoTxInterval => {
                write!(f, "echo TX interval must be nonzero")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ===== impl SessionError =====

impl SessionError {
    pub fn log(&self) {
        match self {
            SessionError::SendFailed(addr, error) => {
                warn!(peer = %addr, error = %with_source(error.as_ref()), "{}", self);
            }
            SessionError::AuthVerifyFailed(addr) => {
                debug!(peer = %addr, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::SendFailed(..) => write!(f, "failed to send packet"),
            SessionError::AuthVerifyFailed(..) => {
                write!(f, "failed to authenticate received packet")
            }
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::SendFailed(_, error) => Some(error.as_ref()),
            SessionError::AuthVerifyFailed(..) => None,
        }
    }
}

// Logs a packet that could not be marshaled. In practice this only fires
// on a caller-side buffer-sizing bug, since outbound packets never carry
// attacker-controlled lengths.
pub(crate) fn log_encode_error(error: &EncodeError) {
    warn!(error = %error, "failed to build outbound packet");
}

fn with_source(error: &(dyn std::error::Error + 'static)) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}
