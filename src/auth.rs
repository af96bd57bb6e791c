//
// Copyright (c) The BFD Contributors
//
// SPDX-License-Identifier: MIT
//

//! Authentication hook (§6 "Authenticator"): signs outbound packets and
//! verifies inbound ones in place, against an opaque per-session state
//! object the caller owns.

use async_trait::async_trait;

use crate::packet::Packet;

pub type AuthError = Box<dyn std::error::Error + Send + Sync>;

// Opaque authentication state held by a session between construction and
// teardown (sequence numbers, rolling keys, whatever the implementation
// needs). The session never inspects it.
pub trait AuthState: Send + Sync + std::fmt::Debug {}

#[async_trait]
pub trait Authenticator: Send + Sync {
    // Signs `packet` in place inside `buffer[..length]` after it has
    // already been marshaled without its auth section's digest filled in.
    async fn sign(
        &self,
        state: &mut dyn AuthState,
        packet: &Packet,
        buffer: &mut [u8],
        length: usize,
    ) -> Result<(), AuthError>;

    // Verifies a received packet's auth section against `wire`, the
    // original bytes as received (needed because MD5/SHA1 digests cover
    // the whole packet with the digest field zeroed).
    async fn verify(
        &self,
        state: &mut dyn AuthState,
        packet: &Packet,
        wire: &[u8],
        length: usize,
    ) -> Result<(), AuthError>;
}
