//
// Copyright (c) The BFD Contributors
//
// SPDX-License-Identifier: MIT
//

//! The outbound I/O boundary (§6 "PacketSender"): sessions never touch a
//! socket directly, they hand finished wire bytes to whatever the
//! orchestrator wired up.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

// Sends a marshaled packet to `dest_addr`. Implementations must tolerate
// concurrent calls from multiple sessions sharing one socket. Errors are
// logged and counted by the caller; they never affect FSM state.
#[async_trait]
pub trait PacketSender: Send + Sync {
    async fn send_packet(
        &self,
        cancel: &CancellationToken,
        bytes: &[u8],
        dest_addr: SocketAddr,
    ) -> std::io::Result<()>;
}
