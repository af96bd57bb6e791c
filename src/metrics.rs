//
// Copyright (c) The BFD Contributors
//
// SPDX-License-Identifier: MIT
//

//! Pluggable metrics sink (§6 "MetricsReporter"), generalizing the
//! teacher's inline `SessionStatistics` counters into something an
//! orchestrator can wire to its own metrics backend.

use std::net::SocketAddr;

pub trait MetricsReporter: Send + Sync {
    fn inc_packets_sent(&self, peer: SocketAddr, local_discr: u32);
    fn inc_packets_received(&self, peer: SocketAddr, local_discr: u32);
    fn record_state_transition(
        &self,
        peer: SocketAddr,
        local_discr: u32,
        old_state: &str,
        new_state: &str,
    );
}

// The default reporter every session is constructed with when the caller
// doesn't supply one.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsReporter for NoopMetrics {
    fn inc_packets_sent(&self, _peer: SocketAddr, _local_discr: u32) {}
    fn inc_packets_received(&self, _peer: SocketAddr, _local_discr: u32) {}
    fn record_state_transition(
        &self,
        _peer: SocketAddr,
        _local_discr: u32,
        _old_state: &str,
        _new_state: &str,
    ) {
    }
}
