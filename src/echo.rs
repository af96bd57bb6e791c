//
// Copyright (c) The BFD Contributors
//
// SPDX-License-Identifier: MIT
//

//! The Echo session (§4.E): a simpler two-state machine for unaffiliated
//! echo probing. Reuses the Control packet codec and `PacketSender` but
//! has no peer BFD state to negotiate against — the remote just forwards
//! the packet back through its normal forwarding path.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use num_traits::FromPrimitive;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;

use crate::config::EchoConfig;
use crate::debug::Debug;
use crate::error::{log_encode_error, ConfigError, SessionError};
use crate::interval::{apply_jitter, microseconds_from_duration};
use crate::metrics::MetricsReporter;
use crate::notify::{self, StateChange};
use crate::packet::{Diag, Packet, PacketFlags, MAX_PACKET_SIZE};
use crate::sender::PacketSender;
use crate::types::State;

// Capacity of the bounded RecvEcho signal FIFO (§4.E `RecvEcho`).
const RECV_QUEUE_CAPACITY: usize = 16;

struct Shared {
    state: AtomicU8,
    local_diag: AtomicU8,
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    state_transitions: AtomicU64,
    last_state_change_unix_nanos: AtomicI64,
}

impl Shared {
    fn new() -> Self {
        Shared {
            state: AtomicU8::new(State::Down as u8),
            local_diag: AtomicU8::new(Diag::Nothing as u8),
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            state_transitions: AtomicU64::new(0),
            last_state_change_unix_nanos: AtomicI64::new(0),
        }
    }

    fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Relaxed)).unwrap()
    }
}

pub struct EchoSession {
    local_discr: u32,
    peer_addr: SocketAddr,
    tx_interval: Duration,
    detect_mult: u8,
    shared: Arc<Shared>,
    sender: Arc<dyn PacketSender>,
    metrics: Arc<dyn MetricsReporter>,
    notify_tx: Option<mpsc::Sender<StateChange>>,
    recv_tx: mpsc::Sender<()>,
    recv_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl EchoSession {
    pub fn new(
        config: EchoConfig,
        local_discr: u32,
        sender: Arc<dyn PacketSender>,
        metrics: Arc<dyn MetricsReporter>,
        notify_tx: Option<mpsc::Sender<StateChange>>,
    ) -> Result<Self, ConfigError> {
        if local_discr == 0 {
            return Err(ConfigError::InvalidDiscriminator);
        }
        config.validate()?;

        let (recv_tx, recv_rx) = mpsc::channel(RECV_QUEUE_CAPACITY);

        Debug::SessionCreate(local_discr, &config.peer_addr).log();

        Ok(EchoSession {
            local_discr,
            peer_addr: config.peer_addr,
            tx_interval: config.tx_interval,
            detect_mult: config.detect_mult,
            shared: Arc::new(Shared::new()),
            sender,
            metrics,
            notify_tx,
            recv_tx,
            recv_rx: Mutex::new(Some(recv_rx)),
        })
    }

    // ===== snapshot accessors =====

    pub fn local_discr(&self) -> u32 {
        self.local_discr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> State {
        self.shared.state()
    }

    pub fn local_diag(&self) -> Diag {
        Diag::from_u8(self.shared.local_diag.load(Ordering::Relaxed)).unwrap_or(Diag::Nothing)
    }

    pub fn packets_sent(&self) -> u64 {
        self.shared.packets_sent.load(Ordering::Relaxed)
    }

    pub fn packets_received(&self) -> u64 {
        self.shared.packets_received.load(Ordering::Relaxed)
    }

    pub fn state_transitions(&self) -> u64 {
        self.shared.state_transitions.load(Ordering::Relaxed)
    }

    pub fn last_state_change(&self) -> Option<i64> {
        match self.shared.last_state_change_unix_nanos.load(Ordering::Relaxed) {
            0 => None,
            nanos => Some(nanos),
        }
    }

    // ===== inbound operations =====

    // Non-blocking signal that an echoed packet came back; overflow drops
    // (§4.E `RecvEcho`).
    pub fn recv_echo(&self) {
        if self.recv_tx.try_send(()).is_err() {
            Debug::RecvQueueFull(self.local_discr).log();
        }
    }

    // ===== run loop =====

    pub async fn run(&self, cancel: CancellationToken) {
        let mut recv_rx = self
            .recv_rx
            .lock()
            .await
            .take()
            .expect("EchoSession::run must only be called once");

        let mut buf = [0u8; MAX_PACKET_SIZE];

        let tx_timer = tokio::time::sleep(self.tx_interval);
        let detect_timer = tokio::time::sleep(self.detection_time());
        tokio::pin!(tx_timer);
        tokio::pin!(detect_timer);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    break;
                }

                item = recv_rx.recv() => {
                    match item {
                        Some(()) => self.handle_recv_echo(detect_timer.as_mut()),
                        None => break,
                    }
                }

                () = &mut tx_timer => {
                    self.handle_tx_fire(&mut buf, tx_timer.as_mut(), &cancel).await;
                }

                () = &mut detect_timer => {
                    self.handle_detect_fire(detect_timer.as_mut());
                }
            }
        }
    }

    fn detection_time(&self) -> Duration {
        self.tx_interval * self.detect_mult as u32
    }

    async fn handle_tx_fire(
        &self,
        buf: &mut [u8; MAX_PACKET_SIZE],
        mut tx_timer: Pin<&mut Sleep>,
        cancel: &CancellationToken,
    ) {
        tx_timer
            .as_mut()
            .reset(Instant::now() + apply_jitter(self.tx_interval, self.detect_mult));

        let packet = Packet {
            version: Packet::VERSION,
            diag: self.local_diag(),
            state: self.state(),
            flags: PacketFlags::empty(),
            detect_mult: self.detect_mult,
            my_discr: self.local_discr,
            your_discr: 0,
            desired_min_tx: microseconds_from_duration(self.tx_interval),
            req_min_rx: 0,
            req_min_echo_rx: 0,
            auth: None,
        };

        let len = match packet.marshal(buf) {
            Ok(len) => len,
            Err(error) => {
                log_encode_error(&error);
                return;
            }
        };

        match self.sender.send_packet(cancel, &buf[..len], self.peer_addr).await {
            Ok(()) => {
                self.shared.packets_sent.fetch_add(1, Ordering::Relaxed);
                self.metrics.inc_packets_sent(self.peer_addr, self.local_discr);
            }
            Err(error) => {
                SessionError::SendFailed(self.peer_addr, Box::new(error)).log();
            }
        }
    }

    fn handle_recv_echo(&self, mut detect_timer: Pin<&mut Sleep>) {
        self.shared.packets_received.fetch_add(1, Ordering::Relaxed);
        self.metrics.inc_packets_received(self.peer_addr, self.local_discr);
        detect_timer
            .as_mut()
            .reset(Instant::now() + self.detection_time());

        if self.shared.state() == State::Down {
            self.transition(State::Up, Diag::Nothing);
        }
    }

    fn handle_detect_fire(&self, mut detect_timer: Pin<&mut Sleep>) {
        Debug::DetectionTimeExpiry(self.local_discr).log();

        if self.shared.state() == State::Up {
            self.transition(State::Down, Diag::EchoFailed);
        }
        detect_timer
            .as_mut()
            .reset(Instant::now() + self.detection_time());
    }

    fn transition(&self, new_state: State, diag: Diag) {
        let old_state = self.shared.state();
        self.shared.state.store(new_state as u8, Ordering::Relaxed);
        self.shared.local_diag.store(diag as u8, Ordering::Relaxed);
        self.shared.state_transitions.fetch_add(1, Ordering::Relaxed);
        self.shared
            .last_state_change_unix_nanos
            .store(Utc::now().timestamp_nanos_opt().unwrap_or(0), Ordering::Relaxed);
        self.metrics.record_state_transition(
            self.peer_addr,
            self.local_discr,
            old_state.as_str(),
            new_state.as_str(),
        );
        Debug::FsmTransition(self.local_discr, old_state, new_state).log();
        notify::notify(
            &self.notify_tx,
            StateChange {
                local_discr: self.local_discr,
                peer_addr: self.peer_addr,
                old_state,
                new_state,
                diag,
                timestamp: Utc::now(),
            },
        );
    }
}

impl Drop for EchoSession {
    fn drop(&mut self) {
        Debug::SessionDelete(self.local_discr, &self.peer_addr).log();
    }
}
