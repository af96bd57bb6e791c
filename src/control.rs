//
// Copyright (c) The BFD Contributors
//
// SPDX-License-Identifier: MIT
//

//! The Control session (§4.D): per-peer state, timer discipline, the
//! packet acceptance pipeline, Poll Sequence, and transmission. A session
//! is a single task with exclusive ownership of its mutable state; every
//! other field exposed to callers is an atomic, read without locking.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use num_traits::FromPrimitive;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthState, Authenticator};
use crate::config::SessionConfig;
use crate::debug::Debug;
use crate::error::{log_encode_error, ConfigError, SessionError};
use crate::fsm::{self, Action, Event, Transition};
use crate::interval::{self, apply_jitter};
use crate::metrics::MetricsReporter;
use crate::notify::{self, StateChange};
use crate::packet::{AuthSection, Diag, Packet, PacketFlags, MAX_PACKET_SIZE};
use crate::sender::PacketSender;
use crate::types::{SessionRole, State};

// Capacity of the bounded inbound-packet FIFO (§4.D `RecvPacket`).
const RECV_QUEUE_CAPACITY: usize = 16;

// 1-second floor on the transmitted Desired Min TX Interval while the
// session isn't Up (Invariant 6, "Slow rate" in the glossary).
const SLOW_TX_INTERVAL: Duration = Duration::from_secs(1);

struct RecvItem {
    packet: Packet,
    wire: Vec<u8>,
}

// A caller-requested Poll Sequence (§8 scenario S3): new timer parameters
// to commit once the peer echoes them back with the Final bit set.
struct PollRequest {
    desired_min_tx: Option<Duration>,
    required_min_rx: Option<Duration>,
}

// Atomically published fields, safe to read from any thread without
// coordinating with the session's task.
struct Shared {
    state: AtomicU8,
    remote_state: AtomicU8,
    local_diag: AtomicU8,
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    state_transitions: AtomicU64,
    last_state_change_unix_nanos: AtomicI64,
    last_packet_recv_unix_nanos: AtomicI64,
}

impl Shared {
    fn new() -> Self {
        Shared {
            state: AtomicU8::new(State::Down as u8),
            remote_state: AtomicU8::new(State::Down as u8),
            local_diag: AtomicU8::new(Diag::Nothing as u8),
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            state_transitions: AtomicU64::new(0),
            last_state_change_unix_nanos: AtomicI64::new(0),
            last_packet_recv_unix_nanos: AtomicI64::new(0),
        }
    }

    fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Relaxed)).unwrap()
    }

    fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::Relaxed);
    }
}

// Mutable negotiated/poll-sequence state, owned exclusively by the task
// running inside `ControlSession::run`.
struct Negotiated {
    remote_discr: u32,
    local_diag: Diag,
    desired_min_tx: Duration,
    required_min_rx: Duration,
    remote_min_rx_interval: Duration,
    remote_desired_min_tx: Duration,
    remote_detect_mult: u8,
    remote_demand_mode: bool,
    poll_active: bool,
    pending_final: bool,
    pending_desired_min_tx: Option<Duration>,
    pending_required_min_rx: Option<Duration>,
}

impl Negotiated {
    fn new(desired_min_tx: Duration, required_min_rx: Duration) -> Self {
        Negotiated {
            remote_discr: 0,
            local_diag: Diag::Nothing,
            desired_min_tx,
            required_min_rx,
            // Invariant: initialized to 1 microsecond until a packet arrives.
            remote_min_rx_interval: Duration::from_micros(1),
            remote_desired_min_tx: Duration::ZERO,
            remote_detect_mult: 0,
            remote_demand_mode: false,
            poll_active: false,
            pending_final: false,
            pending_desired_min_tx: None,
            pending_required_min_rx: None,
        }
    }

    fn effective_desired_min_tx(&self, state: State) -> Duration {
        if state == State::Up {
            self.desired_min_tx
        } else {
            std::cmp::max(self.desired_min_tx, SLOW_TX_INTERVAL)
        }
    }

    fn negotiated_tx_interval(&self, state: State) -> Duration {
        std::cmp::max(
            self.effective_desired_min_tx(state),
            self.remote_min_rx_interval,
        )
    }

    fn detection_time(&self, detect_mult: u8, state: State) -> Duration {
        if self.remote_detect_mult == 0 {
            self.negotiated_tx_interval(state) * detect_mult as u32
        } else {
            std::cmp::max(self.required_min_rx, self.remote_desired_min_tx)
                * self.remote_detect_mult as u32
        }
    }
}

pub struct ControlSession {
    local_discr: u32,
    peer_addr: SocketAddr,
    role: SessionRole,
    detect_mult: u8,
    initial_desired_min_tx: Duration,
    initial_required_min_rx: Duration,
    shared: Arc<Shared>,
    sender: Arc<dyn PacketSender>,
    metrics: Arc<dyn MetricsReporter>,
    authenticator: Option<Arc<dyn Authenticator>>,
    auth_state: Mutex<Option<Box<dyn AuthState>>>,
    auth_section_template: Option<AuthSection>,
    notify_tx: Option<mpsc::Sender<StateChange>>,
    recv_tx: mpsc::Sender<RecvItem>,
    recv_rx: Mutex<Option<mpsc::Receiver<RecvItem>>>,
    admin_down: AtomicBool,
    admin_down_notify: Notify,
    poll_request: std::sync::Mutex<Option<PollRequest>>,
    poll_notify: Notify,
}

impl ControlSession {
    pub fn new(
        config: SessionConfig,
        local_discr: u32,
        sender: Arc<dyn PacketSender>,
        metrics: Arc<dyn MetricsReporter>,
        authenticator: Option<(Arc<dyn Authenticator>, Box<dyn AuthState>)>,
        notify_tx: Option<mpsc::Sender<StateChange>>,
    ) -> Result<Self, ConfigError> {
        if local_discr == 0 {
            return Err(ConfigError::InvalidDiscriminator);
        }
        config.validate()?;

        let (recv_tx, recv_rx) = mpsc::channel(RECV_QUEUE_CAPACITY);
        let (authenticator, auth_state) = match authenticator {
            Some((a, s)) => (Some(a), Some(s)),
            None => (None, None),
        };
        let auth_section_template = config
            .auth
            .map(|auth| AuthSection::placeholder(auth.auth_type, auth.key_id));

        Debug::SessionCreate(local_discr, &config.peer_addr).log();

        Ok(ControlSession {
            local_discr,
            peer_addr: config.peer_addr,
            role: config.role,
            detect_mult: config.detect_mult,
            initial_desired_min_tx: config.desired_min_tx,
            initial_required_min_rx: config.required_min_rx,
            shared: Arc::new(Shared::new()),
            sender,
            metrics,
            authenticator,
            auth_state: Mutex::new(auth_state),
            auth_section_template,
            notify_tx,
            recv_tx,
            recv_rx: Mutex::new(Some(recv_rx)),
            admin_down: AtomicBool::new(false),
            admin_down_notify: Notify::new(),
            poll_request: std::sync::Mutex::new(None),
            poll_notify: Notify::new(),
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

    pub fn remote_state(&self) -> State {
        State::from_u8(self.shared.remote_state.load(Ordering::Relaxed)).unwrap()
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

    // Nanoseconds since the Unix epoch, or `None` if the session never
    // changed state.
    pub fn last_state_change(&self) -> Option<i64> {
        match self.shared.last_state_change_unix_nanos.load(Ordering::Relaxed) {
            0 => None,
            nanos => Some(nanos),
        }
    }

    pub fn last_packet_received(&self) -> Option<i64> {
        match self.shared.last_packet_recv_unix_nanos.load(Ordering::Relaxed) {
            0 => None,
            nanos => Some(nanos),
        }
    }

    // ===== inbound operations =====

    // Non-blocking enqueue; overflow drops with a debug log (§4.D
    // `RecvPacket`). `wire` is the packet's original bytes, needed by the
    // authenticator to verify a digest computed over the whole datagram.
    pub fn recv_packet(&self, packet: Packet, wire: Vec<u8>) {
        if self.recv_tx.try_send(RecvItem { packet, wire }).is_err() {
            Debug::RecvQueueFull(self.local_discr).log();
        }
    }

    // Atomically requests AdminDown; the running task picks this up and
    // rebuilds/transmits on its next tick.
    pub fn set_admin_down(&self) {
        self.admin_down.store(true, Ordering::Relaxed);
        self.admin_down_notify.notify_one();
    }

    // Starts a Poll Sequence to commit new timer parameters (§4.D, §8
    // scenario S3). `None` leaves the corresponding parameter unchanged.
    // The next transmitted packet carries the Poll bit; the new values take
    // effect once the peer replies with Final set.
    pub fn start_poll_sequence(
        &self,
        desired_min_tx: Option<Duration>,
        required_min_rx: Option<Duration>,
    ) {
        *self.poll_request.lock().unwrap() = Some(PollRequest {
            desired_min_tx,
            required_min_rx,
        });
        self.poll_notify.notify_one();
    }

    // ===== run loop =====

    pub async fn run(&self, cancel: CancellationToken) {
        let mut recv_rx = self
            .recv_rx
            .lock()
            .await
            .take()
            .expect("ControlSession::run must only be called once");

        let mut local = Negotiated::new(self.initial_desired_min_tx, self.initial_required_min_rx);
        let mut buf = [0u8; MAX_PACKET_SIZE];

        let tx_timer = tokio::time::sleep(local.negotiated_tx_interval(State::Down));
        let detect_timer = tokio::time::sleep(local.detection_time(self.detect_mult, State::Down));
        tokio::pin!(tx_timer);
        tokio::pin!(detect_timer);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    break;
                }

                _ = self.admin_down_notify.notified() => {
                    if self.admin_down.swap(false, Ordering::Relaxed) {
                        let transition = fsm::apply_event(self.state(), Event::AdminDown);
                        self.execute_transition(&mut local, transition, &mut buf, tx_timer.as_mut(), &cancel).await;
                        detect_timer.as_mut().reset(Instant::now() + local.detection_time(self.detect_mult, self.state()));
                    }
                }

                _ = self.poll_notify.notified() => {
                    let req = self.poll_request.lock().unwrap().take();
                    if let Some(req) = req {
                        local.pending_desired_min_tx = req.desired_min_tx;
                        local.pending_required_min_rx = req.required_min_rx;
                        local.poll_active = true;
                    }
                }

                item = recv_rx.recv() => {
                    match item {
                        Some(item) => {
                            self.handle_recv(&mut local, item, &mut buf, tx_timer.as_mut(), detect_timer.as_mut(), &cancel).await;
                        }
                        None => break,
                    }
                }

                () = &mut tx_timer => {
                    self.handle_tx_fire(&mut local, &mut buf, tx_timer.as_mut(), &cancel).await;
                }

                () = &mut detect_timer => {
                    self.handle_detect_fire(&mut local, &mut buf, tx_timer.as_mut(), detect_timer.as_mut(), &cancel).await;
                }
            }
        }
    }

    // TX timer fired: reset with jitter; transmit unless Invariants 4/5 forbid it.
    async fn handle_tx_fire(
        &self,
        local: &mut Negotiated,
        buf: &mut [u8; MAX_PACKET_SIZE],
        mut tx_timer: std::pin::Pin<&mut tokio::time::Sleep>,
        cancel: &CancellationToken,
    ) {
        let state = self.state();
        let interval = local.negotiated_tx_interval(state);
        tx_timer
            .as_mut()
            .reset(Instant::now() + apply_jitter(interval, self.detect_mult));

        let passive_unresolved = self.role == SessionRole::Passive && local.remote_discr == 0;
        if passive_unresolved || local.remote_min_rx_interval.is_zero() {
            return;
        }

        self.transmit(local, buf, state, cancel).await;
    }

    // Detection timer fired: apply TimerExpired from Init/Up, otherwise just
    // rearm (Open Question (i): always reset regardless of state).
    async fn handle_detect_fire(
        &self,
        local: &mut Negotiated,
        buf: &mut [u8; MAX_PACKET_SIZE],
        tx_timer: std::pin::Pin<&mut tokio::time::Sleep>,
        mut detect_timer: std::pin::Pin<&mut tokio::time::Sleep>,
        cancel: &CancellationToken,
    ) {
        Debug::DetectionTimeExpiry(self.local_discr).log();

        let state = self.state();
        if matches!(state, State::Init | State::Up) {
            let transition = fsm::apply_event(state, Event::TimerExpired);
            self.execute_transition(local, transition, buf, tx_timer, cancel).await;
        }
        detect_timer
            .as_mut()
            .reset(Instant::now() + local.detection_time(self.detect_mult, self.state()));
    }

    // Runs acceptance steps 1-9 of §4.D's "Packet received" pipeline
    // against a freshly received packet.
    async fn handle_recv(
        &self,
        local: &mut Negotiated,
        item: RecvItem,
        buf: &mut [u8; MAX_PACKET_SIZE],
        mut tx_timer: std::pin::Pin<&mut tokio::time::Sleep>,
        mut detect_timer: std::pin::Pin<&mut tokio::time::Sleep>,
        cancel: &CancellationToken,
    ) {
        let packet = item.packet;

        // Step 1: auth-flag consistency.
        let auth_configured = self.auth_section_template.is_some();
        if packet.flags.contains(PacketFlags::A) != auth_configured {
            Debug::PacketDiscarded(self.local_discr, "auth flag mismatch").log();
            return;
        }

        self.shared.packets_received.fetch_add(1, Ordering::Relaxed);
        self.shared
            .last_packet_recv_unix_nanos
            .store(now_unix_nanos(), Ordering::Relaxed);
        self.metrics.inc_packets_received(self.peer_addr, self.local_discr);

        // Step 3: authentication.
        if let Some(authenticator) = &self.authenticator {
            let mut guard = self.auth_state.lock().await;
            let state = guard.as_deref_mut().expect("auth configured without state");
            if authenticator
                .verify(state, &packet, &item.wire, item.wire.len())
                .await
                .is_err()
            {
                drop(guard);
                SessionError::AuthVerifyFailed(self.peer_addr).log();
                return;
            }
        }

        // Step 4: adopt the remote's view of the session.
        local.remote_discr = packet.my_discr;
        local.remote_demand_mode = packet.flags.contains(PacketFlags::D);
        local.remote_min_rx_interval = interval::duration_from_microseconds(packet.req_min_rx);
        local.remote_desired_min_tx = interval::duration_from_microseconds(packet.desired_min_tx);
        local.remote_detect_mult = packet.detect_mult;
        self.shared
            .remote_state
            .store(packet.state as u8, Ordering::Relaxed);

        // Step 5: terminate an active Poll Sequence.
        if packet.flags.contains(PacketFlags::F) && local.poll_active {
            if let Some(pending) = local.pending_desired_min_tx.take() {
                local.desired_min_tx = pending;
            }
            if let Some(pending) = local.pending_required_min_rx.take() {
                local.required_min_rx = pending;
            }
            local.poll_active = false;
        }

        // Step 6: note an incoming Poll.
        if packet.flags.contains(PacketFlags::P) {
            local.pending_final = true;
        }

        // Step 7: reset the detection timer.
        detect_timer
            .as_mut()
            .reset(Instant::now() + local.detection_time(self.detect_mult, self.state()));

        // Step 8: drive the FSM.
        let event = fsm::recv_state_to_event(packet.state);
        let transition = fsm::apply_event(self.state(), event);
        self.execute_transition(local, transition, buf, tx_timer.as_mut(), cancel)
            .await;

        // Step 9: reply immediately if a Final is still owed. A FSM action
        // that already sent (SendControl) cleared `pending_final` as part
        // of that transmission, so this only fires when the FSM produced no
        // action of its own but the peer's Poll still needs acknowledging.
        if local.pending_final {
            let state = self.state();
            self.transmit(local, buf, state, cancel).await;
            tx_timer.as_mut().reset(
                Instant::now() + apply_jitter(local.negotiated_tx_interval(state), self.detect_mult),
            );
        }
    }

    async fn execute_transition(
        &self,
        local: &mut Negotiated,
        transition: Transition,
        buf: &mut [u8; MAX_PACKET_SIZE],
        mut tx_timer: std::pin::Pin<&mut tokio::time::Sleep>,
        cancel: &CancellationToken,
    ) {
        for action in &transition.actions {
            match action {
                Action::SendControl => {
                    self.transmit(local, buf, transition.new_state, cancel).await;
                    tx_timer.as_mut().reset(
                        Instant::now()
                            + apply_jitter(
                                local.negotiated_tx_interval(transition.new_state),
                                self.detect_mult,
                            ),
                    );
                }
                // NotifyUp always accompanies SendControl in the transition
                // table, which already reset the TX timer against the new
                // (Up) negotiated interval; nothing further to do here.
                Action::NotifyUp => {}
                // Unlike NotifyUp, NotifyDown never accompanies SendControl,
                // so the TX timer still needs an explicit reset against the
                // new (slow-rate) negotiated interval.
                Action::NotifyDown => {
                    local.remote_discr = 0;
                    tx_timer.as_mut().reset(
                        Instant::now()
                            + apply_jitter(
                                local.negotiated_tx_interval(transition.new_state),
                                self.detect_mult,
                            ),
                    );
                }
                Action::SetDiagTimeExpired => local.local_diag = Diag::ControlTimeExpired,
                Action::SetDiagNeighborDown => local.local_diag = Diag::NeighborDown,
                Action::SetDiagAdminDown => local.local_diag = Diag::AdminDown,
            }
        }

        if transition.changed {
            self.shared.set_state(transition.new_state);
            self.shared
                .local_diag
                .store(local.local_diag as u8, Ordering::Relaxed);
            self.shared.state_transitions.fetch_add(1, Ordering::Relaxed);
            self.shared
                .last_state_change_unix_nanos
                .store(now_unix_nanos(), Ordering::Relaxed);
            self.metrics.record_state_transition(
                self.peer_addr,
                self.local_discr,
                transition.old_state.as_str(),
                transition.new_state.as_str(),
            );
            Debug::FsmTransition(self.local_discr, transition.old_state, transition.new_state)
                .log();
            notify::notify(
                &self.notify_tx,
                StateChange {
                    local_discr: self.local_discr,
                    peer_addr: self.peer_addr,
                    old_state: transition.old_state,
                    new_state: transition.new_state,
                    diag: local.local_diag,
                    timestamp: Utc::now(),
                },
            );
        }
    }

    async fn transmit(
        &self,
        local: &mut Negotiated,
        buf: &mut [u8; MAX_PACKET_SIZE],
        state: State,
        cancel: &CancellationToken,
    ) {
        let packet = self.build_packet(local, state);
        let len = match packet.marshal(buf) {
            Ok(len) => len,
            Err(error) => {
                log_encode_error(&error);
                return;
            }
        };

        if let (Some(authenticator), Some(_)) = (&self.authenticator, &packet.auth) {
            let mut guard = self.auth_state.lock().await;
            let auth_state = guard.as_deref_mut().expect("auth configured without state");
            if authenticator
                .sign(auth_state, &packet, buf, len)
                .await
                .is_err()
            {
                return;
            }
        }

        match self.sender.send_packet(cancel, &buf[..len], self.peer_addr).await {
            Ok(()) => {
                self.shared.packets_sent.fetch_add(1, Ordering::Relaxed);
                self.metrics.inc_packets_sent(self.peer_addr, self.local_discr);
            }
            Err(error) => {
                SessionError::SendFailed(self.peer_addr, Box::new(error)).log();
            }
        }

        local.pending_final = false;
    }

    fn build_packet(&self, local: &Negotiated, state: State) -> Packet {
        Packet {
            version: Packet::VERSION,
            diag: local.local_diag,
            state,
            flags: {
                let mut flags = PacketFlags::empty();
                flags.set(PacketFlags::P, local.poll_active);
                flags.set(PacketFlags::F, local.pending_final);
                flags.set(PacketFlags::A, self.auth_section_template.is_some());
                flags
            },
            detect_mult: self.detect_mult,
            my_discr: self.local_discr,
            your_discr: local.remote_discr,
            desired_min_tx: interval::microseconds_from_duration(
                local.effective_desired_min_tx(state),
            ),
            req_min_rx: interval::microseconds_from_duration(local.required_min_rx),
            req_min_echo_rx: 0,
            auth: self.auth_section_template.clone(),
        }
    }
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        Debug::SessionDelete(self.local_discr, &self.peer_addr).log();
    }
}

fn now_unix_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(0)
}
