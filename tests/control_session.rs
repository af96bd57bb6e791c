//
// Copyright (c) The BFD Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bfd::auth::{AuthError, AuthState, Authenticator};
use bfd::config::{AuthConfig, SessionConfig};
use bfd::metrics::NoopMetrics;
use bfd::packet::{AuthSection, AuthType, Diag, Packet, PacketFlags};
use bfd::sender::PacketSender;
use bfd::types::{SessionRole, SessionType, State};
use bfd::ControlSession;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct ChannelSender {
    tx: mpsc::UnboundedSender<(SocketAddr, Vec<u8>)>,
}

#[async_trait]
impl PacketSender for ChannelSender {
    async fn send_packet(
        &self,
        _cancel: &CancellationToken,
        bytes: &[u8],
        dest_addr: SocketAddr,
    ) -> std::io::Result<()> {
        let _ = self.tx.send((dest_addr, bytes.to_vec()));
        Ok(())
    }
}

fn test_config(peer_addr: SocketAddr) -> SessionConfig {
    SessionConfig {
        peer_addr,
        local_addr: None,
        interface: None,
        session_type: SessionType::SingleHop,
        role: SessionRole::Active,
        detect_mult: 3,
        desired_min_tx: Duration::from_millis(50),
        required_min_rx: Duration::from_millis(50),
        auth: None,
    }
}

fn peer_packet(state: State, my_discr: u32, your_discr: u32) -> Packet {
    Packet {
        version: Packet::VERSION,
        diag: Diag::Nothing,
        state,
        flags: PacketFlags::empty(),
        detect_mult: 3,
        my_discr,
        your_discr,
        desired_min_tx: 50_000,
        req_min_rx: 50_000,
        req_min_echo_rx: 0,
        auth: None,
    }
}

#[tokio::test(start_paused = true)]
async fn three_way_handshake_brings_session_up() {
    let peer_addr: SocketAddr = "127.0.0.1:3784".parse().unwrap();
    let (send_tx, mut send_rx) = mpsc::unbounded_channel();
    let (notify_tx, mut notify_rx) = bfd::notify::channel(16);

    let session = Arc::new(
        ControlSession::new(
            test_config(peer_addr),
            1,
            Arc::new(ChannelSender { tx: send_tx }),
            Arc::new(NoopMetrics),
            None,
            Some(notify_tx),
        )
        .unwrap(),
    );

    let cancel = CancellationToken::new();
    let run_handle = tokio::spawn({
        let session = Arc::clone(&session);
        let cancel = cancel.clone();
        async move { session.run(cancel).await }
    });

    assert_eq!(session.state(), State::Down);

    // First periodic transmit, while Down, at the 1s slow rate floor.
    tokio::time::advance(Duration::from_secs(1)).await;
    let (_, _bytes) = send_rx.recv().await.unwrap();

    // Peer replies Down: Down/RecvDown -> Init.
    session.recv_packet(peer_packet(State::Down, 42, 1), vec![]);
    let (_, _bytes) = send_rx.recv().await.unwrap();
    assert_eq!(session.state(), State::Init);

    let change = notify_rx.recv().await.unwrap();
    assert_eq!(change.old_state, State::Down);
    assert_eq!(change.new_state, State::Init);

    // Peer replies Init: Init/RecvInit -> Up.
    session.recv_packet(peer_packet(State::Init, 42, 1), vec![]);
    let (_, _bytes) = send_rx.recv().await.unwrap();
    assert_eq!(session.state(), State::Up);
    assert_eq!(session.remote_state(), State::Init);

    let change = notify_rx.recv().await.unwrap();
    assert_eq!(change.old_state, State::Init);
    assert_eq!(change.new_state, State::Up);

    cancel.cancel();
    run_handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn detection_timeout_drops_an_up_session() {
    let peer_addr: SocketAddr = "127.0.0.1:3784".parse().unwrap();
    let (send_tx, mut send_rx) = mpsc::unbounded_channel();
    let (notify_tx, mut notify_rx) = bfd::notify::channel(16);

    let session = Arc::new(
        ControlSession::new(
            test_config(peer_addr),
            1,
            Arc::new(ChannelSender { tx: send_tx }),
            Arc::new(NoopMetrics),
            None,
            Some(notify_tx),
        )
        .unwrap(),
    );

    let cancel = CancellationToken::new();
    let run_handle = tokio::spawn({
        let session = Arc::clone(&session);
        let cancel = cancel.clone();
        async move { session.run(cancel).await }
    });

    tokio::time::advance(Duration::from_secs(1)).await;
    send_rx.recv().await.unwrap();
    session.recv_packet(peer_packet(State::Down, 42, 1), vec![]);
    send_rx.recv().await.unwrap();
    session.recv_packet(peer_packet(State::Up, 42, 1), vec![]);
    send_rx.recv().await.unwrap();
    assert_eq!(session.state(), State::Up);
    while notify_rx.try_recv().is_ok() {}

    // Negotiated detection time is now max(requiredMinRx, remoteDesiredMinTx)
    // * remoteDetectMult = 50ms * 3 = 150ms; no further packets arrive.
    tokio::time::advance(Duration::from_millis(200)).await;

    let change = notify_rx.recv().await.unwrap();
    assert_eq!(change.old_state, State::Up);
    assert_eq!(change.new_state, State::Down);
    assert_eq!(session.state(), State::Down);
    assert_eq!(session.local_diag(), Diag::ControlTimeExpired);

    cancel.cancel();
    run_handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn set_admin_down_forces_the_session_down() {
    let peer_addr: SocketAddr = "127.0.0.1:3784".parse().unwrap();
    let (send_tx, mut send_rx) = mpsc::unbounded_channel();

    let session = Arc::new(
        ControlSession::new(
            test_config(peer_addr),
            1,
            Arc::new(ChannelSender { tx: send_tx }),
            Arc::new(NoopMetrics),
            None,
            None,
        )
        .unwrap(),
    );

    let cancel = CancellationToken::new();
    let run_handle = tokio::spawn({
        let session = Arc::clone(&session);
        let cancel = cancel.clone();
        async move { session.run(cancel).await }
    });

    tokio::time::advance(Duration::from_secs(1)).await;
    send_rx.recv().await.unwrap();

    session.set_admin_down();

    // AdminDown carries no immediate SendControl action; the new state rides
    // out on the next regularly scheduled transmission.
    tokio::time::advance(Duration::from_secs(1)).await;
    send_rx.recv().await.unwrap();
    assert_eq!(session.state(), State::AdminDown);
    assert_eq!(session.local_diag(), Diag::AdminDown);

    cancel.cancel();
    run_handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn poll_sequence_commits_new_tx_interval_on_final() {
    let peer_addr: SocketAddr = "127.0.0.1:3784".parse().unwrap();
    let (send_tx, mut send_rx) = mpsc::unbounded_channel();

    let session = Arc::new(
        ControlSession::new(
            test_config(peer_addr),
            1,
            Arc::new(ChannelSender { tx: send_tx }),
            Arc::new(NoopMetrics),
            None,
            None,
        )
        .unwrap(),
    );

    let cancel = CancellationToken::new();
    let run_handle = tokio::spawn({
        let session = Arc::clone(&session);
        let cancel = cancel.clone();
        async move { session.run(cancel).await }
    });

    // Bring the session to Up via the standard three-way handshake.
    tokio::time::advance(Duration::from_secs(1)).await;
    send_rx.recv().await.unwrap();
    session.recv_packet(peer_packet(State::Down, 42, 1), vec![]);
    send_rx.recv().await.unwrap();
    session.recv_packet(peer_packet(State::Init, 42, 1), vec![]);
    send_rx.recv().await.unwrap();
    assert_eq!(session.state(), State::Up);
    while send_rx.try_recv().is_ok() {}

    let new_tx = Duration::from_millis(100);
    session.start_poll_sequence(Some(new_tx), None);

    // Negotiated Up interval is max(50ms, 50ms) = 50ms; advance past it so
    // the periodic TX timer fires carrying the Poll bit with the old value.
    tokio::time::advance(Duration::from_millis(60)).await;
    let (_, bytes) = send_rx.recv().await.unwrap();
    let sent = Packet::unmarshal(&bytes).unwrap();
    assert!(sent.flags.contains(PacketFlags::P));
    assert_eq!(sent.desired_min_tx, 50_000);

    // Peer acknowledges with Final: the pending interval commits and the
    // Poll Sequence ends.
    let mut reply = peer_packet(State::Up, 42, 1);
    reply.flags = PacketFlags::F;
    session.recv_packet(reply, vec![]);
    tokio::task::yield_now().await;
    while send_rx.try_recv().is_ok() {}

    tokio::time::advance(Duration::from_millis(120)).await;
    let (_, bytes) = send_rx.recv().await.unwrap();
    let sent = Packet::unmarshal(&bytes).unwrap();
    assert_eq!(sent.desired_min_tx, 100_000);
    assert!(!sent.flags.contains(PacketFlags::P));

    cancel.cancel();
    run_handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn passive_session_waits_for_first_packet_before_transmitting() {
    let peer_addr: SocketAddr = "127.0.0.1:3784".parse().unwrap();
    let (send_tx, mut send_rx) = mpsc::unbounded_channel();

    let mut cfg = test_config(peer_addr);
    cfg.role = SessionRole::Passive;

    let session = Arc::new(
        ControlSession::new(
            cfg,
            1,
            Arc::new(ChannelSender { tx: send_tx }),
            Arc::new(NoopMetrics),
            None,
            None,
        )
        .unwrap(),
    );

    let cancel = CancellationToken::new();
    let run_handle = tokio::spawn({
        let session = Arc::clone(&session);
        let cancel = cancel.clone();
        async move { session.run(cancel).await }
    });

    // Passive and the peer's discriminator is still unknown: no periodic
    // transmission (Invariant 4), for any elapsed time.
    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(send_rx.try_recv().is_err());
    assert_eq!(session.packets_sent(), 0);

    // The peer's first packet carries its discriminator; the FSM's
    // Down/RecvDown -> Init transition replies with SendControl immediately,
    // ahead of the next regularly scheduled tick.
    session.recv_packet(peer_packet(State::Down, 7, 0), vec![]);
    let (_, bytes) = send_rx.recv().await.unwrap();
    let sent = Packet::unmarshal(&bytes).unwrap();
    assert_eq!(sent.your_discr, 7);
    assert_eq!(session.state(), State::Init);

    cancel.cancel();
    run_handle.await.unwrap();
}

#[derive(Debug)]
struct FakeAuthState;

impl AuthState for FakeAuthState {}

struct FakeAuthenticator {
    sign_calls: Arc<AtomicUsize>,
    verify_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn sign(
        &self,
        _state: &mut dyn AuthState,
        _packet: &Packet,
        _buffer: &mut [u8],
        _length: usize,
    ) -> Result<(), AuthError> {
        self.sign_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn verify(
        &self,
        _state: &mut dyn AuthState,
        _packet: &Packet,
        _wire: &[u8],
        _length: usize,
    ) -> Result<(), AuthError> {
        self.verify_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn authenticated_session_signs_outbound_and_verifies_inbound() {
    let peer_addr: SocketAddr = "127.0.0.1:3784".parse().unwrap();
    let (send_tx, mut send_rx) = mpsc::unbounded_channel();

    let sign_calls = Arc::new(AtomicUsize::new(0));
    let verify_calls = Arc::new(AtomicUsize::new(0));
    let authenticator: Arc<dyn Authenticator> = Arc::new(FakeAuthenticator {
        sign_calls: Arc::clone(&sign_calls),
        verify_calls: Arc::clone(&verify_calls),
    });

    let mut cfg = test_config(peer_addr);
    cfg.auth = Some(AuthConfig {
        auth_type: AuthType::KeyedMd5,
        key_id: 9,
    });

    let session = Arc::new(
        ControlSession::new(
            cfg,
            1,
            Arc::new(ChannelSender { tx: send_tx }),
            Arc::new(NoopMetrics),
            Some((authenticator, Box::new(FakeAuthState))),
            None,
        )
        .unwrap(),
    );

    let cancel = CancellationToken::new();
    let run_handle = tokio::spawn({
        let session = Arc::clone(&session);
        let cancel = cancel.clone();
        async move { session.run(cancel).await }
    });

    tokio::time::advance(Duration::from_secs(1)).await;
    let (_, bytes) = send_rx.recv().await.unwrap();
    assert_eq!(sign_calls.load(Ordering::Relaxed), 1);
    let sent = Packet::unmarshal(&bytes).unwrap();
    assert!(sent.flags.contains(PacketFlags::A));
    assert!(sent.auth.is_some());

    let mut reply = peer_packet(State::Down, 42, 1);
    reply.flags = PacketFlags::A;
    reply.auth = Some(AuthSection::placeholder(AuthType::KeyedMd5, 9));
    let mut wire_buf = [0u8; 76];
    let wire_len = reply.marshal(&mut wire_buf).unwrap();

    session.recv_packet(reply, wire_buf[..wire_len].to_vec());
    send_rx.recv().await.unwrap();

    assert_eq!(verify_calls.load(Ordering::Relaxed), 1);
    assert_eq!(session.packets_received(), 1);
    assert_eq!(session.state(), State::Init);

    cancel.cancel();
    run_handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unauthenticated_packet_is_discarded_before_verification() {
    let peer_addr: SocketAddr = "127.0.0.1:3784".parse().unwrap();
    let (send_tx, mut send_rx) = mpsc::unbounded_channel();

    let sign_calls = Arc::new(AtomicUsize::new(0));
    let verify_calls = Arc::new(AtomicUsize::new(0));
    let authenticator: Arc<dyn Authenticator> = Arc::new(FakeAuthenticator {
        sign_calls: Arc::clone(&sign_calls),
        verify_calls: Arc::clone(&verify_calls),
    });

    let mut cfg = test_config(peer_addr);
    cfg.auth = Some(AuthConfig {
        auth_type: AuthType::KeyedMd5,
        key_id: 9,
    });

    let session = Arc::new(
        ControlSession::new(
            cfg,
            1,
            Arc::new(ChannelSender { tx: send_tx }),
            Arc::new(NoopMetrics),
            Some((authenticator, Box::new(FakeAuthState))),
            None,
        )
        .unwrap(),
    );

    let cancel = CancellationToken::new();
    let run_handle = tokio::spawn({
        let session = Arc::clone(&session);
        let cancel = cancel.clone();
        async move { session.run(cancel).await }
    });

    tokio::time::advance(Duration::from_secs(1)).await;
    send_rx.recv().await.unwrap();

    // Peer packet carries no auth section even though this session requires
    // one (Invariant 9): discarded before the authenticator is ever consulted.
    session.recv_packet(peer_packet(State::Down, 42, 1), vec![]);
    tokio::task::yield_now().await;

    assert_eq!(verify_calls.load(Ordering::Relaxed), 0);
    assert_eq!(session.packets_received(), 0);
    assert_eq!(session.state(), State::Down);

    cancel.cancel();
    run_handle.await.unwrap();
}
