//
// Copyright (c) The BFD Contributors
//
// SPDX-License-Identifier: MIT
//

//! The Control session finite state machine (RFC 5880, Section 6.2), pure
//! and side-effect-free: `apply_event` consumes a state and an event and
//! returns the next state plus a fixed list of actions for the caller to
//! execute. It touches no session fields itself.

use crate::types::State;

// FSM input alphabet. `RecvDown`/`RecvInit`/`RecvUp`/`RecvAdminDown` are
// derived from a received packet's State field via
// [`recv_state_to_event`]; `TimerExpired`, `AdminDown` and `AdminUp` are
// raised by the session loop itself.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Event {
    RecvAdminDown,
    RecvDown,
    RecvInit,
    RecvUp,
    TimerExpired,
    AdminDown,
    AdminUp,
}

// FSM output alphabet. Actions are symbols only; the caller (`ControlSession`)
// is responsible for executing them, including any localDiag mutation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    SendControl,
    NotifyUp,
    NotifyDown,
    SetDiagTimeExpired,
    SetDiagNeighborDown,
    SetDiagAdminDown,
}

// Result of applying an event to a state. `changed` is always
// `old_state != new_state`, never computed independently.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transition {
    pub old_state: State,
    pub new_state: State,
    pub actions: Vec<Action>,
    pub changed: bool,
}

// Maps a received packet's State field to the FSM event it raises. Any
// value outside the four defined states (which cannot occur once the
// packet has passed codec validation) is treated as Down.
pub fn recv_state_to_event(remote: State) -> Event {
    match remote {
        State::AdminDown => Event::RecvAdminDown,
        State::Down => Event::RecvDown,
        State::Init => Event::RecvInit,
        State::Up => Event::RecvUp,
    }
}

// Applies `event` to `state` per the fixed transition table. Pairs absent
// from the table are ignored: the state is unchanged and no actions are
// produced.
pub fn apply_event(state: State, event: Event) -> Transition {
    use Action::*;
    use Event::*;
    use State::*;

    let (new_state, actions): (State, &[Action]) = match (state, event) {
        (AdminDown, AdminUp) => (Down, &[]),

        (Down, RecvDown) => (Init, &[SendControl]),
        (Down, RecvInit) => (Up, &[SendControl, NotifyUp]),
        (Down, Event::AdminDown) => (AdminDown, &[SetDiagAdminDown]),

        (Init, RecvAdminDown) => (Down, &[SetDiagNeighborDown, NotifyDown]),
        (Init, RecvDown) => (Init, &[]),
        (Init, RecvInit) => (Up, &[SendControl, NotifyUp]),
        (Init, RecvUp) => (Up, &[SendControl, NotifyUp]),
        (Init, TimerExpired) => (Down, &[SetDiagTimeExpired, NotifyDown]),
        (Init, Event::AdminDown) => (AdminDown, &[SetDiagAdminDown]),

        (Up, RecvAdminDown) => (Down, &[SetDiagNeighborDown, NotifyDown]),
        (Up, RecvDown) => (Down, &[SetDiagNeighborDown, NotifyDown]),
        (Up, RecvInit) => (Up, &[]),
        (Up, RecvUp) => (Up, &[]),
        (Up, TimerExpired) => (Down, &[SetDiagTimeExpired, NotifyDown]),
        (Up, Event::AdminDown) => (AdminDown, &[SetDiagAdminDown]),

        _ => (state, &[]),
    };

    Transition {
        old_state: state,
        new_state,
        changed: state != new_state,
        actions: actions.to_vec(),
    }
}
