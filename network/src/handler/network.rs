//! Connection bookkeeping: who is connected, who is being opened or closed,
//! and whether the node should keep dialing out.

use std::collections::BTreeSet;
use std::sync::Arc;

use chainwire_types::PeerAddress;

use super::{mismatch, BasicConfig, Handler, HandlerAction, HandlerState, Transition};
use crate::error::HandlerError;
use crate::event::{ConnectionDirection, ConnectionState, NetworkEvent};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkHandlerState {
    pub active: BTreeSet<PeerAddress>,
    pub inbound: BTreeSet<PeerAddress>,
    pub pending_open: BTreeSet<PeerAddress>,
    pub pending_close: BTreeSet<PeerAddress>,
    pub server_mode: bool,
    pub keep_connecting: bool,
}

impl NetworkHandlerState {
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn inbound_count(&self) -> usize {
        self.inbound.len()
    }

    pub fn pending_open_count(&self) -> usize {
        self.pending_open.len()
    }

    pub fn pending_close_count(&self) -> usize {
        self.pending_close.len()
    }
}

pub struct NetworkHandler {
    config: Arc<BasicConfig>,
}

impl NetworkHandler {
    pub const NAME: &'static str = "network";

    pub fn new(config: Arc<BasicConfig>) -> Self {
        Self { config }
    }

    fn on_connection(
        &self,
        mut next: NetworkHandlerState,
        peer: &PeerAddress,
        direction: ConnectionDirection,
        state: &ConnectionState,
    ) -> (NetworkHandlerState, Vec<HandlerAction>) {
        let mut actions = Vec::new();
        match state {
            ConnectionState::Connecting => {
                next.pending_open.insert(peer.clone());
            }
            ConnectionState::Connected => {
                next.pending_open.remove(peer);
                next.active.insert(peer.clone());
                if direction == ConnectionDirection::Inbound {
                    next.inbound.insert(peer.clone());
                }
                let refused = match direction {
                    ConnectionDirection::Inbound if !next.server_mode => {
                        Some("not accepting inbound peers")
                    }
                    _ if next.active.len() > self.config.max_peers => Some("too many peers"),
                    _ => None,
                };
                if let Some(reason) = refused {
                    actions.push(HandlerAction::Disconnect {
                        peer: peer.clone(),
                        reason: reason.to_string(),
                    });
                }
            }
            ConnectionState::ConnectFailed { .. } => {
                next.pending_open.remove(peer);
            }
            ConnectionState::Disconnecting { .. } => {
                if next.active.contains(peer) {
                    next.pending_close.insert(peer.clone());
                }
            }
            ConnectionState::Disconnected { .. } => {
                next.active.remove(peer);
                next.inbound.remove(peer);
                next.pending_open.remove(peer);
                next.pending_close.remove(peer);
            }
        }
        (next, actions)
    }
}

impl Handler for NetworkHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn initial_state(&self) -> HandlerState {
        HandlerState::Network(NetworkHandlerState {
            server_mode: self.config.server_mode,
            ..Default::default()
        })
    }

    fn on_event(
        &self,
        state: &HandlerState,
        event: &NetworkEvent,
    ) -> Result<Transition, HandlerError> {
        let HandlerState::Network(current) = state else {
            return Err(mismatch(Self::NAME));
        };
        let (next, actions) = match event {
            NetworkEvent::ConnectionStateChanged {
                peer,
                direction,
                state,
            } => self.on_connection(current.clone(), peer, *direction, state),
            NetworkEvent::StartConnecting if !current.keep_connecting => (
                NetworkHandlerState {
                    keep_connecting: true,
                    ..current.clone()
                },
                Vec::new(),
            ),
            NetworkEvent::StopConnecting if current.keep_connecting => (
                NetworkHandlerState {
                    keep_connecting: false,
                    ..current.clone()
                },
                Vec::new(),
            ),
            _ => return Ok(Transition::none()),
        };
        if next == *current {
            return Ok(Transition::none().with_actions(actions));
        }
        Ok(Transition::to(HandlerState::Network(next)).with_actions(actions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(server_mode: bool, max_peers: usize) -> NetworkHandler {
        NetworkHandler::new(Arc::new(BasicConfig {
            server_mode,
            max_peers,
            min_peers: 0,
            ..Default::default()
        }))
    }

    fn conn(port: u16, direction: ConnectionDirection, state: ConnectionState) -> NetworkEvent {
        NetworkEvent::ConnectionStateChanged {
            peer: PeerAddress::new("10.1.1.1", port),
            direction,
            state,
        }
    }

    fn step(
        h: &NetworkHandler,
        state: HandlerState,
        event: NetworkEvent,
    ) -> (HandlerState, Transition) {
        let t = h.on_event(&state, &event).unwrap();
        (t.state.clone().unwrap_or(state), t)
    }

    fn network(state: &HandlerState) -> &NetworkHandlerState {
        match state {
            HandlerState::Network(s) => s,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn outbound_lifecycle_moves_through_counters() {
        let h = handler(false, 10);
        let out = ConnectionDirection::Outbound;
        let s = h.initial_state();

        let (s, _) = step(&h, s, conn(1, out, ConnectionState::Connecting));
        assert_eq!(network(&s).pending_open_count(), 1);

        let (s, _) = step(&h, s, conn(1, out, ConnectionState::Connected));
        assert_eq!(network(&s).pending_open_count(), 0);
        assert_eq!(network(&s).active_count(), 1);

        let closing = ConnectionState::Disconnecting { reason: "bye".into() };
        let (s, _) = step(&h, s, conn(1, out, closing));
        assert_eq!(network(&s).pending_close_count(), 1);

        let closed = ConnectionState::Disconnected { reason: "bye".into() };
        let (s, _) = step(&h, s, conn(1, out, closed));
        assert_eq!(network(&s), &NetworkHandlerState::default());
    }

    #[test]
    fn connect_failure_clears_pending_open() {
        let h = handler(false, 10);
        let out = ConnectionDirection::Outbound;
        let (s, _) = step(&h, h.initial_state(), conn(2, out, ConnectionState::Connecting));
        let failed = ConnectionState::ConnectFailed { reason: "refused".into() };
        let (s, _) = step(&h, s, conn(2, out, failed));
        assert_eq!(network(&s).pending_open_count(), 0);
    }

    #[test]
    fn inbound_refused_outside_server_mode() {
        let h = handler(false, 10);
        let inbound = conn(3, ConnectionDirection::Inbound, ConnectionState::Connected);
        let (_, t) = step(&h, h.initial_state(), inbound);
        assert!(matches!(t.actions.as_slice(), [HandlerAction::Disconnect { .. }]));
    }

    #[test]
    fn peers_beyond_max_are_disconnected() {
        let h = handler(true, 1);
        let inbound = ConnectionDirection::Inbound;
        let (s, t) = step(&h, h.initial_state(), conn(1, inbound, ConnectionState::Connected));
        assert!(t.actions.is_empty());
        let (_, t) = step(&h, s, conn(2, inbound, ConnectionState::Connected));
        assert!(matches!(t.actions.as_slice(), [HandlerAction::Disconnect { .. }]));
    }

    #[test]
    fn connecting_flag_toggles_once() {
        let h = handler(false, 10);
        let (s, t) = step(&h, h.initial_state(), NetworkEvent::StartConnecting);
        assert!(network(&s).keep_connecting);
        assert!(t.state.is_some());
        let (s, t) = step(&h, s, NetworkEvent::StartConnecting);
        assert!(t.state.is_none());
        let (s, _) = step(&h, s, NetworkEvent::StopConnecting);
        assert!(!network(&s).keep_connecting);
    }

    #[test]
    fn unrelated_events_leave_state_alone() {
        let h = handler(false, 10);
        let t = h.on_event(&h.initial_state(), &NetworkEvent::Tick { now_secs: 5 }).unwrap();
        assert!(t.state.is_none() && t.actions.is_empty());
    }
}
