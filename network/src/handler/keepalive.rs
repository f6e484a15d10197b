//! Ping/pong liveness checks.
//!
//! Every peer that stays silent for `ping_interval` is pinged; a peer that
//! does not answer within `pong_timeout` is disconnected. Any inbound
//! message counts as a sign of life.

use std::collections::BTreeMap;
use std::time::Duration;

use chainwire_messages::Message;
use chainwire_types::PeerAddress;

use super::{mismatch, Handler, HandlerAction, HandlerState, Transition};
use crate::error::HandlerError;
use crate::event::{ConnectionState, NetworkEvent};

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);
pub const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeepaliveConfig {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_timeout: DEFAULT_PONG_TIMEOUT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingPing {
    pub nonce: u64,
    pub sent_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Liveness {
    pub last_seen_secs: u64,
    pub pending: Option<PendingPing>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeepaliveState {
    pub now_secs: u64,
    pub next_nonce: u64,
    pub peers: BTreeMap<PeerAddress, Liveness>,
}

pub struct KeepaliveHandler {
    config: KeepaliveConfig,
}

impl KeepaliveHandler {
    pub const NAME: &'static str = "keepalive";

    pub fn new(config: KeepaliveConfig) -> Self {
        Self { config }
    }

    fn on_tick(&self, next: &mut KeepaliveState, now: u64, actions: &mut Vec<HandlerAction>) {
        next.now_secs = now;
        let interval = self.config.ping_interval.as_secs();
        let timeout = self.config.pong_timeout.as_secs();
        let mut nonce = next.next_nonce;

        for (peer, live) in next.peers.iter_mut() {
            match live.pending {
                Some(ping) if now.saturating_sub(ping.sent_secs) >= timeout => {
                    live.pending = None;
                    actions.push(HandlerAction::Disconnect {
                        peer: peer.clone(),
                        reason: "ping timeout".into(),
                    });
                }
                None if now.saturating_sub(live.last_seen_secs) >= interval => {
                    live.pending = Some(PendingPing { nonce, sent_secs: now });
                    actions.push(HandlerAction::Send {
                        peer: peer.clone(),
                        message: Message::Ping { nonce },
                    });
                    nonce = nonce.wrapping_add(1);
                }
                _ => {}
            }
        }
        next.next_nonce = nonce;
    }
}

impl Handler for KeepaliveHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn initial_state(&self) -> HandlerState {
        HandlerState::Keepalive(KeepaliveState {
            now_secs: 0,
            next_nonce: rand::random(),
            peers: BTreeMap::new(),
        })
    }

    fn on_event(
        &self,
        state: &HandlerState,
        event: &NetworkEvent,
    ) -> Result<Transition, HandlerError> {
        let HandlerState::Keepalive(current) = state else {
            return Err(mismatch(Self::NAME));
        };
        let mut next = current.clone();
        let mut actions = Vec::new();
        let now = next.now_secs;

        match event {
            NetworkEvent::Tick { now_secs } => self.on_tick(&mut next, *now_secs, &mut actions),
            NetworkEvent::ConnectionStateChanged { peer, state, .. } => match state {
                ConnectionState::Connected => {
                    next.peers.insert(
                        peer.clone(),
                        Liveness {
                            last_seen_secs: now,
                            pending: None,
                        },
                    );
                }
                ConnectionState::Disconnected { .. } => {
                    next.peers.remove(peer);
                }
                _ => {}
            },
            NetworkEvent::MessageReceived { peer, message } => {
                if let Message::Ping { nonce } = **message {
                    actions.push(HandlerAction::Send {
                        peer: peer.clone(),
                        message: Message::Pong { nonce },
                    });
                }
                if let Some(live) = next.peers.get_mut(peer) {
                    live.last_seen_secs = now;
                    if let (Message::Pong { nonce }, Some(ping)) = (&**message, live.pending) {
                        if *nonce == ping.nonce {
                            live.pending = None;
                        }
                    }
                }
            }
            _ => {}
        }

        if next == *current {
            return Ok(Transition::none().with_actions(actions));
        }
        Ok(Transition::to(HandlerState::Keepalive(next)).with_actions(actions))
    }
}
