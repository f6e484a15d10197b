//! Address gossip and outbound connection top-up.

use std::collections::BTreeSet;
use std::sync::Arc;

use chainwire_messages::Message;
use chainwire_types::PeerAddress;

use super::{mismatch, BasicConfig, Handler, HandlerAction, HandlerState, Transition};
use crate::error::HandlerError;
use crate::event::{ConnectionDirection, ConnectionState, NetworkEvent};

pub const DEFAULT_MAX_ADDRESSES: usize = 1000;
pub const DEFAULT_CONNECT_BATCH: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Seed addresses placed in the pool at start.
    pub initial_peers: Vec<PeerAddress>,
    /// Upper bound on the address pool and on one `addr` reply.
    pub max_addresses: usize,
    /// Connects issued per top-up round.
    pub connect_batch: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            initial_peers: Vec::new(),
            max_addresses: DEFAULT_MAX_ADDRESSES,
            connect_batch: DEFAULT_CONNECT_BATCH,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiscoveryState {
    pub pool: BTreeSet<PeerAddress>,
    pub connected: BTreeSet<PeerAddress>,
    pub pending: BTreeSet<PeerAddress>,
    pub banned_hosts: BTreeSet<String>,
    pub connecting: bool,
}

pub struct DiscoveryHandler {
    basic: Arc<BasicConfig>,
    config: DiscoveryConfig,
}

impl DiscoveryHandler {
    pub const NAME: &'static str = "discovery";

    pub fn new(basic: Arc<BasicConfig>, config: DiscoveryConfig) -> Self {
        Self { basic, config }
    }

    /// Dial pool addresses until `min_peers` are connected or pending.
    fn top_up(&self, next: &mut DiscoveryState, actions: &mut Vec<HandlerAction>) {
        if !next.connecting {
            return;
        }
        let have = next.connected.len() + next.pending.len();
        let want = self
            .basic
            .min_peers
            .saturating_sub(have)
            .min(self.config.connect_batch);
        let picks: Vec<PeerAddress> = next
            .pool
            .iter()
            .filter(|a| !next.connected.contains(*a) && !next.pending.contains(*a))
            .filter(|a| !next.banned_hosts.contains(a.host()))
            .take(want)
            .cloned()
            .collect();
        for addr in picks {
            next.pending.insert(addr.clone());
            actions.push(HandlerAction::Connect(addr));
        }
    }

    fn learn(&self, next: &mut DiscoveryState, addrs: &[PeerAddress]) {
        for addr in addrs {
            if next.pool.len() >= self.config.max_addresses {
                break;
            }
            if addr.port == 0 || next.banned_hosts.contains(addr.host()) {
                continue;
            }
            next.pool.insert(addr.clone());
        }
    }
}

impl Handler for DiscoveryHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn initial_state(&self) -> HandlerState {
        HandlerState::Discovery(DiscoveryState {
            pool: self
                .config
                .initial_peers
                .iter()
                .take(self.config.max_addresses)
                .cloned()
                .collect(),
            ..Default::default()
        })
    }

    fn on_event(
        &self,
        state: &HandlerState,
        event: &NetworkEvent,
    ) -> Result<Transition, HandlerError> {
        let HandlerState::Discovery(current) = state else {
            return Err(mismatch(Self::NAME));
        };
        let mut next = current.clone();
        let mut actions = Vec::new();

        match event {
            NetworkEvent::StartConnecting => {
                next.connecting = true;
                self.top_up(&mut next, &mut actions);
            }
            NetworkEvent::StopConnecting => next.connecting = false,
            NetworkEvent::Tick { .. } => self.top_up(&mut next, &mut actions),
            NetworkEvent::ConnectionStateChanged {
                peer,
                direction,
                state,
            } => match state {
                ConnectionState::Connecting => {
                    next.pending.insert(peer.clone());
                }
                ConnectionState::Connected => {
                    next.pending.remove(peer);
                    next.connected.insert(peer.clone());
                    if *direction == ConnectionDirection::Outbound {
                        actions.push(HandlerAction::Send {
                            peer: peer.clone(),
                            message: Message::GetAddr,
                        });
                    }
                }
                ConnectionState::ConnectFailed { .. } => {
                    next.pending.remove(peer);
                }
                ConnectionState::Disconnected { .. } => {
                    next.pending.remove(peer);
                    next.connected.remove(peer);
                }
                ConnectionState::Disconnecting { .. } => {}
            },
            NetworkEvent::MessageReceived { peer, message } => match &**message {
                Message::Addr(addrs) => self.learn(&mut next, addrs),
                Message::GetAddr => {
                    let known: Vec<PeerAddress> = next
                        .connected
                        .iter()
                        .chain(next.pool.iter())
                        .filter(|a| *a != peer)
                        .cloned()
                        .collect::<BTreeSet<_>>()
                        .into_iter()
                        .take(self.config.max_addresses)
                        .collect();
                    actions.push(HandlerAction::Send {
                        peer: peer.clone(),
                        message: Message::Addr(known),
                    });
                }
                _ => {}
            },
            NetworkEvent::PeerBlacklisted { host, .. } => {
                next.banned_hosts.insert(host.clone());
                next.pool.retain(|a| a.host() != host.as_str());
            }
            NetworkEvent::PeerWhitelisted { host } => {
                next.banned_hosts.remove(host);
            }
            _ => {}
        }

        if next == *current {
            return Ok(Transition::none().with_actions(actions));
        }
        Ok(Transition::to(HandlerState::Discovery(next)).with_actions(actions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> PeerAddress {
        PeerAddress::new(format!("198.51.100.{n}"), 8333)
    }

    fn handler(min_peers: usize, seeds: Vec<PeerAddress>) -> DiscoveryHandler {
        DiscoveryHandler::new(
            Arc::new(BasicConfig {
                min_peers,
                ..Default::default()
            }),
            DiscoveryConfig {
                initial_peers: seeds,
                max_addresses: 5,
                connect_batch: 2,
            },
        )
    }

    fn apply(
        h: &DiscoveryHandler,
        state: HandlerState,
        event: NetworkEvent,
    ) -> (HandlerState, Vec<HandlerAction>) {
        let t = h.on_event(&state, &event).unwrap();
        (t.state.unwrap_or(state), t.actions)
    }

    fn discovery(state: &HandlerState) -> &DiscoveryState {
        match state {
            HandlerState::Discovery(s) => s,
            other => panic!("unexpected {other:?}"),
        }
    }

    fn connects(actions: &[HandlerAction]) -> Vec<PeerAddress> {
        actions
            .iter()
            .filter_map(|a| match a {
                HandlerAction::Connect(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn start_connecting_dials_one_batch() {
        let h = handler(8, (1..=4).map(addr).collect());
        let (s, actions) = apply(&h, h.initial_state(), NetworkEvent::StartConnecting);
        assert_eq!(connects(&actions), vec![addr(1), addr(2)]);
        assert_eq!(discovery(&s).pending.len(), 2);

        let (_, actions) = apply(&h, s, NetworkEvent::Tick { now_secs: 1 });
        assert_eq!(connects(&actions), vec![addr(3), addr(4)]);
    }

    #[test]
    fn no_dialing_while_stopped() {
        let h = handler(8, vec![addr(1)]);
        let (_, actions) = apply(&h, h.initial_state(), NetworkEvent::Tick { now_secs: 1 });
        assert!(actions.is_empty());
    }

    #[test]
    fn enough_peers_means_no_dialing() {
        let h = handler(1, vec![addr(1), addr(2)]);
        let (s, _) = apply(
            &h,
            h.initial_state(),
            NetworkEvent::ConnectionStateChanged {
                peer: addr(9),
                direction: ConnectionDirection::Outbound,
                state: ConnectionState::Connected,
            },
        );
        let (_, actions) = apply(&h, s, NetworkEvent::StartConnecting);
        assert!(connects(&actions).is_empty());
    }

    #[test]
    fn outbound_connect_requests_addresses() {
        let h = handler(1, Vec::new());
        let (_, actions) = apply(
            &h,
            h.initial_state(),
            NetworkEvent::ConnectionStateChanged {
                peer: addr(1),
                direction: ConnectionDirection::Outbound,
                state: ConnectionState::Connected,
            },
        );
        assert!(matches!(
            actions.as_slice(),
            [HandlerAction::Send { message: Message::GetAddr, .. }]
        ));
    }

    #[test]
    fn addr_fills_pool_up_to_limit() {
        let h = handler(1, Vec::new());
        let (s, _) = apply(
            &h,
            h.initial_state(),
            NetworkEvent::MessageReceived {
                peer: addr(1),
                message: Arc::new(Message::Addr((10..20).map(addr).collect())),
            },
        );
        assert_eq!(discovery(&s).pool.len(), 5);
    }

    #[test]
    fn blacklisted_hosts_leave_the_pool() {
        let h = handler(8, vec![addr(1), addr(2)]);
        let (s, _) = apply(
            &h,
            h.initial_state(),
            NetworkEvent::PeerBlacklisted {
                host: "198.51.100.1".into(),
                until_secs: 10,
            },
        );
        assert_eq!(discovery(&s).pool.iter().cloned().collect::<Vec<_>>(), vec![addr(2)]);
        let (s, _) = apply(&h, s, NetworkEvent::StartConnecting);
        assert_eq!(discovery(&s).pending.iter().cloned().collect::<Vec<_>>(), vec![addr(2)]);
    }

    #[test]
    fn getaddr_is_answered_without_the_asker() {
        let h = handler(8, vec![addr(1), addr(2)]);
        let (_, actions) = apply(
            &h,
            h.initial_state(),
            NetworkEvent::MessageReceived {
                peer: addr(1),
                message: Arc::new(Message::GetAddr),
            },
        );
        match actions.as_slice() {
            [HandlerAction::Send { message: Message::Addr(list), .. }] => {
                assert_eq!(list, &vec![addr(2)])
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
