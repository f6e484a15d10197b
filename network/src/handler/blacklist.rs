//! Temporary bans for hosts that keep failing or misbehave.

use std::collections::BTreeMap;
use std::time::Duration;

use super::{mismatch, Handler, HandlerAction, HandlerState, Transition};
use crate::error::HandlerError;
use crate::event::{ConnectionState, NetworkEvent};

pub const DEFAULT_MAX_CONNECT_FAILURES: u32 = 3;
pub const DEFAULT_BAN_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlacklistConfig {
    /// Consecutive failed connects before a host is banned.
    pub max_connect_failures: u32,
    pub ban_duration: Duration,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            max_connect_failures: DEFAULT_MAX_CONNECT_FAILURES,
            ban_duration: DEFAULT_BAN_DURATION,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlacklistState {
    /// Last tick seen, in unix seconds.
    pub now_secs: u64,
    /// Banned host -> ban expiry (unix seconds).
    pub banned: BTreeMap<String, u64>,
    /// Host -> consecutive connect failures.
    pub failures: BTreeMap<String, u32>,
}

impl BlacklistState {
    pub fn is_banned(&self, host: &str) -> bool {
        self.banned.contains_key(host)
    }
}

pub struct BlacklistHandler {
    config: BlacklistConfig,
}

impl BlacklistHandler {
    pub const NAME: &'static str = "blacklist";

    pub fn new(config: BlacklistConfig) -> Self {
        Self { config }
    }

    fn ban(&self, next: &mut BlacklistState, host: &str, actions: &mut Vec<HandlerAction>) {
        if next.is_banned(host) {
            return;
        }
        let until_secs = next.now_secs + self.config.ban_duration.as_secs();
        next.failures.remove(host);
        next.banned.insert(host.to_string(), until_secs);
        tracing::info!(%host, until_secs, "host blacklisted");
        actions.push(HandlerAction::Publish(NetworkEvent::PeerBlacklisted {
            host: host.to_string(),
            until_secs,
        }));
    }
}

impl Handler for BlacklistHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn initial_state(&self) -> HandlerState {
        HandlerState::Blacklist(BlacklistState::default())
    }

    fn on_event(
        &self,
        state: &HandlerState,
        event: &NetworkEvent,
    ) -> Result<Transition, HandlerError> {
        let HandlerState::Blacklist(current) = state else {
            return Err(mismatch(Self::NAME));
        };
        let mut next = current.clone();
        let mut actions = Vec::new();

        match event {
            NetworkEvent::ConnectionStateChanged { peer, state, .. } => match state {
                ConnectionState::ConnectFailed { .. } => {
                    let host = peer.host();
                    let count = next.failures.entry(host.to_string()).or_insert(0);
                    *count += 1;
                    if *count >= self.config.max_connect_failures {
                        self.ban(&mut next, host, &mut actions);
                    }
                }
                ConnectionState::Connected => {
                    if next.is_banned(peer.host()) {
                        actions.push(HandlerAction::Disconnect {
                            peer: peer.clone(),
                            reason: "blacklisted".into(),
                        });
                    } else {
                        next.failures.remove(peer.host());
                    }
                }
                _ => {}
            },
            NetworkEvent::StreamFailed { peer, .. } => {
                self.ban(&mut next, peer.host(), &mut actions);
            }
            NetworkEvent::Tick { now_secs } => {
                next.now_secs = *now_secs;
                let expired: Vec<String> = next
                    .banned
                    .iter()
                    .filter(|(_, until)| **until <= *now_secs)
                    .map(|(host, _)| host.clone())
                    .collect();
                for host in expired {
                    next.banned.remove(&host);
                    actions.push(HandlerAction::Publish(NetworkEvent::PeerWhitelisted { host }));
                }
            }
            _ => {}
        }

        if next == *current {
            return Ok(Transition::none().with_actions(actions));
        }
        Ok(Transition::to(HandlerState::Blacklist(next)).with_actions(actions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ConnectionDirection;
    use crate::stream::StreamDirection;
    use chainwire_types::PeerAddress;

    fn handler() -> BlacklistHandler {
        BlacklistHandler::new(BlacklistConfig {
            max_connect_failures: 2,
            ban_duration: Duration::from_secs(100),
        })
    }

    fn peer() -> PeerAddress {
        PeerAddress::new("203.0.113.9", 8333)
    }

    fn failed() -> NetworkEvent {
        NetworkEvent::ConnectionStateChanged {
            peer: peer(),
            direction: ConnectionDirection::Outbound,
            state: ConnectionState::ConnectFailed { reason: "refused".into() },
        }
    }

    fn apply(
        h: &BlacklistHandler,
        state: HandlerState,
        event: NetworkEvent,
    ) -> (HandlerState, Vec<HandlerAction>) {
        let t = h.on_event(&state, &event).unwrap();
        (t.state.unwrap_or(state), t.actions)
    }

    fn blacklist(state: &HandlerState) -> &BlacklistState {
        match state {
            HandlerState::Blacklist(s) => s,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn repeated_connect_failures_ban_the_host() {
        let h = handler();
        let (s, _) = apply(&h, h.initial_state(), NetworkEvent::Tick { now_secs: 1_000 });
        let (s, actions) = apply(&h, s, failed());
        assert!(actions.is_empty());
        let (s, actions) = apply(&h, s, failed());

        assert_eq!(blacklist(&s).banned.get("203.0.113.9"), Some(&1_100));
        assert!(matches!(
            actions.as_slice(),
            [HandlerAction::Publish(NetworkEvent::PeerBlacklisted { until_secs: 1_100, .. })]
        ));
    }

    #[test]
    fn banned_host_is_disconnected_on_connect() {
        let h = handler();
        let (s, _) = apply(
            &h,
            h.initial_state(),
            NetworkEvent::StreamFailed {
                peer: peer(),
                direction: StreamDirection::Inbound,
                error: "bad magic".into(),
            },
        );
        let (_, actions) = apply(
            &h,
            s,
            NetworkEvent::ConnectionStateChanged {
                peer: PeerAddress::new("203.0.113.9", 9999),
                direction: ConnectionDirection::Inbound,
                state: ConnectionState::Connected,
            },
        );
        assert!(matches!(actions.as_slice(), [HandlerAction::Disconnect { .. }]));
    }

    #[test]
    fn ban_expires_on_tick() {
        let h = handler();
        let (s, _) = apply(&h, h.initial_state(), failed());
        let (s, _) = apply(&h, s, failed());
        assert!(blacklist(&s).is_banned("203.0.113.9"));

        let (s, actions) = apply(&h, s, NetworkEvent::Tick { now_secs: 100 });
        assert!(!blacklist(&s).is_banned("203.0.113.9"));
        assert!(matches!(
            actions.as_slice(),
            [HandlerAction::Publish(NetworkEvent::PeerWhitelisted { .. })]
        ));
    }

    #[test]
    fn successful_connect_resets_failures() {
        let h = handler();
        let (s, _) = apply(&h, h.initial_state(), failed());
        let (s, _) = apply(
            &h,
            s,
            NetworkEvent::ConnectionStateChanged {
                peer: peer(),
                direction: ConnectionDirection::Outbound,
                state: ConnectionState::Connected,
            },
        );
        assert!(blacklist(&s).failures.is_empty());
    }
}
