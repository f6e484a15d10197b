//! Handler framework.
//!
//! A handler is a pure state machine: given its current immutable snapshot
//! and one event, it returns at most one replacement snapshot plus the
//! actions it wants performed. The [`HandlerRegistry`] owns the snapshots
//! and swaps them whole, so readers never see a partial update.

pub mod blacklist;
pub mod discovery;
pub mod keepalive;
pub mod network;
pub mod registry;

use std::sync::Arc;

use chainwire_messages::Message;
use chainwire_protocol::PROTOCOL_VERSION;
use chainwire_types::{NetworkId, PeerAddress};

use crate::error::HandlerError;
use crate::event::NetworkEvent;

pub use blacklist::{BlacklistConfig, BlacklistHandler, BlacklistState};
pub use discovery::{DiscoveryConfig, DiscoveryHandler, DiscoveryState};
pub use keepalive::{KeepaliveConfig, KeepaliveHandler, KeepaliveState};
pub use network::{NetworkHandler, NetworkHandlerState};
pub use registry::{spawn_handler_runner, Dispatch, HandlerRegistry};

pub const DEFAULT_MIN_PEERS: usize = 8;
pub const DEFAULT_MAX_PEERS: usize = 125;

/// Protocol parameters shared by every handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicConfig {
    pub network: NetworkId,
    pub protocol_version: u32,
    pub port: u16,
    pub min_peers: usize,
    pub max_peers: usize,
    pub server_mode: bool,
}

impl BasicConfig {
    pub fn new(
        network: NetworkId,
        port: u16,
        min_peers: usize,
        max_peers: usize,
        server_mode: bool,
    ) -> Result<Self, HandlerError> {
        if max_peers == 0 {
            return Err(HandlerError::InvalidConfig("max_peers must be positive".into()));
        }
        if min_peers > max_peers {
            return Err(HandlerError::InvalidConfig(format!(
                "min_peers {min_peers} exceeds max_peers {max_peers}"
            )));
        }
        Ok(Self {
            network,
            protocol_version: PROTOCOL_VERSION,
            port,
            min_peers,
            max_peers,
            server_mode,
        })
    }
}

impl Default for BasicConfig {
    fn default() -> Self {
        let network = NetworkId::default();
        Self {
            network,
            protocol_version: PROTOCOL_VERSION,
            port: network.default_port(),
            min_peers: DEFAULT_MIN_PEERS,
            max_peers: DEFAULT_MAX_PEERS,
            server_mode: false,
        }
    }
}

/// Latest snapshot of one handler, one variant per handler kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerState {
    Network(NetworkHandlerState),
    Blacklist(BlacklistState),
    Discovery(DiscoveryState),
    Keepalive(KeepaliveState),
}

impl HandlerState {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Blacklist(_) => "blacklist",
            Self::Discovery(_) => "discovery",
            Self::Keepalive(_) => "keepalive",
        }
    }
}

/// Side effects a handler asks the node to perform.
#[derive(Clone, Debug)]
pub enum HandlerAction {
    Send { peer: PeerAddress, message: Message },
    Connect(PeerAddress),
    Disconnect { peer: PeerAddress, reason: String },
    /// Publish an event on the bus, visible to other handlers too.
    Publish(NetworkEvent),
}

/// Output of one `on_event` call.
#[derive(Clone, Debug, Default)]
pub struct Transition {
    pub state: Option<HandlerState>,
    pub actions: Vec<HandlerAction>,
}

impl Transition {
    /// No state change, no actions.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn to(state: HandlerState) -> Self {
        Self {
            state: Some(state),
            actions: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: HandlerAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_actions(mut self, actions: impl IntoIterator<Item = HandlerAction>) -> Self {
        self.actions.extend(actions);
        self
    }
}

/// One protocol concern.
///
/// `on_event` must derive its result from `state` and `event` alone; any
/// data it needs later goes into the returned snapshot.
pub trait Handler: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn initial_state(&self) -> HandlerState;

    fn on_event(
        &self,
        state: &HandlerState,
        event: &NetworkEvent,
    ) -> Result<Transition, HandlerError>;
}

/// The default handler set over one shared [`BasicConfig`].
pub fn default_handlers(
    basic: Arc<BasicConfig>,
    blacklist: BlacklistConfig,
    discovery: DiscoveryConfig,
    keepalive: KeepaliveConfig,
) -> Vec<Arc<dyn Handler>> {
    vec![
        Arc::new(NetworkHandler::new(Arc::clone(&basic))),
        Arc::new(BlacklistHandler::new(blacklist)),
        Arc::new(DiscoveryHandler::new(basic, discovery)),
        Arc::new(KeepaliveHandler::new(keepalive)),
    ]
}

pub(crate) fn mismatch(handler: &str) -> HandlerError {
    HandlerError::StateMismatch {
        handler: handler.to_string(),
    }
}
