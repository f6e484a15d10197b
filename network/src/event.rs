//! Events published on the [`EventBus`](crate::EventBus).
//!
//! One closed set of variants covers connections, streams, big objects,
//! handlers and node commands; subscribers discriminate by variant.

use std::fmt;
use std::sync::Arc;

use chainwire_messages::{Message, ObjectKind};
use chainwire_types::{ObjectId, PeerAddress};

use crate::handler::HandlerState;
use crate::stream::StreamDirection;

/// Which side opened a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionDirection {
    Inbound,
    Outbound,
}

impl fmt::Display for ConnectionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => f.write_str("inbound"),
            Self::Outbound => f.write_str("outbound"),
        }
    }
}

/// Connection state as seen by observers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Outbound connect attempted.
    Connecting,
    Connected,
    ConnectFailed { reason: String },
    /// Disconnect requested locally.
    Disconnecting { reason: String },
    Disconnected { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Everything that travels over the event bus.
#[derive(Clone, Debug)]
pub enum NetworkEvent {
    ConnectionStateChanged {
        peer: PeerAddress,
        direction: ConnectionDirection,
        state: ConnectionState,
    },
    MessageReceived {
        peer: PeerAddress,
        message: Arc<Message>,
    },
    BigObjectReceived {
        id: ObjectId,
        kind: ObjectKind,
        source: PeerAddress,
        size: u64,
    },
    BigObjectSourceChanged {
        id: ObjectId,
        previous: PeerAddress,
        source: PeerAddress,
    },
    AssemblyAborted {
        id: ObjectId,
        peer: PeerAddress,
        reason: String,
    },
    AssemblyIncomplete {
        id: ObjectId,
        peer: PeerAddress,
        received: u64,
        declared: u64,
    },
    StreamFailed {
        peer: PeerAddress,
        direction: StreamDirection,
        error: String,
    },
    HandlerStateChanged {
        handler: String,
        state: Arc<HandlerState>,
    },
    HandlerFailed {
        handler: String,
        error: String,
    },
    PeerBlacklisted {
        host: String,
        until_secs: u64,
    },
    PeerWhitelisted {
        host: String,
    },
    SubscriberDetached {
        subscriber: String,
    },
    Tick {
        now_secs: u64,
    },
    StartConnecting,
    StopConnecting,
}

impl NetworkEvent {
    /// Short tag for logs and metrics labels.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::ConnectionStateChanged { .. } => "connection_state_changed",
            Self::MessageReceived { .. } => "message_received",
            Self::BigObjectReceived { .. } => "big_object_received",
            Self::BigObjectSourceChanged { .. } => "big_object_source_changed",
            Self::AssemblyAborted { .. } => "assembly_aborted",
            Self::AssemblyIncomplete { .. } => "assembly_incomplete",
            Self::StreamFailed { .. } => "stream_failed",
            Self::HandlerStateChanged { .. } => "handler_state_changed",
            Self::HandlerFailed { .. } => "handler_failed",
            Self::PeerBlacklisted { .. } => "peer_blacklisted",
            Self::PeerWhitelisted { .. } => "peer_whitelisted",
            Self::SubscriberDetached { .. } => "subscriber_detached",
            Self::Tick { .. } => "tick",
            Self::StartConnecting => "start_connecting",
            Self::StopConnecting => "stop_connecting",
        }
    }

    /// Events emitted by the handler framework itself. Handlers never see
    /// them, which keeps state publication from feeding back into handlers.
    pub fn is_handler_output(&self) -> bool {
        matches!(
            self,
            Self::HandlerStateChanged { .. } | Self::HandlerFailed { .. }
        )
    }
}
