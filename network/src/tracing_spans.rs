//! Span constructors shared by the transport tasks, so stream, connection
//! and handler logs carry the same field names.

use chainwire_types::PeerAddress;
use tracing::{info_span, Span};

use crate::event::ConnectionDirection;
use crate::stream::StreamDirection;

/// Span covering the worker task of one peer stream.
pub fn stream_span(peer: &PeerAddress, direction: StreamDirection, stages: usize) -> Span {
    info_span!("peer_stream", peer = %peer, direction = %direction, stages)
}

/// Span covering the socket tasks of one connection.
pub fn connection_span(peer: &PeerAddress, direction: ConnectionDirection) -> Span {
    info_span!("peer_connection", peer = %peer, direction = %direction)
}

pub fn handler_span(name: &str) -> Span {
    info_span!("handler", name = %name)
}
