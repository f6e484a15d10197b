//! P2P transport core for chainwire.
//!
//! Raw socket bytes enter a [`PeerConnection`], run through its inbound
//! [`PeerStream`] of transform stages and come out as protocol messages.
//! Messages and connection changes are published on the [`EventBus`], where
//! [`handler`]s react to them. Outbound messages take the reverse path, and
//! oversized objects are split and reassembled by the [`big_object`] module.

pub mod big_object;
pub mod bus;
pub mod connection;
pub mod error;
pub mod event;
pub mod handler;
pub mod stage;
pub mod stages;
pub mod stream;
pub mod tracing_spans;

pub use big_object::{
    BigCollectionChunk, BigObjectAssembler, BigObjectConfig, ObjectCursor, SourceChangePolicy,
    StreamRequest,
};
pub use bus::{EventBus, EventBusConfig, EventSubscription, SubscriberId};
pub use connection::{ConnectionConfig, InboundEvent, PeerConnection};
pub use error::{
    AssemblyError, BigObjectError, HandlerError, NetworkError, StageError, StreamError,
};
pub use event::{ConnectionDirection, ConnectionState, NetworkEvent};
pub use handler::{Handler, HandlerAction, HandlerRegistry, HandlerState, Transition};
pub use stage::{stage_fn, StreamDataEvent, TransformStage};
pub use stream::{PeerStream, StreamConfig, StreamDirection};
