use chainwire_protocol::ProtocolError;
use chainwire_store::StoreError;
use chainwire_types::{ObjectId, PeerAddress, ServiceError};
use thiserror::Error;

/// Failure inside one transform stage. Fails the owning stream only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error("stage {stage}: {source}")]
    Protocol {
        stage: &'static str,
        #[source]
        source: ProtocolError,
    },

    #[error("stage {stage}: {reason}")]
    Failed { stage: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream to {peer} is closed")]
    Closed { peer: PeerAddress },

    #[error("stream to {peer} is full")]
    Backpressure { peer: PeerAddress },

    #[error("stream to {peer} failed: {source}")]
    Stage {
        peer: PeerAddress,
        #[source]
        source: StageError,
    },
}

/// Outbound big-object failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BigObjectError {
    #[error("object {id} is {size} bytes, maximum is {max}")]
    SizeExceeded { id: ObjectId, size: u64, max: u64 },

    #[error("object {id} declared {declared} bytes but its source produced {produced}")]
    LengthMismatch {
        id: ObjectId,
        declared: u64,
        produced: u64,
    },

    #[error("object {id} source failed: {reason}")]
    Source { id: ObjectId, reason: String },

    #[error("transfer of object {id} cancelled")]
    Cancelled { id: ObjectId },

    #[error("invalid big-object configuration: {0}")]
    InvalidConfig(String),
}

/// Inbound assembly failures. Every variant aborts that object's assembly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    #[error("chunk {ordinal} for {id} arrived but no assembly was started")]
    NotStarted { id: ObjectId, ordinal: u32 },

    #[error("chunk for {id} out of order: expected {expected}, got {got}")]
    OutOfOrder {
        id: ObjectId,
        expected: u32,
        got: u32,
    },

    #[error("object {id} declared {declared} bytes, received {received}")]
    LengthMismatch {
        id: ObjectId,
        declared: u64,
        received: u64,
    },

    #[error("object {id} is {size} bytes, maximum is {max}")]
    SizeExceeded { id: ObjectId, size: u64, max: u64 },

    #[error("source of {id} changed from {previous} to {source_peer}")]
    SourceChanged {
        id: ObjectId,
        previous: PeerAddress,
        source_peer: PeerAddress,
    },

    #[error("object {id} incomplete: {received} of {declared} bytes")]
    Incomplete {
        id: ObjectId,
        received: u64,
        declared: u64,
    },

    #[error("object {id} refused: {peer} already has {limit} objects in flight")]
    TooManyAssemblies {
        id: ObjectId,
        peer: PeerAddress,
        limit: usize,
    },

    #[error("timed out waiting for object {id}")]
    Timeout { id: ObjectId },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("handler {0} is already attached")]
    Duplicate(String),

    #[error("handler {0} not found")]
    NotFound(String),

    #[error("handler {handler} received a state snapshot of another handler")]
    StateMismatch { handler: String },

    #[error("handler {handler} failed: {reason}")]
    Failed { handler: String, reason: String },

    #[error("handler {0} panicked")]
    Panicked(String),

    #[error("invalid handler configuration: {0}")]
    InvalidConfig(String),

    #[error("service error: {0}")]
    Service(#[from] ServiceError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("peer {0} is not connected")]
    NotConnected(PeerAddress),

    #[error("peer {0} is already connected")]
    AlreadyConnected(PeerAddress),

    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("big object error: {0}")]
    BigObject(#[from] BigObjectError),

    #[error("assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    #[error("IO error: {0}")]
    Io(String),
}
