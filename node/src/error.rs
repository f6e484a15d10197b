use chainwire_network::{AssemblyError, BigObjectError, HandlerError, NetworkError};
use chainwire_store::StoreError;
use chainwire_types::ServiceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("big object error: {0}")]
    BigObject(#[from] BigObjectError),

    #[error("assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("node is not running")]
    NotRunning,
}
