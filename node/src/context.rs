//! Shared dependencies of the node's long-lived tasks.

use std::sync::Arc;

use chainwire_network::{BigObjectAssembler, ConnectionConfig, EventBus};
use chainwire_protocol::{BincodeSerializer, Serializer};
use chainwire_store::ObjectStore;
use chainwire_types::{Clock, SystemClock};

use crate::config::NodeConfig;
use crate::metrics::NodeMetrics;
use crate::NodeError;

/// Everything the connection manager, handler runner and ticker share.
/// All fields are cheap to clone handles.
pub struct NodeContext {
    pub config: NodeConfig,
    pub connection: ConnectionConfig,
    pub bus: EventBus,
    pub store: Arc<dyn ObjectStore>,
    pub serializer: Arc<dyn Serializer>,
    pub assembler: Arc<BigObjectAssembler>,
    pub metrics: Arc<NodeMetrics>,
    pub clock: Arc<dyn Clock>,
}

impl NodeContext {
    /// Validate `config` and wire the shared pieces together, using the
    /// bincode wire serializer and the system clock.
    pub fn new(config: NodeConfig, store: Arc<dyn ObjectStore>) -> Result<Self, NodeError> {
        Self::with_parts(config, store, Arc::new(BincodeSerializer), Arc::new(SystemClock))
    }

    pub fn with_parts(
        config: NodeConfig,
        store: Arc<dyn ObjectStore>,
        serializer: Arc<dyn Serializer>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let connection = config.connection_config()?;
        let bus = EventBus::new(config.bus_config());
        let assembler = Arc::new(BigObjectAssembler::new(
            connection.big_object.clone(),
            Arc::clone(&store),
            bus.clone(),
        ));
        Ok(Self {
            config,
            connection,
            bus,
            store,
            serializer,
            assembler,
            metrics: Arc::new(NodeMetrics::new()?),
            clock,
        })
    }
}
