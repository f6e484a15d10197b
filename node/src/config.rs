//! Node configuration with TOML file support.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use chainwire_network::big_object::{
    DEFAULT_ASSEMBLY_TIMEOUT, DEFAULT_BATCH_SIZE, DEFAULT_MAX_ASSEMBLIES_PER_PEER,
    DEFAULT_MAX_OBJECT_SIZE,
};
use chainwire_network::bus::{DEFAULT_BUS_CAPACITY, DEFAULT_GRACE_PERIOD};
use chainwire_network::connection::DEFAULT_READ_BUFFER;
use chainwire_network::handler::blacklist::{DEFAULT_BAN_DURATION, DEFAULT_MAX_CONNECT_FAILURES};
use chainwire_network::handler::discovery::{DEFAULT_CONNECT_BATCH, DEFAULT_MAX_ADDRESSES};
use chainwire_network::handler::keepalive::{DEFAULT_PING_INTERVAL, DEFAULT_PONG_TIMEOUT};
use chainwire_network::handler::{
    BasicConfig, BlacklistConfig, DiscoveryConfig, KeepaliveConfig, DEFAULT_MAX_PEERS,
    DEFAULT_MIN_PEERS,
};
use chainwire_network::{
    BigObjectConfig, ConnectionConfig, EventBusConfig, SourceChangePolicy, StreamConfig,
};
use chainwire_types::{NetworkId, PeerAddress};

use crate::logging::LogFormat;
use crate::NodeError;

/// Configuration for a chainwire node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests). Every field has a default, so
/// an empty file is a valid configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Which network to talk to.
    pub network: NetworkId,

    /// Port to listen on in server mode. Zero picks an ephemeral port.
    pub port: u16,

    /// Accept inbound connections.
    pub server_mode: bool,

    pub min_peers: usize,
    pub max_peers: usize,

    /// Seed addresses ("ip:port") handed to discovery at start.
    pub seed_peers: Vec<String>,

    /// Publish `StartConnecting` once the node is running.
    pub auto_connect: bool,

    /// Interval between `Tick` events, in milliseconds.
    pub tick_interval_ms: u64,

    /// Timeout for an outbound TCP connect, in seconds.
    pub connect_timeout_secs: u64,

    pub log_format: LogFormat,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    pub log_level: String,

    pub enable_metrics: bool,

    pub big_object: BigObjectSection,
    pub stream: StreamSection,
    pub event_bus: EventBusSection,
    pub keepalive: KeepaliveSection,
    pub blacklist: BlacklistSection,
    pub discovery: DiscoverySection,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BigObjectSection {
    pub max_object_size: u64,
    pub batch_size: usize,
    pub assembly_timeout_secs: u64,
    pub source_change: SourceChangePolicy,
    /// Objects a single peer may have half-received at once.
    pub max_assemblies_per_peer: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    /// Capacity of each stream's input and output queues.
    pub buffer_size: usize,
    /// Bytes read from the socket per call.
    pub read_buffer_bytes: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusSection {
    pub capacity: usize,
    /// How long a publish waits on a full subscriber before detaching it.
    pub grace_period_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveSection {
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlacklistSection {
    pub max_connect_failures: u32,
    pub ban_duration_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    pub max_addresses: usize,
    pub connect_batch: usize,
}

// ── Defaults ───────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        let network = NetworkId::default();
        Self {
            network,
            port: network.default_port(),
            server_mode: false,
            min_peers: DEFAULT_MIN_PEERS,
            max_peers: DEFAULT_MAX_PEERS,
            seed_peers: Vec::new(),
            auto_connect: true,
            tick_interval_ms: 1_000,
            connect_timeout_secs: 5,
            log_format: LogFormat::Human,
            log_level: "info".to_string(),
            enable_metrics: false,
            big_object: BigObjectSection::default(),
            stream: StreamSection::default(),
            event_bus: EventBusSection::default(),
            keepalive: KeepaliveSection::default(),
            blacklist: BlacklistSection::default(),
            discovery: DiscoverySection::default(),
        }
    }
}

impl Default for BigObjectSection {
    fn default() -> Self {
        Self {
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            assembly_timeout_secs: DEFAULT_ASSEMBLY_TIMEOUT.as_secs(),
            source_change: SourceChangePolicy::default(),
            max_assemblies_per_peer: DEFAULT_MAX_ASSEMBLIES_PER_PEER,
        }
    }
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            buffer_size: StreamConfig::default().buffer_size,
            read_buffer_bytes: DEFAULT_READ_BUFFER,
        }
    }
}

impl Default for EventBusSection {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUS_CAPACITY,
            grace_period_ms: DEFAULT_GRACE_PERIOD.as_millis() as u64,
        }
    }
}

impl Default for KeepaliveSection {
    fn default() -> Self {
        Self {
            ping_interval_secs: DEFAULT_PING_INTERVAL.as_secs(),
            pong_timeout_secs: DEFAULT_PONG_TIMEOUT.as_secs(),
        }
    }
}

impl Default for BlacklistSection {
    fn default() -> Self {
        Self {
            max_connect_failures: DEFAULT_MAX_CONNECT_FAILURES,
            ban_duration_secs: DEFAULT_BAN_DURATION.as_secs(),
        }
    }
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            max_addresses: DEFAULT_MAX_ADDRESSES,
            connect_batch: DEFAULT_CONNECT_BATCH,
        }
    }
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Check every derived component configuration.
    pub fn validate(&self) -> Result<(), NodeError> {
        self.basic_config()?;
        self.big_object_config()?;
        self.discovery_config()?;
        if self.tick_interval_ms == 0 {
            return Err(NodeError::Config("tick_interval_ms must be positive".into()));
        }
        if self.connect_timeout_secs == 0 {
            return Err(NodeError::Config("connect_timeout_secs must be positive".into()));
        }
        if self.stream.buffer_size == 0 || self.event_bus.capacity == 0 {
            return Err(NodeError::Config("queue capacities must be positive".into()));
        }
        Ok(())
    }

    pub fn basic_config(&self) -> Result<BasicConfig, NodeError> {
        Ok(BasicConfig::new(
            self.network,
            self.port,
            self.min_peers,
            self.max_peers,
            self.server_mode,
        )?)
    }

    pub fn big_object_config(&self) -> Result<BigObjectConfig, NodeError> {
        let section = &self.big_object;
        Ok(BigObjectConfig::new(
            section.max_object_size,
            section.batch_size,
            Duration::from_secs(section.assembly_timeout_secs),
            section.source_change,
        )?
        .with_max_assemblies_per_peer(section.max_assemblies_per_peer)?)
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            buffer_size: self.stream.buffer_size,
        }
    }

    pub fn connection_config(&self) -> Result<ConnectionConfig, NodeError> {
        Ok(ConnectionConfig {
            network: self.network,
            stream: self.stream_config(),
            read_buffer_bytes: self.stream.read_buffer_bytes,
            big_object: self.big_object_config()?,
        })
    }

    pub fn bus_config(&self) -> EventBusConfig {
        EventBusConfig {
            capacity: self.event_bus.capacity,
            grace_period: Duration::from_millis(self.event_bus.grace_period_ms),
        }
    }

    pub fn keepalive_config(&self) -> KeepaliveConfig {
        KeepaliveConfig {
            ping_interval: Duration::from_secs(self.keepalive.ping_interval_secs),
            pong_timeout: Duration::from_secs(self.keepalive.pong_timeout_secs),
        }
    }

    pub fn blacklist_config(&self) -> BlacklistConfig {
        BlacklistConfig {
            max_connect_failures: self.blacklist.max_connect_failures,
            ban_duration: Duration::from_secs(self.blacklist.ban_duration_secs),
        }
    }

    pub fn discovery_config(&self) -> Result<DiscoveryConfig, NodeError> {
        let initial_peers = self
            .seed_peers
            .iter()
            .map(|s| {
                s.parse::<PeerAddress>()
                    .map_err(|e| NodeError::Config(format!("seed peer {s:?}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DiscoveryConfig {
            initial_peers,
            max_addresses: self.discovery.max_addresses,
            connect_batch: self.discovery.connect_batch,
        })
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_toml_is_the_default() {
        let cfg = NodeConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, NodeConfig::default());
        cfg.validate().unwrap();
    }

    #[test]
    fn toml_roundtrip() {
        let mut cfg = NodeConfig::default();
        cfg.server_mode = true;
        cfg.seed_peers = vec!["10.0.0.1:18444".into()];
        cfg.big_object.batch_size = 4_096;
        cfg.big_object.source_change = SourceChangePolicy::Abort;
        let text = cfg.to_toml_string().unwrap();
        assert_eq!(NodeConfig::from_toml_str(&text).unwrap(), cfg);
    }

    #[test]
    fn partial_sections_keep_their_other_defaults() {
        let cfg = NodeConfig::from_toml_str(
            r#"
            network = "testnet"
            log_format = "json"

            [big_object]
            batch_size = 500
            source_change = "abort"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.network, NetworkId::Testnet);
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.big_object.batch_size, 500);
        assert_eq!(cfg.big_object.max_object_size, DEFAULT_MAX_OBJECT_SIZE);
        let big = cfg.big_object_config().unwrap();
        assert_eq!(big.source_change(), SourceChangePolicy::Abort);
    }

    #[test]
    fn from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_peers = 12\nmin_peers = 2").unwrap();
        let cfg = NodeConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(cfg.basic_config().unwrap().max_peers, 12);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = NodeConfig::from_toml_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut cfg = NodeConfig::default();
        cfg.big_object.batch_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = NodeConfig::default();
        cfg.min_peers = cfg.max_peers + 1;
        assert!(matches!(cfg.validate(), Err(NodeError::Handler(_))));

        let mut cfg = NodeConfig::default();
        cfg.seed_peers = vec!["not an address".into()];
        assert!(matches!(cfg.validate(), Err(NodeError::Config(_))));

        let mut cfg = NodeConfig::default();
        cfg.big_object.max_assemblies_per_peer = 0;
        assert!(matches!(cfg.validate(), Err(NodeError::BigObject(_))));
    }
}
