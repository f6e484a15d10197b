//! Prometheus metrics for the chainwire node.
//!
//! [`NodeMetrics`] owns a dedicated [`Registry`]. Most metrics are driven
//! by [`NodeMetrics::observe`], which the node feeds from its own bus
//! subscription; outbound counters are bumped by the connection manager.

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge,
    Opts, Registry, TextEncoder,
};

use chainwire_network::{ConnectionState, NetworkEvent};

use crate::NodeError;

pub struct NodeMetrics {
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    pub messages_received: IntCounter,
    pub messages_sent: IntCounter,
    pub messages_dropped: IntCounter,
    pub chunks_sent: IntCounter,
    pub big_objects_received: IntCounter,
    pub assemblies_aborted: IntCounter,
    pub assemblies_incomplete: IntCounter,
    pub connect_failures: IntCounter,
    pub stream_failures: IntCounter,
    pub handler_failures: IntCounter,
    pub subscribers_detached: IntCounter,
    pub peers_blacklisted: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    pub peer_count: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Size of reassembled big objects, in bytes.
    pub big_object_bytes: Histogram,
}

impl NodeMetrics {
    pub fn new() -> Result<Self, NodeError> {
        let registry = Registry::new();

        macro_rules! counter {
            ($name:expr, $help:expr) => {
                register_int_counter_with_registry!(Opts::new($name, $help), registry)?
            };
        }

        let messages_received = counter!(
            "chainwire_messages_received_total",
            "Protocol messages decoded from peers"
        );
        let messages_sent = counter!(
            "chainwire_messages_sent_total",
            "Protocol messages queued for peers"
        );
        let messages_dropped = counter!(
            "chainwire_messages_dropped_total",
            "Handler messages dropped because the peer stopped reading"
        );
        let chunks_sent = counter!(
            "chainwire_object_chunks_sent_total",
            "Big-object chunks queued for peers"
        );
        let big_objects_received = counter!(
            "chainwire_big_objects_received_total",
            "Objects received and handed to the store"
        );
        let assemblies_aborted = counter!(
            "chainwire_assemblies_aborted_total",
            "Big-object assemblies discarded on error"
        );
        let assemblies_incomplete = counter!(
            "chainwire_assemblies_incomplete_total",
            "Big-object assemblies cut short by a disconnect"
        );
        let connect_failures = counter!(
            "chainwire_connect_failures_total",
            "Outbound connection attempts that failed"
        );
        let stream_failures = counter!(
            "chainwire_stream_failures_total",
            "Peer streams that hit a stage error"
        );
        let handler_failures = counter!(
            "chainwire_handler_failures_total",
            "Handlers that failed and moved to the error state"
        );
        let subscribers_detached = counter!(
            "chainwire_bus_subscribers_detached_total",
            "Event bus subscribers detached for falling behind"
        );
        let peers_blacklisted = counter!(
            "chainwire_peers_blacklisted_total",
            "Hosts banned by the blacklist handler"
        );

        let peer_count = register_int_gauge_with_registry!(
            Opts::new("chainwire_peer_count", "Currently connected peers"),
            registry
        )?;

        let big_object_bytes = register_histogram_with_registry!(
            HistogramOpts::new(
                "chainwire_big_object_bytes",
                "Size of received big objects in bytes"
            )
            .buckets(prometheus::exponential_buckets(1_024.0, 4.0, 10)?),
            registry
        )?;

        Ok(Self {
            registry,
            messages_received,
            messages_sent,
            messages_dropped,
            chunks_sent,
            big_objects_received,
            assemblies_aborted,
            assemblies_incomplete,
            connect_failures,
            stream_failures,
            handler_failures,
            subscribers_detached,
            peers_blacklisted,
            peer_count,
            big_object_bytes,
        })
    }

    /// Update metrics from one bus event.
    pub fn observe(&self, event: &NetworkEvent) {
        match event {
            NetworkEvent::ConnectionStateChanged { state, .. } => match state {
                ConnectionState::Connected => self.peer_count.inc(),
                ConnectionState::Disconnected { .. } => self.peer_count.dec(),
                ConnectionState::ConnectFailed { .. } => self.connect_failures.inc(),
                ConnectionState::Connecting | ConnectionState::Disconnecting { .. } => {}
            },
            NetworkEvent::MessageReceived { .. } => self.messages_received.inc(),
            NetworkEvent::BigObjectReceived { size, .. } => {
                self.big_objects_received.inc();
                self.big_object_bytes.observe(*size as f64);
            }
            NetworkEvent::AssemblyAborted { .. } => self.assemblies_aborted.inc(),
            NetworkEvent::AssemblyIncomplete { .. } => self.assemblies_incomplete.inc(),
            NetworkEvent::StreamFailed { .. } => self.stream_failures.inc(),
            NetworkEvent::HandlerFailed { .. } => self.handler_failures.inc(),
            NetworkEvent::SubscriberDetached { .. } => self.subscribers_detached.inc(),
            NetworkEvent::PeerBlacklisted { .. } => self.peers_blacklisted.inc(),
            _ => {}
        }
    }

    /// Render every metric in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, NodeError> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| NodeError::Config(e.to_string()))
    }
}
