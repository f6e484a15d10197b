//! chainwire daemon: entry point for running a transport node.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chainwire_node::{init_logging, LogFormat, Node, NodeConfig, ShutdownController};
use chainwire_store::MemoryStore;
use chainwire_types::NetworkId;
use clap::Parser;

#[derive(Parser)]
#[command(name = "chainwire-daemon", about = "Bitcoin-protocol P2P transport node")]
struct Cli {
    /// Path to a TOML configuration file. File settings are the base;
    /// flags and env vars override them.
    #[arg(long, env = "CHAINWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Network: "mainnet", "testnet" or "regtest".
    #[arg(long, env = "CHAINWIRE_NETWORK", value_parser = parse_network)]
    network: Option<NetworkId>,

    /// Listen port (defaults to the network's port).
    #[arg(long, env = "CHAINWIRE_PORT")]
    port: Option<u16>,

    /// Accept inbound connections.
    #[arg(long, env = "CHAINWIRE_SERVER")]
    server: bool,

    /// Seed peers, comma separated: "1.2.3.4:8333,5.6.7.8:8333".
    #[arg(long, env = "CHAINWIRE_SEEDS", value_delimiter = ',')]
    seeds: Vec<String>,

    #[arg(long, env = "CHAINWIRE_MAX_PEERS")]
    max_peers: Option<usize>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "CHAINWIRE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "CHAINWIRE_LOG_FORMAT", value_parser = parse_log_format)]
    log_format: Option<LogFormat>,

    /// Collect prometheus metrics and log them on exit.
    #[arg(long, env = "CHAINWIRE_METRICS")]
    metrics: bool,
}

fn parse_network(s: &str) -> Result<NetworkId, String> {
    match s.to_ascii_lowercase().as_str() {
        "mainnet" | "main" => Ok(NetworkId::Mainnet),
        "testnet" | "test" => Ok(NetworkId::Testnet),
        "regtest" => Ok(NetworkId::Regtest),
        other => Err(format!("unknown network {other:?}")),
    }
}


fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    s.parse::<LogFormat>().map_err(|e| e.to_string())
}

impl Cli {
    fn into_config(self) -> anyhow::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_toml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => NodeConfig::default(),
        };
        if let Some(network) = self.network {
            if config.port == config.network.default_port() {
                config.port = network.default_port();
            }
            config.network = network;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        config.server_mode |= self.server;
        if !self.seeds.is_empty() {
            config.seed_peers = self.seeds;
        }
        if let Some(max_peers) = self.max_peers {
            config.max_peers = max_peers;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        config.enable_metrics |= self.metrics;
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config()?;
    init_logging(config.log_format, &config.log_level)?;

    tracing::info!(
        network = config.network.as_str(),
        port = config.port,
        seeds = config.seed_peers.len(),
        "configuration loaded"
    );

    let metrics_enabled = config.enable_metrics;
    let mut node = Node::new(config, Arc::new(MemoryStore::new()))?;
    node.start().await?;
    if let Some(addr) = node.listen_addr() {
        tracing::info!(%addr, "accepting peers");
    }

    let shutdown = ShutdownController::new();
    shutdown.wait_for_signal().await?;

    node.stop().await?;
    if metrics_enabled {
        tracing::info!(metrics = %node.metrics().encode()?, "final metrics");
    }
    node.destroy().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(args: &[&str]) -> anyhow::Result<NodeConfig> {
        let argv = std::iter::once("chainwire-daemon").chain(args.iter().copied());
        Cli::try_parse_from(argv)?.into_config()
    }

    #[test]
    fn network_flag_moves_the_default_port() {
        let cfg = config(&[
            "--network",
            "testnet",
            "--seeds",
            "10.0.0.1:18333,10.0.0.2:18333",
        ])
        .unwrap();
        assert_eq!(cfg.network, NetworkId::Testnet);
        assert_eq!(cfg.port, NetworkId::Testnet.default_port());
        assert_eq!(cfg.seed_peers.len(), 2);
    }

    #[test]
    fn explicit_port_wins() {
        let cfg = config(&["--network", "mainnet", "--port", "9000", "--server"]).unwrap();
        assert_eq!(cfg.port, 9000);
        assert!(cfg.server_mode);
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(config(&["--network", "moonnet"]).is_err());
        assert!(config(&["--seeds", "nonsense"]).is_err());
        assert!(config(&["--log-format", "xml"]).is_err());
    }
}
