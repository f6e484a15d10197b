//! Network identifier.

use serde::{Deserialize, Serialize};

/// Identifies which Bitcoin network a node talks to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    /// The production network.
    Mainnet,
    /// The public test network.
    Testnet,
    /// Local regression-test network.
    #[default]
    Regtest,
}

impl NetworkId {
    /// Default P2P port for this network.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Mainnet => 8333,
            Self::Testnet => 18333,
            Self::Regtest => 18444,
        }
    }

    /// Start-of-message magic bytes for this network.
    pub fn magic(&self) -> [u8; 4] {
        match self {
            Self::Mainnet => [0xe3, 0xe1, 0xf3, 0xe8],
            Self::Testnet => [0xf4, 0xe5, 0xf3, 0xf4],
            Self::Regtest => [0xda, 0xb5, 0xbf, 0xfa],
        }
    }

    /// Human-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
        }
    }
}
