//! Block fetcher configuration.

use crate::network::Network;
use crate::point::ChainPoint;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Default relay used when neither an address nor a socket path is given.
pub const DEFAULT_ADDRESS: &str = "backbone.cardano.iog.io:3001";
/// Payload type announced in the `FIRE INIT` line.
pub const DEFAULT_BLOCK_TYPE_URL: &str = "type.googleapis.com/sf.cardano.type.v1.Block";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid network specified: {0}")]
    UnknownNetwork(String),

    #[error("failed to decode start hash {hash}: {source}")]
    InvalidStartHash {
        hash: String,
        #[source]
        source: hex::FromHexError,
    },

    #[error("no node address or socket path configured")]
    NoTransport,
}

/// Block fetcher configuration, already resolved from flags/env by the caller.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Node-to-node TCP address (`host:port`). Takes precedence over `socket_path`.
    pub address: Option<String>,
    /// Node-to-client unix socket of a local node.
    pub socket_path: Option<PathBuf>,
    /// Network name: mainnet, preview, preprod.
    pub network: String,
    /// Network magic; 0 resolves it from `network`.
    pub network_magic: u32,
    /// Chain-sync pipelining depth handed to the protocol client.
    pub pipeline_limit: u32,
    /// Start slot (0 = not set).
    pub start_slot: u64,
    /// Start block hash, hex (None = not set).
    pub start_hash: Option<String>,
    /// Checkpoint file for resumable cursor state.
    pub cursor_file: Option<PathBuf>,
    /// Payload type announced in `FIRE INIT`.
    pub block_type_url: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            address: Some(DEFAULT_ADDRESS.to_string()),
            socket_path: None,
            network: "mainnet".to_string(),
            network_magic: 0,
            pipeline_limit: 10,
            start_slot: 0,
            start_hash: None,
            cursor_file: None,
            block_type_url: DEFAULT_BLOCK_TYPE_URL.to_string(),
        }
    }
}

impl FetcherConfig {
    /// Resolve the network identity (name + magic + slot timing).
    pub fn resolve_network(&self) -> Result<Network, ConfigError> {
        Network::resolve(&self.network, self.network_magic)
    }

    /// Pick the transport: an address (node-to-node) wins over a socket path (node-to-client).
    pub fn transport(&self) -> Result<Transport, ConfigError> {
        match (&self.address, &self.socket_path) {
            (Some(address), _) if !address.is_empty() => Ok(Transport::Tcp(address.clone())),
            (_, Some(path)) => Ok(Transport::Unix(path.clone())),
            _ => Err(ConfigError::NoTransport),
        }
    }

    /// The operator-configured start point, if both slot and hash are set.
    pub fn start_point(&self) -> Result<Option<ChainPoint>, ConfigError> {
        let hash = match self.start_hash.as_deref() {
            Some(h) if !h.is_empty() && self.start_slot != 0 => h,
            _ => return Ok(None),
        };
        ChainPoint::from_hex(self.start_slot, hash)
            .map(Some)
            .map_err(|source| ConfigError::InvalidStartHash {
                hash: hash.to_string(),
                source,
            })
    }
}

/// How to reach the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Tcp(String),
    Unix(PathBuf),
}

impl Transport {
    /// TCP peers speak node-to-node; a local socket speaks node-to-client.
    pub fn is_node_to_node(&self) -> bool {
        matches!(self, Transport::Tcp(_))
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp(address) => write!(f, "[tcp] {}", address),
            Transport::Unix(path) => write!(f, "[unix] {}", path.display()),
        }
    }
}
