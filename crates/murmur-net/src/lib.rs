//! # murmur-net
//!
//! Network collaborators for the murmur gossip core: pluggable wire codecs,
//! UDP and TCP transports, and [`GossipNode`], the async driver that owns a
//! [`murmur_core::GossipEngine`] and serializes all access to it on a single
//! task.
//!
//! The core itself performs no I/O; everything that touches a socket lives
//! here.

use thiserror::Error;

pub mod codec;
pub mod node;
pub mod transport;

pub use codec::{BincodeCodec, CodecKind, JsonCodec, WireCodec};
pub use node::{GossipNode, GossipNodeBuilder, MemberEvent, SeedAddr};
pub use transport::{TcpTransport, Transport, TransportKind, UdpTransport};

/// Result type for network operations.
pub type Result<T> = std::result::Result<T, NetError>;

/// Errors that can occur in the network layer.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("Network error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Binary codec error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid seed address: {0}")]
    InvalidSeed(String),

    #[error("Configuration error: {0}")]
    Config(#[from] murmur_core::ConfigError),

    #[error("Node is not running")]
    NotRunning,
}
