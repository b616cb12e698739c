//! Wire codecs for gossip messages.
//!
//! The core places no constraints on the encoding beyond field round-trip;
//! the codec owns escaping and integer representation. Two codecs ship by
//! default: self-describing JSON for interoperability and debugging, and
//! bincode for compact datagrams.

use crate::Result;
use murmur_core::GossipMessage;
use std::fmt;
use std::str::FromStr;

/// Message encoder/decoder used by the transports.
pub trait WireCodec: Send + Sync {
    fn encode(&self, msg: &GossipMessage) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<GossipMessage>;
}

/// Human-readable JSON encoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl WireCodec for JsonCodec {
    fn encode(&self, msg: &GossipMessage) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(msg)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<GossipMessage> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Compact binary encoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCodec;

impl WireCodec for BincodeCodec {
    fn encode(&self, msg: &GossipMessage) -> Result<Vec<u8>> {
        Ok(bincode::serialize(msg)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<GossipMessage> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Codec selector for configuration surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecKind {
    #[default]
    Json,
    Bincode,
}

impl CodecKind {
    pub fn build(self) -> std::sync::Arc<dyn WireCodec> {
        match self {
            CodecKind::Json => std::sync::Arc::new(JsonCodec),
            CodecKind::Bincode => std::sync::Arc::new(BincodeCodec),
        }
    }
}

impl FromStr for CodecKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(CodecKind::Json),
            "bincode" => Ok(CodecKind::Bincode),
            _ => Err(format!("Unknown codec: {}", s)),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecKind::Json => write!(f, "json"),
            CodecKind::Bincode => write!(f, "bincode"),
        }
    }
}
