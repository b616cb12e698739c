//! Gossip message types exchanged between peers.
//!
//! The core is format-agnostic: these types define the only wire-level
//! contract. A codec collaborator owns the actual encoding.

use crate::types::{NodeId, NodeView};
use serde::{Deserialize, Serialize};

/// Kind of gossip message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Periodic liveness probe with piggybacked views.
    Ping,
    /// Reply to ping/meet/join.
    Pong,
    /// Introduce a new node (discovery).
    Meet,
    /// Explicit cluster admission.
    Join,
    /// Departure notice for the node carried in `entries`.
    Leave,
    /// Metadata refresh without probe semantics.
    Update,
}

impl MessageType {
    /// Whether this message kind may admit a previously unknown sender.
    ///
    /// Everything else from an unknown sender is hearsay and gets dropped.
    pub fn is_admission(&self) -> bool {
        matches!(self, MessageType::Meet | MessageType::Join)
    }

    /// Whether the receiver answers with a pong.
    pub fn expects_reply(&self) -> bool {
        matches!(self, MessageType::Ping | MessageType::Meet | MessageType::Join)
    }
}

/// One gossip exchange unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GossipMessage {
    /// Id of the originating node.
    pub sender: NodeId,

    pub kind: MessageType,

    /// The sender's heartbeat at send time.
    pub timestamp: u64,

    /// Piggybacked node views: the sender's self-view and/or a small
    /// anti-entropy sample of peers it knows.
    pub entries: Vec<NodeView>,
}

impl GossipMessage {
    pub fn new(kind: MessageType, sender: NodeId, timestamp: u64) -> Self {
        Self {
            sender,
            kind,
            timestamp,
            entries: Vec::new(),
        }
    }

    pub fn with_entries(mut self, entries: Vec<NodeView>) -> Self {
        self.entries = entries;
        self
    }
}
