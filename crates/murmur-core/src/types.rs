//! Node identity, status, and the per-node view held in the membership table.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Instant;
use uuid::Uuid;

/// Unique identifier for a cluster member.
///
/// Sixteen opaque bytes, compared only for equality. Backed by a UUID for
/// convenient generation and string formatting; any 16-byte value is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Build an id from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Generate a random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Raw 16-byte form.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for NodeId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<[u8; 16]> for NodeId {
    fn from(bytes: [u8; 16]) -> Self {
        Self::from_bytes(bytes)
    }
}

/// Membership state of a node as seen locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Never observed; placeholder before first contact.
    Unknown,
    /// Admitted but not yet heard from directly.
    Joining,
    /// Alive and exchanging messages.
    Online,
    /// Silent past the failure timeout; may still recover.
    Suspect,
    /// Confirmed unavailable; removed only by expiry cleanup.
    Failed,
}

impl NodeStatus {
    /// Whether the node counts as reachable for gossip purposes.
    pub fn is_active(&self) -> bool {
        matches!(self, NodeStatus::Online | NodeStatus::Suspect)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Unknown => "unknown",
            NodeStatus::Joining => "joining",
            NodeStatus::Online => "online",
            NodeStatus::Suspect => "suspect",
            NodeStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Local belief about one cluster member.
///
/// Two monotonic counters order conflicting views of the same node:
/// `heartbeat` proves liveness progress and `config_epoch` carries
/// configuration authority. `seen_time`, `suspicion_count`, and
/// `last_suspected` are local bookkeeping and never travel on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    pub id: NodeId,

    /// Address the transport should use to reach this node.
    pub addr: SocketAddr,

    /// Configuration authority; bumped on role change, never decreases.
    pub config_epoch: u64,

    /// Liveness counter; bumped each tick, never decreases.
    pub heartbeat: u64,

    /// Incremented on every local mutation of this entry.
    pub version: u64,

    /// Last local time a message from or about this node was accepted.
    #[serde(skip, default = "Instant::now")]
    pub seen_time: Instant,

    pub status: NodeStatus,

    /// Opaque role tag, e.g. "primary" or "replica".
    #[serde(default)]
    pub role: String,

    /// Opaque placement tag, e.g. "eu-west-1".
    #[serde(default)]
    pub region: String,

    /// Application metadata propagated with the view.
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Escalation counter for the suspicion state machine.
    #[serde(skip)]
    pub suspicion_count: u32,

    /// Local time suspicion last advanced.
    #[serde(skip, default = "Instant::now")]
    pub last_suspected: Instant,
}

impl NodeView {
    /// Create a view with zeroed counters and `Unknown` status.
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            id,
            addr,
            config_epoch: 0,
            heartbeat: 0,
            version: 0,
            seen_time: now,
            status: NodeStatus::Unknown,
            role: String::new(),
            region: String::new(),
            metadata: HashMap::new(),
            suspicion_count: 0,
            last_suspected: now,
        }
    }

    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Liveness ordering: heartbeat dominates, epoch breaks ties.
    pub fn newer_than(&self, other: &NodeView) -> bool {
        if self.heartbeat != other.heartbeat {
            return self.heartbeat > other.heartbeat;
        }
        self.config_epoch > other.config_epoch
    }

    /// Authority ordering used when merging an incoming view: epoch
    /// dominates, heartbeat breaks ties.
    pub fn can_replace(&self, other: &NodeView) -> bool {
        if self.config_epoch != other.config_epoch {
            return self.config_epoch > other.config_epoch;
        }
        self.heartbeat > other.heartbeat
    }
}
