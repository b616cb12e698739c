//! # murmur-core
//!
//! Deterministic, transport-agnostic core of a SWIM-style gossip membership
//! protocol.
//!
//! This crate provides:
//! - A membership table with version/epoch reconciliation rules
//! - Probabilistic failure detection with suspicion escalation
//! - Anti-entropy peer exchange via piggybacked node views
//! - Explicit meet/join/leave membership operations
//!
//! The core performs no I/O and opens no resources. It is driven by a single
//! logical caller: the application invokes [`GossipEngine::tick`] on a cadence
//! and [`GossipEngine::handle_message`] when the transport delivers a peer
//! message. Outbound traffic leaves through the `SendFn` callback and status
//! transitions are reported through the optional `EventFn` callback.
//!
//! ## Example
//!
//! ```rust
//! use murmur_core::{GossipEngine, NodeId, NodeView};
//!
//! let local = NodeView::new(NodeId::generate(), "127.0.0.1:7946".parse().unwrap());
//! let mut engine = GossipEngine::new(local, Box::new(|_msg, _target| {}), None);
//!
//! // One gossip cycle: nothing to send yet, but the heartbeat advances.
//! engine.tick();
//! assert_eq!(engine.get_stats().known_nodes, 0);
//! assert_eq!(engine.self_view().heartbeat, 1);
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod membership;
pub mod message;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, GossipConfig};
pub use engine::{EventFn, GossipEngine, GossipStats, SendFn};
pub use membership::{Membership, UpsertOutcome};
pub use message::{GossipMessage, MessageType};
pub use types::{NodeId, NodeStatus, NodeView};
