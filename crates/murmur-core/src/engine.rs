//! The gossip engine: periodic tick, message handling, failure detection,
//! and explicit membership operations.
//!
//! The engine assumes a single logical driver. Every entry point is
//! synchronous and CPU-bound; outbound traffic leaves through the send
//! callback, which must not re-enter the engine (queueing the work is fine).

use crate::clock::{Clock, SystemClock};
use crate::config::GossipConfig;
use crate::membership::{Membership, UpsertOutcome};
use crate::message::{GossipMessage, MessageType};
use crate::types::{NodeId, NodeStatus, NodeView};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Delivery request: the engine asks the transport to send `message` to the
/// node described by the target view. Fire-and-forget.
pub type SendFn = Box<dyn FnMut(&GossipMessage, &NodeView) + Send>;

/// Status-change notification carrying the node's new view and the status it
/// held before the transition.
pub type EventFn = Box<dyn FnMut(&NodeView, NodeStatus) + Send>;

/// Read-only counters snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GossipStats {
    pub known_nodes: usize,
    pub sent_messages: u64,
    pub received_messages: u64,
    pub last_tick_duration: Duration,
}

/// SWIM-style membership engine.
pub struct GossipEngine {
    local: NodeView,
    table: Membership,
    config: GossipConfig,
    clock: Arc<dyn Clock + Send + Sync>,
    send_fn: SendFn,
    event_fn: Option<EventFn>,
    sent_messages: u64,
    received_messages: u64,
    last_tick_duration: Duration,
}

impl GossipEngine {
    /// Create an engine with the default configuration and system clock.
    ///
    /// The local view is forced online; its address and identity are taken
    /// as given.
    pub fn new(local: NodeView, send_fn: SendFn, event_fn: Option<EventFn>) -> Self {
        Self::with_config(local, GossipConfig::default(), send_fn, event_fn)
    }

    pub fn with_config(
        mut local: NodeView,
        config: GossipConfig,
        send_fn: SendFn,
        event_fn: Option<EventFn>,
    ) -> Self {
        let clock: Arc<dyn Clock + Send + Sync> = Arc::new(SystemClock);
        local.status = NodeStatus::Online;
        local.seen_time = clock.now();
        Self {
            table: Membership::new(local.id),
            local,
            config,
            clock,
            send_fn,
            event_fn,
            sent_messages: 0,
            received_messages: 0,
            last_tick_duration: Duration::ZERO,
        }
    }

    /// Substitute the time source. Intended for tests and simulations.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.local.seen_time = clock.now();
        self.clock = clock;
        self
    }

    /// Drive one gossip cycle: ping a random fanout of peers, advance the
    /// local heartbeat, then run the failure-detection pass.
    pub fn tick(&mut self) {
        let start = self.clock.now();
        self.local.seen_time = start;

        // Pings carry the pre-increment heartbeat.
        let targets = self.table.select_random_peers(self.config.gossip_fanout, None);
        for target in &targets {
            let msg = self.exchange_message(MessageType::Ping, target.id);
            self.send(&msg, target);
        }

        self.local.heartbeat += 1;
        self.local.version += 1;

        self.detect_failures();

        self.last_tick_duration = self.clock.now().saturating_duration_since(start);
    }

    /// Like [`tick`](Self::tick), but pings every online peer instead of a
    /// random fanout. Used to push critical configuration changes quickly.
    pub fn tick_full_broadcast(&mut self) {
        let start = self.clock.now();
        self.local.seen_time = start;

        let targets: Vec<NodeView> = self
            .table
            .iter()
            .filter(|n| n.status == NodeStatus::Online)
            .cloned()
            .collect();
        for target in &targets {
            let msg = self.exchange_message(MessageType::Ping, target.id);
            self.send(&msg, target);
        }

        self.local.heartbeat += 1;
        self.local.version += 1;

        self.detect_failures();

        self.last_tick_duration = self.clock.now().saturating_duration_since(start);
    }

    /// Process one received gossip message.
    ///
    /// `recv_time` is the local time the message arrived; it feeds failure
    /// detection, so the transport should stamp it as close to the socket as
    /// possible.
    pub fn handle_message(&mut self, msg: &GossipMessage, recv_time: Instant) {
        self.received_messages += 1;

        let mut sender_known = self.table.get(&msg.sender).is_some();

        // An unknown sender may only introduce itself through an admission
        // message that carries its own view. Anything else is hearsay.
        if !sender_known && msg.kind.is_admission() {
            if let Some(entry) = msg.entries.iter().find(|e| e.id == msg.sender) {
                if let Some(outcome) = self.table.upsert(entry, recv_time) {
                    self.publish(outcome);
                    sender_known = true;
                }
            }
        }
        if !sender_known && !msg.kind.is_admission() {
            debug!("Discarding {:?} from unknown sender {}", msg.kind, msg.sender);
            return;
        }

        // Update the sender's entry before merging its piggybacked views, so
        // the sender's own transition is reported first.
        if sender_known {
            let mut transitions: Vec<(NodeView, NodeStatus)> = Vec::new();
            if let Some(node) = self.table.get_mut(&msg.sender) {
                if msg.timestamp > node.heartbeat {
                    node.heartbeat = msg.timestamp;
                }
                node.seen_time = recv_time;
                node.version += 1;

                // Hearing from a suspect stops the escalation countdown.
                if node.status == NodeStatus::Suspect {
                    node.suspicion_count = 0;
                }

                if node.status == NodeStatus::Joining {
                    node.status = NodeStatus::Online;
                    transitions.push((node.clone(), NodeStatus::Joining));
                }

                if msg.kind == MessageType::Leave && node.status != NodeStatus::Failed {
                    let old = node.status;
                    node.status = NodeStatus::Failed;
                    info!("Node {} left the cluster", node.id);
                    transitions.push((node.clone(), old));
                }
            }
            for (view, old) in transitions {
                self.notify(&view, old);
            }
        }

        // Anti-entropy merge of the piggybacked views.
        for entry in &msg.entries {
            if let Some(outcome) = self.table.upsert(entry, recv_time) {
                self.publish(outcome);
            }
        }

        if msg.kind.expects_reply() && sender_known {
            if let Some(target) = self.table.get(&msg.sender).cloned() {
                let reply = self.exchange_message(MessageType::Pong, msg.sender);
                self.send(&reply, &target);
            }
        }
    }

    /// Introduce a node to the cluster (discovery handshake).
    pub fn meet(&mut self, node: &NodeView) {
        self.admit(node, MessageType::Meet);
    }

    /// Explicitly admit a node. Behaviorally identical to [`meet`](Self::meet)
    /// today; the separate verb is kept for future authenticated admission.
    pub fn join(&mut self, node: &NodeView) {
        self.admit(node, MessageType::Join);
    }

    fn admit(&mut self, node: &NodeView, kind: MessageType) {
        if node.id == self.local.id {
            return;
        }

        if self.table.get(&node.id).is_none() {
            let candidate = node.clone().with_status(NodeStatus::Joining);
            if let Some(outcome) = self.table.upsert(&candidate, self.clock.now()) {
                self.publish(outcome);
            }
        }

        let msg = GossipMessage::new(kind, self.local.id, self.local.heartbeat)
            .with_entries(vec![self.local.clone()]);
        self.send(&msg, node);
    }

    /// Announce the departure of a known peer and mark it failed locally.
    ///
    /// The notice goes to every online peer other than the leaver. The entry
    /// stays in the table until expiry cleanup removes it. Unknown ids are
    /// ignored, which also makes a self-leave a no-op: the local node never
    /// appears in the peer table.
    pub fn leave(&mut self, node_id: NodeId) {
        let Some(leaver) = self.table.get(&node_id).cloned() else {
            return;
        };

        let msg = GossipMessage::new(MessageType::Leave, self.local.id, self.local.heartbeat)
            .with_entries(vec![leaver]);
        let targets: Vec<NodeView> = self
            .table
            .iter()
            .filter(|n| n.status == NodeStatus::Online && n.id != node_id)
            .cloned()
            .collect();
        for target in &targets {
            self.send(&msg, target);
        }

        if let Some(node) = self.table.get_mut(&node_id) {
            let old = node.status;
            if old != NodeStatus::Failed {
                node.status = NodeStatus::Failed;
                let view = node.clone();
                info!("Node {} marked failed after leave", node_id);
                self.notify(&view, old);
            }
        }
    }

    /// Attach or replace a metadata entry on the local view.
    pub fn set_local_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.local.metadata.insert(key.into(), value.into());
        self.local.version += 1;
    }

    /// Change the local role tag. Bumps the config epoch so the new role
    /// wins reconciliation everywhere; pair with
    /// [`tick_full_broadcast`](Self::tick_full_broadcast) to spread it fast.
    pub fn set_local_role(&mut self, role: impl Into<String>) {
        self.local.role = role.into();
        self.local.config_epoch += 1;
        self.local.version += 1;
    }

    /// The local node's own view.
    pub fn self_view(&self) -> &NodeView {
        &self.local
    }

    /// Number of known peers (excluding self).
    pub fn size(&self) -> usize {
        self.table.len()
    }

    /// Snapshot of all known peer views.
    pub fn get_nodes(&self) -> Vec<NodeView> {
        self.table.iter().cloned().collect()
    }

    /// Find a node by id, including the local node.
    pub fn find_node(&self, id: &NodeId) -> Option<NodeView> {
        if *id == self.local.id {
            return Some(self.local.clone());
        }
        self.table.get(id).cloned()
    }

    /// Remove peers that are not online and have been silent longer than
    /// `timeout`.
    pub fn cleanup_expired(&mut self, timeout: Duration) {
        let now = self.clock.now();
        let removed = self.table.cleanup_expired(timeout, now);
        if removed > 0 {
            info!("Expired {} stale nodes", removed);
        }
    }

    /// Clear all peers and restart the local counters. Intended for tests
    /// and clean restarts.
    pub fn reset(&mut self) {
        self.table.clear();
        self.local.heartbeat = 1;
        self.local.version = 0;
        self.local.seen_time = self.clock.now();
        self.sent_messages = 0;
        self.received_messages = 0;
        self.last_tick_duration = Duration::ZERO;
    }

    pub fn get_stats(&self) -> GossipStats {
        GossipStats {
            known_nodes: self.table.len(),
            sent_messages: self.sent_messages,
            received_messages: self.received_messages,
            last_tick_duration: self.last_tick_duration,
        }
    }

    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    /// Direct access to the membership table, mainly for inspection.
    pub fn membership(&self) -> &Membership {
        &self.table
    }

    /// Build an exchange message: the local self-view plus an anti-entropy
    /// sample of peers, excluding the target itself.
    fn exchange_message(&self, kind: MessageType, exclude: NodeId) -> GossipMessage {
        let mut entries = Vec::with_capacity(self.config.sync_fanout + 1);
        entries.push(self.local.clone());
        entries.extend(
            self.table
                .select_random_peers(self.config.sync_fanout, Some(exclude)),
        );
        GossipMessage::new(kind, self.local.id, self.local.heartbeat).with_entries(entries)
    }

    fn send(&mut self, msg: &GossipMessage, target: &NodeView) {
        (self.send_fn)(msg, target);
        self.sent_messages += 1;
    }

    /// Failure-detection pass: silent online peers become suspect, and
    /// suspicion escalates at most once per failure timeout until the
    /// threshold tips the peer into failed.
    fn detect_failures(&mut self) {
        let now = self.clock.now();
        let timeout = self.config.failure_timeout;
        let threshold = self.config.suspicion_threshold;

        let mut transitions: Vec<(NodeView, NodeStatus)> = Vec::new();
        for node in self.table.iter_mut() {
            match node.status {
                NodeStatus::Online => {
                    if now.saturating_duration_since(node.seen_time) >= timeout {
                        node.status = NodeStatus::Suspect;
                        node.suspicion_count = 1;
                        node.last_suspected = now;
                        warn!("Node {} suspected after silence", node.id);
                        transitions.push((node.clone(), NodeStatus::Online));
                    }
                }
                NodeStatus::Suspect => {
                    if now.saturating_duration_since(node.last_suspected) >= timeout {
                        node.suspicion_count += 1;
                        node.last_suspected = now;
                        if node.suspicion_count > threshold {
                            node.status = NodeStatus::Failed;
                            warn!("Node {} confirmed failed", node.id);
                            transitions.push((node.clone(), NodeStatus::Suspect));
                        }
                    }
                }
                _ => {}
            }
        }
        for (view, old) in transitions {
            self.notify(&view, old);
        }
    }

    fn publish(&mut self, outcome: UpsertOutcome) {
        if let Some(old) = outcome.previous {
            self.notify(&outcome.view, old);
        }
    }

    fn notify(&mut self, node: &NodeView, old_status: NodeStatus) {
        if node.status == old_status {
            return;
        }
        if let Some(event_fn) = self.event_fn.as_mut() {
            event_fn(node, old_status);
        }
    }
}

impl std::fmt::Debug for GossipEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GossipEngine")
            .field("local", &self.local.id)
            .field("known_nodes", &self.table.len())
            .field("sent_messages", &self.sent_messages)
            .field("received_messages", &self.received_messages)
            .finish_non_exhaustive()
    }
}
