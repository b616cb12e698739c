//! The membership table: every known peer view, keyed by node id.
//!
//! The table never stores the local node's own view; the engine keeps that
//! separately. All merge decisions go through `can_replace`, so counters for
//! a given id never move backwards.

use crate::types::{NodeId, NodeStatus, NodeView};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Result of merging a remote view into the table.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    /// The table entry after the merge.
    pub view: NodeView,

    /// The status the entry held before the merge, when the merge actually
    /// changed it. `None` means no observable transition happened.
    pub previous: Option<NodeStatus>,
}

/// All known peers, excluding self.
#[derive(Debug)]
pub struct Membership {
    local_id: NodeId,
    nodes: HashMap<NodeId, NodeView>,
}

impl Membership {
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            nodes: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Exact-match lookup of a peer view.
    pub fn get(&self, id: &NodeId) -> Option<&NodeView> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut NodeView> {
        self.nodes.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeView> {
        self.nodes.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut NodeView> {
        self.nodes.values_mut()
    }

    /// Merge a remote view into the table.
    ///
    /// New ids are inserted as-is except that `Unknown` status is rewritten
    /// to `Joining`. Existing entries are overwritten wholesale only when the
    /// incoming view wins the `can_replace` ordering; an inferior view leaves
    /// the entry untouched. `seen_time` always becomes the supplied receive
    /// time on an applied merge.
    ///
    /// Views carrying the local id are ignored: the self-view never lives in
    /// the peer table, even when a peer echoes it back.
    pub fn upsert(&mut self, remote: &NodeView, seen_time: Instant) -> Option<UpsertOutcome> {
        if remote.id == self.local_id {
            return None;
        }

        match self.nodes.get_mut(&remote.id) {
            None => {
                let mut view = remote.clone();
                view.seen_time = seen_time;
                if view.status == NodeStatus::Unknown {
                    view.status = NodeStatus::Joining;
                }
                debug!("Added node {} as {}", view.id, view.status);
                self.nodes.insert(view.id, view.clone());
                Some(UpsertOutcome {
                    view,
                    previous: Some(NodeStatus::Unknown),
                })
            }
            Some(current) => {
                let old_status = current.status;
                if remote.can_replace(current) {
                    *current = remote.clone();
                    current.seen_time = seen_time;
                    if current.status == NodeStatus::Unknown {
                        current.status = NodeStatus::Joining;
                    }
                    debug!(
                        "Replaced view of {} (epoch {}, heartbeat {})",
                        current.id, current.config_epoch, current.heartbeat
                    );
                }
                let previous = (current.status != old_status).then_some(old_status);
                Some(UpsertOutcome {
                    view: current.clone(),
                    previous,
                })
            }
        }
    }

    /// Remove every peer that is not online and has not been seen within
    /// `timeout` of `now`. Returns the number of entries dropped.
    pub fn cleanup_expired(&mut self, timeout: Duration, now: Instant) -> usize {
        let before = self.nodes.len();
        self.nodes.retain(|id, node| {
            let stale = node.status != NodeStatus::Online
                && now.saturating_duration_since(node.seen_time) > timeout;
            if stale {
                debug!("Expiring node {} in state {}", id, node.status);
            }
            !stale
        });
        before - self.nodes.len()
    }

    /// Drop all peers.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Sample up to `k` peer views uniformly without replacement, optionally
    /// excluding one id. Freshly seeded entropy per call; suspect and failed
    /// peers are eligible, higher-level policy decides what to do with them.
    pub fn select_random_peers(&self, k: usize, exclude: Option<NodeId>) -> Vec<NodeView> {
        let mut candidates: Vec<&NodeView> = self
            .nodes
            .values()
            .filter(|n| exclude.map_or(true, |ex| n.id != ex))
            .collect();

        let mut rng = rand::thread_rng();
        candidates.shuffle(&mut rng);
        candidates.into_iter().take(k).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use std::net::SocketAddr;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    fn view(byte: u8) -> NodeView {
        NodeView::new(NodeId::from_bytes([byte; 16]), addr(7000 + byte as u16))
    }

    #[test]
    fn insert_coerces_unknown_to_joining() {
        let mut table = Membership::new(NodeId::from_bytes([0; 16]));
        let outcome = table.upsert(&view(1), Instant::now()).unwrap();

        assert_eq!(outcome.view.status, NodeStatus::Joining);
        assert_eq!(outcome.previous, Some(NodeStatus::Unknown));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn insert_keeps_asserted_status() {
        let mut table = Membership::new(NodeId::from_bytes([0; 16]));
        let remote = view(1).with_status(NodeStatus::Online);
        let outcome = table.upsert(&remote, Instant::now()).unwrap();

        assert_eq!(outcome.view.status, NodeStatus::Online);
        assert_eq!(outcome.previous, Some(NodeStatus::Unknown));
    }

    #[test]
    fn self_view_is_never_stored() {
        let local = NodeId::from_bytes([9; 16]);
        let mut table = Membership::new(local);
        let echo = NodeView::new(local, addr(7009)).with_status(NodeStatus::Online);

        assert!(table.upsert(&echo, Instant::now()).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn inferior_view_is_identity() {
        let mut table = Membership::new(NodeId::from_bytes([0; 16]));
        let mut remote = view(1).with_status(NodeStatus::Online);
        remote.heartbeat = 100;
        table.upsert(&remote, Instant::now());

        let mut stale = remote.clone();
        stale.heartbeat = 50;
        stale.status = NodeStatus::Suspect;
        let outcome = table.upsert(&stale, Instant::now()).unwrap();

        assert_eq!(outcome.previous, None);
        let stored = table.get(&remote.id).unwrap();
        assert_eq!(stored.heartbeat, 100);
        assert_eq!(stored.status, NodeStatus::Online);
    }

    #[test]
    fn superior_view_replaces_wholesale() {
        let mut table = Membership::new(NodeId::from_bytes([0; 16]));
        let mut remote = view(1);
        remote.heartbeat = 5;
        table.upsert(&remote, Instant::now());

        let mut fresh = remote.clone().with_status(NodeStatus::Online);
        fresh.heartbeat = 6;
        fresh.role = "primary".into();
        let seen = Instant::now();
        let outcome = table.upsert(&fresh, seen).unwrap();

        assert_eq!(outcome.previous, Some(NodeStatus::Joining));
        let stored = table.get(&remote.id).unwrap();
        assert_eq!(stored.heartbeat, 6);
        assert_eq!(stored.role, "primary");
        assert_eq!(stored.status, NodeStatus::Online);
        assert_eq!(stored.seen_time, seen);
    }

    #[test]
    fn higher_epoch_wins_despite_lower_heartbeat() {
        let mut table = Membership::new(NodeId::from_bytes([0; 16]));
        let mut remote = view(1);
        remote.heartbeat = 100;
        remote.config_epoch = 1;
        table.upsert(&remote, Instant::now());

        let mut promoted = remote.clone();
        promoted.heartbeat = 10;
        promoted.config_epoch = 2;
        table.upsert(&promoted, Instant::now());

        let stored = table.get(&remote.id).unwrap();
        assert_eq!(stored.config_epoch, 2);
        assert_eq!(stored.heartbeat, 10);
    }

    #[test]
    fn one_entry_per_id() {
        let mut table = Membership::new(NodeId::from_bytes([0; 16]));
        for hb in 0..10 {
            let mut v = view(1);
            v.heartbeat = hb;
            table.upsert(&v, Instant::now());
        }
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn cleanup_spares_online_and_fresh_nodes() {
        let mut table = Membership::new(NodeId::from_bytes([0; 16]));
        let now = Instant::now();

        table.upsert(&view(1).with_status(NodeStatus::Online), now);
        table.upsert(&view(2).with_status(NodeStatus::Failed), now);
        table.upsert(&view(3).with_status(NodeStatus::Failed), now + Duration::from_secs(90));

        let removed = table.cleanup_expired(Duration::from_secs(60), now + Duration::from_secs(120));
        assert_eq!(removed, 1);
        assert!(table.get(&view(1).id).is_some());
        assert!(table.get(&view(2).id).is_none());
        assert!(table.get(&view(3).id).is_some());
    }

    #[test]
    fn selection_respects_bounds_and_exclusion() {
        let mut table = Membership::new(NodeId::from_bytes([0; 16]));
        for byte in 1..=5 {
            table.upsert(&view(byte), Instant::now());
        }

        assert_eq!(table.select_random_peers(3, None).len(), 3);
        assert_eq!(table.select_random_peers(10, None).len(), 5);
        assert!(table.select_random_peers(0, None).is_empty());

        let excluded = view(3).id;
        for _ in 0..50 {
            let picked = table.select_random_peers(4, Some(excluded));
            assert_eq!(picked.len(), 4);
            assert!(picked.iter().all(|n| n.id != excluded));
        }
    }

    #[test]
    fn selection_does_not_filter_by_status() {
        let mut table = Membership::new(NodeId::from_bytes([0; 16]));
        table.upsert(&view(1).with_status(NodeStatus::Failed), Instant::now());
        table.upsert(&view(2).with_status(NodeStatus::Suspect), Instant::now());

        let picked = table.select_random_peers(2, None);
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn selection_is_roughly_uniform() {
        let mut table = Membership::new(NodeId::from_bytes([0; 16]));
        for byte in 1..=3 {
            table.upsert(&view(byte), Instant::now());
        }

        let mut counts: StdHashMap<NodeId, usize> = StdHashMap::new();
        for _ in 0..600 {
            for picked in table.select_random_peers(1, None) {
                *counts.entry(picked.id).or_default() += 1;
            }
        }

        // Expected 200 each; allow a generous band so the test never flakes.
        assert_eq!(counts.len(), 3);
        for (&id, &count) in &counts {
            assert!(
                (100..=300).contains(&count),
                "node {} selected {} times out of 600",
                id,
                count
            );
        }
    }
}
