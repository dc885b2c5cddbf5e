//! Location Manager (C5): the per-node `id -> owning rank` mapping.
//!
//! Grounded on `distributed_graph.h`'s `location_manager` field: the graph
//! itself only ever asks "who owns this id", "which nodes do I manage", and
//! "refresh your view of ownership" — everything else (import/export
//! bookkeeping) is driven from `DistributedGraph` directly.

use std::collections::{HashMap, HashSet};

use ids::DistributedId;

#[derive(Debug, Default)]
pub struct LocationManager {
    /// Every id this rank currently tracks the owner of — a superset of
    /// `local_nodes`/`distant_nodes` restricted to nodes physically present
    /// here.
    owning_rank: HashMap<DistributedId, u32>,
    local_nodes: HashSet<DistributedId>,
    distant_nodes: HashSet<DistributedId>,
}

impl LocationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn location(&self, id: DistributedId) -> Option<u32> {
        self.owning_rank.get(&id).copied()
    }

    pub fn is_local(&self, id: DistributedId) -> bool {
        self.local_nodes.contains(&id)
    }

    pub fn is_distant(&self, id: DistributedId) -> bool {
        self.distant_nodes.contains(&id)
    }

    pub fn local_nodes(&self) -> impl Iterator<Item = DistributedId> + '_ {
        self.local_nodes.iter().copied()
    }

    pub fn distant_nodes(&self) -> impl Iterator<Item = DistributedId> + '_ {
        self.distant_nodes.iter().copied()
    }

    pub fn set_local(&mut self, id: DistributedId, rank: u32) {
        self.distant_nodes.remove(&id);
        self.local_nodes.insert(id);
        self.owning_rank.insert(id, rank);
    }

    pub fn set_distant(&mut self, id: DistributedId, owning_rank: u32) {
        self.local_nodes.remove(&id);
        self.distant_nodes.insert(id);
        self.owning_rank.insert(id, owning_rank);
    }

    pub fn forget(&mut self, id: DistributedId) {
        self.local_nodes.remove(&id);
        self.distant_nodes.remove(&id);
        self.owning_rank.remove(&id);
    }

    /// Applies a fresh `id -> rank` view received from an `update_locations`
    /// all-gather round (called by `DistributedGraph::distribute` after the
    /// repartition exchange).
    pub fn apply_updates(&mut self, updates: impl IntoIterator<Item = (DistributedId, u32)>) {
        for (id, rank) in updates {
            if self.owning_rank.contains_key(&id) {
                self.owning_rank.insert(id, rank);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(seq: u64) -> DistributedId {
        DistributedId::new(0, seq)
    }

    #[test]
    fn transitions_between_local_and_distant() {
        let mut loc = LocationManager::new();
        loc.set_local(id(0), 0);
        assert!(loc.is_local(id(0)));
        assert_eq!(loc.location(id(0)), Some(0));

        loc.set_distant(id(0), 2);
        assert!(loc.is_distant(id(0)));
        assert!(!loc.is_local(id(0)));
        assert_eq!(loc.location(id(0)), Some(2));
    }

    #[test]
    fn forget_clears_all_state() {
        let mut loc = LocationManager::new();
        loc.set_local(id(1), 0);
        loc.forget(id(1));
        assert_eq!(loc.location(id(1)), None);
        assert!(!loc.is_local(id(1)));
    }
}
