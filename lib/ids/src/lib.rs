//! Globally unique node/edge identifiers and the two wire-codec tiers every
//! payload type must support to travel across ranks.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A process-originated, totally ordered identifier.
///
/// Each rank owns an independent counter per id kind (node ids, edge ids), so
/// uniqueness across the cluster falls directly out of pairing the counter
/// value with the rank that allocated it. See invariant I2/I5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DistributedId {
    origin_rank: u32,
    sequence: u64,
}

impl DistributedId {
    pub fn new(origin_rank: u32, sequence: u64) -> Self {
        Self {
            origin_rank,
            sequence,
        }
    }

    pub fn origin_rank(&self) -> u32 {
        self.origin_rank
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Display for DistributedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.origin_rank, self.sequence)
    }
}

/// Per-rank allocator for one id kind (nodes, or edges).
///
/// A separate counter is kept per kind so that node ids and edge ids never
/// collide even though they share the `(rank, sequence)` shape.
#[derive(Debug, Default)]
pub struct IdAllocator {
    rank: u32,
    next_sequence: u64,
}

impl IdAllocator {
    pub fn new(rank: u32) -> Self {
        Self {
            rank,
            next_sequence: 0,
        }
    }

    /// Rebuilds an allocator from a breakpoint dump, so ids resumed after a
    /// restore never collide with ones allocated before it.
    pub fn resume(rank: u32, next_sequence: u64) -> Self {
        Self { rank, next_sequence }
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn allocate(&mut self) -> DistributedId {
        let id = DistributedId::new(self.rank, self.next_sequence);
        self.next_sequence += 1;
        id
    }
}

/// Full-codec wire struct for a node: carries the owning rank, payload, and
/// weight. Used whenever a replica must carry actual agent data (repartition
/// exports, ghost data-sync responses, breakpoint dumps).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeUpdatePack<T> {
    pub id: DistributedId,
    pub updated_data: T,
    pub updated_weight: f64,
}

/// Full-codec wire struct carrying only a payload update, without a weight.
/// Used for Hard-mode read/acquire responses, where weight is not part of
/// the mutex's read/write contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataUpdatePack<T> {
    pub id: DistributedId,
    pub updated_data: T,
}

/// Light-codec wire struct: structural fields only, no payload. Used for
/// edges crossing the wire (temporary node stubs) and for id-only messages
/// (unlink, remove-node, ghost-sync requests).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NodeStub {
    pub id: DistributedId,
    pub origin_rank: u32,
}

/// Light-codec wire struct for an edge: endpoints are resolved by id on the
/// receiving side, never by payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeStub {
    pub id: DistributedId,
    pub layer: u32,
    pub weight: f64,
    pub source: NodeStub,
    pub target: NodeStub,
}

/// Payload-update hook every node payload type must support.
///
/// Mirrors `fpmas::synchro::DataUpdate<T>::update`: a move-semantics
/// assignment so large payloads are not copied during imports. The blanket
/// impl covers any `Sized` type; payloads that need custom merge semantics
/// (e.g. accumulating counters instead of overwriting) can override by
/// wrapping `T` in a newtype and implementing this trait directly.
pub trait DataUpdate {
    fn update(&mut self, incoming: Self);
}

impl<T> DataUpdate for T {
    fn update(&mut self, incoming: Self) {
        *self = incoming;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_ordered_by_rank_then_sequence() {
        let a = DistributedId::new(0, 5);
        let b = DistributedId::new(1, 0);
        assert!(a < b);
        assert!(DistributedId::new(0, 4) < a);
    }

    #[test]
    fn allocator_never_repeats() {
        let mut alloc = IdAllocator::new(3);
        let ids: Vec<_> = (0..5).map(|_| alloc.allocate()).collect();
        for pair in ids.windows(2) {
            assert_ne!(pair[0], pair[1]);
            assert!(pair[0] < pair[1]);
        }
        assert!(ids.iter().all(|id| id.origin_rank() == 3));
    }

    #[test]
    fn data_update_is_move_assignment() {
        let mut value = vec![1, 2, 3];
        value.update(vec![4, 5]);
        assert_eq!(value, vec![4, 5]);
    }
}
