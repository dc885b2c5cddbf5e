//! Persisted graph state (§10.6): grounded in `distributed_graph.h`'s
//! `to_json`/`from_json` pair, which dumps every LOCAL node's payload and
//! every DISTANT node's id/owning rank, plus incident edges and the id
//! allocators, so a rank can resume exactly where it left off. The `io`
//! crate wraps this in actual file I/O; this module only defines the shape
//! and how it round-trips through a [`crate::DistributedGraph`].

use ids::{DistributedId, EdgeStub};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord<T> {
    pub id: DistributedId,
    pub data: T,
    pub weight: f64,
    pub owning_rank: u32,
    pub is_local: bool,
}

/// A full snapshot of one rank's share of the graph, suitable for writing to
/// a breakpoint file and restoring on a later run with the same rank count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphBreakpoint<T> {
    pub rank: u32,
    pub nodes: Vec<NodeRecord<T>>,
    pub edges: Vec<EdgeStub>,
    pub next_node_sequence: u64,
    pub next_edge_sequence: u64,
}
