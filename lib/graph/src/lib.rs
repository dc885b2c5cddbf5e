//! C4/C5: the distributed graph substrate. A [`DistributedGraph`] is the
//! single source of truth an FPMAS process holds for its share of the
//! simulation graph; everything else (sync modes, the distributed move
//! algorithm, the load-balancing driver) operates on it through the public
//! API in this crate rather than touching `local_graph`/`LocationManager`
//! directly.

mod access;
mod breakpoint;
mod distributed_graph;
mod error;
mod location;
mod view;

pub use access::{DataSync, GraphAccess, MutexPolicy, SyncLinker, SyncMode};
pub use breakpoint::GraphBreakpoint;
pub use distributed_graph::{DistributedGraph, ImportReason, NodeEvent};
pub use error::{ErrorKind, Result};
pub use location::LocationManager;
pub use view::GraphView;
