//! The narrow surface a sync mode (C6/C7, implemented in the `sync` crate)
//! needs from a [`crate::DistributedGraph`], expressed as a trait
//! implemented by a short-lived [`crate::view::GraphView`] rather than by
//! `DistributedGraph` itself. `DistributedGraph<T, S>` owns both its graph
//! state and its `S: SyncMode<T>`; if sync-mode methods borrowed
//! `&DistributedGraph<T, S>` directly, calling them from a method that also
//! holds `&mut self.sync_mode` would alias the same `self`. Building a view
//! over the disjoint non-sync-mode fields before each call sidesteps that
//! without any interior mutability.

use std::sync::Arc;

use async_trait::async_trait;
use comm::Communicator;
use ids::DistributedId;

use crate::error::{ErrorKind, Result};

/// Operations a sync mode needs to read and mutate graph state without
/// knowing how the graph is templated over its own type.
pub trait GraphAccess<T>: Send {
    fn rank(&self) -> u32;
    fn comm(&self) -> &Arc<dyn Communicator>;

    fn distant_node_ids(&self) -> Vec<DistributedId>;
    fn local_node_ids(&self) -> Vec<DistributedId>;
    fn owning_rank(&self, id: DistributedId) -> Option<u32>;

    fn node_payload(&self, id: DistributedId) -> Option<&T>;
    fn node_weight(&self, id: DistributedId) -> Option<f64>;

    /// Overwrites a DISTANT replica's payload/weight with a fresher value
    /// received from its owner (ghost data sync, C7), or a LOCAL node's
    /// payload after a Hard-mode `release_acquire` writeback.
    fn apply_node_update(&mut self, id: DistributedId, data: T, weight: f64) -> Result<()>;

    /// `import_node` (§4.4): merges an incoming node into the local graph.
    fn import_node(
        &mut self,
        id: DistributedId,
        origin_rank: u32,
        data: T,
        weight: f64,
    ) -> Result<()>;

    /// `import_edge` (§4.4): merges an incoming edge, materializing a
    /// placeholder DISTANT node for either endpoint if it is not already
    /// known locally.
    #[allow(clippy::too_many_arguments)]
    fn import_edge(
        &mut self,
        id: DistributedId,
        layer: u32,
        weight: f64,
        source: DistributedId,
        source_origin: u32,
        target: DistributedId,
        target_origin: u32,
    ) -> Result<()>;

    fn local_unlink(&mut self, id: DistributedId) -> Result<()>;
    fn local_erase_node(&mut self, id: DistributedId) -> Result<()>;
    fn incident_edges(&self, id: DistributedId) -> Vec<DistributedId>;
    fn edge_endpoints(&self, id: DistributedId) -> Option<(DistributedId, DistributedId)>;
    /// `(layer, weight)`, needed by sync linkers to rebuild a wire-format
    /// edge stub without reaching into `local_graph` directly.
    fn edge_layer_weight(&self, id: DistributedId) -> Option<(u32, f64)>;

    fn mark_unsynchronized(&mut self, id: DistributedId);
    fn clear_unsynchronized(&mut self, id: DistributedId);
}

/// C6: the mutex discipline for every node, keyed internally by id. A
/// single policy object per sync mode (rather than one object per node)
/// because the two things that need per-node state — Global Ghost's
/// snapshot copy, Hard mode's lock bookkeeping — are just as naturally
/// modeled as maps inside the policy as a `HashMap` of little objects
/// would be, and a single object avoids threading a mutex-construction
/// callback through `build_node`.
#[async_trait]
pub trait MutexPolicy<T: Clone + Send + Sync>: Send + Sync {
    async fn read(&mut self, graph: &dyn GraphAccess<T>, id: DistributedId) -> Result<T>;
    async fn release_read(&mut self, graph: &dyn GraphAccess<T>, id: DistributedId) -> Result<()>;
    async fn acquire(&mut self, graph: &dyn GraphAccess<T>, id: DistributedId) -> Result<T>;
    async fn release_acquire(
        &mut self,
        graph: &mut dyn GraphAccess<T>,
        id: DistributedId,
        updated: T,
    ) -> Result<()>;
    async fn lock(&mut self, graph: &dyn GraphAccess<T>, id: DistributedId) -> Result<()>;
    async fn unlock(&mut self, graph: &dyn GraphAccess<T>, id: DistributedId) -> Result<()>;
    async fn lock_shared(&mut self, graph: &dyn GraphAccess<T>, id: DistributedId) -> Result<()>;
    async fn unlock_shared(&mut self, graph: &dyn GraphAccess<T>, id: DistributedId) -> Result<()>;

    /// Called once per node during a full `synchronize()` round, after data
    /// sync has refreshed DISTANT payloads: Global Ghost uses this to pull
    /// the node's current value into its snapshot; Ghost and Hard leave it
    /// a no-op.
    fn on_synchronize(&mut self, graph: &dyn GraphAccess<T>, id: DistributedId);

    /// Drops any per-node bookkeeping kept for `id` (called when a node is
    /// erased).
    fn forget(&mut self, id: DistributedId);

    /// Services any incoming mutex traffic addressed to this rank without
    /// waiting on a request of our own. Ghost and Global Ghost have no
    /// mutex server to run (their `read`/`acquire` never leave the
    /// process), so the default is a no-op; Hard mode overrides this to
    /// answer Read/Acquire/Lock/LockShared requests that arrived while the
    /// owner wasn't itself blocked on a remote call of its own. An
    /// application driving a Hard-mode graph should call
    /// [`crate::DistributedGraph::service_mutex`] from its own idle loop
    /// the same way a dedicated mutex-server thread would in the original.
    async fn service(&mut self, _graph: &dyn GraphAccess<T>) -> Result<()> {
        Ok(())
    }
}

/// C7 data-sync half of a sync mode: refreshes DISTANT replica payloads.
#[async_trait]
pub trait DataSync<T: Send + Sync>: Send + Sync {
    /// Full round: refresh every DISTANT node's payload from its owner.
    async fn synchronize_all(&mut self, graph: &mut dyn GraphAccess<T>) -> Result<()>;

    /// Scoped round: refresh only the given subset (used by `distribute`
    /// right after importing new replicas).
    async fn synchronize_nodes(
        &mut self,
        graph: &mut dyn GraphAccess<T>,
        nodes: &[DistributedId],
    ) -> Result<()>;

    /// Applies any incoming writebacks addressed to this rank's own nodes
    /// without running a full barrier. A no-op for Ghost/Global Ghost
    /// (their writebacks only ever arrive as part of a `synchronize_all`
    /// round); Hard mode overrides this to apply `ReleaseAcquire` payloads
    /// that arrived while this rank wasn't itself synchronizing, paired
    /// with [`MutexPolicy::service`] in
    /// [`crate::DistributedGraph::service`].
    async fn service(&mut self, _graph: &mut dyn GraphAccess<T>) -> Result<()> {
        Ok(())
    }
}

/// C7 sync-linker half of a sync mode: propagates link/unlink/remove-node
/// across ranks.
#[async_trait]
pub trait SyncLinker<T: Send + Sync>: Send + Sync {
    /// Called by `DistributedGraph::link` right after the edge is computed
    /// as LOCAL or DISTANT; buffers or streams it per the sync mode's
    /// discipline.
    fn link(&mut self, graph: &dyn GraphAccess<T>, edge: DistributedId);

    fn unlink(&mut self, graph: &dyn GraphAccess<T>, edge: DistributedId);

    fn remove_node(&mut self, graph: &dyn GraphAccess<T>, node: DistributedId);

    /// Drains all buffered link/unlink/remove traffic (Ghost), or blocks on
    /// the termination detector until in-flight requests quiesce (Hard).
    async fn synchronize(&mut self, graph: &mut dyn GraphAccess<T>) -> Result<()>;
}

/// Bundles the mutex policy plus the two sync halves that make up one
/// pluggable sync mode (Ghost / Global Ghost / Hard).
pub trait SyncMode<T: Clone + Send + Sync>: Send + Sync {
    type Mutex: MutexPolicy<T>;
    type DataSync: DataSync<T>;
    type SyncLinker: SyncLinker<T>;

    fn mutex_policy(&mut self) -> &mut Self::Mutex;
    fn data_sync(&mut self) -> &mut Self::DataSync;
    fn sync_linker(&mut self) -> &mut Self::SyncLinker;
}

pub(crate) fn unknown_id(id: DistributedId) -> error_stack::Report<ErrorKind> {
    error_stack::Report::new(ErrorKind::UnknownId(id))
}
