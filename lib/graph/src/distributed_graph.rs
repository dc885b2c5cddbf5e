//! C4: the distributed graph itself. Generalizes
//! `fpmas::graph::DistributedGraph<T>` (`distributed_graph.h`) to Rust:
//! same operation set and the same merge/distribute/synchronize semantics,
//! but templated over a [`SyncMode`] trait bundle instead of C++ template
//! parameters, and talking to peers through [`Communicator`] instead of
//! `MpiCommunicator` directly.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use comm::{Communicator, Epoch, Kind, Tag};
use error_stack::{IntoReport, ResultExt};
use ids::{DistributedId, EdgeStub, IdAllocator, NodeStub, NodeUpdatePack};
use local_graph::LocalGraph;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{
    access::{unknown_id, GraphAccess, SyncMode},
    breakpoint::{GraphBreakpoint, NodeRecord},
    error::{ErrorKind, Result},
    location::LocationManager,
    view::GraphView,
};

/// Why a node just transitioned to LOCAL or DISTANT. Agent-group
/// bookkeeping and telemetry hook in through [`DistributedGraph::on_node_event`]
/// instead of through inheritance (§9 Design Notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportReason {
    BuildLocal,
    ImportNewLocal,
    ImportExistingLocal,
    ImportNewDistant,
    ExportDistant,
}

#[derive(Debug, Clone, Copy)]
pub struct NodeEvent {
    pub id: DistributedId,
    pub reason: ImportReason,
}

type NodeCallback = Box<dyn FnMut(NodeEvent) + Send>;

/// Builds a [`GraphView`] over every field of `self` except `sync_mode`,
/// without going through a helper *method* — a method taking `&mut self`
/// would borrow the whole struct, defeating the point. See the `access`
/// module docs.
macro_rules! view {
    ($self:ident) => {
        GraphView {
            rank: $self.rank,
            comm: &$self.comm,
            local: &mut $self.local,
            location: &mut $self.location,
            unsynchronized: &mut $self.unsynchronized,
        }
    };
}

pub struct DistributedGraph<T, S: SyncMode<T>> {
    rank: u32,
    comm: Arc<dyn Communicator>,
    local: LocalGraph<T>,
    location: LocationManager,
    node_ids: IdAllocator,
    edge_ids: IdAllocator,
    sync_mode: S,
    unsynchronized: HashSet<DistributedId>,
    callbacks: Vec<NodeCallback>,
    epoch: Epoch,
}

#[derive(Serialize, Deserialize)]
struct DistributePayload<T> {
    nodes: Vec<NodeUpdatePack<T>>,
    edges: Vec<EdgeStub>,
}

impl<T, S> DistributedGraph<T, S>
where
    T: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: SyncMode<T>,
{
    pub fn new(rank: u32, comm: Arc<dyn Communicator>, sync_mode: S) -> Self {
        Self {
            rank,
            comm,
            local: LocalGraph::new(),
            location: LocationManager::new(),
            node_ids: IdAllocator::new(rank),
            edge_ids: IdAllocator::new(rank),
            sync_mode,
            unsynchronized: HashSet::new(),
            callbacks: Vec::new(),
            epoch: Epoch::Even,
        }
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn on_node_event(&mut self, callback: NodeCallback) {
        self.callbacks.push(callback);
    }

    fn fire(&mut self, id: DistributedId, reason: ImportReason) {
        for callback in &mut self.callbacks {
            callback(NodeEvent { id, reason });
        }
    }

    pub fn is_local(&self, id: DistributedId) -> bool {
        self.location.is_local(id)
    }

    pub fn is_distant(&self, id: DistributedId) -> bool {
        self.location.is_distant(id)
    }

    pub fn owning_rank(&self, id: DistributedId) -> Option<u32> {
        self.location.location(id)
    }

    pub fn contains_node(&self, id: DistributedId) -> bool {
        self.local.contains_node(id)
    }

    pub fn node_data(&self, id: DistributedId) -> Option<&T> {
        self.local.get_node(id).map(|node| &node.data)
    }

    pub fn node_weight(&self, id: DistributedId) -> Option<f64> {
        self.local.get_node(id).map(|node| node.weight)
    }

    pub fn local_node_ids(&self) -> impl Iterator<Item = DistributedId> + '_ {
        self.location.local_nodes()
    }

    pub fn distant_node_ids(&self) -> impl Iterator<Item = DistributedId> + '_ {
        self.location.distant_nodes()
    }

    /// Every edge incident to `id` on `layer`, in either direction.
    pub fn incident_edges_on_layer(&self, id: DistributedId, layer: u32) -> Vec<DistributedId> {
        match self.local.get_node(id) {
            Some(node) => node
                .out_edges(layer)
                .iter()
                .chain(node.in_edges(layer))
                .copied()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Edges on `layer` with `id` as their target.
    pub fn in_edges_on_layer(&self, id: DistributedId, layer: u32) -> Vec<DistributedId> {
        match self.local.get_node(id) {
            Some(node) => node.in_edges(layer).to_vec(),
            None => Vec::new(),
        }
    }

    /// Edges on `layer` with `id` as their source.
    pub fn out_edges_on_layer(&self, id: DistributedId, layer: u32) -> Vec<DistributedId> {
        match self.local.get_node(id) {
            Some(node) => node.out_edges(layer).to_vec(),
            None => Vec::new(),
        }
    }

    /// The other endpoint of every `layer` edge touching `id`, deduplicated.
    pub fn neighbors_on_layer(&self, id: DistributedId, layer: u32) -> Vec<DistributedId> {
        let mut seen = HashSet::new();
        self.incident_edges_on_layer(id, layer)
            .into_iter()
            .filter_map(|edge_id| self.local.get_edge(edge_id))
            .map(|edge| if edge.source == id { edge.target } else { edge.source })
            .filter(|other| seen.insert(*other))
            .collect()
    }

    pub fn edge_endpoints(&self, id: DistributedId) -> Option<(DistributedId, DistributedId)> {
        self.local.get_edge(id).map(|edge| (edge.source, edge.target))
    }

    pub fn edge_layer(&self, id: DistributedId) -> Option<u32> {
        self.local.get_edge(id).map(|edge| edge.layer)
    }

    pub fn edge_weight(&self, id: DistributedId) -> Option<f64> {
        self.local.get_edge(id).map(|edge| edge.weight)
    }

    /// Whether a `layer` edge already connects `source` to `target`, in
    /// either direction. Used by C9 to dedupe frontier growth.
    pub fn has_edge_on_layer(&self, source: DistributedId, target: DistributedId, layer: u32) -> bool {
        self.incident_edges_on_layer(source, layer)
            .into_iter()
            .filter_map(|edge_id| self.local.get_edge(edge_id))
            .any(|edge| {
                (edge.source == source && edge.target == target)
                    || (edge.source == target && edge.target == source)
            })
    }

    // -- C4 public surface -------------------------------------------------

    #[instrument(skip(self, data))]
    pub fn build_node(&mut self, data: T, weight: f64) -> DistributedId {
        let id = self.node_ids.allocate();
        self.local.insert_node(id, data, weight);
        self.location.set_local(id, self.rank);
        self.fire(id, ImportReason::BuildLocal);
        debug!(%id, "built local node");
        id
    }

    /// Idempotent: registers a placeholder DISTANT node for `id` if it is
    /// not already known. Its payload is `T::default()` until the next data
    /// sync refreshes it — mirrors `importEdge`'s own stub materialization.
    pub fn insert_distant(&mut self, id: DistributedId, owning_rank: u32) -> DistributedId {
        if !self.local.contains_node(id) {
            self.local.insert_node(id, T::default(), 1.0);
            self.location.set_distant(id, owning_rank);
            self.unsynchronized.insert(id);
        }
        id
    }

    pub fn link(&mut self, source: DistributedId, target: DistributedId, layer: u32) -> Result<DistributedId> {
        self.link_weighted(source, target, layer, 1.0)
    }

    /// Same as [`link`](Self::link), but lets the caller set the edge's
    /// weight instead of defaulting it to `1.0`. `model` (C9) uses this to
    /// carry a remaining-hop budget on its transient frontier edges, since
    /// weight is the only per-edge attribute that already travels the wire
    /// (see `EdgeStub`).
    pub fn link_weighted(
        &mut self,
        source: DistributedId,
        target: DistributedId,
        layer: u32,
        weight: f64,
    ) -> Result<DistributedId> {
        if !self.local.contains_node(source) {
            return Err(unknown_id(source));
        }
        if !self.local.contains_node(target) {
            return Err(unknown_id(target));
        }
        let id = self.edge_ids.allocate();
        self.local
            .insert_edge(id, layer, weight, source, target)
            .map_err(|_| unknown_id(source))?;
        {
            let view = view!(self);
            self.sync_mode.sync_linker().link(&view, id);
        }
        Ok(id)
    }

    pub fn unlink(&mut self, edge: DistributedId) -> Result<()> {
        {
            let view = view!(self);
            self.sync_mode.sync_linker().unlink(&view, edge);
        }
        self.local.erase_edge(edge).map_err(|_| unknown_id(edge))
    }

    /// Delegated entirely to the sync linker, per `distributed_graph.h`:
    /// the node is not erased immediately, only flagged, so in-flight
    /// traffic referencing it can still resolve during the next
    /// `synchronize()`.
    pub fn remove_node(&mut self, node: DistributedId) {
        let view = view!(self);
        self.sync_mode.sync_linker().remove_node(&view, node);
    }

    pub fn switch_layer(&mut self, edge: DistributedId, new_layer: u32) -> Result<()> {
        let endpoints = self.local.get_edge(edge).map(|e| (e.source, e.target));
        let (source, target) = endpoints.ok_or_else(|| unknown_id(edge))?;
        if !self.location.is_local(source) || !self.location.is_local(target) {
            return Err(error_stack::Report::new(ErrorKind::InvalidLayerSwitch(edge)));
        }
        self.local
            .switch_layer(edge, new_layer)
            .map_err(|_| unknown_id(edge))
    }

    pub fn import_node(&mut self, id: DistributedId, origin_rank: u32, data: T, weight: f64) {
        let reason = if self.local.contains_node(id) {
            ImportReason::ImportExistingLocal
        } else {
            ImportReason::ImportNewLocal
        };
        let mut view = view!(self);
        let _ = view.import_node(id, origin_rank, data, weight);
        drop(view);
        self.fire(id, reason);
        // Any DISTANT incident edge whose other endpoint is now LOCAL
        // upgrades to LOCAL; edge state is derived, not stored separately,
        // on this side it only matters for export bookkeeping during
        // `distribute`, so no further action is required here.
    }

    pub fn import_edge(&mut self, edge: EdgeStub) {
        let mut view = view!(self);
        let _ = view.import_edge(
            edge.id,
            edge.layer,
            edge.weight,
            edge.source.id,
            edge.source.origin_rank,
            edge.target.id,
            edge.target.origin_rank,
        );
    }

    /// Erases `id` if no incident edge's other endpoint is LOCAL; otherwise
    /// trims only the edges whose other endpoint is non-LOCAL. Used both by
    /// `synchronize()` (applied to DISTANT nodes with no LOCAL neighbor) and
    /// `distribute()` (applied to every node just exported).
    fn clear_node(&mut self, id: DistributedId) {
        let incident: Vec<_> = {
            let view = view!(self);
            view.incident_edges(id)
        };
        let has_local_neighbor = incident.iter().any(|edge_id| {
            let view = view!(self);
            match view.edge_endpoints(*edge_id) {
                Some((s, t)) => {
                    let other = if s == id { t } else { s };
                    self.location.is_local(other)
                }
                None => false,
            }
        });
        if has_local_neighbor {
            for edge_id in incident {
                let keep = {
                    let view = view!(self);
                    match view.edge_endpoints(edge_id) {
                        Some((s, t)) => {
                            let other = if s == id { t } else { s };
                            self.location.is_local(other)
                        }
                        None => false,
                    }
                };
                if !keep {
                    let _ = self.local.erase_edge(edge_id);
                }
            }
        } else {
            self.location.forget(id);
            let _ = self.local.erase_node(id);
            self.sync_mode.mutex_policy().forget(id);
        }
    }

    // -- Barriers ------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn synchronize(&mut self) -> Result<()> {
        info!(rank = self.rank, "synchronize: entering barrier");
        {
            let mut view = view!(self);
            self.sync_mode.sync_linker().synchronize(&mut view).await?;
        }
        // Collect into an owned Vec first: the predicate below needs to
        // reborrow `self.location` mutably through `view!`, which would
        // conflict with the shared borrow `distant_nodes()` would otherwise
        // hold open for the whole chain.
        let distant_ids: Vec<_> = self.location.distant_nodes().collect();
        let distant_no_local_neighbor: Vec<_> = distant_ids
            .into_iter()
            .filter(|id| {
                let view = view!(self);
                let incident = view.incident_edges(*id);
                !incident.iter().any(|edge_id| match view.edge_endpoints(*edge_id) {
                    Some((s, t)) => {
                        let other = if s == *id { t } else { s };
                        self.location.is_local(other)
                    }
                    None => false,
                })
            })
            .collect();
        for id in distant_no_local_neighbor {
            self.clear_node(id);
        }
        {
            let mut view = view!(self);
            self.sync_mode.data_sync().synchronize_all(&mut view).await?;
        }
        let all_ids: Vec<_> = self
            .location
            .local_nodes()
            .chain(self.location.distant_nodes())
            .collect();
        for id in all_ids {
            let view = view!(self);
            self.sync_mode.mutex_policy().on_synchronize(&view, id);
        }
        self.epoch = self.epoch.flip();
        info!(rank = self.rank, "synchronize: barrier complete");
        Ok(())
    }

    pub async fn synchronize_scoped(
        &mut self,
        nodes: &[DistributedId],
        synchronize_links: bool,
    ) -> Result<()> {
        if synchronize_links {
            let mut view = view!(self);
            self.sync_mode.sync_linker().synchronize(&mut view).await?;
        }
        {
            let mut view = view!(self);
            self.sync_mode
                .data_sync()
                .synchronize_nodes(&mut view, nodes)
                .await?;
        }
        for id in nodes {
            self.unsynchronized.remove(id);
        }
        Ok(())
    }

    #[instrument(skip(self, partition))]
    pub async fn distribute(&mut self, partition: &HashMap<DistributedId, u32>) -> Result<()> {
        info!(rank = self.rank, count = partition.len(), "distribute: starting");
        {
            let mut view = view!(self);
            self.sync_mode.sync_linker().synchronize(&mut view).await?;
        }

        let mut exported_nodes: HashMap<u32, Vec<DistributedId>> = HashMap::new();
        for (&id, &dest) in partition {
            if dest != self.rank && self.location.is_local(id) {
                exported_nodes.entry(dest).or_default().push(id);
            }
        }

        let mut payloads: HashMap<u32, DistributePayload<T>> = HashMap::new();
        for (&dest, ids) in &exported_nodes {
            let mut nodes = Vec::new();
            let mut edge_ids_to_export: HashSet<DistributedId> = HashSet::new();
            for &id in ids {
                let node = self.local.get_node(id).expect("local node just checked");
                nodes.push(NodeUpdatePack {
                    id,
                    updated_data: node.data.clone(),
                    updated_weight: node.weight,
                });
                for edge_id in node.incident_edges() {
                    let edge = match self.local.get_edge(edge_id) {
                        Some(edge) => edge,
                        None => continue,
                    };
                    let other = if edge.source == id { edge.target } else { edge.source };
                    let other_dest = partition
                        .get(&other)
                        .copied()
                        .unwrap_or_else(|| self.location.location(other).unwrap_or(self.rank));
                    if other_dest != dest {
                        edge_ids_to_export.insert(edge_id);
                    }
                }
            }
            let edges = edge_ids_to_export
                .into_iter()
                .filter_map(|edge_id| {
                    let edge = self.local.get_edge(edge_id)?;
                    let source_origin = partition
                        .get(&edge.source)
                        .copied()
                        .unwrap_or_else(|| self.location.location(edge.source).unwrap_or(self.rank));
                    let target_origin = partition
                        .get(&edge.target)
                        .copied()
                        .unwrap_or_else(|| self.location.location(edge.target).unwrap_or(self.rank));
                    Some(EdgeStub {
                        id: edge.id,
                        layer: edge.layer,
                        weight: edge.weight,
                        source: NodeStub {
                            id: edge.source,
                            origin_rank: source_origin,
                        },
                        target: NodeStub {
                            id: edge.target,
                            origin_rank: target_origin,
                        },
                    })
                })
                .collect();
            payloads.insert(dest, DistributePayload { nodes, edges });
        }

        let mut wire = HashMap::new();
        for (dest, payload) in payloads {
            let bytes = serde_json::to_vec(&payload)
                .into_report()
                .change_context(ErrorKind::CodecFailure)
                .attach_printable("could not encode distribute payload")?;
            wire.insert(dest, bytes);
        }

        let tag = Tag::new(self.epoch, Kind::Bulk);
        let received = self
            .comm
            .all_to_all(tag, wire)
            .await
            .change_context(ErrorKind::CommunicationFailure)?;

        for (_, bytes) in received {
            if bytes.is_empty() {
                continue;
            }
            let payload: DistributePayload<T> = serde_json::from_slice(&bytes)
                .into_report()
                .change_context(ErrorKind::CodecFailure)
                .attach_printable("could not decode distribute payload")?;
            for node in payload.nodes {
                self.import_node(node.id, self.rank, node.updated_data, node.updated_weight);
            }
            for edge in payload.edges {
                self.import_edge(edge);
            }
        }

        for ids in exported_nodes.values() {
            for &id in ids {
                if let Some(&dest) = partition.get(&id) {
                    self.location.set_distant(id, dest);
                    self.fire(id, ImportReason::ExportDistant);
                }
            }
        }
        for ids in exported_nodes.into_values() {
            for id in ids {
                self.clear_node(id);
            }
        }

        self.update_locations().await?;

        let pending: Vec<_> = self.unsynchronized.iter().copied().collect();
        if !pending.is_empty() {
            self.synchronize_scoped(&pending, false).await?;
        }

        info!(rank = self.rank, "distribute: complete");
        Ok(())
    }

    /// Refreshes every rank's view of who currently owns each DISTANT node
    /// it holds a replica of, via an all-gather of `(id, rank)` pairs for
    /// every node this rank considers LOCAL.
    async fn update_locations(&mut self) -> Result<()> {
        let local_ids: Vec<(DistributedId, u32)> = self
            .location
            .local_nodes()
            .map(|id| (id, self.rank))
            .collect();
        let bytes = serde_json::to_vec(&local_ids)
            .into_report()
            .change_context(ErrorKind::CodecFailure)?;
        let tag = Tag::new(self.epoch, Kind::Bulk);
        let all = self
            .comm
            .all_gather(tag, bytes)
            .await
            .change_context(ErrorKind::CommunicationFailure)?;
        for peer_bytes in all {
            if peer_bytes.is_empty() {
                continue;
            }
            if let Ok(pairs) = serde_json::from_slice::<Vec<(DistributedId, u32)>>(&peer_bytes) {
                self.location.apply_updates(pairs);
            }
        }
        Ok(())
    }

    // -- C6 mutex forwarding --------------------------------------------

    pub async fn read(&mut self, id: DistributedId) -> Result<T> {
        let view = view!(self);
        self.sync_mode.mutex_policy().read(&view, id).await
    }

    pub async fn release_read(&mut self, id: DistributedId) -> Result<()> {
        let view = view!(self);
        self.sync_mode.mutex_policy().release_read(&view, id).await
    }

    pub async fn acquire(&mut self, id: DistributedId) -> Result<T> {
        let view = view!(self);
        self.sync_mode.mutex_policy().acquire(&view, id).await
    }

    pub async fn release_acquire(&mut self, id: DistributedId, updated: T) -> Result<()> {
        let mut view = view!(self);
        self.sync_mode
            .mutex_policy()
            .release_acquire(&mut view, id, updated)
            .await
    }

    pub async fn lock(&mut self, id: DistributedId) -> Result<()> {
        let view = view!(self);
        self.sync_mode.mutex_policy().lock(&view, id).await
    }

    pub async fn unlock(&mut self, id: DistributedId) -> Result<()> {
        let view = view!(self);
        self.sync_mode.mutex_policy().unlock(&view, id).await
    }

    pub async fn lock_shared(&mut self, id: DistributedId) -> Result<()> {
        let view = view!(self);
        self.sync_mode.mutex_policy().lock_shared(&view, id).await
    }

    pub async fn unlock_shared(&mut self, id: DistributedId) -> Result<()> {
        let view = view!(self);
        self.sync_mode.mutex_policy().unlock_shared(&view, id).await
    }

    /// Answers whatever mutex traffic has arrived for this rank without
    /// issuing a request of our own. A no-op under Ghost/Global Ghost;
    /// under Hard mode this is what actually drains a peer's `acquire`
    /// while this rank isn't itself waiting on anything, matching a
    /// dedicated mutex-server loop. Safe to call speculatively from an
    /// application's idle/poll loop at any time between barriers.
    pub async fn service_mutex(&mut self) -> Result<()> {
        let view = view!(self);
        self.sync_mode.mutex_policy().service(&view).await
    }

    // -- Breakpoint persistence (§10.6) -----------------------------------

    pub fn to_breakpoint(&self) -> GraphBreakpoint<T> {
        let nodes = self
            .local
            .nodes()
            .map(|node| NodeRecord {
                id: node.id,
                data: node.data.clone(),
                weight: node.weight,
                owning_rank: self.location.location(node.id).unwrap_or(self.rank),
                is_local: self.location.is_local(node.id),
            })
            .collect();
        let edges = self
            .local
            .edges()
            .map(|edge| EdgeStub {
                id: edge.id,
                layer: edge.layer,
                weight: edge.weight,
                source: NodeStub {
                    id: edge.source,
                    origin_rank: self.location.location(edge.source).unwrap_or(self.rank),
                },
                target: NodeStub {
                    id: edge.target,
                    origin_rank: self.location.location(edge.target).unwrap_or(self.rank),
                },
            })
            .collect();
        GraphBreakpoint {
            rank: self.rank,
            nodes,
            edges,
            next_node_sequence: self.node_ids.next_sequence(),
            next_edge_sequence: self.edge_ids.next_sequence(),
        }
    }

    /// Restores a breakpoint dumped by a rank with the same id, replacing
    /// all current graph state. Ids resume from the dumped allocator
    /// counters so freshly built nodes never collide with restored ones.
    pub fn restore_breakpoint(&mut self, breakpoint: GraphBreakpoint<T>) {
        self.local = LocalGraph::new();
        self.location = LocationManager::new();
        self.unsynchronized = HashSet::new();
        self.node_ids = IdAllocator::resume(self.rank, breakpoint.next_node_sequence);
        self.edge_ids = IdAllocator::resume(self.rank, breakpoint.next_edge_sequence);

        for node in breakpoint.nodes {
            self.local.insert_node(node.id, node.data, node.weight);
            if node.is_local {
                self.location.set_local(node.id, node.owning_rank);
            } else {
                self.location.set_distant(node.id, node.owning_rank);
            }
        }
        for edge in breakpoint.edges {
            let _ = self
                .local
                .insert_edge(edge.id, edge.layer, edge.weight, edge.source.id, edge.target.id);
        }
    }
}
