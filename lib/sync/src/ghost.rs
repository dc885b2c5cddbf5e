//! Ghost sync mode (C7): `GhostMutexPolicy` is a pass-through onto whatever
//! payload the local graph already holds (for DISTANT nodes, that's the
//! copy refreshed by the last `GhostDataSync::synchronize_all`/
//! `synchronize_nodes` call); `GhostSyncLinker` buffers link/unlink/
//! remove-node operations touching a DISTANT endpoint and commits them in
//! one batched round per `synchronize()`. Grounded on
//! `fpmas/synchro/ghost/ghost_mode.h`'s `GhostMutex`/`GhostDataSync`/
//! `GhostSyncLinkerBase`.

use std::collections::HashMap;
use std::marker::PhantomData;

use async_trait::async_trait;
use comm::{Epoch, Kind, Tag};
use error_stack::ResultExt;
use graph::{DataSync, ErrorKind, GraphAccess, MutexPolicy, Result, SyncLinker, SyncMode};
use ids::{DistributedId, EdgeStub, NodeStub, NodeUpdatePack};
use serde::{de::DeserializeOwned, Serialize};

fn unknown_id(id: DistributedId) -> error_stack::Report<ErrorKind> {
    error_stack::Report::new(ErrorKind::UnknownId(id))
}

fn is_local<T>(graph: &dyn GraphAccess<T>, id: DistributedId) -> bool {
    graph.owning_rank(id) == Some(graph.rank())
}

/// `data()`/`acquire()` on both LOCAL and DISTANT nodes read straight
/// through to whatever the local graph currently stores — consistent with
/// a single-threaded process where \LOCAL data can only be touched
/// sequentially, and \DISTANT data is only ever refreshed at a barrier.
#[derive(Debug, Default)]
pub struct GhostMutexPolicy;

impl GhostMutexPolicy {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> MutexPolicy<T> for GhostMutexPolicy {
    async fn read(&mut self, graph: &dyn GraphAccess<T>, id: DistributedId) -> Result<T> {
        graph.node_payload(id).cloned().ok_or_else(|| unknown_id(id))
    }

    async fn release_read(&mut self, _graph: &dyn GraphAccess<T>, _id: DistributedId) -> Result<()> {
        Ok(())
    }

    async fn acquire(&mut self, graph: &dyn GraphAccess<T>, id: DistributedId) -> Result<T> {
        graph.node_payload(id).cloned().ok_or_else(|| unknown_id(id))
    }

    async fn release_acquire(
        &mut self,
        graph: &mut dyn GraphAccess<T>,
        id: DistributedId,
        updated: T,
    ) -> Result<()> {
        let weight = graph.node_weight(id).unwrap_or(1.0);
        graph.apply_node_update(id, updated, weight)
    }

    async fn lock(&mut self, _graph: &dyn GraphAccess<T>, _id: DistributedId) -> Result<()> {
        Ok(())
    }

    async fn unlock(&mut self, _graph: &dyn GraphAccess<T>, _id: DistributedId) -> Result<()> {
        Ok(())
    }

    async fn lock_shared(&mut self, _graph: &dyn GraphAccess<T>, _id: DistributedId) -> Result<()> {
        Ok(())
    }

    async fn unlock_shared(&mut self, _graph: &dyn GraphAccess<T>, _id: DistributedId) -> Result<()> {
        Ok(())
    }

    fn on_synchronize(&mut self, _graph: &dyn GraphAccess<T>, _id: DistributedId) {}

    fn forget(&mut self, _id: DistributedId) {}
}

/// Fetches fresh payloads for every DISTANT node from its owner, in two
/// collective rounds: first migrate the id requests, then migrate the
/// `NodeUpdatePack` responses. Mirrors `GhostDataSync::_synchronize`.
pub struct GhostDataSync<T> {
    epoch: Epoch,
    _marker: PhantomData<T>,
}

impl<T> GhostDataSync<T> {
    pub fn new() -> Self {
        Self {
            epoch: Epoch::Even,
            _marker: PhantomData,
        }
    }
}

impl<T> Default for GhostDataSync<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Serialize + DeserializeOwned + Send + Sync> GhostDataSync<T> {
    async fn do_sync(&mut self, graph: &mut dyn GraphAccess<T>, ids: &[DistributedId]) -> Result<()> {
        let mut requests: HashMap<u32, Vec<DistributedId>> = HashMap::new();
        for &id in ids {
            if let Some(owner) = graph.owning_rank(id) {
                requests.entry(owner).or_default().push(id);
            }
        }

        let mut wire = HashMap::new();
        for (dest, list) in &requests {
            let bytes = serde_json::to_vec(list).change_context(ErrorKind::CodecFailure)?;
            wire.insert(*dest, bytes);
        }
        let request_tag = Tag::new(self.epoch, Kind::Read);
        let incoming_requests = graph
            .comm()
            .all_to_all(request_tag, wire)
            .await
            .change_context(ErrorKind::CommunicationFailure)?;

        let mut wire_responses = HashMap::new();
        for (peer, bytes) in &incoming_requests {
            if bytes.is_empty() {
                continue;
            }
            let wanted: Vec<DistributedId> =
                serde_json::from_slice(bytes).change_context(ErrorKind::CodecFailure)?;
            let mut packs = Vec::with_capacity(wanted.len());
            for id in wanted {
                if let Some(data) = graph.node_payload(id) {
                    packs.push(NodeUpdatePack {
                        id,
                        updated_data: data.clone(),
                        updated_weight: graph.node_weight(id).unwrap_or(1.0),
                    });
                }
            }
            wire_responses.insert(*peer, serde_json::to_vec(&packs).change_context(ErrorKind::CodecFailure)?);
        }
        let response_tag = Tag::new(self.epoch, Kind::ReadResponse);
        let responses = graph
            .comm()
            .all_to_all(response_tag, wire_responses)
            .await
            .change_context(ErrorKind::CommunicationFailure)?;
        for (_, bytes) in responses {
            if bytes.is_empty() {
                continue;
            }
            let packs: Vec<NodeUpdatePack<T>> =
                serde_json::from_slice(&bytes).change_context(ErrorKind::CodecFailure)?;
            for pack in packs {
                graph.apply_node_update(pack.id, pack.updated_data, pack.updated_weight)?;
            }
        }

        self.epoch = self.epoch.flip();
        Ok(())
    }
}

#[async_trait]
impl<T: Clone + Serialize + DeserializeOwned + Send + Sync> DataSync<T> for GhostDataSync<T> {
    async fn synchronize_all(&mut self, graph: &mut dyn GraphAccess<T>) -> Result<()> {
        let ids = graph.distant_node_ids();
        self.do_sync(graph, &ids).await
    }

    async fn synchronize_nodes(
        &mut self,
        graph: &mut dyn GraphAccess<T>,
        nodes: &[DistributedId],
    ) -> Result<()> {
        let ids: Vec<_> = nodes
            .iter()
            .copied()
            .filter(|&id| !is_local(graph, id))
            .collect();
        self.do_sync(graph, &ids).await
    }
}

/// Buffers link/unlink/remove-node operations touching a DISTANT endpoint
/// and commits all of them in one batched exchange per `synchronize()`.
/// Mirrors `GhostSyncLinkerBase::synchronize_links`.
pub struct GhostSyncLinker<T> {
    epoch: Epoch,
    pending_links: Vec<DistributedId>,
    pending_unlinks: Vec<DistributedId>,
    pending_removals: Vec<DistributedId>,
    _marker: PhantomData<T>,
}

impl<T> GhostSyncLinker<T> {
    pub fn new() -> Self {
        Self {
            epoch: Epoch::Even,
            pending_links: Vec::new(),
            pending_unlinks: Vec::new(),
            pending_removals: Vec::new(),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for GhostSyncLinker<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + Sync> SyncLinker<T> for GhostSyncLinker<T> {
    fn link(&mut self, graph: &dyn GraphAccess<T>, edge: DistributedId) {
        if let Some((source, target)) = graph.edge_endpoints(edge) {
            if !is_local(graph, source) || !is_local(graph, target) {
                self.pending_links.push(edge);
            }
        }
    }

    fn unlink(&mut self, graph: &dyn GraphAccess<T>, edge: DistributedId) {
        self.pending_links.retain(|&id| id != edge);
        if let Some((source, target)) = graph.edge_endpoints(edge) {
            if !is_local(graph, source) || !is_local(graph, target) {
                self.pending_unlinks.push(edge);
            }
        }
    }

    fn remove_node(&mut self, _graph: &dyn GraphAccess<T>, node: DistributedId) {
        self.pending_removals.push(node);
    }

    async fn synchronize(&mut self, graph: &mut dyn GraphAccess<T>) -> Result<()> {
        let rank = graph.rank();

        // Links: send each buffered edge to every DISTANT endpoint's owner;
        // if both endpoints are DISTANT, the edge is no longer our concern
        // once delivered.
        let mut link_migration: HashMap<u32, Vec<EdgeStub>> = HashMap::new();
        let mut fully_exported = Vec::new();
        for &edge_id in &self.pending_links {
            if let (Some((source, target)), Some((layer, weight))) =
                (graph.edge_endpoints(edge_id), graph.edge_layer_weight(edge_id))
            {
                let source_owner = graph.owning_rank(source).unwrap_or(rank);
                let target_owner = graph.owning_rank(target).unwrap_or(rank);
                let stub = EdgeStub {
                    id: edge_id,
                    layer,
                    weight,
                    source: NodeStub {
                        id: source,
                        origin_rank: source_owner,
                    },
                    target: NodeStub {
                        id: target,
                        origin_rank: target_owner,
                    },
                };
                if source_owner != rank {
                    link_migration.entry(source_owner).or_default().push(stub.clone());
                }
                if target_owner != rank {
                    link_migration.entry(target_owner).or_default().push(stub);
                }
                if source_owner != rank && target_owner != rank {
                    fully_exported.push(edge_id);
                }
            }
        }
        self.pending_links.clear();

        let mut wire = HashMap::new();
        for (dest, stubs) in link_migration {
            wire.insert(dest, serde_json::to_vec(&stubs).change_context(ErrorKind::CodecFailure)?);
        }
        let link_tag = Tag::new(self.epoch, Kind::Link);
        let received = graph
            .comm()
            .all_to_all(link_tag, wire)
            .await
            .change_context(ErrorKind::CommunicationFailure)?;
        for (_, bytes) in received {
            if bytes.is_empty() {
                continue;
            }
            let stubs: Vec<EdgeStub> = serde_json::from_slice(&bytes).change_context(ErrorKind::CodecFailure)?;
            for stub in stubs {
                graph.import_edge(
                    stub.id,
                    stub.layer,
                    stub.weight,
                    stub.source.id,
                    stub.source.origin_rank,
                    stub.target.id,
                    stub.target.origin_rank,
                )?;
            }
        }
        for edge_id in fully_exported {
            let _ = graph.local_unlink(edge_id);
        }

        // Node removal: forward to the owner if DISTANT, else queue for
        // local erasure once its incident edges have been unlinked.
        let mut remove_migration: HashMap<u32, Vec<DistributedId>> = HashMap::new();
        let mut local_to_erase = Vec::new();
        for &node_id in &self.pending_removals {
            match graph.owning_rank(node_id) {
                Some(owner) if owner != rank => {
                    remove_migration.entry(owner).or_default().push(node_id);
                }
                _ => local_to_erase.push(node_id),
            }
        }
        self.pending_removals.clear();

        let mut wire = HashMap::new();
        for (dest, ids) in remove_migration {
            wire.insert(dest, serde_json::to_vec(&ids).change_context(ErrorKind::CodecFailure)?);
        }
        let remove_tag = Tag::new(self.epoch, Kind::RemoveNode);
        let received = graph
            .comm()
            .all_to_all(remove_tag, wire)
            .await
            .change_context(ErrorKind::CommunicationFailure)?;
        for (_, bytes) in received {
            if bytes.is_empty() {
                continue;
            }
            let ids: Vec<DistributedId> =
                serde_json::from_slice(&bytes).change_context(ErrorKind::CodecFailure)?;
            local_to_erase.extend(ids);
        }

        // Unlinks: forward to every DISTANT endpoint's owner.
        let mut unlink_migration: HashMap<u32, Vec<DistributedId>> = HashMap::new();
        for &edge_id in &self.pending_unlinks {
            if let Some((source, target)) = graph.edge_endpoints(edge_id) {
                for endpoint in [source, target] {
                    if let Some(owner) = graph.owning_rank(endpoint) {
                        if owner != rank {
                            unlink_migration.entry(owner).or_default().push(edge_id);
                        }
                    }
                }
            }
        }
        self.pending_unlinks.clear();

        let mut wire = HashMap::new();
        for (dest, ids) in unlink_migration {
            wire.insert(dest, serde_json::to_vec(&ids).change_context(ErrorKind::CodecFailure)?);
        }
        let unlink_tag = Tag::new(self.epoch, Kind::Unlink);
        let received = graph
            .comm()
            .all_to_all(unlink_tag, wire)
            .await
            .change_context(ErrorKind::CommunicationFailure)?;
        for (_, bytes) in received {
            if bytes.is_empty() {
                continue;
            }
            let ids: Vec<DistributedId> =
                serde_json::from_slice(&bytes).change_context(ErrorKind::CodecFailure)?;
            for id in ids {
                let _ = graph.local_unlink(id);
            }
        }

        for node_id in local_to_erase {
            for edge_id in graph.incident_edges(node_id) {
                let _ = graph.local_unlink(edge_id);
            }
            let _ = graph.local_erase_node(node_id);
        }

        self.epoch = self.epoch.flip();
        Ok(())
    }
}

/// LOCAL nodes are always perceived up to date, since every mutation goes
/// straight through `apply_node_update`; DISTANT nodes are only as fresh as
/// the last `synchronize()`. The weakest, cheapest of the three sync modes.
pub struct GhostMode<T> {
    mutex: GhostMutexPolicy,
    data_sync: GhostDataSync<T>,
    sync_linker: GhostSyncLinker<T>,
}

impl<T> GhostMode<T> {
    pub fn new() -> Self {
        Self {
            mutex: GhostMutexPolicy::new(),
            data_sync: GhostDataSync::new(),
            sync_linker: GhostSyncLinker::new(),
        }
    }
}

impl<T> Default for GhostMode<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Serialize + DeserializeOwned + Send + Sync> SyncMode<T> for GhostMode<T> {
    type Mutex = GhostMutexPolicy;
    type DataSync = GhostDataSync<T>;
    type SyncLinker = GhostSyncLinker<T>;

    fn mutex_policy(&mut self) -> &mut Self::Mutex {
        &mut self.mutex
    }

    fn data_sync(&mut self) -> &mut Self::DataSync {
        &mut self.data_sync
    }

    fn sync_linker(&mut self) -> &mut Self::SyncLinker {
        &mut self.sync_linker
    }
}
