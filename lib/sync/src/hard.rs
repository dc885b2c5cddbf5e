//! Hard sync mode (C6+C7+C8): every read/acquire/lock of a DISTANT node is a
//! network round trip to its owner, and every link/unlink is sent eagerly
//! instead of buffered until a barrier. Grounded on
//! `fpmas/synchro/hard/hard_sync_linker.h` (the `Issend` + "pump incoming
//! requests while waiting for my own" discipline) and
//! `fpmas/synchro/hard/mutex_server.h` (the per-node lock/queue state
//! machine).
//!
//! `HardMutexPolicy` and `HardDataSync` share one [`HardState`] behind an
//! `Arc<Mutex<_>>` — the same pattern `comm::local`'s in-process transport
//! uses for its inbox — because only `release_acquire`/`synchronize_*` ever
//! get a `&mut dyn GraphAccess<T>`, but incoming read/acquire/lock requests
//! can arrive (and must be answered) while *any* of the three are running.

use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use comm::{Epoch, Kind, PendingSend, Tag};
use error_stack::ResultExt;
use graph::{DataSync, ErrorKind, GraphAccess, MutexPolicy, Result, SyncLinker};
use ids::{DataUpdatePack, DistributedId, EdgeStub, NodeStub};
use serde::{de::DeserializeOwned, Serialize};

fn unknown_id(id: DistributedId) -> error_stack::Report<ErrorKind> {
    error_stack::Report::new(ErrorKind::UnknownId(id))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Read,
    Acquire,
    Lock,
    LockShared,
}

#[derive(Debug, Default)]
struct LockState {
    exclusive: bool,
    shared: u32,
}

impl LockState {
    fn can_serve(&self, kind: RequestKind) -> bool {
        match kind {
            RequestKind::Read | RequestKind::LockShared => !self.exclusive,
            RequestKind::Acquire | RequestKind::Lock => !self.exclusive && self.shared == 0,
        }
    }
}

struct HardState {
    epoch: Epoch,
    locks: HashMap<DistributedId, LockState>,
    queues: HashMap<DistributedId, VecDeque<(u32, RequestKind)>>,
}

impl HardState {
    fn new() -> Self {
        Self {
            epoch: Epoch::Even,
            locks: HashMap::new(),
            queues: HashMap::new(),
        }
    }
}

/// Services a single incoming Read/Acquire/Lock/LockShared request: answers
/// it immediately if the node's lock state allows, else queues it for
/// `drain_queue` to pick up once the holder releases.
async fn handle_request<T: Clone + Serialize + Send + Sync>(
    state: &Mutex<HardState>,
    graph: &dyn GraphAccess<T>,
    id: DistributedId,
    source: u32,
    kind: RequestKind,
) -> Result<()> {
    let can_serve = {
        let mut guard = state.lock().expect("hard sync state poisoned");
        guard.locks.entry(id).or_default().can_serve(kind)
    };
    if can_serve {
        respond(state, graph, id, source, kind).await
    } else {
        let mut guard = state.lock().expect("hard sync state poisoned");
        guard.queues.entry(id).or_default().push_back((source, kind));
        Ok(())
    }
}

async fn respond<T: Clone + Serialize + Send + Sync>(
    state: &Mutex<HardState>,
    graph: &dyn GraphAccess<T>,
    id: DistributedId,
    source: u32,
    kind: RequestKind,
) -> Result<()> {
    let epoch = {
        let mut guard = state.lock().expect("hard sync state poisoned");
        let lock = guard.locks.entry(id).or_default();
        match kind {
            RequestKind::Read => {}
            RequestKind::Acquire | RequestKind::Lock => lock.exclusive = true,
            RequestKind::LockShared => lock.shared += 1,
        }
        guard.epoch
    };
    let (resp_kind, bytes) = match kind {
        RequestKind::Read | RequestKind::Acquire => {
            let resp_kind = if kind == RequestKind::Read {
                Kind::ReadResponse
            } else {
                Kind::AcquireResponse
            };
            let data = graph.node_payload(id).cloned().ok_or_else(|| unknown_id(id))?;
            let pack = DataUpdatePack {
                id,
                updated_data: data,
            };
            (resp_kind, serde_json::to_vec(&pack).change_context(ErrorKind::CodecFailure)?)
        }
        RequestKind::Lock => (Kind::LockResponse, Vec::new()),
        RequestKind::LockShared => (Kind::LockSharedResponse, Vec::new()),
    };
    let tag = Tag::new(epoch, resp_kind);
    graph
        .comm()
        .send(source, tag, bytes)
        .await
        .change_context(ErrorKind::CommunicationFailure)
}

/// Waits, locally, until `id`'s lock state admits `kind` — used by the
/// owning rank's own `acquire`/`lock`/`lock_shared` calls, which never go
/// through `handle_request` (there is no network round trip to oneself).
/// Doesn't queue behind already-waiting remote requests; a busy node can
/// still starve a local caller, but `can_serve` is re-checked every yield so
/// it always grants as soon as the current holder releases.
async fn wait_local_servable(state: &Mutex<HardState>, id: DistributedId, kind: RequestKind) {
    loop {
        let can_serve = {
            let mut guard = state.lock().expect("hard sync state poisoned");
            guard.locks.entry(id).or_default().can_serve(kind)
        };
        if can_serve {
            return;
        }
        tokio::task::yield_now().await;
    }
}

/// Drains the wait queue for `id` to a fixpoint: serves queued shared-like
/// requests, but stops right after granting one exclusive request so a new
/// writer isn't starved by reads that arrive after it.
async fn drain_queue<T: Clone + Serialize + Send + Sync>(
    state: &Mutex<HardState>,
    graph: &dyn GraphAccess<T>,
    id: DistributedId,
) -> Result<()> {
    loop {
        let next = {
            let mut guard = state.lock().expect("hard sync state poisoned");
            let servable = match guard.queues.get(&id).and_then(|q| q.front()) {
                Some(&(_, kind)) => guard.locks.entry(id).or_default().can_serve(kind),
                None => false,
            };
            if servable {
                guard.queues.get_mut(&id).and_then(|q| q.pop_front())
            } else {
                None
            }
        };
        match next {
            Some((source, kind)) => {
                let exclusive = matches!(kind, RequestKind::Acquire | RequestKind::Lock);
                respond(state, graph, id, source, kind).await?;
                if exclusive {
                    break;
                }
            }
            None => break,
        }
    }
    Ok(())
}

/// Polls every peer for Read/Acquire/Lock/LockShared/Unlock/UnlockShared
/// traffic and services it. Safe to call from contexts holding only
/// `&dyn GraphAccess<T>`, since none of these kinds mutate node payloads.
async fn pump_requests<T: Clone + Serialize + Send + Sync>(
    state: &Mutex<HardState>,
    graph: &dyn GraphAccess<T>,
) -> Result<()> {
    let rank = graph.rank();
    let n = graph.comm().num_ranks();
    let epoch = state.lock().expect("hard sync state poisoned").epoch;
    for peer in 0..n {
        if peer == rank {
            continue;
        }
        for (kind, tag_kind) in [
            (RequestKind::Read, Kind::Read),
            (RequestKind::Acquire, Kind::Acquire),
            (RequestKind::Lock, Kind::Lock),
            (RequestKind::LockShared, Kind::LockShared),
        ] {
            let tag = Tag::new(epoch, tag_kind);
            if graph.comm().iprobe(peer, tag) {
                let bytes = graph.comm().recv(peer, tag).await.change_context(ErrorKind::CommunicationFailure)?;
                let id: DistributedId = serde_json::from_slice(&bytes).change_context(ErrorKind::CodecFailure)?;
                handle_request(state, graph, id, peer, kind).await?;
            }
        }
        let unlock_tag = Tag::new(epoch, Kind::Unlock);
        if graph.comm().iprobe(peer, unlock_tag) {
            let bytes = graph
                .comm()
                .recv(peer, unlock_tag)
                .await
                .change_context(ErrorKind::CommunicationFailure)?;
            let id: DistributedId = serde_json::from_slice(&bytes).change_context(ErrorKind::CodecFailure)?;
            {
                let mut guard = state.lock().expect("hard sync state poisoned");
                guard.locks.entry(id).or_default().exclusive = false;
            }
            drain_queue(state, graph, id).await?;
        }
        let unlock_shared_tag = Tag::new(epoch, Kind::UnlockShared);
        if graph.comm().iprobe(peer, unlock_shared_tag) {
            let bytes = graph
                .comm()
                .recv(peer, unlock_shared_tag)
                .await
                .change_context(ErrorKind::CommunicationFailure)?;
            let id: DistributedId = serde_json::from_slice(&bytes).change_context(ErrorKind::CodecFailure)?;
            {
                let mut guard = state.lock().expect("hard sync state poisoned");
                let lock = guard.locks.entry(id).or_default();
                lock.shared = lock.shared.saturating_sub(1);
            }
            drain_queue(state, graph, id).await?;
        }
    }
    Ok(())
}

async fn request_and_wait<T: Clone + Serialize + Send + Sync>(
    state: &Mutex<HardState>,
    graph: &dyn GraphAccess<T>,
    id: DistributedId,
    owner: u32,
    req_kind: Kind,
    resp_kind: Kind,
) -> Result<Vec<u8>> {
    let epoch = state.lock().expect("hard sync state poisoned").epoch;
    let bytes = serde_json::to_vec(&id).change_context(ErrorKind::CodecFailure)?;
    graph
        .comm()
        .send(owner, Tag::new(epoch, req_kind), bytes)
        .await
        .change_context(ErrorKind::CommunicationFailure)?;
    let resp_tag = Tag::new(epoch, resp_kind);
    loop {
        if graph.comm().iprobe(owner, resp_tag) {
            return graph
                .comm()
                .recv(owner, resp_tag)
                .await
                .change_context(ErrorKind::CommunicationFailure);
        }
        pump_requests(state, graph).await?;
        tokio::task::yield_now().await;
    }
}

/// Full reader/writer mutual exclusion: `acquire`/`lock` are exclusive,
/// `lock_shared` is shared, and plain `read` is a non-blocking snapshot that
/// only waits out a current exclusive holder (no lock of its own is taken,
/// so it never needs a release message — a deliberate simplification of
/// `mutex_server.h`'s `respondToRead`, which does hold a transient shared
/// lock; see DESIGN.md).
pub struct HardMutexPolicy<T> {
    state: Arc<Mutex<HardState>>,
    _marker: PhantomData<T>,
}

impl<T> HardMutexPolicy<T> {
    pub(crate) fn new(state: Arc<Mutex<HardState>>) -> Self {
        Self {
            state,
            _marker: PhantomData,
        }
    }

    async fn remote_request(
        &mut self,
        graph: &dyn GraphAccess<T>,
        id: DistributedId,
        owner: u32,
        req_kind: Kind,
        resp_kind: Kind,
    ) -> Result<T>
    where
        T: Clone + DeserializeOwned + Serialize + Send + Sync,
    {
        let bytes = request_and_wait(&self.state, graph, id, owner, req_kind, resp_kind).await?;
        let pack: DataUpdatePack<T> = serde_json::from_slice(&bytes).change_context(ErrorKind::CodecFailure)?;
        Ok(pack.updated_data)
    }

    async fn remote_fence(
        &mut self,
        graph: &dyn GraphAccess<T>,
        id: DistributedId,
        owner: u32,
        req_kind: Kind,
        resp_kind: Kind,
    ) -> Result<()>
    where
        T: Clone + Serialize + Send + Sync,
    {
        request_and_wait(&self.state, graph, id, owner, req_kind, resp_kind).await?;
        Ok(())
    }
}

#[async_trait]
impl<T: Clone + Serialize + DeserializeOwned + Send + Sync> MutexPolicy<T> for HardMutexPolicy<T> {
    async fn read(&mut self, graph: &dyn GraphAccess<T>, id: DistributedId) -> Result<T> {
        match graph.owning_rank(id) {
            Some(owner) if owner != graph.rank() => {
                self.remote_request(graph, id, owner, Kind::Read, Kind::ReadResponse).await
            }
            _ => {
                wait_local_servable(&self.state, id, RequestKind::Read).await;
                graph.node_payload(id).cloned().ok_or_else(|| unknown_id(id))
            }
        }
    }

    async fn release_read(&mut self, _graph: &dyn GraphAccess<T>, _id: DistributedId) -> Result<()> {
        Ok(())
    }

    async fn acquire(&mut self, graph: &dyn GraphAccess<T>, id: DistributedId) -> Result<T> {
        match graph.owning_rank(id) {
            Some(owner) if owner != graph.rank() => {
                self.remote_request(graph, id, owner, Kind::Acquire, Kind::AcquireResponse).await
            }
            _ => {
                wait_local_servable(&self.state, id, RequestKind::Acquire).await;
                let mut guard = self.state.lock().expect("hard sync state poisoned");
                guard.locks.entry(id).or_default().exclusive = true;
                drop(guard);
                graph.node_payload(id).cloned().ok_or_else(|| unknown_id(id))
            }
        }
    }

    async fn release_acquire(
        &mut self,
        graph: &mut dyn GraphAccess<T>,
        id: DistributedId,
        updated: T,
    ) -> Result<()> {
        let rank = graph.rank();
        match graph.owning_rank(id) {
            Some(owner) if owner != rank => {
                let epoch = self.state.lock().expect("hard sync state poisoned").epoch;
                let pack = DataUpdatePack {
                    id,
                    updated_data: updated,
                };
                let bytes = serde_json::to_vec(&pack).change_context(ErrorKind::CodecFailure)?;
                graph
                    .comm()
                    .send(owner, Tag::new(epoch, Kind::ReleaseAcquire), bytes)
                    .await
                    .change_context(ErrorKind::CommunicationFailure)?;
            }
            _ => {
                let weight = graph.node_weight(id).unwrap_or(1.0);
                graph.apply_node_update(id, updated, weight)?;
                {
                    let mut guard = self.state.lock().expect("hard sync state poisoned");
                    guard.locks.entry(id).or_default().exclusive = false;
                }
                drain_queue(&self.state, graph, id).await?;
            }
        }
        drain_incoming_writebacks(&self.state, graph).await
    }

    async fn lock(&mut self, graph: &dyn GraphAccess<T>, id: DistributedId) -> Result<()> {
        match graph.owning_rank(id) {
            Some(owner) if owner != graph.rank() => {
                self.remote_fence(graph, id, owner, Kind::Lock, Kind::LockResponse).await
            }
            _ => {
                wait_local_servable(&self.state, id, RequestKind::Lock).await;
                let mut guard = self.state.lock().expect("hard sync state poisoned");
                guard.locks.entry(id).or_default().exclusive = true;
                Ok(())
            }
        }
    }

    async fn unlock(&mut self, graph: &dyn GraphAccess<T>, id: DistributedId) -> Result<()> {
        match graph.owning_rank(id) {
            Some(owner) if owner != graph.rank() => {
                let epoch = self.state.lock().expect("hard sync state poisoned").epoch;
                let bytes = serde_json::to_vec(&id).change_context(ErrorKind::CodecFailure)?;
                graph
                    .comm()
                    .send(owner, Tag::new(epoch, Kind::Unlock), bytes)
                    .await
                    .change_context(ErrorKind::CommunicationFailure)
            }
            _ => {
                {
                    let mut guard = self.state.lock().expect("hard sync state poisoned");
                    guard.locks.entry(id).or_default().exclusive = false;
                }
                drain_queue(&self.state, graph, id).await
            }
        }
    }

    async fn lock_shared(&mut self, graph: &dyn GraphAccess<T>, id: DistributedId) -> Result<()> {
        match graph.owning_rank(id) {
            Some(owner) if owner != graph.rank() => {
                self.remote_fence(graph, id, owner, Kind::LockShared, Kind::LockSharedResponse).await
            }
            _ => {
                wait_local_servable(&self.state, id, RequestKind::LockShared).await;
                let mut guard = self.state.lock().expect("hard sync state poisoned");
                guard.locks.entry(id).or_default().shared += 1;
                Ok(())
            }
        }
    }

    async fn unlock_shared(&mut self, graph: &dyn GraphAccess<T>, id: DistributedId) -> Result<()> {
        match graph.owning_rank(id) {
            Some(owner) if owner != graph.rank() => {
                let epoch = self.state.lock().expect("hard sync state poisoned").epoch;
                let bytes = serde_json::to_vec(&id).change_context(ErrorKind::CodecFailure)?;
                graph
                    .comm()
                    .send(owner, Tag::new(epoch, Kind::UnlockShared), bytes)
                    .await
                    .change_context(ErrorKind::CommunicationFailure)
            }
            _ => {
                {
                    let mut guard = self.state.lock().expect("hard sync state poisoned");
                    let lock = guard.locks.entry(id).or_default();
                    lock.shared = lock.shared.saturating_sub(1);
                }
                drain_queue(&self.state, graph, id).await
            }
        }
    }

    fn on_synchronize(&mut self, _graph: &dyn GraphAccess<T>, _id: DistributedId) {}

    fn forget(&mut self, id: DistributedId) {
        let mut guard = self.state.lock().expect("hard sync state poisoned");
        guard.locks.remove(&id);
        guard.queues.remove(&id);
    }

    async fn service(&mut self, graph: &dyn GraphAccess<T>) -> Result<()> {
        pump_requests(&self.state, graph).await
    }
}

/// Drains any `ReleaseAcquire` writebacks addressed to nodes we own. Unlike
/// the read-only request kinds, applying one mutates graph data, so this can
/// only run where a `&mut dyn GraphAccess<T>` is available: inside
/// `release_acquire` and inside [`HardDataSync`]'s barrier methods.
async fn drain_incoming_writebacks<T: Clone + DeserializeOwned + Serialize + Send + Sync>(
    state: &Mutex<HardState>,
    graph: &mut dyn GraphAccess<T>,
) -> Result<()> {
    let rank = graph.rank();
    let n = graph.comm().num_ranks();
    let epoch = state.lock().expect("hard sync state poisoned").epoch;
    for peer in 0..n {
        if peer == rank {
            continue;
        }
        let tag = Tag::new(epoch, Kind::ReleaseAcquire);
        while graph.comm().iprobe(peer, tag) {
            let bytes = graph.comm().recv(peer, tag).await.change_context(ErrorKind::CommunicationFailure)?;
            let pack: DataUpdatePack<T> = serde_json::from_slice(&bytes).change_context(ErrorKind::CodecFailure)?;
            let weight = graph.node_weight(pack.id).unwrap_or(1.0);
            graph.apply_node_update(pack.id, pack.updated_data, weight)?;
            {
                let mut guard = state.lock().expect("hard sync state poisoned");
                guard.locks.entry(pack.id).or_default().exclusive = false;
            }
            drain_queue(state, graph, pack.id).await?;
        }
    }
    Ok(())
}

/// Hard mode has no buffered-ghost data to refresh — DISTANT reads always
/// go straight to the owner via [`HardMutexPolicy`] — so its `DataSync` half
/// exists only to give the shared [`HardState`] a guaranteed place to drain
/// incoming writebacks every barrier, and to flip the shared epoch.
pub struct HardDataSync<T> {
    state: Arc<Mutex<HardState>>,
    _marker: PhantomData<T>,
}

impl<T> HardDataSync<T> {
    pub(crate) fn new(state: Arc<Mutex<HardState>>) -> Self {
        Self {
            state,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Clone + Serialize + DeserializeOwned + Send + Sync> DataSync<T> for HardDataSync<T> {
    async fn synchronize_all(&mut self, graph: &mut dyn GraphAccess<T>) -> Result<()> {
        drain_incoming_writebacks(&self.state, graph).await?;
        let mut guard = self.state.lock().expect("hard sync state poisoned");
        guard.epoch = guard.epoch.flip();
        Ok(())
    }

    async fn synchronize_nodes(
        &mut self,
        graph: &mut dyn GraphAccess<T>,
        _nodes: &[DistributedId],
    ) -> Result<()> {
        drain_incoming_writebacks(&self.state, graph).await
    }
}

/// Eager link/unlink via `Communicator::issend`, queued and tested rather
/// than buffered until a barrier (`hard_sync_linker.h`'s `LinkClient`).
/// `synchronize()` drains every in-flight send while also servicing incoming
/// link traffic (the same pump discipline `waitSendRequest` uses), then runs
/// a termination round: repeated `all_gather` votes until every rank reports
/// quiescence in the same round. This replaces the original's ring-based
/// `TerminationAlgorithm` with a simpler repeated-consensus check — see
/// DESIGN.md.
pub struct HardSyncLinker<T> {
    epoch: Epoch,
    pending_sends: Vec<Box<dyn PendingSend>>,
    pending_removals: Vec<DistributedId>,
    _marker: PhantomData<T>,
}

impl<T> HardSyncLinker<T> {
    pub fn new() -> Self {
        Self {
            epoch: Epoch::Even,
            pending_sends: Vec::new(),
            pending_removals: Vec::new(),
            _marker: PhantomData,
        }
    }

    async fn service_incoming(&mut self, graph: &mut dyn GraphAccess<T>) -> Result<()>
    where
        T: Send + Sync,
    {
        let rank = graph.rank();
        let n = graph.comm().num_ranks();
        for peer in 0..n {
            if peer == rank {
                continue;
            }
            let link_tag = Tag::new(self.epoch, Kind::Link);
            if graph.comm().iprobe(peer, link_tag) {
                let bytes = graph.comm().recv(peer, link_tag).await.change_context(ErrorKind::CommunicationFailure)?;
                let stub: EdgeStub = serde_json::from_slice(&bytes).change_context(ErrorKind::CodecFailure)?;
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
            let unlink_tag = Tag::new(self.epoch, Kind::Unlink);
            if graph.comm().iprobe(peer, unlink_tag) {
                let bytes = graph
                    .comm()
                    .recv(peer, unlink_tag)
                    .await
                    .change_context(ErrorKind::CommunicationFailure)?;
                let id: DistributedId = serde_json::from_slice(&bytes).change_context(ErrorKind::CodecFailure)?;
                let _ = graph.local_unlink(id);
            }
            let remove_tag = Tag::new(self.epoch, Kind::RemoveNode);
            if graph.comm().iprobe(peer, remove_tag) {
                let bytes = graph
                    .comm()
                    .recv(peer, remove_tag)
                    .await
                    .change_context(ErrorKind::CommunicationFailure)?;
                let id: DistributedId = serde_json::from_slice(&bytes).change_context(ErrorKind::CodecFailure)?;
                self.pending_removals.push(id);
            }
        }
        Ok(())
    }
}

impl<T> Default for HardSyncLinker<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + Sync> SyncLinker<T> for HardSyncLinker<T> {
    fn link(&mut self, graph: &dyn GraphAccess<T>, edge: DistributedId) {
        if let (Some((source, target)), Some((layer, weight))) =
            (graph.edge_endpoints(edge), graph.edge_layer_weight(edge))
        {
            let rank = graph.rank();
            for endpoint in [source, target] {
                if let Some(owner) = graph.owning_rank(endpoint) {
                    if owner != rank {
                        let stub = EdgeStub {
                            id: edge,
                            layer,
                            weight,
                            source: NodeStub {
                                id: source,
                                origin_rank: graph.owning_rank(source).unwrap_or(rank),
                            },
                            target: NodeStub {
                                id: target,
                                origin_rank: graph.owning_rank(target).unwrap_or(rank),
                            },
                        };
                        if let Ok(bytes) = serde_json::to_vec(&stub) {
                            let pending = graph.comm().issend(owner, Tag::new(self.epoch, Kind::Link), bytes);
                            self.pending_sends.push(pending);
                        }
                    }
                }
            }
        }
    }

    fn unlink(&mut self, graph: &dyn GraphAccess<T>, edge: DistributedId) {
        if let Some((source, target)) = graph.edge_endpoints(edge) {
            let rank = graph.rank();
            for endpoint in [source, target] {
                if let Some(owner) = graph.owning_rank(endpoint) {
                    if owner != rank {
                        if let Ok(bytes) = serde_json::to_vec(&edge) {
                            let pending = graph.comm().issend(owner, Tag::new(self.epoch, Kind::Unlink), bytes);
                            self.pending_sends.push(pending);
                        }
                    }
                }
            }
        }
    }

    fn remove_node(&mut self, graph: &dyn GraphAccess<T>, node: DistributedId) {
        match graph.owning_rank(node) {
            Some(owner) if owner != graph.rank() => {
                if let Ok(bytes) = serde_json::to_vec(&node) {
                    let pending = graph.comm().issend(owner, Tag::new(self.epoch, Kind::RemoveNode), bytes);
                    self.pending_sends.push(pending);
                }
            }
            _ => self.pending_removals.push(node),
        }
    }

    async fn synchronize(&mut self, graph: &mut dyn GraphAccess<T>) -> Result<()> {
        loop {
            self.pending_sends.retain_mut(|pending| !pending.test());
            self.service_incoming(graph).await?;
            let locally_done = self.pending_sends.is_empty();
            let vote = vec![locally_done as u8];
            let votes = graph
                .comm()
                .all_gather(Tag::new(self.epoch, Kind::Bulk), vote)
                .await
                .change_context(ErrorKind::CommunicationFailure)?;
            if votes.iter().all(|v| v.first() == Some(&1u8)) {
                break;
            }
            tokio::task::yield_now().await;
        }

        let mut local_to_erase = Vec::new();
        for &node_id in &self.pending_removals {
            match graph.owning_rank(node_id) {
                Some(owner) if owner != graph.rank() => {
                    if let Ok(bytes) = serde_json::to_vec(&node_id) {
                        let pending = graph.comm().issend(owner, Tag::new(self.epoch, Kind::RemoveNode), bytes);
                        self.pending_sends.push(pending);
                    }
                }
                _ => local_to_erase.push(node_id),
            }
        }
        self.pending_removals.clear();
        while !self.pending_sends.is_empty() {
            self.pending_sends.retain_mut(|pending| !pending.test());
            self.service_incoming(graph).await?;
            if !self.pending_sends.is_empty() {
                tokio::task::yield_now().await;
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

/// Wires [`HardMutexPolicy`], [`HardDataSync`], and [`HardSyncLinker`] into
/// one `SyncMode`, giving the mutex and data-sync halves a shared
/// [`HardState`] so writebacks arriving while this rank is elsewhere get
/// drained at the next barrier regardless of which half happens to be
/// running.
pub struct HardSyncMode<T> {
    mutex: HardMutexPolicy<T>,
    data_sync: HardDataSync<T>,
    sync_linker: HardSyncLinker<T>,
}

impl<T> HardSyncMode<T> {
    pub fn new() -> Self {
        let state = Arc::new(Mutex::new(HardState::new()));
        Self {
            mutex: HardMutexPolicy::new(Arc::clone(&state)),
            data_sync: HardDataSync::new(state),
            sync_linker: HardSyncLinker::new(),
        }
    }
}

impl<T> Default for HardSyncMode<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Serialize + DeserializeOwned + Send + Sync> graph::SyncMode<T> for HardSyncMode<T> {
    type Mutex = HardMutexPolicy<T>;
    type DataSync = HardDataSync<T>;
    type SyncLinker = HardSyncLinker<T>;

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
