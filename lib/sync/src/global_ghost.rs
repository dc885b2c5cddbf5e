//! Global Ghost sync mode: identical to Ghost except the mutex keeps its
//! own snapshot of every node's data, refreshed once per `synchronize()`
//! rather than read straight through to the live value. Grounded on
//! `fpmas/synchro/ghost/global_ghost_mode.h`, whose `GlobalGhostMode<T>` is
//! just `GhostMode<T, GlobalGhostMutex>` — the data-sync and sync-linker
//! halves are untouched, so this module reuses [`crate::ghost::GhostDataSync`]
//! and [`crate::ghost::GhostSyncLinker`] as-is.

use std::collections::HashMap;

use async_trait::async_trait;
use graph::{ErrorKind, GraphAccess, MutexPolicy, Result, SyncMode};
use ids::DistributedId;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::ghost::{GhostDataSync, GhostSyncLinker};

fn unknown_id(id: DistributedId) -> error_stack::Report<ErrorKind> {
    error_stack::Report::new(ErrorKind::UnknownId(id))
}

/// Read/acquire always return the snapshot taken at the last `synchronize`,
/// even for LOCAL nodes — the strongest reproducibility guarantee among the
/// three sync modes, since neither LOCAL nor DISTANT reads can observe a
/// write made since the previous barrier.
#[derive(Default)]
pub struct GlobalGhostMutexPolicy<T> {
    snapshot: HashMap<DistributedId, T>,
}

impl<T> GlobalGhostMutexPolicy<T> {
    pub fn new() -> Self {
        Self {
            snapshot: HashMap::new(),
        }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> MutexPolicy<T> for GlobalGhostMutexPolicy<T> {
    async fn read(&mut self, graph: &dyn GraphAccess<T>, id: DistributedId) -> Result<T> {
        match self.snapshot.get(&id) {
            Some(data) => Ok(data.clone()),
            None => graph.node_payload(id).cloned().ok_or_else(|| unknown_id(id)),
        }
    }

    async fn release_read(&mut self, _graph: &dyn GraphAccess<T>, _id: DistributedId) -> Result<()> {
        Ok(())
    }

    async fn acquire(&mut self, graph: &dyn GraphAccess<T>, id: DistributedId) -> Result<T> {
        match self.snapshot.get(&id) {
            Some(data) => Ok(data.clone()),
            None => graph.node_payload(id).cloned().ok_or_else(|| unknown_id(id)),
        }
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

    fn on_synchronize(&mut self, graph: &dyn GraphAccess<T>, id: DistributedId) {
        if let Some(data) = graph.node_payload(id) {
            self.snapshot.insert(id, data.clone());
        }
    }

    fn forget(&mut self, id: DistributedId) {
        self.snapshot.remove(&id);
    }
}

pub struct GlobalGhostMode<T> {
    mutex: GlobalGhostMutexPolicy<T>,
    data_sync: GhostDataSync<T>,
    sync_linker: GhostSyncLinker<T>,
}

impl<T> GlobalGhostMode<T> {
    pub fn new() -> Self {
        Self {
            mutex: GlobalGhostMutexPolicy::new(),
            data_sync: GhostDataSync::new(),
            sync_linker: GhostSyncLinker::new(),
        }
    }
}

impl<T> Default for GlobalGhostMode<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Serialize + DeserializeOwned + Send + Sync> SyncMode<T> for GlobalGhostMode<T> {
    type Mutex = GlobalGhostMutexPolicy<T>;
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
