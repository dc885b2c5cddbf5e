use std::{
    collections::HashSet,
    sync::Arc,
};

use comm::Communicator;
use ids::DistributedId;
use local_graph::LocalGraph;

use crate::{
    access::{unknown_id, GraphAccess},
    error::Result,
    location::LocationManager,
};

/// Borrows every field of a [`crate::DistributedGraph`] except its
/// `sync_mode`, so sync-mode methods can be handed a `&mut dyn GraphAccess`
/// view without aliasing the `&mut self.sync_mode` the caller is also
/// holding. See the module docs on `access` for why this exists.
pub struct GraphView<'a, T> {
    pub rank: u32,
    pub comm: &'a Arc<dyn Communicator>,
    pub local: &'a mut LocalGraph<T>,
    pub location: &'a mut LocationManager,
    pub unsynchronized: &'a mut HashSet<DistributedId>,
}

impl<T: Clone + Default + Send + Sync> GraphAccess<T> for GraphView<'_, T> {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn comm(&self) -> &Arc<dyn Communicator> {
        self.comm
    }

    fn distant_node_ids(&self) -> Vec<DistributedId> {
        self.location.distant_nodes().collect()
    }

    fn local_node_ids(&self) -> Vec<DistributedId> {
        self.location.local_nodes().collect()
    }

    fn owning_rank(&self, id: DistributedId) -> Option<u32> {
        self.location.location(id)
    }

    fn node_payload(&self, id: DistributedId) -> Option<&T> {
        self.local.get_node(id).map(|node| &node.data)
    }

    fn node_weight(&self, id: DistributedId) -> Option<f64> {
        self.local.get_node(id).map(|node| node.weight)
    }

    fn apply_node_update(&mut self, id: DistributedId, data: T, weight: f64) -> Result<()> {
        let node = self.local.get_node_mut(id).ok_or_else(|| unknown_id(id))?;
        node.data = data;
        node.weight = weight;
        Ok(())
    }

    fn import_node(
        &mut self,
        id: DistributedId,
        origin_rank: u32,
        data: T,
        weight: f64,
    ) -> Result<()> {
        if self.local.contains_node(id) {
            let node = self.local.get_node_mut(id).expect("checked above");
            node.data = data;
            node.weight = weight;
        } else {
            self.local.insert_node(id, data, weight);
        }
        // An imported node always becomes LOCAL on the rank importing it.
        let _ = origin_rank;
        self.location.set_local(id, self.rank);
        Ok(())
    }

    fn import_edge(
        &mut self,
        id: DistributedId,
        layer: u32,
        weight: f64,
        source: DistributedId,
        source_origin: u32,
        target: DistributedId,
        target_origin: u32,
    ) -> Result<()> {
        for (endpoint, origin) in [(source, source_origin), (target, target_origin)] {
            if !self.local.contains_node(endpoint) {
                self.local.insert_node(endpoint, T::default(), 1.0);
                self.location.set_distant(endpoint, origin);
                self.unsynchronized.insert(endpoint);
            }
        }
        if !self.local.contains_edge(id) {
            self.local
                .insert_edge(id, layer, weight, source, target)
                .map_err(|_| unknown_id(source))?;
        }
        Ok(())
    }

    fn local_unlink(&mut self, id: DistributedId) -> Result<()> {
        self.local.erase_edge(id).map_err(|_| unknown_id(id))
    }

    fn local_erase_node(&mut self, id: DistributedId) -> Result<()> {
        self.location.forget(id);
        self.local.erase_node(id).map_err(|_| unknown_id(id))
    }

    fn incident_edges(&self, id: DistributedId) -> Vec<DistributedId> {
        self.local
            .get_node(id)
            .map(|node| node.incident_edges().collect())
            .unwrap_or_default()
    }

    fn edge_endpoints(&self, id: DistributedId) -> Option<(DistributedId, DistributedId)> {
        self.local.get_edge(id).map(|edge| (edge.source, edge.target))
    }

    fn edge_layer_weight(&self, id: DistributedId) -> Option<(u32, f64)> {
        self.local.get_edge(id).map(|edge| (edge.layer, edge.weight))
    }

    fn mark_unsynchronized(&mut self, id: DistributedId) {
        self.unsynchronized.insert(id);
    }

    fn clear_unsynchronized(&mut self, id: DistributedId) {
        self.unsynchronized.remove(&id);
    }
}
