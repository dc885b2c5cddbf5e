//! A plain, location-oblivious directed layered multigraph.
//!
//! `LocalGraph` knows nothing about which rank owns which node; that is the
//! distributed graph's concern (see the `graph` crate). This crate only
//! guarantees the structural invariants: a node's incident edges are indexed
//! per layer, erasing a node erases its incident edges first, and every
//! mutation fires callbacks synchronously, in registration order.

use std::collections::HashMap;

use ids::DistributedId;

#[derive(Debug, Clone)]
pub struct Node<T> {
    pub id: DistributedId,
    pub data: T,
    pub weight: f64,
    in_edges: HashMap<u32, Vec<DistributedId>>,
    out_edges: HashMap<u32, Vec<DistributedId>>,
}

impl<T> Node<T> {
    fn new(id: DistributedId, data: T, weight: f64) -> Self {
        Self {
            id,
            data,
            weight,
            in_edges: HashMap::new(),
            out_edges: HashMap::new(),
        }
    }

    pub fn in_edges(&self, layer: u32) -> &[DistributedId] {
        self.in_edges.get(&layer).map_or(&[], Vec::as_slice)
    }

    pub fn out_edges(&self, layer: u32) -> &[DistributedId] {
        self.out_edges.get(&layer).map_or(&[], Vec::as_slice)
    }

    /// All edges incident to this node, on any layer, in either direction.
    pub fn incident_edges(&self) -> impl Iterator<Item = DistributedId> + '_ {
        self.in_edges
            .values()
            .chain(self.out_edges.values())
            .flatten()
            .copied()
    }
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub id: DistributedId,
    pub layer: u32,
    pub weight: f64,
    pub source: DistributedId,
    pub target: DistributedId,
}

/// Fired synchronously, in registration order, on every structural mutation.
/// Agent-group bookkeeping and telemetry hook in here instead of through
/// inheritance.
pub enum GraphEvent {
    InsertNode(DistributedId),
    EraseNode(DistributedId),
    InsertEdge(DistributedId),
    EraseEdge(DistributedId),
}

pub trait GraphCallback<T>: Send {
    fn on_event(&mut self, graph: &LocalGraph<T>, event: &GraphEvent);
}

#[derive(Debug, thiserror::Error)]
pub enum LocalGraphError {
    #[error("unknown node id {0}")]
    UnknownNode(DistributedId),
    #[error("unknown edge id {0}")]
    UnknownEdge(DistributedId),
}

pub struct LocalGraph<T> {
    nodes: HashMap<DistributedId, Node<T>>,
    edges: HashMap<DistributedId, Edge>,
    callbacks: Vec<Box<dyn GraphCallback<T>>>,
}

impl<T> Default for LocalGraph<T> {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            callbacks: Vec::new(),
        }
    }
}

impl<T> LocalGraph<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_callback(&mut self, callback: Box<dyn GraphCallback<T>>) {
        self.callbacks.push(callback);
    }

    fn fire(&mut self, event: GraphEvent) {
        if self.callbacks.is_empty() {
            return;
        }
        // Callbacks may want to read the graph; swap them out so we don't
        // need `&mut self` and `&self` live simultaneously.
        let mut callbacks = std::mem::take(&mut self.callbacks);
        for callback in &mut callbacks {
            callback.on_event(self, &event);
        }
        self.callbacks = callbacks;
    }

    pub fn insert_node(&mut self, id: DistributedId, data: T, weight: f64) {
        self.nodes.insert(id, Node::new(id, data, weight));
        self.fire(GraphEvent::InsertNode(id));
    }

    pub fn get_node(&self, id: DistributedId) -> Option<&Node<T>> {
        self.nodes.get(&id)
    }

    pub fn get_node_mut(&mut self, id: DistributedId) -> Option<&mut Node<T>> {
        self.nodes.get_mut(&id)
    }

    pub fn contains_node(&self, id: DistributedId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node<T>> {
        self.nodes.values()
    }

    /// Erases a node, first erasing every edge incident to it.
    pub fn erase_node(&mut self, id: DistributedId) -> Result<(), LocalGraphError> {
        if !self.nodes.contains_key(&id) {
            return Err(LocalGraphError::UnknownNode(id));
        }
        let incident: Vec<_> = self.nodes[&id].incident_edges().collect();
        for edge_id in incident {
            // An edge may already have been erased from the other endpoint's
            // pass over the same incident list; ignore if so.
            let _ = self.erase_edge(edge_id);
        }
        self.nodes.remove(&id);
        self.fire(GraphEvent::EraseNode(id));
        Ok(())
    }

    pub fn get_edge(&self, id: DistributedId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    pub fn contains_edge(&self, id: DistributedId) -> bool {
        self.edges.contains_key(&id)
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn insert_edge(
        &mut self,
        id: DistributedId,
        layer: u32,
        weight: f64,
        source: DistributedId,
        target: DistributedId,
    ) -> Result<(), LocalGraphError> {
        if !self.nodes.contains_key(&source) {
            return Err(LocalGraphError::UnknownNode(source));
        }
        if !self.nodes.contains_key(&target) {
            return Err(LocalGraphError::UnknownNode(target));
        }
        self.edges.insert(
            id,
            Edge {
                id,
                layer,
                weight,
                source,
                target,
            },
        );
        self.nodes
            .get_mut(&source)
            .expect("checked above")
            .out_edges
            .entry(layer)
            .or_default()
            .push(id);
        self.nodes
            .get_mut(&target)
            .expect("checked above")
            .in_edges
            .entry(layer)
            .or_default()
            .push(id);
        self.fire(GraphEvent::InsertEdge(id));
        Ok(())
    }

    pub fn erase_edge(&mut self, id: DistributedId) -> Result<(), LocalGraphError> {
        let edge = self
            .edges
            .remove(&id)
            .ok_or(LocalGraphError::UnknownEdge(id))?;
        if let Some(node) = self.nodes.get_mut(&edge.source) {
            remove_from_layer_list(&mut node.out_edges, edge.layer, id);
        }
        if let Some(node) = self.nodes.get_mut(&edge.target) {
            remove_from_layer_list(&mut node.in_edges, edge.layer, id);
        }
        self.fire(GraphEvent::EraseEdge(id));
        Ok(())
    }

    /// Re-indexes an edge from its current layer to `new_layer` on both
    /// endpoints' adjacency lists. Callers are responsible for checking
    /// whether the edge is eligible to switch layers (see
    /// `GraphError::InvalidLayerSwitch` in the `graph` crate).
    pub fn switch_layer(
        &mut self,
        id: DistributedId,
        new_layer: u32,
    ) -> Result<(), LocalGraphError> {
        let (source, target, old_layer) = {
            let edge = self
                .edges
                .get_mut(&id)
                .ok_or(LocalGraphError::UnknownEdge(id))?;
            let old_layer = edge.layer;
            edge.layer = new_layer;
            (edge.source, edge.target, old_layer)
        };
        if let Some(node) = self.nodes.get_mut(&source) {
            remove_from_layer_list(&mut node.out_edges, old_layer, id);
            node.out_edges.entry(new_layer).or_default().push(id);
        }
        if let Some(node) = self.nodes.get_mut(&target) {
            remove_from_layer_list(&mut node.in_edges, old_layer, id);
            node.in_edges.entry(new_layer).or_default().push(id);
        }
        Ok(())
    }
}

fn remove_from_layer_list(
    map: &mut HashMap<u32, Vec<DistributedId>>,
    layer: u32,
    id: DistributedId,
) {
    if let Some(list) = map.get_mut(&layer) {
        list.retain(|existing| *existing != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(rank: u32, seq: u64) -> DistributedId {
        DistributedId::new(rank, seq)
    }

    #[test]
    fn erasing_node_erases_incident_edges() {
        let mut graph: LocalGraph<u32> = LocalGraph::new();
        graph.insert_node(id(0, 0), 1, 1.0);
        graph.insert_node(id(0, 1), 2, 1.0);
        graph
            .insert_edge(id(0, 0), 0, 1.0, id(0, 0), id(0, 1))
            .unwrap();

        graph.erase_node(id(0, 0)).unwrap();

        assert!(!graph.contains_node(id(0, 0)));
        assert!(!graph.contains_edge(id(0, 0)));
        // the other endpoint survives, with the edge removed from its list
        assert!(graph.contains_node(id(0, 1)));
        assert!(graph.get_node(id(0, 1)).unwrap().in_edges(0).is_empty());
    }

    #[test]
    fn switch_layer_moves_adjacency_entries() {
        let mut graph: LocalGraph<u32> = LocalGraph::new();
        graph.insert_node(id(0, 0), 1, 1.0);
        graph.insert_node(id(0, 1), 2, 1.0);
        graph
            .insert_edge(id(0, 0), 0, 1.0, id(0, 0), id(0, 1))
            .unwrap();

        graph.switch_layer(id(0, 0), 5).unwrap();

        assert!(graph.get_node(id(0, 0)).unwrap().out_edges(0).is_empty());
        assert_eq!(graph.get_node(id(0, 0)).unwrap().out_edges(5), &[id(0, 0)]);
        assert_eq!(graph.get_node(id(0, 1)).unwrap().in_edges(5), &[id(0, 0)]);
    }

    #[test]
    fn callbacks_fire_in_registration_order() {
        struct Recorder(std::sync::Arc<std::sync::Mutex<Vec<&'static str>>>);
        impl GraphCallback<u32> for Recorder {
            fn on_event(&mut self, _graph: &LocalGraph<u32>, event: &GraphEvent) {
                let label = match event {
                    GraphEvent::InsertNode(_) => "insert-node",
                    GraphEvent::EraseNode(_) => "erase-node",
                    GraphEvent::InsertEdge(_) => "insert-edge",
                    GraphEvent::EraseEdge(_) => "erase-edge",
                };
                self.0.lock().unwrap().push(label);
            }
        }
        let log = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut graph: LocalGraph<u32> = LocalGraph::new();
        graph.register_callback(Box::new(Recorder(log.clone())));
        graph.insert_node(id(0, 0), 1, 1.0);
        graph.insert_node(id(0, 1), 2, 1.0);
        graph.erase_node(id(0, 1)).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["insert-node", "insert-node", "erase-node"]
        );
    }
}
