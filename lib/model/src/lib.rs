//! C9: the distributed move algorithm. Generalizes
//! `fpmas::model::spatial::DistributedMoveAlgorithm`
//! (`dist_move_algo.h`) to Rust: a scheduler-driven client of
//! [`graph::DistributedGraph`] that grows a cell/agent location graph to a
//! fixed point using only `link`/`unlink`/`synchronize`, never touching
//! graph internals directly.
//!
//! Every node in the graph plays one of two roles, distinguished by
//! [`SpatialEntity::role`]: a cell (a fixed point in the spatial topology,
//! linked to its neighbors on [`layer::CELL_SUCCESSOR`]) or an agent (a
//! mobile entity with a mobility range and a perception range). Both share
//! the same payload type `T`, mirroring the graph being monomorphic over one
//! node type.

mod algorithm;
pub mod end_condition;

pub use algorithm::run;
pub use end_condition::{DynamicEndCondition, EndCondition, StaticEndCondition};

/// Edge layers the algorithm reads and writes. `CELL_SUCCESSOR` is the only
/// one the caller is expected to have already populated; the rest are
/// entirely owned by this crate and rebuilt (or extended) by every call to
/// [`run`].
pub mod layer {
    /// Static cell-to-cell adjacency, set up once by whoever builds the
    /// spatial topology. Never written by this crate.
    pub const CELL_SUCCESSOR: u32 = 100;
    /// Agent -> cell, left by `move_to`, consumed on the next round.
    pub const NEW_LOCATION: u32 = 101;
    /// Agent -> cell, the agent's current confirmed location. At most one
    /// per agent.
    pub const LOCATION: u32 = 102;
    /// Agent -> cell, an unconfirmed frontier edge mid-expansion. Transient:
    /// every edge on this layer is unlinked by the end of the round that
    /// created it.
    pub const NEW_MOVE: u32 = 103;
    /// Agent -> cell, confirmed reachable within the agent's mobility range.
    pub const MOVE: u32 = 104;
    /// Agent -> cell, an unconfirmed perception-frontier edge. Transient,
    /// same lifecycle as `NEW_MOVE`.
    pub const NEW_PERCEIVE: u32 = 105;
    /// Agent -> cell, confirmed reachable within the agent's perception
    /// range.
    pub const PERCEIVE: u32 = 106;
    /// Agent -> agent, confirmed: the source agent perceives the target
    /// agent (they share a cell the source can see). Rebuilt from scratch by
    /// every call to `update_perceptions`.
    pub const PERCEPTION: u32 = 107;
}

/// Which half of the cell/agent split a node payload plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Cell,
    Agent,
}

/// What the algorithm needs to know about a node's payload. Cells only need
/// to answer `role()`; the range accessors default to `0` since they are
/// never consulted for a cell.
pub trait SpatialEntity {
    fn role(&self) -> Role;

    /// Hops an agent may move from its current location. Unused for cells.
    fn mobility_range(&self) -> u32 {
        0
    }

    /// Hops an agent may perceive from its current location. Unused for
    /// cells.
    fn perception_range(&self) -> u32 {
        0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use comm::LocalWorld;
    use graph::DistributedGraph;
    use ids::DistributedId;
    use serde::{Deserialize, Serialize};
    use sync::GhostMode;

    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum Entity {
        Cell,
        Agent { mobility: u32, perception: u32 },
    }

    impl Default for Entity {
        fn default() -> Self {
            Entity::Cell
        }
    }

    impl SpatialEntity for Entity {
        fn role(&self) -> Role {
            match self {
                Entity::Cell => Role::Cell,
                Entity::Agent { .. } => Role::Agent,
            }
        }

        fn mobility_range(&self) -> u32 {
            match self {
                Entity::Agent { mobility, .. } => *mobility,
                Entity::Cell => 0,
            }
        }

        fn perception_range(&self) -> u32 {
            match self {
                Entity::Agent { perception, .. } => *perception,
                Entity::Cell => 0,
            }
        }
    }

    fn single_rank_graph() -> DistributedGraph<Entity, GhostMode<Entity>> {
        let world = LocalWorld::new(1);
        let comm = Arc::new(world.communicator(0));
        DistributedGraph::new(0, comm, GhostMode::new())
    }

    /// An 8-cell ring with two agents whose mobility/perception ranges
    /// overlap just enough for each to end up perceiving the other, and not
    /// enough to reach the far side of the ring. Mirrors the fixed-point
    /// scenario of a cyclic topology converging in a bounded round count.
    #[tokio::test]
    async fn ring_topology_converges_to_expected_fixed_point() {
        let mut graph = single_rank_graph();

        let cells: Vec<DistributedId> = (0..8).map(|_| graph.build_node(Entity::Cell, 1.0)).collect();
        for i in 0..8usize {
            graph
                .link(cells[i], cells[(i + 1) % 8], layer::CELL_SUCCESSOR)
                .unwrap();
        }

        let agent_a = graph.build_node(
            Entity::Agent {
                mobility: 2,
                perception: 1,
            },
            1.0,
        );
        let agent_b = graph.build_node(
            Entity::Agent {
                mobility: 1,
                perception: 1,
            },
            1.0,
        );
        graph.link(agent_a, cells[0], layer::NEW_LOCATION).unwrap();
        graph.link(agent_b, cells[1], layer::NEW_LOCATION).unwrap();

        let agents = vec![agent_a, agent_b];
        let mut end = StaticEndCondition::new(2);
        run(&mut graph, &cells, &agents, &mut end).await.unwrap();

        assert_eq!(graph.neighbors_on_layer(agent_a, layer::LOCATION), vec![cells[0]]);
        assert_eq!(graph.neighbors_on_layer(agent_b, layer::LOCATION), vec![cells[1]]);

        let mut move_a = graph.neighbors_on_layer(agent_a, layer::MOVE);
        move_a.sort();
        let mut expected_move_a = vec![cells[0], cells[1], cells[7], cells[2], cells[6]];
        expected_move_a.sort();
        assert_eq!(move_a, expected_move_a);

        let mut move_b = graph.neighbors_on_layer(agent_b, layer::MOVE);
        move_b.sort();
        let mut expected_move_b = vec![cells[1], cells[0], cells[2]];
        expected_move_b.sort();
        assert_eq!(move_b, expected_move_b);

        assert!(graph.out_edges_on_layer(agent_a, layer::NEW_MOVE).is_empty());
        assert!(graph.out_edges_on_layer(agent_b, layer::NEW_MOVE).is_empty());
        assert!(graph.out_edges_on_layer(agent_a, layer::NEW_PERCEIVE).is_empty());
        assert!(graph.out_edges_on_layer(agent_b, layer::NEW_PERCEIVE).is_empty());

        assert!(graph.has_edge_on_layer(agent_a, agent_b, layer::PERCEPTION));
        assert!(graph.has_edge_on_layer(agent_b, agent_a, layer::PERCEPTION));
    }

    #[tokio::test]
    async fn agent_with_zero_range_only_confirms_its_own_cell() {
        let mut graph = single_rank_graph();
        let cells: Vec<DistributedId> = (0..4).map(|_| graph.build_node(Entity::Cell, 1.0)).collect();
        for i in 0..4usize {
            graph
                .link(cells[i], cells[(i + 1) % 4], layer::CELL_SUCCESSOR)
                .unwrap();
        }
        let agent = graph.build_node(
            Entity::Agent {
                mobility: 0,
                perception: 0,
            },
            1.0,
        );
        graph.link(agent, cells[0], layer::NEW_LOCATION).unwrap();

        let mut end = StaticEndCondition::new(1);
        run(&mut graph, &cells, &[agent], &mut end).await.unwrap();

        assert_eq!(graph.neighbors_on_layer(agent, layer::MOVE), vec![cells[0]]);
        assert_eq!(graph.neighbors_on_layer(agent, layer::PERCEIVE), vec![cells[0]]);
    }

    #[tokio::test]
    async fn moving_to_the_current_cell_is_legal() {
        let mut graph = single_rank_graph();
        let cell = graph.build_node(Entity::Cell, 1.0);
        let agent = graph.build_node(
            Entity::Agent {
                mobility: 1,
                perception: 1,
            },
            1.0,
        );
        graph.link(agent, cell, layer::NEW_LOCATION).unwrap();
        let mut end = StaticEndCondition::new(1);
        run(&mut graph, &[cell], &[agent], &mut end).await.unwrap();
        assert_eq!(graph.neighbors_on_layer(agent, layer::LOCATION), vec![cell]);

        // Requesting the same cell again must not leave a stray LOCATION edge.
        graph.link(agent, cell, layer::NEW_LOCATION).unwrap();
        let mut end = StaticEndCondition::new(1);
        run(&mut graph, &[cell], &[agent], &mut end).await.unwrap();
        assert_eq!(graph.neighbors_on_layer(agent, layer::LOCATION), vec![cell]);
    }
}
