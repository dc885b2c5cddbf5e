//! The per-round loop itself: `AlgoTask::run`'s `while(!end.end())` body,
//! plus the trailing `update_perceptions` pass.

use graph::{DistributedGraph, Result, SyncMode};
use ids::DistributedId;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::{layer, EndCondition, SpatialEntity};

/// Grows `cells`' and `agents`' LOCATION/MOVE/PERCEIVE/PERCEPTION edges to a
/// fixed point, then returns. `cells` and `agents` must be this rank's local
/// node ids, partitioned by [`SpatialEntity::role`]; mixing them up is a
/// caller bug, not something this function tries to detect.
///
/// An agent requests a move beforehand by calling
/// [`DistributedGraph::link`] itself: `agent -> cell` on
/// [`layer::NEW_LOCATION`]. Moving to the agent's own current cell is a
/// legal no-op request, consumed the same as any other.
pub async fn run<T, S>(
    graph: &mut DistributedGraph<T, S>,
    cells: &[DistributedId],
    agents: &[DistributedId],
    end: &mut dyn EndCondition,
) -> Result<()>
where
    T: SpatialEntity + Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: SyncMode<T>,
{
    end.init();
    let mut round = 0u32;
    while !end.end() {
        debug!(round, "model: cell phase");
        for &cell in cells {
            handle_new_location(graph, cell)?;
            handle_move(graph, cell)?;
            handle_perceive(graph, cell)?;
        }
        graph.synchronize().await?;

        debug!(round, "model: agent phase");
        for &agent in agents {
            handle_new_move(graph, agent)?;
            handle_new_perceive(graph, agent)?;
        }
        graph.synchronize().await?;

        end.step();
        round += 1;
    }

    for &cell in cells {
        update_perceptions(graph, cell)?;
    }
    graph.synchronize().await?;
    debug!(rounds = round, "model: converged");

    Ok(())
}

/// Consumes incoming `NEW_LOCATION` edges, confirms `LOCATION`, and seeds the
/// agent's confirmed move/perceive reach with the cell itself (distance 0,
/// budgeted with the agent's own ranges) if it isn't seeded already.
fn handle_new_location<T, S>(graph: &mut DistributedGraph<T, S>, cell: DistributedId) -> Result<()>
where
    T: SpatialEntity + Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: SyncMode<T>,
{
    for edge_id in graph.in_edges_on_layer(cell, layer::NEW_LOCATION) {
        let (agent, _) = match graph.edge_endpoints(edge_id) {
            Some(endpoints) => endpoints,
            None => continue,
        };
        for old_location in graph.out_edges_on_layer(agent, layer::LOCATION) {
            graph.unlink(old_location)?;
        }
        graph.unlink(edge_id)?;
        graph.link(agent, cell, layer::LOCATION)?;

        let (mobility, perception) = match graph.node_data(agent) {
            Some(data) => (data.mobility_range(), data.perception_range()),
            None => continue,
        };
        if !graph.has_edge_on_layer(agent, cell, layer::MOVE) {
            graph.link_weighted(agent, cell, layer::MOVE, mobility as f64)?;
        }
        if !graph.has_edge_on_layer(agent, cell, layer::PERCEIVE) {
            graph.link_weighted(agent, cell, layer::PERCEIVE, perception as f64)?;
        }
    }
    Ok(())
}

/// Re-derives the move frontier from every confirmed `MOVE` edge into `cell`
/// whose remaining budget (its weight) is still positive, proposing one hop
/// further as a `NEW_MOVE` edge. Reading the *confirmed* layer instead of the
/// transient one means a cell already reached in an earlier round keeps
/// contributing to frontier growth every round, not just the round it was
/// first confirmed in — required for the frontier to cross rank boundaries,
/// since `confirm_frontier` unlinks the transient layer every round.
fn handle_move<T, S>(graph: &mut DistributedGraph<T, S>, cell: DistributedId) -> Result<()>
where
    T: SpatialEntity + Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: SyncMode<T>,
{
    expand_frontier(graph, cell, layer::MOVE, layer::NEW_MOVE)
}

/// Same as [`handle_move`], on the perceive layers.
fn handle_perceive<T, S>(graph: &mut DistributedGraph<T, S>, cell: DistributedId) -> Result<()>
where
    T: SpatialEntity + Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: SyncMode<T>,
{
    expand_frontier(graph, cell, layer::PERCEIVE, layer::NEW_PERCEIVE)
}

fn expand_frontier<T, S>(
    graph: &mut DistributedGraph<T, S>,
    cell: DistributedId,
    confirmed_layer: u32,
    frontier_layer: u32,
) -> Result<()>
where
    T: SpatialEntity + Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: SyncMode<T>,
{
    for edge_id in graph.in_edges_on_layer(cell, confirmed_layer) {
        let (agent, _) = match graph.edge_endpoints(edge_id) {
            Some(endpoints) => endpoints,
            None => continue,
        };
        let remaining = graph.edge_weight(edge_id).unwrap_or(0.0);
        if remaining <= 0.0 {
            continue;
        }
        for neighbor in graph.neighbors_on_layer(cell, layer::CELL_SUCCESSOR) {
            if neighbor == agent {
                continue;
            }
            if graph.has_edge_on_layer(agent, neighbor, confirmed_layer)
                || graph.has_edge_on_layer(agent, neighbor, frontier_layer)
            {
                continue;
            }
            graph.link_weighted(agent, neighbor, frontier_layer, remaining - 1.0)?;
        }
    }
    Ok(())
}

/// Tests every outgoing frontier edge of `agent` and confirms it, carrying
/// its remaining hop budget onto the confirmed edge's weight so next round's
/// [`expand_frontier`] can keep growing from it. Dedupes duplicate frontier
/// edges reaching the same cell (possible whenever the cell topology has a
/// cycle shorter than the round count) down to at most one confirmed edge.
/// Every frontier edge touched is unlinked, confirmed or not — the frontier
/// layers never carry state past the round that built them.
fn handle_new_move<T, S>(graph: &mut DistributedGraph<T, S>, agent: DistributedId) -> Result<()>
where
    T: SpatialEntity + Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: SyncMode<T>,
{
    confirm_frontier(graph, agent, layer::NEW_MOVE, layer::MOVE)
}

/// Same as [`handle_new_move`], on the perceive layers.
fn handle_new_perceive<T, S>(graph: &mut DistributedGraph<T, S>, agent: DistributedId) -> Result<()>
where
    T: SpatialEntity + Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: SyncMode<T>,
{
    confirm_frontier(graph, agent, layer::NEW_PERCEIVE, layer::PERCEIVE)
}

fn confirm_frontier<T, S>(
    graph: &mut DistributedGraph<T, S>,
    agent: DistributedId,
    frontier_layer: u32,
    confirmed_layer: u32,
) -> Result<()>
where
    T: SpatialEntity + Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: SyncMode<T>,
{
    for edge_id in graph.out_edges_on_layer(agent, frontier_layer) {
        let (_, cell) = match graph.edge_endpoints(edge_id) {
            Some(endpoints) => endpoints,
            None => continue,
        };
        let remaining = graph.edge_weight(edge_id).unwrap_or(0.0);
        if !graph.has_edge_on_layer(agent, cell, confirmed_layer) {
            graph.link_weighted(agent, cell, confirmed_layer, remaining)?;
        }
        graph.unlink(edge_id)?;
    }
    Ok(())
}

/// Runs once, after the round loop has converged: every agent with a
/// `PERCEIVE` edge to `cell` gets a `PERCEPTION` edge to every agent located
/// at `cell` (except itself).
fn update_perceptions<T, S>(graph: &mut DistributedGraph<T, S>, cell: DistributedId) -> Result<()>
where
    T: SpatialEntity + Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: SyncMode<T>,
{
    let occupants: Vec<DistributedId> = graph
        .in_edges_on_layer(cell, layer::LOCATION)
        .into_iter()
        .filter_map(|edge_id| graph.edge_endpoints(edge_id))
        .map(|(agent, _)| agent)
        .collect();
    let perceivers: Vec<DistributedId> = graph
        .in_edges_on_layer(cell, layer::PERCEIVE)
        .into_iter()
        .filter_map(|edge_id| graph.edge_endpoints(edge_id))
        .map(|(agent, _)| agent)
        .collect();
    for &perceiver in &perceivers {
        for &occupant in &occupants {
            if perceiver == occupant {
                continue;
            }
            if !graph.has_edge_on_layer(perceiver, occupant, layer::PERCEPTION) {
                graph.link(perceiver, occupant, layer::PERCEPTION)?;
            }
        }
    }
    Ok(())
}
