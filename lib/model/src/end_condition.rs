//! The two end-condition flavors `dist_move_algo.h` offers: a caller-supplied
//! fixed round count, or one computed once from the ranges actually present
//! in the agent population.

use comm::{Communicator, Epoch, Kind, Tag};
use error_stack::{IntoReport, ResultExt};
use graph::{DistributedGraph, ErrorKind, Result, SyncMode};
use ids::DistributedId;
use serde::{de::DeserializeOwned, Serialize};

use crate::SpatialEntity;

/// Drives the round loop in [`crate::run`]. `init`/`step`/`end` mirror
/// `StaticEndCondition`/`DynamicEndCondition`'s own `init`/`step`/`end`
/// trio.
pub trait EndCondition: Send {
    fn init(&mut self);
    fn end(&self) -> bool;
    fn step(&mut self);
}

/// Runs for a fixed number of rounds regardless of what the agent
/// population's ranges actually are. Cheap, and correct as long as
/// `max_rounds` is at least the largest range in play — rounds past the
/// point where every frontier has stopped growing are harmless no-ops.
#[derive(Debug, Clone, Copy)]
pub struct StaticEndCondition {
    max_rounds: u32,
    round: u32,
}

impl StaticEndCondition {
    pub fn new(max_rounds: u32) -> Self {
        Self { max_rounds, round: 0 }
    }
}

impl EndCondition for StaticEndCondition {
    fn init(&mut self) {
        self.round = 0;
    }

    fn end(&self) -> bool {
        self.round >= self.max_rounds
    }

    fn step(&mut self) {
        self.round += 1;
    }
}

/// Computes its round count once, from the largest of every local agent's
/// `max(mobility_range, perception_range)`, all-gathered across ranks so
/// every rank runs the same number of rounds. Matches
/// `DynamicEndCondition`'s own `allGather`-of-local-max construction.
#[derive(Debug, Clone, Copy)]
pub struct DynamicEndCondition {
    max_rounds: u32,
    round: u32,
}

impl DynamicEndCondition {
    /// Builds a `DynamicEndCondition` already primed with the cluster-wide
    /// max range. `agents` must be this rank's local agent ids.
    pub async fn compute<T, S>(
        comm: &dyn Communicator,
        graph: &DistributedGraph<T, S>,
        agents: &[DistributedId],
    ) -> Result<Self>
    where
        T: SpatialEntity + Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
        S: SyncMode<T>,
    {
        let local_max = agents
            .iter()
            .filter_map(|&id| graph.node_data(id))
            .map(|data| data.mobility_range().max(data.perception_range()))
            .max()
            .unwrap_or(0);
        let bytes = serde_json::to_vec(&local_max)
            .into_report()
            .change_context(ErrorKind::CodecFailure)?;
        // A fixed tag, independent of any sync-mode epoch: this collective
        // runs once per `run()` call, outside the barrier traffic any
        // `SyncMode` is tracking its own epoch for (Open Question 3).
        let tag = Tag::new(Epoch::Even, Kind::Bulk);
        let gathered = comm
            .all_gather(tag, bytes)
            .await
            .change_context(ErrorKind::CommunicationFailure)?;
        let max_rounds = gathered
            .into_iter()
            .filter_map(|bytes| serde_json::from_slice::<u32>(&bytes).ok())
            .max()
            .unwrap_or(local_max);
        Ok(Self { max_rounds, round: 0 })
    }
}

impl EndCondition for DynamicEndCondition {
    fn init(&mut self) {
        self.round = 0;
    }

    fn end(&self) -> bool {
        self.round >= self.max_rounds
    }

    fn step(&mut self) {
        self.round += 1;
    }
}
