//! Breakpoint persistence (spec.md §10.6), kept out of `graph` itself: that
//! crate only defines the [`graph::GraphBreakpoint`] shape and the
//! in-memory `to_breakpoint`/`restore_breakpoint` round trip; this crate
//! does the actual file I/O, mirroring `distributed_graph.h`'s
//! `adl_serializer<DistributedGraph<T>>::to_json`/`from_json` except
//! writing to disk instead of an in-memory `nlohmann::json` value.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use error_stack::{IntoReport, ResultExt};
use graph::{DistributedGraph, GraphBreakpoint, SyncMode};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("failed to read breakpoint file")]
    Read,
    #[error("failed to write breakpoint file")]
    Write,
    #[error("failed to encode breakpoint")]
    Encode,
    #[error("failed to decode breakpoint")]
    Decode,
}

pub type Result<T, E = ErrorKind> = error_stack::Result<T, E>;

/// The conventional per-rank breakpoint filename: one file per rank, inside
/// a shared directory, so a restore run with the same rank count can glob
/// them back in without any coordination.
pub fn breakpoint_path(dir: impl AsRef<Path>, rank: u32) -> PathBuf {
    dir.as_ref().join(format!("breakpoint_{rank}.json"))
}

/// Dumps `graph`'s current state to `path` as JSON.
#[instrument(skip(graph))]
pub fn save_breakpoint<T, S>(graph: &DistributedGraph<T, S>, path: impl AsRef<Path>) -> Result<()>
where
    T: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: SyncMode<T>,
{
    let path = path.as_ref();
    let breakpoint = graph.to_breakpoint();
    let bytes = serde_json::to_vec_pretty(&breakpoint)
        .into_report()
        .change_context(ErrorKind::Encode)?;
    std::fs::write(path, bytes)
        .into_report()
        .change_context(ErrorKind::Write)
        .attach_printable_lazy(|| format!("path: {}", path.display()))?;
    info!(path = %path.display(), "breakpoint saved");
    Ok(())
}

/// Replaces `graph`'s entire state with the breakpoint dumped at `path`. The
/// rank reading it back must be the same rank that wrote it — ids resume
/// from the dumped allocator counters, so a mismatched rank would allocate
/// colliding ids going forward.
#[instrument(skip(graph))]
pub fn load_breakpoint<T, S>(graph: &mut DistributedGraph<T, S>, path: impl AsRef<Path>) -> Result<()>
where
    T: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: SyncMode<T>,
{
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .into_report()
        .change_context(ErrorKind::Read)
        .attach_printable_lazy(|| format!("path: {}", path.display()))?;
    let breakpoint: GraphBreakpoint<T> = serde_json::from_slice(&bytes)
        .into_report()
        .change_context(ErrorKind::Decode)?;
    graph.restore_breakpoint(breakpoint);
    info!(path = %path.display(), "breakpoint restored");
    Ok(())
}

/// A process-unique scratch path under the system temp directory, so
/// concurrent test runs never collide on the same file.
#[cfg(test)]
fn scratch_path(name: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("fpmas-io-test-{}-{}-{}", std::process::id(), unique, name))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use comm::LocalWorld;
    use sync::GhostMode;

    use super::*;

    #[test]
    fn round_trips_local_and_distant_nodes() {
        let world = LocalWorld::new(1);
        let comm = Arc::new(world.communicator(0));
        let mut graph: DistributedGraph<String, GhostMode<String>> =
            DistributedGraph::new(0, comm, GhostMode::new());

        let local = graph.build_node("alice".to_string(), 2.5);
        let distant = graph.insert_distant(ids::DistributedId::new(1, 0), 1);
        graph.link(local, distant, 0).unwrap();

        let path = scratch_path("round-trip.json");
        save_breakpoint(&graph, &path).unwrap();

        let world = LocalWorld::new(1);
        let comm = Arc::new(world.communicator(0));
        let mut restored: DistributedGraph<String, GhostMode<String>> =
            DistributedGraph::new(0, comm, GhostMode::new());
        load_breakpoint(&mut restored, &path).unwrap();

        assert_eq!(restored.node_data(local).cloned(), Some("alice".to_string()));
        assert!(restored.is_local(local));
        assert!(restored.is_distant(distant));
        assert_eq!(restored.owning_rank(distant), Some(1));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_reports_read_error() {
        let world = LocalWorld::new(1);
        let comm = Arc::new(world.communicator(0));
        let mut graph: DistributedGraph<u32, GhostMode<u32>> = DistributedGraph::new(0, comm, GhostMode::new());
        let path = scratch_path("does-not-exist.json");
        let result = load_breakpoint(&mut graph, &path);
        assert!(result.is_err());
    }
}
