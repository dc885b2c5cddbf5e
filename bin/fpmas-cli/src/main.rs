//! Process lifecycle entry point: parses [`Config`], brings up a
//! communicator and the chosen sync mode, builds a [`DistributedGraph`],
//! optionally restores/dumps a breakpoint, and tears everything down again.
//! Deliberately thin — it exists to prove the substrate runs end-to-end as a
//! real process group, not to host any agent or behavior logic.

mod config;

use std::sync::Arc;

use clap::Parser;
use comm::{Communicator, LocalWorld};
use error_stack::{IntoReport, Result, ResultExt};
use graph::{DistributedGraph, SyncMode};
use sync::{GhostMode, GlobalGhostMode, HardSyncMode};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, SyncModeKind};

#[derive(Debug, thiserror::Error)]
enum ErrorKind {
    #[error("could not initialize logging")]
    Logging,
    #[error("could not construct communicator")]
    Communicator,
    #[error("graph operation failed")]
    Graph,
    #[error("breakpoint I/O failed")]
    Breakpoint,
}

fn init_logging(config: &Config) -> Result<(), ErrorKind> {
    let filter = match &config.log_filter {
        Some(directive) => EnvFilter::try_new(directive)
            .into_report()
            .change_context(ErrorKind::Logging)
            .attach_printable_lazy(|| format!("directive: {directive}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|error| error_stack::report!(ErrorKind::Logging).attach_printable(error.to_string()))?;

    Ok(())
}

async fn build_communicator(config: &Config) -> Result<Arc<dyn Communicator>, ErrorKind> {
    if config.peers.is_empty() {
        info!(rank = config.rank, "no peer table given, running a single-rank local communicator");
        let world = LocalWorld::new(1);
        return Ok(Arc::new(world.communicator(0)));
    }

    let peers = comm::nng_transport::PeerTable {
        addresses: config.peers.clone(),
    };
    let communicator = comm::nng_transport::NngCommunicator::new(config.rank, peers, config.workers_per_peer)
        .await
        .change_context(ErrorKind::Communicator)
        .attach_printable_lazy(|| format!("rank {}", config.rank))?;
    Ok(Arc::new(communicator))
}

/// Runs the init/build/finalize bracket for one already-chosen sync mode.
/// Generic over `S` so the three [`SyncModeKind`] variants monomorphize to
/// their own `DistributedGraph<serde_json::Value, S>` instead of needing a
/// trait object (`SyncMode::synchronize` takes `&mut self` behind a
/// `GraphView`, which isn't object-safe).
async fn run<S>(config: Config, comm: Arc<dyn Communicator>, sync_mode: S) -> Result<(), ErrorKind>
where
    S: SyncMode<serde_json::Value>,
{
    let rank = config.rank;
    let mut graph: DistributedGraph<serde_json::Value, S> = DistributedGraph::new(rank, comm, sync_mode);

    if let Some(path) = &config.load_breakpoint {
        io::load_breakpoint(&mut graph, path)
            .change_context(ErrorKind::Breakpoint)
            .attach_printable_lazy(|| format!("path: {}", path.display()))?;
    }

    info!(rank, "process group member ready");
    graph
        .synchronize()
        .await
        .change_context(ErrorKind::Graph)
        .attach_printable("initial synchronize failed")?;

    if let Some(path) = &config.save_breakpoint {
        io::save_breakpoint(&graph, path)
            .change_context(ErrorKind::Breakpoint)
            .attach_printable_lazy(|| format!("path: {}", path.display()))?;
    }

    info!(rank, "process group member exiting");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), ErrorKind> {
    let config = Config::parse();
    init_logging(&config)?;

    let communicator = build_communicator(&config).await?;
    match config.sync_mode {
        SyncModeKind::Ghost => run(config, communicator, GhostMode::<serde_json::Value>::new()).await,
        SyncModeKind::GlobalGhost => run(config, communicator, GlobalGhostMode::<serde_json::Value>::new()).await,
        SyncModeKind::Hard => run(config, communicator, HardSyncMode::<serde_json::Value>::new()).await,
    }
}
