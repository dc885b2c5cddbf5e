use std::path::PathBuf;

use clap::Parser;

/// Which [`graph::SyncMode`] implementation the process builds its
/// [`graph::DistributedGraph`] over. Matches the three modes `sync` ships.
#[derive(Debug, Copy, Clone, PartialEq, Eq, clap::ArgEnum)]
pub enum SyncModeKind {
    /// Cheap, LOCAL-consistent-only reads; the default for most workloads.
    Ghost,
    /// Ghost plus a consistent snapshot at every synchronize, for
    /// reproducible runs.
    GlobalGhost,
    /// No ghost copies: every DISTANT read/write is a network round trip.
    Hard,
}

impl Default for SyncModeKind {
    fn default() -> Self {
        Self::Ghost
    }
}

/// The process group's rank->address table, handed identically to every
/// rank by whatever external launcher starts the group (an MPI `mpirun`,
/// a Slurm job step, ...); only `--rank` differs between processes.
#[derive(Debug, Parser)]
pub struct Config {
    /// This process's rank within the group.
    #[clap(long, env = "FPMAS_RANK")]
    pub rank: u32,

    /// nng listen address for every rank in the group, in rank order
    /// (`--peers tcp://host0:9000 --peers tcp://host1:9000 ...`). When
    /// omitted, the process runs a single-rank `LocalCommunicator` instead
    /// of dialing out over the network — useful for smoke-testing the
    /// lifecycle bracket without a real cluster.
    #[clap(long)]
    pub peers: Vec<String>,

    /// Request contexts to keep open per peer on the nng transport.
    #[clap(long, default_value_t = 4)]
    pub workers_per_peer: usize,

    #[clap(long, arg_enum, default_value = "ghost")]
    pub sync_mode: SyncModeKind,

    /// `tracing_subscriber::EnvFilter` directive string. Falls back to
    /// `RUST_LOG`, then to `info` if neither is set.
    #[clap(long, env = "FPMAS_LOG")]
    pub log_filter: Option<String>,

    /// Breakpoint file to restore the graph from before the run starts.
    #[clap(long)]
    pub load_breakpoint: Option<PathBuf>,

    /// Breakpoint file to dump the graph to before the process exits.
    #[clap(long)]
    pub save_breakpoint: Option<PathBuf>,
}
