//! The three pluggable sync modes (C6/C7/C8) a `DistributedGraph<T, S>` can
//! be built over: [`ghost::GhostMode`] (cheap, LOCAL-consistent only),
//! [`global_ghost::GlobalGhostMode`] (adds a snapshot for full
//! reproducibility), and [`hard::HardSyncMode`] (no ghost copies at all —
//! every DISTANT access is a network round trip). Each implements
//! `graph::SyncMode<T>`, so switching modes is a type parameter change at
//! the call site.

pub mod ghost;
pub mod global_ghost;
pub mod hard;

pub use ghost::{GhostDataSync, GhostMode, GhostMutexPolicy, GhostSyncLinker};
pub use global_ghost::{GlobalGhostMode, GlobalGhostMutexPolicy};
pub use hard::{HardDataSync, HardMutexPolicy, HardSyncLinker, HardSyncMode};
