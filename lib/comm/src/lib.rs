//! The point-to-point and collective messaging layer every other core
//! component is built on (SPEC_FULL §4.1 / C1).
//!
//! `Communicator` abstracts over an MPI-shaped rank topology (blocking
//! send/recv, a non-blocking synchronous send with explicit progress
//! testing, probing, and typed collectives) so that `graph`, `sync`, and
//! `model` never talk to a transport directly. Two implementations are
//! provided: [`nng_transport::NngCommunicator`], the real one, and
//! [`local::LocalCommunicator`], an in-process mesh used by the test suite
//! (SPEC_FULL §10.4).

mod error;
mod local;
pub mod nng_transport;
mod tag;

use std::collections::HashMap;

use async_trait::async_trait;

pub use error::{ErrorKind, Result, RECV_EXPECT_MESSAGE, SEND_EXPECT_MESSAGE};
pub use local::{LocalCommunicator, LocalWorld};
pub use tag::{Epoch, Kind, Tag};

/// A send that has been issued but may not yet be acknowledged by the peer.
/// `test` is never async — it must be safe to call from inside a wait loop
/// that also needs to keep pumping incoming requests (the deadlock-avoidance
/// discipline Hard mode depends on; SPEC_FULL §4.7/§5).
pub trait PendingSend: Send {
    fn test(&mut self) -> bool;
}

#[async_trait]
pub trait Communicator: Send + Sync {
    fn rank(&self) -> u32;
    fn num_ranks(&self) -> u32;

    /// Blocking send: resolves once the peer has matched it with a receive.
    async fn send(&self, dest: u32, tag: Tag, bytes: Vec<u8>) -> Result<()>;

    /// Blocking receive for a message from `src` tagged `tag`.
    async fn recv(&self, src: u32, tag: Tag) -> Result<Vec<u8>>;

    /// Non-blocking synchronous send: returns immediately with a handle
    /// whose `test()` turns true once the peer has matched it with a
    /// receive. Used by Hard mode so the caller can keep servicing incoming
    /// requests while waiting, instead of blocking and risking deadlock
    /// against a peer doing the same thing back.
    fn issend(&self, dest: u32, tag: Tag, bytes: Vec<u8>) -> Box<dyn PendingSend>;

    /// Non-blocking check for a pending message from `src` tagged `tag`,
    /// without consuming it.
    fn iprobe(&self, src: u32, tag: Tag) -> bool;

    /// All-to-all exchange of opaque byte payloads, keyed by destination
    /// rank. A rank absent from `payloads` is sent an empty payload.
    /// Returns one entry per peer rank (the caller's own rank excluded).
    async fn all_to_all(
        &self,
        tag: Tag,
        payloads: HashMap<u32, Vec<u8>>,
    ) -> Result<HashMap<u32, Vec<u8>>>;

    /// Gathers one payload per rank onto `root`. Non-root callers get `None`
    /// back; `root` gets `Some(values)` ordered by rank, `root`'s own
    /// payload included.
    async fn gather(&self, root: u32, tag: Tag, payload: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>>;

    /// Like `gather`, but every rank gets the full, rank-ordered result.
    async fn all_gather(&self, tag: Tag, payload: Vec<u8>) -> Result<Vec<Vec<u8>>>;
}
