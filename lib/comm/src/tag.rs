//! Message tagging: every message is tagged with the synchronization epoch
//! it belongs to plus a message kind, so a late message from a previous
//! barrier round can never be mistaken for a current one.

/// Alternates every barrier round (`distribute`/`synchronize`/`terminate`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Epoch {
    Even,
    Odd,
}

impl Epoch {
    pub fn flip(self) -> Self {
        match self {
            Epoch::Even => Epoch::Odd,
            Epoch::Odd => Epoch::Even,
        }
    }
}

impl Default for Epoch {
    fn default() -> Self {
        Epoch::Even
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Kind {
    Read,
    ReadResponse,
    Acquire,
    AcquireResponse,
    ReleaseAcquire,
    Lock,
    LockResponse,
    LockShared,
    LockSharedResponse,
    Unlock,
    UnlockShared,
    Link,
    Unlink,
    RemoveNode,
    /// Bulk payload carried by an all-to-all round (repartition exports,
    /// ghost data-sync requests/responses, sync-linker batches).
    Bulk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag {
    pub epoch: Epoch,
    pub kind: Kind,
}

impl Tag {
    pub fn new(epoch: Epoch, kind: Kind) -> Self {
        Self { epoch, kind }
    }
}
