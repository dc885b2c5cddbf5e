//! In-process communicator used by the multi-rank test scenarios (SPEC
//! §10.4): every "rank" is a tokio task, message passing happens over
//! in-memory queues instead of real sockets, but the `Communicator` trait
//! surface — and therefore every line of graph/sync/model code exercising
//! it — is identical to the production `NngCommunicator`.
//!
//! Built on a pair of `tokio::sync::mpsc::Unbounded{Sender,Receiver}`
//! channels per ordered rank pair, generalized from a single fixed channel
//! pair to a full mesh indexed by rank.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use error_stack::{IntoReport, ResultExt};
use tokio::sync::{oneshot, Notify};

use crate::{Communicator, ErrorKind, PendingSend, Result, Tag};

struct Envelope {
    src: u32,
    tag: Tag,
    bytes: Vec<u8>,
    ack: Option<oneshot::Sender<()>>,
}

struct Inbox {
    queue: Mutex<VecDeque<Envelope>>,
    notify: Notify,
}

impl Inbox {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn push(&self, envelope: Envelope) {
        self.queue.lock().expect("poisoned").push_back(envelope);
        self.notify.notify_waiters();
    }

    /// Removes and returns the first envelope matching `(src, tag)`, if any.
    /// `src = None` matches any sender.
    fn take_matching(&self, src: Option<u32>, tag: Tag) -> Option<Envelope> {
        let mut queue = self.queue.lock().expect("poisoned");
        let position = queue
            .iter()
            .position(|env| env.tag == tag && src.map_or(true, |s| s == env.src))?;
        queue.remove(position)
    }

    fn has_matching(&self, src: Option<u32>, tag: Tag) -> bool {
        let queue = self.queue.lock().expect("poisoned");
        queue
            .iter()
            .any(|env| env.tag == tag && src.map_or(true, |s| s == env.src))
    }
}

/// Shared mesh of inboxes, one per rank, that every rank's
/// [`LocalCommunicator`] sends into and receives from.
pub struct LocalWorld {
    inboxes: Vec<Inbox>,
}

impl LocalWorld {
    pub fn new(num_ranks: u32) -> Arc<Self> {
        Arc::new(Self {
            inboxes: (0..num_ranks).map(|_| Inbox::new()).collect(),
        })
    }

    pub fn communicator(self: &Arc<Self>, rank: u32) -> LocalCommunicator {
        assert!((rank as usize) < self.inboxes.len(), "rank out of range");
        LocalCommunicator {
            rank,
            world: Arc::clone(self),
        }
    }

    /// Delivers an already-acknowledged payload straight into `dest`'s
    /// inbox. Used by [`crate::nng_transport::NngCommunicator`], whose wire
    /// acknowledgement already happened at the nng protocol layer by the
    /// time a message reaches this shared inbox.
    pub(crate) fn deliver(&self, dest: u32, src: u32, tag: Tag, bytes: Vec<u8>) {
        self.inboxes[dest as usize].push(Envelope {
            src,
            tag,
            bytes,
            ack: None,
        });
    }

    pub(crate) async fn recv_local(&self, rank: u32, src: u32, tag: Tag) -> Result<Vec<u8>> {
        let inbox = &self.inboxes[rank as usize];
        loop {
            if let Some(envelope) = inbox.take_matching(Some(src), tag) {
                if let Some(ack) = envelope.ack {
                    let _ = ack.send(());
                }
                return Ok(envelope.bytes);
            }
            inbox.notify.notified().await;
        }
    }

    pub(crate) fn has_matching_local(&self, rank: u32, src: u32, tag: Tag) -> bool {
        self.inboxes[rank as usize].has_matching(Some(src), tag)
    }
}

pub struct LocalCommunicator {
    rank: u32,
    world: Arc<LocalWorld>,
}

pub struct LocalPendingSend {
    ack: oneshot::Receiver<()>,
}

impl PendingSend for LocalPendingSend {
    fn test(&mut self) -> bool {
        matches!(self.ack.try_recv(), Ok(()))
    }
}

impl LocalCommunicator {
    async fn recv_matching(&self, src: Option<u32>, tag: Tag) -> Vec<u8> {
        let inbox = &self.world.inboxes[self.rank as usize];
        loop {
            if let Some(envelope) = inbox.take_matching(src, tag) {
                if let Some(ack) = envelope.ack {
                    let _ = ack.send(());
                }
                return envelope.bytes;
            }
            inbox.notify.notified().await;
        }
    }
}

#[async_trait]
impl Communicator for LocalCommunicator {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn num_ranks(&self) -> u32 {
        self.world.inboxes.len() as u32
    }

    async fn send(&self, dest: u32, tag: Tag, bytes: Vec<u8>) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.world.inboxes[dest as usize].push(Envelope {
            src: self.rank,
            tag,
            bytes,
            ack: Some(ack_tx),
        });
        ack_rx
            .await
            .into_report()
            .change_context(ErrorKind::Send)
            .attach_printable("peer dropped without acknowledging send")
    }

    async fn recv(&self, src: u32, tag: Tag) -> Result<Vec<u8>> {
        Ok(self.recv_matching(Some(src), tag).await)
    }

    fn issend(&self, dest: u32, tag: Tag, bytes: Vec<u8>) -> Box<dyn PendingSend> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.world.inboxes[dest as usize].push(Envelope {
            src: self.rank,
            tag,
            bytes,
            ack: Some(ack_tx),
        });
        Box::new(LocalPendingSend { ack: ack_rx })
    }

    fn iprobe(&self, src: u32, tag: Tag) -> bool {
        self.world.inboxes[self.rank as usize].has_matching(Some(src), tag)
    }

    async fn all_to_all(
        &self,
        tag: Tag,
        mut payloads: std::collections::HashMap<u32, Vec<u8>>,
    ) -> Result<std::collections::HashMap<u32, Vec<u8>>> {
        let num_ranks = self.num_ranks();
        let mut sends = Vec::new();
        for dest in 0..num_ranks {
            if dest == self.rank {
                continue;
            }
            let bytes = payloads.remove(&dest).unwrap_or_default();
            sends.push(self.send(dest, tag, bytes));
        }
        let mut recvs = Vec::new();
        for src in 0..num_ranks {
            if src == self.rank {
                continue;
            }
            recvs.push(self.recv(src, tag));
        }
        futures::future::try_join_all(sends)
            .await
            .attach_printable("all-to-all send phase failed")?;
        let received = futures::future::try_join_all(recvs)
            .await
            .attach_printable("all-to-all recv phase failed")?;
        let mut out = std::collections::HashMap::new();
        let mut index = 0;
        for src in 0..num_ranks {
            if src == self.rank {
                continue;
            }
            out.insert(src, received[index].clone());
            index += 1;
        }
        Ok(out)
    }

    async fn gather(&self, root: u32, tag: Tag, payload: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>> {
        if self.rank != root {
            self.send(root, tag, payload).await?;
            return Ok(None);
        }
        let num_ranks = self.num_ranks();
        let mut out = vec![Vec::new(); num_ranks as usize];
        out[root as usize] = payload;
        for src in 0..num_ranks {
            if src == root {
                continue;
            }
            out[src as usize] = self.recv(src, tag).await?;
        }
        Ok(Some(out))
    }

    async fn all_gather(&self, tag: Tag, payload: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        let num_ranks = self.num_ranks();
        let mut sends = Vec::new();
        for dest in 0..num_ranks {
            if dest == self.rank {
                continue;
            }
            sends.push(self.send(dest, tag, payload.clone()));
        }
        let mut recvs = Vec::new();
        for src in 0..num_ranks {
            if src == self.rank {
                continue;
            }
            recvs.push(self.recv(src, tag));
        }
        futures::future::try_join_all(sends)
            .await
            .attach_printable("all-gather send phase failed")?;
        let received = futures::future::try_join_all(recvs)
            .await
            .attach_printable("all-gather recv phase failed")?;
        let mut out = vec![Vec::new(); num_ranks as usize];
        out[self.rank as usize] = payload;
        let mut index = 0;
        for src in 0..num_ranks {
            if src == self.rank {
                continue;
            }
            out[src as usize] = received[index].clone();
            index += 1;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Epoch, Kind};

    #[tokio::test]
    async fn point_to_point_round_trip() {
        let world = LocalWorld::new(2);
        let a = world.communicator(0);
        let b = world.communicator(1);
        let tag = Tag::new(Epoch::Even, Kind::Bulk);

        let sender = tokio::spawn(async move { a.send(1, tag, vec![1, 2, 3]).await });
        let received = b.recv(0, tag).await.unwrap();
        sender.await.unwrap().unwrap();

        assert_eq!(received, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn issend_completes_once_peer_receives() {
        let world = LocalWorld::new(2);
        let a = world.communicator(0);
        let b = world.communicator(1);
        let tag = Tag::new(Epoch::Even, Kind::Link);

        let mut pending = a.issend(1, tag, vec![9]);
        assert!(!pending.test());

        let received = b.recv(0, tag).await.unwrap();
        assert_eq!(received, vec![9]);
        // give the ack a chance to land
        tokio::task::yield_now().await;
        assert!(pending.test());
    }

    #[tokio::test]
    async fn all_to_all_exchanges_every_pair() {
        let world = LocalWorld::new(3);
        let comms: Vec<_> = (0..3).map(|r| world.communicator(r)).collect();
        let tag = Tag::new(Epoch::Even, Kind::Bulk);

        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                tokio::spawn(async move {
                    let mut payloads = std::collections::HashMap::new();
                    for dest in 0..3u32 {
                        if dest != comm.rank() {
                            payloads.insert(dest, vec![comm.rank() as u8]);
                        }
                    }
                    comm.all_to_all(tag, payloads).await.unwrap()
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        for (rank, result) in results.iter().enumerate() {
            for (&src, bytes) in result {
                assert_eq!(bytes, &vec![src as u8]);
                assert_ne!(src as usize, rank);
            }
        }
    }
}
