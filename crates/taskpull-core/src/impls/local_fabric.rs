//! LocalFabric - in-process message fabric for a process group
//!
//! Each member owns an unbounded mailbox; every member holds a sender to
//! every mailbox. Send never blocks, receive waits for the next message from
//! any source. Per-sender order is FIFO (tokio mpsc), nothing is promised
//! across senders.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::domain::Rank;
use crate::error::ProtocolError;
use crate::ports::Communicator;
use crate::protocol::Envelope;

/// Builder for the communicators of one group.
pub struct LocalFabric;

impl LocalFabric {
    /// Create `size` connected communicators; index `i` has rank `i`.
    pub fn group(size: usize) -> Vec<LocalCommunicator> {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..size).map(|_| mpsc::unbounded_channel()).unzip();
        let senders = Arc::new(senders);

        receivers
            .into_iter()
            .enumerate()
            .map(|(i, inbox)| LocalCommunicator {
                rank: Rank::new(i),
                peers: Arc::clone(&senders),
                inbox,
            })
            .collect()
    }
}

/// One member's endpoint in a `LocalFabric` group.
#[derive(Debug)]
pub struct LocalCommunicator {
    rank: Rank,
    peers: Arc<Vec<mpsc::UnboundedSender<Envelope>>>,
    inbox: mpsc::UnboundedReceiver<Envelope>,
}

#[async_trait]
impl Communicator for LocalCommunicator {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    async fn send_raw(&self, dest: Rank, tag: i32, payload: Value) -> Result<(), ProtocolError> {
        let peer = self
            .peers
            .get(dest.index())
            .ok_or(ProtocolError::NoSuchRank(dest))?;
        peer.send(Envelope::new(self.rank, tag, payload))
            .map_err(|_| ProtocolError::Disconnected)
    }

    async fn recv(&mut self) -> Result<Envelope, ProtocolError> {
        self.inbox.recv().await.ok_or(ProtocolError::Disconnected)
    }
}
