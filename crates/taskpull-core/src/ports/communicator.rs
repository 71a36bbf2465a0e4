//! Communicator port - tagged message passing inside a process group.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::Rank;
use crate::error::ProtocolError;
use crate::protocol::{Envelope, Tag};

/// One member's endpoint in a fixed-size process group.
///
/// Transport reliability is the fabric's concern; per-sender ordering
/// must be preserved, nothing is assumed across senders.
#[async_trait]
pub trait Communicator: Send + Sync {
    fn rank(&self) -> Rank;

    /// Number of members, controller included.
    fn size(&self) -> usize;

    /// Send a message with a raw tag code.
    async fn send_raw(&self, dest: Rank, tag: i32, payload: Value) -> Result<(), ProtocolError>;

    /// Blocking receive of the next message from any source, any tag.
    async fn recv(&mut self) -> Result<Envelope, ProtocolError>;

    async fn send(&self, dest: Rank, tag: Tag, payload: Value) -> Result<(), ProtocolError> {
        self.send_raw(dest, tag.code(), payload).await
    }
}
