//! Point-to-point transport contract consumed by the event loop.

mod local;

pub use local::{LocalEndpoint, LocalMesh};

use crate::error::Result;
use crate::types::{Rank, Tag};
use futures::future::BoxFuture;

/// Something the transport observed on behalf of this member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A message addressed to this member.
    Message {
        sender: Rank,
        tag: Tag,
        payload: Vec<u8>,
    },
    /// A peer went away; sends to it will fail.
    PeerLost(Rank),
}

/// Reliable, tag-addressed channel between any two members of a group.
pub trait Transport: Send + Sync + 'static {
    /// This member's rank.
    fn rank(&self) -> Rank;

    /// Number of members reachable through this transport, self included.
    fn size(&self) -> u32;

    /// Send `payload` to `dest` under `tag`.
    ///
    /// The future resolving is the send completion. At most once: a failed
    /// send is never retried by the transport.
    fn send<'a>(&'a self, dest: Rank, tag: Tag, payload: Vec<u8>) -> BoxFuture<'a, Result<()>>;

    /// Wait for the next event. `None` once this member is closed.
    fn recv<'a>(&'a self) -> BoxFuture<'a, Option<TransportEvent>>;

    /// Leave the group. Peers observe [`TransportEvent::PeerLost`].
    fn close(&self) {}
}
