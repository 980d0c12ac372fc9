use crate::collective::{Bucket, Signature};
use crate::types::Rank;

/// Messages exchanged between members of an overlay group.
///
/// The transport tag selects the handler; the variant must agree with it.
#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq)]
pub enum OverlayMessage {
    /// Tree-relay broadcast, forwarded unchanged to every child.
    Xcast {
        signature: Signature,
        /// Tag the payload is delivered under at each recipient.
        target_tag: u32,
        origin: Rank,
        payload: Vec<u8>,
    },

    /// Routed envelope for a member that is not a direct neighbour.
    Forward {
        origin: Rank,
        final_dest: Rank,
        /// Transport tag of the wrapped message.
        tag: u32,
        /// Encoded inner message.
        payload: Vec<u8>,
    },

    /// A member's bucket sent to the rendezvous master.
    Contribute { signature: Signature, bucket: Bucket },

    /// One round of a doubling-style allgather.
    Round {
        signature: Signature,
        distance: u32,
        bucket: Bucket,
    },

    /// The master's aggregated result, carried as an xcast payload.
    Release { signature: Signature, bucket: Bucket },
}

impl OverlayMessage {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            OverlayMessage::Xcast { .. } => "xcast",
            OverlayMessage::Forward { .. } => "forward",
            OverlayMessage::Contribute { .. } => "contribute",
            OverlayMessage::Round { .. } => "round",
            OverlayMessage::Release { .. } => "release",
        }
    }
}
