use crate::error::{OverlayError, Result};
use crate::types::{GroupId, Rank};
use std::collections::HashSet;
use std::fmt;

/// Identity of one in-flight collective.
///
/// Two signatures are equal only if group, participant order and sequence
/// number all match.
#[derive(
    rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq, Eq, Hash,
)]
pub struct Signature {
    pub group: GroupId,
    pub participants: Vec<Rank>,
    pub seq: u64,
}

impl Signature {
    pub fn new(group: GroupId, participants: Vec<Rank>, seq: u64) -> Self {
        Self {
            group,
            participants,
            seq,
        }
    }

    /// Number of participants.
    pub fn size(&self) -> usize {
        self.participants.len()
    }

    /// Position of `rank` in the participant list.
    pub fn logical_rank(&self, rank: Rank) -> Option<usize> {
        self.participants.iter().position(|&r| r == rank)
    }

    /// Group rank of the participant at logical position `logical` (wrapping).
    pub fn member(&self, logical: usize) -> Rank {
        self.participants[logical % self.participants.len()]
    }

    pub fn includes(&self, rank: Rank) -> bool {
        self.participants.contains(&rank)
    }

    /// Check that a signature received off the wire belongs to `group`.
    pub fn validate(&self, group: GroupId, group_size: u32) -> Result<()> {
        if self.group != group {
            return Err(OverlayError::violation(
                "signature",
                format!("group {} does not match local group {group}", self.group),
            ));
        }
        if self.participants.is_empty() {
            return Err(OverlayError::violation("signature", "empty participant list"));
        }
        check_ranks(&self.participants, group_size)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "group {} seq {} ({} participants)",
            self.group,
            self.seq,
            self.participants.len()
        )
    }
}

/// Expand an empty recipient list to the whole group and validate the rest.
///
/// Caller order is preserved: every participant must pass the same order.
pub fn normalize_participants(recipients: &[Rank], group_size: u32) -> Result<Vec<Rank>> {
    if group_size == 0 {
        return Err(OverlayError::EmptyGroup);
    }
    if recipients.is_empty() {
        return Ok((0..group_size).collect());
    }
    check_ranks(recipients, group_size)?;
    Ok(recipients.to_vec())
}

fn check_ranks(ranks: &[Rank], group_size: u32) -> Result<()> {
    let mut seen = HashSet::with_capacity(ranks.len());
    for &rank in ranks {
        if rank >= group_size {
            return Err(OverlayError::InvalidRank { rank, group_size });
        }
        if !seen.insert(rank) {
            return Err(OverlayError::violation(
                "signature",
                format!("rank {rank} listed twice"),
            ));
        }
    }
    Ok(())
}
