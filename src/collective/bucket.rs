use crate::error::{OverlayError, Result};
use crate::types::Rank;
use std::collections::HashSet;

/// One member's contribution to an allgather.
#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Contribution {
    /// Group rank of the contributor.
    pub rank: Rank,
    pub payload: Vec<u8>,
}

/// Accumulated contributions of a collective.
///
/// Payloads are opaque: the bucket concatenates them without looking inside,
/// keyed by contributor so that overlapping rounds fold each member in once.
#[derive(
    rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq, Eq, Default,
)]
pub struct Bucket {
    entries: Vec<Contribution>,
}

impl Bucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bucket holding only `rank`'s payload.
    pub fn single(rank: Rank, payload: Vec<u8>) -> Self {
        Self {
            entries: vec![Contribution { rank, payload }],
        }
    }

    /// Number of distinct contributors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, rank: Rank) -> bool {
        self.entries.iter().any(|c| c.rank == rank)
    }

    /// Payload contributed by `rank`.
    pub fn payload(&self, rank: Rank) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|c| c.rank == rank)
            .map(|c| c.payload.as_slice())
    }

    /// Contributor ranks in bucket order.
    pub fn ranks(&self) -> Vec<Rank> {
        self.entries.iter().map(|c| c.rank).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Contribution> {
        self.entries.iter()
    }

    /// Append every contribution of `other` whose contributor is not yet
    /// present. Returns how many were added.
    pub fn absorb(&mut self, other: Bucket) -> Result<usize> {
        let known: HashSet<Rank> = self.entries.iter().map(|c| c.rank).collect();
        let fresh: Vec<Contribution> = other
            .entries
            .into_iter()
            .filter(|c| !known.contains(&c.rank))
            .collect();
        self.entries
            .try_reserve(fresh.len())
            .map_err(|e| OverlayError::OutOfResource(format!("bucket growth: {e}")))?;
        let added = fresh.len();
        self.entries.extend(fresh);
        Ok(added)
    }

    /// Order contributions by contributor rank.
    pub fn sort_by_rank(&mut self) {
        self.entries.sort_by_key(|c| c.rank);
    }

    /// All payloads concatenated in bucket order.
    pub fn concat(&self) -> Vec<u8> {
        let total = self.entries.iter().map(|c| c.payload.len()).sum();
        let mut out = Vec::with_capacity(total);
        for c in &self.entries {
            out.extend_from_slice(&c.payload);
        }
        out
    }

    pub fn into_payloads(self) -> Vec<Vec<u8>> {
        self.entries.into_iter().map(|c| c.payload).collect()
    }
}

impl IntoIterator for Bucket {
    type Item = Contribution;
    type IntoIter = std::vec::IntoIter<Contribution>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
