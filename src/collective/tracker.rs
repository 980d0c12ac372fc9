use super::bucket::Bucket;
use super::helpers::ceil_log2;
use super::signature::Signature;
use crate::bitmap::Bitmap;
use crate::error::{OverlayError, Result};
use crate::types::Rank;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Completion callback of a collective, fired exactly once.
///
/// Runs on the event loop and must not call back into the engine.
pub type CompletionFn = Box<dyn FnOnce(Signature, Result<Bucket>) + Send>;

/// Where a tracker is in its collective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// Created by a peer message before the local member joined.
    Dormant,
    /// Waiting to consume the round at this distance.
    AwaitingRound(u32),
    /// Rendezvous master gathering contributions.
    Collecting,
    /// Contribution sent, waiting for the master's release.
    AwaitingRelease,
}

/// A round message that arrived before the tracker was ready for it.
#[derive(Debug)]
pub struct PendingRound {
    pub sender: Rank,
    pub bucket: Bucket,
}

/// Mutable state of one in-flight collective.
pub struct Tracker {
    pub(crate) signature: Signature,
    pub(crate) bucket: Bucket,
    pub(crate) nreported: usize,
    pub(crate) nexpected: usize,
    pub(crate) distance_mask_recv: Bitmap,
    pub(crate) distance_mask_sent: Bitmap,
    pub(crate) pending_by_distance: Vec<Option<PendingRound>>,
    pub(crate) my_rank: Option<usize>,
    pub(crate) state: TrackerState,
    completion: Option<CompletionFn>,
    pub(crate) created_at: Instant,
}

impl Tracker {
    fn new(signature: Signature) -> Self {
        let n = signature.size();
        let nbits = ceil_log2(n as u32) as usize + 1;
        Self {
            signature,
            bucket: Bucket::new(),
            nreported: 0,
            nexpected: n,
            distance_mask_recv: Bitmap::new(nbits),
            distance_mask_sent: Bitmap::new(nbits),
            pending_by_distance: std::iter::repeat_with(|| None).take(nbits).collect(),
            my_rank: None,
            state: TrackerState::Dormant,
            completion: None,
            created_at: Instant::now(),
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// Whether the local member has joined this collective.
    pub fn is_joined(&self) -> bool {
        self.completion.is_some()
    }

    pub(crate) fn set_completion(&mut self, done: CompletionFn) {
        self.completion = Some(done);
    }

    pub(crate) fn take_completion(&mut self) -> Option<CompletionFn> {
        self.completion.take()
    }

    /// Record that the round at `distance` has been consumed.
    pub fn mark_distance_recv(&mut self, distance: u32) -> Result<()> {
        if self.distance_mask_recv.set(distance as usize) {
            tracing::error!(
                distance,
                seq = self.signature.seq,
                "round distance received twice"
            );
            return Err(OverlayError::DistanceAlreadyReceived {
                distance,
                seq: self.signature.seq,
            });
        }
        Ok(())
    }

    /// Whether the round at `distance` has been consumed.
    ///
    /// `None` stands for the distance before round 0 and is always satisfied.
    pub fn check_distance_recv(&self, distance: Option<u32>) -> bool {
        distance.is_none_or(|d| self.distance_mask_recv.is_set(d as usize))
    }

    /// Buffer a round message until the tracker reaches its distance.
    pub(crate) fn stash_round(&mut self, distance: u32, sender: Rank, bucket: Bucket) -> Result<()> {
        let slot = distance as usize;
        if slot >= self.pending_by_distance.len() {
            self.pending_by_distance.resize_with(slot + 1, || None);
        }
        if self.distance_mask_recv.is_set(slot) || self.pending_by_distance[slot].is_some() {
            tracing::error!(distance, sender, seq = self.signature.seq, "duplicate round");
            return Err(OverlayError::DistanceAlreadyReceived {
                distance,
                seq: self.signature.seq,
            });
        }
        self.pending_by_distance[slot] = Some(PendingRound { sender, bucket });
        Ok(())
    }

    /// Take the buffered round at `distance`, if it has arrived.
    pub(crate) fn take_round(&mut self, distance: u32) -> Option<PendingRound> {
        self.pending_by_distance
            .get_mut(distance as usize)
            .and_then(Option::take)
    }

    /// Fold `bucket` into the accumulated contributions.
    pub(crate) fn absorb(&mut self, bucket: Bucket) -> Result<()> {
        self.bucket.absorb(bucket)?;
        self.nreported = self.bucket.len();
        Ok(())
    }
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("signature", &self.signature)
            .field("state", &self.state)
            .field("nreported", &self.nreported)
            .field("nexpected", &self.nexpected)
            .field("my_rank", &self.my_rank)
            .field("joined", &self.is_joined())
            .finish()
    }
}

/// In-flight collectives of one group, keyed by signature.
#[derive(Debug, Default)]
pub struct TrackerRegistry {
    trackers: HashMap<Signature, Tracker>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the tracker for `signature`, creating it when `create` is set.
    pub fn get_tracker(&mut self, signature: &Signature, create: bool) -> Option<&mut Tracker> {
        if create {
            return Some(self.get_or_create(signature));
        }
        self.trackers.get_mut(signature)
    }

    pub(crate) fn get_or_create(&mut self, signature: &Signature) -> &mut Tracker {
        self.trackers.entry(signature.clone()).or_insert_with(|| {
            tracing::debug!(%signature, "creating tracker");
            Tracker::new(signature.clone())
        })
    }

    pub fn remove(&mut self, signature: &Signature) -> Option<Tracker> {
        self.trackers.remove(signature)
    }

    pub fn contains(&self, signature: &Signature) -> bool {
        self.trackers.contains_key(signature)
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    pub fn signatures(&self) -> Vec<Signature> {
        self.trackers.keys().cloned().collect()
    }

    /// Signatures of trackers whose participant list contains `rank`.
    pub fn involving(&self, rank: Rank) -> Vec<Signature> {
        self.trackers
            .keys()
            .filter(|sig| sig.includes(rank))
            .cloned()
            .collect()
    }

    /// Signatures of trackers created at least `timeout` before `now`.
    pub fn expired(&self, now: Instant, timeout: Duration) -> Vec<Signature> {
        self.trackers
            .values()
            .filter(|t| now.saturating_duration_since(t.created_at) >= timeout)
            .map(|t| t.signature.clone())
            .collect()
    }
}
