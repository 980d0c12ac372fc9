use super::bucket::Bucket;
use super::signature::Signature;
use super::tracker::{CompletionFn, TrackerRegistry};
use crate::config::OverlayConfig;
use crate::error::{OverlayError, Result};
use crate::protocol::{OverlayMessage, encode_message};
use crate::topology::{self, Routed};
use crate::types::{GroupId, Rank, Tag, tags};
use std::collections::{HashMap, HashSet, VecDeque};

/// Identifier of one outbound send, echoed back on completion.
pub type SendId = u64;

/// A message the engine wants the transport to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub id: SendId,
    pub dest: Rank,
    pub tag: Tag,
    pub payload: Vec<u8>,
}

/// An xcast payload delivered to this member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub origin: Rank,
    pub tag: Tag,
    pub payload: Vec<u8>,
}

/// What to do when a send completes.
pub(crate) enum SendPurpose {
    /// Root-level send of an xcast; its completion is the originator's.
    XcastRoot {
        signature: Signature,
        done: CompletionFn,
    },
    /// Relay or forward hop; failures are logged only.
    Relay,
    /// Send on behalf of a collective; failures fail it.
    Collective(Signature),
}

/// Per-group state shared by every collective module.
pub struct GroupContext {
    pub(crate) group: GroupId,
    pub(crate) me: Rank,
    pub(crate) size: u32,
    pub(crate) topology: Box<dyn Routed>,
    pub(crate) registry: TrackerRegistry,
    pub(crate) config: OverlayConfig,
    outbox: VecDeque<Outbound>,
    deliveries: VecDeque<Delivery>,
    sends: HashMap<SendId, SendPurpose>,
    next_send: SendId,
    collective_seq: HashMap<Vec<Rank>, u64>,
    xcast_seq: u64,
    lost: HashSet<Rank>,
}

impl GroupContext {
    pub(crate) fn new(group: GroupId, me: Rank, size: u32, config: OverlayConfig) -> Self {
        Self {
            group,
            me,
            size,
            topology: topology::build(config.topology, me, size),
            registry: TrackerRegistry::new(),
            config,
            outbox: VecDeque::new(),
            deliveries: VecDeque::new(),
            sends: HashMap::new(),
            next_send: 0,
            collective_seq: HashMap::new(),
            xcast_seq: 0,
            lost: HashSet::new(),
        }
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn rank(&self) -> Rank {
        self.me
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn topology(&self) -> &dyn Routed {
        self.topology.as_ref()
    }

    /// Signature for the next collective over `participants`.
    ///
    /// Every participant issues collectives over the same list in the same
    /// order, so the counters agree without coordination.
    pub(crate) fn next_collective_signature(&mut self, participants: Vec<Rank>) -> Signature {
        let counter = self.collective_seq.entry(participants.clone()).or_insert(0);
        let seq = *counter;
        *counter += 1;
        Signature::new(self.group, participants, seq)
    }

    pub(crate) fn next_xcast_signature(&mut self, recipients: Vec<Rank>) -> Signature {
        let seq = self.xcast_seq;
        self.xcast_seq += 1;
        Signature::new(self.group, recipients, seq)
    }

    /// Attach the local member to the collective, creating its tracker.
    ///
    /// On failure `done` has already been called with the error.
    pub(crate) fn join(&mut self, signature: &Signature, done: CompletionFn) -> bool {
        let me = self.me;
        let Some(logical) = signature.logical_rank(me) else {
            done(signature.clone(), Err(OverlayError::NotParticipant { rank: me }));
            return false;
        };
        if let Some(err) = self.unreachable(signature) {
            done(signature.clone(), Err(err));
            return false;
        }
        let tracker = self.registry.get_or_create(signature);
        if tracker.is_joined() {
            done(
                signature.clone(),
                Err(OverlayError::violation(
                    "join",
                    format!("{signature} is already in flight"),
                )),
            );
            return false;
        }
        tracker.my_rank = Some(logical);
        tracker.set_completion(done);
        true
    }

    /// Remember that `rank` is gone so later collectives over it fail fast.
    pub(crate) fn mark_lost(&mut self, rank: Rank) {
        self.lost.insert(rank);
    }

    pub(crate) fn clear_lost(&mut self) {
        self.lost.clear();
    }

    /// Error for a collective that cannot complete because of a lost member.
    fn unreachable(&self, signature: &Signature) -> Option<OverlayError> {
        let lifeline = self.topology.lifeline();
        if self.lost.contains(&lifeline) {
            return Some(OverlayError::LifelineLost { rank: lifeline });
        }
        signature
            .participants
            .iter()
            .find(|r| self.lost.contains(r))
            .map(|&rank| OverlayError::PeerLost { rank })
    }

    /// Queue `msg` for `dest` under `tag`.
    pub(crate) fn send(
        &mut self,
        dest: Rank,
        tag: Tag,
        msg: &OverlayMessage,
        purpose: SendPurpose,
    ) -> Result<SendId> {
        let payload = encode_message(msg)?;
        self.send_raw(dest, tag, payload, purpose)
    }

    fn send_raw(
        &mut self,
        dest: Rank,
        tag: Tag,
        payload: Vec<u8>,
        purpose: SendPurpose,
    ) -> Result<SendId> {
        if dest == self.me {
            return Err(OverlayError::violation(
                "send",
                format!("rank {dest} attempted to send {tag:#x} to itself"),
            ));
        }
        if dest >= self.size {
            return Err(OverlayError::InvalidRank {
                rank: dest,
                group_size: self.size,
            });
        }
        let id = self.next_send;
        self.next_send += 1;
        self.sends.insert(id, purpose);
        self.outbox.push_back(Outbound {
            id,
            dest,
            tag,
            payload,
        });
        Ok(id)
    }

    /// Send `msg` to `dest`, wrapping it in a `Forward` envelope when the
    /// topology routes through another member first.
    pub(crate) fn send_routed(
        &mut self,
        dest: Rank,
        tag: Tag,
        msg: &OverlayMessage,
        purpose: SendPurpose,
    ) -> Result<SendId> {
        let hop = self.topology.get_nexthop(dest);
        if hop == dest {
            return self.send(dest, tag, msg, purpose);
        }
        tracing::debug!(rank = self.me, dest, hop, tag, "forwarding via next hop");
        let envelope = OverlayMessage::Forward {
            origin: self.me,
            final_dest: dest,
            tag,
            payload: encode_message(msg)?,
        };
        self.send(hop, tags::FORWARD, &envelope, purpose)
    }

    /// Pass a forward envelope one hop closer to its destination.
    pub(crate) fn relay_forward(
        &mut self,
        final_dest: Rank,
        envelope: &OverlayMessage,
    ) -> Result<SendId> {
        let hop = self.topology.get_nexthop(final_dest);
        self.send(hop, tags::FORWARD, envelope, SendPurpose::Relay)
    }

    /// Replace what happens when send `id` completes.
    pub(crate) fn watch_send(&mut self, id: SendId, purpose: SendPurpose) {
        self.sends.insert(id, purpose);
    }

    pub(crate) fn deliver(&mut self, origin: Rank, tag: Tag, payload: Vec<u8>) {
        self.deliveries.push_back(Delivery {
            origin,
            tag,
            payload,
        });
    }

    /// Complete the collective with its accumulated bucket.
    ///
    /// The tracker leaves the registry before the callback runs.
    pub(crate) fn finish(&mut self, signature: &Signature) {
        let Some(mut tracker) = self.registry.remove(signature) else {
            return;
        };
        let mut bucket = std::mem::take(&mut tracker.bucket);
        bucket.sort_by_rank();
        tracing::debug!(rank = self.me, %signature, contributors = bucket.len(), "collective complete");
        match tracker.take_completion() {
            Some(done) => done(signature.clone(), Ok(bucket)),
            None => tracing::debug!(%signature, "completed tracker had no local waiter"),
        }
    }

    /// Complete the collective with `err`.
    pub(crate) fn fail(&mut self, signature: &Signature, err: OverlayError) {
        let Some(mut tracker) = self.registry.remove(signature) else {
            tracing::warn!(rank = self.me, %signature, error = %err, "failure for unknown collective");
            return;
        };
        match tracker.take_completion() {
            Some(done) => {
                tracing::warn!(rank = self.me, %signature, error = %err, "collective failed");
                done(signature.clone(), Err(err));
            }
            None => tracing::warn!(
                rank = self.me,
                %signature,
                error = %err,
                "discarding failed collective with no local waiter"
            ),
        }
    }

    /// Resolve the purpose of a finished send.
    pub(crate) fn complete_send(&mut self, id: SendId, result: Result<()>) {
        let Some(purpose) = self.sends.remove(&id) else {
            tracing::warn!(rank = self.me, id, "completion for unknown send");
            return;
        };
        match (purpose, result) {
            (SendPurpose::XcastRoot { signature, done }, Ok(())) => done(signature, Ok(Bucket::new())),
            (SendPurpose::XcastRoot { signature, done }, Err(e)) => {
                tracing::warn!(rank = self.me, %signature, error = %e, "xcast root send failed");
                done(signature, Err(e));
            }
            (_, Ok(())) => {}
            (SendPurpose::Relay, Err(e)) => {
                tracing::warn!(rank = self.me, id, error = %e, "relay send failed");
            }
            (SendPurpose::Collective(signature), Err(e)) => self.fail(&signature, e),
        }
    }

    /// Drop every outstanding send, failing xcast originators with `err()`.
    pub(crate) fn abort_sends(&mut self, err: impl Fn() -> OverlayError) {
        for (_, purpose) in self.sends.drain() {
            if let SendPurpose::XcastRoot { signature, done } = purpose {
                done(signature, Err(err()));
            }
        }
    }

    pub(crate) fn pop_outbound(&mut self) -> Option<Outbound> {
        self.outbox.pop_front()
    }

    pub(crate) fn pop_delivery(&mut self) -> Option<Delivery> {
        self.deliveries.pop_front()
    }

    pub(crate) fn pending_sends(&self) -> usize {
        self.sends.len()
    }
}
