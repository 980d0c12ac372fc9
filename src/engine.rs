//! Sans-IO collective engine for one member of one group.
//!
//! The engine never performs I/O. Callers feed it local requests, arriving
//! messages, send completions and peer losses, then drain
//! [`GroupEngine::poll_outbound`] and [`GroupEngine::poll_delivery`].
//! Completion callbacks run inside these calls.

use crate::collective::{
    self, CompletionFn, Delivery, GroupContext, Outbound, SendId, Signature,
    normalize_participants, xcast_start,
};
use crate::config::OverlayConfig;
use crate::error::{OverlayError, Result};
use crate::protocol::{OverlayMessage, decode_message};
use crate::topology::Routed;
use crate::types::{GroupId, Rank, Tag, is_reserved, tags};
use std::time::Instant;

/// Collective state machine for one member of a group.
pub struct GroupEngine {
    ctx: GroupContext,
}

impl GroupEngine {
    pub fn new(group: GroupId, me: Rank, size: u32, config: OverlayConfig) -> Result<Self> {
        if size == 0 {
            return Err(OverlayError::EmptyGroup);
        }
        if me >= size {
            return Err(OverlayError::InvalidRank {
                rank: me,
                group_size: size,
            });
        }
        tracing::debug!(group, rank = me, size, topology = ?config.topology, "engine created");
        Ok(Self {
            ctx: GroupContext::new(group, me, size, config),
        })
    }

    pub fn group(&self) -> GroupId {
        self.ctx.group()
    }

    pub fn rank(&self) -> Rank {
        self.ctx.rank()
    }

    pub fn size(&self) -> u32 {
        self.ctx.size()
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.ctx.config
    }

    pub fn topology(&self) -> &dyn Routed {
        self.ctx.topology()
    }

    /// Number of collectives still tracked.
    pub fn active_trackers(&self) -> usize {
        self.ctx.registry.len()
    }

    /// Number of sends awaiting completion.
    pub fn pending_sends(&self) -> usize {
        self.ctx.pending_sends()
    }

    /// Broadcast `payload` under `tag` to `recipients` (empty = whole group).
    ///
    /// `done` receives an empty bucket once the payload has left this member.
    pub fn xcast(&mut self, recipients: &[Rank], tag: Tag, payload: Vec<u8>, done: CompletionFn) {
        if is_reserved(tag) {
            done(
                self.fallback_signature(recipients),
                Err(OverlayError::violation(
                    "xcast",
                    format!("tag {tag:#x} is reserved"),
                )),
            );
            return;
        }
        let recipients = match normalize_participants(recipients, self.ctx.size) {
            Ok(r) => r,
            Err(e) => {
                done(self.fallback_signature(recipients), Err(e));
                return;
            }
        };
        let signature = self.ctx.next_xcast_signature(recipients);
        tracing::debug!(rank = self.ctx.me, %signature, tag, "xcast");
        xcast_start(&mut self.ctx, signature, tag, payload, Some(done));
    }

    /// Gather one payload from every participant; `done` receives them all,
    /// ordered by rank.
    pub fn allgather(&mut self, recipients: &[Rank], payload: Vec<u8>, done: CompletionFn) {
        let Some(signature) = self.begin(recipients, done) else {
            return;
        };
        collective::dispatch_allgather(&mut self.ctx, &signature, &payload);
    }

    /// Complete once every participant has entered the barrier.
    pub fn barrier(&mut self, recipients: &[Rank], done: CompletionFn) {
        let Some(signature) = self.begin(recipients, done) else {
            return;
        };
        collective::dispatch_barrier(&mut self.ctx, &signature);
    }

    fn begin(&mut self, recipients: &[Rank], done: CompletionFn) -> Option<Signature> {
        let participants = match normalize_participants(recipients, self.ctx.size) {
            Ok(p) => p,
            Err(e) => {
                done(self.fallback_signature(recipients), Err(e));
                return None;
            }
        };
        let signature = self.ctx.next_collective_signature(participants);
        self.ctx.join(&signature, done).then_some(signature)
    }

    fn fallback_signature(&self, recipients: &[Rank]) -> Signature {
        Signature::new(self.ctx.group, recipients.to_vec(), 0)
    }

    /// Process a message received from `sender` under `tag`.
    ///
    /// Malformed or unexpected messages are logged and dropped.
    pub fn handle_message(&mut self, sender: Rank, tag: Tag, payload: &[u8]) {
        if let Err(e) = self.dispatch(sender, tag, payload) {
            tracing::warn!(rank = self.ctx.me, sender, tag, error = %e, "dropping message");
        }
    }

    fn dispatch(&mut self, sender: Rank, tag: Tag, payload: &[u8]) -> Result<()> {
        if sender >= self.ctx.size {
            return Err(OverlayError::InvalidRank {
                rank: sender,
                group_size: self.ctx.size,
            });
        }
        let (_, msg) = decode_message(payload)?;
        self.route(sender, tag, msg)
    }

    fn route(&mut self, sender: Rank, tag: Tag, msg: OverlayMessage) -> Result<()> {
        match tag {
            tags::FORWARD => self.on_forward(msg),
            tags::XCAST => collective::xcast_on_message(&mut self.ctx, sender, msg),
            _ => match collective::module_for_tag(tag) {
                Some(module) => module.on_message(&mut self.ctx, sender, msg),
                None => Err(OverlayError::violation(
                    "dispatch",
                    format!("no handler for tag {tag:#x}"),
                )),
            },
        }
    }

    fn on_forward(&mut self, msg: OverlayMessage) -> Result<()> {
        let OverlayMessage::Forward {
            origin,
            final_dest,
            tag,
            payload,
        } = &msg
        else {
            return Err(OverlayError::violation(
                "forward",
                format!("unexpected {} message on the forward tag", msg.name()),
            ));
        };
        if *origin >= self.ctx.size || *final_dest >= self.ctx.size {
            return Err(OverlayError::violation(
                "forward",
                format!("envelope {origin} -> {final_dest} outside group"),
            ));
        }
        if *final_dest != self.ctx.me {
            self.ctx.relay_forward(*final_dest, &msg)?;
            return Ok(());
        }
        let (_, inner) = decode_message(payload)?;
        if matches!(inner, OverlayMessage::Forward { .. }) {
            return Err(OverlayError::violation("forward", "nested forward envelope"));
        }
        self.route(*origin, *tag, inner)
    }

    /// Report the outcome of an [`Outbound`] send.
    pub fn handle_send_complete(&mut self, id: SendId, result: Result<()>) {
        self.ctx.complete_send(id, result);
    }

    /// Fail every collective affected by the loss of `rank`.
    ///
    /// Losing the lifeline fails every collective of the group.
    pub fn handle_peer_lost(&mut self, rank: Rank) {
        self.ctx.mark_lost(rank);
        let lifeline = self.ctx.topology.lifeline();
        let affected = match self.ctx.topology.route_lost(rank) {
            Err(_) => {
                tracing::error!(rank = self.ctx.me, lifeline, "lifeline lost, failing all collectives");
                self.ctx.registry.signatures()
            }
            Ok(()) => {
                tracing::warn!(rank = self.ctx.me, lost = rank, "peer lost");
                self.ctx.registry.involving(rank)
            }
        };
        for signature in affected {
            let err = if rank == lifeline {
                OverlayError::LifelineLost { rank }
            } else {
                OverlayError::PeerLost { rank }
            };
            self.ctx.fail(&signature, err);
        }
    }

    /// Rebuild the topology for a new group size.
    pub fn update_membership(&mut self, size: u32) -> Result<()> {
        if size == 0 {
            return Err(OverlayError::EmptyGroup);
        }
        if self.ctx.me >= size {
            return Err(OverlayError::InvalidRank {
                rank: self.ctx.me,
                group_size: size,
            });
        }
        self.ctx.size = size;
        self.ctx.clear_lost();
        self.ctx.topology.update_topology(size);
        tracing::debug!(rank = self.ctx.me, size, "membership updated");
        Ok(())
    }

    /// Fail collectives older than the configured timeout. Returns how many.
    pub fn sweep_expired(&mut self, now: Instant) -> usize {
        let timeout = self.ctx.config.collective_timeout;
        let expired = self.ctx.registry.expired(now, timeout);
        let count = expired.len();
        for signature in expired {
            self.ctx.fail(
                &signature,
                OverlayError::Timeout {
                    operation: "collective",
                    timeout_ms: timeout.as_millis() as u64,
                },
            );
        }
        count
    }

    /// Fail everything in flight with `Shutdown`.
    pub fn shutdown(&mut self) {
        for signature in self.ctx.registry.signatures() {
            self.ctx.fail(&signature, OverlayError::Shutdown);
        }
        self.ctx.abort_sends(|| OverlayError::Shutdown);
    }

    /// Next message for the transport.
    pub fn poll_outbound(&mut self) -> Option<Outbound> {
        self.ctx.pop_outbound()
    }

    /// Next xcast payload delivered to this member.
    pub fn poll_delivery(&mut self) -> Option<Delivery> {
        self.ctx.pop_delivery()
    }
}

impl std::fmt::Debug for GroupEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupEngine")
            .field("group", &self.ctx.group)
            .field("rank", &self.ctx.me)
            .field("size", &self.ctx.size)
            .field("trackers", &self.ctx.registry.len())
            .finish()
    }
}
