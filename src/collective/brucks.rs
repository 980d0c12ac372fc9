use super::GrpcommModule;
use super::bucket::Bucket;
use super::context::{GroupContext, SendPurpose};
use super::helpers::{ceil_log2, check_contributors, floor_log2};
use super::signature::Signature;
use super::tracker::TrackerState;
use crate::error::{OverlayError, Result};
use crate::protocol::OverlayMessage;
use crate::types::{Rank, Tag, tags};

/// Bruck's allgather for any participant count.
///
/// With `k = floor(log2 n)`, round `d < k` sends the bucket to
/// `my_rank - 2^d` and receives from `my_rank + 2^d` (mod n). When
/// `n` is not a power of two, one straggler message at distance `k`
/// carries the remaining `n - 2^k` contributions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Brucks;

/// Round layout for a participant count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Plan {
    n: usize,
    /// Regular rounds.
    rounds: u32,
    /// Contributions the straggler must supply.
    remainder: usize,
    /// Regular rounds completed before the straggler is sent.
    straggler_after: u32,
}

impl Plan {
    fn new(n: usize) -> Self {
        let rounds = floor_log2(n as u32);
        let remainder = n - (1usize << rounds);
        Self {
            n,
            rounds,
            remainder,
            straggler_after: ceil_log2(remainder as u32),
        }
    }

    fn has_straggler(&self) -> bool {
        self.remainder > 0
    }

    /// Logical rank that receives this member's message at `distance`.
    fn send_to(&self, logical: usize, distance: u32) -> usize {
        (logical + self.n - (1usize << distance) % self.n) % self.n
    }

    /// Logical rank that sends this member its message at `distance`.
    fn recv_from(&self, logical: usize, distance: u32) -> usize {
        (logical + (1usize << distance)) % self.n
    }

    fn max_distance(&self) -> u32 {
        if self.has_straggler() {
            self.rounds
        } else {
            self.rounds.saturating_sub(1)
        }
    }
}

impl GrpcommModule for Brucks {
    fn name(&self) -> &'static str {
        "brucks"
    }

    fn tag(&self) -> Tag {
        tags::ALLGATHER_BRUCKS
    }

    fn allgather(
        &self,
        ctx: &mut GroupContext,
        signature: &Signature,
        contribution: &[u8],
    ) -> Result<()> {
        let plan = Plan::new(signature.size());
        let me = ctx.me;
        let tracker = ctx
            .registry
            .get_tracker(signature, false)
            .ok_or_else(|| OverlayError::violation("allgather", "tracker missing after join"))?;
        tracker.absorb(Bucket::single(me, contribution.to_vec()))?;

        if plan.n == 1 {
            ctx.finish(signature);
            return Ok(());
        }
        tracker.state = TrackerState::AwaitingRound(0);
        if plan.has_straggler() && plan.straggler_after == 0 {
            send_round(ctx, signature, &plan, plan.rounds)?;
        }
        send_round(ctx, signature, &plan, 0)?;
        progress(ctx, signature, &plan)
    }

    fn on_message(&self, ctx: &mut GroupContext, sender: Rank, msg: OverlayMessage) -> Result<()> {
        let OverlayMessage::Round {
            signature,
            distance,
            bucket,
        } = msg
        else {
            return Err(OverlayError::violation(
                "allgather",
                format!("unexpected {} message on the brucks tag", msg.name()),
            ));
        };
        signature.validate(ctx.group, ctx.size)?;

        if let Err(e) = on_round(ctx, sender, &signature, distance, bucket) {
            ctx.fail(&signature, e);
        }
        Ok(())
    }
}

fn on_round(
    ctx: &mut GroupContext,
    sender: Rank,
    signature: &Signature,
    distance: u32,
    bucket: Bucket,
) -> Result<()> {
    let plan = Plan::new(signature.size());
    if plan.n == 1 || distance > plan.max_distance() {
        return Err(OverlayError::violation(
            "allgather",
            format!("brucks distance {distance} out of range for {} participants", plan.n),
        ));
    }
    let logical = signature
        .logical_rank(ctx.me)
        .ok_or(OverlayError::NotParticipant { rank: ctx.me })?;
    let expected = signature.member(plan.recv_from(logical, distance));
    if sender != expected {
        return Err(OverlayError::violation(
            "allgather",
            format!("brucks distance {distance} expected from rank {expected}, got {sender}"),
        ));
    }

    check_contributors(signature, &bucket)?;
    let tracker = ctx.registry.get_or_create(signature);
    tracker.stash_round(distance, sender, bucket)?;
    if tracker.is_joined() {
        progress(ctx, signature, &plan)?;
    }
    Ok(())
}

fn send_round(
    ctx: &mut GroupContext,
    signature: &Signature,
    plan: &Plan,
    distance: u32,
) -> Result<()> {
    let Some(tracker) = ctx.registry.get_tracker(signature, false) else {
        return Ok(());
    };
    let logical = tracker
        .my_rank
        .ok_or_else(|| OverlayError::violation("allgather", "round sent before join"))?;
    if tracker.distance_mask_sent.set(distance as usize) {
        return Ok(());
    }
    let dest = signature.member(plan.send_to(logical, distance));
    let msg = OverlayMessage::Round {
        signature: signature.clone(),
        distance,
        bucket: tracker.bucket.clone(),
    };
    ctx.send(
        dest,
        tags::ALLGATHER_BRUCKS,
        &msg,
        SendPurpose::Collective(signature.clone()),
    )?;
    Ok(())
}

/// Consume buffered rounds in order; the straggler is consumed after the
/// last regular round.
fn progress(ctx: &mut GroupContext, signature: &Signature, plan: &Plan) -> Result<()> {
    loop {
        let Some(tracker) = ctx.registry.get_tracker(signature, false) else {
            return Ok(());
        };
        let TrackerState::AwaitingRound(distance) = tracker.state else {
            return Ok(());
        };
        if !tracker.check_distance_recv(distance.checked_sub(1)) {
            return Err(OverlayError::violation(
                "allgather",
                format!("brucks distance {distance} reached before its predecessor"),
            ));
        }
        let Some(round) = tracker.take_round(distance) else {
            return Ok(());
        };
        tracker.absorb(round.bucket)?;
        tracker.mark_distance_recv(distance)?;
        let (nreported, nexpected) = (tracker.nreported, tracker.nexpected);

        let regular = distance < plan.rounds;
        if regular && plan.has_straggler() && distance + 1 == plan.straggler_after {
            send_round(ctx, signature, plan, plan.rounds)?;
        }
        if nreported >= nexpected {
            ctx.finish(signature);
            return Ok(());
        }

        let next = distance + 1;
        let more = next < plan.rounds || (next == plan.rounds && plan.has_straggler());
        if !regular || !more {
            return Err(OverlayError::violation(
                "allgather",
                format!("brucks rounds exhausted with {nreported} of {nexpected} contributions"),
            ));
        }
        if let Some(tracker) = ctx.registry.get_tracker(signature, false) {
            tracker.state = TrackerState::AwaitingRound(next);
        }
        if next < plan.rounds {
            send_round(ctx, signature, plan, next)?;
        }
    }
}
