use super::GrpcommModule;
use super::bucket::Bucket;
use super::context::{GroupContext, SendPurpose};
use super::helpers::{check_contributors, floor_log2};
use super::signature::Signature;
use super::tracker::TrackerState;
use crate::error::{OverlayError, Result};
use crate::protocol::OverlayMessage;
use crate::types::{Rank, Tag, tags};

/// Recursive-doubling allgather for power-of-two participant counts.
///
/// Round `d` exchanges the whole bucket with logical rank `my_rank ^ (1 << d)`,
/// so after `log2(n)` rounds every member holds every contribution.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecursiveDoubling;

impl GrpcommModule for RecursiveDoubling {
    fn name(&self) -> &'static str {
        "rcd"
    }

    fn tag(&self) -> Tag {
        tags::ALLGATHER_RCD
    }

    fn allgather(
        &self,
        ctx: &mut GroupContext,
        signature: &Signature,
        contribution: &[u8],
    ) -> Result<()> {
        let n = signature.size() as u32;
        if !n.is_power_of_two() {
            return Err(OverlayError::TryNext {
                algorithm: self.name(),
                reason: format!("group size {n} is not a power of two"),
            });
        }

        let me = ctx.me;
        let tracker = ctx
            .registry
            .get_tracker(signature, false)
            .ok_or_else(|| OverlayError::violation("allgather", "tracker missing after join"))?;
        tracker.absorb(Bucket::single(me, contribution.to_vec()))?;

        if n == 1 {
            ctx.finish(signature);
            return Ok(());
        }
        tracker.state = TrackerState::AwaitingRound(0);
        send_round(ctx, signature, 0)?;
        progress(ctx, signature)
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
                format!("unexpected {} message on the rcd tag", msg.name()),
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
    let n = signature.size() as u32;
    if !n.is_power_of_two() {
        return Err(OverlayError::violation(
            "allgather",
            format!("rcd round for non-power-of-two group size {n}"),
        ));
    }
    let rounds = floor_log2(n);
    if distance >= rounds {
        return Err(OverlayError::violation(
            "allgather",
            format!("rcd distance {distance} out of range for {rounds} rounds"),
        ));
    }
    let logical = signature
        .logical_rank(ctx.me)
        .ok_or(OverlayError::NotParticipant { rank: ctx.me })?;
    let partner = signature.member(logical ^ (1 << distance));
    if sender != partner {
        return Err(OverlayError::violation(
            "allgather",
            format!("rcd distance {distance} expected from rank {partner}, got {sender}"),
        ));
    }

    check_contributors(signature, &bucket)?;
    let tracker = ctx.registry.get_or_create(signature);
    tracker.stash_round(distance, sender, bucket)?;
    if tracker.is_joined() {
        progress(ctx, signature)?;
    }
    Ok(())
}

fn send_round(ctx: &mut GroupContext, signature: &Signature, distance: u32) -> Result<()> {
    let Some(tracker) = ctx.registry.get_tracker(signature, false) else {
        return Ok(());
    };
    let logical = tracker
        .my_rank
        .ok_or_else(|| OverlayError::violation("allgather", "round sent before join"))?;
    tracker.distance_mask_sent.set(distance as usize);
    let partner = signature.member(logical ^ (1 << distance));
    let msg = OverlayMessage::Round {
        signature: signature.clone(),
        distance,
        bucket: tracker.bucket.clone(),
    };
    ctx.send(
        partner,
        tags::ALLGATHER_RCD,
        &msg,
        SendPurpose::Collective(signature.clone()),
    )?;
    Ok(())
}

/// Consume buffered rounds in order until one is missing or the
/// collective completes.
fn progress(ctx: &mut GroupContext, signature: &Signature) -> Result<()> {
    let rounds = floor_log2(signature.size() as u32);
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
                format!("rcd distance {distance} reached before its predecessor"),
            ));
        }
        let Some(round) = tracker.take_round(distance) else {
            return Ok(());
        };
        tracker.absorb(round.bucket)?;
        tracker.mark_distance_recv(distance)?;

        if tracker.nreported >= tracker.nexpected {
            ctx.finish(signature);
            return Ok(());
        }
        if distance + 1 >= rounds {
            return Err(OverlayError::violation(
                "allgather",
                format!(
                    "rcd rounds exhausted with {} of {} contributions",
                    tracker.nreported, tracker.nexpected
                ),
            ));
        }
        tracker.state = TrackerState::AwaitingRound(distance + 1);
        send_round(ctx, signature, distance + 1)?;
    }
}
