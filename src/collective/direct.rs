//! Rendezvous allgather and barrier.
//!
//! Every participant routes its contribution to the master (the lifeline).
//! Once all have reported, the master xcasts a release carrying the
//! aggregated bucket; each participant completes when the release for its
//! signature reaches it.

use super::GrpcommModule;
use super::bucket::Bucket;
use super::context::{GroupContext, SendPurpose};
use super::signature::Signature;
use super::tracker::TrackerState;
use super::xcast;
use crate::error::{OverlayError, Result};
use crate::protocol::{OverlayMessage, encode_message};
use crate::types::{Rank, Tag, tags};

/// Rendezvous through the lifeline, released by tree-relay broadcast.
#[derive(Debug, Clone, Copy, Default)]
pub struct Direct;

impl GrpcommModule for Direct {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn tag(&self) -> Tag {
        tags::ALLGATHER_DIRECT
    }

    fn allgather(
        &self,
        ctx: &mut GroupContext,
        signature: &Signature,
        contribution: &[u8],
    ) -> Result<()> {
        let me = ctx.me;
        let master = ctx.topology.lifeline();
        let own = Bucket::single(me, contribution.to_vec());

        let tracker = ctx
            .registry
            .get_tracker(signature, false)
            .ok_or_else(|| OverlayError::violation("allgather", "tracker missing after join"))?;

        if me == master {
            tracker.state = TrackerState::Collecting;
            tracker.absorb(own)?;
            return maybe_release(ctx, signature);
        }

        tracker.state = TrackerState::AwaitingRelease;
        let msg = OverlayMessage::Contribute {
            signature: signature.clone(),
            bucket: own,
        };
        ctx.send_routed(
            master,
            tags::ALLGATHER_DIRECT,
            &msg,
            SendPurpose::Collective(signature.clone()),
        )?;
        Ok(())
    }

    /// An allgather of empty contributions.
    fn barrier(&self, ctx: &mut GroupContext, signature: &Signature) -> Result<()> {
        self.allgather(ctx, signature, &[])
    }

    fn on_message(&self, ctx: &mut GroupContext, sender: Rank, msg: OverlayMessage) -> Result<()> {
        let OverlayMessage::Contribute { signature, bucket } = msg else {
            return Err(OverlayError::violation(
                "allgather",
                format!("unexpected {} message on the rendezvous tag", msg.name()),
            ));
        };
        signature.validate(ctx.group, ctx.size)?;

        if let Err(e) = on_contribute(ctx, sender, &signature, bucket) {
            ctx.fail(&signature, e);
        }
        Ok(())
    }
}

fn on_contribute(
    ctx: &mut GroupContext,
    sender: Rank,
    signature: &Signature,
    bucket: Bucket,
) -> Result<()> {
    if ctx.me != ctx.topology.lifeline() {
        return Err(OverlayError::violation(
            "allgather",
            format!("rank {} received a contribution but is not the master", ctx.me),
        ));
    }
    if bucket.ranks() != [sender] {
        return Err(OverlayError::violation(
            "allgather",
            format!("contribution from rank {sender} carries {:?}", bucket.ranks()),
        ));
    }
    if !signature.includes(sender) {
        return Err(OverlayError::NotParticipant { rank: sender });
    }

    let tracker = ctx.registry.get_or_create(signature);
    if tracker.bucket.contains(sender) {
        return Err(OverlayError::violation(
            "allgather",
            format!("rank {sender} contributed twice"),
        ));
    }
    tracker.absorb(bucket)?;
    tracing::debug!(
        rank = ctx.me,
        sender,
        reported = tracker.nreported,
        expected = tracker.nexpected,
        "contribution received"
    );
    maybe_release(ctx, signature)
}

/// Release the collective once every participant has reported.
fn maybe_release(ctx: &mut GroupContext, signature: &Signature) -> Result<()> {
    let Some(tracker) = ctx.registry.get_tracker(signature, false) else {
        return Ok(());
    };
    if tracker.nreported < tracker.nexpected {
        return Ok(());
    }

    let mut bucket = tracker.bucket.clone();
    bucket.sort_by_rank();
    tracker.state = TrackerState::AwaitingRelease;
    let release = OverlayMessage::Release {
        signature: signature.clone(),
        bucket,
    };
    let payload = encode_message(&release)?;
    tracing::debug!(rank = ctx.me, %signature, "releasing rendezvous");
    xcast::start(ctx, signature.clone(), tags::RELEASE, payload, None);

    // A master outside the participant list never sees its own release.
    if !signature.includes(ctx.me) {
        ctx.registry.remove(signature);
    }
    Ok(())
}

/// Complete a participant's collective from the master's release.
pub(crate) fn on_release(ctx: &mut GroupContext, signature: &Signature, bucket: Bucket) {
    let Some(tracker) = ctx.registry.get_tracker(signature, false) else {
        tracing::debug!(rank = ctx.me, %signature, "ignoring release for unknown collective");
        return;
    };
    let mut expected = signature.participants.clone();
    expected.sort_unstable();
    if bucket.ranks() != expected {
        let err = OverlayError::violation(
            "allgather",
            format!("release carries ranks {:?}, expected {expected:?}", bucket.ranks()),
        );
        ctx.fail(signature, err);
        return;
    }
    tracker.bucket = bucket;
    tracker.nreported = tracker.bucket.len();
    ctx.finish(signature);
}
