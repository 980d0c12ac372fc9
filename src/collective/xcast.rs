//! Tree-relay broadcast.
//!
//! The originator routes the envelope to the lifeline, which relays it down
//! the topology tree. Every node forwards an identical copy to each direct
//! child, then delivers locally if it is a recipient.

use super::bucket::Bucket;
use super::context::{GroupContext, SendPurpose};
use super::direct;
use super::signature::Signature;
use super::tracker::CompletionFn;
use crate::error::{OverlayError, Result};
use crate::protocol::{OverlayMessage, decode_message};
use crate::types::{Rank, Tag, tags};

/// Start an xcast of `payload` to the participants of `signature`.
///
/// `done` fires when the root-level send completes, or immediately when
/// this member is the lifeline.
pub(crate) fn start(
    ctx: &mut GroupContext,
    signature: Signature,
    target_tag: Tag,
    payload: Vec<u8>,
    done: Option<CompletionFn>,
) {
    let lifeline = ctx.topology.lifeline();
    let envelope = OverlayMessage::Xcast {
        signature: signature.clone(),
        target_tag,
        origin: ctx.me,
        payload,
    };

    if ctx.me == lifeline {
        relay(ctx, envelope);
        if let Some(done) = done {
            done(signature, Ok(Bucket::new()));
        }
        return;
    }

    match ctx.send_routed(lifeline, tags::XCAST, &envelope, SendPurpose::Relay) {
        Ok(id) => {
            if let Some(done) = done {
                ctx.watch_send(id, SendPurpose::XcastRoot { signature, done });
            }
        }
        Err(e) => {
            tracing::warn!(rank = ctx.me, %signature, error = %e, "xcast root send failed");
            if let Some(done) = done {
                done(signature, Err(e));
            }
        }
    }
}

/// Handle an xcast envelope arriving from a peer.
pub(crate) fn on_message(ctx: &mut GroupContext, sender: Rank, msg: OverlayMessage) -> Result<()> {
    let OverlayMessage::Xcast { signature, .. } = &msg else {
        return Err(OverlayError::violation(
            "xcast",
            format!("unexpected {} message from rank {sender}", msg.name()),
        ));
    };
    signature.validate(ctx.group, ctx.size)?;
    relay(ctx, msg);
    Ok(())
}

/// Forward `envelope` to every direct child, then deliver it locally.
///
/// Failures are logged per child and never stop the fan-out.
fn relay(ctx: &mut GroupContext, envelope: OverlayMessage) {
    for child in ctx.topology.get_routing_list() {
        if let Err(e) = ctx.send(child, tags::XCAST, &envelope, SendPurpose::Relay) {
            tracing::warn!(rank = ctx.me, child, error = %e, "xcast relay to child failed");
        }
    }

    let OverlayMessage::Xcast {
        signature,
        target_tag,
        origin,
        payload,
    } = envelope
    else {
        return;
    };
    if !signature.includes(ctx.me) {
        return;
    }
    if target_tag == tags::RELEASE {
        if let Err(e) = deliver_release(ctx, &payload) {
            tracing::warn!(rank = ctx.me, origin, error = %e, "dropping malformed release");
        }
        return;
    }
    tracing::debug!(rank = ctx.me, origin, tag = target_tag, "xcast delivered");
    ctx.deliver(origin, target_tag, payload);
}

fn deliver_release(ctx: &mut GroupContext, payload: &[u8]) -> Result<()> {
    let (_, msg) = decode_message(payload)?;
    match msg {
        OverlayMessage::Release { signature, bucket } => {
            direct::on_release(ctx, &signature, bucket);
            Ok(())
        }
        other => Err(OverlayError::violation(
            "xcast",
            format!("release tag carried a {} message", other.name()),
        )),
    }
}
