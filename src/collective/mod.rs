//! Collective operations over an overlay group.
//!
//! Each algorithm is a [`GrpcommModule`] driving per-signature trackers
//! from local calls and arriving messages. The dispatcher tries the modules
//! selected by configuration in order, skipping any that decline.

mod brucks;
mod bucket;
mod context;
mod direct;
mod handle;
pub(crate) mod helpers;
mod rcd;
mod signature;
mod tracker;
mod xcast;

pub use brucks::Brucks;
pub use bucket::{Bucket, Contribution};
pub use context::{Delivery, GroupContext, Outbound, SendId};
pub use direct::Direct;
pub use handle::{CollectiveGroup, CollectiveHandle};
pub use rcd::RecursiveDoubling;
pub use signature::{Signature, normalize_participants};
pub use tracker::{CompletionFn, PendingRound, Tracker, TrackerRegistry, TrackerState};

pub(crate) use xcast::{on_message as xcast_on_message, start as xcast_start};

use crate::config::AllgatherAlgorithm;
use crate::error::{OverlayError, Result};
use crate::protocol::OverlayMessage;
use crate::types::{Rank, Tag};

/// One collective algorithm.
///
/// Before `allgather` or `barrier` runs, the dispatcher has joined the local
/// member to the signature's tracker, so the completion is already attached.
/// Returning a fall-through error leaves the tracker untouched.
pub trait GrpcommModule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Transport tag carrying this module's messages.
    fn tag(&self) -> Tag;

    fn allgather(
        &self,
        ctx: &mut GroupContext,
        signature: &Signature,
        contribution: &[u8],
    ) -> Result<()>;

    fn barrier(&self, _ctx: &mut GroupContext, _signature: &Signature) -> Result<()> {
        Err(OverlayError::NotImplemented {
            operation: "barrier",
            algorithm: self.name(),
        })
    }

    /// Handle a message that arrived under [`GrpcommModule::tag`].
    ///
    /// Errors returned here are not tied to a collective; the module fails
    /// the affected collective itself when it can identify one.
    fn on_message(&self, ctx: &mut GroupContext, sender: Rank, msg: OverlayMessage) -> Result<()>;
}

const AUTO: &[&dyn GrpcommModule] = &[&RecursiveDoubling, &Brucks, &Direct];
const DIRECT_ONLY: &[&dyn GrpcommModule] = &[&Direct];
const RCD_FIRST: &[&dyn GrpcommModule] = &[&RecursiveDoubling, &Brucks];
const BRUCKS_ONLY: &[&dyn GrpcommModule] = &[&Brucks];

/// Modules tried for an allgather, in order.
pub fn candidates(algorithm: AllgatherAlgorithm) -> &'static [&'static dyn GrpcommModule] {
    match algorithm {
        AllgatherAlgorithm::Auto => AUTO,
        AllgatherAlgorithm::Direct => DIRECT_ONLY,
        AllgatherAlgorithm::RecursiveDoubling => RCD_FIRST,
        AllgatherAlgorithm::Brucks => BRUCKS_ONLY,
    }
}

/// Module owning messages that arrive under `tag`.
pub fn module_for_tag(tag: Tag) -> Option<&'static dyn GrpcommModule> {
    [&Direct as &'static dyn GrpcommModule, &RecursiveDoubling, &Brucks]
        .into_iter()
        .find(|m| m.tag() == tag)
}

/// Run an allgather through the configured modules.
pub(crate) fn dispatch_allgather(ctx: &mut GroupContext, signature: &Signature, contribution: &[u8]) {
    let modules = candidates(ctx.config.allgather);
    let mut declined = None;
    for module in modules {
        match module.allgather(ctx, signature, contribution) {
            Ok(()) => {
                tracing::debug!(rank = ctx.me, %signature, module = module.name(), "allgather started");
                return;
            }
            Err(e) if e.is_fallthrough() => {
                tracing::debug!(module = module.name(), reason = %e, "module declined allgather");
                declined = Some(e);
            }
            Err(e) => {
                ctx.fail(signature, e);
                return;
            }
        }
    }
    ctx.fail(
        signature,
        declined.unwrap_or(OverlayError::NotImplemented {
            operation: "allgather",
            algorithm: "none",
        }),
    );
}

/// Run a barrier through the configured modules, then the rendezvous module.
pub(crate) fn dispatch_barrier(ctx: &mut GroupContext, signature: &Signature) {
    let modules = candidates(ctx.config.allgather);
    let direct: &'static dyn GrpcommModule = &Direct;
    let fallback = (!modules.iter().any(|m| m.tag() == direct.tag())).then_some(direct);
    let mut declined = None;
    for module in modules.iter().copied().chain(fallback) {
        match module.barrier(ctx, signature) {
            Ok(()) => {
                tracing::debug!(rank = ctx.me, %signature, module = module.name(), "barrier started");
                return;
            }
            Err(e) if e.is_fallthrough() => declined = Some(e),
            Err(e) => {
                ctx.fail(signature, e);
                return;
            }
        }
    }
    ctx.fail(
        signature,
        declined.unwrap_or(OverlayError::NotImplemented {
            operation: "barrier",
            algorithm: "none",
        }),
    );
}
