//! Routing topologies over an overlay group.
//!
//! Every member builds its own view of a spanning tree rooted at the
//! lifeline: who its parent is, which direct children it relays to, and
//! which ranks sit below each child.

mod binomial;
mod flat;

pub use binomial::{BinomialTopology, binomial_children, binomial_parent};
pub use flat::FlatTopology;

use crate::bitmap::Bitmap;
use crate::config::TopologyKind;
use crate::error::Result;
use crate::types::Rank;

/// Rank of the lifeline (tree root and rendezvous master).
pub const LIFELINE: Rank = 0;

/// A direct child of this node and the ranks reachable through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteChild {
    pub id: Rank,
    /// Every rank in the child's subtree, the child itself excluded.
    pub relatives: Bitmap,
}

impl RouteChild {
    /// Whether `target` is this child or one of its relatives.
    pub fn covers(&self, target: Rank) -> bool {
        self.id == target || self.relatives.is_set(target as usize)
    }
}

/// Routing decisions for one member of a group.
///
/// Callers must run `initialize` and `update_topology` before querying routes.
pub trait Routed: Send + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Reset to `self_id` with the lifeline as root and no children.
    fn initialize(&mut self, self_id: Rank);

    /// Discard the current children and rebuild them for `num_procs` members.
    fn update_topology(&mut self, num_procs: u32);

    /// Next hop from this node toward `target`.
    fn get_nexthop(&self, target: Rank) -> Rank;

    /// Drop `route` from the children list. Missing routes are ignored.
    ///
    /// Fails with `LifelineLost` when `route` is the lifeline of a non-root node.
    fn route_lost(&mut self, route: Rank) -> Result<()>;

    /// Direct children, in relay order.
    fn children(&self) -> &[RouteChild];

    fn self_id(&self) -> Rank;
    fn parent(&self) -> Rank;
    fn lifeline(&self) -> Rank;
    fn num_procs(&self) -> u32;

    /// Ids of the direct children.
    fn get_routing_list(&self) -> Vec<Rank> {
        self.children().iter().map(|c| c.id).collect()
    }

    fn num_routes(&self) -> usize {
        self.children().len()
    }
}

/// Build and initialize the topology selected by `kind`.
pub fn build(kind: TopologyKind, self_id: Rank, num_procs: u32) -> Box<dyn Routed> {
    let mut topo: Box<dyn Routed> = match kind {
        TopologyKind::Binomial => Box::new(BinomialTopology::default()),
        TopologyKind::Flat => Box::new(FlatTopology::default()),
    };
    topo.initialize(self_id);
    topo.update_topology(num_procs);
    topo
}
