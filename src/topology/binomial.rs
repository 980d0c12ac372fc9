use super::{LIFELINE, RouteChild, Routed};
use crate::bitmap::Bitmap;
use crate::error::{OverlayError, Result};
use crate::types::Rank;

/// Binomial spanning tree rooted at the lifeline.
///
/// Node `r` has children `r | (1 << i)` for every bit `i` above its highest
/// set bit, so its parent is `r` with that bit cleared.
#[derive(Debug, Clone, Default)]
pub struct BinomialTopology {
    self_id: Rank,
    parent_id: Rank,
    lifeline_id: Rank,
    num_procs: u32,
    children: Vec<RouteChild>,
}

/// Direct children of `rank` in a binomial tree of `num_procs` members.
pub fn binomial_children(rank: Rank, num_procs: u32) -> impl Iterator<Item = Rank> {
    let first_bit = if rank == 0 {
        0
    } else {
        u32::BITS - rank.leading_zeros()
    };
    (first_bit..u32::BITS)
        .map(move |i| rank | (1 << i))
        .take_while(move |&child| child < num_procs)
}

/// Parent of `rank`; the root is its own parent.
pub fn binomial_parent(rank: Rank) -> Rank {
    if rank == 0 {
        return 0;
    }
    let highest = u32::BITS - 1 - rank.leading_zeros();
    rank & !(1 << highest)
}

fn mark_subtree(rank: Rank, num_procs: u32, relatives: &mut Bitmap) {
    for child in binomial_children(rank, num_procs) {
        relatives.set(child as usize);
        mark_subtree(child, num_procs, relatives);
    }
}

impl Routed for BinomialTopology {
    fn name(&self) -> &'static str {
        "binomial"
    }

    fn initialize(&mut self, self_id: Rank) {
        self.self_id = self_id;
        self.lifeline_id = LIFELINE;
        self.parent_id = LIFELINE;
        self.num_procs = 0;
        self.children.clear();
    }

    fn update_topology(&mut self, num_procs: u32) {
        self.children.clear();
        self.num_procs = num_procs;
        self.parent_id = if self.self_id == self.lifeline_id {
            self.self_id
        } else {
            binomial_parent(self.self_id)
        };

        for id in binomial_children(self.self_id, num_procs) {
            let mut relatives = Bitmap::new(num_procs as usize);
            mark_subtree(id, num_procs, &mut relatives);
            self.children.push(RouteChild { id, relatives });
        }

        tracing::debug!(
            rank = self.self_id,
            parent = self.parent_id,
            children = ?self.get_routing_list(),
            num_procs,
            "binomial topology rebuilt"
        );
    }

    fn get_nexthop(&self, target: Rank) -> Rank {
        if target == self.self_id {
            return self.self_id;
        }
        if target == self.lifeline_id {
            return self.parent_id;
        }
        self.children
            .iter()
            .find(|child| child.covers(target))
            .map_or(self.parent_id, |child| child.id)
    }

    fn route_lost(&mut self, route: Rank) -> Result<()> {
        if route == self.lifeline_id && self.self_id != self.lifeline_id {
            tracing::error!(rank = self.self_id, lifeline = route, "lost route to lifeline");
            return Err(OverlayError::LifelineLost { rank: route });
        }
        self.children.retain(|child| child.id != route);
        Ok(())
    }

    fn children(&self) -> &[RouteChild] {
        &self.children
    }

    fn self_id(&self) -> Rank {
        self.self_id
    }

    fn parent(&self) -> Rank {
        self.parent_id
    }

    fn lifeline(&self) -> Rank {
        self.lifeline_id
    }

    fn num_procs(&self) -> u32 {
        self.num_procs
    }
}
