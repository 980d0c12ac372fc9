use super::{LIFELINE, RouteChild, Routed};
use crate::bitmap::Bitmap;
use crate::error::{OverlayError, Result};
use crate::types::Rank;

/// Flat topology: the lifeline relays to every member directly and every
/// member reaches every other member in one hop.
///
/// Fits small groups where the relay depth of a tree costs more than the
/// lifeline's fan-out.
#[derive(Debug, Clone, Default)]
pub struct FlatTopology {
    self_id: Rank,
    lifeline_id: Rank,
    num_procs: u32,
    children: Vec<RouteChild>,
}

impl Routed for FlatTopology {
    fn name(&self) -> &'static str {
        "flat"
    }

    fn initialize(&mut self, self_id: Rank) {
        self.self_id = self_id;
        self.lifeline_id = LIFELINE;
        self.num_procs = 0;
        self.children.clear();
    }

    fn update_topology(&mut self, num_procs: u32) {
        self.children.clear();
        self.num_procs = num_procs;
        if self.self_id == self.lifeline_id {
            self.children = (0..num_procs)
                .filter(|&r| r != self.self_id)
                .map(|id| RouteChild {
                    id,
                    relatives: Bitmap::new(0),
                })
                .collect();
        }
    }

    fn get_nexthop(&self, target: Rank) -> Rank {
        target
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
        self.lifeline_id
    }

    fn lifeline(&self) -> Rank {
        self.lifeline_id
    }

    fn num_procs(&self) -> u32 {
        self.num_procs
    }
}
