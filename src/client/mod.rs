mod bootstrap;
mod deliveries;
mod event_loop;
mod group;

pub use deliveries::Deliveries;
pub use group::OverlayGroup;
