/// Position of a member within its group (0-indexed).
pub type Rank = u32;

/// Handle identifying one overlay group.
pub type GroupId = u64;

/// Transport message tag.
pub type Tag = u32;

/// Tags at or above this value are owned by the overlay engine.
/// Application xcast tags must stay below it.
pub const RESERVED_TAG_BASE: Tag = 0xFFFF_FF00;

/// Reserved transport tags.
pub mod tags {
    use super::{RESERVED_TAG_BASE, Tag};

    /// Routed envelope hopping toward a non-neighbour.
    pub const FORWARD: Tag = RESERVED_TAG_BASE;
    /// Tree-relay broadcast envelope.
    pub const XCAST: Tag = RESERVED_TAG_BASE + 1;
    /// Contribution sent to the rendezvous master.
    pub const ALLGATHER_DIRECT: Tag = RESERVED_TAG_BASE + 2;
    /// Recursive-doubling round exchange.
    pub const ALLGATHER_RCD: Tag = RESERVED_TAG_BASE + 3;
    /// Bruck round exchange.
    pub const ALLGATHER_BRUCKS: Tag = RESERVED_TAG_BASE + 4;
    /// Xcast target tag carrying the master's release of a rendezvous allgather.
    pub const RELEASE: Tag = RESERVED_TAG_BASE + 5;
}

/// Whether `tag` belongs to the engine's reserved range.
pub const fn is_reserved(tag: Tag) -> bool {
    tag >= RESERVED_TAG_BASE
}

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u8 = 1;
