//! Overlay groups: a binomial routing tree over a fixed membership and the
//! collective engine (xcast, barrier, allgather) that runs on top of it.
//!
//! [`GroupEngine`] is the sans-IO core; [`OverlayGroup`] drives it from a
//! tokio event loop over any [`Transport`].

pub mod bitmap;
pub mod client;
pub mod collective;
pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod topology;
pub mod transport;
pub mod types;

pub use client::OverlayGroup;
pub use collective::{Bucket, CollectiveGroup, CollectiveHandle, CompletionFn, Delivery, Signature};
pub use config::{AllgatherAlgorithm, OverlayConfig, TopologyKind};
pub use engine::GroupEngine;
pub use error::{OverlayError, Result};
pub use protocol::OverlayMessage;
pub use topology::Routed;
pub use transport::{LocalEndpoint, LocalMesh, Transport, TransportEvent};
pub use types::{GroupId, Rank, Tag};
