use super::OverlayGroup;
use crate::config::OverlayConfig;
use crate::error::{OverlayError, Result};
use crate::transport::{LocalMesh, Transport};
use crate::types::GroupId;
use std::sync::Arc;

impl OverlayGroup {
    /// Start `size` members of one group over an in-process [`LocalMesh`].
    ///
    /// A convenience for tests and single-process deployments; every member
    /// runs its event loop as a tokio task. Index `i` of the result is rank `i`.
    pub fn bootstrap_local(
        group: GroupId,
        size: u32,
        config: OverlayConfig,
    ) -> Result<Vec<OverlayGroup>> {
        if size == 0 {
            return Err(OverlayError::EmptyGroup);
        }
        LocalMesh::new(size)
            .into_iter()
            .map(|endpoint| {
                let transport: Arc<dyn Transport> = endpoint;
                OverlayGroup::spawn(group, transport, config.clone())
            })
            .collect()
    }
}
