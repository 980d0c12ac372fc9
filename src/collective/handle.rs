use super::bucket::Bucket;
use crate::error::{OverlayError, Result};
use std::future::Future;
use tokio::task::JoinHandle;

/// A handle to a non-blocking collective operation.
///
/// The collective runs in the group's event loop; the handle owns a task
/// awaiting its completion. Call `wait()` for the result, or check
/// `is_finished()` to poll.
///
/// Dropping the handle abandons the result; the collective itself still
/// runs to completion in the event loop.
pub struct CollectiveHandle {
    inner: Option<JoinHandle<Result<Bucket>>>,
}

impl CollectiveHandle {
    /// Spawn a future as a non-blocking collective and return a handle.
    pub(crate) fn spawn(fut: impl Future<Output = Result<Bucket>> + Send + 'static) -> Self {
        Self {
            inner: Some(tokio::spawn(fut)),
        }
    }

    /// Wait for the collective to complete and return its bucket.
    pub async fn wait(mut self) -> Result<Bucket> {
        let Some(handle) = self.inner.take() else {
            return Err(OverlayError::Shutdown);
        };
        handle
            .await
            .map_err(|e| OverlayError::transport(format!("collective task panicked: {e}")))?
    }

    /// Check if the collective has finished (non-blocking).
    pub fn is_finished(&self) -> bool {
        self.inner.as_ref().is_none_or(|h| h.is_finished())
    }
}

impl Drop for CollectiveHandle {
    fn drop(&mut self) {
        if let Some(handle) = &self.inner {
            handle.abort();
        }
    }
}

/// A group of non-blocking collectives that can be waited on together.
#[derive(Default)]
pub struct CollectiveGroup {
    handles: Vec<CollectiveHandle>,
}

impl CollectiveGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, h: CollectiveHandle) {
        self.handles.push(h);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for all collectives in the group, in push order.
    ///
    /// Returns the first error encountered, if any. All tasks are awaited
    /// regardless of errors.
    pub async fn wait_all(self) -> Result<Vec<Bucket>> {
        let mut first_err = None;
        let mut buckets = Vec::with_capacity(self.handles.len());
        for h in self.handles {
            match h.wait().await {
                Ok(bucket) => buckets.push(bucket),
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(buckets),
        }
    }
}
