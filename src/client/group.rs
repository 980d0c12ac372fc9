use super::deliveries::Deliveries;
use super::event_loop::{self, Command};
use crate::collective::{Bucket, CollectiveHandle, CompletionFn, Delivery};
use crate::config::OverlayConfig;
use crate::engine::GroupEngine;
use crate::error::{OverlayError, Result};
use crate::transport::Transport;
use crate::types::{GroupId, Rank, Tag};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

/// One member's handle on an overlay group.
///
/// Collectives are issued to a background event loop that owns the engine.
/// Every member must issue the collectives of a participant list in the same
/// order.
pub struct OverlayGroup {
    group: GroupId,
    rank: Rank,
    size: u32,
    commands: mpsc::UnboundedSender<Command>,
    deliveries: Arc<Deliveries>,
    transport: Arc<dyn Transport>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl OverlayGroup {
    /// Start the event loop for this member over `transport`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(group: GroupId, transport: Arc<dyn Transport>, config: OverlayConfig) -> Result<Self> {
        let rank = transport.rank();
        let size = transport.size();
        let engine = GroupEngine::new(group, rank, size, config)?;
        let (commands, rx) = mpsc::unbounded_channel();
        let deliveries = Arc::new(Deliveries::new());
        let task = tokio::spawn(event_loop::run(
            engine,
            Arc::clone(&transport),
            rx,
            Arc::clone(&deliveries),
        ));
        Ok(Self {
            group,
            rank,
            size,
            commands,
            deliveries,
            transport,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Broadcast `payload` under `tag` to `recipients` (empty = whole group).
    ///
    /// Resolves once the payload has left this member; recipients read it
    /// with [`OverlayGroup::recv_xcast`].
    pub async fn xcast(&self, recipients: &[Rank], tag: Tag, payload: Vec<u8>) -> Result<()> {
        let (done, rx) = completion();
        self.submit(Command::Xcast {
            recipients: recipients.to_vec(),
            tag,
            payload,
            done,
        })?;
        wait(rx).await.map(|_| ())
    }

    /// Gather `payload` from every participant. The result is ordered by rank.
    pub async fn allgather(&self, recipients: &[Rank], payload: Vec<u8>) -> Result<Bucket> {
        self.allgather_nb(recipients, payload).wait().await
    }

    /// Wait until every participant has entered the barrier.
    pub async fn barrier(&self, recipients: &[Rank]) -> Result<()> {
        self.barrier_nb(recipients).wait().await.map(|_| ())
    }

    /// Non-blocking allgather. The collective is issued before this returns.
    pub fn allgather_nb(&self, recipients: &[Rank], payload: Vec<u8>) -> CollectiveHandle {
        let (done, rx) = completion();
        let submitted = self.submit(Command::Allgather {
            recipients: recipients.to_vec(),
            payload,
            done,
        });
        CollectiveHandle::spawn(async move {
            submitted?;
            wait(rx).await
        })
    }

    /// Non-blocking barrier. The collective is issued before this returns.
    pub fn barrier_nb(&self, recipients: &[Rank]) -> CollectiveHandle {
        let (done, rx) = completion();
        let submitted = self.submit(Command::Barrier {
            recipients: recipients.to_vec(),
            done,
        });
        CollectiveHandle::spawn(async move {
            submitted?;
            wait(rx).await
        })
    }

    /// Receive the next xcast payload delivered under `tag`.
    pub async fn recv_xcast(&self, tag: Tag) -> Result<Delivery> {
        self.deliveries.recv(tag).await
    }

    /// Leave the group: stop the event loop, fail whatever is in flight and
    /// tell the peers this member is gone.
    pub async fn close(&self) -> Result<()> {
        let _ = self.commands.send(Command::Close);
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            task.await
                .map_err(|e| OverlayError::transport_with_source("event loop panicked", e))?;
        }
        self.transport.close();
        tracing::debug!(rank = self.rank, group = self.group, "overlay group closed");
        Ok(())
    }

    fn submit(&self, cmd: Command) -> Result<()> {
        self.commands.send(cmd).map_err(|_| OverlayError::Shutdown)
    }
}

impl std::fmt::Debug for OverlayGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayGroup")
            .field("group", &self.group)
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

/// A completion callback feeding a oneshot channel.
fn completion() -> (CompletionFn, oneshot::Receiver<Result<Bucket>>) {
    let (tx, rx) = oneshot::channel();
    let done: CompletionFn = Box::new(move |_, result| {
        let _ = tx.send(result);
    });
    (done, rx)
}

async fn wait(rx: oneshot::Receiver<Result<Bucket>>) -> Result<Bucket> {
    rx.await.map_err(|_| OverlayError::Shutdown)?
}
