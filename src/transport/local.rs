use super::{Transport, TransportEvent};
use crate::error::{OverlayError, Result};
use crate::types::{Rank, Tag};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, Notify, mpsc};

/// Per-member inbox capacity.
const INBOX_CAPACITY: usize = 1024;

struct Shared {
    inboxes: Vec<mpsc::Sender<TransportEvent>>,
    /// Loss notices; unbounded so a full inbox never hides one.
    control: Vec<mpsc::UnboundedSender<TransportEvent>>,
    alive: Vec<AtomicBool>,
    closed: Vec<Notify>,
}

impl Shared {
    fn is_alive(&self, rank: Rank) -> bool {
        self.alive
            .get(rank as usize)
            .is_some_and(|a| a.load(Ordering::Acquire))
    }
}

/// In-process full mesh over tokio channels.
///
/// Every endpoint can reach every other directly. Closing an endpoint makes
/// sends to and from it fail and tells the survivors it was lost.
pub struct LocalMesh;

impl LocalMesh {
    /// Create one connected endpoint per rank in `0..size`.
    pub fn new(size: u32) -> Vec<Arc<LocalEndpoint>> {
        let mut inboxes = Vec::with_capacity(size as usize);
        let mut receivers = Vec::with_capacity(size as usize);
        let mut control = Vec::with_capacity(size as usize);
        let mut control_receivers = Vec::with_capacity(size as usize);
        for _ in 0..size {
            let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
            inboxes.push(tx);
            receivers.push(rx);
            let (tx, rx) = mpsc::unbounded_channel();
            control.push(tx);
            control_receivers.push(rx);
        }
        let shared = Arc::new(Shared {
            inboxes,
            control,
            alive: (0..size).map(|_| AtomicBool::new(true)).collect(),
            closed: (0..size).map(|_| Notify::new()).collect(),
        });
        receivers
            .into_iter()
            .zip(control_receivers)
            .zip(0..size)
            .map(|((rx, control_rx), rank)| {
                Arc::new(LocalEndpoint {
                    rank,
                    size,
                    shared: Arc::clone(&shared),
                    inbox: Mutex::new(Inbox {
                        messages: rx,
                        control: control_rx,
                    }),
                })
            })
            .collect()
    }
}

/// One member's end of a [`LocalMesh`].
pub struct LocalEndpoint {
    rank: Rank,
    size: u32,
    shared: Arc<Shared>,
    inbox: Mutex<Inbox>,
}

struct Inbox {
    messages: mpsc::Receiver<TransportEvent>,
    control: mpsc::UnboundedReceiver<TransportEvent>,
}

impl LocalEndpoint {
    pub fn is_closed(&self) -> bool {
        !self.shared.is_alive(self.rank)
    }

    async fn send_inner(&self, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<()> {
        if self.is_closed() {
            return Err(OverlayError::Shutdown);
        }
        if !self.shared.is_alive(dest) {
            return Err(OverlayError::PeerUnreachable {
                rank: dest,
                reason: "endpoint closed".into(),
            });
        }
        let inbox = &self.shared.inboxes[dest as usize];
        inbox
            .send(TransportEvent::Message {
                sender: self.rank,
                tag,
                payload,
            })
            .await
            .map_err(|_| OverlayError::PeerUnreachable {
                rank: dest,
                reason: "inbox dropped".into(),
            })
    }

    async fn recv_inner(&self) -> Option<TransportEvent> {
        if self.is_closed() {
            return None;
        }
        let mut inbox = self.inbox.lock().await;
        let Inbox { messages, control } = &mut *inbox;
        tokio::select! {
            biased;
            Some(event) = control.recv() => Some(event),
            event = messages.recv() => event,
            _ = self.shared.closed[self.rank as usize].notified() => None,
        }
    }
}

impl Transport for LocalEndpoint {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> u32 {
        self.size
    }

    fn send<'a>(&'a self, dest: Rank, tag: Tag, payload: Vec<u8>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if dest >= self.size {
                return Err(OverlayError::InvalidRank {
                    rank: dest,
                    group_size: self.size,
                });
            }
            self.send_inner(dest, tag, payload).await
        })
    }

    fn recv<'a>(&'a self) -> BoxFuture<'a, Option<TransportEvent>> {
        Box::pin(self.recv_inner())
    }

    fn close(&self) {
        if !self.shared.alive[self.rank as usize].swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(rank = self.rank, "local endpoint closed");
        self.shared.closed[self.rank as usize].notify_one();
        for peer in 0..self.size {
            if peer != self.rank && self.shared.is_alive(peer) {
                if self.shared.control[peer as usize]
                    .send(TransportEvent::PeerLost(self.rank))
                    .is_err()
                {
                    tracing::warn!(rank = self.rank, peer, "peer dropped before loss notice");
                }
            }
        }
    }
}
