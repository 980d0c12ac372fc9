use crate::collective::Delivery;
use crate::error::{OverlayError, Result};
use crate::types::Tag;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

/// Per-tag queues of xcast payloads delivered to this member.
///
/// The event loop deposits deliveries here; application tasks read them with
/// [`Deliveries::recv`]. Queues are unbounded so a tag nobody reads never
/// stalls the event loop.
#[derive(Default)]
pub struct Deliveries {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    tagged: HashMap<Tag, TaggedEntry>,
    closed: bool,
}

struct TaggedEntry {
    tx: mpsc::UnboundedSender<Delivery>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Delivery>>>,
}

impl TaggedEntry {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }
}

impl Deliveries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a delivery for readers of its tag.
    pub async fn deliver(&self, delivery: Delivery) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }
        let entry = inner.tagged.entry(delivery.tag).or_insert_with(TaggedEntry::new);
        let _ = entry.tx.send(delivery);
    }

    /// Receive the next delivery under `tag`.
    ///
    /// The channel is persistent: successive calls for the same tag receive
    /// successive deliveries. Fails with `Shutdown` once the group closed and
    /// the queue is drained.
    pub async fn recv(&self, tag: Tag) -> Result<Delivery> {
        let rx = {
            let mut inner = self.inner.lock().await;
            if inner.closed && !inner.tagged.contains_key(&tag) {
                return Err(OverlayError::Shutdown);
            }
            let entry = inner.tagged.entry(tag).or_insert_with(TaggedEntry::new);
            Arc::clone(&entry.rx)
        };
        rx.lock().await.recv().await.ok_or(OverlayError::Shutdown)
    }

    /// Stop accepting deliveries and wake every reader.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        // Dropping the senders ends each queue once it is drained.
        for entry in inner.tagged.values_mut() {
            let (tx, _) = mpsc::unbounded_channel();
            entry.tx = tx;
        }
    }
}
