use super::deliveries::Deliveries;
use crate::collective::{CompletionFn, Outbound, SendId};
use crate::engine::GroupEngine;
use crate::error::{OverlayError, Result};
use crate::transport::{Transport, TransportEvent};
use crate::types::{Rank, Tag};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Requests from `OverlayGroup` handles to the event loop.
pub(crate) enum Command {
    Xcast {
        recipients: Vec<Rank>,
        tag: Tag,
        payload: Vec<u8>,
        done: CompletionFn,
    },
    Allgather {
        recipients: Vec<Rank>,
        payload: Vec<u8>,
        done: CompletionFn,
    },
    Barrier {
        recipients: Vec<Rank>,
        done: CompletionFn,
    },
    Close,
}

type SendResult = (SendId, Result<()>);

/// Drive `engine` until closed or every handle is dropped.
///
/// The engine is touched only from this task. Sends go through one writer
/// task per destination so messages to a peer leave in engine order.
pub(crate) async fn run(
    mut engine: GroupEngine,
    transport: Arc<dyn Transport>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    deliveries: Arc<Deliveries>,
) {
    let rank = engine.rank();
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let reader = tokio::spawn(read_loop(Arc::clone(&transport), events_tx));
    let (results_tx, mut results) = mpsc::unbounded_channel::<SendResult>();
    let mut writers: HashMap<Rank, mpsc::UnboundedSender<Outbound>> = HashMap::new();

    let mut sweep = tokio::time::interval(engine.config().sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!(rank, group = engine.group(), "event loop started");
    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(Command::Close) | None => break,
                Some(cmd) => apply(&mut engine, cmd),
            },
            Some(event) = events.recv() => match event {
                TransportEvent::Message { sender, tag, payload } => {
                    engine.handle_message(sender, tag, &payload);
                }
                TransportEvent::PeerLost(peer) => engine.handle_peer_lost(peer),
            },
            Some((id, result)) = results.recv() => engine.handle_send_complete(id, result),
            now = sweep.tick() => {
                let expired = engine.sweep_expired(now.into_std());
                if expired > 0 {
                    tracing::warn!(rank, expired, "collectives timed out");
                }
            }
        }
        flush(&mut engine, &transport, &mut writers, &results_tx, &deliveries).await;
    }

    engine.shutdown();
    deliveries.close().await;
    reader.abort();
    tracing::debug!(rank, "event loop stopped");
}

fn apply(engine: &mut GroupEngine, cmd: Command) {
    match cmd {
        Command::Xcast {
            recipients,
            tag,
            payload,
            done,
        } => engine.xcast(&recipients, tag, payload, done),
        Command::Allgather {
            recipients,
            payload,
            done,
        } => engine.allgather(&recipients, payload, done),
        Command::Barrier { recipients, done } => engine.barrier(&recipients, done),
        Command::Close => {}
    }
}

/// Hand queued sends to their writers and queued deliveries to readers.
async fn flush(
    engine: &mut GroupEngine,
    transport: &Arc<dyn Transport>,
    writers: &mut HashMap<Rank, mpsc::UnboundedSender<Outbound>>,
    results: &mpsc::UnboundedSender<SendResult>,
    deliveries: &Deliveries,
) {
    while let Some(out) = engine.poll_outbound() {
        let writer = writers
            .entry(out.dest)
            .or_insert_with(|| spawn_writer(Arc::clone(transport), results.clone()));
        if let Err(mpsc::error::SendError(out)) = writer.send(out) {
            writers.remove(&out.dest);
            engine.handle_send_complete(
                out.id,
                Err(OverlayError::PeerUnreachable {
                    rank: out.dest,
                    reason: "writer stopped".into(),
                }),
            );
        }
    }
    while let Some(delivery) = engine.poll_delivery() {
        deliveries.deliver(delivery).await;
    }
}

fn spawn_writer(
    transport: Arc<dyn Transport>,
    results: mpsc::UnboundedSender<SendResult>,
) -> mpsc::UnboundedSender<Outbound> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            let result = transport.send(out.dest, out.tag, out.payload).await;
            if results.send((out.id, result)).is_err() {
                break;
            }
        }
    });
    tx
}

async fn read_loop(transport: Arc<dyn Transport>, events: mpsc::UnboundedSender<TransportEvent>) {
    while let Some(event) = transport.recv().await {
        if events.send(event).is_err() {
            break;
        }
    }
    tracing::debug!(rank = transport.rank(), "transport receive loop ended");
}
