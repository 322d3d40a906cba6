//! Replica actor — single consumer owning one topic's store.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use weft_model::{Cid, Clock, Envelope, InsertOutcome, QueryFilter, StoreError, TopicStore};

use crate::broadcast::Broadcaster;

/// Commands processed by the replica actor.
pub(crate) enum ReplicaCmd {
    /// Create and commit a local envelope: parents are the current heads,
    /// the timestamp comes from the replica's clock.
    Publish {
        payload: Vec<u8>,
        resp: oneshot::Sender<Result<Cid, StoreError>>,
    },
    /// Ingest an envelope received from a peer (broadcast or fetch result).
    Ingest {
        envelope: Envelope,
        resp: Option<oneshot::Sender<Result<InsertOutcome, StoreError>>>,
    },
    Get {
        cid: Cid,
        resp: oneshot::Sender<Result<Envelope, StoreError>>,
    },
    Query {
        filter: QueryFilter,
        resp: oneshot::Sender<Vec<Envelope>>,
    },
    Heads {
        resp: oneshot::Sender<Vec<Cid>>,
    },
    PendingCount {
        resp: oneshot::Sender<usize>,
    },
    /// Subscribe to committed envelopes. Served by the actor so the receiver
    /// is created at a serialization point: no commit can slip between the
    /// subscription and the first delivery.
    Subscribe {
        resp: oneshot::Sender<broadcast::Receiver<Envelope>>,
    },
    Shutdown,
}

pub(crate) struct Replica<S> {
    topic: String,
    store: S,
    clock: Arc<dyn Clock>,
    broadcaster: Broadcaster,
    repair_tx: mpsc::Sender<Vec<Cid>>,
    rx: mpsc::Receiver<ReplicaCmd>,
}

impl<S: TopicStore> Replica<S> {
    pub(crate) fn new(
        topic: String,
        store: S,
        clock: Arc<dyn Clock>,
        broadcaster: Broadcaster,
        repair_tx: mpsc::Sender<Vec<Cid>>,
        rx: mpsc::Receiver<ReplicaCmd>,
    ) -> Self {
        Self {
            topic,
            store,
            clock,
            broadcaster,
            repair_tx,
            rx,
        }
    }

    pub(crate) async fn run(mut self, token: CancellationToken) {
        loop {
            let cmd = tokio::select! {
                _ = token.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(cmd) => cmd,
                    None => break,
                },
            };

            match cmd {
                ReplicaCmd::Publish { payload, resp } => {
                    let _ = resp.send(self.on_publish(payload));
                }
                ReplicaCmd::Ingest { envelope, resp } => {
                    let result = self.on_ingest(envelope);
                    if let Some(resp) = resp {
                        let _ = resp.send(result);
                    }
                }
                ReplicaCmd::Get { cid, resp } => {
                    let _ = resp.send(self.store.get(&cid));
                }
                ReplicaCmd::Query { filter, resp } => {
                    let _ = resp.send(self.store.query(&filter));
                }
                ReplicaCmd::Heads { resp } => {
                    let _ = resp.send(self.store.heads());
                }
                ReplicaCmd::PendingCount { resp } => {
                    let _ = resp.send(self.store.pending_count());
                }
                ReplicaCmd::Subscribe { resp } => {
                    let _ = resp.send(self.store.on_commit());
                }
                ReplicaCmd::Shutdown => break,
            }
        }
        debug!(topic = %self.topic, "replica actor stopped");
    }

    fn on_publish(&mut self, payload: Vec<u8>) -> Result<Cid, StoreError> {
        let parents = self.store.heads();
        let envelope = Envelope::new(&self.topic, parents, self.clock.now_ns(), payload)
            .map_err(StoreError::Invalid)?;

        // Parents are exactly the committed heads, so this always commits.
        self.store.insert(envelope.clone())?;
        self.broadcaster.publish(envelope.clone());
        Ok(envelope.cid())
    }

    fn on_ingest(&mut self, envelope: Envelope) -> Result<InsertOutcome, StoreError> {
        let outcome = self.store.insert(envelope)?;
        if let InsertOutcome::Pending(missing) = &outcome {
            self.request_repair(missing.clone());
        }
        Ok(outcome)
    }

    /// Hand missing parent cids to the repair worker. Non-blocking: the actor
    /// must never wait on its own helper tasks.
    fn request_repair(&self, missing: Vec<Cid>) {
        match self.repair_tx.try_send(missing) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                // The cids stay in the store's missing-link index; a later
                // pending envelope naming them re-queues the fetch.
                warn!(
                    topic = %self.topic,
                    count = dropped.len(),
                    "repair queue full, dropping fetch request"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(topic = %self.topic, "repair worker gone");
            }
        }
    }
}
