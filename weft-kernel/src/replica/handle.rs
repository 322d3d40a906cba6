//! Handle to a replica actor.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use weft_model::{
    Cid, Envelope, FetchProvider, InsertOutcome, QueryFilter, StoreError, TransportError,
};

use super::actor::ReplicaCmd;

/// Errors surfaced to callers of a replica handle.
#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    /// The actor is gone: shut down, cancelled, or faulted.
    #[error("replica for topic unavailable")]
    Unavailable,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Clonable handle to one topic's replica.
#[derive(Clone)]
pub struct ReplicaHandle {
    topic: String,
    tx: mpsc::Sender<ReplicaCmd>,
    token: CancellationToken,
}

impl ReplicaHandle {
    pub(crate) fn new(
        topic: String,
        tx: mpsc::Sender<ReplicaCmd>,
        token: CancellationToken,
    ) -> Self {
        Self { topic, tx, token }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    async fn request<T>(
        &self,
        cmd: ReplicaCmd,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, ReplicaError> {
        self.tx.send(cmd).await.map_err(|_| ReplicaError::Unavailable)?;
        rx.await.map_err(|_| ReplicaError::Unavailable)
    }

    /// Publish a payload on this topic: parents are the current heads, the
    /// timestamp is stamped by the replica's clock. Returns the new cid.
    pub async fn publish(&self, payload: Vec<u8>) -> Result<Cid, ReplicaError> {
        let (resp, rx) = oneshot::channel();
        Ok(self.request(ReplicaCmd::Publish { payload, resp }, rx).await??)
    }

    /// Ingest an envelope received from a peer.
    pub async fn ingest(&self, envelope: Envelope) -> Result<InsertOutcome, ReplicaError> {
        let (resp, rx) = oneshot::channel();
        Ok(self
            .request(
                ReplicaCmd::Ingest {
                    envelope,
                    resp: Some(resp),
                },
                rx,
            )
            .await??)
    }

    pub async fn get(&self, cid: Cid) -> Result<Envelope, ReplicaError> {
        let (resp, rx) = oneshot::channel();
        Ok(self.request(ReplicaCmd::Get { cid, resp }, rx).await??)
    }

    /// Committed envelopes in `(timestamp, payload)` order.
    pub async fn query(&self, filter: QueryFilter) -> Result<Vec<Envelope>, ReplicaError> {
        let (resp, rx) = oneshot::channel();
        self.request(ReplicaCmd::Query { filter, resp }, rx).await
    }

    pub async fn heads(&self) -> Result<Vec<Cid>, ReplicaError> {
        let (resp, rx) = oneshot::channel();
        self.request(ReplicaCmd::Heads { resp }, rx).await
    }

    pub async fn pending_count(&self) -> Result<usize, ReplicaError> {
        let (resp, rx) = oneshot::channel();
        self.request(ReplicaCmd::PendingCount { resp }, rx).await
    }

    /// Subscribe to committed envelopes in commit order, starting now.
    /// History is available through `query`.
    pub async fn subscribe(&self) -> Result<broadcast::Receiver<Envelope>, ReplicaError> {
        let (resp, rx) = oneshot::channel();
        self.request(ReplicaCmd::Subscribe { resp }, rx).await
    }

    /// Request shutdown without waiting.
    ///
    /// Tries a polite `Shutdown` command first (the actor drains what is
    /// already queued); if the channel is full, cancels the token instead.
    pub fn shutdown(&self) {
        match self.tx.try_send(ReplicaCmd::Shutdown) {
            Ok(_) => {}
            Err(mpsc::error::TrySendError::Full(_)) => self.token.cancel(),
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Shut down and wait for the actor (and its helper tasks) to stop.
    pub async fn close(&self) {
        self.shutdown();
        self.tx.closed().await;
        self.token.cancel();
    }
}

impl std::fmt::Debug for ReplicaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaHandle")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl FetchProvider for ReplicaHandle {
    async fn envelopes(&self, topic: &str, cids: &[Cid]) -> Result<Vec<Envelope>, TransportError> {
        if topic != self.topic {
            return Err(TransportError::Fetch(format!(
                "topic {:?} not served here",
                topic
            )));
        }
        let mut out = Vec::with_capacity(cids.len());
        for cid in cids {
            let env = self
                .get(*cid)
                .await
                .map_err(|e| TransportError::Fetch(e.to_string()))?;
            out.push(env);
        }
        Ok(out)
    }
}
