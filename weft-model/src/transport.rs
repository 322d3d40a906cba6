//! Transport abstraction
//!
//! Decouples the replication engine from the concrete peer-to-peer stack.
//! Production wires in a gossip transport; tests use the in-memory
//! simulation. All transport failures are transient: the broadcaster and
//! syncer absorb them with retry and logging, and convergence relies on
//! future envelopes rather than on any single delivery.

use crate::envelope::Envelope;
use crate::types::{Cid, PeerId};
use async_trait::async_trait;

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("broadcast failed: {0}")]
    Broadcast(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("no peers available for topic {0:?}")]
    NoPeers(String),
}

/// Peer-to-peer capabilities consumed by the broadcaster and syncer.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Best-effort delivery of a locally committed envelope to the topic's
    /// peers. Returns once enqueued locally; delivery order is not
    /// guaranteed, causal parents reconstruct ordering on the far side.
    async fn broadcast(&self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Request envelopes by cid from one peer. Any per-cid failure fails the
    /// whole request; the caller retries with its own policy.
    async fn fetch(
        &self,
        peer: PeerId,
        topic: &str,
        cids: &[Cid],
    ) -> Result<Vec<Envelope>, TransportError>;

    /// Current peer set for a topic.
    async fn peers(&self, topic: &str) -> Vec<PeerId>;
}

/// Served side of the fetch path: something that can hand out envelopes by
/// cid so remote peers can repair their replicas.
#[async_trait]
pub trait FetchProvider: Send + Sync {
    async fn envelopes(&self, topic: &str, cids: &[Cid]) -> Result<Vec<Envelope>, TransportError>;
}
