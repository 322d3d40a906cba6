//! Fetch-based repair
//!
//! `TopicSyncer` fulfils requests for envelopes by cid against the topic's
//! peer set. The repair worker (see `replica`) feeds it a coalescing queue of
//! missing parent cids and pushes the results back through the replica's
//! ingest path, retrying with exponential backoff until the topic closes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use weft_model::{Cid, Envelope, PeerId, Transport, TransportError};

/// Peer selection strategy for fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerSelection {
    /// Uniform random over the topic's current peer set.
    #[default]
    Random,
}

/// Errors from a single fetch attempt. All transient from the replica's point
/// of view; the repair worker retries.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("peer returned envelope with unrequested cid {0}")]
    UnrequestedCid(Cid),

    #[error("peer returned invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("peer omitted {0} requested cids")]
    Incomplete(usize),
}

/// Fetches envelopes by content id from remote peers of one topic.
pub struct TopicSyncer {
    topic: String,
    transport: Arc<dyn Transport>,
    selection: PeerSelection,
}

impl TopicSyncer {
    pub fn new(
        topic: impl Into<String>,
        transport: Arc<dyn Transport>,
        selection: PeerSelection,
    ) -> Self {
        Self {
            topic: topic.into(),
            transport,
            selection,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn pick_peer(&self, peers: &[PeerId]) -> PeerId {
        match self.selection {
            PeerSelection::Random => peers[rand::thread_rng().gen_range(0..peers.len())],
        }
    }

    /// Fetch all of `cids` from one peer.
    ///
    /// Returns only envelopes whose derived cid was actually requested and
    /// whose content checks out; anything else fails the whole call. A failed
    /// call leaves the caller free to retry against another peer.
    pub async fn fetch(&self, cids: &[Cid]) -> Result<Vec<Envelope>, SyncError> {
        let peers = self.transport.peers(&self.topic).await;
        if peers.is_empty() {
            return Err(SyncError::Transport(TransportError::NoPeers(
                self.topic.clone(),
            )));
        }
        let peer = self.pick_peer(&peers);

        let envelopes = self.transport.fetch(peer, &self.topic, cids).await?;

        let requested: HashSet<Cid> = cids.iter().copied().collect();
        let mut seen: HashSet<Cid> = HashSet::with_capacity(envelopes.len());
        for env in &envelopes {
            env.validate(Some(&self.topic))
                .map_err(|e| SyncError::InvalidEnvelope(e.to_string()))?;
            if !requested.contains(&env.cid()) {
                return Err(SyncError::UnrequestedCid(env.cid()));
            }
            seen.insert(env.cid());
        }
        if seen.len() < requested.len() {
            return Err(SyncError::Incomplete(requested.len() - seen.len()));
        }
        Ok(envelopes)
    }
}

/// Exponential backoff with a cap: `base * 2^(attempt-1)`, saturating.
pub(crate) fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << shift).min(cap)
}
