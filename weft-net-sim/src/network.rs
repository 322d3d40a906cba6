//! Channel-backed transport broker.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use weft_model::{Cid, Envelope, FetchProvider, PeerId, Transport, TransportError};

struct Endpoint {
    inbound: mpsc::Sender<Envelope>,
    provider: Option<Arc<dyn FetchProvider>>,
}

struct Inner {
    endpoints: HashMap<PeerId, Endpoint>,
    /// Broadcasts destined for these `(receiver, topic)` pairs are discarded.
    suspended: HashSet<(PeerId, String)>,
    next_id: u64,
}

/// Shared in-memory network — routes envelopes between `SimTransport`
/// instances. All nodes on a network are peers of every topic.
#[derive(Clone)]
pub struct SimNetwork {
    inner: Arc<Mutex<Inner>>,
    inbound_depth: usize,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::with_inbound_depth(256)
    }

    pub fn with_inbound_depth(inbound_depth: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                endpoints: HashMap::new(),
                suspended: HashSet::new(),
                next_id: 0,
            })),
            inbound_depth: inbound_depth.max(1),
        }
    }

    /// Attach a new node. Returns its transport and the stream of envelopes
    /// broadcast to it by other nodes.
    pub async fn add_node(&self) -> (SimTransport, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(self.inbound_depth);
        let peer_id = {
            let mut inner = self.inner.lock().await;
            let id = PeerId(inner.next_id);
            inner.next_id += 1;
            inner.endpoints.insert(
                id,
                Endpoint {
                    inbound: tx,
                    provider: None,
                },
            );
            id
        };
        (
            SimTransport {
                peer_id,
                network: self.clone(),
            },
            rx,
        )
    }

    /// Register the fetch side of a node: the thing peers sync from.
    pub async fn register_provider(&self, peer: PeerId, provider: Arc<dyn FetchProvider>) {
        let mut inner = self.inner.lock().await;
        if let Some(endpoint) = inner.endpoints.get_mut(&peer) {
            endpoint.provider = Some(provider);
        }
    }

    /// Discard future broadcasts destined for `(peer, topic)`.
    pub async fn suspend(&self, peer: PeerId, topic: &str) {
        let mut inner = self.inner.lock().await;
        inner.suspended.insert((peer, topic.to_string()));
    }

    /// Resume delivery for `(peer, topic)`. Broadcasts discarded while
    /// suspended stay lost; the peer heals through sync.
    pub async fn resume(&self, peer: PeerId, topic: &str) {
        let mut inner = self.inner.lock().await;
        inner.suspended.remove(&(peer, topic.to_string()));
    }

    async fn route_broadcast(&self, from: PeerId, envelope: &Envelope) {
        // Snapshot receivers under the lock, deliver outside it.
        let targets: Vec<(PeerId, mpsc::Sender<Envelope>)> = {
            let inner = self.inner.lock().await;
            inner
                .endpoints
                .iter()
                .filter(|(id, _)| **id != from)
                .filter(|(id, _)| {
                    !inner
                        .suspended
                        .contains(&(**id, envelope.topic().to_string()))
                })
                .map(|(id, ep)| (*id, ep.inbound.clone()))
                .collect()
        };

        for (peer, tx) in targets {
            // Best-effort, like gossip: a full inbound queue loses the
            // delivery and the peer recovers via sync.
            match tx.try_send(envelope.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(%peer, topic = %envelope.topic(), "inbound queue full, dropping delivery");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(%peer, "endpoint closed");
                }
            }
        }
    }

    async fn provider_of(&self, peer: PeerId) -> Option<Arc<dyn FetchProvider>> {
        let inner = self.inner.lock().await;
        inner.endpoints.get(&peer).and_then(|ep| ep.provider.clone())
    }

    async fn peer_ids_except(&self, exclude: PeerId) -> Vec<PeerId> {
        let inner = self.inner.lock().await;
        let mut peers: Vec<PeerId> = inner
            .endpoints
            .keys()
            .filter(|id| **id != exclude)
            .copied()
            .collect();
        peers.sort_unstable();
        peers
    }
}

impl Default for SimNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// One node's view of the simulated network.
pub struct SimTransport {
    peer_id: PeerId,
    network: SimNetwork,
}

impl SimTransport {
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn broadcast(&self, envelope: &Envelope) -> Result<(), TransportError> {
        self.network.route_broadcast(self.peer_id, envelope).await;
        Ok(())
    }

    async fn fetch(
        &self,
        peer: PeerId,
        topic: &str,
        cids: &[Cid],
    ) -> Result<Vec<Envelope>, TransportError> {
        let provider = self
            .network
            .provider_of(peer)
            .await
            .ok_or_else(|| TransportError::Fetch(format!("{} has no fetch provider", peer)))?;
        provider.envelopes(topic, cids).await
    }

    async fn peers(&self, _topic: &str) -> Vec<PeerId> {
        self.network.peer_ids_except(self.peer_id).await
    }
}
