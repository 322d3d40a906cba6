//! Node assembly
//!
//! A `Node` owns one replica per topic, created lazily on first use, plus the
//! optional registry watcher. Every replica runs under the node's root
//! cancellation token, so `close` is one cancel followed by bounded drains.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use weft_kernel::{spawn_replica, MemStore, ReplicaError, ReplicaHandle};
use weft_model::registry::Node as RegistryNode;
use weft_model::{
    Cid, Clock, Envelope, EnvelopeError, FetchProvider, InsertOutcome, QueryFilter, StoreError,
    Transport, TransportError,
};
use weft_registry::{RegistryError, RegistryWatcher, Subscription};

use crate::config::NodeOptions;

/// Errors surfaced by the node's public API.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The topic's replica panicked; publishes are rejected until restart.
    #[error("topic {0:?} is faulted")]
    TopicFaulted(String),

    #[error(transparent)]
    Replica(#[from] ReplicaError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// No registry watcher was attached to this node.
    #[error("registry not configured")]
    RegistryDisabled,

    /// A topic or fault table lock holder panicked.
    #[error("node lock poisoned")]
    LockPoisoned,
}

type TopicMap = Arc<Mutex<HashMap<String, ReplicaHandle>>>;
type FaultedSet = Arc<Mutex<HashSet<String>>>;

/// A messaging node: replicated topic stores plus the membership roster.
pub struct Node {
    options: NodeOptions,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    registry: Option<Arc<RegistryWatcher>>,
    topics: TopicMap,
    faulted: FaultedSet,
    token: CancellationToken,
}

impl Node {
    pub fn new(
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        registry: Option<Arc<RegistryWatcher>>,
        options: NodeOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            options,
            transport,
            clock,
            registry,
            topics: Arc::new(Mutex::new(HashMap::new())),
            faulted: Arc::new(Mutex::new(HashSet::new())),
            token: CancellationToken::new(),
        })
    }

    /// Consume envelopes delivered by the transport and route them to their
    /// topics' replicas, creating replicas as needed.
    pub fn start_inbound(self: &Arc<Self>, mut rx: mpsc::Receiver<Envelope>) {
        let node = self.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            loop {
                let envelope = tokio::select! {
                    _ = token.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(env) => env,
                        None => break,
                    },
                };
                if let Err(e) = node.ingest(envelope).await {
                    warn!(error = %e, "dropping inbound envelope");
                }
            }
            debug!("inbound loop stopped");
        });
    }

    /// Publish a payload on a topic; returns the committed cid.
    ///
    /// The envelope's parents are the topic's current heads and its timestamp
    /// comes from the node's clock. Visible locally immediately, on peers
    /// eventually.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
    ) -> Result<Cid, NodeError> {
        let replica = self.replica(topic)?;
        Ok(replica.publish(payload.into()).await?)
    }

    /// Ingest an envelope received from a peer, routed by its own topic.
    pub async fn ingest(&self, envelope: Envelope) -> Result<InsertOutcome, NodeError> {
        let replica = self.replica(envelope.topic())?;
        Ok(replica.ingest(envelope).await?)
    }

    /// Committed envelopes of a topic in `(timestamp, payload)` order,
    /// identical across replicas holding the same set.
    pub async fn query(
        &self,
        topic: &str,
        filter: QueryFilter,
    ) -> Result<Vec<Envelope>, NodeError> {
        let replica = self.replica(topic)?;
        Ok(replica.query(filter).await?)
    }

    /// Look up one envelope by cid; serves peers during sync, so pending
    /// envelopes resolve here too.
    pub async fn get(&self, topic: &str, cid: Cid) -> Result<Envelope, NodeError> {
        let replica = self.replica(topic)?;
        Ok(replica.get(cid).await?)
    }

    pub async fn heads(&self, topic: &str) -> Result<Vec<Cid>, NodeError> {
        let replica = self.replica(topic)?;
        Ok(replica.heads().await?)
    }

    /// Stream of envelopes committed on this topic from this moment on, in
    /// commit order. Earlier history is available through `query`.
    pub async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<broadcast::Receiver<Envelope>, NodeError> {
        let replica = self.replica(topic)?;
        Ok(replica.subscribe().await?)
    }

    /// `subscribe` as a `Stream`. Lag (a subscriber outrun by the commit
    /// buffer) ends the stream's losslessness; such a consumer should re-read
    /// through `query`.
    pub async fn subscribe_stream(
        &self,
        topic: &str,
    ) -> Result<impl futures_core::Stream<Item = Envelope> + Send + Unpin, NodeError> {
        let rx = self.subscribe(topic).await?;
        Ok(BroadcastStream::new(rx).filter_map(|item| futures_util::future::ready(item.ok())))
    }

    // ==================== Registry surface ====================

    /// Snapshot of the cluster roster.
    pub fn get_nodes(&self) -> Result<Vec<RegistryNode>, NodeError> {
        Ok(self.registry()?.get_nodes()?)
    }

    /// Lossy stream of newly registered node batches.
    pub fn on_new_nodes(
        &self,
    ) -> Result<(mpsc::Receiver<Vec<RegistryNode>>, Subscription), NodeError> {
        Ok(self.registry()?.on_new_nodes())
    }

    /// Lossy stream of changes to one registered node.
    pub fn on_changed_node(
        &self,
        node_id: u16,
    ) -> Result<(mpsc::Receiver<RegistryNode>, Subscription), NodeError> {
        Ok(self.registry()?.on_changed_node(node_id)?)
    }

    fn registry(&self) -> Result<&Arc<RegistryWatcher>, NodeError> {
        self.registry.as_ref().ok_or(NodeError::RegistryDisabled)
    }

    // ==================== Lifecycle ====================

    /// Shut down every topic and the registry watcher. Bounded: nothing here
    /// waits on unreachable peers.
    pub async fn close(&self) {
        self.token.cancel();
        if let Some(registry) = &self.registry {
            registry.shutdown();
        }
        // A poisoned map just means fewer handles to drain; the cancelled
        // token already stops every task.
        let handles: Vec<ReplicaHandle> = self
            .topics
            .lock()
            .map(|topics| topics.values().cloned().collect())
            .unwrap_or_default();
        for handle in handles {
            handle.close().await;
        }
    }

    /// Get or lazily create the replica for a topic.
    fn replica(&self, topic: &str) -> Result<ReplicaHandle, NodeError> {
        if topic.is_empty() {
            return Err(NodeError::Replica(ReplicaError::Store(StoreError::Invalid(
                EnvelopeError::EmptyTopic,
            ))));
        }
        let faulted = self
            .faulted
            .lock()
            .map_err(|_| NodeError::LockPoisoned)?
            .contains(topic);
        if faulted {
            return Err(NodeError::TopicFaulted(topic.to_string()));
        }

        let mut topics = self.topics.lock().map_err(|_| NodeError::LockPoisoned)?;
        if let Some(handle) = topics.get(topic) {
            return Ok(handle.clone());
        }

        let store = MemStore::new(topic, self.options.max_pending, self.options.commit_buffer);
        let (handle, join) = spawn_replica(
            store,
            self.transport.clone(),
            self.clock.clone(),
            self.options.replica_options(),
            &self.token,
        );
        topics.insert(topic.to_string(), handle.clone());
        debug!(topic = %topic, "opened topic replica");

        // Watch the actor: a panic faults this topic only, the rest of the
        // node keeps running.
        let topic_name = topic.to_string();
        let topics_map = self.topics.clone();
        let faulted = self.faulted.clone();
        tokio::spawn(async move {
            if let Err(e) = join.await {
                if e.is_panic() {
                    error!(topic = %topic_name, "replica panicked, marking topic faulted");
                    if let Ok(mut guard) = faulted.lock() {
                        guard.insert(topic_name.clone());
                    }
                    if let Ok(mut guard) = topics_map.lock() {
                        guard.remove(&topic_name);
                    }
                }
            }
        });

        Ok(handle)
    }
}

#[async_trait]
impl FetchProvider for Node {
    /// Serve a peer's fetch: every requested cid must resolve or the whole
    /// request fails, and only topics this node already holds are served.
    async fn envelopes(&self, topic: &str, cids: &[Cid]) -> Result<Vec<Envelope>, TransportError> {
        let handle = self
            .topics
            .lock()
            .ok()
            .and_then(|topics| topics.get(topic).cloned());
        let handle =
            handle.ok_or_else(|| TransportError::Fetch(format!("topic {:?} not held", topic)))?;
        handle.envelopes(topic, cids).await
    }
}
