//! Roster polling and diffing
//!
//! The watcher keeps an in-memory roster tracking the authoritative registry
//! by polling and diffing, which keeps it stateless at the cost of latency.
//! Membership changes are rare enough that the trade-off is acceptable.
//!
//! Removal is intentionally not handled: the registry is append-mostly and
//! ids that disappear from a snapshot are retained in memory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use weft_model::{Node, RosterError, RosterSource};

use crate::notifier::{Notifier, Subscription};

/// Tuning for the registry watcher.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Delay between polls. Must be positive.
    pub refresh_interval: Duration,
    /// Per-fetch timeout; an in-flight fetch is abandoned when it fires.
    pub call_timeout: Duration,
    /// Per-subscriber notification buffer before values are dropped.
    pub notifier_buffer: usize,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            call_timeout: Duration::from_secs(10),
            notifier_buffer: 8,
        }
    }
}

impl RegistryOptions {
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.refresh_interval.is_zero() {
            return Err(RegistryError::InvalidOptions(
                "refresh_interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    /// The initial roster load failed; the watcher refuses to start rather
    /// than serve an empty roster.
    #[error("registry startup failed: {0}")]
    Startup(String),

    #[error("invalid registry options: {0}")]
    InvalidOptions(String),

    #[error(transparent)]
    Roster(#[from] RosterError),

    /// A roster lock holder panicked.
    #[error("registry lock poisoned")]
    LockPoisoned,
}

/// Watches an external roster source, mirrors it in memory, and notifies
/// subscribers of new and changed nodes.
pub struct RegistryWatcher {
    source: Arc<dyn RosterSource>,
    options: RegistryOptions,
    nodes: RwLock<HashMap<u16, Node>>,
    new_nodes: Notifier<Vec<Node>>,
    /// Per-id change notifiers, created lazily on first subscription.
    changed: Mutex<HashMap<u16, Arc<Notifier<Node>>>>,
    token: CancellationToken,
}

impl RegistryWatcher {
    pub fn new(source: Arc<dyn RosterSource>, options: RegistryOptions) -> Arc<Self> {
        let notifier_buffer = options.notifier_buffer;
        Arc::new(Self {
            source,
            options,
            nodes: RwLock::new(HashMap::new()),
            new_nodes: Notifier::new(notifier_buffer),
            changed: Mutex::new(HashMap::new()),
            token: CancellationToken::new(),
        })
    }

    /// Load the initial roster and start the background poll loop.
    ///
    /// If the initial load fails, no loop is started and the error is
    /// returned; callers must not serve traffic from a zero-state roster.
    pub async fn start(self: &Arc<Self>) -> Result<(), RegistryError> {
        self.options.validate()?;

        self.refresh()
            .await
            .map_err(|e| RegistryError::Startup(e.to_string()))?;

        let watcher = self.clone();
        tokio::spawn(async move {
            watcher.refresh_loop().await;
        });
        Ok(())
    }

    /// Stop the poll loop. In-flight fetches are bounded by `call_timeout`.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Snapshot of the current roster, ordered by node id.
    pub fn get_nodes(&self) -> Result<Vec<Node>, RegistryError> {
        let guard = self.nodes.read().map_err(|_| RegistryError::LockPoisoned)?;
        let mut nodes: Vec<Node> = guard.values().cloned().collect();
        nodes.sort_by_key(|n| n.node_id);
        Ok(nodes)
    }

    /// Subscribe to batches of newly observed nodes. Lossy: on wake, read
    /// `get_nodes` for the authoritative state.
    pub fn on_new_nodes(&self) -> (mpsc::Receiver<Vec<Node>>, Subscription) {
        self.new_nodes.register()
    }

    /// Subscribe to changes of one node id. A change event for an id is never
    /// emitted before that id has been announced as new.
    pub fn on_changed_node(
        &self,
        node_id: u16,
    ) -> Result<(mpsc::Receiver<Node>, Subscription), RegistryError> {
        let notifier = {
            let mut changed = self
                .changed
                .lock()
                .map_err(|_| RegistryError::LockPoisoned)?;
            changed
                .entry(node_id)
                .or_insert_with(|| {
                    Arc::new(Notifier::new(self.options.notifier_buffer))
                })
                .clone()
        };
        Ok(notifier.register())
    }

    async fn refresh_loop(&self) {
        let period = self.options.refresh_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    debug!("registry watcher stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        // Keep the previous roster; retry on the next tick.
                        warn!(error = %e, "roster refresh failed");
                    }
                }
            }
        }
    }

    /// One poll: fetch a snapshot and diff it against memory.
    pub(crate) async fn refresh(&self) -> Result<(), RegistryError> {
        let fresh = tokio::time::timeout(self.options.call_timeout, self.source.fetch_roster())
            .await
            .map_err(|_| RosterError::Timeout)??;

        let mut new_nodes = Vec::new();
        let mut changed_nodes = Vec::new();
        {
            let guard = self.nodes.read().map_err(|_| RegistryError::LockPoisoned)?;
            for node in fresh {
                match guard.get(&node.node_id) {
                    None => new_nodes.push(node),
                    Some(existing) if *existing != node => changed_nodes.push(node),
                    Some(_) => {}
                }
            }
        }

        for node in changed_nodes {
            self.process_changed_node(node)?;
        }
        if !new_nodes.is_empty() {
            self.process_new_nodes(new_nodes)?;
        }
        Ok(())
    }

    fn process_new_nodes(&self, nodes: Vec<Node>) -> Result<(), RegistryError> {
        info!(count = nodes.len(), "processing new nodes");
        self.new_nodes.trigger(nodes.clone());

        let mut guard = self.nodes.write().map_err(|_| RegistryError::LockPoisoned)?;
        for node in nodes {
            guard.insert(node.node_id, node);
        }
        Ok(())
    }

    fn process_changed_node(&self, node: Node) -> Result<(), RegistryError> {
        info!(node_id = node.node_id, "processing changed node");
        {
            let mut guard = self.nodes.write().map_err(|_| RegistryError::LockPoisoned)?;
            guard.insert(node.node_id, node.clone());
        }
        let notifier = {
            let changed = self
                .changed
                .lock()
                .map_err(|_| RegistryError::LockPoisoned)?;
            changed.get(&node.node_id).cloned()
        };
        if let Some(notifier) = notifier {
            notifier.trigger(node);
        }
        Ok(())
    }
}

impl Drop for RegistryWatcher {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
