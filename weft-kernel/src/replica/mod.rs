//! Per-topic replica
//!
//! Each topic is owned by a single actor task: every mutation of the topic's
//! store passes through one bounded command channel, which removes intra-topic
//! races without a lock on the hot path. Alongside the actor run two helper
//! tasks sharing its cancellation token: the broadcast task (outbound
//! delivery) and the repair worker (fetching missing parents).

mod actor;
mod handle;
mod repair;

pub use handle::{ReplicaError, ReplicaHandle};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use weft_model::{Clock, TopicStore, Transport};

use crate::broadcast::{BroadcastOptions, Broadcaster};
use crate::sync::{PeerSelection, TopicSyncer};

/// Tuning for a replica and its helper tasks.
#[derive(Debug, Clone)]
pub struct ReplicaOptions {
    /// Command channel depth. Producers (publish, ingest, fetch results)
    /// block when it is full.
    pub inbound_buffer: usize,
    /// Repair queue depth; overflowing batches are dropped with a warning
    /// and re-learned from later envelopes.
    pub repair_queue_depth: usize,
    /// Base delay between failed fetch retries.
    pub sync_backoff_base: Duration,
    /// Ceiling for fetch retry backoff.
    pub sync_backoff_cap: Duration,
    pub peer_selection: PeerSelection,
    pub broadcast: BroadcastOptions,
}

impl Default for ReplicaOptions {
    fn default() -> Self {
        Self {
            inbound_buffer: 64,
            repair_queue_depth: 256,
            sync_backoff_base: Duration::from_millis(50),
            sync_backoff_cap: Duration::from_secs(5),
            peer_selection: PeerSelection::Random,
            broadcast: BroadcastOptions::default(),
        }
    }
}

/// Spawn the actor, broadcast task, and repair worker for one topic.
///
/// Returns the handle plus the actor's join handle so the caller can observe
/// a panic and mark the topic faulted. All tasks stop when `parent_token`
/// (or the returned handle's own token) is cancelled.
pub fn spawn_replica<S: TopicStore>(
    store: S,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    options: ReplicaOptions,
    parent_token: &CancellationToken,
) -> (ReplicaHandle, JoinHandle<()>) {
    let topic = store.topic().to_string();
    let token = parent_token.child_token();

    let (cmd_tx, cmd_rx) = mpsc::channel(options.inbound_buffer.max(1));
    let (repair_tx, repair_rx) = mpsc::channel(options.repair_queue_depth.max(1));

    let broadcaster = Broadcaster::spawn(
        topic.clone(),
        transport.clone(),
        options.broadcast.clone(),
        token.clone(),
    );

    let syncer = TopicSyncer::new(topic.clone(), transport, options.peer_selection);
    tokio::spawn(repair::run_repair(
        syncer,
        cmd_tx.clone(),
        repair_rx,
        repair::RepairOptions {
            backoff_base: options.sync_backoff_base,
            backoff_cap: options.sync_backoff_cap,
        },
        token.clone(),
    ));

    let actor = actor::Replica::new(topic.clone(), store, clock, broadcaster, repair_tx, cmd_rx);
    let join = tokio::spawn(actor.run(token.clone()));

    (ReplicaHandle::new(topic, cmd_tx, token), join)
}
