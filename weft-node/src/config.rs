//! Node configuration.

use std::time::Duration;

use weft_kernel::{BroadcastOptions, PeerSelection, ReplicaOptions};

/// Per-node tuning applied to every topic replica.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// Depth of each replica's command channel; publish, ingest, and fetch
    /// results block when it is full.
    pub inbound_buffer: usize,
    /// Cap on each topic's pending set; oldest evicted on overflow.
    pub max_pending: usize,
    /// Commit stream buffer shared by a topic's subscribers.
    pub commit_buffer: usize,
    /// Delivery attempts per envelope before the broadcaster drops it.
    pub broadcast_max_retries: u32,
    pub peer_selection: PeerSelection,
    /// Base delay for failed-fetch retries in the repair worker.
    pub sync_backoff_base: Duration,
    /// Ceiling for repair retry backoff.
    pub sync_backoff_cap: Duration,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            inbound_buffer: 64,
            max_pending: 1024,
            commit_buffer: 256,
            broadcast_max_retries: 4,
            peer_selection: PeerSelection::Random,
            sync_backoff_base: Duration::from_millis(50),
            sync_backoff_cap: Duration::from_secs(5),
        }
    }
}

impl NodeOptions {
    pub(crate) fn replica_options(&self) -> ReplicaOptions {
        ReplicaOptions {
            inbound_buffer: self.inbound_buffer,
            sync_backoff_base: self.sync_backoff_base,
            sync_backoff_cap: self.sync_backoff_cap,
            peer_selection: self.peer_selection,
            broadcast: BroadcastOptions {
                max_retries: self.broadcast_max_retries,
                ..BroadcastOptions::default()
            },
            ..ReplicaOptions::default()
        }
    }
}
