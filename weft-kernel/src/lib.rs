//! Weft Kernel
//!
//! Replication engine for topic meshes:
//!
//! - **MemStore**: reference in-memory `TopicStore` (committed set, heads,
//!   pending set, missing-link index)
//! - **Replica**: per-topic actor owning the store; publish, ingest, query
//! - **Broadcaster**: background delivery of committed envelopes to peers
//! - **TopicSyncer / repair worker**: fetch-based repair of missing parents

pub mod broadcast;
pub mod replica;
pub mod store;
pub mod sync;

pub use broadcast::{BroadcastOptions, Broadcaster};
pub use replica::{spawn_replica, ReplicaError, ReplicaHandle, ReplicaOptions};
pub use store::MemStore;
pub use sync::{PeerSelection, SyncError, TopicSyncer};
