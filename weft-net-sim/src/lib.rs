//! In-memory network simulation for Weft
//!
//! Provides `SimNetwork`, a shared broker connecting `SimTransport` instances
//! over tokio channels. Enables multi-node replication tests without real
//! networking, including per-`(node, topic)` broadcast suspension to exercise
//! the sync-repair path.

mod network;

pub use network::{SimNetwork, SimTransport};
