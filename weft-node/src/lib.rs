//! Weft Node
//!
//! Assembles the replication kernel and the registry watcher into a single
//! messaging node: per-topic replicas created on first use, a public
//! publish/query/subscribe surface, and membership notifications.

pub mod config;
pub mod node;

pub use config::NodeOptions;
pub use node::{Node, NodeError};

// The registry surface is part of the node's public API.
pub use weft_registry::{RegistryError, RegistryOptions, RegistryWatcher, Subscription};
