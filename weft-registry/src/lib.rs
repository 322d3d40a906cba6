//! Weft Registry
//!
//! Tracks the cluster membership roster against an authoritative external
//! source and fans out add/change notifications to internal subscribers.
//!
//! - **Notifier**: generic one-to-many fan-out; deliberately lossy so a
//!   stalled subscriber can never wedge the producer
//! - **RegistryWatcher**: polling loop that diffs roster snapshots and
//!   publishes new/changed node events

pub mod notifier;
pub mod watcher;

pub use notifier::{Notifier, Subscription};
pub use watcher::{RegistryError, RegistryOptions, RegistryWatcher};
