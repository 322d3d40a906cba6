//! Topic store abstraction
//!
//! One store per topic. The replica actor is the single owner of a store;
//! implementations do not need interior synchronization on the mutating path.
//! The reference implementation is in-memory; a durable backend plugs in
//! behind this trait and must preserve the committed set and the head set
//! (the pending set can be reconstructed from unlinked tips).

use crate::envelope::{Envelope, EnvelopeError};
use crate::types::Cid;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors from store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No envelope with this cid, committed or pending.
    #[error("envelope not found: {0}")]
    NotFound(Cid),

    /// The envelope failed local sanity checks. Never retried.
    #[error("invalid envelope: {0}")]
    Invalid(#[from] EnvelopeError),

    /// The store has been shut down or its backend is gone.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result of inserting an envelope.
///
/// Insertion is idempotent: re-inserting a known envelope is a no-op that
/// returns the prior result and emits nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// All parents were present; the envelope is committed (possibly
    /// cascading commits of formerly-pending envelopes).
    Committed,
    /// Some parents are missing; recorded as pending with this missing set.
    Pending(Vec<Cid>),
}

/// Selection over committed envelopes. Bounds are inclusive, in nanoseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    pub start_ns: Option<u64>,
    pub end_ns: Option<u64>,
    pub limit: Option<usize>,
}

impl QueryFilter {
    /// Everything, unbounded.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn matches(&self, timestamp_ns: u64) -> bool {
        if let Some(start) = self.start_ns {
            if timestamp_ns < start {
                return false;
            }
        }
        if let Some(end) = self.end_ns {
            if timestamp_ns > end {
                return false;
            }
        }
        true
    }
}

/// Per-topic event store: committed set, head set, pending set, and the
/// missing-link index that drives sync repair.
pub trait TopicStore: Send + 'static {
    /// The topic this store holds.
    fn topic(&self) -> &str;

    /// Insert an envelope, committing it if its parents are all present or
    /// recording it as pending otherwise. Serialized by the owning replica.
    fn insert(&mut self, envelope: Envelope) -> Result<InsertOutcome, StoreError>;

    /// Look up by cid. Pending envelopes are retrievable here so peers can
    /// fetch them during sync; queries exclude them.
    fn get(&self, cid: &Cid) -> Result<Envelope, StoreError>;

    /// Snapshot of the current head set.
    fn heads(&self) -> Vec<Cid>;

    /// Committed envelopes matching the filter, ordered by
    /// `(timestamp_ns ascending, payload bytes ascending)`: a total order
    /// derived from content, identical on every replica holding the same set.
    fn query(&self, filter: &QueryFilter) -> Vec<Envelope>;

    /// Number of envelopes currently pending on missing parents.
    fn pending_count(&self) -> usize;

    /// Subscribe to newly committed envelopes, in commit order.
    fn on_commit(&self) -> broadcast::Receiver<Envelope>;
}
