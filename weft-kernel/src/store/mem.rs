//! In-memory topic store
//!
//! Reference `TopicStore`: everything lives in hash maps, nothing survives a
//! restart. The replica actor is the sole owner, so the mutating path needs
//! no lock.

use std::collections::{HashMap, HashSet, VecDeque};

use tokio::sync::broadcast;
use tracing::{debug, warn};
use weft_model::{Cid, Envelope, InsertOutcome, QueryFilter, StoreError, TopicStore};

/// A received envelope whose parent closure is not yet complete.
struct PendingEnvelope {
    envelope: Envelope,
    missing: HashSet<Cid>,
}

/// In-memory per-topic store.
pub struct MemStore {
    topic: String,
    committed: HashMap<Cid, Envelope>,
    heads: HashSet<Cid>,
    pending: HashMap<Cid, PendingEnvelope>,
    /// Pending cids in arrival order; drives oldest-first eviction.
    pending_order: VecDeque<Cid>,
    /// missing parent cid -> pending cids waiting on it.
    missing_index: HashMap<Cid, HashSet<Cid>>,
    max_pending: usize,
    commit_tx: broadcast::Sender<Envelope>,
}

impl MemStore {
    /// Open a store for `topic`.
    ///
    /// `max_pending` caps the pending set (oldest evicted on overflow, to be
    /// re-learned via sync); `commit_buffer` sizes the commit broadcast
    /// channel shared by all subscribers.
    pub fn new(topic: impl Into<String>, max_pending: usize, commit_buffer: usize) -> Self {
        let (commit_tx, _) = broadcast::channel(commit_buffer.max(1));
        Self {
            topic: topic.into(),
            committed: HashMap::new(),
            heads: HashSet::new(),
            pending: HashMap::new(),
            pending_order: VecDeque::new(),
            missing_index: HashMap::new(),
            max_pending: max_pending.max(1),
            commit_tx,
        }
    }

    pub fn committed_count(&self) -> usize {
        self.committed.len()
    }

    /// Commit `envelope` and everything it unblocks. Iterative so a long
    /// dependency chain cannot blow the stack.
    fn commit_cascade(&mut self, envelope: Envelope) {
        let mut queue = VecDeque::new();
        queue.push_back(envelope);

        while let Some(env) = queue.pop_front() {
            let cid = env.cid();

            self.heads.insert(cid);
            for parent in env.parents() {
                self.heads.remove(parent);
            }
            self.committed.insert(cid, env.clone());
            debug!(topic = %self.topic, cid = %cid, "committed");

            // Subscribers that lag are dropped by the channel, not by us.
            let _ = self.commit_tx.send(env);

            // Wake everything that was waiting on this cid.
            let Some(waiters) = self.missing_index.remove(&cid) else {
                continue;
            };
            for waiter in waiters {
                let Some(entry) = self.pending.get_mut(&waiter) else {
                    continue;
                };
                entry.missing.remove(&cid);
                if !entry.missing.is_empty() {
                    continue;
                }
                if let Some(ready) = self.pending.remove(&waiter) {
                    self.pending_order.retain(|c| *c != waiter);
                    queue.push_back(ready.envelope);
                }
            }
        }
    }

    fn record_pending(&mut self, envelope: Envelope, missing: HashSet<Cid>) {
        if self.pending.len() >= self.max_pending {
            self.evict_oldest_pending();
        }

        let cid = envelope.cid();
        for m in &missing {
            self.missing_index.entry(*m).or_default().insert(cid);
        }
        self.pending_order.push_back(cid);
        self.pending.insert(cid, PendingEnvelope { envelope, missing });
    }

    /// Drop the oldest pending envelope. It stays a sync candidate: the next
    /// committed successor naming it as a parent re-triggers a fetch.
    fn evict_oldest_pending(&mut self) {
        while let Some(oldest) = self.pending_order.pop_front() {
            let Some(entry) = self.pending.remove(&oldest) else {
                continue;
            };
            for m in &entry.missing {
                if let Some(waiters) = self.missing_index.get_mut(m) {
                    waiters.remove(&oldest);
                    if waiters.is_empty() {
                        self.missing_index.remove(m);
                    }
                }
            }
            warn!(topic = %self.topic, cid = %oldest, "pending set full, evicted oldest");
            return;
        }
    }
}

impl TopicStore for MemStore {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn insert(&mut self, envelope: Envelope) -> Result<InsertOutcome, StoreError> {
        envelope.validate(Some(&self.topic))?;
        let cid = envelope.cid();

        // Idempotent: a known envelope is a no-op returning the prior result.
        if self.committed.contains_key(&cid) {
            return Ok(InsertOutcome::Committed);
        }
        if let Some(entry) = self.pending.get(&cid) {
            let mut missing: Vec<Cid> = entry.missing.iter().copied().collect();
            missing.sort_unstable();
            return Ok(InsertOutcome::Pending(missing));
        }

        let missing: HashSet<Cid> = envelope
            .parents()
            .iter()
            .filter(|p| !self.committed.contains_key(*p))
            .copied()
            .collect();

        if missing.is_empty() {
            self.commit_cascade(envelope);
            Ok(InsertOutcome::Committed)
        } else {
            let mut missing_list: Vec<Cid> = missing.iter().copied().collect();
            missing_list.sort_unstable();
            debug!(
                topic = %self.topic,
                cid = %cid,
                missing = missing_list.len(),
                "buffered pending envelope"
            );
            self.record_pending(envelope, missing);
            Ok(InsertOutcome::Pending(missing_list))
        }
    }

    fn get(&self, cid: &Cid) -> Result<Envelope, StoreError> {
        if let Some(env) = self.committed.get(cid) {
            return Ok(env.clone());
        }
        if let Some(entry) = self.pending.get(cid) {
            return Ok(entry.envelope.clone());
        }
        Err(StoreError::NotFound(*cid))
    }

    fn heads(&self) -> Vec<Cid> {
        let mut heads: Vec<Cid> = self.heads.iter().copied().collect();
        heads.sort_unstable();
        heads
    }

    fn query(&self, filter: &QueryFilter) -> Vec<Envelope> {
        let mut results: Vec<Envelope> = self
            .committed
            .values()
            .filter(|e| filter.matches(e.timestamp_ns()))
            .cloned()
            .collect();
        results.sort_by(|a, b| {
            a.timestamp_ns()
                .cmp(&b.timestamp_ns())
                .then_with(|| a.payload().cmp(b.payload()))
        });
        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }
        results
    }

    fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn on_commit(&self) -> broadcast::Receiver<Envelope> {
        self.commit_tx.subscribe()
    }
}
