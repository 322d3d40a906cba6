//! Repair worker — drains the missing-parent queue and feeds fetch results
//! back through the replica's ingest path.
//!
//! The queue is coalescing: a cid requested many times has exactly one
//! outstanding fetch. Failed fetches re-enter with exponential backoff and
//! retry until resolved or the topic closes.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use weft_model::Cid;

use super::actor::ReplicaCmd;
use crate::sync::{backoff_delay, TopicSyncer};

pub(crate) struct RepairOptions {
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

struct RetryState {
    attempt: u32,
    due: Instant,
}

pub(crate) async fn run_repair(
    syncer: TopicSyncer,
    cmd_tx: mpsc::Sender<ReplicaCmd>,
    mut rx: mpsc::Receiver<Vec<Cid>>,
    options: RepairOptions,
    token: CancellationToken,
) {
    let mut wanted: HashMap<Cid, RetryState> = HashMap::new();

    loop {
        let next_due = wanted.values().map(|s| s.due).min();

        tokio::select! {
            _ = token.cancelled() => break,
            batch = rx.recv() => {
                let Some(cids) = batch else { break };
                let now = Instant::now();
                for cid in cids {
                    // Coalesce: keep the existing retry state if present.
                    wanted.entry(cid).or_insert(RetryState { attempt: 0, due: now });
                }
            }
            _ = sleep_until_due(next_due), if next_due.is_some() => {
                let now = Instant::now();
                let due: Vec<Cid> = wanted
                    .iter()
                    .filter(|(_, s)| s.due <= now)
                    .map(|(c, _)| *c)
                    .collect();
                if due.is_empty() {
                    continue;
                }

                match syncer.fetch(&due).await {
                    Ok(envelopes) => {
                        debug!(
                            topic = %syncer.topic(),
                            count = envelopes.len(),
                            "fetched missing envelopes"
                        );
                        for envelope in envelopes {
                            let cid = envelope.cid();
                            let (resp, resp_rx) = oneshot::channel();
                            // Bounded send: if the actor is busy this blocks,
                            // which is the backpressure we want.
                            if cmd_tx
                                .send(ReplicaCmd::Ingest { envelope, resp: Some(resp) })
                                .await
                                .is_err()
                            {
                                return;
                            }
                            // Any still-missing grandparents come back to us
                            // through the actor's repair request.
                            let _ = resp_rx.await;
                            wanted.remove(&cid);
                        }
                    }
                    Err(e) => {
                        warn!(
                            topic = %syncer.topic(),
                            count = due.len(),
                            error = %e,
                            "fetch failed, backing off"
                        );
                        for cid in due {
                            if let Some(state) = wanted.get_mut(&cid) {
                                state.attempt += 1;
                                state.due = now
                                    + backoff_delay(
                                        state.attempt,
                                        options.backoff_base,
                                        options.backoff_cap,
                                    );
                            }
                        }
                    }
                }
            }
        }
    }
    debug!(topic = %syncer.topic(), "repair worker stopped");
}

async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(instant) => tokio::time::sleep_until(instant).await,
        // Guarded out by the `if` on the select arm.
        None => std::future::pending().await,
    }
}
