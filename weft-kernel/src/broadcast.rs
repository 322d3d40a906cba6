//! Outbound broadcast task
//!
//! One background task per topic drains a bounded queue of locally committed
//! envelopes and pushes them to peers. Delivery is best-effort, at-least-once:
//! a peer that misses a broadcast re-learns the envelope through sync once a
//! successor names it as a parent.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use weft_model::{Envelope, Transport};

use crate::sync::backoff_delay;

/// Tuning for the broadcast task.
#[derive(Debug, Clone)]
pub struct BroadcastOptions {
    /// Outbound queue depth; overflow drops the envelope with a warning.
    pub queue_depth: usize,
    /// Delivery attempts per envelope before giving up.
    pub max_retries: u32,
    /// Base delay for retry backoff.
    pub backoff_base: Duration,
    /// Ceiling for retry backoff.
    pub backoff_cap: Duration,
}

impl Default for BroadcastOptions {
    fn default() -> Self {
        Self {
            queue_depth: 64,
            max_retries: 4,
            backoff_base: Duration::from_millis(50),
            backoff_cap: Duration::from_secs(5),
        }
    }
}

/// Handle to a per-topic broadcast task.
pub struct Broadcaster {
    topic: String,
    tx: mpsc::Sender<Envelope>,
}

impl Broadcaster {
    /// Spawn the delivery task. It stops when `token` is cancelled or the
    /// handle is dropped.
    pub fn spawn(
        topic: impl Into<String>,
        transport: Arc<dyn Transport>,
        options: BroadcastOptions,
        token: CancellationToken,
    ) -> Self {
        let topic = topic.into();
        let (tx, rx) = mpsc::channel(options.queue_depth.max(1));

        tokio::spawn(run_delivery(topic.clone(), transport, options, rx, token));

        Self { topic, tx }
    }

    /// Enqueue an envelope for delivery and return immediately.
    pub fn publish(&self, envelope: Envelope) {
        match self.tx.try_send(envelope) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(env)) => {
                warn!(topic = %self.topic, cid = %env.cid(), "broadcast queue full, dropping");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(topic = %self.topic, "broadcast task gone, dropping");
            }
        }
    }
}

async fn run_delivery(
    topic: String,
    transport: Arc<dyn Transport>,
    options: BroadcastOptions,
    mut rx: mpsc::Receiver<Envelope>,
    token: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            _ = token.cancelled() => break,
            next = rx.recv() => match next {
                Some(env) => env,
                None => break,
            },
        };

        let mut attempt = 0u32;
        loop {
            match transport.broadcast(&envelope).await {
                Ok(()) => break,
                Err(e) => {
                    attempt += 1;
                    if attempt > options.max_retries {
                        // Recipients recover via sync when a successor arrives.
                        warn!(
                            topic = %topic,
                            cid = %envelope.cid(),
                            error = %e,
                            "broadcast failed permanently, dropping"
                        );
                        break;
                    }
                    let delay =
                        backoff_delay(attempt, options.backoff_base, options.backoff_cap);
                    debug!(
                        topic = %topic,
                        cid = %envelope.cid(),
                        attempt,
                        error = %e,
                        "broadcast failed, retrying"
                    );
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
    debug!(topic = %topic, "broadcast task stopped");
}
