// Each integration test binary includes this module via `mod common;` and
// not all of them use every helper.
#![allow(dead_code)]
//! Multi-node test harness over the in-memory network.

use std::sync::Arc;
use std::time::Duration;

use weft_model::{Cid, MockClock, QueryFilter};
use weft_net_sim::SimNetwork;
use weft_node::{Node, NodeOptions};

pub fn test_options() -> NodeOptions {
    NodeOptions {
        // Keep repair retries snappy in tests.
        sync_backoff_base: Duration::from_millis(5),
        sync_backoff_cap: Duration::from_millis(100),
        ..NodeOptions::default()
    }
}

pub struct TestNode {
    pub node: Arc<Node>,
    pub peer: weft_model::PeerId,
}

/// A cluster of nodes joined through one `SimNetwork`, sharing a mock clock
/// so timestamps (and therefore query order) are deterministic.
pub struct TestNet {
    pub network: SimNetwork,
    pub clock: Arc<MockClock>,
    pub nodes: Vec<TestNode>,
}

impl TestNet {
    pub async fn new(count: usize) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();

        let network = SimNetwork::new();
        let clock = Arc::new(MockClock::new(1_000));
        let mut nodes = Vec::with_capacity(count);

        for _ in 0..count {
            let (transport, inbound) = network.add_node().await;
            let peer = transport.peer_id();
            let node = Node::new(Arc::new(transport), clock.clone(), None, test_options());
            node.start_inbound(inbound);
            network.register_provider(peer, node.clone()).await;
            nodes.push(TestNode { node, peer });
        }

        Self {
            network,
            clock,
            nodes,
        }
    }

    /// Publish with a strictly advancing timestamp.
    pub async fn publish(&self, idx: usize, topic: &str, payload: &str) -> Cid {
        self.clock.advance(1);
        self.nodes[idx]
            .node
            .publish(topic, payload.as_bytes().to_vec())
            .await
            .expect("publish")
    }

    /// Wait until every node not in `skip` holds the same `expected`-element
    /// query result for `topic`.
    pub async fn assert_converged(&self, topic: &str, expected: usize, skip: &[usize]) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let mut views = Vec::new();
            for (i, n) in self.nodes.iter().enumerate() {
                if skip.contains(&i) {
                    continue;
                }
                views.push(n.node.query(topic, QueryFilter::all()).await.expect("query"));
            }
            let settled = views.iter().all(|v| v.len() == expected)
                && views.windows(2).all(|w| w[0] == w[1]);
            if settled {
                return;
            }
            if tokio::time::Instant::now() > deadline {
                let sizes: Vec<usize> = views.iter().map(|v| v.len()).collect();
                panic!("nodes did not converge on {topic:?}: sizes {sizes:?}, want {expected}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn close(&self) {
        for n in &self.nodes {
            n.node.close().await;
        }
    }
}
