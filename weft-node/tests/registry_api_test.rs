//! Node-level registry surface.

mod common;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use weft_model::registry::{Node as RegistryNode, RosterError, RosterSource};
use weft_model::{MockClock, SystemClock};
use weft_net_sim::SimNetwork;
use weft_node::{Node, NodeError, RegistryOptions, RegistryWatcher};

struct QueueSource(Mutex<VecDeque<Vec<RegistryNode>>>);

#[async_trait]
impl RosterSource for QueueSource {
    async fn fetch_roster(&self) -> Result<Vec<RegistryNode>, RosterError> {
        let mut queue = self.0.lock().unwrap();
        match queue.len() {
            0 => Err(RosterError::Fetch("exhausted".into())),
            1 => Ok(queue.front().unwrap().clone()),
            _ => Ok(queue.pop_front().unwrap()),
        }
    }
}

fn registry_node(id: u16) -> RegistryNode {
    let key = ed25519_dalek::SigningKey::from_bytes(&[id as u8; 32])
        .verifying_key()
        .to_bytes()
        .to_vec();
    RegistryNode::new(id, key, format!("https://node{id}.example.com"), true)
}

#[tokio::test]
async fn test_node_exposes_roster_and_new_node_stream() {
    let source = Arc::new(QueueSource(Mutex::new(VecDeque::from([
        vec![registry_node(1)],
    ]))));
    let watcher = RegistryWatcher::new(source, RegistryOptions::default());

    let sim = SimNetwork::new();
    let (transport, inbound) = sim.add_node().await;
    let node = Node::new(
        Arc::new(transport),
        Arc::new(MockClock::new(0)),
        Some(watcher.clone()),
        common::test_options(),
    );
    node.start_inbound(inbound);

    let (mut new_rx, _sub) = node.on_new_nodes().unwrap();
    watcher.start().await.unwrap();

    let batch = new_rx.recv().await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].node_id, 1);

    let roster = node.get_nodes().unwrap();
    assert_eq!(roster.len(), 1);
    assert!(roster[0].is_valid_config);

    watcher.shutdown();
    node.close().await;
}

#[tokio::test]
async fn test_registry_surface_disabled_without_watcher() {
    let sim = SimNetwork::new();
    let (transport, inbound) = sim.add_node().await;
    let node = Node::new(
        Arc::new(transport),
        Arc::new(SystemClock),
        None,
        common::test_options(),
    );
    node.start_inbound(inbound);

    assert!(matches!(node.get_nodes(), Err(NodeError::RegistryDisabled)));
    assert!(matches!(
        node.on_new_nodes(),
        Err(NodeError::RegistryDisabled)
    ));
    assert!(matches!(
        node.on_changed_node(1),
        Err(NodeError::RegistryDisabled)
    ));

    node.close().await;
}
