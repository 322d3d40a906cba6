//! Replica behavior against the in-memory transport: publish linking,
//! ingest buffering, and fetch-based repair of missing ancestors.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use weft_kernel::{spawn_replica, MemStore, ReplicaHandle, ReplicaOptions};
use weft_model::{Envelope, InsertOutcome, MockClock, QueryFilter};
use weft_net_sim::SimNetwork;

const T0: &str = "t0";

fn test_options() -> ReplicaOptions {
    ReplicaOptions {
        sync_backoff_base: Duration::from_millis(5),
        sync_backoff_cap: Duration::from_millis(100),
        ..ReplicaOptions::default()
    }
}

struct Peer {
    handle: ReplicaHandle,
    token: CancellationToken,
}

impl Peer {
    async fn close(&self) {
        self.handle.close().await;
        self.token.cancel();
    }
}

/// Spin up one replica attached to the network, registered as a fetch
/// provider so other replicas can sync from it.
async fn add_replica(network: &SimNetwork, clock: &Arc<MockClock>) -> Peer {
    let (transport, _inbound) = network.add_node().await;
    let peer_id = transport.peer_id();
    let token = CancellationToken::new();
    let store = MemStore::new(T0, 1024, 256);
    let (handle, _join) = spawn_replica(
        store,
        Arc::new(transport),
        clock.clone(),
        test_options(),
        &token,
    );
    network
        .register_provider(peer_id, Arc::new(handle.clone()))
        .await;
    Peer { handle, token }
}

async fn wait_for_count(handle: &ReplicaHandle, want: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let got = handle.query(QueryFilter::all()).await.unwrap().len();
        if got == want {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("replica stuck at {got} envelopes, want {want}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_publish_links_to_current_heads() {
    let network = SimNetwork::new();
    let clock = Arc::new(MockClock::new(100));
    let peer = add_replica(&network, &clock).await;

    let first = peer.handle.publish(b"one".to_vec()).await.unwrap();
    assert_eq!(peer.handle.heads().await.unwrap(), vec![first]);

    clock.advance(1);
    let second = peer.handle.publish(b"two".to_vec()).await.unwrap();
    assert_eq!(peer.handle.heads().await.unwrap(), vec![second]);

    let env = peer.handle.get(second).await.unwrap();
    assert_eq!(env.parents(), &[first]);

    peer.close().await;
}

#[tokio::test]
async fn test_ingest_of_orphan_repairs_from_peer() {
    let network = SimNetwork::new();
    let clock = Arc::new(MockClock::new(100));
    let source = add_replica(&network, &clock).await;
    let target = add_replica(&network, &clock).await;

    // A chain of three on the source replica.
    let mut tip = None;
    for payload in [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()] {
        clock.advance(1);
        tip = Some(source.handle.publish(payload).await.unwrap());
    }
    let tip_env = source.handle.get(tip.unwrap()).await.unwrap();

    // Hand only the tip to the target; ancestors must come through sync.
    let outcome = target.handle.ingest(tip_env).await.unwrap();
    assert!(matches!(outcome, InsertOutcome::Pending(_)));

    wait_for_count(&target.handle, 3).await;
    assert_eq!(
        target.handle.heads().await.unwrap(),
        source.handle.heads().await.unwrap()
    );
    assert_eq!(target.handle.pending_count().await.unwrap(), 0);

    source.close().await;
    target.close().await;
}

#[tokio::test]
async fn test_repeated_missing_parent_coalesces_to_one_fetch_chain() {
    let network = SimNetwork::new();
    let clock = Arc::new(MockClock::new(100));
    let source = add_replica(&network, &clock).await;
    let target = add_replica(&network, &clock).await;

    let root = source.handle.publish(b"root".to_vec()).await.unwrap();
    let root_env = source.handle.get(root).await.unwrap();

    // Two siblings naming the same missing parent.
    let left = Envelope::new(T0, vec![root], 200, b"left".to_vec()).unwrap();
    let right = Envelope::new(T0, vec![root], 200, b"right".to_vec()).unwrap();

    assert!(matches!(
        target.handle.ingest(left).await.unwrap(),
        InsertOutcome::Pending(_)
    ));
    assert!(matches!(
        target.handle.ingest(right).await.unwrap(),
        InsertOutcome::Pending(_)
    ));

    // One resolved fetch commits the parent and cascades both siblings.
    wait_for_count(&target.handle, 3).await;
    let committed = target.handle.query(QueryFilter::all()).await.unwrap();
    assert!(committed.iter().any(|e| e.cid() == root_env.cid()));

    source.close().await;
    target.close().await;
}

#[tokio::test]
async fn test_fetch_retries_until_peer_can_serve() {
    let network = SimNetwork::new();
    let clock = Arc::new(MockClock::new(100));
    let source = add_replica(&network, &clock).await;
    let target = add_replica(&network, &clock).await;

    // The child names a parent the source does not hold yet: fetches fail
    // and back off.
    let parent = Envelope::new(T0, vec![], 150, b"late parent".to_vec()).unwrap();
    let child = Envelope::new(T0, vec![parent.cid()], 200, b"child".to_vec()).unwrap();

    target.handle.ingest(child).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(target.handle.pending_count().await.unwrap(), 1);

    // Once the parent lands on the source, the retry loop resolves it.
    source.handle.ingest(parent).await.unwrap();
    wait_for_count(&target.handle, 2).await;

    source.close().await;
    target.close().await;
}

/// Store wrapper that panics on a marker payload, standing in for a buggy
/// backend.
struct FaultyStore(MemStore);

impl weft_model::TopicStore for FaultyStore {
    fn topic(&self) -> &str {
        self.0.topic()
    }
    fn insert(
        &mut self,
        envelope: Envelope,
    ) -> Result<weft_model::InsertOutcome, weft_model::StoreError> {
        if envelope.payload() == b"boom" {
            panic!("backend corrupted");
        }
        self.0.insert(envelope)
    }
    fn get(&self, cid: &weft_model::Cid) -> Result<Envelope, weft_model::StoreError> {
        self.0.get(cid)
    }
    fn heads(&self) -> Vec<weft_model::Cid> {
        self.0.heads()
    }
    fn query(&self, filter: &QueryFilter) -> Vec<Envelope> {
        self.0.query(filter)
    }
    fn pending_count(&self) -> usize {
        self.0.pending_count()
    }
    fn on_commit(&self) -> tokio::sync::broadcast::Receiver<Envelope> {
        self.0.on_commit()
    }
}

#[tokio::test]
async fn test_actor_panic_is_contained_to_its_topic() {
    let network = SimNetwork::new();
    let clock = Arc::new(MockClock::new(100));

    let healthy = add_replica(&network, &clock).await;

    let (transport, _inbound) = network.add_node().await;
    let token = CancellationToken::new();
    let store = FaultyStore(MemStore::new(T0, 1024, 256));
    let (faulty, join) = spawn_replica(
        store,
        Arc::new(transport),
        clock.clone(),
        test_options(),
        &token,
    );

    faulty.publish(b"fine".to_vec()).await.unwrap();
    assert!(faulty.publish(b"boom".to_vec()).await.is_err());

    let err = join.await.unwrap_err();
    assert!(err.is_panic());
    assert!(faulty.publish(b"after".to_vec()).await.is_err());

    // Other replicas keep working.
    healthy.handle.publish(b"still alive".to_vec()).await.unwrap();

    healthy.close().await;
    token.cancel();
}

#[tokio::test]
async fn test_handle_reports_unavailable_after_close() {
    let network = SimNetwork::new();
    let clock = Arc::new(MockClock::new(100));
    let peer = add_replica(&network, &clock).await;

    peer.handle.publish(b"x".to_vec()).await.unwrap();
    peer.close().await;

    assert!(peer.handle.publish(b"y".to_vec()).await.is_err());
    assert!(peer.handle.heads().await.is_err());
}
