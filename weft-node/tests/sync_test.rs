//! Multi-node replication scenarios over the in-memory network.

mod common;

use common::TestNet;
use weft_model::{Envelope, QueryFilter};

const T0: &str = "t0";

#[tokio::test]
async fn test_two_node_sync() {
    let net = TestNet::new(2).await;

    net.publish(0, T0, "hi").await;
    net.assert_converged(T0, 1, &[]).await;

    net.publish(1, T0, "hi back").await;
    net.assert_converged(T0, 2, &[]).await;

    // Query order is (timestamp, payload), identical everywhere.
    let a = net.nodes[0].node.query(T0, QueryFilter::all()).await.unwrap();
    let b = net.nodes[1].node.query(T0, QueryFilter::all()).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a[0].payload(), b"hi");
    assert_eq!(a[1].payload(), b"hi back");

    net.close().await;
}

#[tokio::test]
async fn test_suspend_and_heal() {
    let net = TestNet::new(3).await;
    let cut = net.nodes[1].peer;

    // Warm up every replica so all three hold the topic.
    net.publish(0, T0, "hello").await;
    net.assert_converged(T0, 1, &[]).await;

    // Node 1 stops hearing broadcasts on t0.
    net.network.suspend(cut, T0).await;
    net.publish(2, T0, "p1").await;
    net.publish(2, T0, "p2").await;
    net.publish(0, T0, "p3").await;

    // The others settle; node 1 is unaware until a new broadcast arrives.
    net.assert_converged(T0, 4, &[1]).await;
    let behind = net.nodes[1].node.query(T0, QueryFilter::all()).await.unwrap();
    assert!(behind.len() < 4, "node 1 should have missed the cut traffic");

    // One later publish names the lost envelopes as ancestors; node 1 pulls
    // the whole missing subgraph through sync.
    net.network.resume(cut, T0).await;
    net.publish(0, T0, "p4").await;
    net.assert_converged(T0, 5, &[]).await;

    net.close().await;
}

#[tokio::test]
async fn test_idempotent_republish() {
    let net = TestNet::new(1).await;

    // Replica exists before we subscribe so the stream sees the commit.
    net.nodes[0].node.heads(T0).await.unwrap();
    let mut stream = net.nodes[0].node.subscribe(T0).await.unwrap();

    let env = Envelope::new(T0, vec![], 42, b"dup".to_vec()).unwrap();
    net.nodes[0].node.ingest(env.clone()).await.unwrap();
    net.nodes[0].node.ingest(env.clone()).await.unwrap();

    let committed = net.nodes[0].node.query(T0, QueryFilter::all()).await.unwrap();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].cid(), env.cid());

    // Exactly one emission for the pair of ingests.
    assert_eq!(stream.recv().await.unwrap().cid(), env.cid());
    assert!(stream.try_recv().is_err());

    net.close().await;
}

#[tokio::test]
async fn test_topics_replicate_independently() {
    let net = TestNet::new(2).await;

    net.publish(0, "alpha", "a1").await;
    net.publish(1, "beta", "b1").await;
    net.publish(0, "beta", "b2").await;

    net.assert_converged("alpha", 1, &[]).await;
    net.assert_converged("beta", 2, &[]).await;

    net.close().await;
}

#[tokio::test]
async fn test_many_publishers_converge() {
    let net = TestNet::new(3).await;

    for round in 0..5 {
        for idx in 0..net.nodes.len() {
            net.publish(idx, T0, &format!("n{idx}-r{round}")).await;
        }
    }

    net.assert_converged(T0, 15, &[]).await;
    net.close().await;
}

#[tokio::test]
async fn test_equal_timestamps_sort_by_payload() {
    let net = TestNet::new(2).await;

    // Frozen clock: both publishes share one timestamp.
    net.clock.set(5_000);
    net.nodes[0].node.publish(T0, b"zebra".to_vec()).await.unwrap();
    net.nodes[1].node.publish(T0, b"aardvark".to_vec()).await.unwrap();

    net.assert_converged(T0, 2, &[]).await;

    let view = net.nodes[0].node.query(T0, QueryFilter::all()).await.unwrap();
    assert_eq!(view[0].payload(), b"aardvark");
    assert_eq!(view[1].payload(), b"zebra");

    net.close().await;
}

#[tokio::test]
async fn test_subscriber_sees_commits_in_order() {
    let net = TestNet::new(2).await;

    net.publish(0, T0, "first").await;
    net.assert_converged(T0, 1, &[]).await;

    let mut stream = net.nodes[1].node.subscribe(T0).await.unwrap();
    net.publish(0, T0, "second").await;
    net.publish(0, T0, "third").await;
    net.assert_converged(T0, 3, &[]).await;

    assert_eq!(stream.recv().await.unwrap().payload(), b"second");
    assert_eq!(stream.recv().await.unwrap().payload(), b"third");

    net.close().await;
}

#[tokio::test]
async fn test_empty_topic_is_rejected() {
    let net = TestNet::new(1).await;
    assert!(net.nodes[0].node.publish("", b"x".to_vec()).await.is_err());
    assert!(net.nodes[0]
        .node
        .query("", QueryFilter::all())
        .await
        .is_err());
    net.close().await;
}

#[tokio::test]
async fn test_subscribe_stream_yields_commits() {
    use futures_util::StreamExt;

    let net = TestNet::new(2).await;
    net.publish(0, T0, "first").await;
    net.assert_converged(T0, 1, &[]).await;

    let mut stream = net.nodes[1].node.subscribe_stream(T0).await.unwrap();
    net.publish(0, T0, "second").await;
    net.assert_converged(T0, 2, &[]).await;

    assert_eq!(stream.next().await.unwrap().payload(), b"second");

    net.close().await;
}

#[tokio::test]
async fn test_publish_after_close_is_unavailable() {
    let net = TestNet::new(1).await;
    net.publish(0, T0, "before").await;
    net.nodes[0].node.close().await;

    let err = net.nodes[0].node.publish(T0, b"after".to_vec()).await;
    assert!(err.is_err());
}
