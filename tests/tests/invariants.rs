//! Integration-level restatements of core properties already covered by
//! unit tests deeper in each crate, plus the boundary behaviors that only
//! show up once a few peers are wired together.

use std::time::Duration;

use warden_connection::handshake::HandshakeInfo;
use warden_connection::manager::{ConnectionManager, ConnectionState};
use warden_dht::engine::EngineError;
use warden_dht::lookup::OperationError;
use warden_dht::node_id::NodeId;
use warden_dht::routing::{KBucket, NodeType, PeerRecord};
use warden_dht::storage::Storage;
use wardenmesh_tests::{addr, NetworkHub};

mod support;
use support::PairedTransport;

#[test]
fn test_node_id_hex_round_trips() {
    let id = NodeId::random();
    let hex = id.to_hex();
    assert_eq!(NodeId::from_hex(&hex).unwrap(), id);
}

#[test]
fn test_distance_is_symmetric_and_zero_for_self() {
    let a = NodeId::random();
    let b = NodeId::random();
    assert_eq!(a.distance(&b), b.distance(&a));
    assert_eq!(a.distance(&a).as_bytes(), &[0u8; 20]);
}

#[tokio::test]
async fn test_storing_the_same_key_twice_is_idempotent() {
    let hub = NetworkHub::new();
    let node_id = NodeId::random();
    let engine = hub.spawn_node(node_id, addr(9400), warden_dht::config::Config::new("secret"));

    let key = *NodeId::random().as_bytes();
    engine.store(key, b"first".to_vec(), Duration::from_secs(60)).await.unwrap();
    engine.store(key, b"first".to_vec(), Duration::from_secs(60)).await.unwrap();

    let outcome = engine.find_value(key).await.unwrap();
    match outcome {
        warden_dht::engine::FindValueOutcome::Value(v) => assert_eq!(v, b"first".to_vec()),
        warden_dht::engine::FindValueOutcome::Peers(_) => panic!("expected the locally stored value"),
    }
}

#[tokio::test]
async fn test_connect_while_ready_is_a_no_op() {
    let (transport_a, transport_b) = PairedTransport::pair();
    let (tx_a, _rx_a) = tokio::sync::mpsc::channel(8);
    let (tx_b, _rx_b) = tokio::sync::mpsc::channel(8);

    let a = ConnectionManager::new(HandshakeInfo::new(1, "build-1", NodeId::random()), transport_a, tx_a);
    let b = ConnectionManager::new(HandshakeInfo::new(1, "build-1", NodeId::random()), transport_b, tx_b);

    let (r_a, r_b) = tokio::join!(a.connect(true), b.connect(false));
    r_a.unwrap();
    r_b.unwrap();
    assert_eq!(a.state().await, ConnectionState::Ready);

    let remote_before = a.remote_id().await;
    a.connect(true).await.unwrap();
    assert_eq!(a.state().await, ConnectionState::Ready);
    assert_eq!(a.remote_id().await, remote_before);
}

#[test]
fn test_full_bucket_of_live_peers_parks_newcomer_in_replacement_cache() {
    let mut bucket = KBucket::new(2);
    bucket.insert(PeerRecord::new(NodeId::random(), addr(1), NodeType::Server));
    bucket.insert(PeerRecord::new(NodeId::random(), addr(2), NodeType::Server));
    assert_eq!(bucket.len(), 2);

    let newcomer = NodeId::random();
    bucket.insert(PeerRecord::new(newcomer, addr(3), NodeType::Server));

    // The bucket is still full of the original two live peers; the
    // newcomer was parked rather than evicting either of them.
    assert_eq!(bucket.len(), 2);
    assert!(bucket.get(&newcomer).is_none());
}

#[tokio::test]
async fn test_find_node_on_a_single_node_network_errors_rather_than_returning_empty() {
    let hub = NetworkHub::new();
    let node_id = NodeId::random();
    let engine = hub.spawn_node(node_id, addr(9401), warden_dht::config::Config::new("secret"));

    // With no seed peers at all, there is nothing to fan the lookup out
    // to; callers that want an effective empty result (e.g. `store`) use
    // `.unwrap_or_default()` over this.
    let result = engine.find_node(NodeId::random()).await;
    assert!(matches!(result, Err(EngineError::Operation(OperationError::NoPeersAvailable))));
}

#[tokio::test]
async fn test_ttl_zero_value_is_never_retrievable() {
    let mut storage = Storage::new();
    let key = *NodeId::random().as_bytes();
    storage.put(key, b"gone".to_vec(), Duration::ZERO, NodeId::random());
    assert!(storage.get(&key).is_none());
}
