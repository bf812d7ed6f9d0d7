//! End-to-end scenarios (named S1-S6 to match the coordinator design
//! notes this crate grew out of), covering genesis bootstrap, helper-based
//! onboarding, cross-peer store/get, helper exclusion while a tab is
//! hidden, version-mismatch rejection, and stale-fingerprint reconnection.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use warden_connection::handshake::HandshakeInfo;
use warden_connection::manager::{ConnectionEvent, ConnectionManager, ConnectionState, DisconnectReason};
use warden_coordinator::{
    BootstrapServer, BridgeNode, HelperCandidate, HelperDispatch, JoinCredential, RoutingSnapshot,
};
use warden_crypto::signing::{SigningKey, VerifyingKey};
use warden_dht::config::Config;
use warden_dht::engine::FindValueOutcome;
use warden_dht::node_id::NodeId;
use warden_dht::routing::{NodeType, PeerRecord};
use wardenmesh_tests::{addr, NetworkHub};

mod support;
use support::PairedTransport;

#[tokio::test]
async fn test_s1_genesis_bootstrap_admits_first_peer_and_learns_bridges() {
    let config = Config::new("bridge-secret").with_create_new_dht(true).with_open_network(true);
    let mut bootstrap = BootstrapServer::new(config.clone());
    let trusted = HashMap::new();

    let genesis_node = NodeId::random();
    let response = bootstrap
        .get_peers_or_genesis(genesis_node, 1, JoinCredential::None, vec![], &trusted, 0)
        .await
        .unwrap();
    assert!(response.is_genesis);
    assert!(response.peers.is_empty());

    let bridge1 = NodeId::random();
    let bridge2 = NodeId::random();

    let hub = NetworkHub::new();
    let g = hub.spawn_node(genesis_node, addr(9000), config.clone());
    g.learn_peer(PeerRecord::new(bridge1, addr(9001), NodeType::Bridge)).await.unwrap();
    g.learn_peer(PeerRecord::new(bridge2, addr(9002), NodeType::Bridge)).await.unwrap();

    let closest = g.find_node(NodeId::random()).await.unwrap();
    let ids: Vec<NodeId> = closest.into_iter().map(|p| p.id).collect();
    assert!(ids.contains(&bridge1));
    assert!(ids.contains(&bridge2));

    // A second registrant never sees genesis again: the open-network
    // branch now delegates to a bridge backed by the genesis peer's own
    // routing table.
    let signing_key = SigningKey::generate(&mut rand_core::OsRng);
    let finder = DhtFinder { engine: g.clone() };
    let bridge = BridgeNode::new(genesis_node, signing_key, config, finder, AlwaysAck);
    let mut bootstrap = bootstrap.with_bridge(Arc::new(bridge));

    let second = bootstrap
        .get_peers_or_genesis(NodeId::random(), 2, JoinCredential::None, vec![], &trusted, 0)
        .await
        .unwrap();
    assert!(!second.is_genesis);
    assert!(second.membership_token.is_some());
}

struct DhtFinder {
    engine: Arc<warden_dht::engine::DhtEngine<wardenmesh_tests::ChannelSink>>,
}

#[async_trait]
impl RoutingSnapshot for DhtFinder {
    async fn find_node_candidates(
        &self,
        target: NodeId,
        _deadline: Duration,
    ) -> Result<Vec<HelperCandidate>, warden_coordinator::CoordinatorError> {
        let peers = self.engine.find_node(target).await.unwrap_or_default();
        Ok(peers
            .into_iter()
            .map(|p| HelperCandidate {
                id: p.id,
                node_type: p.node_type,
                uptime: Duration::from_secs(3600),
                rtt: Some(Duration::from_millis(20)),
                tab_visible: true,
                connected_to_bridge: true,
            })
            .collect())
    }
}

struct AlwaysAck;

#[async_trait]
impl HelperDispatch for AlwaysAck {
    async fn dispatch(&self, _candidate: &NodeId) -> Result<bool, warden_coordinator::CoordinatorError> {
        Ok(true)
    }
}

#[tokio::test]
async fn test_s2_open_network_join_selects_helper_and_populates_routing_table() {
    let config = Config::new("bridge-secret").with_open_network(true);
    let hub = NetworkHub::new();

    let bridge_id = NodeId::random();
    let bridge_engine = hub.spawn_node(bridge_id, addr(9100), config.clone());

    let mut helpers = Vec::new();
    for i in 0..5 {
        let id = NodeId::random();
        let engine = hub.spawn_node(id, addr(9101 + i), config.clone());
        engine.learn_peer(PeerRecord::new(bridge_id, addr(9100), NodeType::Bridge)).await.unwrap();
        bridge_engine.learn_peer(PeerRecord::new(id, addr(9101 + i), NodeType::Server)).await.unwrap();
        helpers.push((id, engine));
    }
    // Full mesh among the five already-joined peers, as if each had gone
    // through its own onboarding already.
    for i in 0..helpers.len() {
        for j in 0..helpers.len() {
            if i != j {
                helpers[i].1.learn_peer(PeerRecord::new(helpers[j].0, addr(9101 + j as u16), NodeType::Server)).await.ok();
            }
        }
    }

    let signing_key = SigningKey::generate(&mut rand_core::OsRng);
    let finder = DhtFinder { engine: bridge_engine.clone() };
    let bridge = BridgeNode::new(bridge_id, signing_key, config.clone(), finder, AlwaysAck);

    let mut bootstrap = BootstrapServer::new(config.clone()).with_bridge(Arc::new(bridge));
    let trusted = HashMap::new();
    let new_node_id = NodeId::random();
    let join_response = bootstrap
        .get_peers_or_genesis(new_node_id, 1, JoinCredential::None, vec![], &trusted, 1_000)
        .await
        .unwrap();
    let response = join_response.membership_token.expect("bridge-issued membership token");

    let helper_ids: Vec<NodeId> = helpers.iter().map(|(id, _)| *id).collect();
    assert!(helper_ids.contains(&response.authorized_by.expect("helper id")));
    assert!(response.is_open_network);

    // X joins, learns of the bridge, and runs its own find_node, which
    // should surface the rest of the already-joined network.
    let x_engine = hub.spawn_node(new_node_id, addr(9200), config);
    x_engine.learn_peer(PeerRecord::new(bridge_id, addr(9100), NodeType::Bridge)).await.unwrap();
    let discovered = x_engine.find_node(NodeId::random()).await.unwrap();
    for peer in &discovered {
        x_engine.learn_peer(peer.clone()).await.ok();
    }
    let network_size_excluding_x = 1 + helpers.len(); // bridge + 5 helpers
    assert!(x_engine.peer_count().await >= config_k_floor(network_size_excluding_x, 20));
}

fn config_k_floor(network_minus_self: usize, k: usize) -> usize {
    network_minus_self.min(k)
}

#[tokio::test]
async fn test_s3_stored_value_is_retrievable_from_a_different_peer() {
    let config = Config::new("bridge-secret").with_open_network(true);
    let hub = NetworkHub::new();

    let mut peers = Vec::new();
    for i in 0..5 {
        let id = NodeId::random();
        let engine = hub.spawn_node(id, addr(9300 + i), config.clone());
        peers.push((id, engine));
    }
    for i in 0..peers.len() {
        for j in 0..peers.len() {
            if i != j {
                peers[i].1.learn_peer(PeerRecord::new(peers[j].0, addr(9300 + j as u16), NodeType::Server)).await.ok();
            }
        }
    }

    let key = *NodeId::random().as_bytes();
    let value = b"hi".to_vec();

    // `store` walks find_node and replicates to the result set inline, so
    // the value is already present on other peers by the time this call
    // returns - no wait for a republish tick is needed.
    peers[0].1.store(key, value.clone(), Duration::from_secs(60)).await.unwrap();

    let outcome = peers[2].1.find_value(key).await.unwrap();
    assert!(matches!(outcome, FindValueOutcome::Value(ref v) if v == &value));
}

#[test]
fn test_s4_tab_hidden_peer_excluded_until_visible_again() {
    let hidden = HelperCandidate {
        id: NodeId::random(),
        node_type: NodeType::Browser,
        uptime: Duration::from_secs(3600),
        rtt: Some(Duration::from_millis(10)),
        tab_visible: false,
        connected_to_bridge: true,
    };
    let visible = HelperCandidate {
        id: NodeId::random(),
        node_type: NodeType::Browser,
        uptime: Duration::from_secs(3600),
        rtt: Some(Duration::from_millis(10)),
        tab_visible: true,
        connected_to_bridge: true,
    };
    let self_id = NodeId::random();

    let selected = warden_coordinator::select_candidates(vec![hidden.clone(), visible.clone()], &self_id, 3);
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].id, visible.id);

    let hidden_becomes_visible = HelperCandidate { tab_visible: true, ..hidden };
    let selected_again =
        warden_coordinator::select_candidates(vec![hidden_becomes_visible.clone(), visible], &self_id, 3);
    assert!(selected_again.iter().any(|c| c.id == hidden_becomes_visible.id));
}

#[tokio::test]
async fn test_s5_version_mismatch_closes_without_a_peer_table_entry() {
    let (transport_old, transport_new) = PairedTransport::pair();

    let old_local = HandshakeInfo::new(1, "OLD", NodeId::random());
    let new_local = HandshakeInfo::new(1, "NEW", NodeId::random());

    let (tx_old, mut rx_old) = tokio::sync::mpsc::channel(8);
    let (tx_new, _rx_new) = tokio::sync::mpsc::channel(8);

    let client = ConnectionManager::new(old_local, transport_old, tx_old);
    let server = ConnectionManager::new(new_local, transport_new, tx_new);

    let (client_result, server_result) = tokio::join!(client.connect(true), server.connect(false));

    assert!(client_result.is_err());
    assert!(server_result.is_err());
    assert_eq!(client.state().await, ConnectionState::Failed);
    assert_eq!(server.state().await, ConnectionState::Failed);

    // Neither side ever recorded the other's nodeId, so nothing downstream
    // (e.g. `DhtEngine::learn_peer`) would have a record to insert.
    assert!(client.remote_id().await.is_none());
    assert!(server.remote_id().await.is_none());

    assert!(matches!(
        rx_old.recv().await,
        Some(ConnectionEvent::Disconnected(DisconnectReason::VersionMismatch))
    ));
}

#[test]
fn test_s6_reconnection_with_stale_fingerprint_still_succeeds() {
    let signing_key = SigningKey::generate(&mut rand_core::OsRng);
    let issuer_key: VerifyingKey = signing_key.verifying_key();
    let bridge_id = NodeId::random();
    let finder = DhtFinderNone;
    let bridge = BridgeNode::new(bridge_id, signing_key, Config::new("secret"), finder, AlwaysAck);

    let reconnecting_peer = NodeId::random();
    let token = bridge.connect_genesis_peer(reconnecting_peer, 0);

    let stale_fingerprint = warden_coordinator::network_fingerprint(&[NodeId::random()], &[], &bridge_id, 0);
    let current_active_peers = vec![NodeId::random(), NodeId::random(), NodeId::random()];

    let result = bridge.validate_reconnection(
        &token,
        &issuer_key,
        &stale_fingerprint,
        &current_active_peers,
        &[],
        3_600_000 * 10,
    );
    assert!(result.is_ok(), "a valid token must reconnect even with a stale fingerprint");
}

struct DhtFinderNone;

#[async_trait]
impl RoutingSnapshot for DhtFinderNone {
    async fn find_node_candidates(
        &self,
        _target: NodeId,
        _deadline: Duration,
    ) -> Result<Vec<HelperCandidate>, warden_coordinator::CoordinatorError> {
        Ok(vec![])
    }
}
